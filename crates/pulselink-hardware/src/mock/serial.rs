//! Mock serial port for testing and development.
//!
//! This module provides a simulated serial line that can be controlled
//! programmatically, so the client can be exercised without hardware.

use crate::LineSettings;
use crate::traits::{SerialTransport, TransportOpener};
use pulselink_core::{Error, Result};
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::Duration;

/// Something queued for the next read.
#[derive(Debug)]
enum ReadItem {
    Data(Vec<u8>),
    Fail(io::ErrorKind),
}

#[derive(Debug, Default)]
struct LineState {
    pending: VecDeque<ReadItem>,
    /// Cleared by `disconnect`; every read then fails with `BrokenPipe`.
    connected: bool,
    open_failure: Option<String>,
    open_delay: Duration,
    opened_ports: Vec<String>,
    live_handles: usize,
    opens: usize,
    closes: usize,
}

#[derive(Debug, Default)]
struct Line {
    state: Mutex<LineState>,
    data_ready: Condvar,
}

impl Line {
    fn lock(&self) -> MutexGuard<'_, LineState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Opener that hands out [`MockSerial`] transports sharing one simulated line.
///
/// # Examples
///
/// ```
/// use pulselink_hardware::LineSettings;
/// use pulselink_hardware::mock::MockSerialOpener;
/// use pulselink_hardware::traits::{SerialTransport, TransportOpener};
///
/// let (opener, handle) = MockSerialOpener::new();
/// let mut port = opener.open("COM3", &LineSettings::pulse_device()).unwrap();
///
/// handle.push_bytes(&[0x02, 0x02]);
///
/// let mut buf = [0u8; 8];
/// assert_eq!(port.read(&mut buf).unwrap(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct MockSerialOpener {
    line: Arc<Line>,
}

impl MockSerialOpener {
    /// Create a new opener and the handle controlling its line.
    pub fn new() -> (Self, MockSerialHandle) {
        let line = Arc::new(Line::default());
        line.lock().connected = true;

        (
            Self {
                line: Arc::clone(&line),
            },
            MockSerialHandle { line },
        )
    }
}

impl TransportOpener for MockSerialOpener {
    fn open(&self, port: &str, settings: &LineSettings) -> Result<Box<dyn SerialTransport>> {
        let delay = self.line.lock().open_delay;
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let mut state = self.line.lock();
        if let Some(message) = &state.open_failure {
            return Err(Error::open(port, message.clone()));
        }

        state.connected = true;
        state.opens += 1;
        state.live_handles += 1;
        state.opened_ports.push(port.to_string());

        Ok(Box::new(MockSerial {
            name: port.to_string(),
            line: Arc::clone(&self.line),
            timeout: settings.timeout,
            disconnected: false,
        }))
    }
}

/// Transport returned by [`MockSerialOpener`].
///
/// Reads block on the shared line until bytes are pushed or the line
/// timeout elapses, mirroring a real port opened with a read timeout.
#[derive(Debug)]
pub struct MockSerial {
    name: String,
    line: Arc<Line>,
    timeout: Duration,
    disconnected: bool,
}

impl SerialTransport for MockSerial {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let state = self.line.lock();
        let (mut state, _) = self
            .line
            .data_ready
            .wait_timeout_while(state, self.timeout, |s| s.connected && s.pending.is_empty())
            .unwrap_or_else(|e| e.into_inner());

        if !state.connected {
            self.disconnected = true;
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "mock serial line disconnected",
            ));
        }

        match state.pending.pop_front() {
            None => Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "mock serial read timed out",
            )),
            Some(ReadItem::Fail(kind)) => Err(io::Error::new(kind, "injected mock read error")),
            Some(ReadItem::Data(mut data)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                if n < data.len() {
                    state.pending.push_front(ReadItem::Data(data.split_off(n)));
                }
                Ok(n)
            }
        }
    }

    fn is_open(&self) -> bool {
        !self.disconnected
    }

    fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for MockSerial {
    fn drop(&mut self) {
        let mut state = self.line.lock();
        state.live_handles -= 1;
        state.closes += 1;
    }
}

/// Handle for controlling a mock serial line.
///
/// # Examples
///
/// ```
/// use pulselink_hardware::mock::MockSerialOpener;
///
/// let (_opener, handle) = MockSerialOpener::new();
///
/// handle.fail_opens("Access denied");
/// handle.clear_open_failure();
/// handle.push_bytes(&[0x02, 0x02, 0x06, 0x00]);
/// assert_eq!(handle.pending_reads(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct MockSerialHandle {
    line: Arc<Line>,
}

impl MockSerialHandle {
    /// Queue bytes to be returned by a read.
    ///
    /// One push is delivered by one read, or split across several if the
    /// reader's buffer is smaller.
    pub fn push_bytes(&self, bytes: &[u8]) {
        self.line
            .lock()
            .pending
            .push_back(ReadItem::Data(bytes.to_vec()));
        self.line.data_ready.notify_all();
    }

    /// Queue a read failure of the given kind.
    pub fn inject_read_error(&self, kind: io::ErrorKind) {
        self.line.lock().pending.push_back(ReadItem::Fail(kind));
        self.line.data_ready.notify_all();
    }

    /// Make every subsequent open fail with `message`.
    pub fn fail_opens(&self, message: impl Into<String>) {
        self.line.lock().open_failure = Some(message.into());
    }

    /// Let opens succeed again.
    pub fn clear_open_failure(&self) {
        self.line.lock().open_failure = None;
    }

    /// Make each open block for `delay` before completing.
    pub fn set_open_delay(&self, delay: Duration) {
        self.line.lock().open_delay = delay;
    }

    /// Simulate the device being unplugged.
    ///
    /// Pending reads are dropped and every read fails until the next open.
    pub fn disconnect(&self) {
        let mut state = self.line.lock();
        state.connected = false;
        state.pending.clear();
        drop(state);
        self.line.data_ready.notify_all();
    }

    /// Number of successful opens.
    pub fn open_count(&self) -> usize {
        self.line.lock().opens
    }

    /// Number of transports dropped.
    pub fn close_count(&self) -> usize {
        self.line.lock().closes
    }

    /// Number of transports currently alive.
    pub fn open_handles(&self) -> usize {
        self.line.lock().live_handles
    }

    /// Port names passed to successful opens, oldest first.
    pub fn opened_ports(&self) -> Vec<String> {
        self.line.lock().opened_ports.clone()
    }

    /// Number of queued reads not yet consumed.
    pub fn pending_reads(&self) -> usize {
        self.line.lock().pending.len()
    }
}
