//! Connection lifecycle manager for the pulse-device serial link.
//!
//! [`PulseClient`] owns at most one open serial port, runs the read loop on a
//! blocking worker, and delivers decoded [`PulseEvent`]s to subscribers.
//!
//! # Architecture
//!
//! ```text
//!  host ──start/stop/dispose──► PulseClient ──Mutex<Shared>──┐
//!                                    │                       │
//!                             spawn_blocking                 │ error flag
//!                                    ▼                       │
//!  serial port ──read──► ReadLoop ──feed──► FrameParser      │
//!                            │                               │
//!                            └──emit──► PulseEmitter ──► subscribers
//! ```
//!
//! All lifecycle bookkeeping (state, error flag, port name, worker handle)
//! lives in one struct behind one mutex. The mutex is never held across an
//! `.await` or a serial call: ports are opened outside the lock and the
//! "is anything active" check is repeated right before the new connection
//! is committed.
//!
//! # Examples
//!
//! ```no_run
//! use pulselink_hardware::PulseClient;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> pulselink_hardware::Result<()> {
//!     let client = PulseClient::serial();
//!
//!     client.on_pulse_count_received(|event| {
//!         println!("{} pulses from {}", event.pulse_count(), event.identifier());
//!     });
//!
//!     let cancel = CancellationToken::new();
//!     client.start("/dev/ttyUSB0", &cancel).await?;
//!
//!     // ... later
//!     client.stop(&CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```

use crate::config::{LineSettings, PulseClientConfig};
use crate::emitter::{PulseEmitter, SubscriptionId};
use crate::traits::{SerialTransport, TransportOpener, is_timeout};
use pulselink_core::{ConnectionState, Error, PulseEvent, Result};
use pulselink_protocol::FrameParser;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::instrument::WithSubscriber;
use tracing::{Dispatch, debug, error, info, trace, warn};

/// Granularity of cancellation checks while sleeping on a blocking thread.
const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Counters describing what the client has done since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ClientStats {
    /// Ports successfully opened and committed.
    pub connections_opened: u64,

    /// Events handed to subscribers.
    pub events_emitted: u64,

    /// Reads that failed with something other than a timeout.
    pub read_errors: u64,

    /// Frames dropped for an unsupported payload length.
    pub malformed_frames: u64,

    /// Bytes dropped while resynchronizing.
    pub resync_bytes: u64,
}

#[derive(Debug, Default)]
struct Counters {
    connections_opened: AtomicU64,
    events_emitted: AtomicU64,
    read_errors: AtomicU64,
    malformed_frames: AtomicU64,
    resync_bytes: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> ClientStats {
        ClientStats {
            connections_opened: self.connections_opened.load(Ordering::Relaxed),
            events_emitted: self.events_emitted.load(Ordering::Relaxed),
            read_errors: self.read_errors.load(Ordering::Relaxed),
            malformed_frames: self.malformed_frames.load(Ordering::Relaxed),
            resync_bytes: self.resync_bytes.load(Ordering::Relaxed),
        }
    }
}

/// A committed connection and the worker reading from it.
#[derive(Debug)]
struct ActiveConnection {
    port: String,
    token: CancellationToken,
    worker: JoinHandle<()>,
    generation: u64,
}

impl ActiveConnection {
    fn is_alive(&self) -> bool {
        !self.worker.is_finished()
    }
}

/// Everything guarded by the client mutex.
#[derive(Debug, Default)]
struct Shared {
    state: ConnectionState,
    connection_error: bool,
    port_name: Option<String>,
    active: Option<ActiveConnection>,
    /// Starts currently opening a port outside the lock.
    pending_starts: usize,
    next_generation: u64,
    disposed: bool,
}

impl Shared {
    /// Settle into `Stopped` unless a connection or an open is in flight.
    fn settle_stopped(&mut self) {
        if self.active.is_none() {
            self.state = if self.pending_starts > 0 {
                ConnectionState::Starting
            } else {
                ConnectionState::Stopped
            };
            self.connection_error = false;
            self.port_name = None;
        }
    }

    /// Whether the committed connection's worker already exited on its own.
    fn worker_exited(&self) -> bool {
        self.active.as_ref().is_some_and(|a| !a.is_alive())
    }

    /// Drop a connection whose worker already exited on its own.
    fn reap_stale(&mut self) {
        if self.worker_exited() {
            if let Some(stale) = self.active.take() {
                debug!(port = %stale.port, "Cleaning up stale connection");
            }
            self.settle_stopped();
        }
    }
}

struct Inner {
    shared: Mutex<Shared>,
    emitter: PulseEmitter,
    opener: Arc<dyn TransportOpener>,
    config: PulseClientConfig,
    line: LineSettings,
    dispatch: Dispatch,
    counters: Counters,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, Shared> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Set the error flag if `generation` is still the committed connection.
    fn flag_connection_error(&self, generation: u64) -> bool {
        let mut shared = self.lock();
        let current = shared
            .active
            .as_ref()
            .is_some_and(|a| a.generation == generation);
        if current {
            shared.connection_error = true;
        }
        current
    }
}

/// Settles the shared state when a lifecycle step ends.
///
/// A `start` or `stop` future can be dropped at any `.await`. The guard
/// withdraws its pending open (if any) and settles into `Stopped` on drop,
/// so no transitional state outlives the future.
struct SettleGuard<'a> {
    inner: &'a Inner,
    pending_start: bool,
    armed: bool,
}

impl<'a> SettleGuard<'a> {
    /// Guard a connection that has been taken out for teardown.
    fn stopping(inner: &'a Inner) -> Self {
        Self {
            inner,
            pending_start: false,
            armed: true,
        }
    }

    /// Register an open running outside the lock.
    fn opening(inner: &'a Inner, shared: &mut Shared) -> Self {
        shared.pending_starts += 1;
        if shared.active.is_none() {
            shared.state = ConnectionState::Starting;
        }
        Self {
            inner,
            pending_start: true,
            armed: true,
        }
    }

    /// Settle under a lock the caller already holds.
    fn release(mut self, shared: &mut Shared) {
        self.armed = false;
        self.settle(shared);
    }

    fn settle(&self, shared: &mut Shared) {
        if self.pending_start {
            shared.pending_starts -= 1;
        }
        shared.settle_stopped();
    }
}

impl Drop for SettleGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            let mut shared = self.inner.lock();
            self.settle(&mut shared);
        }
    }
}

/// Builder for [`PulseClient`].
///
/// # Examples
///
/// ```
/// use pulselink_hardware::{PulseClient, PulseClientConfig};
/// use pulselink_hardware::mock::MockSerialOpener;
/// use std::time::Duration;
///
/// let (opener, _handle) = MockSerialOpener::new();
/// let client = PulseClient::builder(opener)
///     .config(PulseClientConfig {
///         stop_timeout: Duration::from_millis(500),
///         ..Default::default()
///     })
///     .build();
///
/// assert!(!client.is_running());
/// ```
pub struct PulseClientBuilder {
    opener: Arc<dyn TransportOpener>,
    config: PulseClientConfig,
    dispatch: Option<Dispatch>,
}

impl PulseClientBuilder {
    /// Replace the default timing configuration.
    pub fn config(mut self, config: PulseClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Log through `dispatch` instead of the caller's default subscriber.
    pub fn dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = Some(dispatch);
        self
    }

    pub fn build(self) -> PulseClient {
        let dispatch = self
            .dispatch
            .unwrap_or_else(|| tracing::dispatcher::get_default(|d| d.clone()));
        let line = LineSettings::pulse_device().with_timeout(self.config.read_timeout);

        PulseClient {
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared::default()),
                emitter: PulseEmitter::new(),
                opener: self.opener,
                config: self.config,
                line,
                dispatch,
                counters: Counters::default(),
            }),
        }
    }
}

/// Client for a pulse-emitting coin/bill acceptor controller.
///
/// # Lifecycle
///
/// - `Stopped → start → Starting → Running`
/// - `Running → stop → Stopping → Stopped`
/// - A read failure while `Running` sets the connection error flag and the
///   loop keeps retrying with a backoff. Calling [`start`](Self::start) again
///   on the same port closes and reopens it.
/// - [`dispose`](Self::dispose) tears everything down; it also runs on drop.
///
/// All methods take `&self`; share the client between tasks with an `Arc`.
/// Concurrent calls are safe, but overlapping starts and stops only agree on
/// the final state, so callers should check return values and
/// [`is_running`](Self::is_running) rather than assume exclusivity.
pub struct PulseClient {
    inner: Arc<Inner>,
}

impl PulseClient {
    /// Start building a client around `opener`.
    pub fn builder(opener: impl TransportOpener + 'static) -> PulseClientBuilder {
        PulseClientBuilder {
            opener: Arc::new(opener),
            config: PulseClientConfig::default(),
            dispatch: None,
        }
    }

    /// Client with default configuration, logging through the caller's
    /// current default subscriber.
    pub fn new(opener: impl TransportOpener + 'static) -> Self {
        Self::builder(opener).build()
    }

    /// Client for real serial ports.
    #[cfg(feature = "hardware-serial")]
    pub fn serial() -> Self {
        Self::new(crate::transport::SerialPortOpener::new())
    }

    /// Open `port_name` and start delivering pulse events.
    ///
    /// - Already running healthy on `port_name`: no-op.
    /// - Running on `port_name` with the error flag set: the port is closed,
    ///   the settle delay elapses, then it is reopened.
    ///
    /// The connection stays tied to `cancel`: cancelling it later ends the
    /// read loop as if [`stop`](Self::stop) had been called, except that
    /// bookkeeping is cleaned up on the next `start`.
    ///
    /// # Errors
    ///
    /// - [`Error::Configuration`] if `port_name` is empty.
    /// - [`Error::Disposed`] after [`dispose`](Self::dispose).
    /// - [`Error::Cancelled`] if `cancel` is cancelled before the port is
    ///   committed. Nothing stays open.
    /// - [`Error::Conflict`] if a different port is active.
    /// - [`Error::Open`] if the port cannot be opened. Nothing stays open.
    pub async fn start(&self, port_name: &str, cancel: &CancellationToken) -> Result<()> {
        self.start_inner(port_name, cancel)
            .with_subscriber(self.inner.dispatch.clone())
            .await
    }

    async fn start_inner(&self, port_name: &str, cancel: &CancellationToken) -> Result<()> {
        if port_name.trim().is_empty() {
            return Err(Error::configuration("Port name must not be empty"));
        }

        let restart = {
            let mut shared = self.inner.lock();
            if shared.disposed {
                return Err(Error::Disposed);
            }
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }
            shared.reap_stale();

            let active_port = shared.active.as_ref().map(|a| a.port.clone());
            match active_port {
                Some(active) if active != port_name => {
                    return Err(Error::conflict(active, port_name));
                }
                Some(_) if !shared.connection_error => {
                    debug!(port = port_name, "Already running, start is a no-op");
                    return Ok(());
                }
                Some(_) => {
                    shared.state = ConnectionState::Stopping;
                    shared.active.take()
                }
                None => None,
            }
        };

        if let Some(active) = restart {
            let settle = SettleGuard::stopping(&self.inner);
            warn!(
                port = port_name,
                "Connection error flagged, restarting serial connection"
            );
            active.token.cancel();
            let joined = self.join_worker(active, self.inner.config.stop_timeout, cancel).await;
            drop(settle);
            joined?;

            tokio::select! {
                _ = tokio::time::sleep(self.inner.config.restart_settle_delay) => {}
                _ = cancel.cancelled() => return Err(Error::Cancelled),
            }
        }

        self.open_and_commit(port_name, cancel).await
    }

    async fn open_and_commit(&self, port_name: &str, cancel: &CancellationToken) -> Result<()> {
        let pending = {
            let mut shared = self.inner.lock();
            if shared.disposed {
                return Err(Error::Disposed);
            }
            SettleGuard::opening(&self.inner, &mut shared)
        };

        let token = cancel.child_token();
        let opened = self.open_transport(port_name, cancel).await;

        let mut shared = self.inner.lock();
        pending.release(&mut shared);

        let transport = match opened {
            Ok(transport) => transport,
            Err(e) => {
                token.cancel();
                drop(shared);
                match e {
                    Error::Cancelled => debug!(port = port_name, "Start cancelled while opening"),
                    _ => error!(port = port_name, error = %e, "Failed to open serial port"),
                }
                return Err(e);
            }
        };

        if shared.disposed || cancel.is_cancelled() {
            let err = if shared.disposed {
                Error::Disposed
            } else {
                Error::Cancelled
            };
            drop(shared);
            token.cancel();
            drop(transport);
            return Err(err);
        }

        if let Some(winner) = shared.active.as_ref().map(|a| a.port.clone()) {
            drop(shared);
            token.cancel();
            drop(transport);
            if winner == port_name {
                debug!(port = port_name, "Concurrent start already opened this port");
                return Ok(());
            }
            return Err(Error::conflict(winner, port_name));
        }

        shared.next_generation += 1;
        let generation = shared.next_generation;

        let read_loop = ReadLoop {
            inner: Arc::clone(&self.inner),
            transport,
            token: token.clone(),
            generation,
        };
        let dispatch = self.inner.dispatch.clone();
        let worker = tokio::task::spawn_blocking(move || {
            tracing::dispatcher::with_default(&dispatch, || read_loop.run())
        });

        shared.active = Some(ActiveConnection {
            port: port_name.to_string(),
            token,
            worker,
            generation,
        });
        shared.state = ConnectionState::Running;
        shared.connection_error = false;
        shared.port_name = Some(port_name.to_string());
        drop(shared);

        self.inner
            .counters
            .connections_opened
            .fetch_add(1, Ordering::Relaxed);
        info!(port = port_name, "Pulse device connected");
        Ok(())
    }

    /// Open the port on a blocking thread, giving up early if `cancel` fires.
    ///
    /// An abandoned open finishes in the background and its transport is
    /// dropped, closing the port.
    async fn open_transport(
        &self,
        port_name: &str,
        cancel: &CancellationToken,
    ) -> Result<Box<dyn SerialTransport>> {
        let opener = Arc::clone(&self.inner.opener);
        let line = self.inner.line;
        let port = port_name.to_string();
        let open = tokio::task::spawn_blocking(move || opener.open(&port, &line));

        tokio::select! {
            joined = open => joined.map_err(|e| Error::open(port_name, e.to_string()))?,
            _ = cancel.cancelled() => Err(Error::Cancelled),
        }
    }

    /// Close the active connection.
    ///
    /// Returns immediately when nothing is running. Otherwise the connection
    /// is released exactly once and the read loop is awaited for at most the
    /// configured stop timeout; a loop that does not exit in time is
    /// detached and logged.
    ///
    /// # Errors
    ///
    /// [`Error::Cancelled`] if `cancel` fires while waiting for the read
    /// loop. The connection is released and the client is `Stopped` either
    /// way.
    pub async fn stop(&self, cancel: &CancellationToken) -> Result<()> {
        self.stop_inner(cancel)
            .with_subscriber(self.inner.dispatch.clone())
            .await
    }

    async fn stop_inner(&self, cancel: &CancellationToken) -> Result<()> {
        let active = {
            let mut shared = self.inner.lock();
            match shared.active.take() {
                Some(active) => {
                    shared.state = ConnectionState::Stopping;
                    active
                }
                None => {
                    shared.settle_stopped();
                    return Ok(());
                }
            }
        };

        let settle = SettleGuard::stopping(&self.inner);
        info!(port = %active.port, "Stopping pulse device connection");
        active.token.cancel();
        let joined = self
            .join_worker(active, self.inner.config.stop_timeout, cancel)
            .await;

        drop(settle);
        joined
    }

    /// Wait for a cancelled connection's worker to exit.
    async fn join_worker(
        &self,
        active: ActiveConnection,
        limit: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let ActiveConnection { port, worker, .. } = active;

        tokio::select! {
            joined = tokio::time::timeout(limit, worker) => {
                match joined {
                    Ok(Ok(())) => debug!(port = %port, "Read loop exited"),
                    Ok(Err(e)) => error!(port = %port, error = %e, "Read loop terminated abnormally"),
                    Err(_) => warn!(
                        port = %port,
                        timeout_ms = limit.as_millis() as u64,
                        "Read loop did not exit in time, detaching it"
                    ),
                }
                Ok(())
            }
            _ = cancel.cancelled() => {
                debug!(port = %port, "Stop wait cancelled, detaching read loop");
                Err(Error::Cancelled)
            }
        }
    }

    /// Tear the client down.
    ///
    /// Cancels the connection and waits up to the dispose timeout for the
    /// read loop to exit, blocking the calling thread. All subscribers are
    /// removed, so no event is delivered after this returns unless the loop
    /// was stuck inside a callback when the timeout expired. Calling it again
    /// does nothing. Subsequent [`start`](Self::start) calls fail with
    /// [`Error::Disposed`]; [`stop`](Self::stop) stays a no-op.
    pub fn dispose(&self) {
        tracing::dispatcher::with_default(&self.inner.dispatch, || self.dispose_inner());
    }

    fn dispose_inner(&self) {
        let active = {
            let mut shared = self.inner.lock();
            if shared.disposed {
                return;
            }
            shared.disposed = true;
            let active = shared.active.take();
            if active.is_some() {
                shared.state = ConnectionState::Stopping;
            }
            active
        };

        if let Some(active) = active {
            active.token.cancel();

            let limit = self.inner.config.dispose_timeout;
            let deadline = Instant::now() + limit;
            while active.is_alive() && Instant::now() < deadline {
                std::thread::sleep(CANCEL_POLL_INTERVAL);
            }

            if active.is_alive() {
                warn!(
                    port = %active.port,
                    timeout_ms = limit.as_millis() as u64,
                    "Read loop did not exit before dispose timeout, detaching it"
                );
            }
        }

        self.inner.emitter.clear();
        self.inner.lock().settle_stopped();
        debug!("Pulse client disposed");
    }

    /// Port of the committed connection, if any.
    ///
    /// `None` once the read loop has exited on its own, even before the
    /// next `start` cleans the connection up.
    pub fn current_port_name(&self) -> Option<String> {
        let shared = self.inner.lock();
        if shared.worker_exited() {
            return None;
        }
        shared.port_name.clone()
    }

    /// Whether a connection is committed and its read loop is alive.
    pub fn is_running(&self) -> bool {
        let shared = self.inner.lock();
        shared.state == ConnectionState::Running
            && shared.active.as_ref().is_some_and(ActiveConnection::is_alive)
    }

    /// Whether a read failed since the last successful start or stop.
    ///
    /// Stays set after the read loop exits on a disconnect, so a supervisor
    /// polling this flag still sees the failure.
    pub fn has_connection_error(&self) -> bool {
        self.inner.lock().connection_error
    }

    /// Current lifecycle state. A connection whose read loop has exited on
    /// its own reports `Stopped`.
    pub fn state(&self) -> ConnectionState {
        let shared = self.inner.lock();
        if shared.worker_exited() {
            return ConnectionState::Stopped;
        }
        shared.state
    }

    pub fn stats(&self) -> ClientStats {
        self.inner.counters.snapshot()
    }

    /// Register a callback for every decoded pulse event.
    ///
    /// Callbacks run synchronously on the serial read worker in frame
    /// order. No bytes are read while a callback runs, so it must not block
    /// for long. See [`PulseEmitter::subscribe`].
    pub fn on_pulse_count_received<F>(&self, callback: F) -> SubscriptionId
    where
        F: Fn(&PulseEvent) + Send + Sync + 'static,
    {
        self.inner.emitter.subscribe(callback)
    }

    /// Remove a callback. Returns `false` if `id` was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.emitter.unsubscribe(id)
    }
}

impl Drop for PulseClient {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for PulseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let shared = self.inner.lock();
        f.debug_struct("PulseClient")
            .field("state", &shared.state)
            .field("port_name", &shared.port_name)
            .field("connection_error", &shared.connection_error)
            .field("disposed", &shared.disposed)
            .finish()
    }
}

/// The blocking read-decode-emit loop of one connection.
struct ReadLoop {
    inner: Arc<Inner>,
    transport: Box<dyn SerialTransport>,
    token: CancellationToken,
    generation: u64,
}

impl ReadLoop {
    fn run(mut self) {
        let port = self.transport.name().to_string();
        let mut parser = FrameParser::new();
        let mut buf = vec![0u8; self.inner.config.read_chunk_size.max(1)];

        debug!(port = %port, "Read loop started");

        while !self.token.is_cancelled() && self.transport.is_open() {
            match self.transport.read(&mut buf) {
                Ok(0) => {}
                Ok(n) => {
                    trace!(port = %port, bytes = n, "Read serial data");
                    self.decode(&mut parser, &buf[..n]);
                }
                Err(e) if is_timeout(&e) => {}
                Err(e) => {
                    self.inner
                        .counters
                        .read_errors
                        .fetch_add(1, Ordering::Relaxed);
                    if self.inner.flag_connection_error(self.generation) {
                        error!(port = %port, error = %e, "Serial read failed");
                    }
                    if self.transport.is_open() {
                        self.backoff();
                    }
                }
            }
        }

        debug!(
            port = %port,
            cancelled = self.token.is_cancelled(),
            "Read loop finished, closing port"
        );
    }

    fn decode(&self, parser: &mut FrameParser, bytes: &[u8]) {
        let before = parser.stats();
        parser.feed(bytes);
        let after = parser.stats();

        let counters = &self.inner.counters;
        counters
            .malformed_frames
            .fetch_add(after.malformed_frames - before.malformed_frames, Ordering::Relaxed);
        counters
            .resync_bytes
            .fetch_add(after.resync_bytes - before.resync_bytes, Ordering::Relaxed);

        let mut events = parser.drain_events();
        while let Some(event) = events.next() {
            if self.token.is_cancelled() {
                debug!(
                    dropped = events.len() + 1,
                    "Connection cancelled, dropping decoded events"
                );
                break;
            }
            debug!(
                identifier = %event.identifier(),
                pulse_count = event.pulse_count(),
                unique_id = %event.unique_id(),
                "Pulse event received"
            );
            self.inner.emitter.emit(&event);
            counters.events_emitted.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Sleep for the error backoff, waking early on cancellation.
    fn backoff(&self) {
        let deadline = Instant::now() + self.inner.config.error_backoff;
        while !self.token.is_cancelled() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            std::thread::sleep(CANCEL_POLL_INTERVAL.min(deadline - now));
        }
    }
}
