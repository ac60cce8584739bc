//! Serial transport trait definitions.
//!
//! These traits are the seam between the [`PulseClient`](crate::PulseClient)
//! and the serial hardware. The client only ever talks to a
//! [`TransportOpener`] and the [`SerialTransport`] it returns, so the real
//! `serialport` backend and the [`MockSerial`](crate::mock::MockSerial) test
//! double are interchangeable.
//!
//! Both traits are synchronous. Serial reads are blocking calls bounded by
//! the line timeout and run on a `spawn_blocking` worker, so the traits stay
//! object-safe and are used as `Box<dyn SerialTransport>` and
//! `Arc<dyn TransportOpener>`.

use crate::LineSettings;
use pulselink_core::Result;
use std::io;

/// An open serial handle.
///
/// Dropping the transport closes the port.
///
/// # Examples
///
/// ```
/// use pulselink_hardware::traits::SerialTransport;
///
/// fn drain<T: SerialTransport + ?Sized>(transport: &mut T) -> std::io::Result<Vec<u8>> {
///     let mut out = Vec::new();
///     let mut buf = [0u8; 64];
///     while transport.is_open() {
///         match transport.read(&mut buf) {
///             Ok(0) => break,
///             Ok(n) => out.extend_from_slice(&buf[..n]),
///             Err(e) if e.kind() == std::io::ErrorKind::TimedOut => break,
///             Err(e) => return Err(e),
///         }
///     }
///     Ok(out)
/// }
/// ```
pub trait SerialTransport: Send {
    /// Read available bytes into `buf`, blocking for at most the line
    /// timeout.
    ///
    /// # Errors
    ///
    /// - `ErrorKind::TimedOut` (or `WouldBlock`) when no data arrived within
    ///   the timeout. Callers treat this as "no data", not a failure.
    /// - Any other error is a connection fault.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Whether the handle is still usable.
    ///
    /// Returns `false` once the device has gone away; the read loop exits
    /// when it sees this.
    fn is_open(&self) -> bool;

    /// Port name this transport was opened on.
    fn name(&self) -> &str;
}

/// Factory for [`SerialTransport`]s.
///
/// # Examples
///
/// ```
/// use pulselink_hardware::LineSettings;
/// use pulselink_hardware::mock::MockSerialOpener;
/// use pulselink_hardware::traits::{SerialTransport, TransportOpener};
///
/// let (opener, handle) = MockSerialOpener::new();
/// let transport = opener.open("COM3", &LineSettings::pulse_device()).unwrap();
///
/// assert_eq!(transport.name(), "COM3");
/// assert_eq!(handle.open_count(), 1);
/// ```
pub trait TransportOpener: Send + Sync {
    /// Open `port` with the given line settings.
    ///
    /// May block while the operating system opens the device.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Open`](pulselink_core::Error::Open) when the port
    /// cannot be opened or configured.
    fn open(&self, port: &str, settings: &LineSettings) -> Result<Box<dyn SerialTransport>>;
}

/// Whether a read error only means "no data within the timeout".
pub fn is_timeout(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

/// Whether a read error means the device is gone for good.
pub fn is_disconnect(error: &io::Error) -> bool {
    matches!(
        error.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::NotConnected
            | io::ErrorKind::NotFound
            | io::ErrorKind::UnexpectedEof
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(io::ErrorKind::TimedOut, true)]
    #[case(io::ErrorKind::WouldBlock, true)]
    #[case(io::ErrorKind::Interrupted, true)]
    #[case(io::ErrorKind::BrokenPipe, false)]
    #[case(io::ErrorKind::PermissionDenied, false)]
    fn test_is_timeout(#[case] kind: io::ErrorKind, #[case] expected: bool) {
        assert_eq!(is_timeout(&io::Error::from(kind)), expected);
    }

    #[rstest]
    #[case(io::ErrorKind::BrokenPipe, true)]
    #[case(io::ErrorKind::NotConnected, true)]
    #[case(io::ErrorKind::NotFound, true)]
    #[case(io::ErrorKind::UnexpectedEof, true)]
    #[case(io::ErrorKind::TimedOut, false)]
    #[case(io::ErrorKind::Other, false)]
    fn test_is_disconnect(#[case] kind: io::ErrorKind, #[case] expected: bool) {
        assert_eq!(is_disconnect(&io::Error::from(kind)), expected);
    }

    #[test]
    fn test_traits_are_object_safe() {
        fn assert_transport(_: Option<Box<dyn SerialTransport>>) {}
        fn assert_opener(_: Option<std::sync::Arc<dyn TransportOpener>>) {}

        assert_transport(None);
        assert_opener(None);
    }
}
