//! Serial connection layer for pulse-emitting coin and bill acceptors.
//!
//! This crate connects the frame decoder in `pulselink-protocol` to a serial
//! port and manages the connection lifecycle:
//!
//! - [`PulseClient`] opens one port at a time, runs the read loop on a
//!   blocking worker, tracks connection health and tears everything down
//!   within bounded time.
//! - [`PulseEmitter`] delivers decoded events to subscribers synchronously,
//!   in frame order.
//! - [`traits::SerialTransport`] and [`traits::TransportOpener`] abstract the
//!   port itself. [`transport::SerialPortOpener`] talks to real hardware
//!   through the `serialport` crate; [`mock::MockSerialOpener`] simulates it.
//!
//! # Example
//!
//! ```
//! use pulselink_core::Identifier;
//! use pulselink_hardware::PulseClient;
//! use pulselink_hardware::mock::MockSerialOpener;
//! use pulselink_protocol::PulseFrame;
//! use std::sync::mpsc;
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> pulselink_hardware::Result<()> {
//!     let (opener, device) = MockSerialOpener::new();
//!     let client = PulseClient::new(opener);
//!
//!     let (tx, rx) = mpsc::channel();
//!     client.on_pulse_count_received(move |event| {
//!         let _ = tx.send(event.pulse_count());
//!     });
//!
//!     client.start("COM3", &CancellationToken::new()).await?;
//!     device.push_bytes(&PulseFrame::legacy(Identifier::BillAcceptor, 5).to_bytes());
//!
//!     assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), 5);
//!
//!     client.stop(&CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Error Handling
//!
//! Lifecycle calls return the shared [`pulselink_core::Error`]. Failures of
//! the running read loop are never returned to a caller: they are logged,
//! recovered from locally, and surface only through
//! [`PulseClient::has_connection_error`].
//!
//! # Logging
//!
//! The crate logs through `tracing`. A client captures the caller's default
//! dispatcher when it is built (or takes one through
//! [`PulseClientBuilder::dispatch`]) and uses it on its worker thread, so no
//! global subscriber is required.

pub mod client;
pub mod config;
pub mod emitter;
pub mod mock;
pub mod traits;
#[cfg(feature = "hardware-serial")]
pub mod transport;

pub use client::{ClientStats, PulseClient, PulseClientBuilder};
pub use config::{LineSettings, PulseClientConfig};
pub use emitter::{PulseCallback, PulseEmitter, SubscriptionId};
pub use pulselink_core::{Error, Result};
#[cfg(feature = "hardware-serial")]
pub use transport::{PortInfo, PortKind, SerialPortOpener, list_ports};
