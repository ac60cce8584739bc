//! Core constants for the pulse-device wire protocol and serial line.
//!
//! This module defines the framing constants shared by the decoder and the
//! frame encoder, plus the fixed serial line parameters used to talk to the
//! coin/bill-acceptor controller.
//!
//! # Frame Structure
//!
//! ```text
//! ┌──────┬──────┬──────────────┬─────────────────────┐
//! │ 0x02 │ 0x02 │ length (LE)  │ payload (6 or 16 B) │
//! └──────┴──────┴──────────────┴─────────────────────┘
//!   sync   sync    2 bytes
//! ```
//!
//! Payload layouts:
//!
//! | Format  | Length | Layout                                              |
//! |---------|--------|-----------------------------------------------------|
//! | Legacy  | 6      | `[identifier][reserved:3][count LE:2]`              |
//! | Current | 16     | `[identifier][padding:3][count LE:2][unique id:10]` |
//!
//! There is no checksum; only the two documented lengths are accepted.
//!
//! # Usage
//!
//! ```
//! use pulselink_core::constants::*;
//!
//! assert_eq!(SYNC_BYTES, [0x02, 0x02]);
//! assert_eq!(HEADER_LENGTH + CURRENT_PAYLOAD_LENGTH, 20);
//! ```

// ============================================================================
// Frame Markers
// ============================================================================

/// Value of each of the two sync bytes opening every frame.
pub const SYNC_BYTE: u8 = 0x02;

/// Complete two-byte frame header marker.
pub const SYNC_BYTES: [u8; 2] = [SYNC_BYTE, SYNC_BYTE];

/// Header size: two sync bytes plus the 16-bit payload length.
pub const HEADER_LENGTH: usize = 4;

/// Offset of the little-endian payload length inside the header.
pub const LENGTH_OFFSET: usize = 2;

// ============================================================================
// Payload Layout
// ============================================================================

/// Payload length of the legacy frame format (no unique id).
pub const LEGACY_PAYLOAD_LENGTH: usize = 6;

/// Payload length of the current frame format.
pub const CURRENT_PAYLOAD_LENGTH: usize = 16;

/// Offset of the identifier byte within either payload.
pub const IDENTIFIER_OFFSET: usize = 0;

/// Offset of the little-endian pulse count within either payload.
///
/// In the legacy format the count occupies the final two payload bytes,
/// which lands on the same offset.
pub const PULSE_COUNT_OFFSET: usize = 4;

/// Offset of the unique id within the current payload.
pub const UNIQUE_ID_OFFSET: usize = 6;

/// Length of the unique id carried by current-format frames.
pub const UNIQUE_ID_LENGTH: usize = 10;

/// Largest frame a 16-bit length field can declare.
pub const MAX_FRAME_LENGTH: usize = HEADER_LENGTH + u16::MAX as usize;

// ============================================================================
// Serial Line
// ============================================================================

/// Baud rate of the acceptor controller link.
pub const BAUD_RATE: u32 = 115_200;

/// Data bits per character.
pub const DATA_BITS: u8 = 8;

/// Stop bits per character.
pub const STOP_BITS: u8 = 1;

/// Per-call read/write timeout in milliseconds.
///
/// Short enough that the read loop observes cancellation promptly.
pub const READ_TIMEOUT_MS: u64 = 100;

// ============================================================================
// Lifecycle Timing
// ============================================================================

/// Backoff applied after a read failure before the next attempt (ms).
pub const ERROR_BACKOFF_MS: u64 = 500;

/// Delay between closing and reopening a port during self-healing restart (ms).
///
/// Gives the operating system time to release the device handle.
pub const RESTART_SETTLE_DELAY_MS: u64 = 250;

/// Upper bound on how long `stop` waits for the read loop to exit (ms).
pub const STOP_TIMEOUT_MS: u64 = 2000;

/// Upper bound on how long disposal waits for the read loop to exit (ms).
pub const DISPOSE_TIMEOUT_MS: u64 = 2000;

/// Size of the scratch buffer handed to each serial read.
pub const READ_CHUNK_SIZE: usize = 256;
