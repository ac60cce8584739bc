use crate::{
    Result,
    constants::{CURRENT_PAYLOAD_LENGTH, LEGACY_PAYLOAD_LENGTH, UNIQUE_ID_LENGTH},
    error::Error,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Source of a pulse signal.
///
/// The wire carries a single byte. Values other than the known codes decode
/// as [`Identifier::CardAccepter`], so a decode never fails on this field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Identifier {
    CardAccepter = 0,
    BillAcceptor = 1,
}

impl Identifier {
    /// Decode an identifier from its wire byte.
    #[inline]
    #[must_use]
    pub fn from_wire(value: u8) -> Self {
        match value {
            1 => Identifier::BillAcceptor,
            _ => Identifier::CardAccepter,
        }
    }

    /// Convert the identifier to its wire byte.
    #[inline]
    #[must_use]
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Returns `true` if the pulse came from the bill acceptor.
    #[inline]
    #[must_use]
    pub fn is_bill_acceptor(self) -> bool {
        matches!(self, Identifier::BillAcceptor)
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Identifier::CardAccepter => write!(f, "CardAccepter"),
            Identifier::BillAcceptor => write!(f, "BillAcceptor"),
        }
    }
}

/// Payload layout a pulse event was decoded from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FrameFormat {
    /// 6-byte payload without a unique id.
    Legacy,
    /// 16-byte payload carrying a 10-byte unique id.
    Current,
}

impl FrameFormat {
    /// Map a declared payload length to its format.
    ///
    /// Only the two documented lengths are accepted.
    #[must_use]
    pub fn from_payload_length(length: usize) -> Option<Self> {
        match length {
            LEGACY_PAYLOAD_LENGTH => Some(FrameFormat::Legacy),
            CURRENT_PAYLOAD_LENGTH => Some(FrameFormat::Current),
            _ => None,
        }
    }

    /// Payload length in bytes for this format.
    #[must_use]
    pub fn payload_length(self) -> usize {
        match self {
            FrameFormat::Legacy => LEGACY_PAYLOAD_LENGTH,
            FrameFormat::Current => CURRENT_PAYLOAD_LENGTH,
        }
    }
}

/// 10-byte transaction token used by consumers to deduplicate credits.
///
/// Legacy frames carry no token; they decode to [`UniqueId::ZERO`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct UniqueId([u8; UNIQUE_ID_LENGTH]);

impl UniqueId {
    /// All-zero id, synthesized for legacy frames.
    pub const ZERO: UniqueId = UniqueId([0; UNIQUE_ID_LENGTH]);

    /// Wrap raw id bytes.
    #[must_use]
    pub const fn new(bytes: [u8; UNIQUE_ID_LENGTH]) -> Self {
        UniqueId(bytes)
    }

    /// Copy an id out of a byte slice.
    ///
    /// # Errors
    /// Returns `Error::InvalidUniqueId` if the slice is not exactly 10 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let array: [u8; UNIQUE_ID_LENGTH] =
            bytes.try_into().map_err(|_| Error::InvalidUniqueId {
                length: bytes.len(),
            })?;
        Ok(UniqueId(array))
    }

    /// Raw id bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; UNIQUE_ID_LENGTH] {
        &self.0
    }

    /// Returns `true` if every byte is zero (legacy frame or unset id).
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|&b| b == 0)
    }

    /// Uppercase hex rendering, e.g. `0A0B0C0D0E0F10111213`.
    #[must_use]
    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.0)
    }
}

impl From<[u8; UNIQUE_ID_LENGTH]> for UniqueId {
    fn from(bytes: [u8; UNIQUE_ID_LENGTH]) -> Self {
        UniqueId(bytes)
    }
}

impl fmt::Debug for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "UniqueId({})", self.to_hex())
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::str::FromStr for UniqueId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = hex::decode(s).map_err(|e| Error::InvalidMessageFormat {
            message: format!("Invalid unique id '{s}': {e}"),
        })?;
        UniqueId::from_slice(&bytes)
    }
}

impl Serialize for UniqueId {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for UniqueId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// One decoded pulse frame.
///
/// Events are immutable values. The unique id is copied out of the decode
/// buffer, so an event never aliases parser memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PulseEvent {
    identifier: Identifier,
    pulse_count: u16,
    unique_id: UniqueId,
    timestamp: DateTime<Utc>,
    format: FrameFormat,
}

impl PulseEvent {
    /// Create an event from a current-format frame.
    #[must_use]
    pub fn new(
        identifier: Identifier,
        pulse_count: u16,
        unique_id: UniqueId,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            identifier,
            pulse_count,
            unique_id,
            timestamp,
            format: FrameFormat::Current,
        }
    }

    /// Create an event from a legacy frame; the unique id is all zeros.
    #[must_use]
    pub fn legacy(identifier: Identifier, pulse_count: u16, timestamp: DateTime<Utc>) -> Self {
        Self {
            identifier,
            pulse_count,
            unique_id: UniqueId::ZERO,
            timestamp,
            format: FrameFormat::Legacy,
        }
    }

    #[must_use]
    pub fn identifier(&self) -> Identifier {
        self.identifier
    }

    /// Cumulative counter exactly as transmitted by the controller.
    #[must_use]
    pub fn pulse_count(&self) -> u16 {
        self.pulse_count
    }

    #[must_use]
    pub fn unique_id(&self) -> UniqueId {
        self.unique_id
    }

    /// Instant the frame finished decoding (not transmission time).
    #[must_use]
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    #[must_use]
    pub fn format(&self) -> FrameFormat {
        self.format
    }

    /// Returns `true` for events decoded from the legacy 6-byte payload.
    ///
    /// Legacy events carry no dedup token; the consumer decides how to
    /// treat them.
    #[must_use]
    pub fn is_legacy(&self) -> bool {
        self.format == FrameFormat::Legacy
    }
}

impl fmt::Display for PulseEvent {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{} pulse_count={} unique_id={} at {}",
            self.identifier,
            self.pulse_count,
            self.unique_id,
            self.timestamp.to_rfc3339()
        )
    }
}

/// Lifecycle state of a pulse-device connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Stopped,
    Starting,
    Running,
    Stopping,
}

impl ConnectionState {
    /// Returns `true` while a port is being opened or is open.
    #[must_use]
    pub fn is_active(self) -> bool {
        matches!(self, ConnectionState::Starting | ConnectionState::Running)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ConnectionState::Stopped => write!(f, "Stopped"),
            ConnectionState::Starting => write!(f, "Starting"),
            ConnectionState::Running => write!(f, "Running"),
            ConnectionState::Stopping => write!(f, "Stopping"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0, Identifier::CardAccepter)]
    #[case(1, Identifier::BillAcceptor)]
    #[case(2, Identifier::CardAccepter)]
    #[case(0x7F, Identifier::CardAccepter)]
    #[case(0xFF, Identifier::CardAccepter)]
    fn test_identifier_from_wire(#[case] input: u8, #[case] expected: Identifier) {
        assert_eq!(Identifier::from_wire(input), expected);
    }

    #[test]
    fn test_identifier_to_u8() {
        assert_eq!(Identifier::CardAccepter.to_u8(), 0);
        assert_eq!(Identifier::BillAcceptor.to_u8(), 1);
        assert!(Identifier::BillAcceptor.is_bill_acceptor());
        assert!(!Identifier::CardAccepter.is_bill_acceptor());
    }

    #[rstest]
    #[case(6, Some(FrameFormat::Legacy))]
    #[case(16, Some(FrameFormat::Current))]
    #[case(0, None)]
    #[case(5, None)]
    #[case(7, None)]
    #[case(15, None)]
    #[case(17, None)]
    fn test_frame_format_from_length(#[case] length: usize, #[case] expected: Option<FrameFormat>) {
        assert_eq!(FrameFormat::from_payload_length(length), expected);
    }

    #[test]
    fn test_unique_id_zero() {
        assert!(UniqueId::ZERO.is_zero());
        assert_eq!(UniqueId::default(), UniqueId::ZERO);
        assert!(!UniqueId::new([0, 0, 0, 0, 0, 0, 0, 0, 0, 1]).is_zero());
    }

    #[test]
    fn test_unique_id_hex() {
        let id = UniqueId::new([0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F, 0x10, 0x11, 0x12, 0x13]);
        assert_eq!(id.to_hex(), "0A0B0C0D0E0F10111213");
        assert_eq!(id.to_string(), "0A0B0C0D0E0F10111213");
        assert_eq!("0a0b0c0d0e0f10111213".parse::<UniqueId>().unwrap(), id);
    }

    #[rstest]
    #[case(&[])]
    #[case(&[1, 2, 3])]
    #[case(&[0; 11])]
    fn test_unique_id_wrong_length(#[case] input: &[u8]) {
        let err = UniqueId::from_slice(input).unwrap_err();
        assert!(matches!(err, Error::InvalidUniqueId { length } if length == input.len()));
    }

    #[test]
    fn test_legacy_event_has_zero_id() {
        let event = PulseEvent::legacy(Identifier::BillAcceptor, 42, Utc::now());
        assert!(event.is_legacy());
        assert!(event.unique_id().is_zero());
        assert_eq!(event.pulse_count(), 42);
        assert_eq!(event.format(), FrameFormat::Legacy);
    }

    #[test]
    fn test_event_serde() {
        let id = UniqueId::new([1, 2, 3, 4, 5, 6, 7, 8, 9, 10]);
        let event = PulseEvent::new(Identifier::CardAccepter, 7, id, Utc::now());

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"unique_id\":\"0102030405060708090A\""));

        let back: PulseEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }

    #[test]
    fn test_connection_state() {
        assert_eq!(ConnectionState::default(), ConnectionState::Stopped);
        assert!(ConnectionState::Running.is_active());
        assert!(ConnectionState::Starting.is_active());
        assert!(!ConnectionState::Stopping.is_active());
        assert_eq!(ConnectionState::Stopping.to_string(), "Stopping");
    }
}
