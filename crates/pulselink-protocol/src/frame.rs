use bytes::{BufMut, BytesMut};
use pulselink_core::constants::{
    CURRENT_PAYLOAD_LENGTH, HEADER_LENGTH, LEGACY_PAYLOAD_LENGTH, SYNC_BYTES,
};
use pulselink_core::{FrameFormat, Identifier, UniqueId};

/// Wire-level pulse frame, used to produce bytes the controller would send.
///
/// The client never sends frames; this type exists for device simulators,
/// the [`PulseCodec`](crate::PulseCodec) encoder and tests.
///
/// # Wire Format
///
/// Current format (20 bytes on the wire):
/// ```text
/// 02 02 10 00 | 01 | 00 00 00 | 05 03 | 10 11 12 13 14 15 16 17 18 19
///  sync  len  | id | padding  | count | unique id
/// ```
///
/// Legacy format (10 bytes on the wire):
/// ```text
/// 02 02 06 00 | 01 | 00 00 00 | 05 03
/// ```
///
/// # Example
///
/// ```
/// use pulselink_core::Identifier;
/// use pulselink_protocol::PulseFrame;
///
/// let frame = PulseFrame::legacy(Identifier::BillAcceptor, 0x0305);
/// assert_eq!(
///     frame.to_bytes(),
///     vec![0x02, 0x02, 0x06, 0x00, 0x01, 0x00, 0x00, 0x00, 0x05, 0x03]
/// );
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PulseFrame {
    identifier: Identifier,
    pulse_count: u16,
    /// `None` selects the legacy layout.
    unique_id: Option<UniqueId>,
}

impl PulseFrame {
    /// Current-format frame carrying a unique id.
    pub fn current(identifier: Identifier, pulse_count: u16, unique_id: UniqueId) -> Self {
        Self {
            identifier,
            pulse_count,
            unique_id: Some(unique_id),
        }
    }

    /// Legacy-format frame without a unique id.
    pub fn legacy(identifier: Identifier, pulse_count: u16) -> Self {
        Self {
            identifier,
            pulse_count,
            unique_id: None,
        }
    }

    pub fn identifier(&self) -> Identifier {
        self.identifier
    }

    pub fn pulse_count(&self) -> u16 {
        self.pulse_count
    }

    pub fn unique_id(&self) -> Option<UniqueId> {
        self.unique_id
    }

    pub fn format(&self) -> FrameFormat {
        match self.unique_id {
            Some(_) => FrameFormat::Current,
            None => FrameFormat::Legacy,
        }
    }

    /// Size of this frame on the wire, header included.
    pub fn wire_len(&self) -> usize {
        HEADER_LENGTH + self.format().payload_length()
    }

    /// Append the wire bytes of this frame to `dst`.
    pub fn encode_into(&self, dst: &mut BytesMut) {
        dst.reserve(self.wire_len());
        dst.put_slice(&SYNC_BYTES);

        match self.unique_id {
            Some(id) => {
                dst.put_u16_le(CURRENT_PAYLOAD_LENGTH as u16);
                dst.put_u8(self.identifier.to_u8());
                dst.put_bytes(0, 3);
                dst.put_u16_le(self.pulse_count);
                dst.put_slice(id.as_bytes());
            }
            None => {
                dst.put_u16_le(LEGACY_PAYLOAD_LENGTH as u16);
                dst.put_u8(self.identifier.to_u8());
                dst.put_bytes(0, 3);
                dst.put_u16_le(self.pulse_count);
            }
        }
    }

    /// Wire bytes of this frame.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = BytesMut::with_capacity(self.wire_len());
        self.encode_into(&mut buf);
        buf.to_vec()
    }
}

/// Wrap an arbitrary payload in a sync header and length field.
///
/// No length validation is applied, which makes this useful for producing
/// malformed frames in tests.
///
/// # Panics
///
/// Panics if `payload` is longer than `u16::MAX` bytes.
///
/// # Example
///
/// ```
/// use pulselink_protocol::frame::wrap_payload;
///
/// assert_eq!(wrap_payload(&[0xAA; 5])[..4], [0x02, 0x02, 0x05, 0x00]);
/// ```
pub fn wrap_payload(payload: &[u8]) -> Vec<u8> {
    let length = u16::try_from(payload.len()).expect("payload longer than a 16-bit length");
    let mut frame = Vec::with_capacity(HEADER_LENGTH + payload.len());
    frame.extend_from_slice(&SYNC_BYTES);
    frame.extend_from_slice(&length.to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_layout() {
        let id = UniqueId::new([0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18, 0x19]);
        let bytes = PulseFrame::current(Identifier::BillAcceptor, 0x0305, id).to_bytes();

        assert_eq!(bytes.len(), 20);
        assert_eq!(&bytes[..4], &[0x02, 0x02, 0x10, 0x00]);
        assert_eq!(bytes[4], 0x01);
        assert_eq!(&bytes[5..8], &[0, 0, 0]);
        assert_eq!(&bytes[8..10], &[0x05, 0x03]);
        assert_eq!(&bytes[10..], id.as_bytes());
    }

    #[test]
    fn test_legacy_layout() {
        let frame = PulseFrame::legacy(Identifier::CardAccepter, 0xBEEF);

        assert_eq!(frame.format(), FrameFormat::Legacy);
        assert_eq!(frame.wire_len(), 10);
        assert_eq!(
            frame.to_bytes(),
            vec![0x02, 0x02, 0x06, 0x00, 0x00, 0x00, 0x00, 0x00, 0xEF, 0xBE]
        );
    }

    #[test]
    fn test_encode_into_appends() {
        let mut buf = BytesMut::from(&[0xFF][..]);
        PulseFrame::legacy(Identifier::CardAccepter, 1).encode_into(&mut buf);

        assert_eq!(buf.len(), 11);
        assert_eq!(buf[0], 0xFF);
        assert_eq!(&buf[1..3], &SYNC_BYTES);
    }

    #[test]
    fn test_wrap_payload() {
        let frame = wrap_payload(&[1, 2, 3]);
        assert_eq!(frame, vec![0x02, 0x02, 0x03, 0x00, 1, 2, 3]);

        let empty = wrap_payload(&[]);
        assert_eq!(empty, vec![0x02, 0x02, 0x00, 0x00]);
    }
}
