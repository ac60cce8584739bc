//! Stream parser for pulse-device frames.
//!
//! This module turns an arbitrarily fragmented serial byte stream into
//! [`PulseEvent`]s. Bytes accumulate in an internal buffer; complete frames
//! are decoded and queued, incomplete ones stay buffered until the next
//! [`FrameParser::feed`] call.
//!
//! # Protocol Framing
//!
//! Every frame starts with two sync bytes and a little-endian length:
//!
//! ```text
//! 0x02 0x02 <len lo> <len hi> <payload: len bytes>
//! ```
//!
//! Only payload lengths 6 (legacy) and 16 (current) are accepted. The link
//! has no checksum, so the parser never guesses at unknown layouts.
//!
//! # Usage
//!
//! ```
//! use pulselink_protocol::FrameParser;
//!
//! let mut parser = FrameParser::new();
//!
//! // Legacy frame split across two reads
//! parser.feed(&[0x02, 0x02, 0x06, 0x00, 0x01]);
//! parser.feed(&[0x00, 0x00, 0x00, 0x2A, 0x00]);
//!
//! let event = parser.next_event().unwrap();
//! assert_eq!(event.pulse_count(), 42);
//! assert!(event.unique_id().is_zero());
//! ```
//!
//! # Resynchronization
//!
//! When the buffer does not start with `0x02 0x02`, exactly one byte is
//! dropped and the header check is retried. This recovers from any single
//! corrupt byte at the cost of rescanning misaligned input, which is fine at
//! the link's event rate. A well-formed header with an unknown length is
//! logged and its declared frame is discarded as a unit, so one bad length
//! field cannot stall the stream.

use bytes::{Bytes, BytesMut};
use chrono::Utc;
use pulselink_core::constants::{
    HEADER_LENGTH, IDENTIFIER_OFFSET, LENGTH_OFFSET, PULSE_COUNT_OFFSET, SYNC_BYTES,
    UNIQUE_ID_LENGTH, UNIQUE_ID_OFFSET,
};
use pulselink_core::{FrameFormat, Identifier, PulseEvent, UniqueId};
use std::collections::VecDeque;
use tracing::{trace, warn};

/// Initial buffer capacity for incoming serial data.
///
/// Serial reads are small; this holds several frames without reallocating.
const INITIAL_BUFFER_CAPACITY: usize = 256;

/// Recommended initial capacity for the decoded event queue.
const INITIAL_EVENT_QUEUE_CAPACITY: usize = 4;

/// Outcome of a single decode step over the buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decoded {
    /// A complete, well-formed frame was consumed.
    Event(PulseEvent),

    /// A complete frame with an unsupported payload length was consumed
    /// and dropped.
    Malformed {
        /// Declared payload length.
        payload_length: usize,
        /// Entire discarded frame, header included.
        raw: Bytes,
    },

    /// One byte was dropped while searching for the sync header.
    Skipped(u8),
}

/// Perform one decode step on `buffer`.
///
/// Returns `None` when no progress is possible: fewer than four bytes are
/// buffered, or the header is valid but the payload has not fully arrived.
/// In that case nothing is consumed. Otherwise exactly one unit is consumed
/// from the front of the buffer: a single resync byte, or a whole frame.
///
/// Malformed frames are logged at `warn` level with their raw bytes.
///
/// # Example
///
/// ```
/// use bytes::BytesMut;
/// use pulselink_protocol::stream_parser::{decode_frame, Decoded};
///
/// let mut buf = BytesMut::from(&[0xFF, 0x02, 0x02, 0x06][..]);
/// assert_eq!(decode_frame(&mut buf), Some(Decoded::Skipped(0xFF)));
/// // Header found, payload still missing
/// assert_eq!(decode_frame(&mut buf), None);
/// assert_eq!(buf.len(), 3);
/// ```
pub fn decode_frame(buffer: &mut BytesMut) -> Option<Decoded> {
    if buffer.len() < HEADER_LENGTH {
        return None;
    }

    if buffer[..LENGTH_OFFSET] != SYNC_BYTES {
        let skipped = buffer.split_to(1)[0];
        trace!(byte = skipped, "Discarding byte while resynchronizing");
        return Some(Decoded::Skipped(skipped));
    }

    let payload_length =
        u16::from_le_bytes([buffer[LENGTH_OFFSET], buffer[LENGTH_OFFSET + 1]]) as usize;
    let total_length = HEADER_LENGTH + payload_length;

    if buffer.len() < total_length {
        return None;
    }

    let frame = buffer.split_to(total_length).freeze();

    match FrameFormat::from_payload_length(payload_length) {
        Some(format) => {
            let event = decode_payload(format, &frame[HEADER_LENGTH..]);
            trace!(
                identifier = %event.identifier(),
                pulse_count = event.pulse_count(),
                format = ?format,
                "Decoded pulse frame"
            );
            Some(Decoded::Event(event))
        }
        None => {
            warn!(
                payload_length,
                raw = %hex::encode_upper(&frame),
                "Discarding frame with unsupported payload length"
            );
            Some(Decoded::Malformed {
                payload_length,
                raw: frame,
            })
        }
    }
}

/// Decode a payload whose length already matched `format`.
fn decode_payload(format: FrameFormat, payload: &[u8]) -> PulseEvent {
    let identifier = Identifier::from_wire(payload[IDENTIFIER_OFFSET]);
    let pulse_count =
        u16::from_le_bytes([payload[PULSE_COUNT_OFFSET], payload[PULSE_COUNT_OFFSET + 1]]);
    let timestamp = Utc::now();

    match format {
        FrameFormat::Legacy => PulseEvent::legacy(identifier, pulse_count, timestamp),
        FrameFormat::Current => {
            let mut id = [0u8; UNIQUE_ID_LENGTH];
            id.copy_from_slice(&payload[UNIQUE_ID_OFFSET..UNIQUE_ID_OFFSET + UNIQUE_ID_LENGTH]);
            PulseEvent::new(identifier, pulse_count, UniqueId::new(id), timestamp)
        }
    }
}

/// Where the parser stands between `feed` calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParserState {
    /// Nothing buffered.
    Idle,

    /// Fewer than four bytes buffered; the header is not yet complete.
    AwaitingHeader,

    /// A valid header is buffered and `missing` payload bytes are still due.
    AwaitingPayload { missing: usize },
}

/// Counters describing what the parser has seen since creation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParserStats {
    /// Well-formed frames decoded (legacy and current).
    pub frames_decoded: u64,

    /// Subset of `frames_decoded` that used the legacy format.
    pub legacy_frames: u64,

    /// Frames dropped for an unsupported payload length.
    pub malformed_frames: u64,

    /// Bytes dropped while searching for a sync header.
    pub resync_bytes: u64,
}

impl ParserStats {
    /// Count one decode step.
    pub fn record(&mut self, decoded: &Decoded) {
        match decoded {
            Decoded::Event(event) => {
                self.frames_decoded += 1;
                if event.is_legacy() {
                    self.legacy_frames += 1;
                }
            }
            Decoded::Malformed { .. } => self.malformed_frames += 1,
            Decoded::Skipped(_) => self.resync_bytes += 1,
        }
    }
}

/// Stateful stream parser for pulse-device frames.
///
/// `FrameParser` is owned by exactly one reader; it does no locking.
///
/// # Example
///
/// ```
/// use pulselink_core::Identifier;
/// use pulselink_protocol::{FrameParser, PulseFrame};
///
/// let mut parser = FrameParser::new();
/// let bytes = PulseFrame::current(Identifier::BillAcceptor, 7, [0xAB; 10].into()).to_bytes();
///
/// // Byte-by-byte delivery still yields exactly one event
/// for b in &bytes {
///     parser.feed(std::slice::from_ref(b));
/// }
///
/// assert_eq!(parser.events_available(), 1);
/// ```
#[derive(Debug)]
pub struct FrameParser {
    /// Unconsumed bytes.
    buffer: BytesMut,

    /// Decoded events waiting to be taken.
    events: VecDeque<PulseEvent>,

    stats: ParserStats,
}

impl FrameParser {
    /// Create a new parser with preallocated buffers.
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            events: VecDeque::with_capacity(INITIAL_EVENT_QUEUE_CAPACITY),
            stats: ParserStats::default(),
        }
    }

    /// Feed bytes from the serial stream into the parser.
    ///
    /// Appends `bytes` to the buffer and decodes every frame that is now
    /// complete. Several events may become available from a single call.
    ///
    /// # Example
    ///
    /// ```
    /// use pulselink_protocol::FrameParser;
    ///
    /// let mut parser = FrameParser::new();
    /// parser.feed(&[0x02, 0x02, 0x06, 0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x00]);
    ///
    /// assert_eq!(parser.events_available(), 1);
    /// ```
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);

        while let Some(decoded) = decode_frame(&mut self.buffer) {
            self.stats.record(&decoded);
            if let Decoded::Event(event) = decoded {
                self.events.push_back(event);
            }
        }
    }

    /// Take the next decoded event, oldest first.
    pub fn next_event(&mut self) -> Option<PulseEvent> {
        self.events.pop_front()
    }

    /// Number of decoded events waiting to be taken.
    pub fn events_available(&self) -> usize {
        self.events.len()
    }

    /// Number of bytes buffered but not yet consumed.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Current position in the framing.
    ///
    /// # Example
    ///
    /// ```
    /// use pulselink_protocol::{FrameParser, ParserState};
    ///
    /// let mut parser = FrameParser::new();
    /// assert_eq!(parser.state(), ParserState::Idle);
    ///
    /// parser.feed(&[0x02, 0x02, 0x10, 0x00, 0x01]);
    /// assert_eq!(parser.state(), ParserState::AwaitingPayload { missing: 15 });
    /// ```
    pub fn state(&self) -> ParserState {
        if self.buffer.is_empty() {
            return ParserState::Idle;
        }
        if self.buffer.len() < HEADER_LENGTH {
            return ParserState::AwaitingHeader;
        }

        // After `feed` the buffer always starts on a valid header here.
        let payload_length =
            u16::from_le_bytes([self.buffer[LENGTH_OFFSET], self.buffer[LENGTH_OFFSET + 1]])
                as usize;
        let missing = (HEADER_LENGTH + payload_length).saturating_sub(self.buffer.len());
        ParserState::AwaitingPayload { missing }
    }

    /// Counters since creation. Not reset by [`clear`](Self::clear).
    pub fn stats(&self) -> ParserStats {
        self.stats
    }

    /// Discard buffered bytes and queued events.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.events.clear();
    }

    /// Iterator draining every currently decoded event.
    ///
    /// Does not decode more data; call [`feed`](Self::feed) first.
    ///
    /// # Example
    ///
    /// ```
    /// use pulselink_core::Identifier;
    /// use pulselink_protocol::{FrameParser, PulseFrame};
    ///
    /// let mut parser = FrameParser::new();
    /// parser.feed(&PulseFrame::legacy(Identifier::CardAccepter, 1).to_bytes());
    /// parser.feed(&PulseFrame::legacy(Identifier::CardAccepter, 2).to_bytes());
    ///
    /// let counts: Vec<u16> = parser.drain_events().map(|e| e.pulse_count()).collect();
    /// assert_eq!(counts, vec![1, 2]);
    /// ```
    pub fn drain_events(&mut self) -> DrainEvents<'_> {
        DrainEvents { parser: self }
    }
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator that drains events from a [`FrameParser`].
///
/// Created by [`FrameParser::drain_events`].
pub struct DrainEvents<'a> {
    parser: &'a mut FrameParser,
}

impl<'a> Iterator for DrainEvents<'a> {
    type Item = PulseEvent;

    fn next(&mut self) -> Option<Self::Item> {
        self.parser.next_event()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.parser.events_available();
        (len, Some(len))
    }
}

impl<'a> ExactSizeIterator for DrainEvents<'a> {
    fn len(&self) -> usize {
        self.parser.events_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PulseFrame;

    const UID: [u8; 10] = [0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18, 0x19];

    /// Test helper: the 20-byte current-format frame used across tests.
    ///
    /// Identifier 1 (bill acceptor), padding `AA BB CC`, count 0x0305.
    fn current_frame() -> Vec<u8> {
        let mut frame = vec![0x02, 0x02, 0x10, 0x00, 0x01, 0xAA, 0xBB, 0xCC, 0x05, 0x03];
        frame.extend_from_slice(&UID);
        frame
    }

    /// Test helper: a legacy frame for `count` from the card accepter.
    fn legacy_frame(count: u16) -> Vec<u8> {
        let [lo, hi] = count.to_le_bytes();
        vec![0x02, 0x02, 0x06, 0x00, 0x00, 0x00, 0x00, 0x00, lo, hi]
    }

    fn assert_current_event(event: &PulseEvent) {
        assert_eq!(event.identifier(), Identifier::BillAcceptor);
        assert_eq!(event.pulse_count(), 0x0305);
        assert_eq!(*event.unique_id().as_bytes(), UID);
        assert_eq!(event.format(), FrameFormat::Current);
    }

    #[test]
    fn test_new_parser() {
        let parser = FrameParser::new();
        assert_eq!(parser.state(), ParserState::Idle);
        assert_eq!(parser.events_available(), 0);
        assert_eq!(parser.buffered_len(), 0);
        assert_eq!(parser.stats(), ParserStats::default());
    }

    #[test]
    fn test_current_frame_single_feed() {
        let mut parser = FrameParser::new();

        parser.feed(&current_frame());

        assert_eq!(parser.events_available(), 1);
        assert_eq!(parser.buffered_len(), 0);

        let event = parser.next_event().unwrap();
        assert_current_event(&event);
        assert!(parser.next_event().is_none());
    }

    #[test]
    fn test_current_frame_in_three_parts() {
        let mut parser = FrameParser::new();
        let frame = current_frame();

        parser.feed(&frame[..3]);
        assert!(parser.next_event().is_none());
        assert_eq!(parser.state(), ParserState::AwaitingHeader);

        parser.feed(&frame[3..11]);
        assert!(parser.next_event().is_none());
        assert_eq!(parser.state(), ParserState::AwaitingPayload { missing: 9 });

        parser.feed(&frame[11..]);
        assert_eq!(parser.events_available(), 1);
        assert_current_event(&parser.next_event().unwrap());
        assert_eq!(parser.state(), ParserState::Idle);
    }

    #[test]
    fn test_byte_by_byte_feeding() {
        let mut parser = FrameParser::new();
        let frame = current_frame();

        for (i, &byte) in frame.iter().enumerate() {
            parser.feed(&[byte]);
            if i + 1 < frame.len() {
                assert_eq!(parser.events_available(), 0, "event after byte {i}");
            }
        }

        assert_eq!(parser.events_available(), 1);
        assert_current_event(&parser.next_event().unwrap());
    }

    #[test]
    fn test_legacy_frame_zero_unique_id() {
        let mut parser = FrameParser::new();

        parser.feed(&legacy_frame(0x1234));

        let event = parser.next_event().unwrap();
        assert_eq!(event.identifier(), Identifier::CardAccepter);
        assert_eq!(event.pulse_count(), 0x1234);
        assert_eq!(*event.unique_id().as_bytes(), [0u8; 10]);
        assert!(event.is_legacy());
        assert_eq!(parser.stats().legacy_frames, 1);
    }

    #[test]
    fn test_legacy_count_from_final_bytes() {
        let mut parser = FrameParser::new();

        // Bytes 1..4 of the payload are ignored
        parser.feed(&[0x02, 0x02, 0x06, 0x00, 0x01, 0xFF, 0xFF, 0xFF, 0x09, 0x00]);

        let event = parser.next_event().unwrap();
        assert_eq!(event.identifier(), Identifier::BillAcceptor);
        assert_eq!(event.pulse_count(), 9);
    }

    #[test]
    fn test_malformed_length_consumes_declared_frame() {
        let mut parser = FrameParser::new();

        parser.feed(&[0x02, 0x02, 0x05, 0x00, 0x01, 0x02, 0x03, 0x04, 0x05]);

        assert_eq!(parser.events_available(), 0);
        assert_eq!(parser.buffered_len(), 0);
        assert_eq!(parser.stats().malformed_frames, 1);

        // A later well-formed frame is unaffected
        parser.feed(&current_frame());
        assert_eq!(parser.events_available(), 1);
        assert_current_event(&parser.next_event().unwrap());
    }

    #[test]
    fn test_malformed_length_waits_for_full_frame() {
        let mut parser = FrameParser::new();

        // Declares 5 bytes, only 2 present: nothing consumed yet
        parser.feed(&[0x02, 0x02, 0x05, 0x00, 0xEE, 0xEE]);
        assert_eq!(parser.buffered_len(), 6);
        assert_eq!(parser.stats().malformed_frames, 0);

        parser.feed(&[0xEE, 0xEE, 0xEE]);
        assert_eq!(parser.buffered_len(), 0);
        assert_eq!(parser.stats().malformed_frames, 1);
    }

    #[test]
    fn test_zero_length_frame_is_malformed() {
        let mut parser = FrameParser::new();

        parser.feed(&[0x02, 0x02, 0x00, 0x00]);
        parser.feed(&legacy_frame(3));

        assert_eq!(parser.stats().malformed_frames, 1);
        assert_eq!(parser.next_event().unwrap().pulse_count(), 3);
    }

    #[test]
    fn test_garbage_before_header() {
        for garbage in [&[0xFF][..], &[0x00, 0x13], &[0x7E, 0x02, 0x55]] {
            let mut parser = FrameParser::new();

            let mut data = garbage.to_vec();
            data.extend_from_slice(&current_frame());
            parser.feed(&data);

            assert_eq!(parser.events_available(), 1, "garbage {garbage:02X?}");
            assert_current_event(&parser.next_event().unwrap());
            assert_eq!(parser.stats().resync_bytes, garbage.len() as u64);
        }
    }

    #[test]
    fn test_single_sync_byte_then_header() {
        let mut parser = FrameParser::new();

        // A lone 0x02 before the real header shifts alignment by one
        let mut data = vec![0x02];
        data.extend_from_slice(&legacy_frame(5));
        parser.feed(&data);

        // 02 02 02 06: header matches at offset 0 with length 0x0602,
        // which waits for more bytes rather than decoding
        assert_eq!(parser.events_available(), 0);
        assert!(matches!(parser.state(), ParserState::AwaitingPayload { .. }));
    }

    #[test]
    fn test_multiple_frames_in_single_feed() {
        let mut parser = FrameParser::new();

        let mut data = legacy_frame(1);
        data.extend_from_slice(&current_frame());
        data.extend_from_slice(&legacy_frame(2));
        parser.feed(&data);

        assert_eq!(parser.events_available(), 3);
        let counts: Vec<u16> = parser.drain_events().map(|e| e.pulse_count()).collect();
        assert_eq!(counts, vec![1, 0x0305, 2]);
    }

    #[test]
    fn test_complete_and_partial() {
        let mut parser = FrameParser::new();

        let mut data = legacy_frame(10);
        data.extend_from_slice(&legacy_frame(11)[..4]);
        parser.feed(&data);

        assert_eq!(parser.events_available(), 1);
        assert_eq!(parser.state(), ParserState::AwaitingPayload { missing: 6 });

        parser.feed(&legacy_frame(11)[4..]);
        let counts: Vec<u16> = parser.drain_events().map(|e| e.pulse_count()).collect();
        assert_eq!(counts, vec![10, 11]);
    }

    #[test]
    fn test_fewer_than_header_bytes_untouched() {
        let mut parser = FrameParser::new();

        // Not a header, but only three bytes: wait rather than resync
        parser.feed(&[0xFF, 0xFF, 0xFF]);
        assert_eq!(parser.buffered_len(), 3);
        assert_eq!(parser.stats().resync_bytes, 0);
    }

    #[test]
    fn test_event_does_not_alias_buffer() {
        let mut parser = FrameParser::new();

        parser.feed(&current_frame());
        let event = parser.next_event().unwrap();

        parser.clear();
        parser.feed(&[0xFF; 64]);

        assert_eq!(*event.unique_id().as_bytes(), UID);
    }

    #[test]
    fn test_clear_resets_buffer_but_keeps_stats() {
        let mut parser = FrameParser::new();

        parser.feed(&legacy_frame(1));
        parser.feed(&[0x02, 0x02, 0x10]);
        parser.clear();

        assert_eq!(parser.state(), ParserState::Idle);
        assert_eq!(parser.events_available(), 0);
        assert_eq!(parser.stats().frames_decoded, 1);

        parser.feed(&legacy_frame(2));
        assert_eq!(parser.events_available(), 1);
    }

    #[test]
    fn test_frame_builder_agrees_with_literal() {
        let built = PulseFrame::current(Identifier::BillAcceptor, 0x0305, UniqueId::new(UID));
        let mut parser = FrameParser::new();
        parser.feed(&built.to_bytes());

        let event = parser.next_event().unwrap();
        assert_eq!(event.identifier(), Identifier::BillAcceptor);
        assert_eq!(event.pulse_count(), 0x0305);
        assert_eq!(event.unique_id(), UniqueId::new(UID));
    }

    #[test]
    fn test_decode_frame_steps() {
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&[0x33]);
        buf.extend_from_slice(&legacy_frame(4));

        assert_eq!(decode_frame(&mut buf), Some(Decoded::Skipped(0x33)));
        assert!(matches!(decode_frame(&mut buf), Some(Decoded::Event(e)) if e.pulse_count() == 4));
        assert_eq!(decode_frame(&mut buf), None);
    }

    #[test]
    fn test_decode_frame_malformed_raw() {
        let raw = [0x02, 0x02, 0x01, 0x00, 0x7F];
        let mut buf = BytesMut::from(&raw[..]);

        match decode_frame(&mut buf) {
            Some(Decoded::Malformed {
                payload_length,
                raw: dropped,
            }) => {
                assert_eq!(payload_length, 1);
                assert_eq!(&dropped[..], &raw[..]);
            }
            other => panic!("unexpected decode result: {other:?}"),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn test_drain_events_size_hint() {
        let mut parser = FrameParser::new();
        for count in 0..3 {
            parser.feed(&legacy_frame(count));
        }

        let mut iter = parser.drain_events();
        assert_eq!(iter.size_hint(), (3, Some(3)));
        let _ = iter.next();
        assert_eq!(iter.len(), 2);
        let _ = iter.next();
        let _ = iter.next();
        assert_eq!(iter.len(), 0);
        assert!(iter.next().is_none());
    }

    #[test]
    fn test_drain_events_empty() {
        let mut parser = FrameParser::new();
        assert_eq!(parser.drain_events().count(), 0);
    }
}
