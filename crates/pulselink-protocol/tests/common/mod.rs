//! Common test utilities for protocol integration tests.
//!
//! Frame builders and stream helpers shared by the property tests and the
//! codec integration tests.

#![allow(dead_code)]

use pulselink_core::{Identifier, PulseEvent, UniqueId};
use pulselink_protocol::{FrameParser, PulseFrame};

/// Unique id used by fixed-frame tests.
pub const TEST_UNIQUE_ID: [u8; 10] = [0x10, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x18, 0x19];

/// Wire bytes of a current-format frame.
pub fn current_frame(identifier: Identifier, pulse_count: u16, unique_id: [u8; 10]) -> Vec<u8> {
    PulseFrame::current(identifier, pulse_count, UniqueId::new(unique_id)).to_bytes()
}

/// Wire bytes of a legacy frame.
pub fn legacy_frame(identifier: Identifier, pulse_count: u16) -> Vec<u8> {
    PulseFrame::legacy(identifier, pulse_count).to_bytes()
}

/// Split `bytes` at the given cut points (sorted, deduplicated, in-range).
///
/// Every returned chunk is non-empty.
pub fn split_at_points(bytes: &[u8], cuts: &[usize]) -> Vec<Vec<u8>> {
    let mut points: Vec<usize> = cuts
        .iter()
        .copied()
        .filter(|&c| c > 0 && c < bytes.len())
        .collect();
    points.sort_unstable();
    points.dedup();

    let mut chunks = Vec::with_capacity(points.len() + 1);
    let mut start = 0;
    for point in points {
        chunks.push(bytes[start..point].to_vec());
        start = point;
    }
    chunks.push(bytes[start..].to_vec());
    chunks
}

/// Feed every chunk and collect all events in order.
pub fn decode_chunks(chunks: &[Vec<u8>]) -> Vec<PulseEvent> {
    let mut parser = FrameParser::new();
    let mut events = Vec::new();
    for chunk in chunks {
        parser.feed(chunk);
        events.extend(parser.drain_events());
    }
    events
}

/// Assert an event carries the expected wire fields.
pub fn assert_event_fields(
    event: &PulseEvent,
    identifier: Identifier,
    pulse_count: u16,
    unique_id: [u8; 10],
) {
    assert_eq!(event.identifier(), identifier, "identifier mismatch");
    assert_eq!(event.pulse_count(), pulse_count, "pulse count mismatch");
    assert_eq!(
        *event.unique_id().as_bytes(),
        unique_id,
        "unique id mismatch"
    );
}
