//! Tokio codec for pulse-device framing.
//!
//! `PulseCodec` exposes the same decoding rules as [`FrameParser`] through
//! Tokio's codec traits, so an async serial stream can be wrapped in a
//! `FramedRead` and consumed as a `Stream` of [`PulseEvent`]s.
//!
//! # Architecture
//!
//! ```text
//! Serial bytes -> Decoder -> PulseEvent
//! PulseFrame   -> Encoder -> Serial bytes (simulators, tests)
//! ```
//!
//! Both [`FrameParser`] and the codec drive the shared
//! [`decode_frame`] step, so resync and malformed-frame handling are
//! identical on either path.
//!
//! # Usage
//!
//! ```
//! use bytes::BytesMut;
//! use tokio_util::codec::{Decoder, Encoder};
//! use pulselink_core::Identifier;
//! use pulselink_protocol::{PulseCodec, PulseFrame};
//!
//! let mut codec = PulseCodec::new();
//! let mut buf = BytesMut::new();
//! codec.encode(PulseFrame::legacy(Identifier::CardAccepter, 3), &mut buf).unwrap();
//!
//! let event = codec.decode(&mut buf).unwrap().unwrap();
//! assert_eq!(event.pulse_count(), 3);
//! ```
//!
//! [`FrameParser`]: crate::FrameParser

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};
use tracing::debug;

use crate::PulseFrame;
use crate::stream_parser::{Decoded, ParserStats, decode_frame};
use pulselink_core::{Error, PulseEvent, Result};

/// Tokio codec for pulse-device frames.
///
/// Decoding never fails on bad input: garbage is resynchronized and
/// malformed frames are dropped, exactly as [`FrameParser`](crate::FrameParser)
/// does. Errors only surface from the underlying I/O.
#[derive(Debug, Default)]
pub struct PulseCodec {
    stats: ParserStats,
}

impl PulseCodec {
    /// Create a new codec.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters since creation.
    pub fn stats(&self) -> ParserStats {
        self.stats
    }
}

impl Decoder for PulseCodec {
    type Item = PulseEvent;
    type Error = Error;

    /// Decode the next event from `src`.
    ///
    /// Consumes resync bytes and malformed frames until a well-formed frame
    /// is decoded or no further progress is possible.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        while let Some(decoded) = decode_frame(src) {
            self.stats.record(&decoded);
            if let Decoded::Event(event) = decoded {
                return Ok(Some(event));
            }
        }

        Ok(None)
    }

    /// Decode at end of stream.
    ///
    /// A trailing partial frame is discarded rather than reported as an
    /// error; the device may be unplugged mid-frame.
    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Self::Item>> {
        match self.decode(buf)? {
            Some(event) => Ok(Some(event)),
            None => {
                if !buf.is_empty() {
                    debug!(
                        remaining = buf.len(),
                        "Discarding partial frame at end of stream"
                    );
                    buf.clear();
                }
                Ok(None)
            }
        }
    }
}

impl Encoder<PulseFrame> for PulseCodec {
    type Error = Error;

    fn encode(&mut self, item: PulseFrame, dst: &mut BytesMut) -> Result<()> {
        item.encode_into(dst);
        Ok(())
    }
}
