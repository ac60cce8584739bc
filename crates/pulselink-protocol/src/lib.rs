pub mod codec;
pub mod frame;
pub mod stream_parser;

pub use codec::PulseCodec;
pub use frame::PulseFrame;
pub use stream_parser::{Decoded, DrainEvents, FrameParser, ParserState, ParserStats, decode_frame};
