//! Stream reconstruction pipeline.
//!
//! Bytes flow through [`FrameReader`] (framing) and [`decode_frame`] (normalization) into
//! chunks; event chunks are folded by a [`StreamAccumulator`] per sub-stream, and a
//! [`SessionMultiplexer`] keeps one accumulator per tool call.

pub mod accumulator;
pub mod citations;
pub mod frame_decoder;
pub mod frame_reader;
pub mod multiplexer;
pub mod text_parts;

pub use accumulator::{ItemView, StreamAccumulator, StreamView};
pub use citations::CitationTracker;
pub use frame_decoder::{decode_frame, DecodedFrame};
pub use frame_reader::{FrameReader, FrameSplitter};
pub use multiplexer::{AgentToolStream, SessionMultiplexer, SessionSnapshot, SnapshotObserver};
pub use text_parts::TextParts;
