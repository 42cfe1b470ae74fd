// Data models for the stream wire format and the request contract

pub mod events;
pub mod request;

pub use events::{Citation, EventPayload, EventScope, NormalizedEvent, ScopeType, StreamChunk};
pub use request::{ChatStreamRequest, RunConfig};
