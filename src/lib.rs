// Agent Stream - Library root

pub mod chat;
pub mod config;
pub mod error;
pub mod http_client;
pub mod models;
pub mod streaming;

pub use chat::{collect_chat_response, ChatCollector, ChatResponse, ChatStreamClient};
pub use error::StreamError;
pub use models::{ChatStreamRequest, NormalizedEvent, StreamChunk};
