// Error handling module
// Defines the stream error taxonomy and its conversion into error chunks

use thiserror::Error;

use crate::models::StreamChunk;

/// Errors that can end a chat stream.
///
/// Every variant is terminal: the stream never resynchronizes after one of these.
#[derive(Error, Debug)]
pub enum StreamError {
    /// Non-success HTTP status
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Success status but nothing to read
    #[error("response has no readable body")]
    MissingBody,

    /// Frame payload is not valid JSON
    #[error("failed to parse stream frame: {0}")]
    FrameParse(String),

    /// Valid JSON that matches none of the recognized shapes
    #[error("unknown stream payload shape")]
    UnknownShape,

    /// A `kind` payload whose fields do not match that kind
    #[error("malformed stream event: {0}")]
    MalformedEvent(String),

    /// Error reported by the backend inside the stream
    #[error("{0}")]
    Upstream(String),

    /// The byte stream failed mid-read
    #[error("stream read failed: {0}")]
    Read(String),

    /// The request could not be sent
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
}

impl StreamError {
    /// Build the error for a non-success response, synthesizing a message for empty bodies.
    pub fn http(status: reqwest::StatusCode, body: &str) -> Self {
        let body = if body.trim().is_empty() {
            status
                .canonical_reason()
                .unwrap_or("request failed with no response body")
                .to_string()
        } else {
            body.to_string()
        };

        StreamError::Http {
            status: status.as_u16(),
            body,
        }
    }

    /// Convert into the consumer-facing error chunk.
    pub fn into_chunk(self, conversation_id: Option<String>) -> StreamChunk {
        StreamChunk::error(self.to_string(), conversation_id)
    }
}
