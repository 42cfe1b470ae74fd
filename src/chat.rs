use bytes::Bytes;
use futures::stream::{Stream, StreamExt};
use serde::Serialize;
use std::fmt::Display;

use crate::config::Config;
use crate::error::StreamError;
use crate::http_client::{AgentHttpClient, EVENT_STREAM};
use crate::models::{ChatStreamRequest, Citation, EventPayload, ScopeType, StreamChunk};
use crate::streaming::{
    decode_frame, AgentToolStream, FrameReader, SessionMultiplexer, SessionSnapshot,
    StreamAccumulator, StreamView,
};

// ==================================================================================================
// Chat stream driver
// ==================================================================================================

/// Entry point for streaming one chat turn.
///
/// Each call to [`ChatStreamClient::stream_chat`] opens its own connection and owns its own
/// parsing state; nothing is shared between calls.
#[derive(Debug, Clone)]
pub struct ChatStreamClient {
    http: AgentHttpClient,
    surface_read_errors: bool,
}

impl ChatStreamClient {
    pub fn new(http: AgentHttpClient) -> Self {
        Self {
            http,
            surface_read_errors: false,
        }
    }

    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        Ok(Self::new(AgentHttpClient::from_config(config)?)
            .with_surface_read_errors(config.surface_read_errors))
    }

    /// Report byte-stream read failures as a terminal error chunk.
    ///
    /// Off by default: a failed read ends the stream without a chunk.
    pub fn with_surface_read_errors(mut self, surface: bool) -> Self {
        self.surface_read_errors = surface;
        self
    }

    /// Send `request` and stream the reply as chunks.
    ///
    /// Nothing happens until the returned stream is polled. The stream ends after the
    /// first terminal event or error chunk, or when the body ends. Dropping it early
    /// releases the connection.
    pub fn stream_chat(&self, request: ChatStreamRequest) -> impl Stream<Item = StreamChunk> {
        let http = self.http.clone();
        let surface_read_errors = self.surface_read_errors;

        async_stream::stream! {
            let response = match http.send_chat(&request).await {
                Ok(response) => response,
                Err(e) => {
                    yield e.into_chunk(request.conversation_id.clone());
                    return;
                }
            };

            let chunks = chunks_from_response(response, surface_read_errors);
            futures::pin_mut!(chunks);
            while let Some(chunk) = chunks.next().await {
                yield chunk;
            }
        }
    }
}

/// Turn an HTTP response into chunks.
///
/// A non-success status becomes a single error chunk carrying the status and body text,
/// without decoding anything. A success with an empty body becomes a single
/// `MissingBody` error chunk.
pub fn chunks_from_response(
    response: reqwest::Response,
    surface_read_errors: bool,
) -> impl Stream<Item = StreamChunk> {
    async_stream::stream! {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = StreamError::http(status, &body);
            tracing::warn!(status = %status, "Chat stream rejected: {}", err);
            yield err.into_chunk(None);
            return;
        }

        if response.content_length() == Some(0) {
            tracing::warn!(status = %status, "Chat stream response has no body");
            yield StreamError::MissingBody.into_chunk(None);
            return;
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.starts_with(EVENT_STREAM) {
            tracing::debug!("Unexpected content type for chat stream: {:?}", content_type);
        }

        let chunks = chunks_from_bytes(Box::pin(response.bytes_stream()), surface_read_errors);
        futures::pin_mut!(chunks);
        while let Some(chunk) = chunks.next().await {
            yield chunk;
        }
    }
}

/// Run the frame reader and decoder over a raw byte stream.
///
/// Frames are decoded strictly in arrival order. The stream ends at the first terminal
/// chunk; the byte stream is released at that point.
pub fn chunks_from_bytes<S, E>(bytes: S, surface_read_errors: bool) -> impl Stream<Item = StreamChunk>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    async_stream::stream! {
        let mut reader = FrameReader::new(bytes);
        let mut frames = 0usize;

        while let Some(frame) = reader.next_frame().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => {
                    if surface_read_errors {
                        tracing::warn!("Chat stream read failed: {}", e);
                        yield e.into_chunk(None);
                    } else {
                        tracing::warn!("Chat stream read failed, ending stream without error chunk: {}", e);
                    }
                    break;
                }
            };
            frames += 1;

            let Some(decoded) = decode_frame(&frame) else {
                tracing::trace!("Skipping frame without payload");
                continue;
            };

            let is_terminal = decoded.is_terminal;
            yield decoded.chunk;

            if is_terminal {
                tracing::debug!("Terminal chunk after {} frames", frames);
                break;
            }
        }
    }
}

// ==================================================================================================
// Response collection
// ==================================================================================================

/// Everything reconstructed from one chat turn.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ChatResponse {
    /// Consolidated text of the primary assistant message
    pub text: String,
    pub citations: Vec<Citation>,
    pub conversation_id: Option<String>,
    /// A terminal event arrived and no error was reported
    pub is_complete: bool,
    /// Per-tool sub-streams; all are closed once the turn's terminal event arrives
    pub tool_streams: Vec<AgentToolStream>,
    pub agent_streams: Vec<AgentToolStream>,
    pub error: Option<String>,
}

/// Folds chunks into the primary message and the per-tool sub-streams.
///
/// Unscoped and assistant-scoped events build the primary message. Tool-call and agent
/// scoped events go to their own multiplexers.
#[derive(Debug)]
pub struct ChatCollector {
    primary: StreamAccumulator,
    tools: SessionMultiplexer,
    agents: SessionMultiplexer,
    conversation_id: Option<String>,
    saw_terminal: bool,
    error: Option<String>,
}

impl Default for ChatCollector {
    fn default() -> Self {
        Self::new()
    }
}

impl ChatCollector {
    pub fn new() -> Self {
        Self {
            primary: StreamAccumulator::new(),
            tools: SessionMultiplexer::for_tool_calls(),
            agents: SessionMultiplexer::new(ScopeType::Agent),
            conversation_id: None,
            saw_terminal: false,
            error: None,
        }
    }

    /// Observe tool-call snapshots as they change.
    pub fn with_tool_observer<F>(mut self, observer: F) -> Self
    where
        F: FnMut(&SessionSnapshot) + Send + 'static,
    {
        self.tools = self.tools.with_observer(observer);
        self
    }

    pub fn apply(&mut self, chunk: &StreamChunk) {
        match chunk {
            StreamChunk::Event { event } => {
                if let Some(ref id) = event.conversation_id {
                    self.conversation_id = Some(id.clone());
                }

                let scope_type = event.scope.as_ref().map(|s| s.scope_type);
                match scope_type {
                    None | Some(ScopeType::Assistant) => {
                        self.primary.apply(event);
                    }
                    Some(ScopeType::ToolCall) => {
                        self.tools.apply(event);
                    }
                    Some(ScopeType::Agent) => {
                        self.agents.apply(event);
                    }
                }

                // End of turn: close sub-streams that never reported done
                let primary_final = matches!(event.payload, EventPayload::Final { .. })
                    && matches!(scope_type, None | Some(ScopeType::Assistant));
                if event.is_terminal || primary_final {
                    self.tools.complete_all();
                    self.agents.complete_all();
                }

                if event.is_terminal {
                    self.saw_terminal = true;
                }
            }
            StreamChunk::Error {
                payload,
                conversation_id,
            } => {
                if let Some(id) = conversation_id {
                    self.conversation_id = Some(id.clone());
                }
                self.error = Some(payload.clone());
            }
        }
    }

    /// Current view of the primary message.
    pub fn primary(&self) -> StreamView {
        self.primary.build()
    }

    pub fn tools(&self) -> &SessionMultiplexer {
        &self.tools
    }

    pub fn agents(&self) -> &SessionMultiplexer {
        &self.agents
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn finish(self) -> ChatResponse {
        let view = self.primary.build();
        ChatResponse {
            text: view.text,
            citations: view.citations,
            conversation_id: self.conversation_id,
            is_complete: self.saw_terminal && self.error.is_none(),
            tool_streams: self.tools.snapshot().streams,
            agent_streams: self.agents.snapshot().streams,
            error: self.error,
        }
    }
}

/// Drain a chunk stream into a [`ChatResponse`].
pub async fn collect_chat_response<S>(stream: S) -> ChatResponse
where
    S: Stream<Item = StreamChunk>,
{
    futures::pin_mut!(stream);
    let mut collector = ChatCollector::new();
    while let Some(chunk) = stream.next().await {
        collector.apply(&chunk);
    }
    collector.finish()
}
