use serde_json::Value;

use crate::error::StreamError;
use crate::models::{EventPayload, NormalizedEvent, StreamChunk};

/// Item id given to text coming from the legacy `{chunk}` shape.
pub const LEGACY_ITEM_ID: &str = "legacy-message";

/// Sentinel some backends send after the last event.
const DONE_MARKER: &str = "[DONE]";

/// One decoded frame, ready to hand to the consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub chunk: StreamChunk,
    /// Whether the stream ends after this chunk
    pub is_terminal: bool,
}

impl DecodedFrame {
    fn event(event: NormalizedEvent) -> Self {
        let is_terminal = event.is_terminal;
        Self {
            chunk: StreamChunk::event(event),
            is_terminal,
        }
    }

    fn error(err: StreamError, conversation_id: Option<String>) -> Self {
        Self {
            chunk: err.into_chunk(conversation_id),
            is_terminal: true,
        }
    }
}

// ==================================================================================================
// Frame parsing
// ==================================================================================================

/// Extract the data payload of a frame.
///
/// Multiple `data:` lines are joined with `\n`. Comments (`:`), `event:`, `id:` and `retry:`
/// lines are ignored. Returns `None` when the frame has no data line at all.
pub fn extract_data(frame: &str) -> Option<String> {
    let mut data: Option<String> = None;

    for line in frame.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        let Some(value) = line.strip_prefix("data:") else {
            continue;
        };
        let value = value.strip_prefix(' ').unwrap_or(value);

        match data {
            Some(ref mut buf) => {
                buf.push('\n');
                buf.push_str(value);
            }
            None => data = Some(value.to_string()),
        }
    }

    data
}

/// Decode one frame into a chunk.
///
/// Returns `None` for frames that carry nothing: blank frames, frames without a `data:`
/// line, empty payloads and the `[DONE]` sentinel. A payload that is not JSON yields a
/// terminal error chunk; there is no attempt to recover the rest of the frame.
pub fn decode_frame(frame: &str) -> Option<DecodedFrame> {
    if frame.trim().is_empty() {
        return None;
    }

    let data = extract_data(frame)?;
    let data = data.trim();
    if data.is_empty() || data == DONE_MARKER {
        return None;
    }

    let value = match serde_json::from_str::<Value>(data) {
        Ok(value) => value,
        Err(e) => {
            tracing::warn!(
                "Failed to parse frame payload: {} - {}",
                e,
                &data[..floor_char_boundary(data, 100)]
            );
            return Some(DecodedFrame::error(
                StreamError::FrameParse(e.to_string()),
                None,
            ));
        }
    };

    Some(normalize_payload(value))
}

// ==================================================================================================
// Shape normalization
// ==================================================================================================

/// Map a parsed payload onto the current schema.
///
/// This is the only place that knows about the legacy wire shapes. In order:
/// 1. `{kind, ...}`: current schema, terminal iff `is_terminal`
/// 2. `{error: string, conversation_id?}`: legacy error, always terminal
/// 3. `{chunk: string, conversation_id?, is_complete?}`: legacy text, becomes `message.delta`
/// 4. anything else: unknown shape error, always terminal
pub fn normalize_payload(value: Value) -> DecodedFrame {
    let conversation_id = value
        .get("conversation_id")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    if value.get("kind").is_some() {
        return match NormalizedEvent::from_value(&value) {
            Ok(event) => match event.payload {
                EventPayload::Error { message } => {
                    tracing::warn!("Stream reported error: {}", message);
                    DecodedFrame::error(StreamError::Upstream(message), event.conversation_id)
                }
                _ => {
                    tracing::trace!("Decoded {} event", event.kind());
                    DecodedFrame::event(event)
                }
            },
            Err(e) => {
                tracing::warn!("Malformed stream event: {}", e);
                DecodedFrame::error(StreamError::MalformedEvent(e.to_string()), conversation_id)
            }
        };
    }

    if let Some(message) = value.get("error").and_then(|v| v.as_str()) {
        tracing::warn!("Stream reported legacy error: {}", message);
        return DecodedFrame::error(StreamError::Upstream(message.to_string()), conversation_id);
    }

    if let Some(chunk) = value.get("chunk") {
        let delta = match chunk {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        };
        let is_complete = value
            .get("is_complete")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let mut event = NormalizedEvent::new(EventPayload::MessageDelta {
            item_id: LEGACY_ITEM_ID.to_string(),
            output_index: 0,
            content_index: 0,
            delta,
        })
        .terminal(is_complete);
        event.conversation_id = conversation_id;

        return DecodedFrame::event(event);
    }

    tracing::warn!("Unknown stream payload shape: {}", value);
    DecodedFrame::error(StreamError::UnknownShape, conversation_id)
}

/// Largest char boundary not after `max`, for truncating log output.
fn floor_char_boundary(s: &str, max: usize) -> usize {
    if max >= s.len() {
        return s.len();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    end
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ScopeType;

    fn expect_event(frame: &str) -> (NormalizedEvent, bool) {
        let decoded = decode_frame(frame).expect("frame should decode");
        match decoded.chunk {
            StreamChunk::Event { event } => (event, decoded.is_terminal),
            other => panic!("expected event, got {:?}", other),
        }
    }

    fn expect_error(frame: &str) -> (String, Option<String>) {
        let decoded = decode_frame(frame).expect("frame should decode");
        assert!(decoded.is_terminal);
        match decoded.chunk {
            StreamChunk::Error {
                payload,
                conversation_id,
            } => (payload, conversation_id),
            other => panic!("expected error, got {:?}", other),
        }
    }

    #[test]
    fn test_skips_blank_and_unprefixed_frames() {
        assert!(decode_frame("").is_none());
        assert!(decode_frame("   \n").is_none());
        assert!(decode_frame(": keep-alive").is_none());
        assert!(decode_frame("event: ping").is_none());
        assert!(decode_frame("{\"kind\":\"final\"}").is_none());
        assert!(decode_frame("data:").is_none());
        assert!(decode_frame("data: [DONE]").is_none());
    }

    #[test]
    fn test_extract_data_joins_lines() {
        let frame = "event: message\r\ndata: {\"a\":\r\ndata: 1}\r\n: comment";
        assert_eq!(extract_data(frame), Some("{\"a\":\n1}".to_string()));
    }

    #[test]
    fn test_current_schema_event() {
        let (event, terminal) = expect_event(
            r#"data: {"kind":"message.delta","item_id":"a","output_index":0,"content_index":0,"delta":"Hel"}"#,
        );
        assert!(!terminal);
        assert_eq!(event.kind(), "message.delta");
    }

    #[test]
    fn test_current_schema_terminal_flag() {
        let (event, terminal) =
            expect_event(r#"data: {"kind":"final","is_terminal":true,"conversation_id":"c1"}"#);
        assert!(terminal);
        assert_eq!(event.conversation_id.as_deref(), Some("c1"));
    }

    #[test]
    fn test_scoped_event() {
        let (event, _) = expect_event(
            r#"data: {"kind":"output_item.added","item_id":"a","output_index":0,"scope":{"type":"tool_call","tool_call_id":"call-1"}}"#,
        );
        assert_eq!(event.scope.unwrap().scope_type, ScopeType::ToolCall);
    }

    #[test]
    fn test_invalid_json_is_terminal_error() {
        let (payload, _) = expect_error("data: {not json");
        assert!(payload.starts_with("failed to parse stream frame:"));
    }

    #[test]
    fn test_legacy_error_shape() {
        let (payload, conversation_id) =
            expect_error(r#"data: {"error":"quota exceeded","conversation_id":"c7"}"#);
        assert_eq!(payload, "quota exceeded");
        assert_eq!(conversation_id.as_deref(), Some("c7"));
    }

    #[test]
    fn test_current_schema_error_kind() {
        let (payload, conversation_id) =
            expect_error(r#"data: {"kind":"error","message":"agent crashed","conversation_id":"c2"}"#);
        assert_eq!(payload, "agent crashed");
        assert_eq!(conversation_id.as_deref(), Some("c2"));
    }

    #[test]
    fn test_legacy_chunk_shape() {
        let (event, terminal) =
            expect_event(r#"data: {"chunk":"hi","conversation_id":"c3","is_complete":false}"#);
        assert!(!terminal);
        assert_eq!(event.conversation_id.as_deref(), Some("c3"));
        assert_eq!(
            event.payload,
            EventPayload::MessageDelta {
                item_id: LEGACY_ITEM_ID.to_string(),
                output_index: 0,
                content_index: 0,
                delta: "hi".to_string(),
            }
        );
    }

    #[test]
    fn test_legacy_chunk_complete_is_terminal() {
        let (_, terminal) = expect_event(r#"data: {"chunk":"","is_complete":true}"#);
        assert!(terminal);
    }

    #[test]
    fn test_kind_takes_precedence_over_legacy_fields() {
        let (event, _) = expect_event(r#"data: {"kind":"lifecycle","status":"started","error":"x"}"#);
        assert_eq!(event.kind(), "lifecycle");
    }

    #[test]
    fn test_non_string_error_is_unknown_shape() {
        let (payload, _) = expect_error(r#"data: {"error":{"code":5}}"#);
        assert_eq!(payload, "unknown stream payload shape");
    }

    #[test]
    fn test_unknown_shape() {
        let (payload, _) = expect_error(r#"data: {"foo":"bar"}"#);
        assert_eq!(payload, "unknown stream payload shape");

        let (payload, _) = expect_error("data: [1,2,3]");
        assert_eq!(payload, "unknown stream payload shape");
    }

    #[test]
    fn test_malformed_known_kind() {
        let (payload, _) = expect_error(r#"data: {"kind":"message.delta","delta":"x"}"#);
        assert!(payload.starts_with("malformed stream event:"));
    }

    #[test]
    fn test_unknown_kind_is_forwarded() {
        let (event, terminal) = expect_event(r#"data: {"kind":"reasoning.delta","delta":"x"}"#);
        assert!(!terminal);
        assert_eq!(
            event.payload,
            EventPayload::Unknown {
                kind: "reasoning.delta".to_string()
            }
        );
    }

    #[test]
    fn test_floor_char_boundary() {
        assert_eq!(floor_char_boundary("abc", 10), 3);
        assert_eq!(floor_char_boundary("aé", 2), 1);
    }
}
