use serde::de::{self, Deserializer};
use serde::ser::{SerializeMap, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ==================================================================================================
// Event scope
// ==================================================================================================

/// Which logical sub-stream an event belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeType {
    Assistant,
    ToolCall,
    Agent,
}

/// Routing metadata attached to an event.
///
/// Events without a scope belong to the primary assistant message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventScope {
    #[serde(rename = "type")]
    pub scope_type: ScopeType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
}

impl EventScope {
    /// Stable key identifying the sub-stream within its scope type.
    ///
    /// Tool-call scopes are keyed by `tool_call_id`, agent scopes by `agent_name`.
    /// The assistant scope has no key: there is only one primary message per turn.
    pub fn stream_key(&self) -> Option<&str> {
        match self.scope_type {
            ScopeType::ToolCall => self.tool_call_id.as_deref(),
            ScopeType::Agent => self.agent_name.as_deref(),
            ScopeType::Assistant => None,
        }
    }
}

// ==================================================================================================
// Citations
// ==================================================================================================

/// Inline citation annotation attached to one output item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Citation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_index: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_index: Option<u32>,
}

// ==================================================================================================
// Normalized events
// ==================================================================================================

/// One event of the current stream schema.
///
/// The envelope fields (`is_terminal`, `conversation_id`, `scope`) are shared by every
/// kind; the kind-specific fields live in [`EventPayload`]. Serializes back to the
/// same flat wire shape, including the original `kind` of unrecognized events.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedEvent {
    pub payload: EventPayload,
    pub is_terminal: bool,
    pub conversation_id: Option<String>,
    pub scope: Option<EventScope>,
}

/// Envelope fields as they appear on the wire.
#[derive(Deserialize)]
struct WireEnvelope {
    #[serde(default)]
    is_terminal: bool,

    #[serde(default)]
    conversation_id: Option<String>,

    #[serde(default)]
    scope: Option<EventScope>,
}

/// Borrowed wire shape of an event with a recognized kind.
#[derive(Serialize)]
struct WireEvent<'a> {
    #[serde(flatten)]
    payload: &'a EventPayload,

    is_terminal: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    conversation_id: Option<&'a str>,

    #[serde(skip_serializing_if = "Option::is_none")]
    scope: Option<&'a EventScope>,
}

/// Kind-specific part of a [`NormalizedEvent`], discriminated by `kind`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum EventPayload {
    #[serde(rename = "lifecycle")]
    Lifecycle {
        status: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        run_id: Option<String>,
    },

    #[serde(rename = "message.delta")]
    MessageDelta {
        item_id: String,
        output_index: u32,
        #[serde(default)]
        content_index: u32,
        delta: String,
    },

    #[serde(rename = "message.done")]
    MessageDone {
        item_id: String,
        output_index: u32,
        #[serde(default)]
        content_index: u32,
        text: String,
    },

    #[serde(rename = "message.citation")]
    MessageCitation {
        item_id: String,
        output_index: u32,
        #[serde(default)]
        content_index: u32,
        citation: Citation,
    },

    #[serde(rename = "refusal.delta")]
    RefusalDelta {
        item_id: String,
        output_index: u32,
        #[serde(default)]
        content_index: u32,
        delta: String,
    },

    #[serde(rename = "refusal.done")]
    RefusalDone {
        item_id: String,
        output_index: u32,
        #[serde(default)]
        content_index: u32,
        refusal: String,
    },

    #[serde(rename = "output_item.added")]
    OutputItemAdded {
        item_id: String,
        output_index: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        item_type: Option<String>,
    },

    #[serde(rename = "output_item.done")]
    OutputItemDone { item_id: String, output_index: u32 },

    #[serde(rename = "final")]
    Final {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        output_text: Option<String>,
    },

    #[serde(rename = "error")]
    Error { message: String },

    /// A `kind` this client does not know yet. Passed through, ignored by accumulators.
    ///
    /// Only built by [`NormalizedEvent::from_value`]; serialized through the envelope.
    #[serde(skip)]
    Unknown { kind: String },
}

impl EventPayload {
    /// Every `kind` this client understands.
    pub const KNOWN_KINDS: &'static [&'static str] = &[
        "lifecycle",
        "message.delta",
        "message.done",
        "message.citation",
        "refusal.delta",
        "refusal.done",
        "output_item.added",
        "output_item.done",
        "final",
        "error",
    ];

    /// Wire name of this kind.
    pub fn kind(&self) -> &str {
        match self {
            EventPayload::Lifecycle { .. } => "lifecycle",
            EventPayload::MessageDelta { .. } => "message.delta",
            EventPayload::MessageDone { .. } => "message.done",
            EventPayload::MessageCitation { .. } => "message.citation",
            EventPayload::RefusalDelta { .. } => "refusal.delta",
            EventPayload::RefusalDone { .. } => "refusal.done",
            EventPayload::OutputItemAdded { .. } => "output_item.added",
            EventPayload::OutputItemDone { .. } => "output_item.done",
            EventPayload::Final { .. } => "final",
            EventPayload::Error { .. } => "error",
            EventPayload::Unknown { kind } => kind.as_str(),
        }
    }

    /// Owning item id and output position, for item-scoped kinds.
    pub fn item_ref(&self) -> Option<(&str, u32)> {
        match self {
            EventPayload::MessageDelta {
                item_id,
                output_index,
                ..
            }
            | EventPayload::MessageDone {
                item_id,
                output_index,
                ..
            }
            | EventPayload::MessageCitation {
                item_id,
                output_index,
                ..
            }
            | EventPayload::RefusalDelta {
                item_id,
                output_index,
                ..
            }
            | EventPayload::RefusalDone {
                item_id,
                output_index,
                ..
            }
            | EventPayload::OutputItemAdded {
                item_id,
                output_index,
                ..
            }
            | EventPayload::OutputItemDone {
                item_id,
                output_index,
            } => Some((item_id.as_str(), *output_index)),
            EventPayload::Lifecycle { .. }
            | EventPayload::Final { .. }
            | EventPayload::Error { .. }
            | EventPayload::Unknown { .. } => None,
        }
    }
}

impl NormalizedEvent {
    /// Build an unscoped, non-terminal event.
    pub fn new(payload: EventPayload) -> Self {
        Self {
            payload,
            is_terminal: false,
            conversation_id: None,
            scope: None,
        }
    }

    pub fn with_scope(mut self, scope: EventScope) -> Self {
        self.scope = Some(scope);
        self
    }

    pub fn terminal(mut self, is_terminal: bool) -> Self {
        self.is_terminal = is_terminal;
        self
    }

    pub fn kind(&self) -> &str {
        self.payload.kind()
    }

    /// Parse one event of the current schema.
    ///
    /// A `kind` outside [`EventPayload::KNOWN_KINDS`] becomes [`EventPayload::Unknown`]
    /// with its envelope intact. A known kind with missing or mistyped fields is an error.
    pub fn from_value(value: &Value) -> Result<Self, serde_json::Error> {
        let envelope = WireEnvelope::deserialize(value)?;

        let payload = match value.get("kind").and_then(Value::as_str) {
            Some(kind) if !EventPayload::KNOWN_KINDS.contains(&kind) => EventPayload::Unknown {
                kind: kind.to_string(),
            },
            _ => EventPayload::deserialize(value)?,
        };

        Ok(Self {
            payload,
            is_terminal: envelope.is_terminal,
            conversation_id: envelope.conversation_id,
            scope: envelope.scope,
        })
    }
}

impl Serialize for NormalizedEvent {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match &self.payload {
            EventPayload::Unknown { kind } => {
                let mut map = serializer.serialize_map(None)?;
                map.serialize_entry("kind", kind)?;
                map.serialize_entry("is_terminal", &self.is_terminal)?;
                if let Some(ref conversation_id) = self.conversation_id {
                    map.serialize_entry("conversation_id", conversation_id)?;
                }
                if let Some(ref scope) = self.scope {
                    map.serialize_entry("scope", scope)?;
                }
                map.end()
            }
            payload => WireEvent {
                payload,
                is_terminal: self.is_terminal,
                conversation_id: self.conversation_id.as_deref(),
                scope: self.scope.as_ref(),
            }
            .serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for NormalizedEvent {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        NormalizedEvent::from_value(&value).map_err(de::Error::custom)
    }
}

// ==================================================================================================
// Consumer-facing chunks
// ==================================================================================================

/// What the chat stream driver hands to its caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamChunk {
    Event {
        event: NormalizedEvent,
    },
    Error {
        payload: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        conversation_id: Option<String>,
    },
}

impl StreamChunk {
    pub fn event(event: NormalizedEvent) -> Self {
        StreamChunk::Event { event }
    }

    pub fn error(payload: impl Into<String>, conversation_id: Option<String>) -> Self {
        StreamChunk::Error {
            payload: payload.into(),
            conversation_id,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, StreamChunk::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_message_delta() {
        let value = json!({
            "kind": "message.delta",
            "item_id": "msg_1",
            "output_index": 0,
            "content_index": 2,
            "delta": "Hel",
            "conversation_id": "conv-9"
        });

        let event: NormalizedEvent = serde_json::from_value(value).unwrap();
        assert_eq!(event.kind(), "message.delta");
        assert!(!event.is_terminal);
        assert_eq!(event.conversation_id.as_deref(), Some("conv-9"));
        assert_eq!(
            event.payload,
            EventPayload::MessageDelta {
                item_id: "msg_1".to_string(),
                output_index: 0,
                content_index: 2,
                delta: "Hel".to_string(),
            }
        );
    }

    #[test]
    fn test_content_index_defaults_to_zero() {
        let value = json!({
            "kind": "refusal.delta",
            "item_id": "msg_1",
            "output_index": 1,
            "delta": "no"
        });

        let event: NormalizedEvent = serde_json::from_value(value).unwrap();
        match event.payload {
            EventPayload::RefusalDelta { content_index, .. } => assert_eq!(content_index, 0),
            other => panic!("unexpected payload: {:?}", other),
        }
    }

    #[test]
    fn test_deserialize_scope() {
        let value = json!({
            "kind": "output_item.added",
            "item_id": "it_1",
            "output_index": 0,
            "scope": {"type": "tool_call", "tool_call_id": "call-1", "tool_name": "search"}
        });

        let event: NormalizedEvent = serde_json::from_value(value).unwrap();
        let scope = event.scope.unwrap();
        assert_eq!(scope.scope_type, ScopeType::ToolCall);
        assert_eq!(scope.stream_key(), Some("call-1"));
        assert_eq!(scope.tool_name.as_deref(), Some("search"));
    }

    #[test]
    fn test_unknown_kind_passes_through() {
        let value = json!({
            "kind": "reasoning.delta",
            "delta": "hmm",
            "is_terminal": false,
            "conversation_id": "conv-3"
        });
        let event: NormalizedEvent = serde_json::from_value(value).unwrap();
        assert_eq!(
            event.payload,
            EventPayload::Unknown {
                kind: "reasoning.delta".to_string()
            }
        );
        assert_eq!(event.kind(), "reasoning.delta");
        assert_eq!(event.conversation_id.as_deref(), Some("conv-3"));
    }

    #[test]
    fn test_unknown_kind_serializes_with_wire_kind() {
        let value = json!({
            "kind": "reasoning.delta",
            "delta": "hmm",
            "scope": {"type": "agent", "agent_name": "planner"}
        });
        let event = NormalizedEvent::from_value(&value).unwrap();

        let chunk = serde_json::to_value(StreamChunk::event(event)).unwrap();
        assert_eq!(chunk["event"]["kind"], "reasoning.delta");
        assert_eq!(chunk["event"]["is_terminal"], false);
        assert_eq!(chunk["event"]["scope"]["agent_name"], "planner");
    }

    #[test]
    fn test_known_kind_serializes_flat() {
        let mut event = NormalizedEvent::new(EventPayload::MessageDelta {
            item_id: "a".to_string(),
            output_index: 1,
            content_index: 0,
            delta: "hi".to_string(),
        });
        event.conversation_id = Some("conv-1".to_string());

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "kind": "message.delta",
                "item_id": "a",
                "output_index": 1,
                "content_index": 0,
                "delta": "hi",
                "is_terminal": false,
                "conversation_id": "conv-1"
            })
        );
        assert_eq!(serde_json::from_value::<NormalizedEvent>(value).unwrap(), event);
    }

    #[test]
    fn test_known_kind_missing_field_fails() {
        let value = json!({"kind": "message.delta", "delta": "x"});
        assert!(serde_json::from_value::<NormalizedEvent>(value).is_err());
    }

    #[test]
    fn test_item_ref() {
        let payload = EventPayload::OutputItemDone {
            item_id: "a".to_string(),
            output_index: 3,
        };
        assert_eq!(payload.item_ref(), Some(("a", 3)));
        assert_eq!(EventPayload::Final { output_text: None }.item_ref(), None);
    }

    #[test]
    fn test_stream_chunk_serialization() {
        let chunk = StreamChunk::error("HTTP 503: upstream failed", None);
        let value = serde_json::to_value(&chunk).unwrap();
        assert_eq!(value, json!({"type": "error", "payload": "HTTP 503: upstream failed"}));

        let chunk = StreamChunk::event(NormalizedEvent::new(EventPayload::Final {
            output_text: None,
        }));
        let value = serde_json::to_value(&chunk).unwrap();
        assert_eq!(value["type"], "event");
        assert_eq!(value["event"]["kind"], "final");
        assert_eq!(value["event"]["is_terminal"], false);
    }
}
