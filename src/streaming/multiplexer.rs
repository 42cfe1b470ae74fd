use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use super::accumulator::{ItemView, StreamAccumulator};
use crate::models::{Citation, NormalizedEvent, ScopeType};

// ==================================================================================================
// Read views
// ==================================================================================================

/// Reconstructed view of one tool (or agent) sub-stream.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AgentToolStream {
    pub stream_key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    pub text: String,
    pub items: Vec<ItemView>,
    pub is_streaming: bool,
    pub citations: Vec<Citation>,
    pub last_updated_at: Option<DateTime<Utc>>,
}

/// Every known sub-stream, in the order their first event arrived.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub streams: Vec<AgentToolStream>,
}

impl SessionSnapshot {
    pub fn get(&self, stream_key: &str) -> Option<&AgentToolStream> {
        self.streams.iter().find(|s| s.stream_key == stream_key)
    }

    /// Keyed view of the same streams.
    pub fn by_key(&self) -> BTreeMap<&str, &AgentToolStream> {
        self.streams
            .iter()
            .map(|s| (s.stream_key.as_str(), s))
            .collect()
    }

    pub fn is_streaming(&self) -> bool {
        self.streams.iter().any(|s| s.is_streaming)
    }
}

/// Callback invoked with a full rebuild after every applied event.
pub type SnapshotObserver = Box<dyn FnMut(&SessionSnapshot) + Send>;

// ==================================================================================================
// Multiplexer
// ==================================================================================================

#[derive(Debug, Default)]
struct SubStream {
    accumulator: StreamAccumulator,
    tool_name: Option<String>,
    agent_name: Option<String>,
}

/// Routes scoped events to one accumulator per stream key.
///
/// Only events whose scope type matches the multiplexer's are routed; everything else is
/// ignored. Accumulators are created on the first event for a key.
pub struct SessionMultiplexer {
    scope_type: ScopeType,
    streams: HashMap<String, SubStream>,
    /// Keys in first-seen order
    order: Vec<String>,
    observer: Option<SnapshotObserver>,
}

impl SessionMultiplexer {
    pub fn new(scope_type: ScopeType) -> Self {
        Self {
            scope_type,
            streams: HashMap::new(),
            order: Vec::new(),
            observer: None,
        }
    }

    /// Multiplexer keyed by tool-call id.
    pub fn for_tool_calls() -> Self {
        Self::new(ScopeType::ToolCall)
    }

    pub fn with_observer<F>(mut self, observer: F) -> Self
    where
        F: FnMut(&SessionSnapshot) + Send + 'static,
    {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn scope_type(&self) -> ScopeType {
        self.scope_type
    }

    /// Route one event. Returns `false` when the event is not for this multiplexer.
    pub fn apply(&mut self, event: &NormalizedEvent) -> bool {
        let Some(scope) = event.scope.as_ref() else {
            return false;
        };
        if scope.scope_type != self.scope_type {
            tracing::trace!(
                "Ignoring {} event scoped to {:?}",
                event.kind(),
                scope.scope_type
            );
            return false;
        }
        let Some(key) = scope.stream_key() else {
            tracing::debug!("Ignoring {} event with no stream key", event.kind());
            return false;
        };

        let sub = match self.streams.entry(key.to_string()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                tracing::debug!("New sub-stream: {}", key);
                self.order.push(key.to_string());
                entry.insert(SubStream::default())
            }
        };

        backfill(&mut sub.tool_name, scope.tool_name.as_deref());
        backfill(&mut sub.agent_name, scope.agent_name.as_deref());
        sub.accumulator.apply(event);

        self.notify();
        true
    }

    /// Current view of one sub-stream.
    pub fn get(&self, stream_key: &str) -> Option<AgentToolStream> {
        self.streams
            .get(stream_key)
            .map(|sub| build_stream(stream_key, sub))
    }

    /// Current view of every sub-stream.
    pub fn snapshot(&self) -> SessionSnapshot {
        let streams = self
            .order
            .iter()
            .filter_map(|key| self.streams.get(key).map(|sub| build_stream(key, sub)))
            .collect();
        SessionSnapshot { streams }
    }

    /// Drop one sub-stream and return its last view.
    pub fn remove(&mut self, stream_key: &str) -> Option<AgentToolStream> {
        let sub = self.streams.remove(stream_key)?;
        self.order.retain(|key| key != stream_key);
        Some(build_stream(stream_key, &sub))
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Close every sub-stream once the connection carrying them has ended.
    pub fn complete_all(&mut self) {
        if self.streams.is_empty() {
            return;
        }
        for sub in self.streams.values_mut() {
            sub.accumulator.complete();
        }
        self.notify();
    }

    fn notify(&mut self) {
        if self.observer.is_none() {
            return;
        }
        let snapshot = self.snapshot();
        if let Some(observer) = self.observer.as_mut() {
            observer(&snapshot);
        }
    }
}

impl fmt::Debug for SessionMultiplexer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionMultiplexer")
            .field("scope_type", &self.scope_type)
            .field("streams", &self.order)
            .field("has_observer", &self.observer.is_some())
            .finish()
    }
}

/// Set `slot` from `value` unless it is already known.
fn backfill(slot: &mut Option<String>, value: Option<&str>) {
    if slot.is_none() {
        if let Some(value) = value {
            *slot = Some(value.to_string());
        }
    }
}

fn build_stream(stream_key: &str, sub: &SubStream) -> AgentToolStream {
    let view = sub.accumulator.build();
    AgentToolStream {
        stream_key: stream_key.to_string(),
        tool_name: sub.tool_name.clone(),
        agent_name: sub.agent_name.clone(),
        text: view.text,
        items: view.items,
        is_streaming: view.is_streaming,
        citations: view.citations,
        last_updated_at: view.last_updated_at,
    }
}
