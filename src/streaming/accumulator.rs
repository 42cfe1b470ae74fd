use chrono::{DateTime, Utc};
use serde::Serialize;

use super::citations::CitationTracker;
use super::text_parts::TextParts;
use crate::models::{Citation, EventPayload, NormalizedEvent};

/// Separator placed between the texts of consecutive items.
pub const PARAGRAPH_SEPARATOR: &str = "\n\n";

// ==================================================================================================
// Read views
// ==================================================================================================

/// Reconstructed text of one output item.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ItemView {
    pub item_id: String,
    pub output_index: u32,
    pub text: String,
    /// The text is a refusal rather than a message
    pub is_refusal: bool,
    pub is_done: bool,
}

/// Reconstructed state of one sub-stream, rebuilt on every read.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamView {
    pub text: String,
    pub items: Vec<ItemView>,
    pub is_streaming: bool,
    pub citations: Vec<Citation>,
    pub last_updated_at: Option<DateTime<Utc>>,
}

// ==================================================================================================
// Accumulator
// ==================================================================================================

#[derive(Debug, Clone)]
struct ItemEntry {
    item_id: String,
    output_index: u32,
    done: bool,
}

/// Reconstructs one sub-stream (one assistant message or one tool invocation).
///
/// Items are kept in ascending `output_index` order. Message and refusal text are
/// assembled separately per item; a non-empty refusal supersedes the message.
///
/// Once every item with text is done the accumulator is settled: items that show up
/// afterwards are taken as already done, so `is_streaming` stays false.
#[derive(Debug, Clone, Default)]
pub struct StreamAccumulator {
    items: Vec<ItemEntry>,
    messages: TextParts,
    refusals: TextParts,
    citations: CitationTracker,
    last_updated_at: Option<DateTime<Utc>>,
    settled: bool,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event. Returns whether the event touched this accumulator's state.
    pub fn apply(&mut self, event: &NormalizedEvent) -> bool {
        match &event.payload {
            EventPayload::MessageDelta {
                item_id,
                output_index,
                content_index,
                delta,
            } => {
                self.register(item_id, *output_index);
                self.messages.append(item_id, *content_index, delta);
            }
            EventPayload::MessageDone {
                item_id,
                output_index,
                content_index,
                text,
            } => {
                self.register(item_id, *output_index);
                self.messages.replace(item_id, *content_index, text);
            }
            EventPayload::MessageCitation {
                item_id,
                output_index,
                citation,
                ..
            } => {
                self.register(item_id, *output_index);
                self.citations.add(item_id, citation.clone());
            }
            EventPayload::RefusalDelta {
                item_id,
                output_index,
                content_index,
                delta,
            } => {
                self.register(item_id, *output_index);
                self.refusals.append(item_id, *content_index, delta);
            }
            EventPayload::RefusalDone {
                item_id,
                output_index,
                content_index,
                refusal,
            } => {
                self.register(item_id, *output_index);
                self.refusals.replace(item_id, *content_index, refusal);
                self.mark_done(item_id);
            }
            EventPayload::OutputItemAdded {
                item_id,
                output_index,
                ..
            } => {
                self.register(item_id, *output_index);
            }
            EventPayload::OutputItemDone {
                item_id,
                output_index,
            } => {
                self.register(item_id, *output_index);
                self.mark_done(item_id);
            }
            EventPayload::Final { .. } => {
                self.mark_all_done();
            }
            EventPayload::Lifecycle { .. }
            | EventPayload::Error { .. }
            | EventPayload::Unknown { .. } => {
                if !event.is_terminal {
                    return false;
                }
            }
        }

        // Nothing follows a terminal event, so every item is as complete as it will get
        if event.is_terminal {
            self.mark_all_done();
        }

        self.settle();
        self.last_updated_at = Some(Utc::now());
        true
    }

    /// Mark every item done, as when the surrounding stream has ended.
    pub fn complete(&mut self) {
        self.mark_all_done();
        self.settle();
    }

    /// Whether every item with text has finished.
    pub fn is_settled(&self) -> bool {
        self.settled
    }

    /// Rebuild the read view. Side-effect free.
    pub fn build(&self) -> StreamView {
        let mut ordered: Vec<&ItemEntry> = self.items.iter().collect();
        ordered.sort_by_key(|entry| entry.output_index);

        let mut items = Vec::with_capacity(ordered.len());
        for entry in ordered {
            let refusal = self.refusals.text(&entry.item_id);
            let (text, is_refusal) = if refusal.is_empty() {
                (self.messages.text(&entry.item_id), false)
            } else {
                (refusal, true)
            };

            // Nothing to render yet
            if text.is_empty() {
                continue;
            }

            items.push(ItemView {
                item_id: entry.item_id.clone(),
                output_index: entry.output_index,
                text,
                is_refusal,
                is_done: entry.done,
            });
        }

        let text = items
            .iter()
            .map(|item| item.text.as_str())
            .collect::<Vec<_>>()
            .join(PARAGRAPH_SEPARATOR);

        let is_streaming = items.iter().any(|item| !item.is_done);

        // Attribution is ambiguous once several items carry text
        let citations = match items.as_slice() {
            [only] => self
                .citations
                .get(&only.item_id)
                .map(<[Citation]>::to_vec)
                .unwrap_or_default(),
            _ => Vec::new(),
        };

        StreamView {
            text,
            items,
            is_streaming,
            citations,
            last_updated_at: self.last_updated_at,
        }
    }

    /// Number of items seen so far, including ones without text.
    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    fn has_text(&self, item_id: &str) -> bool {
        !self.refusals.text(item_id).is_empty() || !self.messages.text(item_id).is_empty()
    }

    fn settle(&mut self) {
        if self.settled {
            return;
        }

        let mut with_text = self
            .items
            .iter()
            .filter(|entry| self.has_text(&entry.item_id))
            .peekable();
        if with_text.peek().is_none() {
            return;
        }
        if with_text.all(|entry| entry.done) {
            tracing::trace!("Stream settled with {} items", self.items.len());
            self.settled = true;
        }
    }

    fn register(&mut self, item_id: &str, output_index: u32) {
        if let Some(entry) = self.items.iter_mut().find(|e| e.item_id == item_id) {
            if entry.output_index != output_index {
                tracing::debug!(
                    "Item {} moved from output index {} to {}",
                    item_id,
                    entry.output_index,
                    output_index
                );
                entry.output_index = output_index;
            }
            return;
        }

        let pos = self
            .items
            .partition_point(|e| e.output_index <= output_index);
        self.items.insert(
            pos,
            ItemEntry {
                item_id: item_id.to_string(),
                output_index,
                done: self.settled,
            },
        );
    }

    fn mark_done(&mut self, item_id: &str) {
        if let Some(entry) = self.items.iter_mut().find(|e| e.item_id == item_id) {
            entry.done = true;
        }
    }

    fn mark_all_done(&mut self) {
        for entry in &mut self.items {
            entry.done = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn added(item: &str, idx: u32) -> NormalizedEvent {
        NormalizedEvent::new(EventPayload::OutputItemAdded {
            item_id: item.to_string(),
            output_index: idx,
            item_type: None,
        })
    }

    fn done(item: &str, idx: u32) -> NormalizedEvent {
        NormalizedEvent::new(EventPayload::OutputItemDone {
            item_id: item.to_string(),
            output_index: idx,
        })
    }

    fn delta(item: &str, idx: u32, content: u32, text: &str) -> NormalizedEvent {
        NormalizedEvent::new(EventPayload::MessageDelta {
            item_id: item.to_string(),
            output_index: idx,
            content_index: content,
            delta: text.to_string(),
        })
    }

    fn citation(item: &str, url: &str) -> NormalizedEvent {
        NormalizedEvent::new(EventPayload::MessageCitation {
            item_id: item.to_string(),
            output_index: 0,
            content_index: 0,
            citation: Citation {
                url: Some(url.to_string()),
                title: None,
                start_index: None,
                end_index: None,
            },
        })
    }

    #[test]
    fn test_hello_scenario() {
        let mut acc = StreamAccumulator::new();
        acc.apply(&added("a", 0));
        acc.apply(&delta("a", 0, 0, "Hel"));
        acc.apply(&delta("a", 0, 0, "lo"));

        let view = acc.build();
        assert_eq!(view.text, "Hello");
        assert!(view.is_streaming);

        acc.apply(&done("a", 0));
        let view = acc.build();
        assert_eq!(view.text, "Hello");
        assert!(!view.is_streaming);
        assert!(view.last_updated_at.is_some());
    }

    #[test]
    fn test_interleaved_items_ordered_by_output_index() {
        let mut acc = StreamAccumulator::new();
        acc.apply(&added("second", 1));
        acc.apply(&delta("second", 1, 0, "World"));
        acc.apply(&added("first", 0));
        acc.apply(&delta("first", 0, 0, "Hello"));
        acc.apply(&done("second", 1));
        acc.apply(&done("first", 0));

        let view = acc.build();
        assert_eq!(view.text, "Hello\n\nWorld");
        assert_eq!(view.items[0].item_id, "first");
        assert_eq!(view.items[1].item_id, "second");
        assert!(!view.is_streaming);
    }

    #[test]
    fn test_items_without_text_are_skipped() {
        let mut acc = StreamAccumulator::new();
        acc.apply(&added("a", 0));
        acc.apply(&added("b", 1));
        acc.apply(&delta("b", 1, 0, "only b"));

        let view = acc.build();
        assert_eq!(view.text, "only b");
        assert_eq!(view.items.len(), 1);
        assert_eq!(acc.item_count(), 2);
        // "a" has no text, so its missing done marker does not count
        acc.apply(&done("b", 1));
        assert!(!acc.build().is_streaming);
    }

    #[test]
    fn test_implicit_registration_on_delta() {
        let mut acc = StreamAccumulator::new();
        acc.apply(&delta("a", 0, 0, "hi"));
        assert_eq!(acc.item_count(), 1);
        assert_eq!(acc.build().text, "hi");
    }

    #[test]
    fn test_duplicate_added_updates_position_without_reinsert() {
        let mut acc = StreamAccumulator::new();
        acc.apply(&added("a", 0));
        acc.apply(&added("b", 1));
        acc.apply(&delta("a", 0, 0, "A"));
        acc.apply(&delta("b", 1, 0, "B"));
        acc.apply(&added("a", 2));

        assert_eq!(acc.item_count(), 2);
        assert_eq!(acc.build().text, "B\n\nA");
    }

    #[test]
    fn test_refusal_supersedes_message() {
        let mut acc = StreamAccumulator::new();
        acc.apply(&delta("a", 0, 0, "Sure, here"));
        acc.apply(&NormalizedEvent::new(EventPayload::RefusalDelta {
            item_id: "a".to_string(),
            output_index: 0,
            content_index: 0,
            delta: "I can't".to_string(),
        }));

        let view = acc.build();
        assert_eq!(view.text, "I can't");
        assert!(view.items[0].is_refusal);
        assert!(view.is_streaming);

        acc.apply(&NormalizedEvent::new(EventPayload::RefusalDone {
            item_id: "a".to_string(),
            output_index: 0,
            content_index: 0,
            refusal: "I can't help with that.".to_string(),
        }));

        let view = acc.build();
        assert_eq!(view.text, "I can't help with that.");
        assert!(!view.is_streaming);
    }

    #[test]
    fn test_message_done_replaces_slot() {
        let mut acc = StreamAccumulator::new();
        acc.apply(&delta("a", 0, 0, "Hel"));
        acc.apply(&delta("a", 0, 0, "lo"));
        acc.apply(&NormalizedEvent::new(EventPayload::MessageDone {
            item_id: "a".to_string(),
            output_index: 0,
            content_index: 0,
            text: "Hello".to_string(),
        }));

        let view = acc.build();
        assert_eq!(view.text, "Hello");
        // message.done fixes the text but does not close the item
        assert!(view.is_streaming);
    }

    #[test]
    fn test_citations_only_with_single_text_item() {
        let mut acc = StreamAccumulator::new();
        acc.apply(&delta("a", 0, 0, "cited"));
        acc.apply(&citation("a", "https://a.example"));
        acc.apply(&citation("a", "https://b.example"));

        let view = acc.build();
        assert_eq!(view.citations.len(), 2);
        assert_eq!(view.citations[0].url.as_deref(), Some("https://a.example"));

        acc.apply(&delta("b", 1, 0, "second item"));
        assert!(acc.build().citations.is_empty());
    }

    #[test]
    fn test_final_marks_everything_done() {
        let mut acc = StreamAccumulator::new();
        acc.apply(&delta("a", 0, 0, "x"));
        acc.apply(&delta("b", 1, 0, "y"));
        assert!(acc.build().is_streaming);

        acc.apply(&NormalizedEvent::new(EventPayload::Final { output_text: None }));
        assert!(!acc.build().is_streaming);
    }

    #[test]
    fn test_stays_done_after_settling() {
        let mut acc = StreamAccumulator::new();
        acc.apply(&added("a", 0));
        acc.apply(&delta("a", 0, 0, "Hello"));
        acc.apply(&done("a", 0));
        assert!(acc.is_settled());
        assert!(!acc.build().is_streaming);

        // Late delta for the finished item
        acc.apply(&delta("a", 0, 0, "!"));
        let view = acc.build();
        assert_eq!(view.text, "Hello!");
        assert!(!view.is_streaming);

        // An item first seen after settling
        acc.apply(&delta("b", 1, 0, "late"));
        let view = acc.build();
        assert_eq!(view.text, "Hello!\n\nlate");
        assert!(!view.is_streaming);
        assert!(view.items.iter().all(|item| item.is_done));
    }

    #[test]
    fn test_done_without_text_does_not_settle() {
        let mut acc = StreamAccumulator::new();
        acc.apply(&added("a", 0));
        acc.apply(&done("a", 0));
        assert!(!acc.is_settled());

        // Items still open before settling keep streaming
        acc.apply(&delta("b", 1, 0, "x"));
        assert!(acc.build().is_streaming);
    }

    #[test]
    fn test_complete_marks_open_items_done() {
        let mut acc = StreamAccumulator::new();
        acc.apply(&delta("a", 0, 0, "x"));
        assert!(acc.build().is_streaming);

        acc.complete();
        assert!(acc.is_settled());
        assert!(!acc.build().is_streaming);
    }

    #[test]
    fn test_terminal_delta_closes_stream() {
        let mut acc = StreamAccumulator::new();
        acc.apply(&delta("a", 0, 0, "partial"));
        acc.apply(&delta("a", 0, 0, " end").terminal(true));

        let view = acc.build();
        assert_eq!(view.text, "partial end");
        assert!(!view.is_streaming);
    }

    #[test]
    fn test_lifecycle_is_not_applied() {
        let mut acc = StreamAccumulator::new();
        let changed = acc.apply(&NormalizedEvent::new(EventPayload::Lifecycle {
            status: "started".to_string(),
            run_id: None,
        }));
        assert!(!changed);
        assert!(acc.build().last_updated_at.is_none());
    }

    #[test]
    fn test_build_is_repeatable() {
        let mut acc = StreamAccumulator::new();
        acc.apply(&delta("a", 0, 1, "world"));
        acc.apply(&delta("a", 0, 0, "hello "));
        assert_eq!(acc.build(), acc.build());
        assert_eq!(acc.build().text, "hello world");
    }

    #[test]
    fn test_empty_accumulator() {
        let view = StreamAccumulator::new().build();
        assert_eq!(view.text, "");
        assert!(view.items.is_empty());
        assert!(!view.is_streaming);
    }
}
