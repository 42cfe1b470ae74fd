use std::collections::HashMap;

use crate::models::Citation;

/// Append-only citation lists keyed by item id.
#[derive(Debug, Clone, Default)]
pub struct CitationTracker {
    by_item: HashMap<String, Vec<Citation>>,
}

impl CitationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a citation for `item_id`, after any already recorded for it.
    pub fn add(&mut self, item_id: &str, citation: Citation) {
        self.by_item
            .entry(item_id.to_string())
            .or_default()
            .push(citation);
    }

    /// Citations for one item in arrival order, if any were recorded.
    pub fn get(&self, item_id: &str) -> Option<&[Citation]> {
        self.by_item.get(item_id).map(Vec::as_slice)
    }
}
