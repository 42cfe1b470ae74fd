use std::collections::{BTreeMap, HashMap};

/// Per-item text fragments, keyed by content position.
///
/// Fragments are never removed. Assembly concatenates fragments in ascending position
/// order, so deltas for different positions may arrive in any order.
#[derive(Debug, Clone, Default)]
pub struct TextParts {
    items: HashMap<String, BTreeMap<u32, String>>,
}

impl TextParts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `delta` to the fragment at `position` and return the item's assembled text.
    pub fn append(&mut self, item_id: &str, position: u32, delta: &str) -> String {
        let parts = self.items.entry(item_id.to_string()).or_default();
        parts.entry(position).or_default().push_str(delta);
        assemble(parts)
    }

    /// Overwrite the fragment at `position` and return the item's assembled text.
    ///
    /// Used for "done" events carrying the authoritative text of a slot, so a trailing
    /// delta followed by its done event is not counted twice.
    pub fn replace(&mut self, item_id: &str, position: u32, text: &str) -> String {
        let parts = self.items.entry(item_id.to_string()).or_default();
        parts.insert(position, text.to_string());
        assemble(parts)
    }

    /// Assembled text for one item, empty if nothing has arrived for it.
    pub fn text(&self, item_id: &str) -> String {
        self.items.get(item_id).map(assemble).unwrap_or_default()
    }

    pub fn contains(&self, item_id: &str) -> bool {
        self.items.contains_key(item_id)
    }
}

fn assemble(parts: &BTreeMap<u32, String>) -> String {
    parts.values().map(String::as_str).collect()
}
