//! The HPACK dynamic table: a bounded ring of `(name, value)` pairs
//! evicted from the tail, indexed by insertion order.

use std::collections::VecDeque;

/// Per RFC 7541 §4.1: each entry costs its name+value length plus 32
/// bytes of accounting overhead.
const ENTRY_OVERHEAD: usize = 32;

#[derive(Debug, Clone)]
pub struct DynamicTable {
    entries: VecDeque<(String, String)>,
    size: usize,
    max_size: usize,
}

impl DynamicTable {
    #[must_use]
    pub fn new(max_size: usize) -> Self {
        Self { entries: VecDeque::new(), size: 0, max_size }
    }

    /// Insert a new entry at the head, evicting from the tail until the
    /// table fits within capacity. An entry larger than capacity empties
    /// the table entirely (RFC 7541 §4.4).
    pub fn insert(&mut self, name: String, value: String) {
        let cost = entry_cost(&name, &value);
        self.evict_to_fit(cost);
        if cost <= self.max_size {
            self.size += cost;
            self.entries.push_front((name, value));
        }
    }

    /// Change the maximum size, evicting entries if necessary (signaled
    /// by a dynamic-table-size-update opcode or a SETTINGS change).
    pub fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
        self.evict_to_fit(0);
    }

    fn evict_to_fit(&mut self, incoming: usize) {
        while self.size + incoming > self.max_size {
            match self.entries.pop_back() {
                Some((name, value)) => self.size -= entry_cost(&name, &value),
                None => break,
            }
        }
    }

    /// Dynamic-table index (1-based, counted from the most recently
    /// inserted entry) maps to static-table index + this many slots.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&(String, String)> {
        self.entries.get(index)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// True if any entry carries this exact field name. Case-sensitive:
    /// callers must already have lowercased `name` per RFC 7540 §8.1.2.
    #[must_use]
    pub fn contains_name(&self, name: &str) -> bool {
        self.entries.iter().any(|(entry_name, _)| entry_name == name)
    }
}

fn entry_cost(name: &str, value: &str) -> usize {
    name.len() + value.len() + ENTRY_OVERHEAD
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_lookup() {
        let mut table = DynamicTable::new(4096);
        table.insert("custom-key".into(), "custom-value".into());
        assert_eq!(table.get(0), Some(&("custom-key".to_string(), "custom-value".to_string())));
    }

    #[test]
    fn eviction_when_over_capacity() {
        let mut table = DynamicTable::new(64);
        table.insert("a".into(), "1".into()); // cost 34
        table.insert("b".into(), "2".into()); // cost 34, evicts "a"
        assert_eq!(table.len(), 1);
        assert_eq!(table.get(0), Some(&("b".to_string(), "2".to_string())));
    }

    #[test]
    fn resize_smaller_evicts() {
        let mut table = DynamicTable::new(4096);
        table.insert("a".into(), "1".into());
        table.insert("b".into(), "2".into());
        table.set_max_size(34);
        assert_eq!(table.len(), 1);
    }
}
