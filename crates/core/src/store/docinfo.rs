// Docinfo side-store: comments, attachments, assignments, shares per document.

use std::collections::HashMap;

use docmirror_common::protocol::sync::Docinfo;
use docmirror_common::DocKey;

/// Docinfo keyed by `(doctype, name)`, separate from field data.
#[derive(Debug, Default)]
pub struct DocinfoStore {
    entries: HashMap<DocKey, Docinfo>,
}

impl DocinfoStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the entry for the docinfo's own key wholesale.
    pub fn merge(&mut self, docinfo: Docinfo) {
        self.entries.insert(docinfo.key(), docinfo);
    }

    /// Create an empty slot for a new draft so later lookups succeed.
    pub fn ensure(&mut self, key: &DocKey) {
        self.entries
            .entry(key.clone())
            .or_insert_with(|| Docinfo::new(key.doctype.clone(), key.name.clone()));
    }

    pub fn get(&self, key: &DocKey) -> Option<&Docinfo> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &DocKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn remove(&mut self, key: &DocKey) -> Option<Docinfo> {
        self.entries.remove(key)
    }

    /// Move the entry under `from` to `to`, rewriting its embedded name.
    /// Returns false when there was nothing to move.
    pub fn relocate(&mut self, from: &DocKey, to: &DocKey) -> bool {
        let Some(mut docinfo) = self.entries.remove(from) else {
            return false;
        };
        docinfo.doctype = to.doctype.clone();
        docinfo.name = to.name.clone();
        self.entries.insert(to.clone(), docinfo);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn merge_replaces_wholesale() {
        let mut store = DocinfoStore::new();
        let mut first = Docinfo::new("Task", "T-1");
        first.comments.push(json!({"content": "one"}));
        first.attachments.push(json!({"file_url": "/a"}));
        store.merge(first);

        let mut second = Docinfo::new("Task", "T-1");
        second.comments.push(json!({"content": "two"}));
        store.merge(second);

        let stored = store.get(&DocKey::new("Task", "T-1")).unwrap();
        assert_eq!(stored.comments, vec![json!({"content": "two"})]);
        assert!(stored.attachments.is_empty());
    }

    #[test]
    fn relocate_moves_entry_and_rewrites_name() {
        let mut store = DocinfoStore::new();
        let old = DocKey::new("Item", "new-item-ab12");
        let new = DocKey::new("Item", "ITEM-00001");
        store.ensure(&old);

        assert!(store.relocate(&old, &new));
        assert!(!store.contains(&old));
        assert_eq!(store.get(&new).unwrap().name, "ITEM-00001");
        assert!(!store.relocate(&old, &new));
    }

    #[test]
    fn ensure_does_not_clobber_existing() {
        let mut store = DocinfoStore::new();
        let mut docinfo = Docinfo::new("Task", "T-1");
        docinfo.shared.push(json!({"user": "a"}));
        store.merge(docinfo);

        store.ensure(&DocKey::new("Task", "T-1"));
        assert_eq!(store.get(&DocKey::new("Task", "T-1")).unwrap().shared.len(), 1);
        assert_eq!(store.len(), 1);
    }
}
