//! Ordered in-memory mirror of the active items, turning sync mutations into
//! positional list events.
//!
//! Positions in a [`Diff`] follow the batch-update convention of list views:
//! `deleted` indexes the sequence before removal, `inserted` and `updated`
//! index the sequence after the pass.

use std::collections::HashMap;

use serde::Serialize;

use crate::model::Item;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Diff {
    pub inserted: Vec<usize>,
    pub updated: Vec<usize>,
    pub deleted: Vec<usize>,
}

impl Diff {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

#[derive(Debug, Default)]
pub struct DiffProjector {
    items: Vec<Item>,
    index: HashMap<String, usize>,
    inserted: Vec<String>,
    updated: Vec<String>,
    deleted: Vec<usize>,
}

impl DiffProjector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the mirrored sequence and forget all recorded events.
    pub fn seed(&mut self, items: Vec<Item>) {
        self.items = items;
        self.inserted.clear();
        self.updated.clear();
        self.deleted.clear();
        self.reindex();
    }

    pub fn items(&self) -> &[Item] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn position(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Replace an existing entry in place. Unknown ids are ignored.
    pub fn record_update(&mut self, item: Item) -> bool {
        let Some(pos) = self.position(&item.id) else {
            return false;
        };
        if !self.inserted.contains(&item.id) && !self.updated.contains(&item.id) {
            self.updated.push(item.id.clone());
        }
        self.items[pos] = item;
        true
    }

    /// Append an entry. An id that is already mirrored is replaced in place
    /// and reported as an update instead.
    pub fn record_insert(&mut self, item: Item) {
        if self.index.contains_key(&item.id) {
            self.record_update(item);
            return;
        }
        self.index.insert(item.id.clone(), self.items.len());
        self.inserted.push(item.id.clone());
        self.items.push(item);
    }

    /// Remove a batch of entries. Every position is captured against the
    /// sequence as it stands before this batch, then the sequence is filtered
    /// once.
    pub fn record_delete(&mut self, items: &[Item]) {
        let mut doomed: Vec<&str> = Vec::with_capacity(items.len());
        for item in items {
            let Some(pos) = self.position(&item.id) else {
                continue;
            };
            if doomed.contains(&item.id.as_str()) {
                continue;
            }
            doomed.push(&item.id);
            // Never shown before this pass, so there is nothing to remove on screen.
            if let Some(i) = self.inserted.iter().position(|id| *id == item.id) {
                self.inserted.remove(i);
                continue;
            }
            self.updated.retain(|id| *id != item.id);
            self.deleted.push(pos);
        }
        if doomed.is_empty() {
            return;
        }
        self.items.retain(|item| !doomed.contains(&item.id.as_str()));
        self.reindex();
    }

    /// Events accumulated since the last [`seed`](Self::seed).
    pub fn diff(&self) -> Diff {
        let inserted = self
            .inserted
            .iter()
            .filter_map(|id| self.position(id))
            .collect();
        let mut updated: Vec<usize> = self
            .updated
            .iter()
            .filter_map(|id| self.position(id))
            .collect();
        updated.sort_unstable();
        Diff {
            inserted,
            updated,
            deleted: self.deleted.clone(),
        }
    }

    fn reindex(&mut self) {
        self.index = self
            .items
            .iter()
            .enumerate()
            .map(|(pos, item)| (item.id.clone(), pos))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(ids: &[&str]) -> Vec<Item> {
        ids.iter().map(|id| Item::with_id(*id)).collect()
    }

    fn ids(p: &DiffProjector) -> Vec<&str> {
        p.items().iter().map(|i| i.id.as_str()).collect()
    }

    #[test]
    fn inserts_append_in_call_order() {
        let mut p = DiffProjector::new();
        p.seed(vec![]);
        for item in items(&["x", "y", "z"]) {
            p.record_insert(item);
        }
        assert_eq!(ids(&p), vec!["x", "y", "z"]);
        assert_eq!(
            p.diff(),
            Diff {
                inserted: vec![0, 1, 2],
                ..Default::default()
            }
        );
    }

    #[test]
    fn delete_positions_are_taken_before_removal() {
        let mut p = DiffProjector::new();
        p.seed(items(&["a", "b", "c", "d"]));
        p.record_delete(&items(&["b", "d"]));
        assert_eq!(ids(&p), vec!["a", "c"]);
        assert_eq!(p.diff().deleted, vec![1, 3]);
        assert_eq!(p.position("c"), Some(1));
    }

    #[test]
    fn update_then_delete_reports_only_delete() {
        let mut p = DiffProjector::new();
        p.seed(items(&["a", "b", "c"]));
        let mut b = Item::with_id("b");
        b.image_url = "https://cdn/b.png".into();
        assert!(p.record_update(b));
        p.record_delete(&items(&["b"]));
        let diff = p.diff();
        assert!(diff.updated.is_empty());
        assert_eq!(diff.deleted, vec![1]);
    }

    #[test]
    fn update_positions_follow_deletes() {
        let mut p = DiffProjector::new();
        p.seed(items(&["a", "b", "c"]));
        let mut c = Item::with_id("c");
        c.title = "new".into();
        p.record_update(c);
        p.record_delete(&items(&["a"]));
        let diff = p.diff();
        assert_eq!(diff.deleted, vec![0]);
        assert_eq!(diff.updated, vec![1]);
        assert_eq!(p.items()[1].title, "new");
    }

    #[test]
    fn update_of_unknown_id_is_noop() {
        let mut p = DiffProjector::new();
        p.seed(items(&["a"]));
        assert!(!p.record_update(Item::with_id("zz")));
        assert!(p.diff().is_empty());
    }

    #[test]
    fn insert_then_delete_cancels_out() {
        let mut p = DiffProjector::new();
        p.seed(items(&["a"]));
        p.record_insert(Item::with_id("n"));
        p.record_delete(&items(&["n"]));
        assert_eq!(ids(&p), vec!["a"]);
        assert!(p.diff().is_empty());
    }

    #[test]
    fn duplicate_insert_becomes_update() {
        let mut p = DiffProjector::new();
        p.seed(items(&["a", "b"]));
        p.record_insert(Item::with_id("a"));
        assert_eq!(ids(&p), vec!["a", "b"]);
        assert_eq!(
            p.diff(),
            Diff {
                updated: vec![0],
                ..Default::default()
            }
        );
    }

    #[test]
    fn seed_resets_events() {
        let mut p = DiffProjector::new();
        assert!(p.is_empty());
        p.seed(items(&["a"]));
        p.record_insert(Item::with_id("b"));
        p.seed(items(&["a", "b"]));
        assert!(!p.is_empty());
        assert!(p.diff().is_empty());
        assert_eq!(p.len(), 2);
    }
}
