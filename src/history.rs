//! Undo/redo history — a linear sequence of fully-materialized layer
//! snapshots plus a cursor.
//!
//! Unlike patch-based undo systems, every entry is a complete copy of the
//! ordered layer collection; entries past the cursor are "future" (redo)
//! states and are discarded whenever a new commit happens mid-sequence.
//! The live store always equals `entries[index]` immediately after any
//! committed mutation.

use crate::layer::Layer;

pub struct HistoryManager {
    entries: Vec<Vec<Layer>>,
    index: usize,
}

impl Default for HistoryManager {
    fn default() -> Self {
        Self::new()
    }
}

impl HistoryManager {
    /// A fresh history holds a single empty-collection entry.
    pub fn new() -> Self {
        Self {
            entries: vec![Vec::new()],
            index: 0,
        }
    }

    /// Truncate any redo states, append `snapshot`, move the cursor to it.
    pub fn commit(&mut self, snapshot: Vec<Layer>) {
        self.entries.truncate(self.index + 1);
        self.entries.push(snapshot);
        self.index = self.entries.len() - 1;
    }

    /// Step back one entry.  Returns the snapshot to restore, or `None` at
    /// the beginning of history.
    pub fn undo(&mut self) -> Option<&[Layer]> {
        if self.index == 0 {
            return None;
        }
        self.index -= 1;
        Some(&self.entries[self.index])
    }

    /// Step forward one entry.  Returns the snapshot to restore, or `None`
    /// at the tail.
    pub fn redo(&mut self) -> Option<&[Layer]> {
        if self.index + 1 >= self.entries.len() {
            return None;
        }
        self.index += 1;
        Some(&self.entries[self.index])
    }

    pub fn can_undo(&self) -> bool {
        self.index > 0
    }

    pub fn can_redo(&self) -> bool {
        self.index + 1 < self.entries.len()
    }

    /// Snapshot under the cursor.
    pub fn current(&self) -> &[Layer] {
        &self.entries[self.index]
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        false // invariant: at least the initial empty entry exists
    }

    pub fn index(&self) -> usize {
        self.index
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::LayerStore;

    /// Build a snapshot containing `n` image layers.
    fn snapshot_of(n: usize) -> Vec<Layer> {
        let mut store = LayerStore::new();
        for i in 0..n {
            store.add_image(format!("img{}", i), 100, 100);
        }
        store.snapshot()
    }

    #[test]
    fn undo_redo_walks_the_sequence() {
        // N commits, K undos, M redos lands on commit N-K+M.
        let mut h = HistoryManager::new();
        for n in 1..=5 {
            h.commit(snapshot_of(n));
        }
        assert_eq!(h.current().len(), 5);

        for _ in 0..3 {
            h.undo();
        }
        assert_eq!(h.current().len(), 2);

        for _ in 0..2 {
            h.redo();
        }
        assert_eq!(h.current().len(), 4); // 5 - 3 + 2
    }

    #[test]
    fn undo_at_origin_and_redo_at_tail_are_noops() {
        let mut h = HistoryManager::new();
        assert!(h.undo().is_none());
        assert!(h.redo().is_none());

        h.commit(snapshot_of(1));
        assert!(h.redo().is_none());
        assert!(h.undo().is_some());
        assert!(h.undo().is_none());
    }

    #[test]
    fn commit_after_undo_discards_redo_states() {
        // Undo then commit: redo becomes a no-op.
        let mut h = HistoryManager::new();
        h.commit(snapshot_of(1));
        h.commit(snapshot_of(2));
        h.undo();
        h.commit(snapshot_of(3));
        assert!(!h.can_redo());
        assert!(h.redo().is_none());
        assert_eq!(h.current().len(), 3);

        // ...until a new undo re-opens the forward direction.
        h.undo();
        assert!(h.can_redo());
    }

    #[test]
    fn selection_clears_when_undoing_past_creation() {
        // Undo past a layer's creation deselects it; redo does not
        // automatically reselect.
        let mut store = LayerStore::new();
        let mut h = HistoryManager::new();

        let id = store.add_image("img1".into(), 100, 100);
        h.commit(store.snapshot());
        store.select(id);

        let restored = h.undo().unwrap().to_vec();
        store.replace_all(restored);
        assert_eq!(store.selected_id(), None);

        let restored = h.redo().unwrap().to_vec();
        store.replace_all(restored);
        assert_eq!(store.selected_id(), None);
        assert!(store.get(id).is_some());
    }
}
