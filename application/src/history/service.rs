use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

use domain::coords::CanvasSize;
use domain::layer::{Layer, LayerBufferPool, LayerKind, LayerPair};

/// Which half of the pair a history entry changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifiedLayer {
    Background,
    Foreground,
    Both,
}

impl From<LayerKind> for ModifiedLayer {
    fn from(kind: LayerKind) -> Self {
        match kind {
            LayerKind::Background => Self::Background,
            LayerKind::Foreground => Self::Foreground,
        }
    }
}

/// One undo step: full deep copies of both layers. Deltas would be
/// smaller but the full-copy ring is the determinism contract.
pub struct HistoryEntry {
    pub background: Layer,
    pub foreground: Layer,
    pub modified_layer: ModifiedLayer,
    pub timestamp_ms: u64,
    pub is_content_snapshot: bool,
}

/// Bounded undo ring for the local participant's layer pair. Entries that
/// mirror authoritative server state are marked as content snapshots; the
/// undo cursor never crosses one.
pub struct HistoryEngine {
    entries: VecDeque<HistoryEntry>,
    cursor: usize,
    capacity: usize,
    has_drawing_action: bool,
    pool: Arc<LayerBufferPool>,
    canvas: CanvasSize,
}

impl HistoryEngine {
    #[must_use]
    pub fn new(canvas: CanvasSize, capacity: usize, pool: Arc<LayerBufferPool>) -> Self {
        Self {
            entries: VecDeque::new(),
            cursor: 0,
            capacity: capacity.max(1),
            has_drawing_action: false,
            pool,
            canvas,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn deep_copy(&self, layer: &Layer) -> Layer {
        let mut bytes = self.pool.acquire();
        bytes.copy_from_slice(layer.as_bytes());
        Layer::from_pooled(self.canvas, bytes)
    }

    fn release_entry(&self, entry: HistoryEntry) {
        self.pool.release(entry.background.into_bytes());
        self.pool.release(entry.foreground.into_bytes());
    }

    fn latest_equals(&self, layers: &LayerPair) -> bool {
        self.entries.back().is_some_and(|entry| {
            entry.background.as_bytes() == layers.background.as_bytes()
                && entry.foreground.as_bytes() == layers.foreground.as_bytes()
        })
    }

    /// Records the current layer pair. Remote-attributed states never land
    /// in local undo history; byte-identical consecutive states coalesce
    /// (a coalesced content snapshot still raises the barrier flag on the
    /// retained entry).
    pub fn save_state(
        &mut self,
        layers: &LayerPair,
        modified_layer: ModifiedLayer,
        timestamp_ms: u64,
        is_drawing_action: bool,
        is_content_snapshot: bool,
        is_remote: bool,
    ) {
        if is_remote {
            return;
        }
        if is_drawing_action {
            self.has_drawing_action = true;
        }

        if self.latest_equals(layers) && self.cursor + 1 == self.entries.len() {
            if is_content_snapshot {
                if let Some(last) = self.entries.back_mut() {
                    last.is_content_snapshot = true;
                }
            }
            return;
        }

        // a new action discards the redo branch
        while self.entries.len() > self.cursor + 1 {
            if let Some(entry) = self.entries.pop_back() {
                self.release_entry(entry);
            }
        }

        let entry = HistoryEntry {
            background: self.deep_copy(&layers.background),
            foreground: self.deep_copy(&layers.foreground),
            modified_layer,
            timestamp_ms,
            is_content_snapshot,
        };
        self.entries.push_back(entry);
        self.cursor = self.entries.len() - 1;

        while self.entries.len() > self.capacity {
            if let Some(entry) = self.entries.pop_front() {
                self.release_entry(entry);
            }
            self.cursor = self.cursor.saturating_sub(1);
        }
        debug!(
            "history saved: {} entries, cursor {}",
            self.entries.len(),
            self.cursor
        );
    }

    fn last_content_snapshot_index(&self) -> Option<usize> {
        self.entries
            .iter()
            .enumerate()
            .rev()
            .find(|(_, e)| e.is_content_snapshot)
            .map(|(i, _)| i)
    }

    /// Undo is possible while there is somewhere to go, at least one
    /// drawing action has been recorded, and the step would not cross the
    /// latest content snapshot.
    #[must_use]
    pub fn can_undo(&self) -> bool {
        if self.cursor == 0 || !self.has_drawing_action {
            return false;
        }
        match self.last_content_snapshot_index() {
            Some(barrier) => self.cursor > barrier,
            None => true,
        }
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.cursor + 1 < self.entries.len()
    }

    pub fn undo(&mut self) -> Option<&HistoryEntry> {
        if !self.can_undo() {
            return None;
        }
        self.cursor -= 1;
        self.entries.get(self.cursor)
    }

    pub fn redo(&mut self) -> Option<&HistoryEntry> {
        if !self.can_redo() {
            return None;
        }
        self.cursor += 1;
        self.entries.get(self.cursor)
    }

    pub fn clear(&mut self) {
        while let Some(entry) = self.entries.pop_back() {
            self.release_entry(entry);
        }
        self.cursor = 0;
        self.has_drawing_action = false;
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::panic)]

    use super::*;
    use domain::color::Rgba;

    fn canvas() -> CanvasSize {
        CanvasSize::new(16, 16)
    }

    fn engine(capacity: usize) -> HistoryEngine {
        let pool = Arc::new(LayerBufferPool::new(canvas(), 4));
        HistoryEngine::new(canvas(), capacity, pool)
    }

    fn pair_with_pixel(x: u16, v: u8) -> LayerPair {
        let mut pair = LayerPair::new(canvas());
        pair.foreground.set_pixel(x, 0, Rgba::opaque(v, v, v));
        pair
    }

    #[test]
    fn undo_redo_round_trip_is_bitwise() {
        let mut h = engine(30);
        let blank = LayerPair::new(canvas());
        h.save_state(&blank, ModifiedLayer::Both, 0, false, true, false);

        let states: Vec<LayerPair> = (1..=4).map(|i| pair_with_pixel(i, i as u8 * 10)).collect();
        for (i, s) in states.iter().enumerate() {
            h.save_state(s, ModifiedLayer::Foreground, i as u64, true, false, false);
        }

        for _ in 0..4 {
            assert!(h.undo().is_some());
        }
        assert!(!h.can_undo());
        for expected in &states {
            let entry = h.redo().unwrap();
            assert_eq!(entry.foreground.as_bytes(), expected.foreground.as_bytes());
        }
        assert!(!h.can_redo());
    }

    #[test]
    fn remote_states_never_enter_history() {
        let mut h = engine(30);
        h.save_state(&pair_with_pixel(1, 1), ModifiedLayer::Both, 0, true, false, true);
        assert!(h.is_empty());
    }

    #[test]
    fn byte_equal_states_coalesce() {
        let mut h = engine(30);
        let pair = pair_with_pixel(1, 1);
        h.save_state(&pair, ModifiedLayer::Foreground, 0, true, false, false);
        h.save_state(&pair, ModifiedLayer::Foreground, 1, true, false, false);
        assert_eq!(h.len(), 1);
    }

    #[test]
    fn coalesced_content_snapshot_still_raises_barrier() {
        let mut h = engine(30);
        let blank = LayerPair::new(canvas());
        h.save_state(&blank, ModifiedLayer::Both, 0, false, false, false);
        let pair = pair_with_pixel(1, 1);
        h.save_state(&pair, ModifiedLayer::Foreground, 1, true, false, false);
        assert!(h.can_undo());
        // authoritative snapshot matching the current pixels
        h.save_state(&pair, ModifiedLayer::Foreground, 2, false, true, false);
        assert_eq!(h.len(), 2);
        assert!(!h.can_undo());
    }

    #[test]
    fn undo_cannot_cross_content_snapshot() {
        let mut h = engine(30);
        h.save_state(&LayerPair::new(canvas()), ModifiedLayer::Both, 0, false, true, false);
        h.save_state(&pair_with_pixel(1, 1), ModifiedLayer::Foreground, 1, true, false, false);
        h.save_state(&pair_with_pixel(2, 2), ModifiedLayer::Foreground, 2, false, true, false);
        h.save_state(&pair_with_pixel(3, 3), ModifiedLayer::Foreground, 3, true, false, false);

        assert!(h.can_undo());
        assert!(h.undo().is_some());
        // now at the snapshot entry; the barrier stops further undo
        assert!(!h.can_undo());
        assert!(h.undo().is_none());
    }

    #[test]
    fn eviction_is_fifo_and_keeps_cursor_valid() {
        let mut h = engine(3);
        for i in 0..5u16 {
            h.save_state(
                &pair_with_pixel(i, i as u8 + 1),
                ModifiedLayer::Foreground,
                u64::from(i),
                true,
                false,
                false,
            );
        }
        assert_eq!(h.len(), 3);
        // cursor still points at the newest entry
        assert!(h.can_undo());
        let entry = h.undo().unwrap();
        assert_eq!(entry.foreground.pixel(3, 0), Rgba::opaque(4, 4, 4));
    }

    #[test]
    fn new_action_discards_redo_branch() {
        let mut h = engine(30);
        h.save_state(&LayerPair::new(canvas()), ModifiedLayer::Both, 0, false, false, false);
        h.save_state(&pair_with_pixel(1, 1), ModifiedLayer::Foreground, 1, true, false, false);
        h.save_state(&pair_with_pixel(2, 2), ModifiedLayer::Foreground, 2, true, false, false);
        h.undo();
        h.save_state(&pair_with_pixel(3, 3), ModifiedLayer::Foreground, 3, true, false, false);
        assert!(!h.can_redo());
        assert_eq!(h.len(), 3);
    }
}
