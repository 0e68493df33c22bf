//! The layered recalculation queue.
//!
//! Listeners are popped lowest layer first; ties within a layer break in
//! FIFO insertion order. Observers (layer +∞) live on their own FIFO
//! queue, drained only in the read-only phase.

use alloc::collections::{BTreeMap, VecDeque};
use weft_core::{Layer, ListenerId, OBSERVER_LAYER};

/// Layered priority queue plus the observer queue.
pub(crate) struct Schedule {
    layers: BTreeMap<Layer, VecDeque<ListenerId>>,
    observers: VecDeque<ListenerId>,
}

impl Schedule {
    pub(crate) fn new() -> Self {
        Self {
            layers: BTreeMap::new(),
            observers: VecDeque::new(),
        }
    }

    /// Inserts a listener at the given layer.
    pub(crate) fn push(&mut self, layer: Layer, id: ListenerId) {
        if layer == OBSERVER_LAYER {
            self.observers.push_back(id);
        } else {
            self.layers.entry(layer).or_default().push_back(id);
        }
    }

    /// Pops the next listener from the lowest non-empty layer.
    pub(crate) fn pop_lowest(&mut self) -> Option<ListenerId> {
        let (&layer, _) = self.layers.iter().next()?;
        let queue = self.layers.get_mut(&layer)?;
        let id = queue.pop_front();
        if queue.is_empty() {
            self.layers.remove(&layer);
        }
        id
    }

    /// Pops the next observer.
    pub(crate) fn pop_observer(&mut self) -> Option<ListenerId> {
        self.observers.pop_front()
    }

    /// Removes a listener queued at the given layer.
    pub(crate) fn remove(&mut self, layer: Layer, id: ListenerId) -> bool {
        if layer == OBSERVER_LAYER {
            if let Some(pos) = self.observers.iter().position(|&l| l == id) {
                self.observers.remove(pos);
                return true;
            }
            return false;
        }
        let Some(queue) = self.layers.get_mut(&layer) else {
            return false;
        };
        let Some(pos) = queue.iter().position(|&l| l == id) else {
            return false;
        };
        queue.remove(pos);
        if queue.is_empty() {
            self.layers.remove(&layer);
        }
        true
    }

    /// Drops everything, observers included.
    pub(crate) fn clear(&mut self) {
        self.layers.clear();
        self.observers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pop_lowest_layer_first() {
        let mut s = Schedule::new();
        s.push(2, ListenerId(20));
        s.push(0, ListenerId(1));
        s.push(1, ListenerId(10));

        assert_eq!(s.pop_lowest(), Some(ListenerId(1)));
        assert_eq!(s.pop_lowest(), Some(ListenerId(10)));
        assert_eq!(s.pop_lowest(), Some(ListenerId(20)));
        assert_eq!(s.pop_lowest(), None);
    }

    #[test]
    fn test_fifo_within_a_layer() {
        let mut s = Schedule::new();
        s.push(3, ListenerId(1));
        s.push(3, ListenerId(2));
        s.push(3, ListenerId(3));

        assert_eq!(s.pop_lowest(), Some(ListenerId(1)));
        assert_eq!(s.pop_lowest(), Some(ListenerId(2)));
        assert_eq!(s.pop_lowest(), Some(ListenerId(3)));
    }

    #[test]
    fn test_observer_queue_is_separate() {
        let mut s = Schedule::new();
        s.push(OBSERVER_LAYER, ListenerId(9));
        s.push(0, ListenerId(1));

        // the observer never surfaces through the layered queue
        assert_eq!(s.pop_lowest(), Some(ListenerId(1)));
        assert_eq!(s.pop_lowest(), None);
        assert_eq!(s.pop_observer(), Some(ListenerId(9)));
        assert_eq!(s.pop_observer(), None);
    }

    #[test]
    fn test_remove_queued_listener() {
        let mut s = Schedule::new();
        s.push(1, ListenerId(1));
        s.push(1, ListenerId(2));

        assert!(s.remove(1, ListenerId(1)));
        assert!(!s.remove(1, ListenerId(1)));
        assert_eq!(s.pop_lowest(), Some(ListenerId(2)));
        assert_eq!(s.pop_lowest(), None);
    }
}
