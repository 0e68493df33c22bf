//! An in-pass publish/subscribe hub with wildcard patterns.
//!
//! Messages are fixed-length tuples of hashable values; a pattern is the
//! same shape with `None` as a wildcard. Patterns are indexed by their
//! rightmost non-wildcard (position, value) pair, so publishing costs
//! time proportional to the patterns that can match, not to all patterns
//! registered.
//!
//! Deliveries land in one discrete cell per subscription, in publication
//! order, and drain when the scope commits: a message exists only for
//! the pass that published it.

use alloc::vec::Vec;
use core::hash::Hash;
use hashbrown::HashMap;
use weft_cells::Discrete;
use weft_engine::{Engine, Result};

/// A message: one tuple of values.
pub type Message<T> = Vec<T>;

/// A pattern: one tuple of values with `None` wildcards.
pub type Pattern<T> = Vec<Option<T>>;

/// Handle to one registered pattern's delivery cell.
pub struct Subscription<T> {
    cell: Discrete<Vec<Message<T>>>,
}

impl<T> Clone for Subscription<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Subscription<T> {}

impl<T: Clone + Eq + Hash + 'static> Subscription<T> {
    /// Tracked read of this pass's deliveries, in publication order.
    /// Inside a rule or observer, the read re-runs the caller when a
    /// later publication in the same pass matches.
    pub fn get(&self, en: &mut Engine) -> Result<Vec<Message<T>>> {
        self.cell.get(en)
    }

    /// Untracked read.
    pub fn read(&self, en: &Engine) -> Vec<Message<T>> {
        self.cell.read(en).unwrap_or_default()
    }
}

struct PatternEntry<T> {
    pattern: Pattern<T>,
    cell: Discrete<Vec<Message<T>>>,
}

/// The hub: pattern registry plus the rightmost-non-wildcard index.
pub struct Hub<T> {
    patterns: Vec<PatternEntry<T>>,
    /// (position, value) of each pattern's rightmost non-wildcard.
    index: HashMap<(usize, T), Vec<usize>>,
    /// Patterns that are all wildcards, by length.
    wildcards: Vec<usize>,
}

impl<T: Clone + Eq + Hash + 'static> Default for Hub<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Clone + Eq + Hash + 'static> Hub<T> {
    /// Creates an empty hub.
    pub fn new() -> Self {
        Self {
            patterns: Vec::new(),
            index: HashMap::new(),
            wildcards: Vec::new(),
        }
    }

    /// Registers a pattern and returns its subscription. Registering an
    /// identical pattern again returns the existing subscription.
    pub fn subscribe(&mut self, en: &mut Engine, pattern: Pattern<T>) -> Subscription<T> {
        if let Some(entry) = self.patterns.iter().find(|e| e.pattern == pattern) {
            return Subscription { cell: entry.cell };
        }
        let cell = Discrete::new(en, Vec::new());
        let id = self.patterns.len();
        match pattern.iter().rposition(|slot| slot.is_some()) {
            Some(pos) => {
                if let Some(value) = pattern[pos].clone() {
                    self.index.entry((pos, value)).or_default().push(id);
                }
            }
            None => self.wildcards.push(id),
        }
        self.patterns.push(PatternEntry { pattern, cell });
        Subscription { cell }
    }

    /// Publishes a message to every matching subscription.
    pub fn put(&self, en: &mut Engine, values: Message<T>) -> Result<()> {
        if !en.active() {
            return en.atomically(|en| self.put(en, values));
        }
        for id in self.matching(&values) {
            let entry = &self.patterns[id];
            let mut inbox = entry.cell.read(en).unwrap_or_default();
            inbox.push(values.clone());
            entry.cell.set(en, inbox)?;
        }
        Ok(())
    }

    /// Indices of the patterns matching a message.
    fn matching(&self, values: &[T]) -> Vec<usize> {
        let mut out = Vec::new();
        for (pos, value) in values.iter().enumerate() {
            if let Some(candidates) = self.index.get(&(pos, value.clone())) {
                for &id in candidates {
                    if matches(&self.patterns[id].pattern, values) {
                        out.push(id);
                    }
                }
            }
        }
        for &id in &self.wildcards {
            if matches(&self.patterns[id].pattern, values) {
                out.push(id);
            }
        }
        out
    }

    /// Number of registered patterns.
    #[inline]
    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }
}

/// Full pattern check: same length, every non-wildcard slot equal.
fn matches<T: PartialEq>(pattern: &[Option<T>], values: &[T]) -> bool {
    pattern.len() == values.len()
        && pattern
            .iter()
            .zip(values)
            .all(|(slot, v)| match slot {
                Some(p) => p == v,
                None => true,
            })
}
