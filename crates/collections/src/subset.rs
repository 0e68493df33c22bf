//! A set constrained to membership in a base set.

use crate::SetCell;
use alloc::boxed::Box;
use core::hash::Hash;
use hashbrown::HashSet;
use weft_cells::Cell;
use weft_engine::{Engine, ListenerId, ListenerSpec, Result};

/// A reactive subset of a base set cell.
///
/// Adding a value that is not in the base is silently dropped. When a
/// member disappears from the base, it disappears from the subset in the
/// same pass.
pub struct Subset<T> {
    base: SetCell<T>,
    items: SetCell<T>,
    listener: ListenerId,
}

impl<T> Clone for Subset<T> {
    fn clone(&self) -> Self {
        Self {
            base: self.base,
            items: self.items,
            listener: self.listener,
        }
    }
}

impl<T> Copy for Subset<T> {}

impl<T: Clone + Eq + Hash + 'static> Subset<T> {
    /// Creates an empty subset of `base`.
    pub fn new(en: &mut Engine, base: SetCell<T>) -> Result<Self> {
        let items = Cell::new(en, HashSet::new());
        let items_subject = items.subject();
        let listener = en.add_listener(
            ListenerSpec {
                eager: true,
                output: Some(items_subject),
                ..ListenerSpec::default()
            },
            Box::new(move |en| {
                let allowed = base.get(en)?;
                let current: HashSet<T> = en.value(items_subject).unwrap_or_default();
                let retained: HashSet<T> = current
                    .iter()
                    .filter(|v| allowed.contains(*v))
                    .cloned()
                    .collect();
                en.write_value(items_subject, retained).map(|_| ())
            }),
        );
        en.atomically(|en| en.schedule(listener, None))?;
        Ok(Self {
            base,
            items,
            listener,
        })
    }

    /// The base set cell this subset is constrained by.
    #[inline]
    pub fn base(&self) -> SetCell<T> {
        self.base
    }

    /// Adds a value; non-members of the base are silently dropped.
    pub fn add(&self, en: &mut Engine, value: T) -> Result<()> {
        let cell = *self;
        if !en.active() {
            return en.atomically(move |en| cell.add(en, value));
        }
        if !self.base.get(en)?.contains(&value) {
            return Ok(());
        }
        self.items.update(en, move |s| {
            s.insert(value);
        })
    }

    /// Removes a value from the subset (the base is untouched).
    pub fn remove(&self, en: &mut Engine, value: &T) -> Result<()> {
        let v = value.clone();
        self.items.update(en, move |s| {
            s.remove(&v);
        })
    }

    /// Tracked read of the current membership.
    pub fn get(&self, en: &mut Engine) -> Result<HashSet<T>> {
        self.items.get(en)
    }

    /// Untracked read.
    pub fn read(&self, en: &Engine) -> HashSet<T> {
        self.items.read(en).unwrap_or_default()
    }

    /// Untracked membership test.
    pub fn contains(&self, en: &Engine, value: &T) -> bool {
        self.read(en).contains(value)
    }

    pub fn dispose(self, en: &mut Engine) {
        en.dispose_listener(self.listener);
        self.items.dispose(en);
    }
}
