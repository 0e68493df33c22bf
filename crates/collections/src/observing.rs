//! A windowed key -> value observer.
//!
//! `ObservingMap` watches a set of keys through a reactive lookup
//! function. Each pass in which a watched value changes (or a key is
//! added) publishes a discrete `changes` map of key -> (new, old); a
//! newly added key reports `(new, new)`. Removing a key is not reported,
//! it just stops being watched.

use crate::SetCell;
use alloc::boxed::Box;
use alloc::rc::Rc;
use core::hash::Hash;
use hashbrown::HashMap;
use weft_cells::{Cell, Discrete};
use weft_engine::{Engine, ListenerId, ListenerSpec, Result};

/// A reactive lookup: reads cells through the engine, so the map re-runs
/// when anything it read changes.
pub type LookupFn<K, V> = Rc<dyn Fn(&mut Engine, &K) -> Result<V>>;

/// Observes `lookup(key)` for every key in a window set.
pub struct ObservingMap<K, V> {
    keys: SetCell<K>,
    cache: Cell<HashMap<K, V>>,
    changes: Discrete<HashMap<K, (V, V)>>,
    listener: ListenerId,
}

impl<K, V> Clone for ObservingMap<K, V> {
    fn clone(&self) -> Self {
        Self {
            keys: self.keys,
            cache: self.cache,
            changes: self.changes,
            listener: self.listener,
        }
    }
}

impl<K, V> Copy for ObservingMap<K, V> {}

impl<K, V> ObservingMap<K, V>
where
    K: Clone + Eq + Hash + 'static,
    V: Clone + PartialEq + 'static,
{
    /// Builds the map over a key-set cell and a lookup function.
    pub fn new(
        en: &mut Engine,
        keys: SetCell<K>,
        lookup: impl Fn(&mut Engine, &K) -> Result<V> + 'static,
    ) -> Result<Self> {
        let cache = Cell::new(en, HashMap::new());
        let changes = Discrete::new(en, HashMap::new());
        let cache_subject = cache.subject();
        let lookup: LookupFn<K, V> = Rc::new(lookup);

        let listener = en.add_listener(
            ListenerSpec {
                eager: true,
                output: Some(cache_subject),
                ..ListenerSpec::default()
            },
            Box::new(move |en| {
                let window = keys.get(en)?;
                let old: HashMap<K, V> = en.value(cache_subject).unwrap_or_default();
                let mut fresh: HashMap<K, V> = HashMap::new();
                let mut delta: HashMap<K, (V, V)> = HashMap::new();
                for k in window.iter() {
                    let v = lookup(en, k)?;
                    match old.get(k) {
                        Some(previous) if *previous == v => {}
                        Some(previous) => {
                            delta.insert(k.clone(), (v.clone(), previous.clone()));
                        }
                        None => {
                            delta.insert(k.clone(), (v.clone(), v.clone()));
                        }
                    }
                    fresh.insert(k.clone(), v);
                }
                en.write_value(cache_subject, fresh)?;
                if !delta.is_empty() {
                    changes.set(en, delta)?;
                }
                Ok(())
            }),
        );
        en.atomically(|en| en.schedule(listener, None))?;

        Ok(Self {
            keys,
            cache,
            changes,
            listener,
        })
    }

    /// The key window.
    #[inline]
    pub fn keys(&self) -> SetCell<K> {
        self.keys
    }

    /// The discrete change map, for observers.
    #[inline]
    pub fn changes(&self) -> Discrete<HashMap<K, (V, V)>> {
        self.changes
    }

    /// Adds a key to the window.
    pub fn watch(&self, en: &mut Engine, key: K) -> Result<()> {
        self.keys.update(en, move |s| {
            s.insert(key);
        })
    }

    /// Removes a key from the window. Not reported through `changes`.
    pub fn unwatch(&self, en: &mut Engine, key: &K) -> Result<()> {
        let k = key.clone();
        self.keys.update(en, move |s| {
            s.remove(&k);
        })
    }

    /// Tracked read of the cached key -> value map.
    pub fn get(&self, en: &mut Engine) -> Result<HashMap<K, V>> {
        self.cache.get(en)
    }

    /// Untracked read.
    pub fn read(&self, en: &Engine) -> HashMap<K, V> {
        self.cache.read(en).unwrap_or_default()
    }

    pub fn dispose(self, en: &mut Engine) {
        en.dispose_listener(self.listener);
        self.cache.dispose(en);
    }
}
