//! A sorted view over a reactive set, with a slice-edit change log.
//!
//! The view orders the members of a set cell by a key function, forward
//! or reversed. Every pass that alters the view publishes a list of
//! `SliceEdit`s through a discrete `changes` cell: positions are in
//! old-view coordinates, edits are emitted rightmost first, and adjacent
//! runs are coalesced, so a consumer can patch an existing rendering
//! instead of rebuilding it. Changing the key function or the reverse
//! flag publishes one full-view edit.

use crate::SetCell;
use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec;
use alloc::vec::Vec;
use core::cell::RefCell;
use core::cmp::Ordering;
use core::hash::Hash;
use hashbrown::HashSet;
use weft_cells::{Cell, Discrete};
use weft_engine::{Engine, ListenerId, ListenerSpec, Result};

/// One slice replacement: the half-open range `start..end` of the old
/// view is replaced by `new_len` elements of the new view.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SliceEdit {
    pub start: usize,
    pub end: usize,
    pub new_len: usize,
}

impl SliceEdit {
    pub fn new(start: usize, end: usize, new_len: usize) -> Self {
        Self {
            start,
            end,
            new_len,
        }
    }
}

/// Computes the slice edits turning `old` into `new`.
///
/// Both slices must be sorted by `key` (reversed when `rev` is set).
/// Edits come out rightmost first in old-view coordinates, adjacent
/// deletion/insertion runs merged into one edit.
pub fn diff_sorted<T, K, F>(old: &[T], new: &[T], key: F, rev: bool) -> Vec<SliceEdit>
where
    T: PartialEq,
    K: Ord,
    F: Fn(&T) -> K,
{
    let cmp = |a: &T, b: &T| {
        let o = key(a).cmp(&key(b));
        if rev {
            o.reverse()
        } else {
            o
        }
    };

    let mut edits: Vec<SliceEdit> = Vec::new();
    // (old start, deleted, inserted) of the open run
    let mut run: Option<(usize, usize, usize)> = None;

    let (mut i, mut j) = (0, 0);
    while i < old.len() && j < new.len() {
        if old[i] == new[j] {
            flush(&mut run, &mut edits);
            i += 1;
            j += 1;
            continue;
        }
        match cmp(&old[i], &new[j]) {
            Ordering::Less => {
                extend(&mut run, &mut edits, i, 1, 0);
                i += 1;
            }
            Ordering::Greater => {
                extend(&mut run, &mut edits, i, 0, 1);
                j += 1;
            }
            Ordering::Equal => {
                extend(&mut run, &mut edits, i, 1, 1);
                i += 1;
                j += 1;
            }
        }
    }
    if i < old.len() {
        extend(&mut run, &mut edits, i, old.len() - i, 0);
    }
    if j < new.len() {
        extend(&mut run, &mut edits, old.len(), 0, new.len() - j);
    }
    flush(&mut run, &mut edits);

    edits.reverse();
    edits
}

/// Closes the open run, if any, as one slice edit.
fn flush(run: &mut Option<(usize, usize, usize)>, edits: &mut Vec<SliceEdit>) {
    if let Some((start, deleted, inserted)) = run.take() {
        edits.push(SliceEdit::new(start, start + deleted, inserted));
    }
}

/// Grows the open run at old position `at`, or starts a fresh one if
/// the run is not adjacent.
fn extend(
    run: &mut Option<(usize, usize, usize)>,
    edits: &mut Vec<SliceEdit>,
    at: usize,
    deleted: usize,
    inserted: usize,
) {
    match run {
        Some((start, d, n)) if *start + *d == at => {
            *d += deleted;
            *n += inserted;
        }
        _ => {
            flush(run, edits);
            *run = Some((at, deleted, inserted));
        }
    }
}

type KeySlot<T, K> = Rc<RefCell<Rc<dyn Fn(&T) -> K>>>;

/// An ordered index over a set cell.
pub struct SortedView<T, K> {
    set: SetCell<T>,
    view: Cell<Vec<T>>,
    changes: Discrete<Vec<SliceEdit>>,
    reverse: Cell<bool>,
    key_gen: Cell<u64>,
    key: KeySlot<T, K>,
    listener: ListenerId,
}

impl<T, K> Clone for SortedView<T, K> {
    fn clone(&self) -> Self {
        Self {
            set: self.set,
            view: self.view,
            changes: self.changes,
            reverse: self.reverse,
            key_gen: self.key_gen,
            key: self.key.clone(),
            listener: self.listener,
        }
    }
}

impl<T, K> SortedView<T, K>
where
    T: Clone + Eq + Hash + 'static,
    K: Ord + 'static,
{
    /// Builds the view over an initial membership.
    pub fn new(
        en: &mut Engine,
        initial: impl IntoIterator<Item = T>,
        key: impl Fn(&T) -> K + 'static,
        reverse: bool,
    ) -> Result<Self> {
        let keyf: Rc<dyn Fn(&T) -> K> = Rc::new(key);
        let key_slot: KeySlot<T, K> = Rc::new(RefCell::new(keyf.clone()));

        let members: HashSet<T> = initial.into_iter().collect();
        let mut first: Vec<T> = members.iter().cloned().collect();
        first.sort_by(|a, b| {
            let o = keyf(a).cmp(&keyf(b));
            if reverse {
                o.reverse()
            } else {
                o
            }
        });

        let set = Cell::new(en, members);
        let view = Cell::new(en, first);
        let changes = Discrete::new(en, Vec::new());
        let reverse_cell = Cell::new(en, reverse);
        let key_gen = Cell::new(en, 0_u64);

        let view_subject = view.subject();
        let slot = key_slot.clone();
        let mut last_gen = 0_u64;
        let mut last_rev = reverse;
        let listener = en.add_listener(
            ListenerSpec {
                eager: true,
                output: Some(view_subject),
                ..ListenerSpec::default()
            },
            Box::new(move |en| {
                let members = set.get(en)?;
                let rev = reverse_cell.get(en)?;
                let gen = key_gen.get(en)?;
                let keyf = slot.borrow().clone();

                let mut new_view: Vec<T> = members.iter().cloned().collect();
                new_view.sort_by(|a, b| {
                    let o = keyf(a).cmp(&keyf(b));
                    if rev {
                        o.reverse()
                    } else {
                        o
                    }
                });

                let old_view: Vec<T> = en.value(view_subject).unwrap_or_default();
                let full = gen != last_gen || rev != last_rev;
                last_gen = gen;
                last_rev = rev;

                let edits = if full {
                    if old_view == new_view {
                        Vec::new()
                    } else {
                        vec![SliceEdit::new(0, old_view.len(), new_view.len())]
                    }
                } else {
                    diff_sorted(&old_view, &new_view, |t| keyf(t), rev)
                };

                en.write_value(view_subject, new_view)?;
                if !edits.is_empty() {
                    changes.set(en, edits)?;
                }
                Ok(())
            }),
        );
        en.atomically(|en| en.schedule(listener, None))?;

        Ok(Self {
            set,
            view,
            changes,
            reverse: reverse_cell,
            key_gen,
            key: key_slot,
            listener,
        })
    }

    /// The underlying set cell.
    #[inline]
    pub fn set_cell(&self) -> SetCell<T> {
        self.set
    }

    /// The discrete change-log cell, for observers.
    #[inline]
    pub fn changes(&self) -> Discrete<Vec<SliceEdit>> {
        self.changes
    }

    /// Adds a member.
    pub fn add(&self, en: &mut Engine, value: T) -> Result<()> {
        self.set.update(en, |s| {
            s.insert(value);
        })
    }

    /// Removes a member.
    pub fn remove(&self, en: &mut Engine, value: &T) -> Result<()> {
        let v = value.clone();
        self.set.update(en, move |s| {
            s.remove(&v);
        })
    }

    /// Tracked read of the sorted view.
    pub fn get(&self, en: &mut Engine) -> Result<Vec<T>> {
        self.view.get(en)
    }

    /// Untracked read of the sorted view.
    pub fn read(&self, en: &Engine) -> Vec<T> {
        self.view.read(en).unwrap_or_default()
    }

    /// Flips the ordering; the next pass publishes a full-view edit.
    pub fn set_reverse(&self, en: &mut Engine, reverse: bool) -> Result<()> {
        self.reverse.set(en, reverse)
    }

    /// Swaps the key function; the next pass publishes a full-view edit.
    pub fn set_key(&self, en: &mut Engine, key: impl Fn(&T) -> K + 'static) -> Result<()> {
        *self.key.borrow_mut() = Rc::new(key);
        self.key_gen.update(en, |g| *g += 1)
    }

    pub fn dispose(self, en: &mut Engine) {
        en.dispose_listener(self.listener);
        self.view.dispose(en);
        self.set.dispose(en);
    }
}
