//! Plain value cells and discrete (self-resetting) cells.
//!
//! A `Cell` is a writable piece of reactive state: reads inside an
//! atomic scope are recorded as dependencies, writes are logged,
//! equality-damped and schedule the cell's readers. The `constant`
//! variant rejects writes. A `Discrete` additionally snaps back to its
//! sentinel when the scope commits, so its written value is visible only
//! to the listeners and observers of the writing pass.

use core::marker::PhantomData;
use weft_engine::{Engine, Error, Result, SubjectId};

/// Registers a commit-time reset of `subject` to the value held by the
/// companion `sentinel` subject.
pub(crate) fn schedule_reset<T: Clone + 'static>(
    en: &mut Engine,
    subject: SubjectId,
    sentinel: SubjectId,
) -> Result<()> {
    en.on_commit(move |en| {
        if let Some(v) = en.value::<T>(sentinel) {
            en.write_value_silent(subject, v)?;
        }
        Ok(())
    })
}

/// A writable reactive value cell.
pub struct Cell<T> {
    subject: SubjectId,
    constant: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Cell<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Cell<T> {}

impl<T: Clone + PartialEq + 'static> Cell<T> {
    /// Creates a writable cell holding `value`.
    pub fn new(en: &mut Engine, value: T) -> Self {
        let subject = en.add_subject(0);
        en.seed_value(subject, value);
        Self {
            subject,
            constant: false,
            _marker: PhantomData,
        }
    }

    /// Creates a constant cell. Reads are not tracked and writes fail.
    pub fn constant(en: &mut Engine, value: T) -> Self {
        let subject = en.add_subject(0);
        en.seed_value(subject, value);
        Self {
            subject,
            constant: true,
            _marker: PhantomData,
        }
    }

    /// The underlying subject id.
    #[inline]
    pub fn subject(&self) -> SubjectId {
        self.subject
    }

    /// Tracked read. Inside a scope this records the dependency; outside
    /// it behaves like `read`.
    pub fn get(&self, en: &mut Engine) -> Result<T> {
        if en.active() && !self.constant {
            en.used(self.subject)?;
        }
        en.value::<T>(self.subject)
            .ok_or_else(|| Error::invalid_operation("cell has no value"))
    }

    /// Untracked read.
    pub fn read(&self, en: &Engine) -> Option<T> {
        en.value(self.subject)
    }

    /// Logged, damped write. Outside a scope this opens one.
    pub fn set(&self, en: &mut Engine, value: T) -> Result<()> {
        if self.constant {
            return Err(Error::invalid_operation("cannot write a constant cell"));
        }
        if !en.active() {
            let cell = *self;
            return en.atomically(move |en| cell.set(en, value));
        }
        en.write_value(self.subject, value).map(|_| ())
    }

    /// Read-modify-write convenience.
    pub fn update(&self, en: &mut Engine, f: impl FnOnce(&mut T)) -> Result<()> {
        if !en.active() {
            let cell = *self;
            return en.atomically(move |en| cell.update(en, f));
        }
        let mut value = self.get(en)?;
        f(&mut value);
        self.set(en, value)
    }

    /// Removes the cell's subject from the graph.
    pub fn dispose(self, en: &mut Engine) {
        en.dispose_subject(self.subject);
    }
}

/// A cell whose written value lasts for exactly one pass.
///
/// Writes behave like `Cell` writes, but when the scope commits the cell
/// snaps back to its sentinel. Observers of the writing pass see the
/// transient value; external reads afterwards see the sentinel.
pub struct Discrete<T> {
    subject: SubjectId,
    sentinel: SubjectId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Discrete<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Discrete<T> {}

impl<T: Clone + PartialEq + 'static> Discrete<T> {
    /// Creates a discrete cell resting at `sentinel`.
    pub fn new(en: &mut Engine, sentinel: T) -> Self {
        let subject = en.add_subject(0);
        en.seed_value(subject, sentinel.clone());
        let companion = en.add_subject(0);
        en.seed_value(companion, sentinel);
        Self {
            subject,
            sentinel: companion,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn subject(&self) -> SubjectId {
        self.subject
    }

    /// Tracked read of the current (possibly transient) value.
    pub fn get(&self, en: &mut Engine) -> Result<T> {
        if en.active() {
            en.used(self.subject)?;
        }
        en.value::<T>(self.subject)
            .ok_or_else(|| Error::invalid_operation("cell has no value"))
    }

    /// Untracked read.
    pub fn read(&self, en: &Engine) -> Option<T> {
        en.value(self.subject)
    }

    /// Writes the transient value and arms the commit-time reset.
    pub fn set(&self, en: &mut Engine, value: T) -> Result<()> {
        if !en.active() {
            let cell = *self;
            return en.atomically(move |en| cell.set(en, value));
        }
        let changed = en.write_value(self.subject, value)?;
        if changed {
            schedule_reset::<T>(en, self.subject, self.sentinel)?;
        }
        Ok(())
    }

    pub fn dispose(self, en: &mut Engine) {
        en.dispose_subject(self.subject);
        en.dispose_subject(self.sentinel);
    }
}
