//! Eagerly maintained rule cells.
//!
//! A `Maintained` cell is recomputed whenever anything it read changes,
//! and is also writable from outside: a rule may read the cell's own
//! previous value and may write other cells. Mutually dependent pairs of
//! maintained cells (a temperature converter, say) settle by iterated
//! layer promotion and equality damping.
//!
//! Construction goes through `MaintainedBuilder`. `initially` and `make`
//! seed the first value (`make` closures take no engine handle, so they
//! cannot read other cells); `resetting_to` makes the cell discrete;
//! `named` labels the listener for circularity diagnostics. For cyclic
//! rule pairs, `reserve` the cells first and `define` the rules once
//! every handle exists.

use crate::cell::schedule_reset;
use alloc::boxed::Box;
use alloc::string::String;
use core::marker::PhantomData;
use weft_engine::{Engine, Error, ListenerId, ListenerSpec, Result, RuleFn, SubjectId};

/// An eager, writable rule cell.
pub struct Maintained<T> {
    subject: SubjectId,
    listener: ListenerId,
    reset: Option<SubjectId>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Maintained<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Maintained<T> {}

/// Typed construction options for a maintained cell.
pub struct MaintainedBuilder<T> {
    initially: Option<T>,
    make: Option<Box<dyn FnOnce() -> T>>,
    resetting_to: Option<T>,
    name: Option<String>,
}

impl<T: Clone + PartialEq + 'static> Maintained<T> {
    /// Starts a builder with no options set.
    pub fn build() -> MaintainedBuilder<T> {
        MaintainedBuilder {
            initially: None,
            make: None,
            resetting_to: None,
            name: None,
        }
    }

    /// One-step construction without options.
    pub fn new(
        en: &mut Engine,
        rule: impl FnMut(&mut Engine) -> Result<T> + 'static,
    ) -> Result<Self> {
        Self::build().define(en, rule)
    }

    #[inline]
    pub fn subject(&self) -> SubjectId {
        self.subject
    }

    /// Attaches the rule to a reserved cell and runs it once to
    /// establish dependencies.
    pub fn define(
        &self,
        en: &mut Engine,
        mut rule: impl FnMut(&mut Engine) -> Result<T> + 'static,
    ) -> Result<()> {
        let subject = self.subject;
        let reset = self.reset;
        let wrapped: RuleFn = Box::new(move |en| {
            let v = rule(en)?;
            let changed = en.write_value(subject, v)?;
            if changed {
                if let Some(sentinel) = reset {
                    schedule_reset::<T>(en, subject, sentinel)?;
                }
            }
            Ok(())
        });
        en.set_rule(self.listener, wrapped);
        let listener = self.listener;
        en.atomically(move |en| en.schedule(listener, None))
    }

    /// Tracked read.
    pub fn get(&self, en: &mut Engine) -> Result<T> {
        if en.active() {
            en.used(self.subject)?;
        }
        en.value::<T>(self.subject)
            .ok_or_else(|| Error::invalid_operation("maintained cell has no value"))
    }

    /// Untracked read.
    pub fn read(&self, en: &Engine) -> Option<T> {
        en.value(self.subject)
    }

    /// External write. The rule still reruns when its inputs change.
    pub fn set(&self, en: &mut Engine, value: T) -> Result<()> {
        if !en.active() {
            let cell = *self;
            return en.atomically(move |en| cell.set(en, value));
        }
        let changed = en.write_value(self.subject, value)?;
        if changed {
            if let Some(sentinel) = self.reset {
                schedule_reset::<T>(en, self.subject, sentinel)?;
            }
        }
        Ok(())
    }

    pub fn dispose(self, en: &mut Engine) {
        en.dispose_listener(self.listener);
        en.dispose_subject(self.subject);
        if let Some(sentinel) = self.reset {
            en.dispose_subject(sentinel);
        }
    }
}

impl<T: Clone + PartialEq + 'static> MaintainedBuilder<T> {
    /// Seeds the cell's first value.
    pub fn initially(mut self, value: T) -> Self {
        self.initially = Some(value);
        self
    }

    /// Seeds the first value from a closure run once at reserve time.
    /// The closure takes no engine handle and so cannot read other
    /// cells.
    pub fn make(mut self, f: impl FnOnce() -> T + 'static) -> Self {
        self.make = Some(Box::new(f));
        self
    }

    /// Makes the cell discrete: after any pass that wrote it, the value
    /// snaps back to `sentinel` at commit.
    pub fn resetting_to(mut self, sentinel: T) -> Self {
        self.resetting_to = Some(sentinel);
        self
    }

    /// Labels the cell for circularity diagnostics.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Creates the cell without a rule. The handle can be captured by
    /// other rules before `define` attaches this cell's own rule.
    pub fn reserve(self, en: &mut Engine) -> Maintained<T> {
        let subject = en.add_subject(0);
        let reset = self.resetting_to.map(|sentinel| {
            let companion = en.add_subject(0);
            en.seed_value(companion, sentinel.clone());
            en.seed_value(subject, sentinel);
            companion
        });
        let seed = match self.initially {
            Some(v) => Some(v),
            None => self.make.map(|f| f()),
        };
        if let Some(v) = seed {
            en.seed_value(subject, v);
        }
        let listener = en.add_listener(
            ListenerSpec {
                eager: true,
                output: Some(subject),
                name: self.name,
                ..ListenerSpec::default()
            },
            Box::new(|_| Ok(())),
        );
        Maintained {
            subject,
            listener,
            reset,
            _marker: PhantomData,
        }
    }

    /// Reserves and defines in one step.
    pub fn define(
        self,
        en: &mut Engine,
        rule: impl FnMut(&mut Engine) -> Result<T> + 'static,
    ) -> Result<Maintained<T>> {
        let cell = self.reserve(en);
        cell.define(en, rule)?;
        Ok(cell)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Cell;

    #[test]
    fn test_initially_seeds_value() {
        let mut en = Engine::new();
        let base = Cell::new(&mut en, 0_i64);
        let m = Maintained::build()
            .initially(99_i64)
            .define(&mut en, move |en| base.get(en))
            .unwrap();

        // the rule ran at define time and overwrote the seed
        assert_eq!(m.read(&en), Some(0));
    }

    #[test]
    fn test_make_seeds_value() {
        let mut en = Engine::new();
        let m = Maintained::build()
            .make(|| 7_i64)
            .reserve(&mut en);
        assert_eq!(m.read(&en), Some(7));
    }

    #[test]
    fn test_recomputes_when_dependency_changes() {
        let mut en = Engine::new();
        let base = Cell::new(&mut en, 1_i64);
        let m = Maintained::new(&mut en, move |en| Ok(base.get(en)? * 10)).unwrap();

        assert_eq!(m.read(&en), Some(10));
        base.set(&mut en, 3).unwrap();
        assert_eq!(m.read(&en), Some(30));
    }

    #[test]
    fn test_rule_may_read_previous_value() {
        let mut en = Engine::new();
        let tick = Cell::new(&mut en, 0_i64);
        let m = Maintained::build().initially(0_i64).reserve(&mut en);
        m.define(&mut en, move |en| {
            let previous = m.get(en)?;
            let t = tick.get(en)?;
            Ok(previous + t)
        })
        .unwrap();

        tick.set(&mut en, 5).unwrap();
        assert_eq!(m.read(&en), Some(5));
        tick.set(&mut en, 3).unwrap();
        assert_eq!(m.read(&en), Some(8));
    }

    #[test]
    fn test_external_write_sticks_until_recompute() {
        let mut en = Engine::new();
        let base = Cell::new(&mut en, 1_i64);
        let m = Maintained::new(&mut en, move |en| Ok(base.get(en)? + 1)).unwrap();

        m.set(&mut en, 50).unwrap();
        assert_eq!(m.read(&en), Some(50));

        // a dependency change reasserts the rule
        base.set(&mut en, 5).unwrap();
        assert_eq!(m.read(&en), Some(6));
    }

    #[test]
    fn test_resetting_to_makes_cell_discrete() {
        let mut en = Engine::new();
        let events = Maintained::build()
            .resetting_to(0_i64)
            .reserve(&mut en);

        en.atomically(|en| {
            events.set(en, 5)?;
            assert_eq!(events.get(en)?, 5);
            Ok(())
        })
        .unwrap();

        assert_eq!(events.read(&en), Some(0));
    }
}
