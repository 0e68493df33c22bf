//! Lazily evaluated rule cells.

use alloc::boxed::Box;
use core::marker::PhantomData;
use weft_engine::{Engine, Error, ListenerId, ListenerSpec, Result, RuleFn, SubjectId};

/// A cell whose value is derived by a rule, re-evaluated on read.
///
/// The rule does not run when the cell is created. The first tracked
/// read runs it and records its dependencies; afterwards a dependency
/// change either marks the cell stale (recompute on next read) or, when
/// other listeners depend on its output, schedules it eagerly so the
/// pass settles glitch-free.
///
/// A run that records no reads proves the rule depends on nothing; the
/// listener is retired and the cell degrades to a constant.
pub struct Computed<T> {
    subject: SubjectId,
    listener: ListenerId,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Computed<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Computed<T> {}

impl<T: Clone + PartialEq + 'static> Computed<T> {
    /// Creates the cell. The rule runs on first read, not now.
    pub fn new(
        en: &mut Engine,
        mut rule: impl FnMut(&mut Engine) -> Result<T> + 'static,
    ) -> Self {
        let subject = en.add_subject(0);
        let wrapped: RuleFn = Box::new(move |en| {
            let v = rule(en)?;
            en.write_value(subject, v).map(|_| ())
        });
        let listener = en.add_listener(
            ListenerSpec {
                eager: false,
                output: Some(subject),
                retire_if_pure: true,
                ..ListenerSpec::default()
            },
            wrapped,
        );
        Self {
            subject,
            listener,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn subject(&self) -> SubjectId {
        self.subject
    }

    /// True once a pass has found the rule to depend on nothing.
    pub fn is_retired(&self, en: &Engine) -> bool {
        !en.listener_alive(self.listener)
    }

    /// Tracked read; evaluates the rule if the cached value is missing
    /// or stale.
    pub fn get(&self, en: &mut Engine) -> Result<T> {
        if !en.active() {
            if let Some(v) = en.value::<T>(self.subject) {
                if !en.listener_stale(self.listener) || !en.listener_alive(self.listener) {
                    return Ok(v);
                }
            }
            let cell = *self;
            return en.atomically(move |en| cell.get(en));
        }
        en.used(self.subject)?;
        let fresh =
            en.value::<T>(self.subject).is_some() && !en.listener_stale(self.listener);
        if !fresh && en.listener_alive(self.listener) {
            en.initialize(self.listener)?;
        }
        en.value::<T>(self.subject)
            .ok_or_else(|| Error::invalid_operation("computed cell has no value"))
    }

    /// Untracked read of the cached value, if any.
    pub fn read(&self, en: &Engine) -> Option<T> {
        en.value(self.subject)
    }

    pub fn dispose(self, en: &mut Engine) {
        en.dispose_listener(self.listener);
        en.dispose_subject(self.subject);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell::Cell;
    use alloc::rc::Rc;
    use core::cell::RefCell;

    #[test]
    fn test_rule_runs_on_first_read_only() {
        let mut en = Engine::new();
        let base = Cell::new(&mut en, 2_i64);

        let runs = Rc::new(RefCell::new(0));
        let r = runs.clone();
        let doubled = Computed::new(&mut en, move |en| {
            *r.borrow_mut() += 1;
            Ok(base.get(en)? * 2)
        });

        assert_eq!(*runs.borrow(), 0);
        assert_eq!(doubled.get(&mut en).unwrap(), 4);
        assert_eq!(*runs.borrow(), 1);

        // cached while nothing changed
        assert_eq!(doubled.get(&mut en).unwrap(), 4);
        assert_eq!(*runs.borrow(), 1);
    }

    #[test]
    fn test_stale_after_dependency_change() {
        let mut en = Engine::new();
        let base = Cell::new(&mut en, 1_i64);
        let plus_one = Computed::new(&mut en, move |en| Ok(base.get(en)? + 1));

        assert_eq!(plus_one.get(&mut en).unwrap(), 2);

        // no dependents: the write only marks the cell stale
        base.set(&mut en, 10).unwrap();
        assert_eq!(plus_one.read(&en), Some(2));

        // the next read recomputes
        assert_eq!(plus_one.get(&mut en).unwrap(), 11);
    }

    #[test]
    fn test_pure_rule_retires_to_constant() {
        let mut en = Engine::new();
        let runs = Rc::new(RefCell::new(0));
        let r = runs.clone();
        let c = Computed::new(&mut en, move |_| {
            *r.borrow_mut() += 1;
            Ok(7_i64)
        });

        assert_eq!(c.get(&mut en).unwrap(), 7);
        assert!(c.is_retired(&en));

        assert_eq!(c.get(&mut en).unwrap(), 7);
        assert_eq!(*runs.borrow(), 1);
    }

    #[test]
    fn test_write_after_read_marks_initialized_cell_stale() {
        let mut en = Engine::new();
        let base = Cell::new(&mut en, 1_i64);
        let plus_one = Computed::new(&mut en, move |en| Ok(base.get(en)? + 1));

        en.atomically(|en| {
            // first read initialises the rule inside this scope
            assert_eq!(plus_one.get(en)?, 2);
            // the external write invalidates that read; the next read
            // must re-evaluate, not serve the stale cache
            base.set(en, 10)?;
            assert_eq!(plus_one.get(en)?, 11);
            Ok(())
        })
        .unwrap();

        assert_eq!(plus_one.read(&en), Some(11));
    }

    #[test]
    fn test_read_within_writing_scope_sees_new_value() {
        let mut en = Engine::new();
        let base = Cell::new(&mut en, 1_i64);
        let squared = Computed::new(&mut en, move |en| {
            let v = base.get(en)?;
            Ok(v * v)
        });

        en.atomically(|en| {
            base.set(en, 5)?;
            assert_eq!(squared.get(en)?, 25);
            Ok(())
        })
        .unwrap();
    }
}
