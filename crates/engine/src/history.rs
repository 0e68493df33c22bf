//! Atomic-scope bookkeeping: undo log, commit queue, scoped managers.
//!
//! The history is the STM half of the engine. Every logged mutation
//! pushes an `UndoEntry`; rolling back replays entries in LIFO order.
//! Commit callbacks run FIFO during cleanup, before managers exit in
//! reverse registration order. A `Savepoint` captures the three lengths
//! and allows partial rollback without touching managers' exit hooks.

use alloc::boxed::Box;
use alloc::rc::Rc;
use alloc::vec::Vec;
use core::any::Any;
use core::cell::RefCell;
use weft_core::{Error, ListenerId, Result, SubjectId};

/// A scoped resource handle.
///
/// `enter` runs exactly once, when the manager is first registered in a
/// scope. `exit` runs exactly once per registration when the scope
/// terminates, successfully or not; on failure it receives the
/// propagating error. An `Err` from `exit` replaces that error for the
/// remaining exits and for the caller — it can never swallow it.
pub trait ScopeManager {
    /// Called on first registration within a scope.
    fn enter(&mut self) {}

    /// Called at scope termination with the propagating error, if any.
    fn exit(&mut self, error: Option<&Error>) -> Result<()> {
        let _ = error;
        Ok(())
    }
}

/// Shared handle to a scoped manager, deduplicated by identity.
pub type ManagerHandle = Rc<RefCell<dyn ScopeManager>>;

/// A commit callback. Runs during cleanup; a failure aborts the scope.
pub type CommitFn = Box<dyn FnOnce(&mut crate::Engine) -> Result<()>>;

/// One entry of the undo log.
///
/// Undo application is infallible: the closure variant returns nothing,
/// so an undo step cannot abort the replay.
pub enum UndoEntry {
    /// Restore a subject's payload.
    Value {
        subject: SubjectId,
        old: Option<Box<dyn Any>>,
    },
    /// Restore the per-pass change mark of a subject.
    ChangeMark {
        subject: SubjectId,
        prev: Option<Option<ListenerId>>,
    },
    /// Arbitrary restoration registered through `on_undo`.
    Closure(Box<dyn FnOnce(&mut crate::Engine)>),
}

/// A captured (undo, commit, manager) length triple.
#[derive(Clone, Copy, Debug)]
pub struct Savepoint {
    pub(crate) undo: usize,
    pub(crate) commit: usize,
    pub(crate) managers: usize,
}

/// Mutable scope state embedded in the engine.
pub(crate) struct History {
    pub(crate) active: bool,
    pub(crate) in_cleanup: bool,
    pub(crate) undo: Vec<UndoEntry>,
    /// Commit queue. Entries are taken (not popped) during the drain so
    /// savepoint truncation by length stays meaningful beforehand and
    /// callbacks may enqueue more while the drain runs.
    pub(crate) commit: Vec<Option<CommitFn>>,
    pub(crate) commit_cursor: usize,
    pub(crate) managers: Vec<ManagerHandle>,
}

impl History {
    pub(crate) fn new() -> Self {
        Self {
            active: false,
            in_cleanup: false,
            undo: Vec::new(),
            commit: Vec::new(),
            commit_cursor: 0,
            managers: Vec::new(),
        }
    }

    /// Captures the current scope lengths.
    pub(crate) fn savepoint(&self) -> Savepoint {
        Savepoint {
            undo: self.undo.len(),
            commit: self.commit.len(),
            managers: self.managers.len(),
        }
    }

    /// Registers a manager once per scope, running its enter hook on
    /// first registration.
    pub(crate) fn add_manager(&mut self, manager: ManagerHandle) {
        if self.managers.iter().any(|m| Rc::ptr_eq(m, &manager)) {
            return;
        }
        manager.borrow_mut().enter();
        self.managers.push(manager);
    }

    /// Clears all scope state. Managers must have exited already.
    pub(crate) fn reset(&mut self) {
        self.active = false;
        self.in_cleanup = false;
        self.undo.clear();
        self.commit.clear();
        self.commit_cursor = 0;
        self.managers.clear();
    }
}
