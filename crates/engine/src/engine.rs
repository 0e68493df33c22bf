//! The engine: atomic scopes plus the layered recalculation loop.
//!
//! External code enters through `atomically`. While the body runs, cell
//! code records reads with `used` and logged writes with `write_value`/
//! `changed`; the engine builds the dependency graph as a side effect
//! and queues dirty listeners. When the body returns, the engine drains
//! the schedule lowest layer first until quiescence, runs observers in a
//! read-only phase, drains commit callbacks, and finally exits scoped
//! managers. Any error unwinds the whole scope through the undo log.
//!
//! # Order inversions
//!
//! A listener that writes a subject some earlier-run listener already
//! read this pass has proven the schedule wrong. The write surfaces the
//! internal `Error::Inverted` signal; the loop rewinds the scope to the
//! micro-savepoint taken just before the invalidated reader ran,
//! promotes the reader above the writer, and requeues everything that
//! was rewound. A repeated inversion between the same two listeners, or
//! a cycle in the promotion edges, is a genuine write/read cycle and
//! raises `Circularity`.

use crate::graph::{Graph, ListenerSpec, RuleFn};
use crate::history::{CommitFn, History, ManagerHandle, Savepoint, UndoEntry};
use crate::schedule::Schedule;
use alloc::boxed::Box;
use alloc::format;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use hashbrown::HashMap;
use weft_core::{Error, Layer, ListenerId, Result, SubjectId, OBSERVER_LAYER};

struct PassRecord {
    listener: ListenerId,
    savepoint: Savepoint,
}

/// The reactive engine. One per logical thread of control; it is not
/// `Sync` and all operations take `&mut self`.
pub struct Engine {
    graph: Graph,
    history: History,
    sched: Schedule,
    readonly: bool,
    /// Listeners currently executing, outermost first. Nested frames
    /// come from lazy initialisation during another listener's run.
    run_stack: Vec<ListenerId>,
    /// Listeners that have run in the current pass, in run order, each
    /// with the savepoint taken just before it started.
    this_pass: Vec<PassRecord>,
    /// Subject -> listener that last wrote it this pass (`None` for an
    /// external write).
    pass_writers: HashMap<SubjectId, Option<ListenerId>>,
    /// (writer, rewound reader) pairs recorded by inversion recovery.
    inversions: Vec<(ListenerId, ListenerId)>,
    /// Promotion edges writer -> reader, for cycle detection.
    promo_edges: Vec<(ListenerId, ListenerId)>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    /// Creates an idle engine.
    pub fn new() -> Self {
        Self {
            graph: Graph::new(),
            history: History::new(),
            sched: Schedule::new(),
            readonly: false,
            run_stack: Vec::new(),
            this_pass: Vec::new(),
            pass_writers: HashMap::new(),
            inversions: Vec::new(),
            promo_edges: Vec::new(),
        }
    }

    // ----- scope state ----------------------------------------------------

    /// True inside an atomic scope.
    #[inline]
    pub fn active(&self) -> bool {
        self.history.active
    }

    /// True during the commit/abort phase of a scope.
    #[inline]
    pub fn in_cleanup(&self) -> bool {
        self.history.in_cleanup
    }

    /// True while observers run.
    #[inline]
    pub fn readonly(&self) -> bool {
        self.readonly
    }

    /// The listener currently executing, if any.
    #[inline]
    pub fn current_listener(&self) -> Option<ListenerId> {
        self.run_stack.last().copied()
    }

    // ----- graph administration ------------------------------------------

    /// Registers a new subject at the given layer (usually 0).
    pub fn add_subject(&mut self, layer: Layer) -> SubjectId {
        self.graph.add_subject(layer)
    }

    /// Registers a new listener.
    pub fn add_listener(
        &mut self,
        spec: ListenerSpec,
        rule: RuleFn,
    ) -> ListenerId {
        self.graph.add_listener(spec, rule)
    }

    /// Attaches a scoped manager to a subject; `lock` registers it the
    /// first time the subject is touched in a scope.
    pub fn set_manager(&mut self, subject: SubjectId, manager: ManagerHandle) {
        self.graph.set_manager(subject, manager);
    }

    /// Replaces a listener's rule. Two-phase cell construction reserves
    /// the listener with a placeholder first so mutually recursive rules
    /// can capture each other's handles.
    pub fn set_rule(&mut self, listener: ListenerId, rule: RuleFn) {
        self.graph.restore_rule(listener, rule);
    }

    /// Removes a listener, scrubbing its links from every subject chain
    /// and cancelling any pending schedule entry.
    pub fn dispose_listener(&mut self, listener: ListenerId) {
        self.cancel_quiet(listener);
        self.graph.remove_listener(listener);
    }

    /// Removes a subject and all links to it.
    pub fn dispose_subject(&mut self, subject: SubjectId) {
        self.graph.remove_subject(subject);
    }

    #[inline]
    pub fn listener_alive(&self, listener: ListenerId) -> bool {
        self.graph.listener_alive(listener)
    }

    #[inline]
    pub fn listener_stale(&self, listener: ListenerId) -> bool {
        self.graph.listener_stale(listener)
    }

    #[inline]
    pub fn listener_layer(&self, listener: ListenerId) -> Option<Layer> {
        self.graph.listener_layer(listener)
    }

    #[inline]
    pub fn subject_layer(&self, subject: SubjectId) -> Option<Layer> {
        self.graph.subject_layer(subject)
    }

    /// True if any listener currently reads the subject.
    #[inline]
    pub fn subject_observed(&self, subject: SubjectId) -> bool {
        self.graph.has_listeners(subject)
    }

    // ----- value access ---------------------------------------------------

    /// Untracked read of a subject's payload.
    pub fn value<T: Clone + 'static>(&self, subject: SubjectId) -> Option<T> {
        self.graph.value_ref(subject)?.downcast_ref::<T>().cloned()
    }

    /// Seeds a subject's payload outside any tracking. Intended for
    /// construction time, before the subject participates in a scope.
    pub fn seed_value<T: 'static>(&mut self, subject: SubjectId, value: T) {
        self.graph.set_value_raw(subject, Some(Box::new(value)));
    }

    /// Logged, equality-damped write. Records an undo entry, stores the
    /// new payload and runs the `changed` side effects. Returns false if
    /// the write was damped because the payload compared equal.
    pub fn write_value<T: PartialEq + 'static>(
        &mut self,
        subject: SubjectId,
        value: T,
    ) -> Result<bool> {
        if !self.history.active {
            return Err(Error::inactive("write_value"));
        }
        if self.history.in_cleanup {
            return Err(Error::invalid_operation(
                "tracked write during commit cleanup",
            ));
        }
        let lazy_self_write = self
            .current_listener()
            .map_or(false, |l| self.graph.lazy_output_is(l, subject));
        if self.readonly && !lazy_self_write {
            return Err(Error::read_only(subject));
        }
        self.lock(subject)?;

        let same = match self
            .graph
            .value_ref(subject)
            .and_then(|v| v.downcast_ref::<T>())
        {
            Some(old) => *old == value,
            None => false,
        };
        if same {
            return Ok(false);
        }

        let old = self.graph.set_value_raw(subject, Some(Box::new(value)));
        self.history.undo.push(UndoEntry::Value { subject, old });
        if !self.readonly {
            self.changed_inner(subject)?;
        }
        Ok(true)
    }

    /// Logged write without damping or scheduling. Used for bookkeeping
    /// writes during cleanup, such as a discrete cell's sentinel reset.
    pub fn write_value_silent<T: 'static>(
        &mut self,
        subject: SubjectId,
        value: T,
    ) -> Result<()> {
        if !self.history.active {
            return Err(Error::inactive("write_value_silent"));
        }
        let old = self.graph.set_value_raw(subject, Some(Box::new(value)));
        self.history.undo.push(UndoEntry::Value { subject, old });
        Ok(())
    }

    // ----- history surface ------------------------------------------------

    /// Runs `f` in an atomic scope. A nested call is flattened into the
    /// enclosing scope. On the outermost return the engine settles the
    /// schedule, runs observers read-only, drains commit callbacks and
    /// exits managers; any error rolls the whole scope back first.
    pub fn atomically<R>(
        &mut self,
        f: impl FnOnce(&mut Engine) -> Result<R>,
    ) -> Result<R> {
        if self.history.active {
            return f(self);
        }
        self.history.active = true;

        let result = match f(self) {
            Ok(r) => match self.settle() {
                Ok(()) => {
                    self.history.in_cleanup = true;
                    self.commit_drain().map(|()| r)
                }
                Err(e) => Err(e),
            },
            Err(e) => Err(e),
        };

        self.history.in_cleanup = true;
        match result {
            Ok(r) => {
                let pending = self.exit_managers_clean();
                self.reset_scope();
                match pending {
                    None => Ok(r),
                    Some(e) => Err(e),
                }
            }
            Err(e) => {
                self.rollback_all();
                let e = self.exit_managers_after_error(e);
                self.reset_scope();
                Err(e)
            }
        }
    }

    /// Registers a scoped manager, entering it on first registration.
    pub fn manage(&mut self, manager: ManagerHandle) -> Result<()> {
        if !self.history.active {
            return Err(Error::inactive("manage"));
        }
        self.history.add_manager(manager);
        Ok(())
    }

    /// Appends an undo callback. Undo steps are infallible by signature.
    pub fn on_undo(
        &mut self,
        f: impl FnOnce(&mut Engine) + 'static,
    ) -> Result<()> {
        if !self.history.active {
            return Err(Error::inactive("on_undo"));
        }
        self.history.undo.push(UndoEntry::Closure(Box::new(f)));
        Ok(())
    }

    /// Appends a commit callback, run FIFO before managers exit.
    pub fn on_commit(
        &mut self,
        f: impl FnOnce(&mut Engine) -> Result<()> + 'static,
    ) -> Result<()> {
        if !self.history.active {
            return Err(Error::inactive("on_commit"));
        }
        self.history.commit.push(Some(Box::new(f)));
        Ok(())
    }

    /// Captures the current (undo, commit, manager) lengths.
    pub fn savepoint(&mut self) -> Result<Savepoint> {
        if !self.history.active {
            return Err(Error::inactive("savepoint"));
        }
        Ok(self.history.savepoint())
    }

    /// Rewinds to a savepoint: replays undo entries LIFO down to the
    /// recorded length, truncates the commit queue and manager list.
    /// Manager exit hooks are not run here; only scope termination runs
    /// them.
    pub fn rollback_to(&mut self, sp: Savepoint) -> Result<()> {
        if !self.history.active {
            return Err(Error::inactive("rollback_to"));
        }
        self.rewind_history(sp);
        Ok(())
    }

    // ----- controller surface --------------------------------------------

    /// Registers the subject's manager with the scope, if it has one.
    pub fn lock(&mut self, subject: SubjectId) -> Result<()> {
        if !self.history.active {
            return Err(Error::inactive("lock"));
        }
        if let Some(m) = self.graph.subject_manager(subject) {
            self.history.add_manager(m);
        }
        Ok(())
    }

    /// Records that the current listener read the subject: links the
    /// pair and raises the listener strictly above the subject's layer
    /// and above any listener that wrote the subject this pass.
    ///
    /// Observer reads are linked (so the observer re-runs when the
    /// subject changes) but never affect layering.
    pub fn used(&mut self, subject: SubjectId) -> Result<()> {
        if !self.history.active {
            return Err(Error::inactive("used"));
        }
        self.lock(subject)?;
        let Some(current) = self.current_listener() else {
            return Ok(());
        };
        self.graph.link(subject, current);

        let Some(layer) = self.graph.listener_layer(current) else {
            return Ok(());
        };
        if layer == OBSERVER_LAYER {
            return Ok(());
        }
        let mut bound = self.graph.subject_layer(subject).unwrap_or(0);
        if let Some(Some(writer)) = self.pass_writers.get(&subject) {
            if let Some(wl) = self.graph.listener_layer(*writer) {
                bound = bound.max(wl);
            }
        }
        if layer <= bound {
            self.graph
                .set_listener_layer(current, bound.saturating_add(1));
        }
        Ok(())
    }

    /// Records that the subject was written and schedules its readers.
    ///
    /// Fails with `ReadOnly` in the observer phase. If an eager reader
    /// already ran this pass, the internal inversion signal is returned
    /// and must propagate out of the writing rule.
    pub fn changed(&mut self, subject: SubjectId) -> Result<()> {
        if !self.history.active {
            return Err(Error::inactive("changed"));
        }
        if self.readonly {
            return Err(Error::read_only(subject));
        }
        if self.history.in_cleanup {
            return Err(Error::invalid_operation(
                "tracked write during commit cleanup",
            ));
        }
        self.lock(subject)?;
        self.changed_inner(subject)
    }

    fn changed_inner(&mut self, subject: SubjectId) -> Result<()> {
        let writer = self.current_listener();
        let prev = self.pass_writers.insert(subject, writer);
        self.history
            .undo
            .push(UndoEntry::ChangeMark { subject, prev });

        let readers = self.graph.listeners_of(subject);
        let mut invalidated: Option<(usize, ListenerId)> = None;
        for reader in readers {
            if self.run_stack.contains(&reader) {
                continue;
            }
            // Only a write from inside a listener can invert the
            // schedule; an external write just (re)schedules readers,
            // ran-this-pass or not.
            if writer.is_some() && self.graph.listener_eager(reader) {
                if let Some(pos) = self.graph.pass_index(reader) {
                    // already ran this pass on the old value
                    match invalidated {
                        Some((best, _)) if best <= pos => {}
                        _ => invalidated = Some((pos, reader)),
                    }
                    continue;
                }
            }
            self.mark_reader(reader, writer)?;
        }

        if let Some((_, reader)) = invalidated {
            return Err(Error::Inverted { reader });
        }
        Ok(())
    }

    /// Schedules or defers one reader after a write.
    fn mark_reader(
        &mut self,
        reader: ListenerId,
        writer: Option<ListenerId>,
    ) -> Result<()> {
        if !self.graph.listener_alive(reader) {
            return Ok(());
        }
        if !self.graph.listener_eager(reader) {
            self.graph.set_listener_stale(reader, true);
            let demanded = self
                .graph
                .listener_output(reader)
                .map_or(false, |out| self.graph.has_listeners(out));
            if !demanded {
                // no one depends on it; recompute on next read
                return Ok(());
            }
        }
        let source = writer.and_then(|w| self.graph.listener_layer(w));
        self.schedule(reader, source)
    }

    /// Inserts a listener into the schedule. With `source_layer` given,
    /// the listener is first promoted strictly above it, and the
    /// promotion propagates to readers of anything it wrote this pass.
    pub fn schedule(
        &mut self,
        listener: ListenerId,
        source_layer: Option<Layer>,
    ) -> Result<()> {
        if !self.history.active {
            return Err(Error::inactive("schedule"));
        }
        if !self.graph.listener_alive(listener) {
            return Ok(());
        }
        if let Some(source) = source_layer {
            let layer = self.graph.listener_layer(listener).unwrap_or(0);
            if layer != OBSERVER_LAYER && source >= layer {
                let mut trail = Vec::new();
                self.promote(listener, source.saturating_add(1), &mut trail)?;
            }
        }
        self.enqueue(listener);
        Ok(())
    }

    /// Removes a listener from the schedule if present.
    pub fn cancel(&mut self, listener: ListenerId) -> Result<()> {
        if !self.history.active {
            return Err(Error::inactive("cancel"));
        }
        self.cancel_quiet(listener);
        Ok(())
    }

    /// Runs a listener as if it had already run this pass, so later
    /// writes to what it read are detected as inversions. Used by lazy
    /// cells on first (or stale) read.
    pub fn initialize(&mut self, listener: ListenerId) -> Result<()> {
        if !self.history.active {
            return Err(Error::inactive("initialize"));
        }
        if !self.graph.listener_alive(listener) {
            return Ok(());
        }
        if self.graph.pass_index(listener).is_some()
            && !self.graph.listener_stale(listener)
        {
            return Ok(());
        }
        self.cancel_quiet(listener);
        let sp = self.history.savepoint();
        self.begin_run(listener, sp);
        self.run_rule(listener)
    }

    // ----- scheduling internals ------------------------------------------

    fn enqueue(&mut self, listener: ListenerId) {
        if self.graph.listener_queued_at(listener).is_some() {
            return;
        }
        let Some(layer) = self.graph.listener_layer(listener) else {
            return;
        };
        self.sched.push(layer, listener);
        self.graph.set_listener_queued(listener, Some(layer));
    }

    fn cancel_quiet(&mut self, listener: ListenerId) {
        if let Some(at) = self.graph.listener_queued_at(listener) {
            self.sched.remove(at, listener);
            self.graph.set_listener_queued(listener, None);
        }
    }

    /// Raises a listener to at least `min_layer` and propagates the
    /// promotion through its writes this pass. A promotion that chases
    /// its own tail is a write/read cycle.
    fn promote(
        &mut self,
        listener: ListenerId,
        min_layer: Layer,
        trail: &mut Vec<ListenerId>,
    ) -> Result<()> {
        let Some(layer) = self.graph.listener_layer(listener) else {
            return Ok(());
        };
        if layer == OBSERVER_LAYER || layer >= min_layer {
            return Ok(());
        }
        if trail.contains(&listener) {
            trail.push(listener);
            return Err(Error::circularity(self.participant_names(trail)));
        }
        trail.push(listener);

        self.graph.set_listener_layer(listener, min_layer);
        if let Some(old) = self.graph.listener_queued_at(listener) {
            self.sched.remove(old, listener);
            self.sched.push(min_layer, listener);
            self.graph.set_listener_queued(listener, Some(min_layer));
        }

        let written: Vec<SubjectId> = self
            .pass_writers
            .iter()
            .filter(|(_, w)| **w == Some(listener))
            .map(|(s, _)| *s)
            .collect();
        for subject in written {
            for reader in self.graph.listeners_of(subject) {
                if reader == listener {
                    continue;
                }
                let Some(rl) = self.graph.listener_layer(reader) else {
                    continue;
                };
                if rl != OBSERVER_LAYER && rl <= min_layer {
                    self.promote(reader, min_layer.saturating_add(1), trail)?;
                }
            }
        }
        trail.pop();
        Ok(())
    }

    // ----- the recalc loop ------------------------------------------------

    /// Drains the schedule to quiescence, then runs observers read-only.
    fn settle(&mut self) -> Result<()> {
        while let Some(listener) = self.sched.pop_lowest() {
            self.graph.set_listener_queued(listener, None);
            if !self.graph.listener_alive(listener) {
                continue;
            }
            let sp = self.history.savepoint();
            self.begin_run(listener, sp);
            match self.run_rule(listener) {
                Ok(()) => {}
                Err(Error::Inverted { reader }) => {
                    self.recover(listener, reader)?;
                }
                Err(e) => return Err(e),
            }
        }

        self.readonly = true;
        let observed = self.run_observers();
        self.readonly = false;
        self.clear_pass();
        observed
    }

    fn begin_run(&mut self, listener: ListenerId, sp: Savepoint) {
        self.graph.clear_listener_links(listener);
        self.this_pass.push(PassRecord {
            listener,
            savepoint: sp,
        });
        self.graph
            .set_pass_index(listener, Some(self.this_pass.len() - 1));
    }

    fn run_rule(&mut self, listener: ListenerId) -> Result<()> {
        let Some(mut rule) = self.graph.take_rule(listener) else {
            return Ok(());
        };
        self.run_stack.push(listener);
        let out = rule(self);
        self.run_stack.pop();
        self.graph.restore_rule(listener, rule);
        if out.is_ok() {
            self.graph.set_listener_stale(listener, false);
            if self.graph.listener_is_pure(listener) {
                // recorded no reads; nothing will ever re-run it
                self.dispose_listener(listener);
            }
        }
        out
    }

    fn run_observers(&mut self) -> Result<()> {
        while let Some(observer) = self.sched.pop_observer() {
            self.graph.set_listener_queued(observer, None);
            if !self.graph.listener_alive(observer) {
                continue;
            }
            self.graph.clear_listener_links(observer);
            self.run_rule(observer)?;
        }
        Ok(())
    }

    /// Order-inversion recovery: `writer` just invalidated the read of
    /// `reader`, which ran earlier this pass.
    fn recover(&mut self, writer: ListenerId, reader: ListenerId) -> Result<()> {
        let repeated = self
            .inversions
            .iter()
            .any(|&(w, r)| (w == writer && r == reader) || (w == reader && r == writer));
        if repeated {
            let names = self.participant_names(&[writer, reader]);
            return Err(Error::circularity(names));
        }
        if let Some(path) = self.inversion_cycle(reader, writer) {
            let names = self.participant_names(&path);
            return Err(Error::circularity(names));
        }
        self.inversions.push((writer, reader));
        self.promo_edges.push((writer, reader));

        let Some(pos) = self
            .this_pass
            .iter()
            .position(|rec| rec.listener == reader)
        else {
            return Ok(());
        };
        let sp = self.this_pass[pos].savepoint;
        self.rewind_history(sp);

        let rewound: Vec<PassRecord> = self.this_pass.split_off(pos);
        for rec in &rewound {
            self.graph.set_pass_index(rec.listener, None);
        }

        let writer_layer = self.graph.listener_layer(writer).unwrap_or(0);
        let mut trail = Vec::new();
        self.promote(reader, writer_layer.saturating_add(1), &mut trail)?;

        for rec in &rewound {
            if self.graph.listener_alive(rec.listener) {
                self.enqueue(rec.listener);
            }
        }
        Ok(())
    }

    /// Searches the promotion edges for a path `from -> ... -> to`.
    fn inversion_cycle(
        &self,
        from: ListenerId,
        to: ListenerId,
    ) -> Option<Vec<ListenerId>> {
        let mut stack: Vec<Vec<ListenerId>> = Vec::new();
        stack.push(alloc::vec![from]);
        let mut seen: Vec<ListenerId> = Vec::new();
        while let Some(path) = stack.pop() {
            let Some(&last) = path.last() else {
                continue;
            };
            if last == to {
                return Some(path);
            }
            if seen.contains(&last) {
                continue;
            }
            seen.push(last);
            for &(a, b) in &self.promo_edges {
                if a == last {
                    let mut next = path.clone();
                    next.push(b);
                    stack.push(next);
                }
            }
        }
        None
    }

    fn participant_names(&self, ids: &[ListenerId]) -> Vec<String> {
        ids.iter()
            .map(|&id| match self.graph.listener_name(id) {
                Some(name) => name.to_string(),
                None => format!("{}", id),
            })
            .collect()
    }

    // ----- cleanup --------------------------------------------------------

    fn commit_drain(&mut self) -> Result<()> {
        while self.history.commit_cursor < self.history.commit.len() {
            let index = self.history.commit_cursor;
            self.history.commit_cursor += 1;
            if let Some(f) = self.history.commit[index].take() {
                f(self)?;
            }
        }
        Ok(())
    }

    fn rewind_history(&mut self, sp: Savepoint) {
        while self.history.undo.len() > sp.undo {
            if let Some(entry) = self.history.undo.pop() {
                self.apply_undo(entry);
            }
        }
        self.history.commit.truncate(sp.commit);
        self.history.managers.truncate(sp.managers);
    }

    fn apply_undo(&mut self, entry: UndoEntry) {
        match entry {
            UndoEntry::Value { subject, old } => {
                self.graph.set_value_raw(subject, old);
            }
            UndoEntry::ChangeMark { subject, prev } => match prev {
                Some(writer) => {
                    self.pass_writers.insert(subject, writer);
                }
                None => {
                    self.pass_writers.remove(&subject);
                }
            },
            UndoEntry::Closure(f) => f(self),
        }
    }

    fn rollback_all(&mut self) {
        while let Some(entry) = self.history.undo.pop() {
            self.apply_undo(entry);
        }
        self.history.commit.clear();
        self.history.commit_cursor = 0;
        self.sched.clear();
        self.graph.clear_pass_flags();
        self.this_pass.clear();
        self.pass_writers.clear();
        self.inversions.clear();
        self.promo_edges.clear();
        self.run_stack.clear();
        self.readonly = false;
    }

    fn clear_pass(&mut self) {
        let ran: Vec<ListenerId> =
            self.this_pass.iter().map(|r| r.listener).collect();
        self.this_pass.clear();
        for listener in ran {
            self.graph.set_pass_index(listener, None);
        }
        self.pass_writers.clear();
        self.inversions.clear();
        self.promo_edges.clear();
    }

    fn exit_managers_clean(&mut self) -> Option<Error> {
        let managers = core::mem::take(&mut self.history.managers);
        let mut pending: Option<Error> = None;
        for manager in managers.iter().rev() {
            if let Err(e) = manager.borrow_mut().exit(pending.as_ref()) {
                pending = Some(e);
            }
        }
        pending
    }

    fn exit_managers_after_error(&mut self, mut error: Error) -> Error {
        let managers = core::mem::take(&mut self.history.managers);
        for manager in managers.iter().rev() {
            if let Err(e) = manager.borrow_mut().exit(Some(&error)) {
                error = e;
            }
        }
        error
    }

    fn reset_scope(&mut self) {
        self.history.reset();
        self.clear_pass();
        self.readonly = false;
        self.run_stack.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::ScopeManager;
    use alloc::rc::Rc;
    use alloc::vec;
    use core::cell::RefCell;

    type Trace = Rc<RefCell<Vec<String>>>;

    struct TraceManager {
        trace: Trace,
        fail_exit: bool,
    }

    impl ScopeManager for TraceManager {
        fn enter(&mut self) {
            self.trace.borrow_mut().push("enter".to_string());
        }

        fn exit(&mut self, error: Option<&Error>) -> Result<()> {
            match error {
                Some(_) => self.trace.borrow_mut().push("exit(err)".to_string()),
                None => self.trace.borrow_mut().push("exit".to_string()),
            }
            if self.fail_exit {
                return Err(Error::manager_exit("exit failed"));
            }
            Ok(())
        }
    }

    fn trace() -> Trace {
        Rc::new(RefCell::new(Vec::new()))
    }

    #[test]
    fn test_nested_atomically_flattens() {
        let mut en = Engine::new();
        let s = en.add_subject(0);
        en.atomically(|en| {
            en.write_value(s, 1_i64)?;
            en.atomically(|en| en.write_value(s, 2_i64).map(|_| ()))?;
            // still one scope: the nested call must not have committed
            assert!(en.active());
            Ok(())
        })
        .unwrap();
        assert_eq!(en.value::<i64>(s), Some(2));
    }

    #[test]
    fn test_rollback_restores_values_and_exits_managers() {
        let mut en = Engine::new();
        let s = en.add_subject(0);
        en.seed_value(s, 10_i64);

        let t = trace();
        let m = Rc::new(RefCell::new(TraceManager {
            trace: t.clone(),
            fail_exit: false,
        }));

        let result: Result<()> = en.atomically(move |en| {
            en.manage(m)?;
            en.write_value(s, 99_i64)?;
            Err(Error::aborted("boom"))
        });

        assert!(matches!(result, Err(Error::Aborted { .. })));
        assert_eq!(en.value::<i64>(s), Some(10));
        assert_eq!(*t.borrow(), vec!["enter", "exit(err)"]);
        assert!(!en.active());
    }

    #[test]
    fn test_failing_manager_exit_replaces_error() {
        let mut en = Engine::new();
        let t = trace();
        let m = Rc::new(RefCell::new(TraceManager {
            trace: t.clone(),
            fail_exit: true,
        }));

        let result: Result<()> = en.atomically(move |en| {
            en.manage(m)?;
            Err(Error::aborted("original"))
        });

        assert!(matches!(result, Err(Error::ManagerExit { .. })));
        assert_eq!(*t.borrow(), vec!["enter", "exit(err)"]);
    }

    #[test]
    fn test_commit_callback_failure_rolls_back() {
        let mut en = Engine::new();
        let s = en.add_subject(0);
        en.seed_value(s, 1_i64);

        let result: Result<()> = en.atomically(|en| {
            en.write_value(s, 2_i64)?;
            en.on_commit(|_| Err(Error::aborted("commit failed")))?;
            Ok(())
        });

        assert!(result.is_err());
        assert_eq!(en.value::<i64>(s), Some(1));
    }

    #[test]
    fn test_inactive_use_fails_fast() {
        let mut en = Engine::new();
        let s = en.add_subject(0);
        assert!(matches!(en.changed(s), Err(Error::Inactive { .. })));
        assert!(matches!(en.used(s), Err(Error::Inactive { .. })));
        assert!(matches!(en.savepoint(), Err(Error::Inactive { .. })));
        assert!(matches!(
            en.manage(Rc::new(RefCell::new(TraceManager {
                trace: trace(),
                fail_exit: false
            }))),
            Err(Error::Inactive { .. })
        ));
    }

    #[test]
    fn test_external_write_schedules_linked_reader() {
        let mut en = Engine::new();
        let s = en.add_subject(0);
        en.seed_value(s, 0_i64);

        let runs = Rc::new(RefCell::new(0));
        let runs2 = runs.clone();
        let l = en.add_listener(
            ListenerSpec::default(),
            Box::new(move |en| {
                *runs2.borrow_mut() += 1;
                en.used(s)
            }),
        );

        en.atomically(|en| en.schedule(l, None)).unwrap();
        assert_eq!(*runs.borrow(), 1);

        en.atomically(|en| en.write_value(s, 5_i64).map(|_| ()))
            .unwrap();
        assert_eq!(*runs.borrow(), 2);

        // a damped write re-runs nothing
        en.atomically(|en| en.write_value(s, 5_i64).map(|_| ()))
            .unwrap();
        assert_eq!(*runs.borrow(), 2);
    }

    #[test]
    fn test_external_write_reschedules_listener_that_ran_this_pass() {
        let mut en = Engine::new();
        let s = en.add_subject(0);
        en.seed_value(s, 0_i64);

        let runs = Rc::new(RefCell::new(0));
        let runs2 = runs.clone();
        let l = en.add_listener(
            ListenerSpec::default(),
            Box::new(move |en| {
                *runs2.borrow_mut() += 1;
                en.used(s)
            }),
        );

        // the listener runs during the body, then an external write
        // invalidates its read; no rule frame is active, so the engine
        // just schedules it again for the settle loop
        en.atomically(|en| {
            en.initialize(l)?;
            en.write_value(s, 5_i64).map(|_| ())
        })
        .unwrap();

        assert_eq!(*runs.borrow(), 2);
    }

    #[test]
    fn test_observers_run_read_only_after_quiescence() {
        let mut en = Engine::new();
        let s = en.add_subject(0);
        en.seed_value(s, 1_i64);

        let seen = Rc::new(RefCell::new(Vec::new()));
        let seen2 = seen.clone();
        let obs = en.add_listener(
            ListenerSpec {
                layer: OBSERVER_LAYER,
                ..ListenerSpec::default()
            },
            Box::new(move |en| {
                en.used(s)?;
                seen2.borrow_mut().push(en.value::<i64>(s).unwrap_or(0));
                Ok(())
            }),
        );

        en.atomically(|en| en.schedule(obs, None)).unwrap();
        en.atomically(|en| en.write_value(s, 2_i64).map(|_| ()))
            .unwrap();

        assert_eq!(*seen.borrow(), vec![1, 2]);
    }

    #[test]
    fn test_observer_write_is_rejected_and_aborts() {
        let mut en = Engine::new();
        let s = en.add_subject(0);
        en.seed_value(s, 1_i64);

        let obs = en.add_listener(
            ListenerSpec {
                layer: OBSERVER_LAYER,
                ..ListenerSpec::default()
            },
            Box::new(move |en| en.write_value(s, 9_i64).map(|_| ())),
        );

        let result = en.atomically(|en| en.schedule(obs, None));
        assert!(matches!(result, Err(Error::ReadOnly { .. })));
        assert_eq!(en.value::<i64>(s), Some(1));
    }

    #[test]
    fn test_lock_registers_subject_manager_once() {
        let mut en = Engine::new();
        let s = en.add_subject(0);
        en.seed_value(s, 0_i64);

        let t = trace();
        let m = Rc::new(RefCell::new(TraceManager {
            trace: t.clone(),
            fail_exit: false,
        }));
        en.set_manager(s, m);

        en.atomically(|en| {
            en.write_value(s, 1_i64)?;
            en.write_value(s, 2_i64)?;
            Ok(())
        })
        .unwrap();

        assert_eq!(*t.borrow(), vec!["enter", "exit"]);
    }
}
