//! The bipartite dependency graph: subjects, listeners, and their links.
//!
//! Subjects and listeners live in id-keyed registries. A `Link` pairs one
//! subject with one listener and sits on two intrusive doubly-linked
//! chains at once: the subject's chain of readers and the listener's
//! chain of read subjects. Splicing and unsplicing are O(1) from either
//! side, and a (subject, listener) pair is linked at most once.
//!
//! The registries deliberately hold no owning references to client code;
//! a listener is gone exactly when `remove_listener` runs, which scrubs
//! every link from both chains. After that no subject chain yields it.

use crate::history::ManagerHandle;
use alloc::boxed::Box;
use alloc::string::String;
use alloc::vec::Vec;
use core::any::Any;
use hashbrown::HashMap;
use weft_core::{Layer, ListenerId, Result, SubjectId};

/// A listener's rule. Taken out of the registry for the duration of a
/// run so the rule may borrow the engine mutably.
pub type RuleFn = Box<dyn FnMut(&mut crate::Engine) -> Result<()>>;

/// Identifier of a link between a subject and a listener.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct LinkId(pub u32);

/// Construction options for a listener.
pub struct ListenerSpec {
    /// Starting layer; raised automatically as reads are recorded.
    pub layer: Layer,
    /// Eager listeners are scheduled when an input changes; lazy ones
    /// are marked stale and re-run on demand.
    pub eager: bool,
    /// The subject a lazy listener writes, if any.
    pub output: Option<SubjectId>,
    /// Retire the listener after a run that records no reads.
    pub retire_if_pure: bool,
    /// Debug name surfaced by circularity diagnostics.
    pub name: Option<String>,
}

impl Default for ListenerSpec {
    fn default() -> Self {
        Self {
            layer: 0,
            eager: true,
            output: None,
            retire_if_pure: false,
            name: None,
        }
    }
}

struct SubjectEntry {
    layer: Layer,
    manager: Option<ManagerHandle>,
    value: Option<Box<dyn Any>>,
    head: Option<LinkId>,
}

struct ListenerEntry {
    layer: Layer,
    head: Option<LinkId>,
    rule: Option<RuleFn>,
    eager: bool,
    stale: bool,
    output: Option<SubjectId>,
    retire_if_pure: bool,
    name: Option<String>,
    queued_at: Option<Layer>,
    pass_index: Option<usize>,
}

struct LinkEntry {
    subject: SubjectId,
    listener: ListenerId,
    next_in_subject: Option<LinkId>,
    prev_in_subject: Option<LinkId>,
    next_in_listener: Option<LinkId>,
    prev_in_listener: Option<LinkId>,
}

/// Registries for subjects, listeners and links.
pub struct Graph {
    subjects: HashMap<SubjectId, SubjectEntry>,
    listeners: HashMap<ListenerId, ListenerEntry>,
    links: HashMap<LinkId, LinkEntry>,
    next_subject: u32,
    next_listener: u32,
    next_link: u32,
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self {
            subjects: HashMap::new(),
            listeners: HashMap::new(),
            links: HashMap::new(),
            next_subject: 0,
            next_listener: 0,
            next_link: 0,
        }
    }

    // ----- subjects -------------------------------------------------------

    /// Registers a new subject at the given layer.
    pub fn add_subject(&mut self, layer: Layer) -> SubjectId {
        let id = SubjectId(self.next_subject);
        self.next_subject += 1;
        self.subjects.insert(
            id,
            SubjectEntry {
                layer,
                manager: None,
                value: None,
                head: None,
            },
        );
        id
    }

    /// Removes a subject, unlinking its whole reader chain.
    pub fn remove_subject(&mut self, id: SubjectId) {
        while let Some(lid) = self.subjects.get(&id).and_then(|e| e.head) {
            self.unlink(lid);
        }
        self.subjects.remove(&id);
    }

    /// Returns the subject's layer.
    pub fn subject_layer(&self, id: SubjectId) -> Option<Layer> {
        self.subjects.get(&id).map(|e| e.layer)
    }

    /// Attaches a scoped manager to a subject.
    pub fn set_manager(&mut self, id: SubjectId, manager: ManagerHandle) {
        if let Some(e) = self.subjects.get_mut(&id) {
            e.manager = Some(manager);
        }
    }

    /// Returns the subject's manager, if any.
    pub fn subject_manager(&self, id: SubjectId) -> Option<ManagerHandle> {
        self.subjects.get(&id).and_then(|e| e.manager.clone())
    }

    /// Returns the subject's payload, type-erased.
    pub fn value_ref(&self, id: SubjectId) -> Option<&dyn Any> {
        self.subjects.get(&id)?.value.as_deref()
    }

    /// Swaps the subject's payload, returning the previous one.
    pub fn set_value_raw(
        &mut self,
        id: SubjectId,
        value: Option<Box<dyn Any>>,
    ) -> Option<Box<dyn Any>> {
        match self.subjects.get_mut(&id) {
            Some(e) => core::mem::replace(&mut e.value, value),
            None => None,
        }
    }

    /// Returns true if any listener is linked to the subject.
    #[inline]
    pub fn has_listeners(&self, id: SubjectId) -> bool {
        self.subjects.get(&id).map_or(false, |e| e.head.is_some())
    }

    // ----- listeners ------------------------------------------------------

    /// Registers a new listener.
    pub fn add_listener(&mut self, spec: ListenerSpec, rule: RuleFn) -> ListenerId {
        let id = ListenerId(self.next_listener);
        self.next_listener += 1;
        self.listeners.insert(
            id,
            ListenerEntry {
                layer: spec.layer,
                head: None,
                rule: Some(rule),
                eager: spec.eager,
                stale: false,
                output: spec.output,
                retire_if_pure: spec.retire_if_pure,
                name: spec.name,
                queued_at: None,
                pass_index: None,
            },
        );
        id
    }

    /// Removes a listener, scrubbing every link from both chains.
    pub fn remove_listener(&mut self, id: ListenerId) {
        self.clear_listener_links(id);
        self.listeners.remove(&id);
    }

    /// Returns true while the listener is registered.
    #[inline]
    pub fn listener_alive(&self, id: ListenerId) -> bool {
        self.listeners.contains_key(&id)
    }

    pub fn listener_layer(&self, id: ListenerId) -> Option<Layer> {
        self.listeners.get(&id).map(|e| e.layer)
    }

    pub fn set_listener_layer(&mut self, id: ListenerId, layer: Layer) {
        if let Some(e) = self.listeners.get_mut(&id) {
            e.layer = layer;
        }
    }

    pub fn listener_eager(&self, id: ListenerId) -> bool {
        self.listeners.get(&id).map_or(false, |e| e.eager)
    }

    pub fn listener_stale(&self, id: ListenerId) -> bool {
        self.listeners.get(&id).map_or(false, |e| e.stale)
    }

    pub fn set_listener_stale(&mut self, id: ListenerId, stale: bool) {
        if let Some(e) = self.listeners.get_mut(&id) {
            e.stale = stale;
        }
    }

    pub fn listener_output(&self, id: ListenerId) -> Option<SubjectId> {
        self.listeners.get(&id).and_then(|e| e.output)
    }

    /// True if the listener is lazy and `subject` is its output slot.
    pub fn lazy_output_is(&self, id: ListenerId, subject: SubjectId) -> bool {
        self.listeners
            .get(&id)
            .map_or(false, |e| !e.eager && e.output == Some(subject))
    }

    /// True for a retire-eligible lazy listener with no recorded reads.
    pub fn listener_is_pure(&self, id: ListenerId) -> bool {
        self.listeners
            .get(&id)
            .map_or(false, |e| e.retire_if_pure && e.head.is_none())
    }

    pub fn listener_name(&self, id: ListenerId) -> Option<&str> {
        self.listeners.get(&id).and_then(|e| e.name.as_deref())
    }

    pub fn listener_queued_at(&self, id: ListenerId) -> Option<Layer> {
        self.listeners.get(&id).and_then(|e| e.queued_at)
    }

    pub fn set_listener_queued(&mut self, id: ListenerId, at: Option<Layer>) {
        if let Some(e) = self.listeners.get_mut(&id) {
            e.queued_at = at;
        }
    }

    pub fn pass_index(&self, id: ListenerId) -> Option<usize> {
        self.listeners.get(&id).and_then(|e| e.pass_index)
    }

    pub fn set_pass_index(&mut self, id: ListenerId, index: Option<usize>) {
        if let Some(e) = self.listeners.get_mut(&id) {
            e.pass_index = index;
        }
    }

    /// Takes the rule out for a run; restore it with `restore_rule`.
    pub fn take_rule(&mut self, id: ListenerId) -> Option<RuleFn> {
        self.listeners.get_mut(&id).and_then(|e| e.rule.take())
    }

    /// Puts a rule back after a run, unless the listener was removed.
    pub fn restore_rule(&mut self, id: ListenerId, rule: RuleFn) {
        if let Some(e) = self.listeners.get_mut(&id) {
            e.rule = Some(rule);
        }
    }

    // ----- links ----------------------------------------------------------

    /// Ensures a link between `subject` and `listener`, splicing a new
    /// one at the head of both chains if the pair is not linked yet.
    pub fn link(&mut self, subject: SubjectId, listener: ListenerId) {
        if self.has_link(subject, listener) {
            return;
        }
        if !self.subjects.contains_key(&subject) || !self.listeners.contains_key(&listener) {
            return;
        }
        let id = LinkId(self.next_link);
        self.next_link += 1;

        let s_head = self.subjects.get(&subject).and_then(|e| e.head);
        let l_head = self.listeners.get(&listener).and_then(|e| e.head);
        self.links.insert(
            id,
            LinkEntry {
                subject,
                listener,
                next_in_subject: s_head,
                prev_in_subject: None,
                next_in_listener: l_head,
                prev_in_listener: None,
            },
        );
        if let Some(h) = s_head {
            if let Some(e) = self.links.get_mut(&h) {
                e.prev_in_subject = Some(id);
            }
        }
        if let Some(h) = l_head {
            if let Some(e) = self.links.get_mut(&h) {
                e.prev_in_listener = Some(id);
            }
        }
        if let Some(e) = self.subjects.get_mut(&subject) {
            e.head = Some(id);
        }
        if let Some(e) = self.listeners.get_mut(&listener) {
            e.head = Some(id);
        }
    }

    /// Returns true if the pair is currently linked.
    pub fn has_link(&self, subject: SubjectId, listener: ListenerId) -> bool {
        let mut cur = self.listeners.get(&listener).and_then(|e| e.head);
        while let Some(id) = cur {
            let Some(link) = self.links.get(&id) else {
                break;
            };
            if link.subject == subject {
                return true;
            }
            cur = link.next_in_listener;
        }
        false
    }

    /// Unsplices a link from both chains. O(1); both chains stay well
    /// formed.
    pub fn unlink(&mut self, id: LinkId) {
        let Some(e) = self.links.remove(&id) else {
            return;
        };
        match e.prev_in_subject {
            Some(p) => {
                if let Some(pe) = self.links.get_mut(&p) {
                    pe.next_in_subject = e.next_in_subject;
                }
            }
            None => {
                if let Some(se) = self.subjects.get_mut(&e.subject) {
                    se.head = e.next_in_subject;
                }
            }
        }
        if let Some(n) = e.next_in_subject {
            if let Some(ne) = self.links.get_mut(&n) {
                ne.prev_in_subject = e.prev_in_subject;
            }
        }
        match e.prev_in_listener {
            Some(p) => {
                if let Some(pe) = self.links.get_mut(&p) {
                    pe.next_in_listener = e.next_in_listener;
                }
            }
            None => {
                if let Some(le) = self.listeners.get_mut(&e.listener) {
                    le.head = e.next_in_listener;
                }
            }
        }
        if let Some(n) = e.next_in_listener {
            if let Some(ne) = self.links.get_mut(&n) {
                ne.prev_in_listener = e.prev_in_listener;
            }
        }
    }

    /// Drops every link on the listener's chain.
    pub fn clear_listener_links(&mut self, id: ListenerId) {
        while let Some(lid) = self.listeners.get(&id).and_then(|e| e.head) {
            self.unlink(lid);
        }
    }

    /// Snapshot of the listeners linked to a subject.
    ///
    /// The snapshot makes the walk safe against unlinks performed while
    /// the caller processes it.
    pub fn listeners_of(&self, subject: SubjectId) -> Vec<ListenerId> {
        let mut out = Vec::new();
        let mut cur = self.subjects.get(&subject).and_then(|e| e.head);
        while let Some(id) = cur {
            let Some(link) = self.links.get(&id) else {
                break;
            };
            out.push(link.listener);
            cur = link.next_in_subject;
        }
        out
    }

    /// Snapshot of the subjects a listener has read.
    pub fn subjects_of(&self, listener: ListenerId) -> Vec<SubjectId> {
        let mut out = Vec::new();
        let mut cur = self.listeners.get(&listener).and_then(|e| e.head);
        while let Some(id) = cur {
            let Some(link) = self.links.get(&id) else {
                break;
            };
            out.push(link.subject);
            cur = link.next_in_listener;
        }
        out
    }

    /// Clears per-pass scheduling flags on every listener.
    pub fn clear_pass_flags(&mut self) {
        for e in self.listeners.values_mut() {
            e.queued_at = None;
            e.pass_index = None;
        }
    }
}
