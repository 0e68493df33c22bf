//! Observers: side-effectful sinks run in the read-only phase.

use alloc::boxed::Box;
use alloc::string::String;
use weft_engine::{Engine, ListenerId, ListenerSpec, Result, OBSERVER_LAYER};

/// A listener that runs after every settled state it depends on.
///
/// Observers sit on the +∞ layer: they only run once the ordinary
/// schedule has drained, and any tracked write they attempt fails and
/// aborts the whole scope. Their reads are recorded solely so the
/// observer re-runs when those cells change.
#[derive(Clone, Copy)]
pub struct Observer {
    listener: ListenerId,
}

impl Observer {
    /// Creates the observer and runs it once in the current (or a
    /// fresh) scope's read-only phase.
    pub fn new(
        en: &mut Engine,
        rule: impl FnMut(&mut Engine) -> Result<()> + 'static,
    ) -> Result<Self> {
        Self::named_inner(en, None, rule)
    }

    /// Creates a named observer; the name shows up in diagnostics.
    pub fn named(
        en: &mut Engine,
        name: impl Into<String>,
        rule: impl FnMut(&mut Engine) -> Result<()> + 'static,
    ) -> Result<Self> {
        Self::named_inner(en, Some(name.into()), rule)
    }

    fn named_inner(
        en: &mut Engine,
        name: Option<String>,
        rule: impl FnMut(&mut Engine) -> Result<()> + 'static,
    ) -> Result<Self> {
        let listener = en.add_listener(
            ListenerSpec {
                layer: OBSERVER_LAYER,
                name,
                ..ListenerSpec::default()
            },
            Box::new(rule),
        );
        en.atomically(move |en| en.schedule(listener, None))?;
        Ok(Self { listener })
    }

    #[inline]
    pub fn listener(&self) -> ListenerId {
        self.listener
    }

    /// Stops the observer and scrubs its dependency links.
    pub fn dispose(self, en: &mut Engine) {
        en.dispose_listener(self.listener);
    }
}
