//! Weft Engine - the transactional reactive core.
//!
//! This crate implements the runtime every Weft cell and collection is a
//! client of:
//!
//! - `history`: atomic scopes with an undo log, savepoints, commit
//!   callbacks and scoped managers
//! - `graph`: the bipartite subject/listener dependency graph with O(1)
//!   link removal
//! - `schedule`: the layered recalculation queue (lowest layer first,
//!   FIFO within a layer) plus the observer queue
//! - `engine`: the `Engine` tying it together — dependency tracking,
//!   glitch-free settling, order-inversion recovery, cycle detection and
//!   the read-only observer phase
//!
//! # Example
//!
//! ```ignore
//! use weft_engine::Engine;
//!
//! let mut en = Engine::new();
//! let s = en.add_subject(0);
//! en.seed_value(s, 0_i64);
//!
//! en.atomically(|en| {
//!     en.write_value(s, 42_i64)?;
//!     Ok(())
//! })?;
//!
//! assert_eq!(en.value::<i64>(s), Some(42));
//! ```

#![no_std]

extern crate alloc;

pub mod engine;
pub mod graph;
pub mod history;
mod schedule;

pub use engine::Engine;
pub use graph::{LinkId, ListenerSpec, RuleFn};
pub use history::{CommitFn, ManagerHandle, Savepoint, ScopeManager, UndoEntry};

// Re-export commonly used types from dependencies
pub use weft_core::{Error, Layer, ListenerId, Result, SubjectId, OBSERVER_LAYER};
