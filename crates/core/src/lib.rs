//! Weft Core - shared vocabulary for the Weft reactive runtime.
//!
//! This crate defines the types every other Weft crate speaks:
//!
//! - `Error` / `Result`: the single error enum of the runtime
//! - `SubjectId` / `ListenerId`: registry ids for the dependency graph
//! - `Layer` / `OBSERVER_LAYER`: recalculation ordering levels
//!
//! It has no dependencies and carries no behavior of its own.

#![no_std]

extern crate alloc;

pub mod error;
pub mod ids;

pub use error::{Error, Result};
pub use ids::{Layer, ListenerId, SubjectId, OBSERVER_LAYER};
