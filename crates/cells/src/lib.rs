//! Weft Cells - reactive cell kinds over the Weft engine.
//!
//! Every cell is a thin client of the engine contracts: its state lives
//! in an engine subject, its rule (if it has one) is an engine listener.
//!
//! - `Cell`: writable value (or `constant`)
//! - `Computed`: lazy rule cell, re-evaluated on read
//! - `Maintained`: eager rule cell, writable, with `initially` / `make` /
//!   `resetting_to` builder options
//! - `Discrete`: value cell that resets to a sentinel at commit
//! - `Observer`: read-only effect run after each settled state
//!
//! # Example
//!
//! ```ignore
//! use weft_cells::{Cell, Maintained, Observer};
//! use weft_engine::Engine;
//!
//! let mut en = Engine::new();
//! let base = Cell::new(&mut en, 2_i64);
//! let doubled = Maintained::new(&mut en, move |en| Ok(base.get(en)? * 2))?;
//!
//! base.set(&mut en, 21)?;
//! assert_eq!(doubled.read(&en), Some(42));
//! ```

#![no_std]

extern crate alloc;

pub mod cell;
pub mod computed;
pub mod maintained;
pub mod observer;

pub use cell::{Cell, Discrete};
pub use computed::Computed;
pub use maintained::{Maintained, MaintainedBuilder};
pub use observer::Observer;

// Re-export commonly used types from dependencies
pub use weft_engine::{Engine, Error, Result};
