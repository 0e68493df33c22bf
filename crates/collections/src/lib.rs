//! Weft Collections - reactive collections built on Weft cells.
//!
//! Each collection is a client of the cell and engine contracts:
//!
//! - `SortedView`: an ordered index over a set cell, publishing a
//!   discrete slice-edit change log each pass
//! - `Subset`: a set constrained to membership in a base set
//! - `ObservingMap`: a windowed key -> value observer publishing
//!   discrete (new, old) change maps
//! - `Hub`: in-pass publish/subscribe with wildcard patterns, indexed by
//!   rightmost non-wildcard position and value

#![no_std]

extern crate alloc;

pub mod hub;
pub mod observing;
pub mod sorted;
pub mod subset;

use hashbrown::HashSet;

pub use hub::{Hub, Message, Pattern, Subscription};
pub use observing::ObservingMap;
pub use sorted::{diff_sorted, SliceEdit, SortedView};
pub use subset::Subset;

// Re-export commonly used types from dependencies
pub use weft_cells::{Cell, Discrete, Observer};
pub use weft_engine::{Engine, Error, Result};

/// A reactive set: a value cell holding a hash set.
pub type SetCell<T> = Cell<HashSet<T>>;
