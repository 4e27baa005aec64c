//! Small internal utilities shared across layers.
//!
//! Grounded in mio's `src/slab.rs` / `src/util/slab.rs` (a preallocated
//! free-list slab reused across the reactor's handler table and the old
//! `timer.rs`'s entry slab); reimplemented here in current Rust with an
//! added generation counter so a [`Slab`] can back generational handles
//! (used by [`crate::statemachine`]'s watcher references, see `DESIGN.md`
//! under "Shared-pointer cycles").

mod slab;

pub use slab::{Slab, SlabKey};
