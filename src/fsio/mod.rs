//! Filesystem substrate: atomic writes, advisory locks, corruption checks.
//!
//! Everything above this layer mutates disk state exclusively through these
//! primitives; nothing else in the crate calls `fs::write` on live state.

pub mod atomic;
pub mod corrupt;
pub mod lock;
