//! Change event model
//!
//! The wire-level unit delivered by the push transport: an operation tag plus
//! optional before/after payloads, and the structural identity used to key
//! payloads in a materialized map.

mod change;
mod key;

pub use change::*;
pub use key::*;
