//! Shared push connection ownership
//!
//! One [`ConnectionManager`] per client owns the transport every channel is
//! multiplexed over.
mod manager;

pub use manager::*;

#[cfg(test)]
mod manager_test;
