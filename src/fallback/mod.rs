//! REST snapshot fallback
//!
//! Keeps views populated while their push channels have not delivered data
//! yet, by polling one aggregate snapshot endpoint.
mod normalize;
mod poller;
mod source;

pub use normalize::*;
pub use poller::*;
pub use source::*;

#[cfg(test)]
mod normalize_test;
