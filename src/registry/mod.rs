//! Per-channel subscription bookkeeping
//!
//! The registry is the only place that attaches channels to the transport
//! and detaches them again. Each channel is reference-counted by its
//! listeners: the first listener activates the channel (one relay, one
//! attachment) and the last one to leave tears it down.
mod channels;
mod feed;

pub use channels::*;
pub use feed::*;
