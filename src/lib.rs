//! Real-time multiplexed query synchronization
//!
//! Many continuously updating result sets ("channels") share one push
//! connection. Each consumer materializes its channel locally from change
//! events and snapshot reloads, and falls back to a periodically polled REST
//! snapshot while live data is not there yet.
//!
//! Start with [`Client::builder`] and [`Client::subscribe`].

mod client;
mod config;
mod connection;
mod errors;
mod event;
mod fallback;
mod metrics;
mod network;
mod registry;
mod utils;
mod view;

pub use client::*;
pub use config::*;
pub use connection::*;
pub use errors::*;
pub use event::*;
pub use fallback::*;
pub use metrics::*;
pub use network::*;
pub use registry::*;
pub(crate) use utils::*;
pub use view::*;

//-----------------------------------------------------------
// Test utils

#[cfg(test)]
pub mod test_utils;
#[cfg(test)]
mod errors_test;
