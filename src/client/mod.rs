//! Client module of the live query synchronizer
//!
//! Composition root wiring every component together:
//! - [`Client`] - owns the shared connection, the channel registry and the
//!   snapshot fallback poller, and hands out [`QueryView`](crate::QueryView)s
//! - [`ClientBuilder`] - configurable client construction, with injectable
//!   transport and snapshot seams
//!
//! # Basic Usage
//! ```no_run
//! use livequery::{Client, Settings, SortKey};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let settings = Settings::new().unwrap();
//!     let client = Client::builder(settings).build().unwrap();
//!
//!     let mut view = client.subscribe("wishlist-trending-1h", Some(SortKey::descending("frequency")));
//!     while let Some(items) = view.changed().await {
//!         println!("{} trending items, connected: {}", items.len(), view.connected());
//!     }
//!
//!     client.shutdown().await;
//! }
//! ```

mod builder;
mod client;

pub use builder::*;
pub use client::*;
