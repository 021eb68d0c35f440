//! Consumer-side materialized views
//!
//! A [`QueryView`] keeps a [`MaterializedMap`] of one channel current by
//! applying live change events, swapping in reload snapshots, and falling
//! back to REST snapshot rows while the map is empty.

mod query_view;
mod reducer;
mod reload;
mod sort;

pub use query_view::*;
pub use reducer::*;
pub use reload::*;
pub use sort::*;
