//! WebSocket hub transport
//!
//! Speaks the JSON hub protocol: a `{"protocol":"json","version":1}`
//! handshake, then record-separated JSON messages. Live change events arrive
//! as server invocations targeting the channel name; reloads are stream
//! invocations issued by the client.
pub mod protocol;
mod transport;

pub use transport::*;

#[cfg(test)]
mod protocol_test;
