//! Line-delimited TCP chat relay: every line a client sends is stamped,
//! wrapped in an envelope, and fanned out to every connected client.

pub mod conn;
pub mod error;
pub mod protocol;
pub mod relay;
pub mod server;
pub mod state;
