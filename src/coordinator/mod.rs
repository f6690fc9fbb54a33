//! Coordinator communication module
//!
//! Handles the WebSocket link to the coordinator, including:
//! - Connection establishment with fixed-interval reconnect
//! - Init and heartbeat messages
//! - Command dispatch and a single serialized writer per connection

mod session;
mod supervisor;

pub use session::Session;
pub use supervisor::{Supervisor, WsDialer};
