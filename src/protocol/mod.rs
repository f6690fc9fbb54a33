//! Protocol module for coordinator communication
//!
//! Flat JSON messages over WebSocket text frames.

mod message;

pub use message::*;
