//! HTTP and WebSocket handlers.

pub mod chunks;
pub mod downloads;
pub mod quota;
pub mod sessions;
pub mod shares;
pub mod ws;
