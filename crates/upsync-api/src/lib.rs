//! Upsync API Library
//!
//! HTTP and websocket surface of the upload engine: session control, chunk intake,
//! download tokens, shares and the realtime event stream.

pub mod auth;
pub mod error;
mod handlers;
pub mod setup;
pub mod state;
pub mod telemetry;

pub use error::{ErrorResponse, HttpAppError};
pub use state::AppState;
