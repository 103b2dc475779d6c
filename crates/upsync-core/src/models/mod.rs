//! Data models for the upload engine
//!
//! Each sub-module represents one persisted record (or the input that creates it).

mod association;
mod manifest;
mod progress;
mod quota;
mod session;
mod token;

pub use association::*;
pub use manifest::*;
pub use progress::*;
pub use quota::*;
pub use session::*;
pub use token::*;
