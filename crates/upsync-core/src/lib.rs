//! Upsync Core Library
//!
//! This crate provides the domain models, error types, configuration, websocket event
//! contract and persistence trait shared by the upload engine, the Postgres store and
//! the HTTP/WebSocket API.

pub mod config;
pub mod constants;
pub mod error;
pub mod events;
pub mod models;
pub mod store;

// Re-export commonly used types
pub use config::{BaseConfig, Config, EngineConfig, OutOfOrderPolicy, OverflowPolicy};
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use events::{ClientMessage, Room, RoomType, ServerEvent};
pub use store::UploadStore;
