//! Upsync Engine
//!
//! The chunked upload session and realtime progress engine: per-company quota actors,
//! per-session actors owning file progress, download tokens, the room broadcaster and
//! the stale-session reaper, behind the `UploadEngine` facade.

pub mod arena;
pub mod broadcast;
pub mod context;
pub mod engine;
pub mod memory_store;
pub mod quota;
pub mod reaper;
pub mod registry;
pub mod session;
pub mod throughput;
pub mod tokens;
pub mod tracker;

pub use broadcast::{Broadcaster, ConnectionHandle, RoomStats, Subscription};
pub use engine::{EngineStats, UploadEngine};
pub use memory_store::MemoryUploadStore;
pub use reaper::ReapReport;
pub use registry::FileLocator;
pub use session::ChunkReceipt;
pub use tracker::ChunkDisposition;
