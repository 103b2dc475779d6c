//! Postgres persistence for the upload engine
//!
//! `PgUploadStore` implements the `UploadStore` seam with runtime sqlx queries, so the
//! crate builds without a live database or prepared query metadata.

pub mod pool;
pub mod store;

pub use pool::{connect, run_migrations};
pub use store::PgUploadStore;
