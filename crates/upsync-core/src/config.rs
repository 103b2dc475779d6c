//! Configuration module
//!
//! Configuration for the API binary and the upload engine. Values come from the process
//! environment (optionally seeded from a `.env` file) with typed defaults.

use std::env;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use std::time::Duration;

// Common constants
const MAX_CONNECTIONS: u32 = 20;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PORT: u16 = 4000;
const MAX_CHUNK_BODY_BYTES: usize = 64 * 1024 * 1024;

const DEFAULT_CHUNK_SIZE_BYTES: u64 = 5 * 1024 * 1024;
const MAX_FILES_PER_SESSION: u32 = 100;
const DEFAULT_STORAGE_LIMIT_BYTES: u64 = 10 * 1024 * 1024 * 1024;
const UPLOAD_INACTIVITY_TIMEOUT_SECS: u64 = 1800;
const STALE_SESSION_REAP_INTERVAL_SECS: u64 = 60;
const SESSION_RETENTION_SECS: u64 = 86_400;
const FILE_RETENTION_SECS: u64 = 30 * 86_400;
const DOWNLOAD_TOKEN_TTL_SECS: u64 = 3600;
const DOWNLOAD_TOKEN_MAX_DOWNLOADS: u32 = 1;
const BROADCAST_BUFFER_SIZE: usize = 256;
const SPEED_SAMPLE_WINDOW: usize = 5;
const MAX_BUFFERED_CHUNKS: usize = 32;
const ACTOR_MAILBOX_CAPACITY: usize = 1024;
const DOWNLOAD_BASE_URL: &str = "/api/v0/files";

/// What happens when a connection's outbox is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Evict the oldest queued event to make room for the new one
    #[default]
    DropOldest,
    /// Discard the incoming event
    DropNewest,
}

impl Display for OverflowPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            OverflowPolicy::DropOldest => write!(f, "drop_oldest"),
            OverflowPolicy::DropNewest => write!(f, "drop_newest"),
        }
    }
}

impl FromStr for OverflowPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "drop_oldest" => Ok(OverflowPolicy::DropOldest),
            "drop_newest" => Ok(OverflowPolicy::DropNewest),
            _ => Err(anyhow::anyhow!("Invalid overflow policy: {}", s)),
        }
    }
}

/// How a chunk index ahead of the next expected one is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutOfOrderPolicy {
    /// Hold the chunk until the gap is filled
    #[default]
    Buffer,
    /// Reject with `ChunkOutOfOrder`
    Reject,
}

impl Display for OutOfOrderPolicy {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            OutOfOrderPolicy::Buffer => write!(f, "buffer"),
            OutOfOrderPolicy::Reject => write!(f, "reject"),
        }
    }
}

impl FromStr for OutOfOrderPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "buffer" => Ok(OutOfOrderPolicy::Buffer),
            "reject" => Ok(OutOfOrderPolicy::Reject),
            _ => Err(anyhow::anyhow!("Invalid out-of-order policy: {}", s)),
        }
    }
}

/// Process-level settings for the API binary
#[derive(Clone, Debug)]
pub struct BaseConfig {
    pub server_port: u16,
    pub cors_origins: Vec<String>,
    pub environment: String,
    /// When unset the engine runs on the in-memory store
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    pub log_format: String,
    /// Upper bound for a single chunk request body
    pub max_chunk_body_bytes: usize,
}

/// Tunables of the upload engine.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub default_chunk_size_bytes: u64,
    pub max_files_per_session: u32,
    pub default_storage_limit_bytes: u64,
    pub upload_inactivity_timeout_secs: u64,
    /// Interval in seconds between reaper runs. 0 = disabled.
    pub stale_session_reap_interval_secs: u64,
    pub session_retention_secs: u64,
    /// How long completed file locators stay resolvable. 0 = forever.
    pub file_retention_secs: u64,
    pub download_token_ttl_secs: u64,
    pub download_token_max_downloads: u32,
    pub broadcast_buffer_size: usize,
    pub broadcast_overflow_policy: OverflowPolicy,
    pub speed_sample_window: usize,
    pub out_of_order_policy: OutOfOrderPolicy,
    pub max_buffered_chunks: usize,
    pub actor_mailbox_capacity: usize,
    pub download_base_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_chunk_size_bytes: DEFAULT_CHUNK_SIZE_BYTES,
            max_files_per_session: MAX_FILES_PER_SESSION,
            default_storage_limit_bytes: DEFAULT_STORAGE_LIMIT_BYTES,
            upload_inactivity_timeout_secs: UPLOAD_INACTIVITY_TIMEOUT_SECS,
            stale_session_reap_interval_secs: STALE_SESSION_REAP_INTERVAL_SECS,
            session_retention_secs: SESSION_RETENTION_SECS,
            file_retention_secs: FILE_RETENTION_SECS,
            download_token_ttl_secs: DOWNLOAD_TOKEN_TTL_SECS,
            download_token_max_downloads: DOWNLOAD_TOKEN_MAX_DOWNLOADS,
            broadcast_buffer_size: BROADCAST_BUFFER_SIZE,
            broadcast_overflow_policy: OverflowPolicy::default(),
            speed_sample_window: SPEED_SAMPLE_WINDOW,
            out_of_order_policy: OutOfOrderPolicy::default(),
            max_buffered_chunks: MAX_BUFFERED_CHUNKS,
            actor_mailbox_capacity: ACTOR_MAILBOX_CAPACITY,
            download_base_url: DOWNLOAD_BASE_URL.to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        Ok(Self {
            default_chunk_size_bytes: env::var("DEFAULT_CHUNK_SIZE_BYTES")
                .unwrap_or_else(|_| DEFAULT_CHUNK_SIZE_BYTES.to_string())
                .parse()
                .unwrap_or(DEFAULT_CHUNK_SIZE_BYTES),
            max_files_per_session: env::var("MAX_FILES_PER_SESSION")
                .unwrap_or_else(|_| MAX_FILES_PER_SESSION.to_string())
                .parse()
                .unwrap_or(MAX_FILES_PER_SESSION),
            default_storage_limit_bytes: env::var("DEFAULT_STORAGE_LIMIT_BYTES")
                .unwrap_or_else(|_| DEFAULT_STORAGE_LIMIT_BYTES.to_string())
                .parse()
                .unwrap_or(DEFAULT_STORAGE_LIMIT_BYTES),
            upload_inactivity_timeout_secs: env::var("UPLOAD_INACTIVITY_TIMEOUT_SECS")
                .unwrap_or_else(|_| UPLOAD_INACTIVITY_TIMEOUT_SECS.to_string())
                .parse()
                .unwrap_or(UPLOAD_INACTIVITY_TIMEOUT_SECS),
            stale_session_reap_interval_secs: env::var("STALE_SESSION_REAP_INTERVAL_SECS")
                .unwrap_or_else(|_| STALE_SESSION_REAP_INTERVAL_SECS.to_string())
                .parse()
                .unwrap_or(STALE_SESSION_REAP_INTERVAL_SECS),
            session_retention_secs: env::var("SESSION_RETENTION_SECS")
                .unwrap_or_else(|_| SESSION_RETENTION_SECS.to_string())
                .parse()
                .unwrap_or(SESSION_RETENTION_SECS),
            file_retention_secs: env::var("FILE_RETENTION_SECS")
                .unwrap_or_else(|_| FILE_RETENTION_SECS.to_string())
                .parse()
                .unwrap_or(FILE_RETENTION_SECS),
            download_token_ttl_secs: env::var("DOWNLOAD_TOKEN_TTL_SECS")
                .unwrap_or_else(|_| DOWNLOAD_TOKEN_TTL_SECS.to_string())
                .parse()
                .unwrap_or(DOWNLOAD_TOKEN_TTL_SECS),
            download_token_max_downloads: env::var("DOWNLOAD_TOKEN_MAX_DOWNLOADS")
                .unwrap_or_else(|_| DOWNLOAD_TOKEN_MAX_DOWNLOADS.to_string())
                .parse()
                .unwrap_or(DOWNLOAD_TOKEN_MAX_DOWNLOADS),
            broadcast_buffer_size: env::var("BROADCAST_BUFFER_SIZE")
                .unwrap_or_else(|_| BROADCAST_BUFFER_SIZE.to_string())
                .parse()
                .unwrap_or(BROADCAST_BUFFER_SIZE),
            broadcast_overflow_policy: env::var("BROADCAST_OVERFLOW_POLICY")
                .unwrap_or_else(|_| OverflowPolicy::default().to_string())
                .parse()?,
            speed_sample_window: env::var("SPEED_SAMPLE_WINDOW")
                .unwrap_or_else(|_| SPEED_SAMPLE_WINDOW.to_string())
                .parse()
                .unwrap_or(SPEED_SAMPLE_WINDOW),
            out_of_order_policy: env::var("OUT_OF_ORDER_POLICY")
                .unwrap_or_else(|_| OutOfOrderPolicy::default().to_string())
                .parse()?,
            max_buffered_chunks: env::var("MAX_BUFFERED_CHUNKS")
                .unwrap_or_else(|_| MAX_BUFFERED_CHUNKS.to_string())
                .parse()
                .unwrap_or(MAX_BUFFERED_CHUNKS),
            actor_mailbox_capacity: env::var("ACTOR_MAILBOX_CAPACITY")
                .unwrap_or_else(|_| ACTOR_MAILBOX_CAPACITY.to_string())
                .parse()
                .unwrap_or(ACTOR_MAILBOX_CAPACITY),
            download_base_url: env::var("DOWNLOAD_BASE_URL")
                .unwrap_or_else(|_| DOWNLOAD_BASE_URL.to_string()),
        })
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if self.default_chunk_size_bytes == 0 {
            return Err(anyhow::anyhow!("DEFAULT_CHUNK_SIZE_BYTES must be greater than 0"));
        }
        if self.max_files_per_session == 0 {
            return Err(anyhow::anyhow!("MAX_FILES_PER_SESSION must be greater than 0"));
        }
        if self.broadcast_buffer_size == 0 {
            return Err(anyhow::anyhow!("BROADCAST_BUFFER_SIZE must be greater than 0"));
        }
        if self.speed_sample_window < 2 {
            return Err(anyhow::anyhow!("SPEED_SAMPLE_WINDOW must be at least 2"));
        }
        if self.actor_mailbox_capacity == 0 {
            return Err(anyhow::anyhow!("ACTOR_MAILBOX_CAPACITY must be greater than 0"));
        }
        if self.download_token_max_downloads == 0 {
            return Err(anyhow::anyhow!(
                "DOWNLOAD_TOKEN_MAX_DOWNLOADS must be greater than 0"
            ));
        }
        if self.download_token_ttl_secs == 0 {
            return Err(anyhow::anyhow!("DOWNLOAD_TOKEN_TTL_SECS must be greater than 0"));
        }
        Ok(())
    }

    pub fn inactivity_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_inactivity_timeout_secs)
    }

    pub fn session_retention(&self) -> Duration {
        Duration::from_secs(self.session_retention_secs)
    }

    pub fn download_token_ttl(&self) -> Duration {
        Duration::from_secs(self.download_token_ttl_secs)
    }

    /// None when the reaper is disabled
    pub fn reap_interval(&self) -> Option<Duration> {
        if self.stale_session_reap_interval_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.stale_session_reap_interval_secs))
        }
    }
}

/// Application configuration.
#[derive(Clone, Debug)]
pub struct Config {
    pub base: BaseConfig,
    pub engine: EngineConfig,
}

impl Config {
    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        let env = self.base.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();

        let environment = env::var("ENVIRONMENT")
            .or_else(|_| env::var("APP_ENV"))
            .unwrap_or_else(|_| "development".to_string());

        let cors_origins_str = env::var("CORS_ORIGINS").unwrap_or_else(|_| "*".to_string());
        let is_production =
            environment.to_lowercase() == "production" || environment.to_lowercase() == "prod";
        if is_production && cors_origins_str.trim() == "*" {
            return Err(anyhow::anyhow!(
                "CORS_ORIGINS cannot be '*' in production. Please specify explicit origins."
            ));
        }

        let cors_origins: Vec<String> = cors_origins_str
            .split(',')
            .map(|s| s.trim().to_string())
            .collect();

        let base = BaseConfig {
            server_port: env::var("PORT")
                .unwrap_or_else(|_| DEFAULT_PORT.to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number"))?,
            cors_origins,
            environment,
            database_url: env::var("DATABASE_URL").ok().filter(|s| !s.trim().is_empty()),
            db_max_connections: env::var("DB_MAX_CONNECTIONS")
                .unwrap_or_else(|_| MAX_CONNECTIONS.to_string())
                .parse()
                .unwrap_or(MAX_CONNECTIONS),
            db_timeout_seconds: env::var("DB_TIMEOUT_SECONDS")
                .unwrap_or_else(|_| CONNECTION_TIMEOUT_SECS.to_string())
                .parse()
                .unwrap_or(CONNECTION_TIMEOUT_SECS),
            log_format: env::var("LOG_FORMAT").unwrap_or_else(|_| "text".to_string()),
            max_chunk_body_bytes: env::var("MAX_CHUNK_BODY_BYTES")
                .unwrap_or_else(|_| MAX_CHUNK_BODY_BYTES.to_string())
                .parse()
                .unwrap_or(MAX_CHUNK_BODY_BYTES),
        };

        Ok(Config {
            base,
            engine: EngineConfig::from_env()?,
        })
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if let Some(url) = &self.base.database_url {
            if !url.starts_with("postgres://") && !url.starts_with("postgresql://") {
                return Err(anyhow::anyhow!(
                    "DATABASE_URL must be a valid PostgreSQL connection string"
                ));
            }
        }

        if (self.base.max_chunk_body_bytes as u64) < self.engine.default_chunk_size_bytes {
            return Err(anyhow::anyhow!(
                "MAX_CHUNK_BODY_BYTES must be at least DEFAULT_CHUNK_SIZE_BYTES"
            ));
        }

        self.engine.validate()
    }

    pub fn server_port(&self) -> u16 {
        self.base.server_port
    }

    pub fn cors_origins(&self) -> &[String] {
        &self.base.cors_origins
    }

    pub fn database_url(&self) -> Option<&str> {
        self.base.database_url.as_deref()
    }

    pub fn max_chunk_body_bytes(&self) -> usize {
        self.base.max_chunk_body_bytes
    }

    pub fn json_logs(&self) -> bool {
        self.base.log_format.eq_ignore_ascii_case("json")
    }
}
