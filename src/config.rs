use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::Duration;

use crate::auth::DEFAULT_SESSION_TTL_HOURS;
use crate::cli::{Environment, ServeArguments, StoreArguments, StoreKind};
use crate::metadata::DATA_DIR_NAME;
use crate::storage::{JsonFileStore, MemoryStore, RoadmapStore, StorageError};

/// Resolved settings for the HTTP server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub http_addr: SocketAddr,
    pub session_cookie: String,
    pub expose_error_detail: bool,
    pub max_body_bytes: usize,
    pub session_ttl: Duration,
}

impl ServerConfig {
    pub fn from_args(args: &ServeArguments) -> Result<Self, String> {
        args.validate()?;
        let http_addr = args
            .http_addr
            .parse()
            .map_err(|e| format!("Invalid ROADMAP_HTTP_ADDR '{}': {e}", args.http_addr))?;
        Ok(Self {
            http_addr,
            session_cookie: args.session_cookie.trim().to_string(),
            expose_error_detail: args.environment == Environment::Development,
            max_body_bytes: args.max_body_bytes,
            session_ttl: Duration::hours(i64::from(args.session_ttl_hours)),
        })
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from(([127, 0, 0, 1], 5000)),
            session_cookie: "roadmap.sid".to_string(),
            expose_error_detail: false,
            max_body_bytes: 256 * 1024,
            session_ttl: Duration::hours(i64::from(DEFAULT_SESSION_TTL_HOURS)),
        }
    }
}

pub fn default_data_dir() -> Option<PathBuf> {
    dirs::data_dir().map(|d| d.join(DATA_DIR_NAME))
}

/// Build the configured store backend.
pub fn open_store(args: &StoreArguments) -> Result<Arc<dyn RoadmapStore>, StorageError> {
    match args.store {
        StoreKind::Memory => {
            tracing::warn!("Using in-memory store; data is lost on exit");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreKind::File => {
            let dir = args.data_dir.clone().or_else(default_data_dir).ok_or_else(|| {
                StorageError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "no data directory available; set ROADMAP_DATA_DIR",
                ))
            })?;
            let store = JsonFileStore::open(&dir)?;
            tracing::debug!(path = %store.path().display(), "Roadmap store ready");
            Ok(Arc::new(store))
        }
    }
}
