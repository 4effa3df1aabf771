pub mod access;
pub mod api;
pub mod config;
pub mod db;
pub mod realtime;
pub mod session;
pub mod storage;
pub mod workflow;

pub use db::DbPool;

use config::Config;
use std::sync::Arc;

use crate::api::rate_limit::RateLimiter;
use crate::realtime::RoomHub;
use crate::storage::{BlobStore, LocalBlobStore};

pub struct AppState {
    pub config: Config,
    pub db: DbPool,
    pub rate_limiter: Arc<RateLimiter>,
    pub realtime: RoomHub,
    pub storage: Arc<dyn BlobStore>,
}

impl AppState {
    pub fn new(config: Config, db: DbPool) -> Self {
        let storage = Arc::new(LocalBlobStore::new(
            config.storage_dir(),
            &config.server.public_base_url,
            config.storage.max_upload_bytes,
        ));
        Self::with_storage(config, db, storage)
    }

    /// Build the state around a specific blob store
    pub fn with_storage(config: Config, db: DbPool, storage: Arc<dyn BlobStore>) -> Self {
        let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone()));
        Self {
            config,
            db,
            rate_limiter,
            realtime: RoomHub::new(),
            storage,
        }
    }
}
