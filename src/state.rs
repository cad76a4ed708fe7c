use std::sync::{Arc, Mutex, MutexGuard};

use rusqlite::Connection;

use crate::config::AppConfig;
use crate::errors::AppError;
use crate::services::messaging::MessagingProvider;
use crate::services::sessions::SessionStore;

pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub config: AppConfig,
    pub messaging: Arc<dyn MessagingProvider>,
    pub sessions: SessionStore,
}

impl AppState {
    pub fn new(conn: Connection, config: AppConfig, messaging: Arc<dyn MessagingProvider>) -> Self {
        Self {
            db: Arc::new(Mutex::new(conn)),
            config,
            messaging,
            sessions: SessionStore::new(),
        }
    }

    /// Locks the shared connection. Keep the guard inside a block and never
    /// hold it across an `.await`.
    pub fn db(&self) -> Result<MutexGuard<'_, Connection>, AppError> {
        lock_db(&self.db)
    }
}

pub fn lock_db(db: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, AppError> {
    db.lock()
        .map_err(|_| AppError::Persistence(anyhow::anyhow!("database mutex poisoned")))
}
