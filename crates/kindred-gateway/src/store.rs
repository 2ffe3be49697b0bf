use std::sync::Arc;

use tracing::error;

use kindred_db::Database;

use crate::error::RealtimeError;

/// Async facade over the blocking SQLite handle. Every call runs on the
/// blocking pool so the runtime's worker threads never wait on the mutex.
#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
}

impl Store {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Arc<Database> {
        &self.db
    }

    pub async fn run<F, T>(&self, f: F) -> Result<T, RealtimeError>
    where
        F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .map_err(|e| {
                error!("spawn_blocking join error: {}", e);
                RealtimeError::Storage(anyhow::anyhow!("blocking task failed: {}", e))
            })?
            .map_err(|e| {
                error!("DB error: {:#}", e);
                RealtimeError::Storage(e)
            })
    }
}
