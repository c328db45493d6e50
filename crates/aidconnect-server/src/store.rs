//! Async access to the SQLite store.
//!
//! `rusqlite` is blocking, so every call runs on the blocking thread pool and
//! holds the connection lock only for the duration of one closure. Each
//! closure is one unit of store I/O; callers that need two steps (lookup,
//! then insert) make two calls and must tolerate interleaving between them.

use std::sync::{Arc, Mutex};

use aidconnect_store::{Database, StoreError};

use crate::error::ServerError;

#[derive(Clone)]
pub struct Store {
    db: Arc<Mutex<Database>>,
}

impl Store {
    pub fn new(db: Database) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
        }
    }

    #[cfg(test)]
    pub fn in_memory() -> Self {
        Self::new(Database::open_in_memory().expect("in-memory database"))
    }

    /// Run `f` against the database. Store errors are returned untouched so
    /// callers can react to specific variants such as `DuplicateKey`.
    pub async fn call<F, T>(&self, f: F) -> Result<Result<T, StoreError>, ServerError>
    where
        F: FnOnce(&Database) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let db = self.db.clone();
        tokio::task::spawn_blocking(move || {
            let guard = db
                .lock()
                .map_err(|_| ServerError::Internal("database lock poisoned".into()))?;
            Ok(f(&guard))
        })
        .await
        .map_err(|e| ServerError::Internal(format!("store task failed: {e}")))?
    }

    /// Like [`Store::call`], with store errors mapped to [`ServerError`].
    pub async fn run<F, T>(&self, f: F) -> Result<T, ServerError>
    where
        F: FnOnce(&Database) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        Ok(self.call(f).await??)
    }
}
