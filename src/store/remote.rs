//! Redis-backed store for multi-process runs.

use std::collections::HashMap;
use std::sync::Mutex;

use redis::Commands;

use super::{ListRange, Result, SharedStore, StoreError};

/// Store backed by a single synchronous Redis connection.
///
/// Store calls are short point reads and writes issued between barrier
/// waits, so one connection guarded by a mutex is enough.
pub struct RedisStore {
    conn: Mutex<redis::Connection>,
}

impl RedisStore {
    /// Opens a connection to the server at `url` (e.g. `redis://localhost`).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] if the URL is invalid or the server is
    /// unreachable.
    pub fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url).map_err(backend)?;
        let conn = client.get_connection().map_err(backend)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<std::sync::MutexGuard<'_, redis::Connection>> {
        self.conn.lock().map_err(|_| StoreError::LockPoisoned)
    }
}

fn backend(e: redis::RedisError) -> StoreError {
    StoreError::Backend(e.to_string())
}

impl SharedStore for RedisStore {
    fn get(&self, key: &str) -> Result<HashMap<String, String>> {
        self.conn()?.hgetall(key).map_err(backend)
    }

    fn get_list(&self, key: &str, range: ListRange) -> Result<Vec<String>> {
        self.conn()?
            .lrange(key, range.start, range.stop)
            .map_err(backend)
    }

    fn put(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.conn()?
            .hset::<_, _, _, ()>(key, field, value)
            .map_err(backend)
    }

    fn get_field(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.conn()?.hget(key, field).map_err(backend)
    }

    fn pop_front(&self, key: &str) -> Result<Option<String>> {
        self.conn()?.lpop(key, None).map_err(backend)
    }
}
