//! In-process store backend.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use super::{ListRange, Result, SharedStore, StoreError};

#[derive(Debug, Default)]
struct Tables {
    hashes: HashMap<String, HashMap<String, String>>,
    lists: HashMap<String, VecDeque<String>>,
}

/// Store backed by in-memory tables behind a single `RwLock`.
///
/// Used for local runs where the aggregator and every player share one
/// process, and as the fake in tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces a whole hash.
    pub fn set_hash<K, V>(&self, key: &str, fields: impl IntoIterator<Item = (K, V)>) -> Result<()>
    where
        K: Into<String>,
        V: Into<String>,
    {
        let mut tables = self.tables.write().map_err(|_| StoreError::LockPoisoned)?;
        let hash = fields
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        tables.hashes.insert(key.to_string(), hash);
        Ok(())
    }

    /// Appends values to the tail of a list.
    pub fn push_list<V: Into<String>>(
        &self,
        key: &str,
        values: impl IntoIterator<Item = V>,
    ) -> Result<()> {
        let mut tables = self.tables.write().map_err(|_| StoreError::LockPoisoned)?;
        tables
            .lists
            .entry(key.to_string())
            .or_default()
            .extend(values.into_iter().map(Into::into));
        Ok(())
    }
}

impl SharedStore for MemoryStore {
    fn get(&self, key: &str) -> Result<HashMap<String, String>> {
        let tables = self.tables.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(tables.hashes.get(key).cloned().unwrap_or_default())
    }

    fn get_list(&self, key: &str, range: ListRange) -> Result<Vec<String>> {
        let tables = self.tables.read().map_err(|_| StoreError::LockPoisoned)?;
        let Some(list) = tables.lists.get(key) else {
            return Ok(Vec::new());
        };
        Ok(range
            .resolve(list.len())
            .map(|r| list.range(r).cloned().collect())
            .unwrap_or_default())
    }

    fn put(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let mut tables = self.tables.write().map_err(|_| StoreError::LockPoisoned)?;
        tables
            .hashes
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    fn get_field(&self, key: &str, field: &str) -> Result<Option<String>> {
        let tables = self.tables.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(tables.hashes.get(key).and_then(|h| h.get(field)).cloned())
    }

    fn pop_front(&self, key: &str) -> Result<Option<String>> {
        let mut tables = self.tables.write().map_err(|_| StoreError::LockPoisoned)?;
        Ok(tables.lists.get_mut(key).and_then(VecDeque::pop_front))
    }
}
