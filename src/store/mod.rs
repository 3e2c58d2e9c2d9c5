//! Shared key/value and list store used for home configuration, per-step
//! simulation parameters, and published results.
//!
//! The store is populated by an external setup process. Players only read
//! community keys and only write the hash keyed by their own home name, so no
//! locking is layered on top of the backend.

mod memory;
#[cfg(feature = "redis")]
mod remote;

use std::collections::HashMap;

use thiserror::Error;

pub use memory::MemoryStore;
#[cfg(feature = "redis")]
pub use remote::RedisStore;

/// Errors surfaced by store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),

    #[error("store lock was poisoned")]
    LockPoisoned,

    #[error("malformed value at `{key}.{field}`: {value:?} ({reason})")]
    Malformed {
        key: String,
        field: String,
        value: String,
        reason: String,
    },
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Inclusive list range with Redis `LRANGE` semantics.
///
/// Negative indices count from the end of the list, so `ListRange::ALL`
/// (`0..=-1`) selects every element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListRange {
    pub start: isize,
    pub stop: isize,
}

impl ListRange {
    /// The whole list.
    pub const ALL: Self = Self { start: 0, stop: -1 };

    /// Resolves the range against a list of `len` elements.
    ///
    /// Returns `None` when the range selects nothing.
    pub fn resolve(&self, len: usize) -> Option<std::ops::RangeInclusive<usize>> {
        if len == 0 {
            return None;
        }
        let len = len as isize;
        let normalize = |i: isize| if i < 0 { len + i } else { i };

        let start = normalize(self.start).max(0);
        let stop = normalize(self.stop).min(len - 1);
        if start > stop || start >= len {
            return None;
        }
        Some(start as usize..=stop as usize)
    }
}

/// Point-in-time access to the shared store.
///
/// Every read is an independent snapshot; no transactional guarantees are
/// offered or needed.
pub trait SharedStore: Send + Sync {
    /// Reads every field of a hash. Missing keys read as an empty map.
    fn get(&self, key: &str) -> Result<HashMap<String, String>>;

    /// Reads a slice of a list. Missing keys read as an empty list.
    fn get_list(&self, key: &str, range: ListRange) -> Result<Vec<String>>;

    /// Writes one field of a hash, creating the hash if needed.
    fn put(&self, key: &str, field: &str, value: &str) -> Result<()>;

    /// Reads one field of a hash.
    fn get_field(&self, key: &str, field: &str) -> Result<Option<String>>;

    /// Atomically removes and returns the head of a list.
    ///
    /// This is the claim primitive that keeps two players from taking the
    /// same home record.
    fn pop_front(&self, key: &str) -> Result<Option<String>>;
}

/// Parses a numeric field, reporting the offending key on failure.
pub fn parse_f64(key: &str, field: &str, value: &str) -> Result<f64> {
    value.trim().parse::<f64>().map_err(|e| StoreError::Malformed {
        key: key.to_string(),
        field: field.to_string(),
        value: value.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_range_covers_every_element() {
        assert_eq!(ListRange::ALL.resolve(4), Some(0..=3));
    }

    #[test]
    fn negative_indices_count_from_end() {
        let r = ListRange { start: -2, stop: -1 };
        assert_eq!(r.resolve(5), Some(3..=4));
    }

    #[test]
    fn out_of_bounds_range_is_empty() {
        let r = ListRange { start: 6, stop: 10 };
        assert_eq!(r.resolve(5), None);
        assert_eq!(ListRange::ALL.resolve(0), None);
    }

    #[test]
    fn stop_is_clamped_to_last_element() {
        let r = ListRange { start: 1, stop: 99 };
        assert_eq!(r.resolve(3), Some(1..=2));
    }

    #[test]
    fn parse_f64_reports_field_path() {
        let err = parse_f64("simulation", "nsteps", "abc").unwrap_err();
        assert!(err.to_string().contains("simulation.nsteps"));
        assert_eq!(parse_f64("k", "f", " 2.5 ").ok(), Some(2.5));
    }
}
