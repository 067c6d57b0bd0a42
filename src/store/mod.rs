//! # Key-value store capability
//!
//! Ordered lists, sorted sets and key expiry: the small subset of a Redis-like
//! store the session layer needs. Indices follow the usual list conventions,
//! negative values counting from the tail.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Key '{0}' holds a value of the wrong type")]
    WrongType(String),

    #[error("Store backend failure: {0}")]
    Backend(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[async_trait]
pub trait KvStore: Send + Sync {
    /// Append to the tail of a list; returns the new length
    async fn rpush(&self, key: &str, value: &str) -> Result<usize>;

    async fn lindex(&self, key: &str, index: i64) -> Result<Option<String>>;

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>>;

    /// Keep only `start..=stop`; an empty range deletes the key
    async fn ltrim(&self, key: &str, start: i64, stop: i64) -> Result<()>;

    /// Overwrite an element; `false` when the key or index does not exist
    async fn lset_if_exists(&self, key: &str, index: i64, value: &str) -> Result<bool>;

    /// Set a time to live; `false` when the key does not exist
    async fn expire(&self, key: &str, seconds: u64) -> Result<bool>;

    async fn zadd(&self, key: &str, score: f64, member: &str) -> Result<()>;

    async fn zincrby(&self, key: &str, increment: f64, member: &str) -> Result<f64>;

    /// Members with `min <= score <= max`, ascending by score
    async fn zrange_by_score(&self, key: &str, min: f64, max: f64) -> Result<Vec<(String, f64)>>;

    async fn zrem(&self, key: &str, member: &str) -> Result<bool>;

    async fn zrem_range_by_score(&self, key: &str, min: f64, max: f64) -> Result<usize>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Delete keys; returns how many existed
    async fn del(&self, keys: &[&str]) -> Result<usize>;

    /// Delete the list `guard` and append to `key` in one step
    ///
    /// `false`, with nothing written, when `guard` does not exist.
    async fn rpush_consume(&self, key: &str, value: &str, guard: &str) -> Result<bool>;

    /// Pop from the tail of `source` and push onto the head of `destination`,
    /// waiting up to `timeout` for `source` to become non-empty
    async fn brpoplpush(
        &self,
        source: &str,
        destination: &str,
        timeout: Duration,
    ) -> Result<Option<String>>;
}

/// Resolve an inclusive, possibly negative, index range against a length
///
/// Returns `None` when the range selects nothing.
pub fn normalize_range(len: usize, start: i64, stop: i64) -> Option<(usize, usize)> {
    let len = len as i64;
    let start = if start < 0 { (len + start).max(0) } else { start };
    let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };
    if len == 0 || start > stop || start >= len {
        return None;
    }
    Some((start as usize, stop as usize))
}

/// Resolve a single possibly negative index
pub fn normalize_index(len: usize, index: i64) -> Option<usize> {
    let len = len as i64;
    let index = if index < 0 { len + index } else { index };
    (0..len).contains(&index).then_some(index as usize)
}
