// Store capability seam: the primitive operations the queue protocol is
// layered on. The wire driver behind them is deliberately out of scope.
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;

pub mod memory;

pub use memory::MemoryStore;

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("wrong value type at key {0}")]
    WrongType(String),
    #[error("value at key {0} is not an integer")]
    NotInteger(String),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

/// Element returned by a blocking pop, together with the key that fired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Popped {
    pub key: String,
    pub value: Bytes,
}

/// One connection's worth of store primitives.
///
/// Blocking pops park the connection they run on, so a caller that needs to
/// stay responsive while another task waits must hand that task its own
/// connection via [`Store::dedicated_connection`].
#[async_trait]
pub trait Store: Send + Sync {
    /// Liveness probe. A healthy store answers `PONG`.
    async fn ping(&self) -> StoreResult<String>;

    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>>;

    async fn set(&self, key: &str, value: Bytes) -> StoreResult<()>;

    /// Write `value` only if `key` is absent. Returns whether the write won.
    async fn set_nx(&self, key: &str, value: Bytes) -> StoreResult<bool>;

    /// Add `delta` to the integer at `key`, treating an absent key as zero.
    /// Returns the resulting value.
    async fn incr_by(&self, key: &str, delta: i64) -> StoreResult<i64>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Remove keys of any type. Returns how many of them existed.
    async fn delete(&self, keys: &[String]) -> StoreResult<u64>;

    /// Push values onto the head of the list at `key`, creating the list if
    /// missing. Values are pushed one at a time, so the last value ends up
    /// at the head. Returns the resulting list length.
    async fn push_front(&self, key: &str, values: &[Bytes]) -> StoreResult<usize>;

    /// Length of the list at `key`, or `None` when the key is missing.
    async fn list_len(&self, key: &str) -> StoreResult<Option<usize>>;

    /// Pop one element from the tail of the first non-empty list among
    /// `keys`, blocking until one appears. Returns `None` only when the
    /// timeout elapses; with no timeout the call waits indefinitely.
    async fn pop_back(
        &self,
        keys: &[String],
        timeout: Option<Duration>,
    ) -> StoreResult<Option<Popped>>;

    /// Pop the tail of the list at `key` if it has one, without waiting.
    async fn try_pop_back(&self, key: &str) -> StoreResult<Option<Bytes>>;

    /// Keep only the list elements in positions `start..=stop`, counted
    /// from the head. An empty result removes the key.
    async fn trim(&self, key: &str, start: usize, stop: usize) -> StoreResult<()>;

    /// A fresh connection to the same store, for workers that must not
    /// share this one.
    async fn dedicated_connection(&self) -> StoreResult<Arc<dyn Store>>;
}
