//! In-memory implementation of the store seam.
//!
//! # Purpose
//! This backend keeps the whole keyspace in a mutex-guarded map and exists
//! for:
//! - local development and tests (no external dependencies)
//! - the demo binaries, which wire producers and consumers in one process
//!
//! # Consistency
//! - **Not durable**: all state is lost on process drop.
//! - **Single-process**: every "connection" handed out by
//!   [`MemoryStore::dedicated_connection`] shares one keyspace, so the
//!   blocking-pop coordination behaves the way a shared external store
//!   would, just without the network.
//!
//! # Blocking pops
//! Waiters park on a shared [`Notify`] and re-scan their keys after every
//! push. The notified future is created and enabled before the scan, so a
//! push that lands between the scan and the await is never missed.
use crate::{Popped, Store, StoreError, StoreResult};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Notify};

#[derive(Debug, Clone)]
enum Value {
    Text(Bytes),
    List(VecDeque<Bytes>),
}

struct Shared {
    keyspace: Mutex<HashMap<String, Value>>,
    // Woken after every push so parked pops can re-scan.
    wake: Notify,
}

/// Shared in-memory keyspace. Clones are connections to the same state.
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                keyspace: Mutex::new(HashMap::new()),
                wake: Notify::new(),
            }),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Pop the tail of the first non-empty list among `keys`, if any.
    /// Empty lists do not exist in the keyspace, so a present list always
    /// yields an element.
    async fn scan_pop(&self, keys: &[String]) -> StoreResult<Option<Popped>> {
        let mut guard = self.shared.keyspace.lock().await;
        for key in keys {
            match guard.get_mut(key) {
                Some(Value::List(list)) => {
                    if let Some(value) = list.pop_back() {
                        if list.is_empty() {
                            guard.remove(key);
                        }
                        return Ok(Some(Popped {
                            key: key.clone(),
                            value,
                        }));
                    }
                }
                Some(Value::Text(_)) => return Err(StoreError::WrongType(key.clone())),
                None => {}
            }
        }
        Ok(None)
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> StoreResult<String> {
        Ok("PONG".to_string())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<Bytes>> {
        let guard = self.shared.keyspace.lock().await;
        match guard.get(key) {
            Some(Value::Text(value)) => Ok(Some(value.clone())),
            Some(Value::List(_)) => Err(StoreError::WrongType(key.to_string())),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Bytes) -> StoreResult<()> {
        let mut guard = self.shared.keyspace.lock().await;
        guard.insert(key.to_string(), Value::Text(value));
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: Bytes) -> StoreResult<bool> {
        let mut guard = self.shared.keyspace.lock().await;
        if guard.contains_key(key) {
            return Ok(false);
        }
        guard.insert(key.to_string(), Value::Text(value));
        Ok(true)
    }

    async fn incr_by(&self, key: &str, delta: i64) -> StoreResult<i64> {
        let mut guard = self.shared.keyspace.lock().await;
        let current = match guard.get(key) {
            Some(Value::Text(raw)) => std::str::from_utf8(raw)
                .ok()
                .and_then(|text| text.parse::<i64>().ok())
                .ok_or_else(|| StoreError::NotInteger(key.to_string()))?,
            Some(Value::List(_)) => return Err(StoreError::WrongType(key.to_string())),
            None => 0,
        };
        let next = current + delta;
        guard.insert(key.to_string(), Value::Text(Bytes::from(next.to_string())));
        Ok(next)
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let guard = self.shared.keyspace.lock().await;
        Ok(guard.contains_key(key))
    }

    async fn delete(&self, keys: &[String]) -> StoreResult<u64> {
        let mut guard = self.shared.keyspace.lock().await;
        let mut removed = 0;
        for key in keys {
            if guard.remove(key).is_some() {
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn push_front(&self, key: &str, values: &[Bytes]) -> StoreResult<usize> {
        let length = {
            let mut guard = self.shared.keyspace.lock().await;
            let entry = guard
                .entry(key.to_string())
                .or_insert_with(|| Value::List(VecDeque::new()));
            match entry {
                Value::List(list) => {
                    for value in values {
                        list.push_front(value.clone());
                    }
                    list.len()
                }
                Value::Text(_) => return Err(StoreError::WrongType(key.to_string())),
            }
        };
        // Wake parked pops only after the lock is released.
        self.shared.wake.notify_waiters();
        Ok(length)
    }

    async fn list_len(&self, key: &str) -> StoreResult<Option<usize>> {
        let guard = self.shared.keyspace.lock().await;
        match guard.get(key) {
            Some(Value::List(list)) => Ok(Some(list.len())),
            Some(Value::Text(_)) => Err(StoreError::WrongType(key.to_string())),
            None => Ok(None),
        }
    }

    async fn pop_back(
        &self,
        keys: &[String],
        timeout: Option<Duration>,
    ) -> StoreResult<Option<Popped>> {
        let deadline = timeout.map(|timeout| tokio::time::Instant::now() + timeout);
        loop {
            // Register for wakeups before scanning so a push landing right
            // after the scan still wakes this waiter.
            let notified = self.shared.wake.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(popped) = self.scan_pop(keys).await? {
                return Ok(Some(popped));
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Ok(None);
                    }
                }
                None => notified.await,
            }
        }
    }

    async fn try_pop_back(&self, key: &str) -> StoreResult<Option<Bytes>> {
        let keys = [key.to_string()];
        Ok(self.scan_pop(&keys).await?.map(|popped| popped.value))
    }

    async fn trim(&self, key: &str, start: usize, stop: usize) -> StoreResult<()> {
        let mut guard = self.shared.keyspace.lock().await;
        match guard.get_mut(key) {
            Some(Value::List(list)) => {
                let kept: VecDeque<Bytes> = list
                    .iter()
                    .skip(start)
                    .take(stop.saturating_sub(start) + 1)
                    .cloned()
                    .collect();
                if kept.is_empty() {
                    guard.remove(key);
                } else {
                    *list = kept;
                }
                Ok(())
            }
            Some(Value::Text(_)) => Err(StoreError::WrongType(key.to_string())),
            None => Ok(()),
        }
    }

    async fn dedicated_connection(&self) -> StoreResult<Arc<dyn Store>> {
        Ok(Arc::new(self.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{Duration, timeout};

    fn bytes(raw: &'static [u8]) -> Bytes {
        Bytes::from_static(raw)
    }

    #[tokio::test]
    async fn ping_answers_pong() {
        let store = MemoryStore::new();
        assert_eq!(store.ping().await.expect("ping"), "PONG");
    }

    #[tokio::test]
    async fn string_ops_roundtrip() {
        let store = MemoryStore::new();
        assert!(store.set_nx("k", bytes(b"1")).await.expect("set_nx"));
        assert!(!store.set_nx("k", bytes(b"2")).await.expect("set_nx"));
        assert_eq!(store.get("k").await.expect("get"), Some(bytes(b"1")));
        assert!(store.exists("k").await.expect("exists"));
        assert_eq!(store.delete(&["k".to_string()]).await.expect("del"), 1);
        assert_eq!(store.get("k").await.expect("get"), None);
    }

    #[tokio::test]
    async fn incr_by_counts_from_zero() {
        let store = MemoryStore::new();
        assert_eq!(store.incr_by("n", 1).await.expect("incr"), 1);
        assert_eq!(store.incr_by("n", 41).await.expect("incr"), 42);
        assert_eq!(store.get("n").await.expect("get"), Some(bytes(b"42")));
    }

    #[tokio::test]
    async fn incr_by_rejects_non_integer() {
        let store = MemoryStore::new();
        store.set("n", bytes(b"nope")).await.expect("set");
        let err = store.incr_by("n", 1).await.expect_err("not integer");
        assert!(matches!(err, StoreError::NotInteger(_)));
    }

    #[tokio::test]
    async fn list_ops_honor_head_and_tail() {
        let store = MemoryStore::new();
        store.push_front("l", &[bytes(b"a")]).await.expect("push");
        store.push_front("l", &[bytes(b"b")]).await.expect("push");
        assert_eq!(store.list_len("l").await.expect("len"), Some(2));
        // Tail pop returns the oldest element.
        assert_eq!(
            store.try_pop_back("l").await.expect("pop"),
            Some(bytes(b"a"))
        );
        assert_eq!(
            store.try_pop_back("l").await.expect("pop"),
            Some(bytes(b"b"))
        );
        // Draining a list removes its key entirely.
        assert_eq!(store.list_len("l").await.expect("len"), None);
        assert!(!store.exists("l").await.expect("exists"));
    }

    #[tokio::test]
    async fn push_front_batch_orders_last_value_first() {
        let store = MemoryStore::new();
        let len = store
            .push_front("l", &[bytes(b"x"), bytes(b"y")])
            .await
            .expect("push");
        assert_eq!(len, 2);
        // "y" was pushed last, so "x" is at the tail.
        assert_eq!(
            store.try_pop_back("l").await.expect("pop"),
            Some(bytes(b"x"))
        );
    }

    #[tokio::test]
    async fn trim_keeps_head_range() {
        let store = MemoryStore::new();
        store
            .push_front("l", &[bytes(b"c"), bytes(b"b"), bytes(b"a")])
            .await
            .expect("push");
        store.trim("l", 0, 0).await.expect("trim");
        assert_eq!(store.list_len("l").await.expect("len"), Some(1));
        assert_eq!(
            store.try_pop_back("l").await.expect("pop"),
            Some(bytes(b"a"))
        );
    }

    #[tokio::test]
    async fn type_mismatch_is_reported() {
        let store = MemoryStore::new();
        store.set("s", bytes(b"text")).await.expect("set");
        let err = store.push_front("s", &[bytes(b"x")]).await.expect_err("type");
        assert!(matches!(err, StoreError::WrongType(_)));
        let err = store.list_len("s").await.expect_err("type");
        assert!(matches!(err, StoreError::WrongType(_)));

        store.push_front("l", &[bytes(b"x")]).await.expect("push");
        let err = store.get("l").await.expect_err("type");
        assert!(matches!(err, StoreError::WrongType(_)));
    }

    #[tokio::test]
    async fn blocking_pop_waits_for_push() {
        let store = MemoryStore::new();
        let waiter = store.dedicated_connection().await.expect("conn");
        let task = tokio::spawn(async move {
            waiter
                .pop_back(&["l".to_string()], None)
                .await
                .expect("pop")
        });
        // Give the waiter a moment to park before publishing.
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.push_front("l", &[bytes(b"v")]).await.expect("push");
        let popped = timeout(Duration::from_secs(1), task)
            .await
            .expect("wake")
            .expect("join")
            .expect("element");
        assert_eq!(popped.key, "l");
        assert_eq!(popped.value, bytes(b"v"));
    }

    #[tokio::test]
    async fn blocking_pop_reports_which_key_fired() {
        let store = MemoryStore::new();
        let keys = vec!["a".to_string(), "b".to_string()];
        let waiter = store.dedicated_connection().await.expect("conn");
        let scan = keys.clone();
        let task = tokio::spawn(async move { waiter.pop_back(&scan, None).await.expect("pop") });
        tokio::time::sleep(Duration::from_millis(20)).await;
        store.push_front("b", &[bytes(b"v")]).await.expect("push");
        let popped = timeout(Duration::from_secs(1), task)
            .await
            .expect("wake")
            .expect("join")
            .expect("element");
        assert_eq!(popped.key, "b");
    }

    #[tokio::test]
    async fn blocking_pop_times_out_empty_handed() {
        let store = MemoryStore::new();
        let popped = store
            .pop_back(&["l".to_string()], Some(Duration::from_millis(30)))
            .await
            .expect("pop");
        assert!(popped.is_none());
    }
}
