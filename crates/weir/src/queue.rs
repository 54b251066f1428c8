// Queue handle and the coordination protocol layered on the store
// primitives. Producers and consumers are each serialized cluster-wide by a
// one-slot semaphore; a third one-slot list carries the "not full"
// condition, and the `closed` key doubles as flag and consumer wakeup.
use crate::error::{QueueError, Result};
use crate::keys::QueueKeys;
use crate::slot::{Slot, sentinel};
use bytes::Bytes;
use std::sync::Arc;
use weir_store::{Popped, Store, StoreError};

/// Bound value meaning "no cap".
pub const UNBOUNDED: u64 = 0;

/// Snapshot of the queue's monotonic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub produced_messages: u64,
    pub produced_bytes: u64,
    pub consumed_messages: u64,
    pub consumed_bytes: u64,
}

/// Client-local handle binding one store connection to one queue name.
///
/// The handle caches `bound` and `closed` as a latency shortcut only; every
/// mutating operation re-reads the authoritative keys through the store. A
/// handle serializes its own operations (methods take `&mut self`). For
/// concurrent producers and consumers open one handle per task, or use the
/// stream adapters, which do that internally.
///
/// ```
/// use bytes::Bytes;
/// use std::sync::Arc;
/// use weir::Queue;
/// use weir_store::MemoryStore;
///
/// let rt = tokio::runtime::Runtime::new().expect("rt");
/// rt.block_on(async {
///     let store = Arc::new(MemoryStore::new());
///     let mut queue = Queue::open(store, "jobs", "demo").await.expect("open");
///     queue.create(8).await.expect("create");
///     queue.put(Bytes::from_static(b"payload")).await.expect("put");
///     assert_eq!(
///         queue.get().await.expect("get"),
///         Bytes::from_static(b"payload")
///     );
/// });
/// ```
pub struct Queue {
    store: Arc<dyn Store>,
    keys: QueueKeys,
    client_uid: String,
    producer_slot: Slot,
    consumer_slot: Slot,
    not_full: Slot,
    // Advisory caches.
    bound: Option<u64>,
    closed: bool,
}

impl Queue {
    /// Bind a handle to `prefix:name` on `store`.
    ///
    /// Probes the store's liveness, then snapshots the queue's existence,
    /// bound, and closed flag into the advisory caches.
    pub async fn open(store: Arc<dyn Store>, prefix: &str, name: &str) -> Result<Self> {
        let pong = store.ping().await?;
        if pong != "PONG" {
            return Err(QueueError::PongFailure);
        }

        let keys = QueueKeys::new(prefix, name);
        let mut queue = Self {
            producer_slot: Slot::new(&keys.producer_free),
            consumer_slot: Slot::new(&keys.consumer_free),
            not_full: Slot::new(&keys.not_full),
            client_uid: client_uid(),
            store,
            keys,
            bound: None,
            closed: false,
        };
        queue.bound = queue.read_bound().await?;
        queue.closed = queue.store.exists(&queue.keys.closed).await?;
        Ok(queue)
    }

    /// The identity recorded in the `producer`/`consumer` keys while this
    /// handle holds a slot. Diagnostic only.
    pub fn client_uid(&self) -> &str {
        &self.client_uid
    }

    /// A handle to the same queue on its own dedicated connection.
    pub(crate) async fn detached(&self) -> Result<Queue> {
        let store = self.store.dedicated_connection().await?;
        Ok(Queue {
            producer_slot: self.producer_slot.clone(),
            consumer_slot: self.consumer_slot.clone(),
            not_full: self.not_full.clone(),
            client_uid: self.client_uid.clone(),
            store,
            keys: self.keys.clone(),
            bound: self.bound,
            closed: self.closed,
        })
    }

    /// Create the queue with the given capacity ([`UNBOUNDED`] for none).
    ///
    /// Exactly one of several racing creators wins; the rest fail with
    /// `QueueAlreadyExists`. The winner seeds the producer and consumer
    /// slots and the "not full" condition; a seed landing on a populated
    /// key aborts with `CreationFailure`.
    pub async fn create(&mut self, bound: u64) -> Result<()> {
        let won = self
            .store
            .set_nx(&self.keys.bound, Bytes::from(bound.to_string()))
            .await?;
        if !won {
            return Err(QueueError::QueueAlreadyExists);
        }
        self.bound = Some(bound);
        self.closed = false;

        self.producer_slot.seed(&*self.store).await?;
        self.consumer_slot.seed(&*self.store).await?;
        self.not_full.seed(&*self.store).await?;
        Ok(())
    }

    /// Whether the queue currently exists (its `bound` key is present).
    pub async fn exists(&mut self) -> Result<bool> {
        let exists = self.store.exists(&self.keys.bound).await?;
        if !exists {
            self.bound = None;
        }
        Ok(exists)
    }

    /// Number of messages currently in the body.
    pub async fn length(&mut self) -> Result<u64> {
        match self.store.list_len(&self.keys.body).await? {
            Some(length) => Ok(length as u64),
            // The store drops empty lists, so a missing body means either
            // an empty queue or no queue at all.
            None => {
                if self.exists().await? {
                    Ok(0)
                } else {
                    Err(QueueError::QueueDoesNotExist)
                }
            }
        }
    }

    /// Whether the queue has been closed.
    pub async fn is_closed(&mut self) -> Result<bool> {
        if !self.exists().await? {
            return Err(QueueError::QueueDoesNotExist);
        }
        self.refresh_closed().await
    }

    /// Read the four monotonic counters. Counters a queue never touched
    /// read as zero.
    pub async fn stats(&mut self) -> Result<QueueStats> {
        if !self.exists().await? {
            return Err(QueueError::QueueDoesNotExist);
        }
        Ok(QueueStats {
            produced_messages: self.read_counter(&self.keys.stats_produced_messages).await?,
            produced_bytes: self.read_counter(&self.keys.stats_produced_bytes).await?,
            consumed_messages: self.read_counter(&self.keys.stats_consumed_messages).await?,
            consumed_bytes: self.read_counter(&self.keys.stats_consumed_bytes).await?,
        })
    }

    /// Append a message, waiting for a free slot on a bounded queue.
    ///
    /// On success the payload is in the body, the produced counters are
    /// bumped, and (if bounded) the post-insert length is within the bound.
    pub async fn put(&mut self, payload: Bytes) -> Result<()> {
        let bound = self.require_bound().await?;
        self.producer_slot.acquire(&*self.store).await?;
        let result = self.put_locked(bound, payload).await;
        let released = self.producer_slot.release(&*self.store).await;
        merge_release(result, released)
    }

    async fn put_locked(&mut self, bound: u64, payload: Bytes) -> Result<()> {
        self.register(&self.keys.producer).await?;
        if self.refresh_closed().await? {
            return Err(QueueError::QueueIsClosed);
        }

        if bound > 0 {
            // Consume the free-capacity sentinel. The queue may have been
            // deleted while we were parked here, and the wakeup sentinel a
            // deletion pushes is indistinguishable from real capacity, so
            // re-verify before touching the body.
            self.not_full.acquire(&*self.store).await?;
            if !self.store.exists(&self.keys.bound).await? {
                self.bound = None;
                return Err(QueueError::QueueDoesNotExist);
            }
        }

        let length = self
            .store
            .push_front(&self.keys.body, &[payload.clone()])
            .await? as u64;
        if bound > 0 && length < bound {
            self.not_full.signal_and_trim(&*self.store).await?;
        }
        // When length == bound the sentinel stays consumed; the next
        // successful get restores it.

        self.bump_produced(payload.len()).await
    }

    /// Append without waiting. Fails `QueueInUse` when another producer is
    /// in its critical section and `QueueFull` when a bounded queue has no
    /// free slot.
    pub async fn try_put(&mut self, payload: Bytes) -> Result<()> {
        let bound = self.require_bound().await?;
        if !self.producer_slot.try_acquire(&*self.store).await? {
            return Err(QueueError::QueueInUse("producer"));
        }
        let result = self.try_put_locked(bound, payload).await;
        let released = self.producer_slot.release(&*self.store).await;
        merge_release(result, released)
    }

    async fn try_put_locked(&mut self, bound: u64, payload: Bytes) -> Result<()> {
        self.register(&self.keys.producer).await?;
        if self.refresh_closed().await? {
            return Err(QueueError::QueueIsClosed);
        }

        if bound > 0 && !self.not_full.try_acquire(&*self.store).await? {
            return Err(QueueError::QueueFull);
        }

        let length = self
            .store
            .push_front(&self.keys.body, &[payload.clone()])
            .await? as u64;
        if bound > 0 && length < bound {
            self.not_full.signal_and_trim(&*self.store).await?;
        }

        self.bump_produced(payload.len()).await
    }

    /// Next message in FIFO order, waiting while the queue is empty and
    /// open. A closed queue drains, then reports `QueueIsClosed`.
    pub async fn get(&mut self) -> Result<Bytes> {
        self.require_bound().await?;
        self.consumer_slot.acquire(&*self.store).await?;
        let result = self.get_locked().await;
        let released = self.consumer_slot.release(&*self.store).await;
        merge_release(result, released)
    }

    async fn get_locked(&mut self) -> Result<Bytes> {
        self.register(&self.keys.consumer).await?;

        let payload = if self.refresh_closed().await? {
            // Closed queues only drain. An absent body list means empty.
            if !self.store.exists(&self.keys.body).await? {
                return Err(QueueError::QueueIsClosed);
            }
            let keys = [self.keys.body.clone()];
            expect_popped(self.store.pop_back(&keys, None).await?)?.value
        } else {
            // Waiting on the body and the closed flag together is what
            // lets a close (or delete) wake a parked consumer.
            let keys = [self.keys.body.clone(), self.keys.closed.clone()];
            let popped = expect_popped(self.store.pop_back(&keys, None).await?)?;
            if popped.key == self.keys.closed {
                self.closed = true;
                return Err(QueueError::QueueIsClosed);
            }
            popped.value
        };

        self.not_full.signal_and_trim(&*self.store).await?;
        self.bump_consumed(payload.len()).await?;
        Ok(payload)
    }

    /// Pop without waiting. `Ok(None)` when the queue is open and empty;
    /// `QueueInUse` when another consumer holds the slot.
    pub async fn try_get(&mut self) -> Result<Option<Bytes>> {
        self.require_bound().await?;
        if !self.consumer_slot.try_acquire(&*self.store).await? {
            return Err(QueueError::QueueInUse("consumer"));
        }
        let result = self.try_get_locked().await;
        let released = self.consumer_slot.release(&*self.store).await;
        merge_release(result, released)
    }

    async fn try_get_locked(&mut self) -> Result<Option<Bytes>> {
        self.register(&self.keys.consumer).await?;

        match self.store.try_pop_back(&self.keys.body).await? {
            Some(payload) => {
                self.not_full.signal_and_trim(&*self.store).await?;
                self.bump_consumed(payload.len()).await?;
                Ok(Some(payload))
            }
            None => {
                if self.refresh_closed().await? {
                    Err(QueueError::QueueIsClosed)
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// Seal the queue. Later puts fail `QueueIsClosed`; gets drain what is
    /// left. Closing an already-closed queue reports `QueueIsClosed`.
    pub async fn close(&mut self) -> Result<()> {
        self.require_bound().await?;
        // Taking the producer slot linearizes the close against every
        // in-flight put.
        self.producer_slot.acquire(&*self.store).await?;
        let result = self.close_locked().await;
        let released = self.producer_slot.release(&*self.store).await;
        merge_release(result, released)
    }

    async fn close_locked(&mut self) -> Result<()> {
        self.register(&self.keys.producer).await?;
        if self.refresh_closed().await? {
            return Err(QueueError::QueueIsClosed);
        }
        // Two sentinels: a consumer racing to pop one still leaves the
        // flag observable.
        self.store
            .push_front(&self.keys.closed, &[sentinel(), sentinel()])
            .await?;
        self.closed = true;
        tracing::debug!(queue = %self.keys.body, "queue closed");
        Ok(())
    }

    /// Tear the queue down completely, waking any parked producer or
    /// consumer first so their slots can be reclaimed without deadlock.
    pub async fn delete(&mut self) -> Result<()> {
        if !self.exists().await? {
            return Err(QueueError::QueueDoesNotExist);
        }

        // Removing `bound` first stops new entries to the critical
        // sections on the happy path.
        self.store.delete(&[self.keys.bound.clone()]).await?;

        // Wake producers parked on the space wait and consumers parked on
        // the body/closed wait before taking the slots; doing it after
        // would deadlock against them.
        self.store
            .push_front(&self.keys.not_full, &[sentinel()])
            .await?;
        self.store
            .push_front(&self.keys.closed, &[sentinel(), sentinel()])
            .await?;

        self.producer_slot.acquire(&*self.store).await?;
        self.store
            .delete(&[self.keys.producer.clone(), self.keys.producer_free.clone()])
            .await?;

        self.consumer_slot.acquire(&*self.store).await?;
        self.store
            .delete(&[self.keys.consumer.clone(), self.keys.consumer_free.clone()])
            .await?;

        let stats = self.keys.stats();
        let mut remaining: Vec<String> = vec![
            self.keys.not_full.clone(),
            self.keys.closed.clone(),
            self.keys.body.clone(),
        ];
        remaining.extend(stats.iter().map(|key| key.to_string()));
        self.store.delete(&remaining).await?;

        self.bound = None;
        self.closed = false;
        tracing::debug!(queue = %self.keys.body, "queue deleted");
        Ok(())
    }

    /// Last-observed capacity; `None` when the queue was last seen
    /// missing. Advisory only; every operation re-reads the store.
    pub fn cached_bound(&self) -> Option<u64> {
        self.bound
    }

    /// Last-observed closed flag. Advisory only.
    pub fn cached_closed(&self) -> bool {
        self.closed
    }

    async fn register(&self, key: &str) -> Result<()> {
        self.store
            .set(key, Bytes::from(self.client_uid.clone()))
            .await?;
        Ok(())
    }

    async fn refresh_closed(&mut self) -> Result<bool> {
        self.closed = self.store.exists(&self.keys.closed).await?;
        Ok(self.closed)
    }

    async fn read_bound(&self) -> Result<Option<u64>> {
        match self.store.get(&self.keys.bound).await? {
            Some(raw) => Ok(Some(parse_u64(&self.keys.bound, &raw)?)),
            None => Ok(None),
        }
    }

    /// Re-read the bound, refreshing the cache. The authoritative read is
    /// what lets a handle opened before `create` see the real capacity.
    async fn require_bound(&mut self) -> Result<u64> {
        match self.read_bound().await? {
            Some(bound) => {
                self.bound = Some(bound);
                Ok(bound)
            }
            None => {
                self.bound = None;
                Err(QueueError::QueueDoesNotExist)
            }
        }
    }

    async fn read_counter(&self, key: &str) -> Result<u64> {
        match self.store.get(key).await? {
            Some(raw) => Ok(parse_u64(key, &raw)?),
            None => Ok(0),
        }
    }

    async fn bump_produced(&self, payload_len: usize) -> Result<()> {
        self.store
            .incr_by(&self.keys.stats_produced_messages, 1)
            .await?;
        self.store
            .incr_by(&self.keys.stats_produced_bytes, payload_len as i64)
            .await?;
        metrics::counter!("weir_produced_messages_total").increment(1);
        metrics::counter!("weir_produced_bytes_total").increment(payload_len as u64);
        Ok(())
    }

    async fn bump_consumed(&self, payload_len: usize) -> Result<()> {
        self.store
            .incr_by(&self.keys.stats_consumed_messages, 1)
            .await?;
        self.store
            .incr_by(&self.keys.stats_consumed_bytes, payload_len as i64)
            .await?;
        metrics::counter!("weir_consumed_messages_total").increment(1);
        metrics::counter!("weir_consumed_bytes_total").increment(payload_len as u64);
        Ok(())
    }
}

fn client_uid() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    format!("{host}_pid{}", std::process::id())
}

fn parse_u64(key: &str, raw: &Bytes) -> Result<u64> {
    std::str::from_utf8(raw)
        .ok()
        .and_then(|text| text.trim().parse::<u64>().ok())
        .ok_or_else(|| StoreError::NotInteger(key.to_string()).into())
}

/// Combine a critical section's outcome with its slot release. The
/// section's error wins; a release failure surfaces only when the section
/// itself succeeded.
fn merge_release<T>(result: Result<T>, released: Result<()>) -> Result<T> {
    match (result, released) {
        (Err(err), _) => Err(err),
        (Ok(value), Ok(())) => Ok(value),
        (Ok(_), Err(err)) => Err(err),
    }
}

fn expect_popped(popped: Option<Popped>) -> Result<Popped> {
    // A pop with no timeout only returns once a list fired.
    popped.ok_or_else(|| {
        StoreError::Unexpected(anyhow::anyhow!("blocking pop returned empty without a timeout"))
            .into()
    })
}
