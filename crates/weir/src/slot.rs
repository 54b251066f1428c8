// One-slot list primitives. A list holding a single sentinel element acts
// as a cluster-wide binary semaphore (acquire = blocking tail pop, release
// = head push); the same shape doubles as the "not full" condition.
use crate::error::{QueueError, Result};
use bytes::Bytes;
use weir_store::Store;

pub(crate) fn sentinel() -> Bytes {
    // The contents never matter, only presence.
    Bytes::from_static(b"0")
}

#[derive(Debug, Clone)]
pub(crate) struct Slot {
    key: String,
}

impl Slot {
    pub(crate) fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
        }
    }

    /// Seed a fresh slot with its single sentinel. A resulting length other
    /// than one means the key was already populated.
    pub(crate) async fn seed(&self, store: &dyn Store) -> Result<()> {
        let length = store.push_front(&self.key, &[sentinel()]).await?;
        if length != 1 {
            return Err(QueueError::CreationFailure);
        }
        Ok(())
    }

    /// Park until the sentinel can be taken.
    pub(crate) async fn acquire(&self, store: &dyn Store) -> Result<()> {
        let keys = [self.key.clone()];
        store.pop_back(&keys, None).await?;
        Ok(())
    }

    /// Take the sentinel only if it is free right now.
    pub(crate) async fn try_acquire(&self, store: &dyn Store) -> Result<bool> {
        Ok(store.try_pop_back(&self.key).await?.is_some())
    }

    /// Hand the sentinel back. Must run on every exit path of the section
    /// the slot protects.
    pub(crate) async fn release(&self, store: &dyn Store) -> Result<()> {
        store.push_front(&self.key, &[sentinel()]).await?;
        Ok(())
    }

    /// Signal the condition, then collapse duplicate signals back to one
    /// element. Concurrent signalers can each land a sentinel; the trim
    /// keeps the slot binary.
    pub(crate) async fn signal_and_trim(&self, store: &dyn Store) -> Result<()> {
        store.push_front(&self.key, &[sentinel()]).await?;
        store.trim(&self.key, 0, 0).await?;
        Ok(())
    }
}
