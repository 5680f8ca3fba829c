//! Session state shared between the applier, writers and readers.

use crate::error::StoreError;
use shopfront_engine::{CacheSlot, GenerationCounter, LocalCache};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex, MutexGuard};

/// Everything one session knows locally.
#[derive(Debug)]
pub struct SyncState {
    pub cache: LocalCache,
    /// Issues generations for optimistic writes
    pub writes: GenerationCounter,
    /// Last listener failure per slot, cleared when the slot re-subscribes
    pub errors: BTreeMap<CacheSlot, StoreError>,
}

impl SyncState {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            cache: LocalCache::new(owner),
            writes: GenerationCounter::new(),
            errors: BTreeMap::new(),
        }
    }
}

/// Handle to the session state plus a change signal.
///
/// Every mutation of the state is followed by [`SharedState::notify`] so
/// readers can wait for a condition instead of polling.
#[derive(Debug, Clone)]
pub struct SharedState {
    inner: Arc<Mutex<SyncState>>,
    changes: Arc<watch::Sender<u64>>,
}

impl SharedState {
    pub fn new(state: SyncState) -> Self {
        let (changes, _) = watch::channel(0);
        Self {
            inner: Arc::new(Mutex::new(state)),
            changes: Arc::new(changes),
        }
    }

    pub async fn lock(&self) -> MutexGuard<'_, SyncState> {
        self.inner.lock().await
    }

    /// Signal that the state changed.
    pub fn notify(&self) {
        self.changes.send_modify(|version| *version = version.wrapping_add(1));
    }

    pub fn subscribe_changes(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Wait until `predicate` holds for the current state.
    pub async fn wait_until<F>(&self, mut predicate: F)
    where
        F: FnMut(&SyncState) -> bool,
    {
        // subscribe before checking so a change between the check and the
        // wait is not lost
        let mut changes = self.subscribe_changes();
        loop {
            changes.borrow_and_update();
            if predicate(&*self.lock().await) {
                return;
            }
            if changes.changed().await.is_err() {
                return;
            }
        }
    }
}
