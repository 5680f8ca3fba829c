//! Per-key serialized optimistic writes.
//!
//! A mutation is applied to the cache immediately, then written to the
//! remote store while holding the lock of its document path. Different paths
//! write in parallel; writes to one path go out one at a time, each computed
//! from the latest confirmed state plus the writes queued before it.

use crate::error::{Result, SyncError};
use crate::remote::RemoteStore;
use crate::state::SharedState;
use dashmap::DashMap;
use shopfront_engine::{CachedEntity, DocPath, Mutation};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct MutationQueue {
    store: Arc<dyn RemoteStore>,
    state: SharedState,
    locks: DashMap<DocPath, Arc<Mutex<()>>>,
}

impl MutationQueue {
    pub fn new(store: Arc<dyn RemoteStore>, state: SharedState) -> Self {
        Self {
            store,
            state,
            locks: DashMap::new(),
        }
    }

    fn key_lock(&self, path: &DocPath) -> Arc<Mutex<()>> {
        Arc::clone(&self.locks.entry(path.clone()).or_default())
    }

    /// Apply `mutation` optimistically and write the result.
    ///
    /// A mutation rejected by a business rule fails before anything is
    /// queued. On write failure the optimistic change is rolled back and the
    /// error returned; nothing is retried. If the session is torn down while
    /// the write is in flight the result is dropped with
    /// [`SyncError::StaleGeneration`].
    pub async fn enqueue<T: CachedEntity>(&self, mutation: Mutation<T>) -> Result<T> {
        let (path, epoch, generation) = {
            let mut state = self.state.lock().await;
            let path = T::path(&state.cache);
            let epoch = state.cache.epoch();
            let generation = state.writes.tick();
            T::layer_mut(&mut state.cache).push(generation, mutation)?;
            (path, epoch, generation)
        };
        self.state.notify();
        tracing::debug!(path = %path, generation = %generation, "mutation queued");

        let lock = self.key_lock(&path);
        let _guard = lock.lock().await;

        let value = {
            let mut state = self.state.lock().await;
            if state.cache.epoch() != epoch {
                return Err(SyncError::StaleGeneration(epoch));
            }
            let prepared = T::layer(&state.cache).prepare(generation);
            match prepared {
                // folded into a later acknowledged write
                None => return Ok(T::layer(&state.cache).view()),
                Some(Err(e)) => {
                    T::layer_mut(&mut state.cache).rollback(generation);
                    drop(state);
                    self.state.notify();
                    return Err(e.into());
                }
                Some(Ok(value)) => {
                    let value = value.stamped(crate::now_millis());
                    T::layer_mut(&mut state.cache).begin_write(generation, value.clone());
                    value
                }
            }
        };

        let written = self.store.set(&path, value.to_value()).await;

        let mut state = self.state.lock().await;
        if state.cache.epoch() != epoch {
            tracing::debug!(
                path = %path,
                generation = %generation,
                "write finished after teardown; result dropped"
            );
            return Err(SyncError::StaleGeneration(epoch));
        }
        let layer = T::layer_mut(&mut state.cache);
        let outcome = match written {
            Ok(()) => {
                if !layer.acknowledge(generation, value) {
                    tracing::warn!(path = %path, generation = %generation, "stale confirmation discarded");
                }
                Ok(layer.view())
            }
            Err(e) => {
                layer.rollback(generation);
                tracing::warn!(
                    path = %path,
                    generation = %generation,
                    error = %e,
                    "write failed; optimistic change rolled back"
                );
                Err(e.into())
            }
        };
        drop(state);
        self.state.notify();
        outcome
    }

    /// Run `operation` while holding the write lock of `path`.
    pub async fn serialize<F, R>(&self, path: &DocPath, operation: F) -> R
    where
        F: Future<Output = R>,
    {
        let lock = self.key_lock(path);
        let _guard = lock.lock().await;
        operation.await
    }

    /// Writes currently queued or in flight for `T`.
    pub async fn pending<T: CachedEntity>(&self) -> usize {
        T::layer(&self.state.lock().await.cache).pending_len()
    }
}
