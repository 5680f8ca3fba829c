//! Live subscriptions feeding the local cache.
//!
//! Each cache slot has at most one open subscription. Remote snapshots are
//! turned into typed [`ChangeEvent`]s by a forwarding task and pushed into a
//! single channel consumed by the session's applier, so events for all slots
//! are applied one at a time in delivery order.

use crate::error::StoreError;
use crate::remote::{RemoteEvent, RemoteStore, SubscriptionTarget};
use dashmap::DashMap;
use serde_json::Value;
use shopfront_engine::{CacheSlot, ChangeEvent, DocPath, Document, Generation};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// What a subscription delivered.
#[derive(Debug, Clone, PartialEq)]
pub enum SlotPayload {
    Change(ChangeEvent),
    /// The listener failed and is closed; it is not reopened automatically
    Error(StoreError),
}

/// An event for one cache slot, tagged with the session epoch it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotUpdate {
    pub slot: CacheSlot,
    pub epoch: Generation,
    pub payload: SlotPayload,
}

/// Sender side of the applier channel.
pub type UpdateSink = mpsc::UnboundedSender<SlotUpdate>;

#[derive(Debug)]
struct ActiveSubscription {
    target: SubscriptionTarget,
    epoch: Generation,
    remote_id: String,
    task: JoinHandle<()>,
}

/// Turn a full snapshot into change events against what was seen before.
///
/// The first snapshot of a subscription always becomes a single
/// `FullReplace`, even when empty, so the slot is marked as loaded. Later
/// snapshots yield one event per added, modified or removed document.
pub fn diff_snapshot(
    known: &mut BTreeMap<DocPath, Value>,
    documents: Vec<Document>,
    first: bool,
) -> Vec<ChangeEvent> {
    if first {
        *known = documents
            .iter()
            .map(|doc| (doc.path.clone(), doc.data.clone()))
            .collect();
        return vec![ChangeEvent::FullReplace { documents }];
    }

    let mut events = Vec::new();
    let mut current = BTreeMap::new();
    for document in documents {
        current.insert(document.path.clone(), document.data.clone());
        match known.get(&document.path) {
            None => events.push(ChangeEvent::Added { document }),
            Some(previous) if previous != &document.data => {
                events.push(ChangeEvent::Modified { document })
            }
            Some(_) => {}
        }
    }
    for path in known.keys() {
        if !current.contains_key(path) {
            events.push(ChangeEvent::Removed { path: path.clone() });
        }
    }
    *known = current;
    events
}

async fn forward(
    slot: CacheSlot,
    epoch: Generation,
    mut events: mpsc::UnboundedReceiver<RemoteEvent>,
    sink: UpdateSink,
) {
    let mut known = BTreeMap::new();
    let mut first = true;

    while let Some(event) = events.recv().await {
        match event {
            RemoteEvent::Snapshot(documents) => {
                for change in diff_snapshot(&mut known, documents, first) {
                    let update = SlotUpdate {
                        slot,
                        epoch,
                        payload: SlotPayload::Change(change),
                    };
                    if sink.send(update).is_err() {
                        return;
                    }
                }
                first = false;
            }
            RemoteEvent::Error(error) => {
                tracing::warn!(slot = %slot, error = %error, "subscription failed");
                let _ = sink.send(SlotUpdate {
                    slot,
                    epoch,
                    payload: SlotPayload::Error(error),
                });
                return;
            }
        }
    }
}

/// Opens, replaces and closes the per-slot subscriptions of a session.
pub struct SubscriptionManager {
    store: Arc<dyn RemoteStore>,
    active: DashMap<CacheSlot, ActiveSubscription>,
    sink: UpdateSink,
}

impl SubscriptionManager {
    pub fn new(store: Arc<dyn RemoteStore>, sink: UpdateSink) -> Self {
        Self {
            store,
            active: DashMap::new(),
            sink,
        }
    }

    /// Make sure `slot` listens to `target` for the given session epoch.
    ///
    /// Returns `false` when an identical subscription is already running.
    /// Otherwise the previous subscription is torn down before the new one is
    /// opened, so no event is delivered twice.
    pub async fn subscribe(
        &self,
        slot: CacheSlot,
        target: SubscriptionTarget,
        epoch: Generation,
    ) -> Result<bool, StoreError> {
        let unchanged = self.active.get(&slot).is_some_and(|active| {
            active.target == target && active.epoch == epoch && !active.task.is_finished()
        });
        if unchanged {
            return Ok(false);
        }

        self.unsubscribe(slot).await;

        let subscription = self.store.subscribe(target.clone()).await?;
        let task = tokio::spawn(forward(slot, epoch, subscription.events, self.sink.clone()));

        tracing::info!(slot = %slot, target = %target, epoch = %epoch, "subscription opened");
        self.active.insert(
            slot,
            ActiveSubscription {
                target,
                epoch,
                remote_id: subscription.id,
                task,
            },
        );
        Ok(true)
    }

    /// Close the subscription of a slot. Nothing is delivered for it afterwards.
    pub async fn unsubscribe(&self, slot: CacheSlot) -> bool {
        let Some((_, active)) = self.active.remove(&slot) else {
            return false;
        };
        active.task.abort();
        self.store.unsubscribe(&active.remote_id).await;
        tracing::info!(slot = %slot, target = %active.target, "subscription closed");
        true
    }

    pub async fn unsubscribe_all(&self) {
        for slot in self.active_slots() {
            self.unsubscribe(slot).await;
        }
    }

    pub fn target(&self, slot: CacheSlot) -> Option<SubscriptionTarget> {
        self.active.get(&slot).map(|active| active.target.clone())
    }

    /// Whether the slot has a subscription that is still delivering.
    pub fn is_active(&self, slot: CacheSlot) -> bool {
        self.active
            .get(&slot)
            .is_some_and(|active| !active.task.is_finished())
    }

    pub fn active_slots(&self) -> Vec<CacheSlot> {
        let mut slots: Vec<CacheSlot> = self.active.iter().map(|entry| *entry.key()).collect();
        slots.sort();
        slots
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        for entry in self.active.iter() {
            entry.task.abort();
        }
    }
}
