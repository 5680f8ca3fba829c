//! In-process document store.
//!
//! Keeps every document in one ordered map and pushes a fresh result to each
//! affected subscriber after every committed write. Connectivity loss, write
//! failures and slow writes can be simulated for tests.

use super::{Query, RemoteEvent, RemoteStore, RemoteSubscription, SubscriptionTarget};
use crate::error::StoreError;
use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;
use shopfront_engine::{merge_fields, DatasetSnapshot, DocPath, Document, WriteOp};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{mpsc, watch, RwLock};

type Documents = BTreeMap<DocPath, Value>;

#[derive(Debug)]
struct Subscriber {
    target: SubscriptionTarget,
    sender: mpsc::UnboundedSender<RemoteEvent>,
}

/// Document store held in memory.
#[derive(Debug)]
pub struct MemoryStore {
    documents: RwLock<Documents>,
    subscribers: DashMap<String, Subscriber>,
    online: AtomicBool,
    failing_writes: AtomicUsize,
    write_count: AtomicUsize,
    /// `true` while writes are held back
    gate: watch::Sender<bool>,
    blocked: AtomicUsize,
    /// `true` while committed writes wait before reporting success
    ack_gate: watch::Sender<bool>,
    delayed_acks: AtomicUsize,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            documents: RwLock::new(BTreeMap::new()),
            subscribers: DashMap::new(),
            online: AtomicBool::new(true),
            failing_writes: AtomicUsize::new(0),
            write_count: AtomicUsize::new(0),
            gate: watch::Sender::new(false),
            blocked: AtomicUsize::new(0),
            ack_gate: watch::Sender::new(false),
            delayed_acks: AtomicUsize::new(0),
        }
    }

    /// Store pre-filled with the documents of a dataset export.
    pub fn from_snapshot(snapshot: &DatasetSnapshot) -> Self {
        let mut store = Self::new();
        let documents = snapshot
            .all_documents()
            .into_iter()
            .map(|doc| (doc.path, doc.data))
            .collect();
        store.documents = RwLock::new(documents);
        store
    }

    /// Export every document.
    pub async fn export_snapshot(&self) -> DatasetSnapshot {
        let documents = self.documents.read().await;
        DatasetSnapshot::from_documents(
            documents
                .iter()
                .map(|(path, data)| Document::new(path.clone(), data.clone())),
        )
    }

    /// Write documents directly, bypassing failure injection and the write
    /// gate. Subscribers are notified.
    pub async fn seed(&self, documents: impl IntoIterator<Item = Document>) {
        let mut stored = self.documents.write().await;
        let mut paths = Vec::new();
        for doc in documents {
            paths.push(doc.path.clone());
            stored.insert(doc.path, doc.data);
        }
        self.notify(&stored, &paths);
    }

    /// Current body of a document, without connectivity checks.
    pub async fn peek(&self, path: &DocPath) -> Option<Value> {
        self.documents.read().await.get(path).cloned()
    }

    /// Simulate losing or regaining connectivity.
    ///
    /// Going offline fails every open subscription and closes it.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
        if online {
            return;
        }
        let error = StoreError::Unavailable("connection lost".into());
        for entry in self.subscribers.iter() {
            let _ = entry.sender.send(RemoteEvent::Error(error.clone()));
        }
        self.subscribers.clear();
        tracing::debug!("memory store went offline");
    }

    /// Fail the next `count` writes with a transient error.
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }

    /// Hold every write until [`MemoryStore::release_writes`] is called.
    pub fn hold_writes(&self) {
        self.gate.send_replace(true);
    }

    pub fn release_writes(&self) {
        self.gate.send_replace(false);
    }

    /// Writes currently waiting on a hold.
    pub fn blocked_writes(&self) -> usize {
        self.blocked.load(Ordering::SeqCst)
    }

    /// Commit writes and notify subscribers, but hold back the success
    /// result until [`MemoryStore::release_acks`] is called.
    pub fn hold_acks(&self) {
        self.ack_gate.send_replace(true);
    }

    pub fn release_acks(&self) {
        self.ack_gate.send_replace(false);
    }

    /// Committed writes whose result is being held back.
    pub fn delayed_acks(&self) -> usize {
        self.delayed_acks.load(Ordering::SeqCst)
    }

    async fn deliver_ack(&self) {
        let mut gate = self.ack_gate.subscribe();
        if *gate.borrow_and_update() {
            self.delayed_acks.fetch_add(1, Ordering::SeqCst);
            let _ = gate.wait_for(|held| !*held).await;
            self.delayed_acks.fetch_sub(1, Ordering::SeqCst);
        }
    }

    /// Committed writes; a batch counts once.
    pub fn write_count(&self) -> usize {
        self.write_count.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    fn ensure_online(&self) -> Result<(), StoreError> {
        if self.online.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(StoreError::Unavailable("store is offline".into()))
        }
    }

    async fn admit_write(&self) -> Result<(), StoreError> {
        let mut gate = self.gate.subscribe();
        if *gate.borrow_and_update() {
            self.blocked.fetch_add(1, Ordering::SeqCst);
            let _ = gate.wait_for(|held| !*held).await;
            self.blocked.fetch_sub(1, Ordering::SeqCst);
        }

        self.ensure_online()?;
        let injected = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(StoreError::Unavailable("injected write failure".into()));
        }
        Ok(())
    }

    fn snapshot_for(documents: &Documents, target: &SubscriptionTarget) -> Vec<Document> {
        match target {
            SubscriptionTarget::Document { path } => documents
                .get(path)
                .map(|data| Document::new(path.clone(), data.clone()))
                .into_iter()
                .collect(),
            SubscriptionTarget::Query { query } => Self::run_query(documents, query),
        }
    }

    fn run_query(documents: &Documents, query: &Query) -> Vec<Document> {
        let mut result: Vec<Document> = documents
            .iter()
            .filter(|(path, _)| path.collection == query.collection)
            .map(|(path, data)| Document::new(path.clone(), data.clone()))
            .filter(|doc| query.matches(doc))
            .collect();
        query.sort(&mut result);
        result
    }

    /// Push fresh results to every subscriber affected by `paths`.
    fn notify(&self, documents: &Documents, paths: &[DocPath]) {
        let mut closed = Vec::new();
        for entry in self.subscribers.iter() {
            if !paths.iter().any(|p| entry.target.is_affected_by(p)) {
                continue;
            }
            let snapshot = Self::snapshot_for(documents, &entry.target);
            if entry.sender.send(RemoteEvent::Snapshot(snapshot)).is_err() {
                closed.push(entry.key().clone());
            }
        }
        for id in closed {
            self.subscribers.remove(&id);
        }
    }

    fn apply(documents: &mut Documents, op: WriteOp) -> Result<(), StoreError> {
        match op {
            WriteOp::Set { path, value } => {
                documents.insert(path, value);
            }
            WriteOp::Update { path, fields } => {
                let target = documents
                    .get_mut(&path)
                    .ok_or_else(|| StoreError::NotFound(path.to_string()))?;
                merge_fields(target, &fields);
            }
            WriteOp::Delete { path } => {
                documents.remove(&path);
            }
        }
        Ok(())
    }

    async fn commit(&self, op: WriteOp) -> Result<(), StoreError> {
        self.admit_write().await?;
        {
            let mut documents = self.documents.write().await;
            let path = op.path().clone();
            Self::apply(&mut documents, op)?;
            self.write_count.fetch_add(1, Ordering::SeqCst);
            self.notify(&documents, &[path]);
        }
        self.deliver_ack().await;
        Ok(())
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn get(&self, path: &DocPath) -> Result<Option<Document>, StoreError> {
        self.ensure_online()?;
        let documents = self.documents.read().await;
        Ok(documents
            .get(path)
            .map(|data| Document::new(path.clone(), data.clone())))
    }

    async fn set(&self, path: &DocPath, value: Value) -> Result<(), StoreError> {
        self.commit(WriteOp::set(path.clone(), value)).await
    }

    async fn update(&self, path: &DocPath, fields: Value) -> Result<(), StoreError> {
        self.commit(WriteOp::update(path.clone(), fields)).await
    }

    async fn delete(&self, path: &DocPath) -> Result<(), StoreError> {
        self.commit(WriteOp::delete(path.clone())).await
    }

    async fn batch_write(&self, ops: Vec<WriteOp>) -> Result<(), StoreError> {
        self.admit_write().await?;
        let mut documents = self.documents.write().await;

        let paths: Vec<DocPath> = ops.iter().map(|op| op.path().clone()).collect();
        let mut staged = documents.clone();
        for op in ops {
            Self::apply(&mut staged, op)?;
        }
        *documents = staged;

        self.write_count.fetch_add(1, Ordering::SeqCst);
        self.notify(&documents, &paths);
        Ok(())
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        self.ensure_online()?;
        let documents = self.documents.read().await;
        Ok(Self::run_query(&documents, query))
    }

    async fn subscribe(
        &self,
        target: SubscriptionTarget,
    ) -> Result<RemoteSubscription, StoreError> {
        self.ensure_online()?;
        // hold the read lock so no write lands between the initial result
        // and registration
        let documents = self.documents.read().await;

        let id = uuid::Uuid::new_v4().to_string();
        let (sender, events) = mpsc::unbounded_channel();
        let _ = sender.send(RemoteEvent::Snapshot(Self::snapshot_for(&documents, &target)));

        tracing::debug!(subscription = %id, target = %target, "subscription opened");
        self.subscribers.insert(id.clone(), Subscriber { target, sender });

        Ok(RemoteSubscription { id, events })
    }

    async fn unsubscribe(&self, id: &str) {
        if self.subscribers.remove(id).is_some() {
            tracing::debug!(subscription = %id, "subscription closed");
        }
    }
}
