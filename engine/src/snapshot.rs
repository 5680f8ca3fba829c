//! Dataset snapshots for batch reconciliation.
//!
//! Reconciliation reads a full point-in-time copy of the remote store rather
//! than the live cache. A snapshot is also the file format the reconcile
//! binary loads and writes back.
//!
//! Uses BTreeMap instead of HashMap for deterministic serialization order.

use crate::{
    error::Result, CollectionName, DocPath, Document, DocumentId, Error, OrderRecord,
    ProductRecord, WriteOp, ORDERS, PRODUCTS,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Version of the snapshot format for future compatibility.
pub const SNAPSHOT_FORMAT_VERSION: u32 = 1;

/// A point-in-time copy of the remote store's documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetSnapshot {
    pub format_version: u32,
    /// Documents by collection, then by document id
    pub collections: BTreeMap<CollectionName, BTreeMap<DocumentId, Value>>,
}

impl Default for DatasetSnapshot {
    fn default() -> Self {
        Self::new()
    }
}

impl DatasetSnapshot {
    pub fn new() -> Self {
        Self {
            format_version: SNAPSHOT_FORMAT_VERSION,
            collections: BTreeMap::new(),
        }
    }

    /// Build a snapshot from documents.
    pub fn from_documents(documents: impl IntoIterator<Item = Document>) -> Self {
        let mut snapshot = Self::new();
        for doc in documents {
            snapshot.insert(doc);
        }
        snapshot
    }

    pub fn insert(&mut self, doc: Document) {
        self.collections
            .entry(doc.path.collection)
            .or_default()
            .insert(doc.path.id, doc.data);
    }

    pub fn get(&self, path: &DocPath) -> Option<&Value> {
        self.collections.get(&path.collection)?.get(&path.id)
    }

    pub fn remove(&mut self, path: &DocPath) -> Option<Value> {
        self.collections.get_mut(&path.collection)?.remove(&path.id)
    }

    /// Documents of one collection, in id order.
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, data)| {
                        Document::new(DocPath::new(collection, id.clone()), data.clone())
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every document in the snapshot.
    pub fn all_documents(&self) -> Vec<Document> {
        self.collections
            .keys()
            .flat_map(|collection| self.documents(collection))
            .collect()
    }

    /// Ids of every document in the products collection.
    ///
    /// A product exists if its document exists; the body is not validated.
    pub fn product_ids(&self) -> BTreeSet<DocumentId> {
        self.collections
            .get(PRODUCTS)
            .map(|docs| docs.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Parsed orders plus the ids and errors of documents that failed to parse.
    pub fn orders(&self) -> (Vec<OrderRecord>, Vec<(DocumentId, Error)>) {
        let mut orders = Vec::new();
        let mut errors = Vec::new();
        for doc in self.documents(ORDERS) {
            match OrderRecord::from_document(&doc) {
                Ok(order) => orders.push(order),
                Err(e) => errors.push((doc.path.id, e)),
            }
        }
        (orders, errors)
    }

    /// Parsed products; unparseable product documents are skipped.
    pub fn products(&self) -> Vec<ProductRecord> {
        self.documents(PRODUCTS)
            .iter()
            .filter_map(|doc| ProductRecord::from_document(doc).ok())
            .collect()
    }

    pub fn document_count(&self) -> usize {
        self.collections.values().map(BTreeMap::len).sum()
    }

    /// Apply a write to the snapshot, the same way the remote store would.
    pub fn apply(&mut self, op: &WriteOp) {
        match op {
            WriteOp::Set { path, value } => {
                self.insert(Document::new(path.clone(), value.clone()))
            }
            WriteOp::Update { path, fields } => {
                if let Some(existing) = self
                    .collections
                    .get_mut(&path.collection)
                    .and_then(|docs| docs.get_mut(&path.id))
                {
                    crate::document::merge_fields(existing, fields);
                }
            }
            WriteOp::Delete { path } => {
                self.remove(path);
            }
        }
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Serialize to pretty JSON with deterministic ordering.
    pub fn to_json_pretty(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| Error::InvalidSnapshot(e.to_string()))
    }

    /// Deserialize from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        let snapshot: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidSnapshot(e.to_string()))?;

        if snapshot.format_version > SNAPSHOT_FORMAT_VERSION {
            return Err(Error::InvalidSnapshot(format!(
                "unsupported snapshot format version: {} (max supported: {})",
                snapshot.format_version, SNAPSHOT_FORMAT_VERSION
            )));
        }

        Ok(snapshot)
    }
}
