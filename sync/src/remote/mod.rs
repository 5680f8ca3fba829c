//! The remote document store contract.
//!
//! The client never talks to a concrete database directly. Everything goes
//! through [`RemoteStore`]: point reads and writes, atomic batches, queries
//! and live subscriptions. [`MemoryStore`] is the in-process implementation
//! used by the reconcile binary and by tests.

mod memory;

pub use memory::MemoryStore;

use crate::error::StoreError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use shopfront_engine::{CollectionName, DocPath, Document, WriteOp};
use std::cmp::Ordering;
use std::fmt;
use tokio::sync::mpsc;

/// Equality filter on a top-level field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Filter {
    pub field: String,
    pub value: Value,
}

/// Ordering of query results by a top-level field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub descending: bool,
}

/// A collection query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub collection: CollectionName,
    pub filters: Vec<Filter>,
    pub order_by: Option<OrderBy>,
}

impl Query {
    /// Every document of a collection.
    pub fn collection(collection: impl Into<CollectionName>) -> Self {
        Self {
            collection: collection.into(),
            filters: Vec::new(),
            order_by: None,
        }
    }

    pub fn where_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, field: impl Into<String>, descending: bool) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            descending,
        });
        self
    }

    /// Whether a document belongs to the result set.
    pub fn matches(&self, doc: &Document) -> bool {
        doc.path.collection == self.collection
            && self
                .filters
                .iter()
                .all(|f| doc.field(&f.field) == Some(&f.value))
    }

    /// Sort documents by the query ordering, then by id.
    pub fn sort(&self, docs: &mut [Document]) {
        docs.sort_by(|a, b| {
            let ordering = match &self.order_by {
                Some(order) => {
                    let o = compare_values(a.field(&order.field), b.field(&order.field));
                    if order.descending {
                        o.reverse()
                    } else {
                        o
                    }
                }
                None => Ordering::Equal,
            };
            ordering.then_with(|| a.path.id.cmp(&b.path.id))
        });
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.collection)?;
        for filter in &self.filters {
            write!(f, " where {} == {}", filter.field, filter.value)?;
        }
        if let Some(order) = &self.order_by {
            let direction = if order.descending { "desc" } else { "asc" };
            write!(f, " order by {} {}", order.field, direction)?;
        }
        Ok(())
    }
}

// missing < null < bool < number < string; other kinds compare equal
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(v: Option<&Value>) -> u8 {
        match v {
            None => 0,
            Some(Value::Null) => 1,
            Some(Value::Bool(_)) => 2,
            Some(Value::Number(_)) => 3,
            Some(Value::String(_)) => 4,
            Some(_) => 5,
        }
    }
    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => {
            let (x, y) = (x.as_f64().unwrap_or(0.0), y.as_f64().unwrap_or(0.0));
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}

/// What a subscription listens to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SubscriptionTarget {
    Document { path: DocPath },
    Query { query: Query },
}

impl SubscriptionTarget {
    pub fn document(path: DocPath) -> Self {
        SubscriptionTarget::Document { path }
    }

    pub fn query(query: Query) -> Self {
        SubscriptionTarget::Query { query }
    }

    /// Whether a write to `path` can change this target's result.
    pub fn is_affected_by(&self, path: &DocPath) -> bool {
        match self {
            SubscriptionTarget::Document { path: target } => target == path,
            SubscriptionTarget::Query { query } => query.collection == path.collection,
        }
    }
}

impl fmt::Display for SubscriptionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SubscriptionTarget::Document { path } => write!(f, "{path}"),
            SubscriptionTarget::Query { query } => write!(f, "{query}"),
        }
    }
}

/// Event delivered by a live subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteEvent {
    /// Full current result: zero or one document for a document target
    Snapshot(Vec<Document>),
    /// The listener failed; no further events follow
    Error(StoreError),
}

/// Handle of an open subscription.
#[derive(Debug)]
pub struct RemoteSubscription {
    pub id: String,
    pub events: mpsc::UnboundedReceiver<RemoteEvent>,
}

/// A hosted multi-collection document store.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Read a document; `None` if it does not exist.
    async fn get(&self, path: &DocPath) -> Result<Option<Document>, StoreError>;

    /// Replace a document, creating it if missing.
    async fn set(&self, path: &DocPath, value: Value) -> Result<(), StoreError>;

    /// Shallow-merge fields into an existing document.
    async fn update(&self, path: &DocPath, fields: Value) -> Result<(), StoreError>;

    async fn delete(&self, path: &DocPath) -> Result<(), StoreError>;

    /// Apply every write or none of them.
    async fn batch_write(&self, ops: Vec<WriteOp>) -> Result<(), StoreError>;

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError>;

    /// Open a live subscription. The current result is delivered first.
    async fn subscribe(&self, target: SubscriptionTarget)
        -> Result<RemoteSubscription, StoreError>;

    /// Close a subscription. Unknown ids are ignored.
    async fn unsubscribe(&self, id: &str);

    /// Apply a single write.
    async fn write(&self, op: WriteOp) -> Result<(), StoreError> {
        match op {
            WriteOp::Set { path, value } => self.set(&path, value).await,
            WriteOp::Update { path, fields } => self.update(&path, fields).await,
            WriteOp::Delete { path } => self.delete(&path).await,
        }
    }
}
