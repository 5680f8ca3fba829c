//! Documents exchanged with the remote store.
//!
//! The remote store is schema-flexible, so documents are carried as JSON
//! values and parsed into typed models at the edges ([`crate::CartState`],
//! [`crate::OrderRecord`], ...).

use crate::{error::Result, CollectionName, DocumentId, Error, Timestamp, UserId};
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

/// Collection holding one cart document per user (document id = user id).
pub const CARTS: &str = "carts";
/// Collection holding order documents.
pub const ORDERS: &str = "orders";
/// Collection holding product documents.
pub const PRODUCTS: &str = "products";
/// Collection holding singleton configuration documents.
pub const SETTINGS: &str = "settings";
/// Document id of the payment-method configuration inside [`SETTINGS`].
pub const PAYMENT_METHODS_DOC: &str = "paymentMethods";

/// Location of a document: collection plus document id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DocPath {
    pub collection: CollectionName,
    pub id: DocumentId,
}

impl DocPath {
    pub fn new(collection: impl Into<CollectionName>, id: impl Into<DocumentId>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }

    /// Cart document of a user.
    pub fn cart(user_id: &UserId) -> Self {
        Self::new(CARTS, user_id.clone())
    }

    pub fn order(order_id: impl Into<DocumentId>) -> Self {
        Self::new(ORDERS, order_id)
    }

    pub fn product(product_id: impl Into<DocumentId>) -> Self {
        Self::new(PRODUCTS, product_id)
    }

    /// The payment-method configuration document.
    pub fn payment_methods() -> Self {
        Self::new(SETTINGS, PAYMENT_METHODS_DOC)
    }
}

impl fmt::Display for DocPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

/// A document as read from the remote store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub path: DocPath,
    pub data: Value,
}

impl Document {
    pub fn new(path: DocPath, data: Value) -> Self {
        Self { path, data }
    }

    /// Document id (last path segment).
    pub fn id(&self) -> &DocumentId {
        &self.path.id
    }

    /// Top-level field of the document, if the document is an object.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.data.get(name)
    }

    /// Deserialize the document body into a typed model.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.data.clone())
            .map_err(|e| Error::invalid_document(&self.path, e))
    }

    /// Shallow-merge `fields` into the document body.
    ///
    /// Top-level keys in `fields` replace the existing ones; other keys are
    /// kept. A non-object body is replaced by the fields object.
    pub fn merge(&mut self, fields: &Value) {
        merge_fields(&mut self.data, fields);
    }
}

/// Shallow-merge the top-level keys of `fields` into `target`.
pub fn merge_fields(target: &mut Value, fields: &Value) {
    let Some(incoming) = fields.as_object() else {
        return;
    };
    match target.as_object_mut() {
        Some(existing) => {
            for (key, value) in incoming {
                existing.insert(key.clone(), value.clone());
            }
        }
        None => *target = Value::Object(incoming.clone()),
    }
}

/// Read a timestamp stored under any of its legacy encodings.
///
/// Accepts milliseconds since epoch (integer or float) and the
/// `{seconds, nanoseconds}` / `{_seconds, _nanoseconds}` objects written by
/// older clients. Anything else yields `None`.
pub fn parse_timestamp(value: &Value) -> Option<Timestamp> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::Object(map) => {
            let seconds = map
                .get("seconds")
                .or_else(|| map.get("_seconds"))?
                .as_u64()?;
            let nanos = map
                .get("nanoseconds")
                .or_else(|| map.get("_nanoseconds"))
                .and_then(Value::as_u64)
                .unwrap_or(0);
            Some(seconds.saturating_mul(1000).saturating_add(nanos / 1_000_000))
        }
        _ => None,
    }
}

/// Serde helper for optional timestamps in legacy encodings.
pub(crate) fn deserialize_timestamp<'de, D>(
    deserializer: D,
) -> std::result::Result<Option<Timestamp>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(parse_timestamp))
}
