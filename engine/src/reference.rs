//! Product reference extraction from order items.
//!
//! Order items have been written by several generations of clients, each
//! storing the product identifier under a different field. Extraction walks
//! a fixed fallback chain and never coerces: only non-empty strings count as
//! identifiers.
//!
//! Chain, first match wins:
//!
//! 1. `productId`
//! 2. `id`
//! 3. `product.id`
//! 4. `product.productId`

use crate::ProductId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Field an identifier was recovered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RefField {
    ProductId,
    Id,
    NestedId,
    NestedProductId,
}

impl RefField {
    /// Whether the item already uses the normalized `productId` field.
    pub fn is_normalized(self) -> bool {
        self == RefField::ProductId
    }
}

/// Outcome of extracting a product reference from one order item.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ProductRef {
    /// An identifier was found.
    Resolved { id: ProductId, field: RefField },
    /// The item carries no usable identifier.
    Unresolved,
}

impl ProductRef {
    /// The extracted identifier, if any.
    pub fn id(&self) -> Option<&ProductId> {
        match self {
            ProductRef::Resolved { id, .. } => Some(id),
            ProductRef::Unresolved => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self, ProductRef::Resolved { .. })
    }
}

fn identifier(value: Option<&Value>) -> Option<ProductId> {
    value
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Extract the product reference of an order item.
pub fn extract_product_ref(item: &Value) -> ProductRef {
    let nested = item.get("product");
    let candidates = [
        (item.get("productId"), RefField::ProductId),
        (item.get("id"), RefField::Id),
        (nested.and_then(|p| p.get("id")), RefField::NestedId),
        (
            nested.and_then(|p| p.get("productId")),
            RefField::NestedProductId,
        ),
    ];

    candidates
        .into_iter()
        .find_map(|(value, field)| identifier(value).map(|id| ProductRef::Resolved { id, field }))
        .unwrap_or(ProductRef::Unresolved)
}

/// Item label used for display and placeholder names.
pub fn item_label(item: &Value) -> Option<&str> {
    ["name", "productName", "title"]
        .iter()
        .find_map(|key| item.get(*key).and_then(Value::as_str))
        .or_else(|| {
            item.get("product")
                .and_then(|p| p.get("name"))
                .and_then(Value::as_str)
        })
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Unit price recorded on an item.
pub fn item_price(item: &Value) -> Option<f64> {
    item.get("price")
        .or_else(|| item.get("unitPrice"))
        .or_else(|| item.get("product").and_then(|p| p.get("price")))
        .and_then(Value::as_f64)
        .filter(|p| p.is_finite())
}

/// Quantity recorded on an item; defaults to one when absent or invalid.
pub fn item_quantity(item: &Value) -> u32 {
    item.get("quantity")
        .or_else(|| item.get("qty"))
        .and_then(Value::as_u64)
        .and_then(|q| u32::try_from(q).ok())
        .filter(|q| *q > 0)
        .unwrap_or(1)
}
