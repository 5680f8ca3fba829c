//! Product documents.

use crate::{error::Result, Document, ProductId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Price given to a placeholder product when the order item carries none.
pub const PLACEHOLDER_PRICE: f64 = 0.0;
/// Stock given to placeholder products; zero keeps them out of sale until reviewed.
pub const PLACEHOLDER_STOCK: i64 = 0;
/// Category assigned to placeholder products.
pub const PLACEHOLDER_CATEGORY: &str = "uncategorized";

/// A product as stored in the `products` collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProductRecord {
    /// Document id; not part of the document body
    #[serde(skip)]
    pub id: ProductId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub price: f64,
    #[serde(default)]
    pub stock: i64,
    #[serde(default)]
    pub category_id: String,
    #[serde(default)]
    pub image_url: String,
    /// Set on products synthesized by order migration
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub migrated: bool,
}

impl ProductRecord {
    /// Parse a product document.
    pub fn from_document(doc: &Document) -> Result<Self> {
        let mut product: ProductRecord = doc.parse()?;
        product.id = doc.id().clone();
        Ok(product)
    }

    /// Document body for this product.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Synthesize a stand-in for a product that orders reference but that no
    /// longer exists.
    ///
    /// The name comes from the order item's label when there is one, otherwise
    /// from the id itself.
    pub fn placeholder(
        id: impl Into<ProductId>,
        label: Option<&str>,
        price: Option<f64>,
    ) -> Self {
        let id = id.into();
        let name = match label.map(str::trim).filter(|l| !l.is_empty()) {
            Some(label) => label.to_string(),
            None => format!("Product {id}"),
        };
        Self {
            description: format!("Restored from order history ({id})"),
            id,
            name,
            price: price
                .filter(|p| p.is_finite() && *p >= 0.0)
                .unwrap_or(PLACEHOLDER_PRICE),
            stock: PLACEHOLDER_STOCK,
            category_id: PLACEHOLDER_CATEGORY.to_string(),
            image_url: String::new(),
            migrated: true,
        }
    }

    /// Fields copied into a cart line when the product is added to a cart.
    pub fn snapshot_fields(&self) -> serde_json::Map<String, Value> {
        let mut fields = serde_json::Map::new();
        if !self.image_url.is_empty() {
            fields.insert("imageUrl".into(), Value::String(self.image_url.clone()));
        }
        if !self.category_id.is_empty() {
            fields.insert("categoryId".into(), Value::String(self.category_id.clone()));
        }
        fields
    }
}
