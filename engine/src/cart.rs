//! Shopping cart state.
//!
//! A cart holds at most one line per product and every line has a positive
//! quantity. All mutations keep those two rules; a line whose quantity would
//! drop to zero is removed instead.

use crate::{
    document::deserialize_timestamp, error::Result, Document, Error, ProductId, ProductRecord,
    Timestamp, UserId,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single line in a cart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartLine {
    pub product_id: ProductId,
    #[serde(default)]
    pub name: String,
    #[serde(alias = "price", default)]
    pub unit_price: f64,
    pub quantity: u32,
    /// Product fields copied when the line was added (image, category, ...)
    #[serde(flatten)]
    pub snapshot: Map<String, Value>,
}

impl CartLine {
    /// Price of the line (unit price times quantity).
    pub fn subtotal(&self) -> f64 {
        self.unit_price * f64::from(self.quantity)
    }
}

/// Body of a cart document as stored remotely.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CartDocument {
    #[serde(default)]
    items: Vec<CartLine>,
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    updated_at: Option<Timestamp>,
}

/// The cart of one user.
#[derive(Debug, Clone, PartialEq)]
pub struct CartState {
    pub owner: UserId,
    items: Vec<CartLine>,
    pub updated_at: Option<Timestamp>,
}

impl CartState {
    /// Create an empty cart for a user.
    pub fn empty(owner: impl Into<UserId>) -> Self {
        Self {
            owner: owner.into(),
            items: Vec::new(),
            updated_at: None,
        }
    }

    /// Parse a cart document. The document id is the owner's user id.
    ///
    /// Lines sharing a product id are merged and zero-quantity lines are
    /// dropped, so a cart written by an older client still satisfies the
    /// cart rules once loaded.
    pub fn from_document(doc: &Document) -> Result<Self> {
        let body: CartDocument = doc.parse()?;
        let mut cart = CartState::empty(doc.id().clone());
        cart.updated_at = body.updated_at;
        for line in body.items {
            if line.quantity == 0 {
                continue;
            }
            match cart.line_mut(&line.product_id) {
                Some(existing) => {
                    existing.quantity = existing.quantity.saturating_add(line.quantity)
                }
                None => cart.items.push(line),
            }
        }
        Ok(cart)
    }

    /// Document body for this cart.
    pub fn to_value(&self) -> Value {
        let mut body = Map::new();
        body.insert(
            "items".into(),
            serde_json::to_value(&self.items).unwrap_or_else(|_| Value::Array(Vec::new())),
        );
        if let Some(updated_at) = self.updated_at {
            body.insert("updatedAt".into(), Value::from(updated_at));
        }
        Value::Object(body)
    }

    /// Lines in insertion order.
    pub fn items(&self) -> &[CartLine] {
        &self.items
    }

    pub fn line(&self, product_id: &str) -> Option<&CartLine> {
        self.items.iter().find(|l| l.product_id == product_id)
    }

    fn line_mut(&mut self, product_id: &str) -> Option<&mut CartLine> {
        self.items.iter_mut().find(|l| l.product_id == product_id)
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Total number of units across all lines.
    pub fn item_count(&self) -> u32 {
        self.items
            .iter()
            .fold(0u32, |acc, l| acc.saturating_add(l.quantity))
    }

    /// Sum of line subtotals.
    pub fn subtotal(&self) -> f64 {
        self.items.iter().map(CartLine::subtotal).sum()
    }

    /// Add units of a product, merging into an existing line.
    pub fn add_product(&mut self, product: &ProductRecord, quantity: u32) -> Result<()> {
        if quantity == 0 {
            return Err(Error::InvalidQuantity(0));
        }
        match self.line_mut(&product.id) {
            Some(line) => line.quantity = line.quantity.saturating_add(quantity),
            None => self.items.push(CartLine {
                product_id: product.id.clone(),
                name: product.name.clone(),
                unit_price: product.price,
                quantity,
                snapshot: product.snapshot_fields(),
            }),
        }
        Ok(())
    }

    /// Set the quantity of an existing line. Zero removes the line.
    pub fn set_quantity(&mut self, product_id: &str, quantity: u32) -> Result<()> {
        if quantity == 0 {
            return self.remove_line(product_id).map(|_| ());
        }
        let line = self
            .line_mut(product_id)
            .ok_or_else(|| Error::LineNotFound(product_id.to_string()))?;
        line.quantity = quantity;
        Ok(())
    }

    /// Change the quantity of an existing line by `delta`.
    ///
    /// Removing the last unit removes the line.
    pub fn adjust_quantity(&mut self, product_id: &str, delta: i64) -> Result<()> {
        let current = self
            .line(product_id)
            .map(|l| i64::from(l.quantity))
            .ok_or_else(|| Error::LineNotFound(product_id.to_string()))?;
        let next = current.saturating_add(delta);
        if next <= 0 {
            return self.remove_line(product_id).map(|_| ());
        }
        let quantity = u32::try_from(next).map_err(|_| Error::InvalidQuantity(next))?;
        self.set_quantity(product_id, quantity)
    }

    /// Remove a line and return it.
    pub fn remove_line(&mut self, product_id: &str) -> Result<CartLine> {
        let index = self
            .items
            .iter()
            .position(|l| l.product_id == product_id)
            .ok_or_else(|| Error::LineNotFound(product_id.to_string()))?;
        Ok(self.items.remove(index))
    }

    /// Remove every line.
    pub fn clear(&mut self) {
        self.items.clear();
    }

    /// Take ordered lines out of the cart.
    ///
    /// Only the ordered units leave: units added after the order was taken
    /// stay, and a line that was already reduced or removed is left as is.
    pub fn subtract(&mut self, ordered: &[CartLine]) {
        for line in ordered {
            if let Some(current) = self.line_mut(&line.product_id) {
                current.quantity = current.quantity.saturating_sub(line.quantity);
            }
        }
        self.items.retain(|l| l.quantity > 0);
    }
}
