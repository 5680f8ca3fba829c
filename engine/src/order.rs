//! Order records.
//!
//! Orders are immutable after checkout apart from `status` and `updatedAt`.
//! Items are kept as raw JSON because historical orders store product
//! references under several legacy shapes; see [`crate::reference`].

use crate::{
    document::deserialize_timestamp,
    error::Result,
    reference::{extract_product_ref, item_label},
    CartState, Document, Error, OrderId, PaymentMethod, ProductRef, Timestamp, UserId,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle status of an order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    #[default]
    #[serde(alias = "Pending")]
    Pending,
    #[serde(alias = "Processing")]
    Processing,
    #[serde(alias = "Shipped")]
    Shipped,
    #[serde(alias = "Delivered", alias = "completed", alias = "confirmed")]
    Delivered,
    #[serde(alias = "Cancelled", alias = "canceled")]
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 5] = [
        OrderStatus::Pending,
        OrderStatus::Processing,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    /// No further transitions are allowed from a terminal status.
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// Only delivered orders count towards revenue.
    pub fn counts_as_revenue(self) -> bool {
        self == OrderStatus::Delivered
    }

    /// Admin-driven transition table.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Cancelled)
                | (Processing, Shipped)
                | (Processing, Cancelled)
                | (Shipped, Delivered)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Customer contact and delivery address captured at checkout.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub phone: String,
    #[serde(default)]
    pub address: String,
}

/// An order document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRecord {
    #[serde(skip)]
    pub id: OrderId,
    #[serde(alias = "ownerUserId", default)]
    pub user_id: UserId,
    #[serde(default)]
    pub items: Vec<Value>,
    #[serde(default)]
    pub customer_info: CustomerInfo,
    /// Snapshot of the payment method chosen at checkout
    #[serde(default)]
    pub payment_method: Value,
    #[serde(default)]
    pub total_amount: f64,
    #[serde(default)]
    pub status: OrderStatus,
    #[serde(
        default,
        deserialize_with = "deserialize_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<Timestamp>,
    #[serde(
        default,
        deserialize_with = "deserialize_timestamp",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<Timestamp>,
    /// Product names resolved after load, keyed by item index. Cache only.
    #[serde(skip)]
    pub item_names: BTreeMap<usize, String>,
}

impl OrderRecord {
    /// Parse an order document.
    pub fn from_document(doc: &Document) -> Result<Self> {
        let mut order: OrderRecord = doc.parse()?;
        order.id = doc.id().clone();
        Ok(order)
    }

    /// Document body for this order.
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Build a new pending order from a cart.
    ///
    /// `totalAmount` is fixed here from the cart's line prices and is never
    /// recomputed afterwards.
    pub fn from_cart(
        id: impl Into<OrderId>,
        cart: &CartState,
        customer_info: CustomerInfo,
        payment_method: &PaymentMethod,
        now: Timestamp,
    ) -> Result<Self> {
        if cart.is_empty() {
            return Err(Error::EmptyCart);
        }
        if !payment_method.enabled {
            return Err(Error::PaymentMethodDisabled(payment_method.id.clone()));
        }

        let items = cart
            .items()
            .iter()
            .map(|line| {
                let mut item = Map::new();
                item.insert("productId".into(), Value::String(line.product_id.clone()));
                item.insert("name".into(), Value::String(line.name.clone()));
                item.insert("price".into(), json!(line.unit_price));
                item.insert("quantity".into(), Value::from(line.quantity));
                for (key, value) in &line.snapshot {
                    item.entry(key.clone()).or_insert_with(|| value.clone());
                }
                Value::Object(item)
            })
            .collect();

        Ok(Self {
            id: id.into(),
            user_id: cart.owner.clone(),
            items,
            customer_info,
            payment_method: json!({"id": payment_method.id, "name": payment_method.name}),
            total_amount: cart.subtotal(),
            status: OrderStatus::Pending,
            created_at: Some(now),
            updated_at: Some(now),
            item_names: BTreeMap::new(),
        })
    }

    /// Product references of every item, in item order.
    pub fn item_refs(&self) -> Vec<ProductRef> {
        self.items.iter().map(extract_product_ref).collect()
    }

    /// Id of the payment method used, for both the object and legacy string shapes.
    pub fn payment_method_id(&self) -> Option<&str> {
        match &self.payment_method {
            Value::String(id) => Some(id.as_str()),
            Value::Object(map) => map.get("id").and_then(Value::as_str),
            _ => None,
        }
    }

    /// Display name of an item: its own label, else a resolved product name.
    pub fn item_name(&self, index: usize) -> Option<&str> {
        self.items
            .get(index)
            .and_then(item_label)
            .or_else(|| self.item_names.get(&index).map(String::as_str))
    }

    /// Record a resolved name for the item at `index`.
    ///
    /// The name is kept only if that item still references `product_id` and
    /// has no label of its own.
    pub fn set_item_name(&mut self, index: usize, product_id: &str, name: String) -> bool {
        let matches = self.items.get(index).is_some_and(|item| {
            item_label(item).is_none()
                && extract_product_ref(item).id().map(String::as_str) == Some(product_id)
        });
        if matches {
            self.item_names.insert(index, name);
        }
        matches
    }

    /// Indices of items that carry a product reference but no label.
    pub fn unnamed_items(&self) -> Vec<(usize, crate::ProductId)> {
        self.items
            .iter()
            .enumerate()
            .filter(|(index, item)| {
                item_label(item).is_none() && !self.item_names.contains_key(index)
            })
            .filter_map(|(index, item)| {
                extract_product_ref(item).id().map(|id| (index, id.clone()))
            })
            .collect()
    }

    /// Move the order to a new status.
    pub fn transition(&mut self, next: OrderStatus, at: Timestamp) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Some(at);
        Ok(())
    }
}
