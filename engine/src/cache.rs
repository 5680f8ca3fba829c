//! LocalCache - the per-session in-memory mirror of remote state.
//!
//! The cache holds the signed-in user's cart, their orders, the admin view of
//! all orders and the payment-method configuration. It is a best-effort
//! projection of the remote store: subscription events are applied one at a
//! time through [`LocalCache::apply`], and optimistic writes go through the
//! [`Layered`] slots.
//!
//! Derived views (sorted lists, per-status counts, revenue) are computed on
//! every read and never stored.

use crate::{
    error::Result, overlay::Versioned, CartState, DocPath, Document, Error, Generation, Layered,
    OrderId, OrderRecord, OrderStatus, PaymentMethodConfig, ProductId, Timestamp, UserId,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Logical caches fed by one subscription each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CacheSlot {
    Cart,
    UserOrders,
    AllOrders,
    PaymentMethods,
}

impl fmt::Display for CacheSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CacheSlot::Cart => "cart",
            CacheSlot::UserOrders => "user-orders",
            CacheSlot::AllOrders => "all-orders",
            CacheSlot::PaymentMethods => "payment-methods",
        };
        f.write_str(name)
    }
}

/// Kind of a [`ChangeEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
    FullReplace,
}

/// A normalized change delivered by a subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ChangeEvent {
    Added { document: Document },
    Modified { document: Document },
    Removed { path: DocPath },
    FullReplace { documents: Vec<Document> },
}

impl ChangeEvent {
    pub fn kind(&self) -> ChangeKind {
        match self {
            ChangeEvent::Added { .. } => ChangeKind::Added,
            ChangeEvent::Modified { .. } => ChangeKind::Modified,
            ChangeEvent::Removed { .. } => ChangeKind::Removed,
            ChangeEvent::FullReplace { .. } => ChangeKind::FullReplace,
        }
    }

    /// Number of documents carried by the event.
    pub fn len(&self) -> usize {
        match self {
            ChangeEvent::FullReplace { documents } => documents.len(),
            _ => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result of applying a change event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyResult {
    /// Documents written into the cache
    pub applied: usize,
    /// Documents that could not be parsed and were left out
    pub skipped: Vec<Error>,
    /// Order ids added or changed by the event
    pub touched: Vec<OrderId>,
}

/// Most-recent-first ordering.
///
/// A missing `createdAt` is read as `now`, so such records sort ahead of
/// every dated one. Ties break on id for a stable order.
pub fn sort_recent_first(orders: &mut [OrderRecord], now: Timestamp) {
    orders.sort_by(|a, b| {
        let a_at = a.created_at.unwrap_or(now);
        let b_at = b.created_at.unwrap_or(now);
        match b_at.cmp(&a_at) {
            Ordering::Equal => a.id.cmp(&b.id),
            other => other,
        }
    });
}

/// An order collection mirrored from one subscription.
#[derive(Debug, Clone, Default)]
pub struct OrderTable {
    orders: HashMap<OrderId, OrderRecord>,
}

impl OrderTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&OrderRecord> {
        self.orders.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.orders.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.orders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.is_empty()
    }

    /// Orders in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &OrderRecord> {
        self.orders.values()
    }

    fn upsert(&mut self, doc: &Document, result: &mut ApplyResult) {
        match OrderRecord::from_document(doc) {
            Ok(mut order) => {
                if let Some(previous) = self.orders.get(&order.id) {
                    if previous.items == order.items {
                        order.item_names = previous.item_names.clone();
                    }
                }
                result.touched.push(order.id.clone());
                self.orders.insert(order.id.clone(), order);
                result.applied += 1;
            }
            Err(e) => result.skipped.push(e),
        }
    }

    /// Apply a change event.
    pub fn apply(&mut self, event: &ChangeEvent) -> ApplyResult {
        let mut result = ApplyResult::default();
        match event {
            ChangeEvent::Added { document } | ChangeEvent::Modified { document } => {
                self.upsert(document, &mut result)
            }
            ChangeEvent::Removed { path } => {
                if self.orders.remove(&path.id).is_some() {
                    result.applied += 1;
                }
            }
            ChangeEvent::FullReplace { documents } => {
                let previous = std::mem::take(&mut self.orders);
                for document in documents {
                    self.upsert(document, &mut result);
                }
                // resolved names survive a full replace when items are unchanged
                for (id, order) in self.orders.iter_mut() {
                    if let Some(old) = previous.get(id) {
                        if old.items == order.items {
                            order.item_names = old.item_names.clone();
                        }
                    }
                }
            }
        }
        result
    }

    /// Immutable snapshot, most recent first.
    pub fn sorted(&self, now: Timestamp) -> Vec<OrderRecord> {
        let mut orders: Vec<_> = self.orders.values().cloned().collect();
        sort_recent_first(&mut orders, now);
        orders
    }

    /// Orders with the given status, most recent first.
    pub fn with_status(&self, status: OrderStatus, now: Timestamp) -> Vec<OrderRecord> {
        let mut orders: Vec<_> = self
            .orders
            .values()
            .filter(|o| o.status == status)
            .cloned()
            .collect();
        sort_recent_first(&mut orders, now);
        orders
    }

    /// Number of orders per status.
    pub fn status_counts(&self) -> BTreeMap<OrderStatus, usize> {
        let mut counts = BTreeMap::new();
        for order in self.orders.values() {
            *counts.entry(order.status).or_insert(0) += 1;
        }
        counts
    }

    /// Total amount of delivered orders.
    pub fn delivered_revenue(&self) -> f64 {
        self.orders
            .values()
            .filter(|o| o.status.counts_as_revenue())
            .map(|o| o.total_amount)
            .sum()
    }

    /// Merge asynchronously resolved item names into an order.
    ///
    /// Names are keyed by item index and carry the product id they were
    /// resolved for; a name whose item no longer references that product is
    /// dropped. Returns `false` if the order is no longer cached.
    pub fn merge_item_names(
        &mut self,
        id: &str,
        names: BTreeMap<usize, (ProductId, String)>,
    ) -> bool {
        match self.orders.get_mut(id) {
            Some(order) => {
                for (index, (product_id, name)) in names {
                    order.set_item_name(index, &product_id, name);
                }
                true
            }
            None => false,
        }
    }

    /// Apply a status transition locally. Returns the previous status and
    /// `updatedAt` so a failed write can be undone.
    pub fn set_status(
        &mut self,
        id: &str,
        status: OrderStatus,
        at: Timestamp,
    ) -> Result<(OrderStatus, Option<Timestamp>)> {
        let order = self
            .orders
            .get_mut(id)
            .ok_or_else(|| Error::OrderNotFound(id.to_string()))?;
        let previous = (order.status, order.updated_at);
        order.transition(status, at)?;
        Ok(previous)
    }

    /// Undo a local status change, unless a newer update already replaced it.
    pub fn restore_status(
        &mut self,
        id: &str,
        expected: OrderStatus,
        previous: (OrderStatus, Option<Timestamp>),
    ) -> bool {
        match self.orders.get_mut(id) {
            Some(order) if order.status == expected => {
                order.status = previous.0;
                order.updated_at = previous.1;
                true
            }
            _ => false,
        }
    }

    pub fn clear(&mut self) {
        self.orders.clear();
    }
}

impl Versioned for CartState {
    fn stamp(&self) -> Option<Timestamp> {
        self.updated_at
    }
}

impl Versioned for PaymentMethodConfig {}

/// Entities written through the optimistic overlay.
pub trait CachedEntity: Clone + Versioned + Send + Sync + 'static {
    const SLOT: CacheSlot;

    /// Remote document holding the entity for the cache's owner.
    fn path(cache: &LocalCache) -> DocPath;

    fn layer(cache: &LocalCache) -> &Layered<Self>;

    fn layer_mut(cache: &mut LocalCache) -> &mut Layered<Self>;

    /// Document body to write.
    fn to_value(&self) -> Value;

    /// Stamp the value before it is written. The stamp must be strictly
    /// greater than `previous` when both exist.
    fn stamped(self, _at: Timestamp) -> Self {
        self
    }
}

impl CachedEntity for CartState {
    const SLOT: CacheSlot = CacheSlot::Cart;

    fn path(cache: &LocalCache) -> DocPath {
        DocPath::cart(cache.owner())
    }

    fn layer(cache: &LocalCache) -> &Layered<Self> {
        &cache.cart
    }

    fn layer_mut(cache: &mut LocalCache) -> &mut Layered<Self> {
        &mut cache.cart
    }

    fn to_value(&self) -> Value {
        CartState::to_value(self)
    }

    fn stamped(mut self, at: Timestamp) -> Self {
        let floor = self.updated_at.map_or(0, |t| t.saturating_add(1));
        self.updated_at = Some(at.max(floor));
        self
    }
}

impl CachedEntity for PaymentMethodConfig {
    const SLOT: CacheSlot = CacheSlot::PaymentMethods;

    fn path(_cache: &LocalCache) -> DocPath {
        DocPath::payment_methods()
    }

    fn layer(cache: &LocalCache) -> &Layered<Self> {
        &cache.payment_methods
    }

    fn layer_mut(cache: &mut LocalCache) -> &mut Layered<Self> {
        &mut cache.payment_methods
    }

    fn to_value(&self) -> Value {
        PaymentMethodConfig::to_value(self)
    }
}

/// The in-memory mirror owned by one session.
#[derive(Debug, Clone)]
pub struct LocalCache {
    owner: UserId,
    epoch: Generation,
    cart: Layered<CartState>,
    user_orders: OrderTable,
    all_orders: OrderTable,
    payment_methods: Layered<PaymentMethodConfig>,
}

impl LocalCache {
    /// Create an empty cache for a user.
    pub fn new(owner: impl Into<UserId>) -> Self {
        let owner = owner.into();
        Self {
            cart: Layered::new(CartState::empty(owner.clone())),
            owner,
            epoch: Generation::ZERO.next(),
            user_orders: OrderTable::new(),
            all_orders: OrderTable::new(),
            payment_methods: Layered::new(PaymentMethodConfig::default()),
        }
    }

    pub fn owner(&self) -> &UserId {
        &self.owner
    }

    /// Epoch of the current session contents; bumped on every teardown.
    pub fn epoch(&self) -> Generation {
        self.epoch
    }

    /// Drop all state and start a new epoch, optionally for another user.
    ///
    /// Results of work started before the teardown must compare their epoch
    /// against the new one and discard themselves.
    pub fn teardown(&mut self, owner: impl Into<UserId>) -> Generation {
        self.owner = owner.into();
        self.epoch = self.epoch.next();
        self.cart.reset(CartState::empty(self.owner.clone()));
        self.user_orders.clear();
        self.all_orders.clear();
        self.payment_methods.reset(PaymentMethodConfig::default());
        self.epoch
    }

    /// Apply a change event to a slot.
    pub fn apply(&mut self, slot: CacheSlot, event: &ChangeEvent) -> ApplyResult {
        match slot {
            CacheSlot::UserOrders => self.user_orders.apply(event),
            CacheSlot::AllOrders => self.all_orders.apply(event),
            CacheSlot::Cart => self.apply_cart(event),
            CacheSlot::PaymentMethods => {
                let mut result = ApplyResult::default();
                match payment_config_from_event(event) {
                    Ok(Some(config)) => {
                        if self.payment_methods.confirm(config) {
                            result.applied = 1;
                        }
                    }
                    Ok(None) => {
                        self.payment_methods.reset(PaymentMethodConfig::default());
                    }
                    Err(e) => result.skipped.push(e),
                }
                result
            }
        }
    }

    fn apply_cart(&mut self, event: &ChangeEvent) -> ApplyResult {
        let mut result = ApplyResult::default();
        let document = match event {
            ChangeEvent::Added { document } | ChangeEvent::Modified { document } => Some(document),
            ChangeEvent::FullReplace { documents } => {
                documents.iter().find(|d| d.id() == &self.owner)
            }
            ChangeEvent::Removed { .. } => None,
        };
        let cart = match document {
            Some(doc) if doc.id() != &self.owner => {
                result.skipped.push(Error::invalid_document(
                    &doc.path,
                    format!("cart does not belong to {}", self.owner),
                ));
                return result;
            }
            Some(doc) => match CartState::from_document(doc) {
                Ok(cart) => cart,
                Err(e) => {
                    result.skipped.push(e);
                    return result;
                }
            },
            None => CartState::empty(self.owner.clone()),
        };
        if self.cart.confirm(cart) {
            result.applied = 1;
        }
        result
    }

    /// Cart as the user sees it (confirmed state plus pending writes).
    pub fn cart(&self) -> CartState {
        self.cart.view()
    }

    pub fn cart_layer(&self) -> &Layered<CartState> {
        &self.cart
    }

    /// Effective payment configuration, once loaded.
    pub fn payment_methods(&self) -> Option<PaymentMethodConfig> {
        self.payment_methods
            .is_loaded()
            .then(|| self.payment_methods.view())
    }

    /// Store a resolved payment configuration as confirmed state.
    pub fn confirm_payment_methods(&mut self, config: PaymentMethodConfig) {
        self.payment_methods.confirm(config);
    }

    pub fn orders(&self, slot: CacheSlot) -> Option<&OrderTable> {
        match slot {
            CacheSlot::UserOrders => Some(&self.user_orders),
            CacheSlot::AllOrders => Some(&self.all_orders),
            _ => None,
        }
    }

    pub fn orders_mut(&mut self, slot: CacheSlot) -> Option<&mut OrderTable> {
        match slot {
            CacheSlot::UserOrders => Some(&mut self.user_orders),
            CacheSlot::AllOrders => Some(&mut self.all_orders),
            _ => None,
        }
    }

    pub fn user_orders(&self) -> &OrderTable {
        &self.user_orders
    }

    pub fn all_orders(&self) -> &OrderTable {
        &self.all_orders
    }
}

/// Extract the remote payment configuration carried by an event.
///
/// `Ok(None)` means the configuration document does not exist.
pub fn payment_config_from_event(event: &ChangeEvent) -> Result<Option<PaymentMethodConfig>> {
    let document = match event {
        ChangeEvent::Added { document } | ChangeEvent::Modified { document } => Some(document),
        ChangeEvent::FullReplace { documents } => documents.first(),
        ChangeEvent::Removed { .. } => None,
    };
    document.map(PaymentMethodConfig::from_document).transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ProductRecord;
    use serde_json::json;
    use std::sync::Arc;

    fn order_doc(id: &str, created_at: Option<u64>, status: &str) -> Document {
        let mut body = json!({
            "userId": "u-1",
            "items": [{"productId": "p-1", "quantity": 1, "price": 10.0}],
            "totalAmount": 10.0,
            "status": status,
        });
        if let Some(at) = created_at {
            body["createdAt"] = json!(at);
        }
        Document::new(DocPath::order(id), body)
    }

    #[test]
    fn orders_sorted_recent_first_missing_created_at_first() {
        let mut table = OrderTable::new();
        table.apply(&ChangeEvent::FullReplace {
            documents: vec![
                order_doc("o-old", Some(1_000), "pending"),
                order_doc("o-new", Some(5_000), "pending"),
                order_doc("o-undated", None, "pending"),
            ],
        });

        let ids: Vec<_> = table.sorted(3_000).into_iter().map(|o| o.id).collect();
        assert_eq!(ids, vec!["o-new", "o-undated", "o-old"]);

        // with a later clock the undated order floats to the top
        let ids: Vec<_> = table.sorted(9_000).into_iter().map(|o| o.id).collect();
        assert_eq!(ids, vec!["o-undated", "o-new", "o-old"]);
    }

    #[test]
    fn order_events_add_modify_remove() {
        let mut table = OrderTable::new();
        let result = table.apply(&ChangeEvent::Added {
            document: order_doc("o-1", Some(1), "pending"),
        });
        assert_eq!(result.applied, 1);
        assert_eq!(result.touched, vec!["o-1".to_string()]);

        table.apply(&ChangeEvent::Modified {
            document: order_doc("o-1", Some(1), "processing"),
        });
        assert_eq!(table.get("o-1").unwrap().status, OrderStatus::Processing);

        table.apply(&ChangeEvent::Removed {
            path: DocPath::order("o-1"),
        });
        assert!(table.is_empty());
    }

    #[test]
    fn malformed_order_skipped_not_fatal() {
        let mut table = OrderTable::new();
        let bad = Document::new(DocPath::order("o-bad"), json!({"status": "lost"}));
        let result = table.apply(&ChangeEvent::FullReplace {
            documents: vec![bad, order_doc("o-1", Some(1), "pending")],
        });
        assert_eq!(result.applied, 1);
        assert_eq!(result.skipped.len(), 1);
        assert!(table.contains("o-1"));
    }

    #[test]
    fn derived_views() {
        let mut table = OrderTable::new();
        table.apply(&ChangeEvent::FullReplace {
            documents: vec![
                order_doc("o-1", Some(1), "delivered"),
                order_doc("o-2", Some(2), "delivered"),
                order_doc("o-3", Some(3), "cancelled"),
                order_doc("o-4", Some(4), "pending"),
            ],
        });
        assert_eq!(table.delivered_revenue(), 20.0);
        let counts = table.status_counts();
        assert_eq!(counts.get(&OrderStatus::Delivered), Some(&2));
        assert_eq!(counts.get(&OrderStatus::Shipped), None);
        assert_eq!(table.with_status(OrderStatus::Delivered, 0).len(), 2);
    }

    #[test]
    fn item_names_discarded_after_removal() {
        let mut table = OrderTable::new();
        table.apply(&ChangeEvent::Added {
            document: order_doc("o-1", Some(1), "pending"),
        });
        let names = BTreeMap::from([(0, ("p-1".to_string(), "Soap".to_string()))]);
        assert!(table.merge_item_names("o-1", names.clone()));

        // names survive an unrelated status change
        table.apply(&ChangeEvent::Modified {
            document: order_doc("o-1", Some(1), "processing"),
        });
        assert_eq!(table.get("o-1").unwrap().item_name(0), Some("Soap"));

        table.apply(&ChangeEvent::Removed {
            path: DocPath::order("o-1"),
        });
        assert!(!table.merge_item_names("o-1", names));
    }

    #[test]
    fn item_names_follow_the_product_reference() {
        let mut table = OrderTable::new();
        table.apply(&ChangeEvent::Added {
            document: Document::new(
                DocPath::order("o-1"),
                json!({"items": [{"productId": "p-1"}, {"productId": "p-2"}]}),
            ),
        });
        // the first item was removed while its name was being resolved
        table.apply(&ChangeEvent::Modified {
            document: Document::new(
                DocPath::order("o-1"),
                json!({"items": [{"productId": "p-2"}, {"productId": "p-3"}]}),
            ),
        });
        let names = BTreeMap::from([
            (0, ("p-1".to_string(), "Soap".to_string())),
            (1, ("p-2".to_string(), "Rice".to_string())),
        ]);
        assert!(table.merge_item_names("o-1", names));

        let order = table.get("o-1").unwrap();
        assert_eq!(order.item_name(0), None);
        assert_eq!(order.item_name(1), None);
        assert_eq!(
            order.unnamed_items(),
            vec![(0, "p-2".to_string()), (1, "p-3".to_string())]
        );
    }

    #[test]
    fn status_change_and_restore() {
        let mut table = OrderTable::new();
        table.apply(&ChangeEvent::Added {
            document: order_doc("o-1", Some(1), "pending"),
        });
        let previous = table
            .set_status("o-1", OrderStatus::Processing, 50)
            .unwrap();
        assert_eq!(previous, (OrderStatus::Pending, None));
        assert!(table.restore_status("o-1", OrderStatus::Processing, previous));
        assert_eq!(table.get("o-1").unwrap().status, OrderStatus::Pending);

        assert!(matches!(
            table.set_status("o-1", OrderStatus::Delivered, 60),
            Err(Error::InvalidTransition { .. })
        ));
        assert!(matches!(
            table.set_status("o-9", OrderStatus::Processing, 60),
            Err(Error::OrderNotFound(_))
        ));
    }

    #[test]
    fn cart_echo_roundtrip() {
        let mut cache = LocalCache::new("u-1");
        let mut cart = CartState::empty("u-1");
        cart.add_product(&ProductRecord::placeholder("p-1", Some("Soap"), Some(2.0)), 2)
            .unwrap();
        let cart = cart.stamped(1_000);

        let echo = Document::new(DocPath::cart(&"u-1".to_string()), CachedEntity::to_value(&cart));
        let result = cache.apply(CacheSlot::Cart, &ChangeEvent::Modified { document: echo });
        assert_eq!(result.applied, 1);
        assert_eq!(cache.cart(), cart);
    }

    #[test]
    fn foreign_cart_rejected() {
        let mut cache = LocalCache::new("u-1");
        let doc = Document::new(DocPath::cart(&"u-2".to_string()), json!({"items": []}));
        let result = cache.apply(CacheSlot::Cart, &ChangeEvent::Modified { document: doc });
        assert_eq!(result.applied, 0);
        assert_eq!(result.skipped.len(), 1);
    }

    #[test]
    fn cart_stamps_increase() {
        let mut cart = CartState::empty("u-1");
        cart.updated_at = Some(500);
        assert_eq!(cart.clone().stamped(100).updated_at, Some(501));
        assert_eq!(cart.stamped(900).updated_at, Some(900));
    }

    #[test]
    fn teardown_bumps_epoch_and_clears() {
        let mut cache = LocalCache::new("u-1");
        cache.apply(
            CacheSlot::UserOrders,
            &ChangeEvent::Added {
                document: order_doc("o-1", Some(1), "pending"),
            },
        );
        let pushed = CartState::layer_mut(&mut cache).push(
            Generation::new(1),
            Arc::new(|c: &CartState| -> Result<CartState> {
                let mut next = c.clone();
                next.add_product(&ProductRecord::placeholder("p-1", None, None), 1)?;
                Ok(next)
            }),
        );
        assert!(pushed.is_ok());

        let before = cache.epoch();
        let after = cache.teardown("u-2");
        assert!(after.is_newer_than(before));
        assert_eq!(cache.owner(), "u-2");
        assert!(cache.user_orders().is_empty());
        assert!(cache.cart().is_empty());
        assert!(cache.payment_methods().is_none());
        assert_eq!(CartState::path(&cache), DocPath::cart(&"u-2".to_string()));
    }

    #[test]
    fn payment_config_events() {
        let mut cache = LocalCache::new("u-1");
        assert!(cache.payment_methods().is_none());

        let doc = Document::new(DocPath::payment_methods(), json!({"cod": {"enabled": true}}));
        cache.apply(
            CacheSlot::PaymentMethods,
            &ChangeEvent::Modified { document: doc },
        );
        assert_eq!(cache.payment_methods().unwrap().enabled_count(), 1);

        cache.apply(
            CacheSlot::PaymentMethods,
            &ChangeEvent::Removed {
                path: DocPath::payment_methods(),
            },
        );
        assert!(cache.payment_methods().is_none());
    }
}
