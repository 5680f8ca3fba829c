//! Referential-integrity reconciliation between orders and products.
//!
//! This module is pure planning: it classifies orders and computes the writes
//! each mode needs. Executing the writes against the remote store is the
//! caller's job.
//!
//! # Modes
//!
//! - **Verify**: classify every order, report `missing = referenced - existing`.
//! - **Migrate**: create a placeholder product for every missing id, then
//!   rewrite affected orders' items into the normalized shape.
//! - **Cleanup**: delete every order classified [`OrderClass::Invalid`].
//!
//! # Classification
//!
//! An order is checked item by item with [`extract_product_ref`]:
//!
//! 1. Any item without an extractable reference, or an order with no items at
//!    all, makes the order [`OrderClass::Anomalous`]. Anomalous orders are
//!    reported but never deleted, even if they also reference missing
//!    products.
//! 2. Otherwise, any reference whose product could not be looked up makes the
//!    order [`OrderClass::Unverified`]; it is neither repaired nor deleted.
//! 3. Otherwise, any reference to a product that does not exist makes the
//!    order [`OrderClass::Invalid`].
//! 4. Everything else is [`OrderClass::Valid`].

use crate::{
    reference::{extract_product_ref, item_label, item_price, item_quantity},
    DatasetSnapshot, DocPath, OrderId, OrderRecord, ProductId, ProductRecord, ProductRef, WriteOp,
    PLACEHOLDER_PRICE,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Reconciliation run mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReconcileMode {
    /// Read-only report
    Verify,
    /// Additive repair
    Migrate,
    /// Destructive removal of invalid orders
    Cleanup,
}

impl ReconcileMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ReconcileMode::Verify => "verify",
            ReconcileMode::Migrate => "migrate",
            ReconcileMode::Cleanup => "cleanup",
        }
    }

    pub fn is_destructive(self) -> bool {
        self == ReconcileMode::Cleanup
    }
}

impl fmt::Display for ReconcileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReconcileMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "verify" => Ok(ReconcileMode::Verify),
            "migrate" => Ok(ReconcileMode::Migrate),
            "cleanup" => Ok(ReconcileMode::Cleanup),
            other => Err(format!(
                "unknown mode '{other}', expected verify, migrate or cleanup"
            )),
        }
    }
}

/// Products known to a reconciliation run.
///
/// Ids whose lookup failed are tracked separately: they are neither existing
/// nor missing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProductIndex {
    prices: BTreeMap<ProductId, Option<f64>>,
    unavailable: BTreeSet<ProductId>,
}

impl ProductIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Index every product document of a snapshot.
    pub fn from_snapshot(snapshot: &DatasetSnapshot) -> Self {
        let mut index = Self::new();
        for id in snapshot.product_ids() {
            index.insert_id(id);
        }
        for product in snapshot.products() {
            index.insert(&product);
        }
        index
    }

    pub fn insert(&mut self, product: &ProductRecord) {
        self.unavailable.remove(&product.id);
        self.prices.insert(product.id.clone(), Some(product.price));
    }

    /// Record an existing product whose body was not read or did not parse.
    pub fn insert_id(&mut self, id: ProductId) {
        self.unavailable.remove(&id);
        self.prices.entry(id).or_insert(None);
    }

    /// Record an id whose lookup failed.
    pub fn mark_unavailable(&mut self, id: ProductId) {
        if !self.prices.contains_key(&id) {
            self.unavailable.insert(id);
        }
    }

    pub fn exists(&self, id: &str) -> bool {
        self.prices.contains_key(id)
    }

    pub fn is_unavailable(&self, id: &str) -> bool {
        self.unavailable.contains(id)
    }

    pub fn price(&self, id: &str) -> Option<f64> {
        self.prices.get(id).copied().flatten()
    }

    pub fn ids(&self) -> BTreeSet<ProductId> {
        self.prices.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

/// Classification of one order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderClass {
    Valid,
    /// References at least one product that does not exist
    Invalid,
    /// Carries malformed data; never deleted
    Anomalous,
    /// A referenced product could not be looked up
    Unverified,
}

/// A malformed or unresolvable order, reported and never auto-deleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityAnomaly {
    pub order_id: OrderId,
    /// Index of the offending item, `None` when the whole order is affected
    pub item_index: Option<usize>,
    pub reason: String,
}

impl fmt::Display for IntegrityAnomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.item_index {
            Some(index) => write!(f, "order {} item {}: {}", self.order_id, index, self.reason),
            None => write!(f, "order {}: {}", self.order_id, self.reason),
        }
    }
}

/// A per-item failure during a reconciliation run. Collected, never fatal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialReferenceFailure {
    /// Document the failed read or write targeted
    pub path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<OrderId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub product_id: Option<ProductId>,
    pub reason: String,
}

impl PartialReferenceFailure {
    /// A failed product lookup or product write.
    pub fn product(id: &str, reason: impl ToString) -> Self {
        Self {
            path: DocPath::product(id).to_string(),
            order_id: None,
            product_id: Some(id.to_string()),
            reason: reason.to_string(),
        }
    }

    /// A failed order write.
    pub fn order(id: &str, reason: impl ToString) -> Self {
        Self {
            path: DocPath::order(id).to_string(),
            order_id: Some(id.to_string()),
            product_id: None,
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for PartialReferenceFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path, self.reason)
    }
}

/// Result of checking one order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderScan {
    pub order_id: OrderId,
    pub class: OrderClass,
    /// Resolved references, deduplicated
    pub referenced: BTreeSet<ProductId>,
    /// Referenced products that do not exist
    pub missing: BTreeSet<ProductId>,
    /// Indices of items without an extractable reference
    pub unresolved: Vec<usize>,
}

/// Classify one order against the known products.
pub fn classify_order(order: &OrderRecord, index: &ProductIndex) -> OrderScan {
    let mut referenced = BTreeSet::new();
    let mut missing = BTreeSet::new();
    let mut unresolved = Vec::new();
    let mut unverified = false;

    for (i, item) in order.items.iter().enumerate() {
        match extract_product_ref(item) {
            ProductRef::Resolved { id, .. } => {
                if index.is_unavailable(&id) {
                    unverified = true;
                } else if !index.exists(&id) {
                    missing.insert(id.clone());
                }
                referenced.insert(id);
            }
            ProductRef::Unresolved => unresolved.push(i),
        }
    }

    let class = if order.items.is_empty() || !unresolved.is_empty() {
        OrderClass::Anomalous
    } else if unverified {
        OrderClass::Unverified
    } else if !missing.is_empty() {
        OrderClass::Invalid
    } else {
        OrderClass::Valid
    };

    OrderScan {
        order_id: order.id.clone(),
        class,
        referenced,
        missing,
        unresolved,
    }
}

fn anomalies_of(scan: &OrderScan, order: &OrderRecord) -> Vec<IntegrityAnomaly> {
    if order.items.is_empty() {
        return vec![IntegrityAnomaly {
            order_id: scan.order_id.clone(),
            item_index: None,
            reason: "order has no items".into(),
        }];
    }
    scan.unresolved
        .iter()
        .map(|i| IntegrityAnomaly {
            order_id: scan.order_id.clone(),
            item_index: Some(*i),
            reason: "item has no extractable product reference".into(),
        })
        .collect()
}

/// Read-only result of scanning all orders.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Verification {
    /// One scan per parsed order, in order id order
    pub scans: Vec<OrderScan>,
    pub referenced: BTreeSet<ProductId>,
    pub existing_products: usize,
    /// `referenced - existing`
    pub missing: BTreeSet<ProductId>,
    /// Referenced ids whose lookup failed
    pub unavailable: BTreeSet<ProductId>,
    pub anomalies: Vec<IntegrityAnomaly>,
}

impl Verification {
    /// Orders scanned, including documents that failed to parse.
    pub fn scanned(&self) -> usize {
        self.scans.len()
            + self
                .anomalies
                .iter()
                .filter(|a| a.item_index.is_none() && !self.has_scan(&a.order_id))
                .count()
    }

    fn has_scan(&self, order_id: &str) -> bool {
        self.scans.iter().any(|s| s.order_id == order_id)
    }

    pub fn count(&self, class: OrderClass) -> usize {
        self.scans.iter().filter(|s| s.class == class).count()
    }

    pub fn orders_with(&self, class: OrderClass) -> impl Iterator<Item = &OrderScan> {
        self.scans.iter().filter(move |s| s.class == class)
    }

    /// Whether the data set has no missing references and no anomalies.
    pub fn is_clean(&self) -> bool {
        self.missing.is_empty() && self.anomalies.is_empty() && self.unavailable.is_empty()
    }
}

/// Scan parsed orders against a product index.
///
/// `unparsed` holds order documents that failed to parse; each becomes an
/// anomaly.
pub fn verify_orders(
    orders: &[OrderRecord],
    unparsed: &[(OrderId, String)],
    index: &ProductIndex,
) -> Verification {
    let mut sorted: Vec<&OrderRecord> = orders.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));

    let mut verification = Verification {
        existing_products: index.len(),
        ..Verification::default()
    };
    for order in sorted {
        let scan = classify_order(order, index);
        verification.referenced.extend(scan.referenced.iter().cloned());
        verification.missing.extend(scan.missing.iter().cloned());
        verification.anomalies.extend(anomalies_of(&scan, order));
        verification.scans.push(scan);
    }
    verification.unavailable = verification
        .referenced
        .iter()
        .filter(|id| index.is_unavailable(id))
        .cloned()
        .collect();
    for (order_id, reason) in unparsed {
        verification.anomalies.push(IntegrityAnomaly {
            order_id: order_id.clone(),
            item_index: None,
            reason: reason.clone(),
        });
    }
    verification
}

/// Verify a whole snapshot.
pub fn verify(snapshot: &DatasetSnapshot) -> Verification {
    let (orders, errors) = snapshot.orders();
    let unparsed: Vec<_> = errors
        .into_iter()
        .map(|(id, e)| (id, e.to_string()))
        .collect();
    verify_orders(&orders, &unparsed, &ProductIndex::from_snapshot(snapshot))
}

/// Normalized replacement items for one order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderRewrite {
    pub order_id: OrderId,
    pub items: Vec<Value>,
    /// Products that must exist before the rewrite is written
    pub requires: BTreeSet<ProductId>,
}

impl OrderRewrite {
    pub fn write_op(&self) -> WriteOp {
        WriteOp::update(
            DocPath::order(self.order_id.clone()),
            json!({ "items": self.items }),
        )
    }
}

/// Writes planned by Migrate.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationPlan {
    /// Placeholder products to create, in id order
    pub products: Vec<ProductRecord>,
    pub rewrites: Vec<OrderRewrite>,
}

impl MigrationPlan {
    pub fn is_empty(&self) -> bool {
        self.products.is_empty() && self.rewrites.is_empty()
    }

    /// Number of writes the plan performs.
    pub fn write_count(&self) -> usize {
        self.products.len() + self.rewrites.len()
    }

    /// Product creations followed by order rewrites.
    pub fn write_ops(&self) -> Vec<WriteOp> {
        self.products
            .iter()
            .map(|p| WriteOp::set(DocPath::product(p.id.clone()), p.to_value()))
            .chain(self.rewrites.iter().map(OrderRewrite::write_op))
            .collect()
    }
}

// fields replaced by the normalized ones
const LEGACY_ITEM_KEYS: [&str; 7] = [
    "productId",
    "id",
    "product",
    "quantity",
    "qty",
    "price",
    "unitPrice",
];

/// Rewrite one item into `{productId, name?, quantity, price, ...}`.
///
/// Items without an extractable reference are returned unchanged.
pub fn normalize_item(item: &Value, fallback_price: Option<f64>) -> Value {
    let ProductRef::Resolved { id, .. } = extract_product_ref(item) else {
        return item.clone();
    };

    let mut normalized = Map::new();
    normalized.insert("productId".into(), Value::String(id));
    if let Some(label) = item_label(item) {
        normalized.insert("name".into(), Value::String(label.to_string()));
    }
    normalized.insert("quantity".into(), Value::from(item_quantity(item)));
    let price = item_price(item)
        .or(fallback_price)
        .unwrap_or(PLACEHOLDER_PRICE);
    normalized.insert("price".into(), json!(price));

    if let Some(original) = item.as_object() {
        for (key, value) in original {
            if !LEGACY_ITEM_KEYS.contains(&key.as_str()) {
                normalized.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }
    }
    Value::Object(normalized)
}

/// Plan Migrate for a set of orders.
///
/// Placeholders take their name and price from the first item referencing
/// the id, in order id order. Orders are rewritten only when they reference a
/// missing product and their items are not already normalized, so a second run
/// over the migrated data plans nothing.
pub fn plan_migration(orders: &[OrderRecord], index: &ProductIndex) -> MigrationPlan {
    let mut sorted: Vec<&OrderRecord> = orders.iter().collect();
    sorted.sort_by(|a, b| a.id.cmp(&b.id));

    let mut placeholders: BTreeMap<ProductId, ProductRecord> = BTreeMap::new();
    let mut rewrites = Vec::new();

    for order in sorted {
        let scan = classify_order(order, index);
        if scan.missing.is_empty() || scan.class == OrderClass::Unverified {
            continue;
        }
        for item in &order.items {
            if let ProductRef::Resolved { id, .. } = extract_product_ref(item) {
                if scan.missing.contains(&id) && !placeholders.contains_key(&id) {
                    let product = ProductRecord::placeholder(
                        id.clone(),
                        item_label(item),
                        item_price(item),
                    );
                    placeholders.insert(id, product);
                }
            }
        }

        let items: Vec<Value> = order
            .items
            .iter()
            .map(|item| {
                let fallback = extract_product_ref(item).id().and_then(|id| {
                    index
                        .price(id)
                        .or_else(|| placeholders.get(id).map(|p| p.price))
                });
                normalize_item(item, fallback)
            })
            .collect();
        if items != order.items {
            rewrites.push(OrderRewrite {
                order_id: order.id.clone(),
                items,
                requires: scan.missing,
            });
        }
    }

    MigrationPlan {
        products: placeholders.into_values().collect(),
        rewrites,
    }
}

/// Deletes planned by Cleanup: one per [`OrderClass::Invalid`] order.
pub fn plan_cleanup(verification: &Verification) -> Vec<WriteOp> {
    verification
        .orders_with(OrderClass::Invalid)
        .map(|scan| WriteOp::delete(DocPath::order(scan.order_id.clone())))
        .collect()
}

/// Summary of a reconciliation run. Transient, never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationReport {
    pub mode: ReconcileMode,
    pub scanned: usize,
    pub valid: usize,
    pub invalid: usize,
    pub anomalous: usize,
    pub unverified: usize,
    pub missing: Vec<ProductId>,
    pub created_products: Vec<ProductId>,
    /// Orders whose missing products were all created
    pub repaired: Vec<OrderId>,
    pub removed: Vec<OrderId>,
    pub writes: usize,
    pub anomalies: Vec<IntegrityAnomaly>,
    pub failures: Vec<PartialReferenceFailure>,
}

impl ReconciliationReport {
    /// Start a report from a verification; write results are filled in later.
    pub fn new(mode: ReconcileMode, verification: &Verification) -> Self {
        Self {
            mode,
            scanned: verification.scanned(),
            valid: verification.count(OrderClass::Valid),
            invalid: verification.count(OrderClass::Invalid),
            anomalous: verification.count(OrderClass::Anomalous),
            unverified: verification.count(OrderClass::Unverified),
            missing: verification.missing.iter().cloned().collect(),
            created_products: Vec::new(),
            repaired: Vec::new(),
            removed: Vec::new(),
            writes: 0,
            anomalies: verification.anomalies.clone(),
            failures: Vec::new(),
        }
    }

    pub fn repaired_count(&self) -> usize {
        self.repaired.len()
    }

    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

impl fmt::Display for ReconciliationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: scanned {} orders ({} valid, {} invalid, {} anomalous, {} unverified), \
             {} missing products, {} created, {} repaired, {} removed, {} failures",
            self.mode,
            self.scanned,
            self.valid,
            self.invalid,
            self.anomalous,
            self.unverified,
            self.missing.len(),
            self.created_products.len(),
            self.repaired.len(),
            self.removed.len(),
            self.failures.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Document;

    fn order(id: &str, items: Value) -> OrderRecord {
        let doc = Document::new(DocPath::order(id), json!({ "items": items }));
        OrderRecord::from_document(&doc).unwrap()
    }

    fn index(ids: &[&str]) -> ProductIndex {
        let mut index = ProductIndex::new();
        for id in ids {
            index.insert_id(id.to_string());
        }
        index
    }

    #[test]
    fn classify_valid_invalid_anomalous() {
        let idx = index(&["p-1"]);
        let valid = classify_order(&order("o-1", json!([{"productId": "p-1"}])), &idx);
        assert_eq!(valid.class, OrderClass::Valid);

        let invalid = classify_order(
            &order("o-2", json!([{"productId": "p-1"}, {"id": "p-3"}])),
            &idx,
        );
        assert_eq!(invalid.class, OrderClass::Invalid);
        assert_eq!(invalid.missing, BTreeSet::from(["p-3".to_string()]));

        let anomalous = classify_order(&order("o-3", json!([{"name": "mystery"}])), &idx);
        assert_eq!(anomalous.class, OrderClass::Anomalous);
        assert_eq!(anomalous.unresolved, vec![0]);

        let empty = classify_order(&order("o-4", json!([])), &idx);
        assert_eq!(empty.class, OrderClass::Anomalous);
    }

    #[test]
    fn mixed_order_is_anomalous_not_invalid() {
        let idx = index(&[]);
        let scan = classify_order(
            &order("o-1", json!([{"productId": "p-9"}, {"qty": 1}])),
            &idx,
        );
        assert_eq!(scan.class, OrderClass::Anomalous);
        assert_eq!(scan.missing.len(), 1);
    }

    #[test]
    fn unavailable_lookup_is_unverified() {
        let mut idx = index(&[]);
        idx.mark_unavailable("p-1".into());
        let scan = classify_order(&order("o-1", json!([{"productId": "p-1"}])), &idx);
        assert_eq!(scan.class, OrderClass::Unverified);
        assert!(scan.missing.is_empty());

        let verification = verify_orders(
            &[order("o-1", json!([{"productId": "p-1"}]))],
            &[],
            &idx,
        );
        assert!(plan_cleanup(&verification).is_empty());
        assert_eq!(verification.unavailable.len(), 1);
    }

    #[test]
    fn normalize_legacy_items() {
        let item = json!({"product": {"id": "p-1", "name": "Soap", "price": 2.0}, "qty": 3, "note": "gift"});
        assert_eq!(
            normalize_item(&item, None),
            json!({"productId": "p-1", "name": "Soap", "quantity": 3, "price": 2.0, "note": "gift"})
        );

        let malformed = json!({"qty": 3});
        assert_eq!(normalize_item(&malformed, None), malformed);

        let no_price = json!({"id": "p-2"});
        assert_eq!(
            normalize_item(&no_price, Some(7.5)),
            json!({"productId": "p-2", "quantity": 1, "price": 7.5})
        );
    }

    #[test]
    fn placeholder_from_first_occurrence() {
        let orders = vec![
            order("o-b", json!([{"productId": "p-9", "name": "Second", "price": 9.0}])),
            order("o-a", json!([{"productId": "p-9", "name": "First", "price": 4.0}])),
        ];
        let plan = plan_migration(&orders, &index(&[]));
        assert_eq!(plan.products.len(), 1);
        assert_eq!(plan.products[0].name, "First");
        assert_eq!(plan.products[0].price, 4.0);
        assert!(plan.products[0].migrated);
    }

    #[test]
    fn already_normalized_orders_not_rewritten() {
        let orders = vec![order(
            "o-1",
            json!([{"productId": "p-9", "quantity": 1, "price": 4.0}]),
        )];
        let plan = plan_migration(&orders, &index(&[]));
        assert_eq!(plan.products.len(), 1);
        assert!(plan.rewrites.is_empty());
    }

    #[test]
    fn mode_parsing() {
        assert_eq!("Verify".parse::<ReconcileMode>(), Ok(ReconcileMode::Verify));
        assert_eq!(" cleanup ".parse::<ReconcileMode>(), Ok(ReconcileMode::Cleanup));
        assert!("repair".parse::<ReconcileMode>().is_err());
        assert!(ReconcileMode::Cleanup.is_destructive());
    }

    #[test]
    fn report_summary() {
        let orders = vec![
            order("o-1", json!([{"productId": "p-1"}])),
            order("o-2", json!([{"productId": "p-2"}])),
        ];
        let verification = verify_orders(
            &orders,
            &[("o-3".to_string(), "bad".to_string())],
            &index(&["p-1"]),
        );
        let report = ReconciliationReport::new(ReconcileMode::Verify, &verification);
        assert_eq!(report.scanned, 3);
        assert_eq!(report.valid, 1);
        assert_eq!(report.invalid, 1);
        assert_eq!(report.missing, vec!["p-2".to_string()]);
        assert_eq!(report.anomalies.len(), 1);
        assert!(report.to_string().starts_with("verify: scanned 3 orders"));
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_malformed_item() -> impl Strategy<Value = Value> {
            prop_oneof![
                Just(json!({})),
                Just(json!(null)),
                Just(json!({"productId": ""})),
                Just(json!({"productId": 17})),
                Just(json!({"product": "p-1"})),
                Just(json!({"product": {"name": "x"}})),
                "[a-z]{0,6}".prop_map(|s| json!({ "name": s })),
                any::<i64>().prop_map(|n| json!({ "id": n })),
            ]
        }

        fn arb_ref_item() -> impl Strategy<Value = Value> {
            (0u8..6).prop_map(|n| json!({ "productId": format!("p-{n}") }))
        }

        proptest! {
            #[test]
            fn prop_cleanup_never_deletes_malformed_orders(
                good in prop::collection::vec(arb_ref_item(), 0..4),
                bad in prop::collection::vec(arb_malformed_item(), 1..4),
                existing in prop::collection::btree_set(0u8..6, 0..6),
            ) {
                let mut items = good;
                items.extend(bad);
                let orders = vec![order("o-1", Value::Array(items))];
                let mut idx = ProductIndex::new();
                for n in existing {
                    idx.insert_id(format!("p-{n}"));
                }

                let verification = verify_orders(&orders, &[], &idx);
                prop_assert!(plan_cleanup(&verification).is_empty());
                prop_assert_eq!(verification.scans[0].class, OrderClass::Anomalous);
            }
        }
    }
}
