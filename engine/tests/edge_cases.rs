//! Edge case tests for shopfront-engine
//!
//! These tests cover boundary conditions and unusual inputs.

use serde_json::{json, Value};
use shopfront_engine::{
    aggregate, extract_product_ref, plan_cleanup, plan_migration, verify, CacheSlot,
    CartState, ChangeEvent, DatasetSnapshot, DocPath, Document, LocalCache, OrderClass,
    OrderRecord, OrderStatus, ProductIndex, ProductRecord, ProductRef, RefField,
};

fn snapshot(products: &[&str], orders: &[(&str, Value)]) -> DatasetSnapshot {
    let mut docs = Vec::new();
    for id in products {
        docs.push(Document::new(
            DocPath::product(*id),
            json!({"name": format!("Product {id}"), "price": 1.0}),
        ));
    }
    for (id, items) in orders {
        docs.push(Document::new(
            DocPath::order(*id),
            json!({"items": items, "status": "pending", "totalAmount": 1.0}),
        ));
    }
    DatasetSnapshot::from_documents(docs)
}

// ============================================================================
// Legacy Item Shapes
// ============================================================================

#[test]
fn every_legacy_shape_resolves() {
    let shapes = [
        (json!({"productId": "p-1"}), RefField::ProductId),
        (json!({"id": "p-1"}), RefField::Id),
        (json!({"product": {"id": "p-1"}}), RefField::NestedId),
        (json!({"product": {"productId": "p-1"}}), RefField::NestedProductId),
    ];
    for (item, field) in shapes {
        assert_eq!(
            extract_product_ref(&item),
            ProductRef::Resolved {
                id: "p-1".into(),
                field
            }
        );
    }
}

#[test]
fn legacy_shapes_verify_against_products() {
    let data = snapshot(
        &["p-1", "p-2"],
        &[
            ("o-1", json!([{"id": "p-1"}, {"product": {"id": "p-2"}}])),
            ("o-2", json!([{"product": {"productId": "p-3"}}])),
        ],
    );
    let verification = verify(&data);
    assert_eq!(verification.count(OrderClass::Valid), 1);
    assert_eq!(verification.count(OrderClass::Invalid), 1);
    assert_eq!(verification.missing.iter().collect::<Vec<_>>(), vec!["p-3"]);
}

#[test]
fn migrate_normalizes_legacy_items() {
    let data = snapshot(
        &[],
        &[(
            "o-1",
            json!([{"product": {"id": "p-7", "name": "Lamp", "price": 30.0}, "qty": 2}]),
        )],
    );
    let (orders, _) = data.orders();
    let plan = plan_migration(&orders, &ProductIndex::from_snapshot(&data));

    assert_eq!(plan.products[0].name, "Lamp");
    assert_eq!(plan.products[0].price, 30.0);
    assert_eq!(
        plan.rewrites[0].items,
        vec![json!({"productId": "p-7", "name": "Lamp", "quantity": 2, "price": 30.0})]
    );
}

// ============================================================================
// Empty and Malformed Data
// ============================================================================

#[test]
fn order_without_items_is_anomaly() {
    let data = snapshot(&["p-1"], &[("o-1", json!([]))]);
    let verification = verify(&data);

    assert_eq!(verification.count(OrderClass::Anomalous), 1);
    assert_eq!(verification.anomalies.len(), 1);
    assert_eq!(verification.anomalies[0].item_index, None);
    assert!(plan_cleanup(&verification).is_empty());
}

#[test]
fn unparseable_order_reported_not_deleted() {
    let mut data = snapshot(&[], &[]);
    data.insert(Document::new(
        DocPath::order("o-broken"),
        json!({"items": 42, "status": "pending"}),
    ));
    let verification = verify(&data);

    assert_eq!(verification.scanned(), 1);
    assert_eq!(verification.anomalies[0].order_id, "o-broken");
    assert!(plan_cleanup(&verification).is_empty());
}

#[test]
fn empty_dataset() {
    let verification = verify(&DatasetSnapshot::new());
    assert_eq!(verification.scanned(), 0);
    assert!(verification.is_clean());
    assert!(plan_migration(&[], &ProductIndex::new()).is_empty());
}

#[test]
fn whitespace_ids_are_unresolved() {
    let data = snapshot(&[], &[("o-1", json!([{"productId": "  "}]))]);
    let verification = verify(&data);
    assert_eq!(verification.scans[0].class, OrderClass::Anomalous);
    assert!(verification.missing.is_empty());
}

// ============================================================================
// Unicode and Special Ids
// ============================================================================

#[test]
fn unicode_product_ids() {
    let ids = ["日本語", "Привет", "🎉🚀", "a/b", "id with spaces"];
    let orders: Vec<(String, Value)> = ids
        .iter()
        .enumerate()
        .map(|(i, id)| (format!("o-{i}"), json!([{ "productId": id }])))
        .collect();
    let order_refs: Vec<(&str, Value)> = orders
        .iter()
        .map(|(id, items)| (id.as_str(), items.clone()))
        .collect();

    let data = snapshot(&ids[..2], &order_refs);
    let verification = verify(&data);
    assert_eq!(verification.count(OrderClass::Valid), 2);
    assert_eq!(verification.missing.len(), 3);
    assert!(verification.missing.contains("🎉🚀"));

    let json = data.to_json().unwrap();
    assert_eq!(DatasetSnapshot::from_json(&json).unwrap(), data);
}

#[test]
fn very_long_labels_become_placeholder_names() {
    let label = "x".repeat(10_000);
    let product = ProductRecord::placeholder("p-1", Some(&label), None);
    assert_eq!(product.name.len(), 10_000);
    assert_eq!(product.price, 0.0);
}

// ============================================================================
// Cache Edge Cases
// ============================================================================

#[test]
fn cart_removed_remotely_becomes_empty() {
    let mut cache = LocalCache::new("u-1");
    let doc = Document::new(
        DocPath::cart(&"u-1".to_string()),
        json!({"items": [{"productId": "p-1", "name": "Soap", "unitPrice": 2.0, "quantity": 1}]}),
    );
    cache.apply(CacheSlot::Cart, &ChangeEvent::Added { document: doc });
    assert_eq!(cache.cart().item_count(), 1);

    cache.apply(
        CacheSlot::Cart,
        &ChangeEvent::Removed {
            path: DocPath::cart(&"u-1".to_string()),
        },
    );
    assert_eq!(cache.cart(), CartState::empty("u-1"));
}

#[test]
fn stats_over_unknown_totals() {
    let doc = Document::new(
        DocPath::order("o-1"),
        json!({"status": "completed", "items": [{"productId": "p-1"}]}),
    );
    let order = OrderRecord::from_document(&doc).unwrap();
    assert_eq!(order.status, OrderStatus::Delivered);

    let stats = aggregate([&order]);
    assert_eq!(stats.revenue, 0.0);
    assert_eq!(stats.count(OrderStatus::Delivered), 1);
}
