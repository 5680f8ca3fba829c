//! Reconciliation scenarios over whole data sets.

use serde_json::json;
use shopfront_engine::{
    plan_cleanup, plan_migration, verify, DatasetSnapshot, DocPath, Document, OrderClass,
    ProductIndex, ReconcileMode, ReconciliationReport, WriteOp,
};
use std::collections::BTreeSet;

/// Products {P1, P2}; O1 references {P1, P3}; O2 references {P1, P2}.
fn fixture() -> DatasetSnapshot {
    DatasetSnapshot::from_documents([
        Document::new(DocPath::product("P1"), json!({"name": "Soap", "price": 2.0})),
        Document::new(DocPath::product("P2"), json!({"name": "Rice", "price": 9.5})),
        Document::new(
            DocPath::order("O1"),
            json!({
                "userId": "u-1",
                "items": [
                    {"productId": "P1", "name": "Soap", "price": 2.0, "quantity": 1},
                    {"id": "P3", "name": "Candle", "price": 4.25, "qty": 2}
                ],
                "totalAmount": 10.5,
                "status": "delivered",
                "createdAt": 1000
            }),
        ),
        Document::new(
            DocPath::order("O2"),
            json!({
                "userId": "u-2",
                "items": [
                    {"productId": "P1", "quantity": 1, "price": 2.0},
                    {"productId": "P2", "quantity": 1, "price": 9.5}
                ],
                "totalAmount": 11.5,
                "status": "pending",
                "createdAt": 2000
            }),
        ),
    ])
}

fn apply_all(snapshot: &mut DatasetSnapshot, ops: &[WriteOp]) {
    for op in ops {
        snapshot.apply(op);
    }
}

fn migrate(snapshot: &mut DatasetSnapshot) -> usize {
    let (orders, _) = snapshot.orders();
    let plan = plan_migration(&orders, &ProductIndex::from_snapshot(snapshot));
    let ops = plan.write_ops();
    apply_all(snapshot, &ops);
    ops.len()
}

#[test]
fn verify_reports_missing_products() {
    let data = fixture();
    let verification = verify(&data);

    assert_eq!(verification.missing, BTreeSet::from(["P3".to_string()]));
    assert_eq!(
        verification.referenced,
        BTreeSet::from(["P1".to_string(), "P2".to_string(), "P3".to_string()])
    );
    assert_eq!(verification.existing_products, 2);
    assert_eq!(verification.count(OrderClass::Invalid), 1);
    assert_eq!(verification.count(OrderClass::Valid), 1);

    let report = ReconciliationReport::new(ReconcileMode::Verify, &verification);
    assert_eq!(report.scanned, 2);
    assert_eq!(report.writes, 0);
}

#[test]
fn migrate_creates_placeholder_and_keeps_orders() {
    let mut data = fixture();
    let writes = migrate(&mut data);
    assert!(writes > 0);

    let p3 = data.get(&DocPath::product("P3")).unwrap();
    assert_eq!(p3["name"], "Candle");
    assert_eq!(p3["price"], 4.25);
    assert_eq!(p3["migrated"], true);

    assert!(data.get(&DocPath::order("O1")).is_some());
    assert!(data.get(&DocPath::order("O2")).is_some());

    // O1 items now use the explicit productId field
    let items = data.get(&DocPath::order("O1")).unwrap()["items"].clone();
    assert_eq!(items[1]["productId"], "P3");
    assert_eq!(items[1]["quantity"], 2);
    assert!(items[1].get("id").is_none());

    // order fields other than items are untouched
    assert_eq!(data.get(&DocPath::order("O1")).unwrap()["totalAmount"], 10.5);
    assert!(verify(&data).is_clean());
}

#[test]
fn migrate_is_idempotent() {
    let mut data = fixture();
    assert!(migrate(&mut data) > 0);
    let after_first = data.clone();

    assert_eq!(migrate(&mut data), 0);
    assert_eq!(data, after_first);
}

#[test]
fn cleanup_deletes_only_invalid_orders() {
    let mut data = fixture();
    let deletes = plan_cleanup(&verify(&data));
    assert_eq!(deletes, vec![WriteOp::delete(DocPath::order("O1"))]);

    apply_all(&mut data, &deletes);
    assert!(data.get(&DocPath::order("O1")).is_none());
    assert!(data.get(&DocPath::order("O2")).is_some());
    assert_eq!(data.product_ids().len(), 2);
}

#[test]
fn cleanup_after_migrate_deletes_nothing() {
    let mut data = fixture();
    migrate(&mut data);
    assert!(plan_cleanup(&verify(&data)).is_empty());
}

#[test]
fn cleanup_spares_malformed_orders() {
    let mut data = fixture();
    data.insert(Document::new(
        DocPath::order("O3"),
        json!({"items": [{"productId": "P404"}, {"name": "no reference"}]}),
    ));
    data.insert(Document::new(
        DocPath::order("O4"),
        json!({"items": [null, {"product": {}}]}),
    ));

    let verification = verify(&data);
    assert_eq!(verification.count(OrderClass::Anomalous), 2);
    assert_eq!(verification.anomalies.len(), 3);

    let deletes = plan_cleanup(&verification);
    assert_eq!(deletes, vec![WriteOp::delete(DocPath::order("O1"))]);
}

#[test]
fn snapshot_file_roundtrip_after_cleanup() {
    let mut data = fixture();
    let deletes = plan_cleanup(&verify(&data));
    apply_all(&mut data, &deletes);

    let restored = DatasetSnapshot::from_json(&data.to_json_pretty().unwrap()).unwrap();
    assert_eq!(restored, data);
    assert_eq!(restored.documents("orders").len(), 1);
}
