//! Reconciliation runs against the remote store.
//!
//! Planning lives in the engine; this module loads the data, fans product
//! lookups and Migrate writes out with bounded concurrency, commits Cleanup
//! as one atomic batch and assembles the [`ReconciliationReport`].

use crate::error::{Result, SyncError};
use crate::remote::{Query, RemoteStore};
use futures::stream::{self, StreamExt};
use shopfront_engine::{
    plan_cleanup, plan_migration, verify_orders, DocPath, Error, OrderClass, OrderId,
    OrderRecord, PartialReferenceFailure, ProductId, ProductIndex, ProductRecord, ReconcileMode,
    ReconciliationReport, Verification, WriteOp, ORDERS,
};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Proof that the operator confirmed an irreversible Cleanup.
#[derive(Debug)]
pub struct CleanupConfirmation {
    _confirmed: (),
}

impl CleanupConfirmation {
    /// Only call this after the operator explicitly agreed to delete orders.
    pub fn confirm() -> Self {
        Self { _confirmed: () }
    }
}

/// Orders, product lookups and lookup failures of one run.
struct Survey {
    orders: Vec<OrderRecord>,
    unparsed: Vec<(OrderId, String)>,
    index: ProductIndex,
    failures: Vec<PartialReferenceFailure>,
}

impl Survey {
    fn verification(&self) -> Verification {
        verify_orders(&self.orders, &self.unparsed, &self.index)
    }
}

pub struct ReconciliationEngine {
    store: Arc<dyn RemoteStore>,
    concurrency: usize,
}

impl ReconciliationEngine {
    pub fn new(store: Arc<dyn RemoteStore>, concurrency: usize) -> Self {
        Self {
            store,
            concurrency: concurrency.max(1),
        }
    }

    /// Run a mode. Cleanup without a confirmation is rejected before any read.
    pub async fn run(
        &self,
        mode: ReconcileMode,
        confirmation: Option<CleanupConfirmation>,
    ) -> Result<ReconciliationReport> {
        match mode {
            ReconcileMode::Verify => self.verify().await,
            ReconcileMode::Migrate => self.migrate().await,
            ReconcileMode::Cleanup => match confirmation {
                Some(confirmation) => self.cleanup(confirmation).await,
                None => Err(SyncError::Policy(Error::PolicyViolation(
                    "cleanup deletes orders irreversibly and requires confirmation".into(),
                ))),
            },
        }
    }

    /// Read-only scan: missing products, classifications and anomalies.
    pub async fn verify(&self) -> Result<ReconciliationReport> {
        let survey = self.survey().await?;
        let mut report = ReconciliationReport::new(ReconcileMode::Verify, &survey.verification());
        report.failures = survey.failures;
        log_report(&report);
        Ok(report)
    }

    /// Create placeholders for missing products and normalize the items of
    /// the orders referencing them.
    ///
    /// Writes are independent: a failed write is reported and the others
    /// proceed. An order is rewritten only once every product it needs was
    /// created.
    pub async fn migrate(&self) -> Result<ReconciliationReport> {
        let survey = self.survey().await?;
        let verification = survey.verification();
        let plan = plan_migration(&survey.orders, &survey.index);

        let mut report = ReconciliationReport::new(ReconcileMode::Migrate, &verification);
        report.failures = survey.failures;

        let product_results = self
            .write_all(plan.products.iter().map(|product| {
                (
                    product.id.clone(),
                    WriteOp::set(DocPath::product(product.id.clone()), product.to_value()),
                )
            }))
            .await;

        let mut created = BTreeSet::new();
        for (id, result) in product_results {
            match result {
                Ok(()) => {
                    created.insert(id);
                }
                Err(e) => {
                    tracing::warn!(product_id = %id, error = %e, "failed to create placeholder product");
                    report.failures.push(PartialReferenceFailure::product(&id, e));
                }
            }
        }

        let mut rewritten: BTreeMap<OrderId, bool> = BTreeMap::new();
        let mut ready = Vec::new();
        for rewrite in &plan.rewrites {
            if rewrite.requires.is_subset(&created) {
                ready.push((rewrite.order_id.clone(), rewrite.write_op()));
            } else {
                report.failures.push(PartialReferenceFailure::order(
                    &rewrite.order_id,
                    "required products were not created",
                ));
                rewritten.insert(rewrite.order_id.clone(), false);
            }
        }
        for (order_id, result) in self.write_all(ready).await {
            if let Err(e) = &result {
                tracing::warn!(order_id = %order_id, error = %e, "failed to rewrite order items");
                report.failures.push(PartialReferenceFailure::order(&order_id, e));
            }
            rewritten.insert(order_id, result.is_ok());
        }

        report.repaired = verification
            .scans
            .iter()
            .filter(|scan| !scan.missing.is_empty() && scan.class != OrderClass::Unverified)
            .filter(|scan| scan.missing.is_subset(&created))
            .filter(|scan| rewritten.get(&scan.order_id).copied().unwrap_or(true))
            .map(|scan| scan.order_id.clone())
            .collect();
        report.created_products = created.into_iter().collect();
        report.writes =
            report.created_products.len() + rewritten.values().filter(|ok| **ok).count();
        report.failures.sort_by(|a, b| a.path.cmp(&b.path));

        log_report(&report);
        Ok(report)
    }

    /// Delete every order referencing a missing product in one atomic batch.
    ///
    /// Orders with malformed items and orders whose lookups failed are never
    /// deleted. If the batch fails nothing is removed and the error is
    /// returned.
    pub async fn cleanup(
        &self,
        _confirmation: CleanupConfirmation,
    ) -> Result<ReconciliationReport> {
        let survey = self.survey().await?;
        let verification = survey.verification();
        let deletes = plan_cleanup(&verification);

        let mut report = ReconciliationReport::new(ReconcileMode::Cleanup, &verification);
        report.failures = survey.failures;

        if !deletes.is_empty() {
            let removed: Vec<OrderId> = deletes.iter().map(|op| op.path().id.clone()).collect();
            let count = deletes.len();
            if let Err(e) = self.store.batch_write(deletes).await {
                tracing::warn!(orders = count, error = %e, "cleanup batch failed; no order removed");
                return Err(e.into());
            }
            report.removed = removed;
            report.writes = count;
        }

        log_report(&report);
        Ok(report)
    }

    async fn survey(&self) -> Result<Survey> {
        let documents = self.store.query(&Query::collection(ORDERS)).await?;

        let mut orders = Vec::new();
        let mut unparsed = Vec::new();
        for document in &documents {
            match OrderRecord::from_document(document) {
                Ok(order) => orders.push(order),
                Err(e) => unparsed.push((document.id().clone(), e.to_string())),
            }
        }

        let referenced: BTreeSet<ProductId> = orders
            .iter()
            .flat_map(OrderRecord::item_refs)
            .filter_map(|reference| reference.id().cloned())
            .collect();
        let (index, failures) = self.lookup_products(referenced).await;

        tracing::debug!(
            orders = orders.len(),
            unparsed = unparsed.len(),
            products = index.len(),
            "reconciliation data loaded"
        );
        Ok(Survey {
            orders,
            unparsed,
            index,
            failures,
        })
    }

    async fn lookup_products(
        &self,
        ids: BTreeSet<ProductId>,
    ) -> (ProductIndex, Vec<PartialReferenceFailure>) {
        let store = &self.store;
        let results: Vec<_> = stream::iter(ids)
            .map(|id| async move {
                let result = store.get(&DocPath::product(id.clone())).await;
                (id, result)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut index = ProductIndex::new();
        let mut failures = Vec::new();
        for (id, result) in results {
            match result {
                Ok(Some(document)) => match ProductRecord::from_document(&document) {
                    Ok(product) => index.insert(&product),
                    // exists, even if its body is unusable
                    Err(_) => index.insert_id(id),
                },
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(product_id = %id, error = %e, "product lookup failed");
                    failures.push(PartialReferenceFailure::product(&id, e));
                    index.mark_unavailable(id);
                }
            }
        }
        failures.sort_by(|a, b| a.path.cmp(&b.path));
        (index, failures)
    }

    /// Apply independent writes with bounded concurrency.
    async fn write_all<K>(
        &self,
        writes: impl IntoIterator<Item = (K, WriteOp)>,
    ) -> Vec<(K, std::result::Result<(), crate::error::StoreError>)> {
        let store = &self.store;
        stream::iter(writes)
            .map(|(key, op)| async move { (key, store.write(op).await) })
            .buffer_unordered(self.concurrency)
            .collect()
            .await
    }
}

fn log_report(report: &ReconciliationReport) {
    tracing::info!(
        mode = %report.mode,
        scanned = report.scanned,
        missing = report.missing.len(),
        repaired = report.repaired.len(),
        removed = report.removed.len(),
        failures = report.failures.len(),
        "reconciliation finished"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::MemoryStore;
    use serde_json::json;
    use shopfront_engine::Document;

    async fn store_with(orders: &[(&str, serde_json::Value)]) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::new());
        store
            .seed([Document::new(
                DocPath::product("p-1"),
                json!({"name": "Soap", "price": 2.0}),
            )])
            .await;
        store
            .seed(
                orders
                    .iter()
                    .map(|(id, items)| Document::new(DocPath::order(*id), json!({"items": items}))),
            )
            .await;
        store
    }

    #[tokio::test]
    async fn cleanup_requires_confirmation() {
        let store = store_with(&[("o-1", json!([{"productId": "p-9"}]))]).await;
        let engine = ReconciliationEngine::new(store.clone(), 2);

        let err = engine.run(ReconcileMode::Cleanup, None).await.unwrap_err();
        assert!(err.is_policy());
        assert!(store.peek(&DocPath::order("o-1")).await.is_some());
    }

    #[tokio::test]
    async fn verify_does_not_write() {
        let store = store_with(&[
            ("o-1", json!([{"productId": "p-1"}])),
            ("o-2", json!([{"id": "p-9"}])),
        ])
        .await;
        let engine = ReconciliationEngine::new(store.clone(), 2);

        let report = engine.verify().await.unwrap();
        assert_eq!(report.scanned, 2);
        assert_eq!(report.valid, 1);
        assert_eq!(report.invalid, 1);
        assert_eq!(report.missing, vec!["p-9".to_string()]);
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn failed_placeholder_blocks_only_its_order() {
        let store = store_with(&[
            ("o-1", json!([{"productId": "p-8", "name": "Rice"}])),
            ("o-2", json!([{"productId": "p-1"}])),
        ])
        .await;
        let engine = ReconciliationEngine::new(store.clone(), 1);
        store.fail_next_writes(1);

        let report = engine.migrate().await.unwrap();
        assert!(report.created_products.is_empty());
        assert!(report.repaired.is_empty());
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.writes, 0);

        // the next run repairs it
        let report = engine.migrate().await.unwrap();
        assert_eq!(report.created_products, vec!["p-8".to_string()]);
        assert_eq!(report.repaired, vec!["o-1".to_string()]);
    }
}
