//! Background resolution of product names for order items.
//!
//! Legacy order items often carry only a product reference. Their display
//! names are looked up off the applier path by a bounded pool of tasks and
//! merged back into the cache. A result for an order that left the cache, or
//! for a session that was torn down, is dropped. Items that changed while a
//! lookup ran are picked up again once it finishes. Only found names are
//! remembered, so a product created later is still resolved.

use crate::remote::RemoteStore;
use crate::state::SharedState;
use dashmap::{DashMap, DashSet};
use shopfront_engine::{CacheSlot, DocPath, Generation, OrderId, ProductId, ProductRecord};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;

/// Items of one order that still need a name: `(item index, product id)`.
pub type UnnamedItems = Vec<(usize, ProductId)>;

#[derive(Clone)]
pub struct NameEnricher {
    store: Arc<dyn RemoteStore>,
    state: SharedState,
    permits: Arc<Semaphore>,
    in_flight: Arc<DashSet<(CacheSlot, OrderId)>>,
    /// Names of products that were found
    names: Arc<DashMap<ProductId, String>>,
}

impl NameEnricher {
    pub fn new(store: Arc<dyn RemoteStore>, state: SharedState, concurrency: usize) -> Self {
        Self {
            store,
            state,
            permits: Arc::new(Semaphore::new(concurrency.max(1))),
            in_flight: Arc::new(DashSet::new()),
            names: Arc::new(DashMap::new()),
        }
    }

    /// Start resolving names for the given orders of a slot.
    ///
    /// Orders already being resolved are skipped. Returns the number of
    /// orders dispatched.
    pub fn dispatch(
        &self,
        slot: CacheSlot,
        epoch: Generation,
        orders: Vec<(OrderId, UnnamedItems)>,
    ) -> usize {
        let mut dispatched = 0;
        for (order_id, items) in orders {
            if items.is_empty() || !self.in_flight.insert((slot, order_id.clone())) {
                continue;
            }
            let worker = self.clone();
            tokio::spawn(async move { worker.resolve_order(slot, epoch, order_id, items).await });
            dispatched += 1;
        }
        dispatched
    }

    /// Orders whose names are being resolved.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    async fn resolve_order(
        &self,
        slot: CacheSlot,
        epoch: Generation,
        order_id: OrderId,
        items: UnnamedItems,
    ) {
        let names = match self.permits.acquire().await {
            Ok(_permit) => self.lookup_names(&items).await,
            Err(_) => BTreeMap::new(),
        };

        let mut state = self.state.lock().await;
        if state.cache.epoch() != epoch {
            tracing::debug!(order_id = %order_id, "session changed; item names dropped");
            drop(state);
            self.in_flight.remove(&(slot, order_id));
            return;
        }

        let mut merged = false;
        let mut remaining = UnnamedItems::new();
        if let Some(table) = state.cache.orders_mut(slot) {
            merged = !names.is_empty() && table.merge_item_names(&order_id, names);
            // items added or moved while the lookup ran
            if let Some(order) = table.get(&order_id) {
                remaining = order
                    .unnamed_items()
                    .into_iter()
                    .filter(|item| !items.contains(item))
                    .collect();
            } else {
                tracing::debug!(order_id = %order_id, slot = %slot, "order left the cache; item names dropped");
            }
        }
        drop(state);
        if merged {
            self.state.notify();
        }

        self.in_flight.remove(&(slot, order_id.clone()));
        if !remaining.is_empty() {
            tracing::debug!(order_id = %order_id, items = remaining.len(), "order items changed; resolving again");
            self.dispatch(slot, epoch, vec![(order_id, remaining)]);
        }
    }

    async fn lookup_names(&self, items: &UnnamedItems) -> BTreeMap<usize, (ProductId, String)> {
        let mut names = BTreeMap::new();
        for (index, product_id) in items {
            if let Some(name) = self.product_name(product_id).await {
                names.insert(*index, (product_id.clone(), name));
            }
        }
        names
    }

    async fn product_name(&self, product_id: &ProductId) -> Option<String> {
        if let Some(known) = self.names.get(product_id) {
            return Some(known.clone());
        }
        match self.store.get(&DocPath::product(product_id.clone())).await {
            Ok(document) => {
                let name = document
                    .and_then(|doc| ProductRecord::from_document(&doc).ok())
                    .map(|product| product.name)?;
                self.names.insert(product_id.clone(), name.clone());
                Some(name)
            }
            Err(e) => {
                tracing::debug!(product_id = %product_id, error = %e, "product name lookup failed");
                None
            }
        }
    }
}
