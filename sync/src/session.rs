//! The signed-in user's session.
//!
//! A [`Session`] owns every per-user service: the subscriptions feeding the
//! cache, the mutation queue, the payment resolver and the name enricher. A
//! single applier task consumes subscription updates and is the only writer
//! of remote changes into the cache. Identity changes tear the cache down and
//! re-subscribe; results of work started before a teardown are discarded.

use crate::config::SyncConfig;
use crate::enrich::{NameEnricher, UnnamedItems};
use crate::error::{Result, StoreError, SyncError};
use crate::mutation::MutationQueue;
use crate::payment::PaymentMethodResolver;
use crate::remote::{Query, RemoteStore, SubscriptionTarget};
use crate::state::{SharedState, SyncState};
use crate::subscription::{SlotPayload, SlotUpdate, SubscriptionManager};
use serde::{Deserialize, Serialize};
use serde_json::json;
use shopfront_engine::cache::payment_config_from_event;
use shopfront_engine::error::Result as EngineResult;
use shopfront_engine::{
    aggregate, CacheSlot, CartState, CustomerInfo, DocPath, Error, Generation, Mutation, OrderId,
    OrderRecord, OrderStats, OrderStatus, PaymentMethodConfig, ProductRecord, UserId, ORDERS,
};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Customer,
    Admin,
}

/// Who is signed in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub user_id: UserId,
    pub role: Role,
}

impl Identity {
    pub fn customer(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            role: Role::Customer,
        }
    }

    pub fn admin(user_id: impl Into<UserId>) -> Self {
        Self {
            user_id: user_id.into(),
            role: Role::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Subscriptions this identity needs.
    fn targets(&self) -> Vec<(CacheSlot, SubscriptionTarget)> {
        let mut targets = vec![
            (
                CacheSlot::Cart,
                SubscriptionTarget::document(DocPath::cart(&self.user_id)),
            ),
            (
                CacheSlot::UserOrders,
                SubscriptionTarget::query(
                    Query::collection(ORDERS)
                        .where_eq("userId", self.user_id.clone())
                        .order_by("createdAt", true),
                ),
            ),
            (
                CacheSlot::PaymentMethods,
                SubscriptionTarget::document(DocPath::payment_methods()),
            ),
        ];
        if self.is_admin() {
            targets.push((CacheSlot::AllOrders, all_orders_target()));
        }
        targets
    }

    fn order_slot(&self) -> CacheSlot {
        if self.is_admin() {
            CacheSlot::AllOrders
        } else {
            CacheSlot::UserOrders
        }
    }
}

fn all_orders_target() -> SubscriptionTarget {
    SubscriptionTarget::query(Query::collection(ORDERS).order_by("createdAt", true))
}

fn cart_mutation<F>(change: F) -> Mutation<CartState>
where
    F: Fn(&mut CartState) -> EngineResult<()> + Send + Sync + 'static,
{
    Arc::new(move |cart: &CartState| -> EngineResult<CartState> {
        let mut next = cart.clone();
        change(&mut next)?;
        Ok(next)
    })
}

/// Services of the active user session.
pub struct Session {
    store: Arc<dyn RemoteStore>,
    state: SharedState,
    subscriptions: SubscriptionManager,
    queue: MutationQueue,
    resolver: Arc<PaymentMethodResolver>,
    identity: Mutex<Option<Identity>>,
    applier: JoinHandle<()>,
}

impl Session {
    /// Sign in and open the subscriptions of `identity`.
    ///
    /// A subscription that cannot be opened is recorded as the slot's error
    /// and can be retried with [`Session::resubscribe`].
    pub async fn start(
        store: Arc<dyn RemoteStore>,
        config: &SyncConfig,
        identity: Identity,
    ) -> Self {
        let state = SharedState::new(SyncState::new(identity.user_id.clone()));
        let (sink, updates) = mpsc::unbounded_channel();

        let resolver = Arc::new(PaymentMethodResolver::new(
            Arc::clone(&store),
            config.required_methods(),
        ));
        let enricher =
            NameEnricher::new(Arc::clone(&store), state.clone(), config.enrich_concurrency);
        let applier = tokio::spawn(apply_updates(
            updates,
            state.clone(),
            Arc::clone(&resolver),
            enricher,
        ));

        let session = Self {
            subscriptions: SubscriptionManager::new(Arc::clone(&store), sink),
            queue: MutationQueue::new(Arc::clone(&store), state.clone()),
            store,
            state,
            resolver,
            identity: Mutex::new(None),
            applier,
        };

        let epoch = session.state.lock().await.cache.epoch();
        tracing::info!(user_id = %identity.user_id, role = ?identity.role, "session started");
        session.open(&identity, epoch).await;
        *session.identity.lock().await = Some(identity);
        session
    }

    async fn open(&self, identity: &Identity, epoch: Generation) {
        for (slot, target) in identity.targets() {
            self.open_slot(slot, target, epoch).await;
        }
    }

    async fn open_slot(&self, slot: CacheSlot, target: SubscriptionTarget, epoch: Generation) {
        match self.subscriptions.subscribe(slot, target, epoch).await {
            Ok(_) => {
                self.state.lock().await.errors.remove(&slot);
            }
            Err(e) => {
                tracing::warn!(slot = %slot, error = %e, "could not open subscription");
                self.state.lock().await.errors.insert(slot, e);
            }
        }
        self.state.notify();
    }

    /// Switch to another identity, or sign in again after a logout.
    ///
    /// A different user gets a fresh cache and new subscriptions. A role
    /// change for the same user only opens or closes the all-orders feed.
    pub async fn switch_identity(&self, next: Identity) {
        let mut identity = self.identity.lock().await;

        let same_user = identity
            .as_ref()
            .is_some_and(|current| current.user_id == next.user_id);
        if same_user {
            let epoch = self.state.lock().await.cache.epoch();
            if next.is_admin() {
                self.open_slot(CacheSlot::AllOrders, all_orders_target(), epoch).await;
            } else if self.subscriptions.unsubscribe(CacheSlot::AllOrders).await {
                let mut state = self.state.lock().await;
                if let Some(table) = state.cache.orders_mut(CacheSlot::AllOrders) {
                    table.clear();
                }
                state.errors.remove(&CacheSlot::AllOrders);
                drop(state);
                self.state.notify();
            }
            tracing::info!(user_id = %next.user_id, role = ?next.role, "role changed");
        } else {
            let epoch = self.teardown(next.user_id.clone()).await;
            tracing::info!(user_id = %next.user_id, role = ?next.role, epoch = %epoch, "identity changed");
            self.open(&next, epoch).await;
        }
        *identity = Some(next);
    }

    /// Close every subscription and drop all cached state.
    ///
    /// Writes still in flight complete remotely but their results are
    /// discarded. Further operations fail with [`SyncError::SessionClosed`]
    /// until [`Session::switch_identity`] signs someone in.
    pub async fn logout(&self) {
        let mut identity = self.identity.lock().await;
        if identity.is_none() {
            return;
        }
        let epoch = self.teardown(UserId::new()).await;
        *identity = None;
        tracing::info!(epoch = %epoch, "session torn down");
    }

    async fn teardown(&self, owner: UserId) -> Generation {
        self.subscriptions.unsubscribe_all().await;
        let epoch = {
            let mut state = self.state.lock().await;
            state.errors.clear();
            state.cache.teardown(owner)
        };
        self.state.notify();
        epoch
    }

    /// Reopen subscriptions that failed or were never opened.
    pub async fn resubscribe(&self) -> Result<()> {
        let identity = self.identity().await?;
        let epoch = self.state.lock().await.cache.epoch();
        self.open(&identity, epoch).await;
        Ok(())
    }

    pub async fn identity(&self) -> Result<Identity> {
        self.identity
            .lock()
            .await
            .clone()
            .ok_or(SyncError::SessionClosed)
    }

    async fn require_admin(&self) -> Result<Identity> {
        let identity = self.identity().await?;
        if !identity.is_admin() {
            return Err(SyncError::Policy(Error::PolicyViolation(
                "only administrators can perform this action".into(),
            )));
        }
        Ok(identity)
    }

    // Cart

    pub async fn add_to_cart(&self, product: ProductRecord, quantity: u32) -> Result<CartState> {
        self.identity().await?;
        self.queue
            .enqueue(cart_mutation(move |cart| cart.add_product(&product, quantity)))
            .await
    }

    /// Set a line's quantity; zero removes the line.
    pub async fn set_quantity(&self, product_id: &str, quantity: u32) -> Result<CartState> {
        self.identity().await?;
        let product_id = product_id.to_string();
        self.queue
            .enqueue(cart_mutation(move |cart| cart.set_quantity(&product_id, quantity)))
            .await
    }

    /// Change a line's quantity by `delta`, computed against the latest cart.
    pub async fn adjust_quantity(&self, product_id: &str, delta: i64) -> Result<CartState> {
        self.identity().await?;
        let product_id = product_id.to_string();
        self.queue
            .enqueue(cart_mutation(move |cart| cart.adjust_quantity(&product_id, delta)))
            .await
    }

    pub async fn remove_from_cart(&self, product_id: &str) -> Result<CartState> {
        self.identity().await?;
        let product_id = product_id.to_string();
        self.queue
            .enqueue(cart_mutation(move |cart| cart.remove_line(&product_id).map(|_| ())))
            .await
    }

    pub async fn clear_cart(&self) -> Result<CartState> {
        self.identity().await?;
        self.queue
            .enqueue(cart_mutation(|cart| {
                cart.clear();
                Ok(())
            }))
            .await
    }

    pub async fn cart(&self) -> CartState {
        self.state.lock().await.cache.cart()
    }

    // Checkout and orders

    /// Place an order from the current cart and take the ordered lines out
    /// of the cart.
    ///
    /// The order is written first. Lines added while it is in flight stay in
    /// the cart. If updating the cart fails the order still stands and is
    /// returned.
    pub async fn checkout(
        &self,
        customer: CustomerInfo,
        payment_method_id: &str,
    ) -> Result<OrderRecord> {
        self.identity().await?;
        let (cart, methods, epoch) = {
            let state = self.state.lock().await;
            (
                state.cache.cart(),
                state.cache.payment_methods(),
                state.cache.epoch(),
            )
        };
        let methods = match methods {
            Some(methods) => methods,
            None => self.resolver.load().await?.config,
        };
        let method = methods
            .get(payment_method_id)
            .ok_or_else(|| Error::UnknownPaymentMethod(payment_method_id.to_string()))?;

        let order_id: OrderId = uuid::Uuid::new_v4().to_string();
        let order = OrderRecord::from_cart(order_id, &cart, customer, method, crate::now_millis())?;
        self.store
            .set(&DocPath::order(order.id.clone()), order.to_value())
            .await?;
        tracing::info!(order_id = %order.id, total = order.total_amount, "order placed");

        if self.state.lock().await.cache.epoch() != epoch {
            tracing::debug!(order_id = %order.id, "session changed during checkout; cart left as is");
            return Ok(order);
        }
        let ordered = cart.items().to_vec();
        let taken = self
            .queue
            .enqueue(cart_mutation(move |cart| {
                cart.subtract(&ordered);
                Ok(())
            }))
            .await;
        if let Err(e) = taken {
            tracing::warn!(order_id = %order.id, error = %e, "order placed but cart was not updated");
        }
        Ok(order)
    }

    /// Move an order to a new status. Admin only.
    ///
    /// The change is shown immediately and undone if the write fails.
    /// Updates of one order are written one at a time.
    pub async fn update_order_status(&self, order_id: &str, status: OrderStatus) -> Result<()> {
        self.require_admin().await?;
        let path = DocPath::order(order_id);
        self.queue
            .serialize(&path, self.write_status(&path, order_id, status))
            .await
    }

    async fn write_status(
        &self,
        path: &DocPath,
        order_id: &str,
        status: OrderStatus,
    ) -> Result<()> {
        let now = crate::now_millis();
        let (epoch, previous) = {
            let mut state = self.state.lock().await;
            let epoch = state.cache.epoch();
            let mut previous = Vec::new();
            for slot in [CacheSlot::AllOrders, CacheSlot::UserOrders] {
                let Some(table) = state.cache.orders_mut(slot) else {
                    continue;
                };
                if table.contains(order_id) {
                    previous.push((slot, table.set_status(order_id, status, now)?));
                }
            }
            if previous.is_empty() {
                return Err(Error::OrderNotFound(order_id.to_string()).into());
            }
            (epoch, previous)
        };
        self.state.notify();

        let fields = json!({"status": status, "updatedAt": now});
        if let Err(e) = self.store.update(path, fields).await {
            let mut state = self.state.lock().await;
            if state.cache.epoch() == epoch {
                for (slot, before) in previous {
                    if let Some(table) = state.cache.orders_mut(slot) {
                        table.restore_status(order_id, status, before);
                    }
                }
            }
            drop(state);
            self.state.notify();
            tracing::warn!(order_id = %order_id, error = %e, "status update failed; reverted");
            return Err(e.into());
        }

        tracing::info!(order_id = %order_id, status = %status, "order status updated");
        Ok(())
    }

    /// Orders of the signed-in user, most recent first.
    pub async fn orders(&self) -> Vec<OrderRecord> {
        let now = crate::now_millis();
        self.state.lock().await.cache.user_orders().sorted(now)
    }

    /// Every order, most recent first. Empty for customers.
    pub async fn all_orders(&self) -> Vec<OrderRecord> {
        let now = crate::now_millis();
        self.state.lock().await.cache.all_orders().sorted(now)
    }

    /// Orders with a status, from the all-orders feed for admins and the
    /// user's own orders otherwise.
    pub async fn orders_with_status(&self, status: OrderStatus) -> Result<Vec<OrderRecord>> {
        let slot = self.identity().await?.order_slot();
        let now = crate::now_millis();
        let state = self.state.lock().await;
        Ok(state
            .cache
            .orders(slot)
            .map(|table| table.with_status(status, now))
            .unwrap_or_default())
    }

    /// Statistics over the orders visible to the signed-in identity.
    pub async fn stats(&self) -> Result<OrderStats> {
        let slot = self.identity().await?.order_slot();
        let state = self.state.lock().await;
        Ok(state
            .cache
            .orders(slot)
            .map(|table| aggregate(table.iter()))
            .unwrap_or_else(|| aggregate([])))
    }

    // Payment methods

    /// Effective payment configuration, once loaded.
    pub async fn payment_methods(&self) -> Option<PaymentMethodConfig> {
        self.state.lock().await.cache.payment_methods()
    }

    /// Enable or disable a payment method. Admin only.
    ///
    /// Disabling the last enabled method is rejected without a write.
    pub async fn toggle_payment_method(
        &self,
        method_id: &str,
        enabled: bool,
    ) -> Result<PaymentMethodConfig> {
        self.require_admin().await?;
        let method_id = method_id.to_string();
        let toggle: Mutation<PaymentMethodConfig> = Arc::new(
            move |config: &PaymentMethodConfig| -> EngineResult<PaymentMethodConfig> {
                let mut next = config.clone();
                next.set_enabled(&method_id, enabled)?;
                Ok(next)
            },
        );
        self.queue.enqueue(toggle).await
    }

    // Observation

    /// Last listener failure of a slot.
    pub async fn subscription_error(&self, slot: CacheSlot) -> Option<StoreError> {
        self.state.lock().await.errors.get(&slot).cloned()
    }

    pub fn is_subscribed(&self, slot: CacheSlot) -> bool {
        self.subscriptions.is_active(slot)
    }

    /// Wait until `predicate` holds for the session state.
    pub async fn wait_until<F>(&self, predicate: F)
    where
        F: FnMut(&SyncState) -> bool,
    {
        self.state.wait_until(predicate).await
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Close every subscription and stop the applier.
    pub async fn shutdown(self) {
        self.subscriptions.unsubscribe_all().await;
        self.applier.abort();
        tracing::info!("session closed");
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.applier.abort();
    }
}

/// Apply subscription updates to the cache, one at a time.
async fn apply_updates(
    mut updates: mpsc::UnboundedReceiver<SlotUpdate>,
    state: SharedState,
    resolver: Arc<PaymentMethodResolver>,
    enricher: NameEnricher,
) {
    while let Some(update) = updates.recv().await {
        let SlotUpdate {
            slot,
            epoch,
            payload,
        } = update;
        let mut guard = state.lock().await;
        if guard.cache.epoch() != epoch {
            tracing::debug!(slot = %slot, epoch = %epoch, "update from a previous session dropped");
            continue;
        }

        match payload {
            SlotPayload::Error(error) => {
                guard.errors.insert(slot, error);
            }
            SlotPayload::Change(event) if slot == CacheSlot::PaymentMethods => {
                match payment_config_from_event(&event) {
                    Ok(remote) => {
                        let resolution = resolver.resolve(remote);
                        guard.cache.confirm_payment_methods(resolution.config.clone());
                        resolver.heal(&resolution);
                    }
                    Err(e) => {
                        tracing::warn!(slot = %slot, error = %e, "unreadable payment configuration ignored")
                    }
                }
            }
            SlotPayload::Change(event) => {
                let result = guard.cache.apply(slot, &event);
                for skipped in &result.skipped {
                    tracing::warn!(slot = %slot, error = %skipped, "document skipped");
                }
                tracing::debug!(
                    slot = %slot,
                    kind = ?event.kind(),
                    applied = result.applied,
                    "change applied"
                );

                let unnamed: Vec<(OrderId, UnnamedItems)> = match guard.cache.orders(slot) {
                    Some(table) => result
                        .touched
                        .iter()
                        .filter_map(|id| table.get(id))
                        .map(|order| (order.id.clone(), order.unnamed_items()))
                        .filter(|(_, items)| !items.is_empty())
                        .collect(),
                    None => Vec::new(),
                };
                if !unnamed.is_empty() {
                    enricher.dispatch(slot, epoch, unnamed);
                }
            }
        }

        drop(guard);
        state.notify();
    }
}
