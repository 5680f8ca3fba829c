//! # Shopfront Sync
//!
//! Async runtime around `shopfront-engine`: the remote document store
//! contract, live subscriptions into the local cache, per-key optimistic
//! writes, payment-method self-healing and reconciliation runs.
//!
//! ## Components
//!
//! - [`remote::RemoteStore`]: get/set/update/delete, atomic batches, queries
//!   and subscriptions. [`remote::MemoryStore`] implements it in process.
//! - [`SubscriptionManager`]: one subscription per cache slot, normalized into
//!   change events.
//! - [`MutationQueue`]: optimistic writes, at most one in flight per document.
//! - [`PaymentMethodResolver`]: required methods merged in and written back.
//! - [`ReconciliationEngine`]: Verify, Migrate and Cleanup against the store.
//! - [`Session`]: ties the above to a signed-in identity.
//!
//! ## Example
//!
//! ```rust,no_run
//! use shopfront_sync::{remote::MemoryStore, Identity, Session, SyncConfig};
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), shopfront_sync::SyncError> {
//! let store = Arc::new(MemoryStore::new());
//! let session = Session::start(store, &SyncConfig::default(), Identity::customer("u-1")).await;
//!
//! let cart = session.clear_cart().await?;
//! assert!(cart.is_empty());
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod enrich;
pub mod error;
pub mod mutation;
pub mod payment;
pub mod reconcile;
pub mod remote;
pub mod session;
pub mod state;
pub mod subscription;

pub use config::{ConfigError, Mode, RunOptions, SyncConfig};
pub use enrich::NameEnricher;
pub use error::{Result, StoreError, SyncError};
pub use mutation::MutationQueue;
pub use payment::PaymentMethodResolver;
pub use reconcile::{CleanupConfirmation, ReconciliationEngine};
pub use session::{Identity, Role, Session};
pub use state::{SharedState, SyncState};
pub use subscription::{diff_snapshot, SlotPayload, SlotUpdate, SubscriptionManager};

use shopfront_engine::Timestamp;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> Timestamp {
    Timestamp::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or(0)
}
