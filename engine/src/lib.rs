//! # Shopfront Engine
//!
//! Deterministic core of the Shopfront client's state synchronization and
//! data reconciliation.
//!
//! This crate holds the pure logic: data model, the local cache with its
//! optimistic overlay, payment-method rules, order reconciliation planning and
//! statistics. Same inputs always produce the same outputs; nothing here does
//! IO or keeps time.
//!
//! ## Design Principles
//!
//! - **No IO**: the remote store, subscriptions and clocks live in the
//!   `shopfront-sync` crate
//! - **Typed edges**: remote documents are JSON and parsed into typed models
//!   once, at the boundary
//! - **Never coerce**: legacy item shapes go through an explicit extraction
//!   chain ([`extract_product_ref`]) that yields `Resolved` or `Unresolved`
//!
//! ## Core Concepts
//!
//! ### Documents and writes
//!
//! A [`Document`] is a [`DocPath`] plus a JSON body. Every write is a
//! [`WriteOp`]: `Set`, `Update` (shallow merge) or `Delete`.
//!
//! ### Local cache
//!
//! [`LocalCache`] mirrors the signed-in user's cart, orders, the admin order
//! list and the payment configuration. Optimistic writes live in a
//! [`Layered`] overlay over confirmed state; confirmed always wins, and
//! [`Generation`] counters discard stale acknowledgements.
//!
//! ### Reconciliation
//!
//! [`verify`], [`plan_migration`] and [`plan_cleanup`] classify orders against
//! the product set and plan the writes for each mode. Orders with malformed
//! items are [`OrderClass::Anomalous`] and never planned for deletion.
//!
//! ## Quick Start
//!
//! ```rust
//! use shopfront_engine::{plan_cleanup, verify, DatasetSnapshot, DocPath, Document};
//! use serde_json::json;
//!
//! let snapshot = DatasetSnapshot::from_documents([
//!     Document::new(DocPath::product("p-1"), json!({"name": "Soap", "price": 2.0})),
//!     Document::new(DocPath::order("o-1"), json!({"items": [{"productId": "p-1"}]})),
//!     Document::new(DocPath::order("o-2"), json!({"items": [{"productId": "p-9"}]})),
//! ]);
//!
//! let verification = verify(&snapshot);
//! assert_eq!(verification.missing.len(), 1);
//!
//! let deletes = plan_cleanup(&verification);
//! assert_eq!(deletes.len(), 1);
//! assert_eq!(deletes[0].path(), &DocPath::order("o-2"));
//! ```

pub mod cache;
pub mod cart;
pub mod document;
pub mod error;
pub mod generation;
pub mod operation;
pub mod order;
pub mod overlay;
pub mod payment;
pub mod product;
pub mod reconcile;
pub mod reference;
pub mod snapshot;
pub mod stats;

// Re-export main types at crate root
pub use cache::{
    sort_recent_first, ApplyResult, CacheSlot, CachedEntity, ChangeEvent, ChangeKind, LocalCache,
    OrderTable,
};
pub use cart::{CartLine, CartState};
pub use document::{
    merge_fields, parse_timestamp, DocPath, Document, CARTS, ORDERS, PAYMENT_METHODS_DOC,
    PRODUCTS, SETTINGS,
};
pub use error::Error;
pub use generation::{Generation, GenerationCounter};
pub use operation::WriteOp;
pub use order::{CustomerInfo, OrderRecord, OrderStatus};
pub use overlay::{Layered, Mutation, Versioned};
pub use payment::{
    builtin_method, default_methods, resolve, PaymentMethod, PaymentMethodConfig, ResolveAction,
    Resolution, CASH_ON_DELIVERY,
};
pub use product::{ProductRecord, PLACEHOLDER_CATEGORY, PLACEHOLDER_PRICE, PLACEHOLDER_STOCK};
pub use reconcile::{
    classify_order, normalize_item, plan_cleanup, plan_migration, verify, verify_orders,
    IntegrityAnomaly, MigrationPlan, OrderClass, OrderRewrite, OrderScan,
    PartialReferenceFailure, ProductIndex, ReconcileMode, ReconciliationReport, Verification,
};
pub use reference::{extract_product_ref, ProductRef, RefField};
pub use snapshot::{DatasetSnapshot, SNAPSHOT_FORMAT_VERSION};
pub use stats::{aggregate, OrderStats};

/// Type aliases for clarity
pub type DocumentId = String;
pub type CollectionName = String;
pub type UserId = String;
pub type ProductId = String;
pub type OrderId = String;
/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;
