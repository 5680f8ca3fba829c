//! Payment-method resolution against the remote configuration.

use crate::error::Result;
use crate::remote::RemoteStore;
use shopfront_engine::{resolve, DocPath, PaymentMethod, PaymentMethodConfig, Resolution};
use std::sync::Arc;
use tokio::task::JoinHandle;

/// Merges the remote payment configuration with the required methods and
/// writes repairs back.
pub struct PaymentMethodResolver {
    store: Arc<dyn RemoteStore>,
    required: Vec<PaymentMethod>,
}

impl PaymentMethodResolver {
    pub fn new(store: Arc<dyn RemoteStore>, required: Vec<PaymentMethod>) -> Self {
        Self { store, required }
    }

    pub fn required(&self) -> &[PaymentMethod] {
        &self.required
    }

    /// Effective configuration for a remote one (`None` if it does not exist).
    pub fn resolve(&self, remote: Option<PaymentMethodConfig>) -> Resolution {
        let resolution = resolve(remote, &self.required);
        if resolution.needs_write() {
            tracing::info!(
                action = ?resolution.action,
                injected = ?resolution.injected,
                reenabled = ?resolution.reenabled,
                "payment configuration repaired"
            );
        }
        resolution
    }

    /// Persist a repaired configuration in the background.
    ///
    /// Failures are logged and not retried; the next resolution repairs the
    /// configuration again. Returns `None` when nothing needs writing.
    pub fn heal(&self, resolution: &Resolution) -> Option<JoinHandle<()>> {
        if !resolution.needs_write() {
            return None;
        }
        let store = Arc::clone(&self.store);
        let value = resolution.config.to_value();
        Some(tokio::spawn(async move {
            let path = DocPath::payment_methods();
            match store.set(&path, value).await {
                Ok(()) => tracing::debug!(path = %path, "payment configuration written back"),
                Err(e) => {
                    tracing::warn!(path = %path, error = %e, "failed to write back payment configuration")
                }
            }
        }))
    }

    /// Read the remote configuration, resolve it and heal it if needed.
    pub async fn load(&self) -> Result<Resolution> {
        let document = self.store.get(&DocPath::payment_methods()).await?;
        let remote = document
            .as_ref()
            .map(PaymentMethodConfig::from_document)
            .transpose()?;
        let resolution = self.resolve(remote);
        self.heal(&resolution);
        Ok(resolution)
    }
}
