//! Payment-method configuration.
//!
//! The configuration is a single remote document keyed by method id. Two
//! rules hold for every configuration handed out by [`resolve`] or accepted by
//! [`PaymentMethodConfig::set_enabled`]:
//!
//! - at least one method is enabled;
//! - every required baseline method is present.

use crate::{error::Result, Document, Error};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;

/// Id of the cash-on-delivery method, the default baseline.
pub const CASH_ON_DELIVERY: &str = "cod";

/// A payment method descriptor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentMethod {
    /// Map key in the configuration document
    #[serde(skip)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_details: Option<Value>,
}

impl PaymentMethod {
    pub fn new(id: impl Into<String>, name: impl Into<String>, enabled: bool) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            enabled,
            account_details: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Descriptor of a built-in method, if `id` names one.
pub fn builtin_method(id: &str) -> Option<PaymentMethod> {
    let method = match id {
        CASH_ON_DELIVERY => PaymentMethod::new(CASH_ON_DELIVERY, "Cash on Delivery", true)
            .with_description("Pay in cash when your order arrives"),
        "gcash" => PaymentMethod::new("gcash", "GCash", false)
            .with_description("Send payment to our GCash account"),
        "paypal" => PaymentMethod::new("paypal", "PayPal", true)
            .with_description("Pay with your PayPal account"),
        "bank_transfer" => PaymentMethod::new("bank_transfer", "Bank Transfer", false)
            .with_description("Transfer to our bank account"),
        _ => return None,
    };
    Some(method)
}

/// The configuration written when no remote configuration exists at all.
pub fn default_methods() -> Vec<PaymentMethod> {
    [CASH_ON_DELIVERY, "gcash"]
        .iter()
        .filter_map(|id| builtin_method(id))
        .collect()
}

/// Keyed set of payment methods.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PaymentMethodConfig {
    methods: BTreeMap<String, PaymentMethod>,
}

impl Serialize for PaymentMethodConfig {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.methods.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PaymentMethodConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let mut methods = BTreeMap::<String, PaymentMethod>::deserialize(deserializer)?;
        for (id, method) in methods.iter_mut() {
            method.id = id.clone();
        }
        Ok(Self { methods })
    }
}

impl PaymentMethodConfig {
    pub fn new(methods: impl IntoIterator<Item = PaymentMethod>) -> Self {
        Self {
            methods: methods.into_iter().map(|m| (m.id.clone(), m)).collect(),
        }
    }

    pub fn from_document(doc: &Document) -> Result<Self> {
        doc.parse()
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    pub fn get(&self, id: &str) -> Option<&PaymentMethod> {
        self.methods.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.methods.contains_key(id)
    }

    /// All methods ordered by id.
    pub fn methods(&self) -> impl Iterator<Item = &PaymentMethod> {
        self.methods.values()
    }

    /// Methods a customer can choose at checkout.
    pub fn enabled(&self) -> impl Iterator<Item = &PaymentMethod> {
        self.methods.values().filter(|m| m.enabled)
    }

    pub fn enabled_count(&self) -> usize {
        self.enabled().count()
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }

    /// Check the at-least-one-enabled rule.
    pub fn validate(&self) -> Result<()> {
        if self.enabled_count() == 0 {
            return Err(Error::PolicyViolation(
                "at least one payment method must stay enabled".into(),
            ));
        }
        Ok(())
    }

    /// Enable or disable a method.
    ///
    /// Disabling the last enabled method is rejected and leaves the
    /// configuration unchanged.
    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> Result<()> {
        let method = self
            .methods
            .get(id)
            .ok_or_else(|| Error::UnknownPaymentMethod(id.to_string()))?;
        if method.enabled == enabled {
            return Ok(());
        }
        if !enabled && self.enabled_count() <= 1 {
            return Err(Error::PolicyViolation(format!(
                "cannot disable '{id}': at least one payment method must stay enabled"
            )));
        }
        if let Some(method) = self.methods.get_mut(id) {
            method.enabled = enabled;
        }
        Ok(())
    }

    /// Replace a method's account details.
    pub fn set_account_details(&mut self, id: &str, details: Option<Value>) -> Result<()> {
        let method = self
            .methods
            .get_mut(id)
            .ok_or_else(|| Error::UnknownPaymentMethod(id.to_string()))?;
        method.account_details = details;
        Ok(())
    }

    fn insert(&mut self, method: PaymentMethod) {
        self.methods.insert(method.id.clone(), method);
    }
}

/// What the resolver had to do to produce an effective configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolveAction {
    /// Remote configuration was usable as is.
    None,
    /// No remote configuration existed; defaults must be written.
    Create,
    /// Remote configuration was repaired; the merged set must be written back.
    Merge,
}

/// Effective configuration plus the write-back it requires.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub config: PaymentMethodConfig,
    pub action: ResolveAction,
    /// Required methods appended to the remote configuration
    pub injected: Vec<String>,
    /// Method enabled to restore the at-least-one-enabled rule
    pub reenabled: Option<String>,
}

impl Resolution {
    /// Whether the effective configuration differs from the remote one.
    pub fn needs_write(&self) -> bool {
        self.action != ResolveAction::None
    }
}

/// Merge a remote configuration with the required baseline methods.
///
/// - No remote configuration: defaults plus required methods, to be created.
/// - Remote configuration missing a required id: the built-in descriptor is
///   appended and the merged set must be written back.
/// - No enabled method left: the first required method (else
///   cash-on-delivery) is enabled.
pub fn resolve(remote: Option<PaymentMethodConfig>, required: &[PaymentMethod]) -> Resolution {
    let (mut config, mut action) = match remote {
        Some(config) => (config, ResolveAction::None),
        None => (
            PaymentMethodConfig::new(default_methods()),
            ResolveAction::Create,
        ),
    };

    let mut injected = Vec::new();
    for method in required {
        if !config.contains(&method.id) {
            config.insert(method.clone());
            injected.push(method.id.clone());
        }
    }
    if !injected.is_empty() && action == ResolveAction::None {
        action = ResolveAction::Merge;
    }

    let mut reenabled = None;
    if config.enabled_count() == 0 {
        let fallback = required
            .first()
            .cloned()
            .or_else(|| builtin_method(CASH_ON_DELIVERY));
        if let Some(mut method) = fallback {
            if let Some(existing) = config.get(&method.id) {
                method = existing.clone();
            }
            method.enabled = true;
            reenabled = Some(method.id.clone());
            config.insert(method);
            if action == ResolveAction::None {
                action = ResolveAction::Merge;
            }
        }
    }

    Resolution {
        config,
        action,
        injected,
        reenabled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DocPath;
    use serde_json::json;

    fn config(value: Value) -> PaymentMethodConfig {
        let doc = Document::new(DocPath::payment_methods(), value);
        PaymentMethodConfig::from_document(&doc).unwrap()
    }

    #[test]
    fn parse_fills_ids() {
        let cfg = config(json!({
            "cod": {"enabled": true, "name": "Cash on Delivery"},
            "gcash": {"enabled": false, "name": "GCash", "accountDetails": {"number": "0917"}}
        }));
        assert_eq!(cfg.len(), 2);
        assert_eq!(cfg.get("gcash").unwrap().id, "gcash");
        assert_eq!(
            cfg.get("gcash").unwrap().account_details,
            Some(json!({"number": "0917"}))
        );
        assert_eq!(cfg.enabled_count(), 1);
    }

    #[test]
    fn serializes_as_keyed_map() {
        let cfg = PaymentMethodConfig::new([PaymentMethod::new("cod", "Cash", true)]);
        assert_eq!(
            cfg.to_value(),
            json!({"cod": {"name": "Cash", "description": "", "enabled": true}})
        );
    }

    #[test]
    fn cannot_disable_last_enabled() {
        let mut cfg = config(json!({
            "cod": {"enabled": true},
            "gcash": {"enabled": false}
        }));
        let before = cfg.clone();
        let err = cfg.set_enabled("cod", false).unwrap_err();
        assert!(matches!(err, Error::PolicyViolation(_)));
        assert_eq!(cfg, before);

        cfg.set_enabled("gcash", true).unwrap();
        cfg.set_enabled("cod", false).unwrap();
        assert_eq!(cfg.enabled_count(), 1);
        assert!(cfg.get("gcash").unwrap().enabled);
    }

    #[test]
    fn unknown_method_rejected() {
        let mut cfg = config(json!({"cod": {"enabled": true}}));
        assert_eq!(
            cfg.set_enabled("crypto", true).unwrap_err(),
            Error::UnknownPaymentMethod("crypto".into())
        );
    }

    #[test]
    fn resolve_absent_creates_defaults() {
        let required = vec![builtin_method("cod").unwrap()];
        let resolution = resolve(None, &required);
        assert_eq!(resolution.action, ResolveAction::Create);
        assert!(resolution.config.contains("cod"));
        assert!(resolution.config.contains("gcash"));
        assert!(resolution.config.validate().is_ok());
    }

    #[test]
    fn resolve_appends_missing_required() {
        let remote = config(json!({
            "cod": {"enabled": true},
            "gcash": {"enabled": false}
        }));
        let required = vec![builtin_method("paypal").unwrap()];
        let resolution = resolve(Some(remote), &required);

        assert_eq!(resolution.action, ResolveAction::Merge);
        assert_eq!(resolution.injected, vec!["paypal".to_string()]);
        let paypal = resolution.config.get("paypal").unwrap();
        assert!(paypal.enabled);
        assert_eq!(paypal.name, "PayPal");
        assert!(resolution.config.get("cod").unwrap().enabled);
        assert!(!resolution.config.get("gcash").unwrap().enabled);
    }

    #[test]
    fn resolve_complete_config_is_untouched() {
        let remote = config(json!({"cod": {"enabled": true, "name": "COD"}}));
        let required = vec![builtin_method("cod").unwrap()];
        let resolution = resolve(Some(remote.clone()), &required);
        assert!(!resolution.needs_write());
        assert_eq!(resolution.config, remote);
    }

    #[test]
    fn resolve_reenables_when_nothing_enabled() {
        let remote = config(json!({
            "cod": {"enabled": false, "name": "COD"},
            "gcash": {"enabled": false}
        }));
        let required = vec![builtin_method("cod").unwrap()];
        let resolution = resolve(Some(remote), &required);
        assert_eq!(resolution.action, ResolveAction::Merge);
        assert_eq!(resolution.reenabled.as_deref(), Some("cod"));
        // the remote descriptor is kept, only the flag changes
        assert_eq!(resolution.config.get("cod").unwrap().name, "COD");
        assert!(resolution.config.validate().is_ok());
    }

    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        fn arb_toggle() -> impl Strategy<Value = (usize, bool)> {
            (0usize..4, any::<bool>())
        }

        proptest! {
            #[test]
            fn prop_toggles_keep_one_enabled(toggles in prop::collection::vec(arb_toggle(), 0..40)) {
                let ids = ["cod", "gcash", "paypal", "bank_transfer"];
                let mut cfg = resolve(None, &[builtin_method("paypal").unwrap()]).config;
                if !cfg.contains("bank_transfer") {
                    cfg.insert(builtin_method("bank_transfer").unwrap());
                }

                for (index, enabled) in toggles {
                    let before = cfg.clone();
                    match cfg.set_enabled(ids[index], enabled) {
                        Ok(()) => prop_assert!(cfg.enabled_count() >= 1),
                        Err(Error::PolicyViolation(_)) => prop_assert_eq!(&cfg, &before),
                        Err(other) => prop_assert!(false, "unexpected error: {}", other),
                    }
                    prop_assert!(cfg.validate().is_ok());
                }
            }
        }
    }
}
