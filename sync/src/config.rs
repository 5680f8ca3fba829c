//! Configuration loaded from environment variables.

use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser, ValueEnum};
use shopfront_engine::{builtin_method, PaymentMethod, ReconcileMode, CASH_ON_DELIVERY};
use std::env;
use std::path::PathBuf;

const RECONCILE_CONCURRENCY: &str = "RECONCILE_CONCURRENCY";
const ENRICH_CONCURRENCY: &str = "ENRICH_CONCURRENCY";
const PAYMENT_REQUIRED_METHODS: &str = "PAYMENT_REQUIRED_METHODS";
const SHOPFRONT_DATA: &str = "SHOPFRONT_DATA";
const RECONCILE_CONFIRM: &str = "RECONCILE_CONFIRM";

/// Sync layer configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncConfig {
    /// Bounded fan-out of reconciliation product lookups and writes
    pub reconcile_concurrency: usize,
    /// Orders whose item names are resolved concurrently
    pub enrich_concurrency: usize,
    /// Ids of payment methods that must always be configured
    pub required_payment_methods: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            reconcile_concurrency: 8,
            enrich_concurrency: 4,
            required_payment_methods: vec![CASH_ON_DELIVERY.to_string()],
        }
    }
}

impl SyncConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Load configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let reconcile_concurrency =
            concurrency(&lookup, RECONCILE_CONCURRENCY, defaults.reconcile_concurrency)?;
        let enrich_concurrency =
            concurrency(&lookup, ENRICH_CONCURRENCY, defaults.enrich_concurrency)?;

        let required_payment_methods = match lookup(PAYMENT_REQUIRED_METHODS) {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .collect(),
            None => defaults.required_payment_methods,
        };

        Ok(Self {
            reconcile_concurrency,
            enrich_concurrency,
            required_payment_methods,
        })
    }

    /// Descriptors of the required methods.
    ///
    /// Ids without a built-in descriptor get an enabled method named after
    /// the id.
    pub fn required_methods(&self) -> Vec<PaymentMethod> {
        self.required_payment_methods
            .iter()
            .map(|id| {
                builtin_method(id)
                    .unwrap_or_else(|| PaymentMethod::new(id.as_str(), id.as_str(), true))
            })
            .collect()
    }
}

fn concurrency(
    lookup: &impl Fn(&str) -> Option<String>,
    var: &'static str,
    default: usize,
) -> Result<usize, ConfigError> {
    let Some(raw) = lookup(var) else {
        return Ok(default);
    };
    let value: usize = raw
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidNumber { var })?;
    if value == 0 {
        return Err(ConfigError::ZeroConcurrency { var });
    }
    Ok(value)
}

/// Mode argument of `shopfront-reconcile`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Report invalid orders without writing
    Verify,
    /// Recreate missing products and rewrite item references
    Migrate,
    /// Delete orders that reference missing products
    Cleanup,
}

impl From<Mode> for ReconcileMode {
    fn from(mode: Mode) -> Self {
        match mode {
            Mode::Verify => ReconcileMode::Verify,
            Mode::Migrate => ReconcileMode::Migrate,
            Mode::Cleanup => ReconcileMode::Cleanup,
        }
    }
}

/// Options of one `shopfront-reconcile` run.
#[derive(Debug, Clone, PartialEq, Parser)]
#[command(name = "shopfront-reconcile")]
#[command(version, about = "Check and repair product references of stored orders")]
pub struct RunOptions {
    #[arg(value_enum)]
    mode: Mode,

    /// Dataset export to load and, for writing modes, write back
    #[arg(long = "data", env = SHOPFRONT_DATA)]
    pub data_path: PathBuf,

    /// Acknowledge that cleanup deletes orders
    #[arg(
        long = "confirm",
        env = RECONCILE_CONFIRM,
        action = ArgAction::SetTrue,
        value_parser = BoolishValueParser::new()
    )]
    pub confirmed: bool,
}

impl RunOptions {
    pub fn mode(&self) -> ReconcileMode {
        self.mode.into()
    }
}

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("{var} must be a positive integer")]
    InvalidNumber { var: &'static str },

    #[error("{var} must be greater than zero")]
    ZeroConcurrency { var: &'static str },
}
