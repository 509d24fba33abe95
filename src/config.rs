use crate::application::activities::LedgerSettings;
use crate::application::orchestrator::FlowSettings;
use crate::application::retry::RetryPolicy;
use crate::domain::id::Id;
use crate::error::{PaymentError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Runtime configuration.
///
/// Every field has a default, so a TOML file only needs the values it changes:
///
/// ```toml
/// [authorization]
/// hold_duration_ms = 5000
///
/// [logging]
/// level = "info"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub ledger: LedgerConfig,
    pub authorization: AuthorizationConfig,
    pub retry: RetryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub ledger_id: u32,
    pub account_code: u16,
    /// Credit side of every hold.
    pub settlement_account: Id,
    /// Debit side of funding transfers.
    pub funding_account: Id,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            ledger_id: 1,
            account_code: 1,
            settlement_account: Id::new(0x1234567),
            funding_account: Id::new(0x1),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorizationConfig {
    pub hold_duration_ms: u64,
    pub max_rematch_attempts: usize,
    pub expiry_poll_ms: u64,
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            hold_duration_ms: 60_000,
            max_rematch_attempts: 64,
            expiry_poll_ms: 100,
        }
    }
}

impl AuthorizationConfig {
    pub fn hold_timeout_nanos(&self) -> u64 {
        Duration::from_millis(self.hold_duration_ms).as_nanos() as u64
    }

    pub fn expiry_poll(&self) -> Duration {
        Duration::from_millis(self.expiry_poll_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: usize,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_pct: f64,
    pub step_timeout_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 250,
            max_delay_ms: 5_000,
            jitter_pct: 0.2,
            step_timeout_ms: 300_000,
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            self.base_delay_ms,
            self.max_delay_ms,
            self.jitter_pct,
            Duration::from_millis(self.step_timeout_ms),
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` takes precedence.
    pub level: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Reads a TOML file, or returns the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    PaymentError::ConfigError(format!("cannot read {}: {}", path.display(), e))
                })?;
                Self::from_toml(&content)?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| PaymentError::ConfigError(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.ledger.ledger_id == 0 || self.ledger.account_code == 0 {
            return Err(PaymentError::ConfigError(
                "ledger_id and account_code must be non-zero".to_string(),
            ));
        }
        if self.ledger.settlement_account.is_zero() || self.ledger.funding_account.is_zero() {
            return Err(PaymentError::ConfigError(
                "system account ids must be non-zero".to_string(),
            ));
        }
        if self.ledger.settlement_account == self.ledger.funding_account {
            return Err(PaymentError::ConfigError(
                "settlement and funding accounts must differ".to_string(),
            ));
        }
        if self.authorization.hold_duration_ms == 0 {
            return Err(PaymentError::ConfigError(
                "hold_duration_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn ledger_settings(&self) -> LedgerSettings {
        LedgerSettings {
            ledger: self.ledger.ledger_id,
            code: self.ledger.account_code,
            hold_timeout_nanos: self.authorization.hold_timeout_nanos(),
        }
    }

    pub fn flow_settings(&self) -> FlowSettings {
        FlowSettings {
            settlement_account: self.ledger.settlement_account,
            max_rematch_attempts: self.authorization.max_rematch_attempts,
            expiry_poll: self.authorization.expiry_poll(),
        }
    }
}
