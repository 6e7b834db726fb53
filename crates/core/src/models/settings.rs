use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};

use crate::errors::CoreError;

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Price per unit used while no units are outstanding (genesis bootstrap).
    pub bootstrap_price_per_unit: Decimal,

    /// How many times a conflicting commit is retried before giving up.
    pub max_conflict_retries: u32,

    /// Backoff before the first retry, doubled on every further attempt.
    pub retry_backoff_ms: u64,

    /// Tolerance for `total_net_worth ≈ total_units × price_per_unit`.
    pub identity_epsilon: Decimal,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bootstrap_price_per_unit: Decimal::ONE,
            max_conflict_retries: 3,
            retry_backoff_ms: 10,
            identity_epsilon: dec!(0.000001),
        }
    }
}

impl Settings {
    /// Parse settings from JSON. Missing fields take their default values.
    pub fn from_json(json: &str) -> Result<Self, CoreError> {
        let settings: Settings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.bootstrap_price_per_unit <= Decimal::ZERO {
            return Err(CoreError::ValidationError(format!(
                "Bootstrap price per unit must be positive, got {}",
                self.bootstrap_price_per_unit
            )));
        }
        if self.identity_epsilon.is_sign_negative() {
            return Err(CoreError::ValidationError(format!(
                "Identity epsilon must not be negative, got {}",
                self.identity_epsilon
            )));
        }
        Ok(())
    }

    /// Backoff to wait before retry number `attempt` (1-based).
    #[must_use]
    pub fn backoff_for(&self, attempt: u32) -> std::time::Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        std::time::Duration::from_millis(self.retry_backoff_ms.saturating_mul(factor))
    }
}
