use chrono::NaiveDate;
use rust_decimal::Decimal;
use thiserror::Error;

/// Everything that can go wrong in the tracker, its services or a snapshot.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Validation ──────────────────────────────────────────────────
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Invalid date: {0}")]
    InvalidDate(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Validation failed: {0}")]
    ValidationError(String),

    // ── Valuation ───────────────────────────────────────────────────
    #[error("Units outstanding would become negative on {date} ({units})")]
    NegativeUnits { date: NaiveDate, units: Decimal },

    #[error("Price per unit on {date} is {price}; fund flows need a positive price")]
    NonPositivePrice { date: NaiveDate, price: Decimal },

    #[error("Recomputation conflict: {0}")]
    RecomputationConflict(String),

    #[error("Recomputation conflict persisted after {attempts} attempts")]
    ConflictRetriesExhausted { attempts: u32 },

    #[error("Recomputation cancelled before {date}")]
    RecomputationCancelled { date: NaiveDate },

    // ── Persistence collaborator ────────────────────────────────────
    #[error("Persistence error: {0}")]
    Persistence(String),

    // ── Snapshot file ───────────────────────────────────────────────
    #[error("Not a valid snapshot: {0}")]
    InvalidFileFormat(String),

    #[error("Snapshot version {0} is not supported")]
    UnsupportedVersion(u16),

    #[error("Could not encrypt snapshot: {0}")]
    Encryption(String),

    #[error("Could not decrypt snapshot: wrong password or damaged bytes")]
    Decryption,

    #[error("Could not encode: {0}")]
    Serialization(String),

    #[error("Could not decode: {0}")]
    Deserialization(String),

    #[error("Snapshot file: {0}")]
    FileIO(String),
}

impl CoreError {
    /// Errors the engine retries on its own before surfacing them.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoreError::RecomputationConflict(_))
    }
}

// ── From impls ──────────────────────────────────────────────────────

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::FileIO(e.to_string())
    }
}

impl From<bincode::Error> for CoreError {
    fn from(e: bincode::Error) -> Self {
        CoreError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Deserialization(e.to_string())
    }
}
