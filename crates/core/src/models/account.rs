use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier of a tracked account.
pub type AccountId = Uuid;

/// A tracked financial account (bank, brokerage, loan, ...).
///
/// Accounts are never deleted. Closing one sets `deactivated_on`, after which
/// it no longer contributes to aggregate net worth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Unique identifier
    pub id: AccountId,

    /// Display name, unique across the book (case-insensitive)
    pub name: String,

    /// Genesis date: no mark or fund flow may precede it
    pub opened_on: NaiveDate,

    /// First date on which the account no longer counts towards net worth
    #[serde(default)]
    pub deactivated_on: Option<NaiveDate>,

    /// Wall-clock creation time
    pub created_at: DateTime<Utc>,
}

impl Account {
    pub fn new(name: impl Into<String>, opened_on: NaiveDate) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            opened_on,
            deactivated_on: None,
            created_at: Utc::now(),
        }
    }

    /// Whether the account contributes to net worth on `date`.
    #[must_use]
    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        date >= self.opened_on && self.deactivated_on.map_or(true, |closed| date < closed)
    }

    /// Whether the account is still open today (never deactivated).
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.deactivated_on.is_none()
    }
}
