use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::account::AccountId;

pub const CATEGORY_DEPOSIT: u32 = 1;
pub const CATEGORY_WITHDRAWAL: u32 = 2;
pub const CATEGORY_TRANSFER: u32 = 3;
pub const CATEGORY_OPENING_BALANCE: u32 = 4;

/// Classification for a ledger entry. Static reference data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerCategory {
    pub id: u32,
    pub label: String,
}

impl LedgerCategory {
    fn new(id: u32, label: &str) -> Self {
        Self {
            id,
            label: label.to_string(),
        }
    }

    /// All built-in categories, ordered by id.
    #[must_use]
    pub fn all() -> Vec<LedgerCategory> {
        vec![
            Self::new(CATEGORY_DEPOSIT, "Deposit"),
            Self::new(CATEGORY_WITHDRAWAL, "Withdrawal"),
            Self::new(CATEGORY_TRANSFER, "Transfer"),
            Self::new(CATEGORY_OPENING_BALANCE, "Opening Balance"),
        ]
    }

    #[must_use]
    pub fn by_id(id: u32) -> Option<LedgerCategory> {
        Self::all().into_iter().find(|c| c.id == id)
    }

    /// Deposit or Withdrawal, depending on the sign of `amount`.
    #[must_use]
    pub fn for_amount(amount: Decimal) -> u32 {
        if amount.is_sign_negative() {
            CATEGORY_WITHDRAWAL
        } else {
            CATEGORY_DEPOSIT
        }
    }
}

/// One line of the append-only audit journal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Uuid,
    /// The fund flow that produced this entry
    pub event_id: Uuid,
    pub account_id: AccountId,
    pub date: NaiveDate,
    pub amount: Decimal,
    pub category_id: u32,
    #[serde(default)]
    pub note: String,
    pub recorded_at: DateTime<Utc>,
}
