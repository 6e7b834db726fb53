use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::account::AccountId;
use super::mark::RecomputeReport;

/// A deposit (amount > 0) or withdrawal (amount < 0) for one account.
///
/// Appended once and never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundFlowEvent {
    pub id: Uuid,
    pub account_id: AccountId,
    pub date: NaiveDate,
    pub amount: Decimal,
    #[serde(default)]
    pub note: String,
    pub created_at: DateTime<Utc>,
}

impl FundFlowEvent {
    pub fn new(
        account_id: AccountId,
        date: NaiveDate,
        amount: Decimal,
        note: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            date,
            amount,
            note: note.into(),
            created_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn is_deposit(&self) -> bool {
        self.amount.is_sign_positive()
    }
}

/// Units issued to (or redeemed from) one account by a single fund flow,
/// or seeded at the bootstrap price while no units were outstanding.
///
/// An account's holding at any date is the sum of its rows up to that date.
/// Rows are re-derived whenever an earlier entry changes the price a flow
/// converts at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountUnits {
    /// The fund flow that was converted; `None` for genesis units
    pub event_id: Option<Uuid>,
    pub account_id: AccountId,
    pub date: NaiveDate,
    /// Signed unit delta
    pub units: Decimal,
    /// Cash amount that was converted
    pub amount: Decimal,
    /// Price per unit used for the conversion
    pub price_per_unit: Decimal,
    #[serde(default)]
    pub note: String,
}

impl AccountUnits {
    #[must_use]
    pub fn is_genesis(&self) -> bool {
        self.event_id.is_none()
    }
}

/// A deposit or withdrawal waiting to be posted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FundFlowRequest {
    pub account_id: AccountId,
    pub date: NaiveDate,
    pub amount: Decimal,
    pub note: String,
    /// Journal category; Deposit/Withdrawal by the sign of `amount` if unset
    pub category_id: Option<u32>,
}

impl FundFlowRequest {
    pub fn new(
        account_id: AccountId,
        date: NaiveDate,
        amount: Decimal,
        note: impl Into<String>,
    ) -> Self {
        Self {
            account_id,
            date,
            amount,
            note: note.into(),
            category_id: None,
        }
    }

    #[must_use]
    pub fn with_category(mut self, category_id: u32) -> Self {
        self.category_id = Some(category_id);
        self
    }
}

/// Cash moved between two accounts on one date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    pub from: AccountId,
    pub to: AccountId,
    pub date: NaiveDate,
    pub amount: Decimal,
    pub note: String,
}

/// Result of a successfully committed fund flow.
#[derive(Debug, Clone)]
pub struct FundFlowReceipt {
    pub event: FundFlowEvent,
    pub units: AccountUnits,
    /// Units outstanding on the flow date after the flow
    pub units_outstanding: Decimal,
    pub recompute: RecomputeReport,
}

/// Result of a committed transfer between two accounts.
#[derive(Debug, Clone)]
pub struct TransferReceipt {
    pub withdrawal: FundFlowEvent,
    pub deposit: FundFlowEvent,
    pub price_per_unit: Decimal,
    pub units_moved: Decimal,
}
