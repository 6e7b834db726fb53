use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Total units outstanding from `date` until the next entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitLedgerEntry {
    pub date: NaiveDate,
    pub total_units: Decimal,
}

impl UnitLedgerEntry {
    pub fn new(date: NaiveDate, total_units: Decimal) -> Self {
        Self { date, total_units }
    }
}
