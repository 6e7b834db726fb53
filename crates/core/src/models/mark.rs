use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Aggregate valuation point. Purely derived; one per date.
///
/// `price_per_unit = total_net_worth / total_units`, or the bootstrap price
/// while no units are outstanding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mark {
    pub date: NaiveDate,
    pub total_net_worth: Decimal,
    pub total_units: Decimal,
    pub price_per_unit: Decimal,
}

/// Summary of one recomputation pass over the Mark series.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecomputeReport {
    /// First date that was recomputed
    pub from: NaiveDate,
    /// Number of Marks written
    pub marks_written: usize,
}

impl RecomputeReport {
    pub fn empty(from: NaiveDate) -> Self {
        Self {
            from,
            marks_written: 0,
        }
    }
}
