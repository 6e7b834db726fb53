use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::account::AccountId;
use super::mark::RecomputeReport;

/// Balance of one account on one date. At most one per (account, date).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountMark {
    pub account_id: AccountId,
    pub date: NaiveDate,
    pub balance: Decimal,
}

impl AccountMark {
    pub fn new(account_id: AccountId, date: NaiveDate, balance: Decimal) -> Self {
        Self {
            account_id,
            date,
            balance,
        }
    }
}

/// What a `record_mark` call did to the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkWrite {
    /// No mark existed for that (account, date)
    Inserted,
    /// An existing mark was replaced with a different balance
    Updated { previous: Decimal },
    /// The same balance was already recorded; nothing was written
    Unchanged,
}

impl MarkWrite {
    /// Whether anything downstream needs recomputing.
    #[must_use]
    pub fn changed(&self) -> bool {
        !matches!(self, MarkWrite::Unchanged)
    }
}

/// Result of recording a balance: the store write plus the Mark
/// recomputation it triggered (none when nothing changed).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MarkOutcome {
    pub write: MarkWrite,
    pub recompute: Option<RecomputeReport>,
}

/// Ordered (date ascending) mark history of one account.
///
/// Iteration is lazy and can be restarted any number of times.
#[derive(Debug, Clone, Default)]
pub struct MarkHistory {
    marks: Vec<AccountMark>,
}

impl MarkHistory {
    pub(crate) fn new(mut marks: Vec<AccountMark>) -> Self {
        marks.sort_by_key(|m| m.date);
        Self { marks }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, AccountMark> {
        self.marks.iter()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.marks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }

    /// The most recent mark at or before `date`.
    #[must_use]
    pub fn as_of(&self, date: NaiveDate) -> Option<&AccountMark> {
        let idx = self.marks.partition_point(|m| m.date <= date);
        idx.checked_sub(1).map(|i| &self.marks[i])
    }

    #[must_use]
    pub fn latest(&self) -> Option<&AccountMark> {
        self.marks.last()
    }
}

impl<'a> IntoIterator for &'a MarkHistory {
    type Item = &'a AccountMark;
    type IntoIter = std::slice::Iter<'a, AccountMark>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
