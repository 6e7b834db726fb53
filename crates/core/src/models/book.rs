use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::account::{Account, AccountId};
use super::account_mark::AccountMark;
use super::fund_flow::{AccountUnits, FundFlowEvent};
use super::ledger::LedgerEntry;
use super::mark::Mark;
use super::unit_ledger::UnitLedgerEntry;

/// The main data container. Everything in here gets serialized,
/// encrypted, and saved to the portable snapshot file.
///
/// Every date-keyed series is kept sorted ascending.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Book {
    pub accounts: Vec<Account>,

    /// Per-account balance snapshots
    pub account_marks: BTreeMap<AccountId, Vec<AccountMark>>,

    /// Append-only fund flow history (insertion order)
    pub fund_flows: Vec<FundFlowEvent>,

    /// Unit deltas, one per fund flow plus any genesis seeding
    pub account_units: Vec<AccountUnits>,

    pub unit_ledger: Vec<UnitLedgerEntry>,

    /// Derived valuation series
    pub marks: Vec<Mark>,

    /// Append-only audit journal
    pub ledger: Vec<LedgerEntry>,

    /// Bumped on every committed transaction
    #[serde(default)]
    pub version: u64,
}

impl Book {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an account by id.
    pub fn upsert_account(&mut self, account: Account) {
        match self.accounts.iter_mut().find(|a| a.id == account.id) {
            Some(existing) => *existing = account,
            None => self.accounts.push(account),
        }
    }

    /// Insert or replace the mark for (account, date), keeping date order.
    pub fn upsert_account_mark(&mut self, mark: AccountMark) {
        let marks = self.account_marks.entry(mark.account_id).or_default();
        match marks.binary_search_by_key(&mark.date, |m| m.date) {
            Ok(idx) => marks[idx] = mark,
            Err(idx) => marks.insert(idx, mark),
        }
    }

    /// Insert or replace the unit total for a date, keeping date order.
    pub fn upsert_unit_ledger_entry(&mut self, entry: UnitLedgerEntry) {
        match self.unit_ledger.binary_search_by_key(&entry.date, |e| e.date) {
            Ok(idx) => self.unit_ledger[idx] = entry,
            Err(idx) => self.unit_ledger.insert(idx, entry),
        }
    }

    /// Insert or replace the Mark for a date, keeping date order.
    pub fn upsert_mark(&mut self, mark: Mark) {
        match self.marks.binary_search_by_key(&mark.date, |m| m.date) {
            Ok(idx) => self.marks[idx] = mark,
            Err(idx) => self.marks.insert(idx, mark),
        }
    }

    /// Swap one account's unit rows for `rows`, keeping the others.
    pub fn replace_account_units(&mut self, account_id: &AccountId, rows: &[AccountUnits]) {
        self.account_units.retain(|u| &u.account_id != account_id);
        self.account_units.extend_from_slice(rows);
    }
}
