use std::sync::Arc;

use crate::errors::CoreError;
use crate::models::account::{Account, AccountId};
use crate::models::account_mark::AccountMark;
use crate::models::fund_flow::{AccountUnits, FundFlowEvent};
use crate::models::ledger::LedgerEntry;
use crate::models::mark::Mark;
use crate::models::unit_ledger::UnitLedgerEntry;

/// Read side of the persistence collaborator.
///
/// Every `load_*` returns its rows ordered by date ascending (ties keep
/// insertion order). Implementations backing a [`LedgerRepository`] must only
/// ever expose committed data.
pub trait LedgerReader {
    fn load_accounts(&self) -> Result<Vec<Account>, CoreError>;

    fn load_account_marks(&self, account_id: &AccountId) -> Result<Vec<AccountMark>, CoreError>;

    fn load_fund_flow_events(
        &self,
        account_id: &AccountId,
    ) -> Result<Vec<FundFlowEvent>, CoreError>;

    fn load_account_units(&self, account_id: &AccountId) -> Result<Vec<AccountUnits>, CoreError>;

    fn load_unit_ledger(&self) -> Result<Vec<UnitLedgerEntry>, CoreError>;

    fn load_marks(&self) -> Result<Vec<Mark>, CoreError>;

    fn load_ledger_entries(&self) -> Result<Vec<LedgerEntry>, CoreError>;
}

/// A transactional scope opened by [`LedgerRepository::begin`].
///
/// Reads observe the transaction's own writes. Nothing becomes visible to
/// other readers until [`commit`](LedgerTransaction::commit); dropping the
/// transaction discards every write.
pub trait LedgerTransaction: LedgerReader {
    /// Insert or replace an account by id.
    fn save_account(&mut self, account: &Account) -> Result<(), CoreError>;

    /// Insert or replace the mark for (account, date).
    fn save_account_mark(&mut self, mark: &AccountMark) -> Result<(), CoreError>;

    fn save_fund_flow_event(&mut self, event: &FundFlowEvent) -> Result<(), CoreError>;

    fn save_account_units(&mut self, units: &AccountUnits) -> Result<(), CoreError>;

    /// Replace every unit row of one account.
    fn replace_account_units(
        &mut self,
        account_id: &AccountId,
        rows: &[AccountUnits],
    ) -> Result<(), CoreError>;

    /// Insert or replace the unit total for a date.
    fn save_unit_ledger_entry(&mut self, entry: &UnitLedgerEntry) -> Result<(), CoreError>;

    /// Replace the whole unit ledger.
    fn replace_unit_ledger(&mut self, entries: &[UnitLedgerEntry]) -> Result<(), CoreError>;

    /// Insert or replace the Mark for a date.
    fn upsert_mark(&mut self, mark: &Mark) -> Result<(), CoreError>;

    fn append_ledger_entry(&mut self, entry: &LedgerEntry) -> Result<(), CoreError>;

    /// Publish every write atomically. Fails with
    /// `CoreError::RecomputationConflict` when another writer committed an
    /// overlapping change since this transaction began.
    fn commit(self: Box<Self>) -> Result<(), CoreError>;
}

/// The persistence collaborator the engine is built on.
pub trait LedgerRepository: Send + Sync {
    /// A read-only view of committed data. All loads through one view see
    /// the same commit, even while writers are active.
    fn read_view(&self) -> Result<Box<dyn LedgerReader + '_>, CoreError>;

    /// Open a transactional scope for a multi-step write.
    fn begin(&self) -> Result<Box<dyn LedgerTransaction + '_>, CoreError>;
}

impl<T: LedgerReader + ?Sized> LedgerReader for Arc<T> {
    fn load_accounts(&self) -> Result<Vec<Account>, CoreError> {
        (**self).load_accounts()
    }

    fn load_account_marks(&self, account_id: &AccountId) -> Result<Vec<AccountMark>, CoreError> {
        (**self).load_account_marks(account_id)
    }

    fn load_fund_flow_events(
        &self,
        account_id: &AccountId,
    ) -> Result<Vec<FundFlowEvent>, CoreError> {
        (**self).load_fund_flow_events(account_id)
    }

    fn load_account_units(&self, account_id: &AccountId) -> Result<Vec<AccountUnits>, CoreError> {
        (**self).load_account_units(account_id)
    }

    fn load_unit_ledger(&self) -> Result<Vec<UnitLedgerEntry>, CoreError> {
        (**self).load_unit_ledger()
    }

    fn load_marks(&self) -> Result<Vec<Mark>, CoreError> {
        (**self).load_marks()
    }

    fn load_ledger_entries(&self) -> Result<Vec<LedgerEntry>, CoreError> {
        (**self).load_ledger_entries()
    }
}
