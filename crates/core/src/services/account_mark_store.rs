use chrono::NaiveDate;
use log::debug;
use rust_decimal::Decimal;
use std::collections::BTreeSet;

use crate::errors::CoreError;
use crate::models::account::{Account, AccountId};
use crate::models::account_mark::{AccountMark, MarkHistory, MarkWrite};
use crate::models::fund_flow::FundFlowEvent;
use crate::storage::traits::{LedgerReader, LedgerTransaction};

/// Per-account dated balance snapshots.
///
/// One recorded balance per (account, date). Lookups forward-fill from the
/// most recent record at or before the requested date and add the fund
/// flows dated after it, so the result does not depend on the order in
/// which records and flows arrived.
pub struct AccountMarkStore;

impl AccountMarkStore {
    pub fn new() -> Self {
        Self
    }

    /// Upsert the balance of `account` on `date`.
    ///
    /// Recording the balance that is already stored writes nothing and
    /// returns `MarkWrite::Unchanged`.
    pub fn record_mark(
        &self,
        tx: &mut dyn LedgerTransaction,
        account: &Account,
        date: NaiveDate,
        balance: Decimal,
    ) -> Result<MarkWrite, CoreError> {
        Self::check_date(account, date)?;

        let marks = tx.load_account_marks(&account.id)?;
        let outcome = match marks.binary_search_by_key(&date, |m| m.date) {
            Ok(idx) if marks[idx].balance == balance => return Ok(MarkWrite::Unchanged),
            Ok(idx) => MarkWrite::Updated {
                previous: marks[idx].balance,
            },
            Err(_) => MarkWrite::Inserted,
        };

        tx.save_account_mark(&AccountMark::new(account.id, date, balance))?;
        debug!("Marked account {} at {balance} on {date} ({outcome:?})", account.id);
        Ok(outcome)
    }

    /// Balance of one account at the end of `date`: its most recent
    /// recorded balance plus every fund flow dated after that record.
    /// `None` before the account has either.
    pub fn balance_as_of<R: LedgerReader + ?Sized>(
        &self,
        reader: &R,
        account_id: &AccountId,
        date: NaiveDate,
    ) -> Result<Option<Decimal>, CoreError> {
        let marks = reader.load_account_marks(account_id)?;
        let flows = reader.load_fund_flow_events(account_id)?;
        Ok(balance_at(&marks, &flows, date))
    }

    /// Forward-filled balance of every account active on `date`.
    ///
    /// Accounts with neither a mark nor a flow by `date` are left out.
    pub fn balances_as_of<R: LedgerReader + ?Sized>(
        &self,
        reader: &R,
        date: NaiveDate,
    ) -> Result<Vec<(AccountId, Decimal)>, CoreError> {
        let mut balances = Vec::new();
        for account in reader.load_accounts()? {
            if !account.is_active_on(date) {
                continue;
            }
            if let Some(balance) = self.balance_as_of(reader, &account.id, date)? {
                balances.push((account.id, balance));
            }
        }
        Ok(balances)
    }

    /// Balance of one account on every date it was marked or had a fund
    /// flow, ascending by date.
    pub fn history<R: LedgerReader + ?Sized>(
        &self,
        reader: &R,
        account_id: &AccountId,
    ) -> Result<MarkHistory, CoreError> {
        let marks = reader.load_account_marks(account_id)?;
        let flows = reader.load_fund_flow_events(account_id)?;

        let dates: BTreeSet<NaiveDate> = marks
            .iter()
            .map(|m| m.date)
            .chain(flows.iter().map(|f| f.date))
            .collect();
        let history = dates
            .into_iter()
            .filter_map(|date| {
                balance_at(&marks, &flows, date)
                    .map(|balance| AccountMark::new(*account_id, date, balance))
            })
            .collect();
        Ok(MarkHistory::new(history))
    }

    /// `date` must fall inside the account's active lifetime.
    pub(crate) fn check_date(account: &Account, date: NaiveDate) -> Result<(), CoreError> {
        if date < account.opened_on {
            return Err(CoreError::InvalidDate(format!(
                "{date} precedes the genesis date {} of account '{}'",
                account.opened_on, account.name
            )));
        }
        if let Some(closed) = account.deactivated_on {
            if date >= closed {
                return Err(CoreError::InvalidDate(format!(
                    "Account '{}' was deactivated on {closed}; {date} is not writable",
                    account.name
                )));
            }
        }
        Ok(())
    }
}

impl Default for AccountMarkStore {
    fn default() -> Self {
        Self::new()
    }
}

/// End-of-day balance from date-sorted marks and flows of one account.
///
/// A recorded balance already includes the flows of its own date; only
/// flows after it move the balance on.
pub(crate) fn balance_at(
    marks: &[AccountMark],
    flows: &[FundFlowEvent],
    date: NaiveDate,
) -> Option<Decimal> {
    let idx = marks.partition_point(|m| m.date <= date);
    let recorded = idx.checked_sub(1).map(|i| &marks[i]);
    let since = recorded.map(|m| m.date);

    let mut moved = flows
        .iter()
        .take_while(|f| f.date <= date)
        .filter(|f| since.map_or(true, |s| f.date > s))
        .map(|f| f.amount)
        .peekable();
    if recorded.is_none() && moved.peek().is_none() {
        return None;
    }
    Some(recorded.map_or(Decimal::ZERO, |m| m.balance) + moved.sum::<Decimal>())
}

/// Net cash the account's fund flows moved on exactly `date`.
pub(crate) fn flows_on(flows: &[FundFlowEvent], date: NaiveDate) -> Decimal {
    flows.iter().filter(|f| f.date == date).map(|f| f.amount).sum()
}
