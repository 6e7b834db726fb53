use chrono::NaiveDate;
use log::debug;
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::errors::CoreError;
use crate::models::account::{Account, AccountId};
use crate::models::account_mark::AccountMark;
use crate::models::fund_flow::FundFlowEvent;
use crate::models::mark::{Mark, RecomputeReport};
use crate::models::unit_ledger::UnitLedgerEntry;
use crate::services::account_mark_store::{balance_at, flows_on};
use crate::services::fund_flow_processor::{convert_flows, Conversion};
use crate::services::unit_ledger::{units_at, UnitLedger};
use crate::storage::traits::{LedgerReader, LedgerTransaction};

/// Cooperative cancellation for long recomputations.
///
/// Checked before every Mark is written; a cancelled recomputation fails
/// and its transaction is rolled back.
#[derive(Debug, Default)]
pub struct CancelFlag(AtomicBool);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a Mark depends on, loaded once from a consistent view.
#[derive(Debug, Clone, Default)]
pub struct ValuationInputs {
    accounts: Vec<Account>,
    account_marks: HashMap<AccountId, Vec<AccountMark>>,
    flows: HashMap<AccountId, Vec<FundFlowEvent>>,
    unit_ledger: Vec<UnitLedgerEntry>,
}

impl ValuationInputs {
    pub fn load<R: LedgerReader + ?Sized>(reader: &R) -> Result<Self, CoreError> {
        let accounts = reader.load_accounts()?;
        let mut account_marks = HashMap::with_capacity(accounts.len());
        let mut flows = HashMap::with_capacity(accounts.len());

        for account in &accounts {
            let mut marks = reader.load_account_marks(&account.id)?;
            marks.sort_by_key(|m| m.date);
            account_marks.insert(account.id, marks);

            let mut events = reader.load_fund_flow_events(&account.id)?;
            events.sort_by_key(|e| e.date);
            flows.insert(account.id, events);
        }

        let mut unit_ledger = reader.load_unit_ledger()?;
        unit_ledger.sort_by_key(|e| e.date);

        Ok(Self {
            accounts,
            account_marks,
            flows,
            unit_ledger,
        })
    }

    /// The same inputs with unit totals taken from `unit_ledger`.
    #[must_use]
    pub fn with_unit_ledger(mut self, mut unit_ledger: Vec<UnitLedgerEntry>) -> Self {
        unit_ledger.sort_by_key(|e| e.date);
        self.unit_ledger = unit_ledger;
        self
    }

    /// Accounts in the order they were opened.
    #[must_use]
    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    /// Fund flows of one account, ascending by date.
    #[must_use]
    pub fn flows(&self, account_id: &AccountId) -> &[FundFlowEvent] {
        self.flows.get(account_id).map_or(&[][..], Vec::as_slice)
    }

    /// End-of-day balance of one account, if it has a mark or flow by `date`.
    #[must_use]
    pub fn balance_on(&self, account_id: &AccountId, date: NaiveDate) -> Option<Decimal> {
        let marks = self.account_marks.get(account_id).map_or(&[][..], Vec::as_slice);
        balance_at(marks, self.flows(account_id), date)
    }

    /// Balance of one account on `date` with that date's own flows taken out.
    #[must_use]
    pub fn balance_before_flows(&self, account_id: &AccountId, date: NaiveDate) -> Option<Decimal> {
        self.balance_on(account_id, date)
            .map(|balance| balance - flows_on(self.flows(account_id), date))
    }

    /// Sum of end-of-day balances of the accounts active on `date`.
    #[must_use]
    pub fn net_worth_at(&self, date: NaiveDate) -> Decimal {
        self.accounts
            .iter()
            .filter(|a| a.is_active_on(date))
            .filter_map(|a| self.balance_on(&a.id, date))
            .sum()
    }

    #[must_use]
    pub fn units_at(&self, date: NaiveDate) -> Decimal {
        units_at(&self.unit_ledger, date)
    }

    /// Every date carrying an account mark, fund flow or account
    /// deactivation, ascending.
    #[must_use]
    pub fn event_dates(&self) -> BTreeSet<NaiveDate> {
        let mut dates: BTreeSet<NaiveDate> = self
            .account_marks
            .values()
            .flat_map(|marks| marks.iter().map(|m| m.date))
            .collect();
        dates.extend(self.flows.values().flat_map(|f| f.iter().map(|e| e.date)));
        dates.extend(self.accounts.iter().filter_map(|a| a.deactivated_on));
        dates
    }

    /// Event dates plus every unit ledger date, ascending.
    #[must_use]
    pub fn valuation_dates(&self) -> BTreeSet<NaiveDate> {
        let mut dates = self.event_dates();
        dates.extend(self.unit_ledger.iter().map(|e| e.date));
        dates
    }
}

/// The Mark on `date` for the given inputs.
pub fn mark_for(
    inputs: &ValuationInputs,
    date: NaiveDate,
    bootstrap_price: Decimal,
) -> Result<Mark, CoreError> {
    let total_net_worth = inputs.net_worth_at(date);
    let total_units = inputs.units_at(date);

    let price_per_unit = if total_units.is_zero() {
        bootstrap_price
    } else {
        total_net_worth.checked_div(total_units).ok_or_else(|| {
            CoreError::ValidationError(format!(
                "Price per unit overflows on {date}: {total_net_worth} / {total_units}"
            ))
        })?
    };

    Ok(Mark {
        date,
        total_net_worth: total_net_worth.normalize(),
        total_units: total_units.normalize(),
        price_per_unit: price_per_unit.normalize(),
    })
}

/// The Mark series from `from` on, derived from scratch: unit conversions
/// are replayed in date order first, then every valuation date is marked.
///
/// Pure: the same inputs always give the same Marks, whatever order the
/// entries behind them were recorded in.
pub fn derive_marks(
    inputs: &ValuationInputs,
    from: NaiveDate,
    bootstrap_price: Decimal,
) -> Result<Vec<Mark>, CoreError> {
    let conversion = convert_flows(inputs, bootstrap_price)?;
    let inputs = inputs.clone().with_unit_ledger(conversion.unit_ledger);
    inputs
        .valuation_dates()
        .range(from..)
        .map(|&date| mark_for(&inputs, date, bootstrap_price))
        .collect()
}

/// Derives aggregate net worth and price per unit, and maintains the Mark
/// series.
pub struct ValuationEngine {
    bootstrap_price: Decimal,
    unit_ledger: UnitLedger,
}

impl ValuationEngine {
    pub fn new(bootstrap_price: Decimal) -> Self {
        Self {
            bootstrap_price,
            unit_ledger: UnitLedger::new(),
        }
    }

    /// Compute and store the Mark for `date` from the stored balances and
    /// unit totals. Dates that carry no mark, flow, unit entry or
    /// deactivation have no Mark: they get `None` and nothing is written.
    pub fn mark_aggregate(
        &self,
        tx: &mut dyn LedgerTransaction,
        date: NaiveDate,
    ) -> Result<Option<Mark>, CoreError> {
        let inputs = ValuationInputs::load(&*tx)?;
        if !inputs.valuation_dates().contains(&date) {
            return Ok(None);
        }
        let stored = self.mark_as_of(&*tx, date)?.filter(|m| m.date == date);
        let (mark, _) = self.aggregate(tx, &inputs, date, stored.as_ref())?;
        Ok(Some(mark))
    }

    /// Price of the most recent Mark at or before `date`, or the bootstrap
    /// price when there is none.
    pub fn price_per_unit_at<R: LedgerReader + ?Sized>(
        &self,
        reader: &R,
        date: NaiveDate,
    ) -> Result<Decimal, CoreError> {
        Ok(self
            .mark_as_of(reader, date)?
            .map(|m| m.price_per_unit)
            .unwrap_or(self.bootstrap_price))
    }

    /// Most recent Mark at or before `date`.
    pub fn mark_as_of<R: LedgerReader + ?Sized>(
        &self,
        reader: &R,
        date: NaiveDate,
    ) -> Result<Option<Mark>, CoreError> {
        let mut marks = reader.load_marks()?;
        let idx = marks.partition_point(|m| m.date <= date);
        Ok(idx.checked_sub(1).map(|i| marks.swap_remove(i)))
    }

    /// Bring the series up to date after a change on `from`.
    ///
    /// Unit conversions are replayed first; if that moves units on an
    /// earlier date, the pass starts there instead. Then every valuation
    /// date from the start on is re-aggregated, oldest first. Marks whose
    /// value did not change are not rewritten.
    pub fn recompute_from(
        &self,
        tx: &mut dyn LedgerTransaction,
        from: NaiveDate,
        cancel: &CancelFlag,
    ) -> Result<RecomputeReport, CoreError> {
        let inputs = ValuationInputs::load(&*tx)?;
        let conversion = convert_flows(&inputs, self.bootstrap_price)?;
        let start = match self.store_conversion(tx, &inputs, &conversion)? {
            Some(repriced) if repriced < from => repriced,
            _ => from,
        };
        let inputs = inputs.with_unit_ledger(conversion.unit_ledger);

        let stored: HashMap<NaiveDate, Mark> = tx
            .load_marks()?
            .into_iter()
            .filter(|m| m.date >= start)
            .map(|m| (m.date, m))
            .collect();
        let dates: Vec<NaiveDate> = inputs.valuation_dates().range(start..).copied().collect();

        let mut report = RecomputeReport::empty(start);
        for &date in &dates {
            if cancel.is_cancelled() {
                return Err(CoreError::RecomputationCancelled { date });
            }
            let (_, written) = self.aggregate(tx, &inputs, date, stored.get(&date))?;
            if written {
                report.marks_written += 1;
            }
        }

        debug!(
            "Recomputed {} dates from {start}, {} marks written",
            dates.len(),
            report.marks_written
        );
        Ok(report)
    }

    /// Mark `date` and store it unless `stored` already holds that value.
    fn aggregate(
        &self,
        tx: &mut dyn LedgerTransaction,
        inputs: &ValuationInputs,
        date: NaiveDate,
        stored: Option<&Mark>,
    ) -> Result<(Mark, bool), CoreError> {
        let mark = mark_for(inputs, date, self.bootstrap_price)?;
        let written = stored != Some(&mark);
        if written {
            tx.upsert_mark(&mark)?;
        }
        Ok((mark, written))
    }

    /// Store re-derived unit rows and totals where they differ from what is
    /// stored. Returns the earliest date whose unit total changed.
    fn store_conversion(
        &self,
        tx: &mut dyn LedgerTransaction,
        inputs: &ValuationInputs,
        conversion: &Conversion,
    ) -> Result<Option<NaiveDate>, CoreError> {
        for account in inputs.accounts() {
            let derived = conversion.rows_for(&account.id);
            if tx.load_account_units(&account.id)? != derived {
                tx.replace_account_units(&account.id, derived)?;
                debug!("Re-derived unit rows of account {}", account.id);
            }
        }
        self.unit_ledger.rebuild(tx, &conversion.unit_ledger)
    }
}
