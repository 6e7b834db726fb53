pub mod errors;
pub mod models;
pub mod services;
pub mod storage;

use chrono::NaiveDate;
use log::{info, warn};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use std::sync::Arc;

use errors::CoreError;
use models::{
    account::{Account, AccountId},
    account_mark::{MarkHistory, MarkOutcome},
    fund_flow::{FundFlowEvent, FundFlowReceipt, FundFlowRequest, TransferReceipt, TransferRequest},
    ledger::{LedgerCategory, LedgerEntry, CATEGORY_OPENING_BALANCE},
    mark::{Mark, RecomputeReport},
    settings::Settings,
};
use services::{
    account_mark_store::AccountMarkStore,
    fund_flow_processor::{find_account, FundFlowProcessor},
    ledger_journal::LedgerJournal,
    unit_ledger::UnitLedger,
    valuation_engine::{CancelFlag, ValuationEngine},
};
use storage::memory::InMemoryRepository;
use storage::traits::{LedgerReader, LedgerRepository, LedgerTransaction};

/// Parse a `YYYY-MM-DD` date.
pub fn parse_date(input: &str) -> Result<NaiveDate, CoreError> {
    NaiveDate::parse_from_str(input.trim(), "%Y-%m-%d")
        .map_err(|e| CoreError::InvalidDate(format!("'{input}' is not a YYYY-MM-DD date: {e}")))
}

/// Main entry point for the net worth core library.
///
/// Owns the persistence collaborator and the valuation services. All
/// writes serialize through one critical section and run in a single
/// repository transaction each; reads go to committed data only and never
/// wait for a writer.
#[must_use]
pub struct NetWorthTracker {
    repository: Arc<dyn LedgerRepository>,
    settings: RwLock<Settings>,
    writer: Mutex<()>,
    mark_store: AccountMarkStore,
    unit_ledger: UnitLedger,
    fund_flows: FundFlowProcessor,
    journal: LedgerJournal,
}

impl std::fmt::Debug for NetWorthTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetWorthTracker")
            .field("settings", &*self.settings.read())
            .finish_non_exhaustive()
    }
}

impl NetWorthTracker {
    /// A tracker over an empty in-memory book with default settings.
    pub fn create_new() -> Self {
        Self::build(Arc::new(InMemoryRepository::new()), Settings::default())
    }

    /// A tracker over any persistence collaborator, with default settings.
    pub fn new(repository: Arc<dyn LedgerRepository>) -> Self {
        Self::build(repository, Settings::default())
    }

    /// A tracker with explicit settings. Settings are validated first.
    pub fn with_settings(
        repository: Arc<dyn LedgerRepository>,
        settings: Settings,
    ) -> Result<Self, CoreError> {
        settings.validate()?;
        Ok(Self::build(repository, settings))
    }

    // ── Accounts ────────────────────────────────────────────────────

    /// Open a new account on `opened_on` (its genesis date).
    ///
    /// A non-zero opening balance is applied as an opening fund flow, which
    /// issues the account's first units. The very first account therefore
    /// bootstraps the series at the configured bootstrap price.
    pub fn create_account(
        &self,
        name: &str,
        opened_on: NaiveDate,
        opening_balance: Decimal,
    ) -> Result<Account, CoreError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(CoreError::ValidationError(
                "Account name must not be empty".into(),
            ));
        }
        if opening_balance < Decimal::ZERO {
            return Err(CoreError::InvalidAmount(format!(
                "Opening balance must not be negative, got {opening_balance}"
            )));
        }

        let account = self.write("create_account", |tx, valuation| {
            let taken = tx
                .load_accounts()?
                .iter()
                .any(|a| a.name.eq_ignore_ascii_case(name));
            if taken {
                return Err(CoreError::ValidationError(format!(
                    "An account named '{name}' already exists"
                )));
            }

            let account = Account::new(name, opened_on);
            tx.save_account(&account)?;

            if opening_balance.is_zero() {
                self.mark_store
                    .record_mark(tx, &account, opened_on, Decimal::ZERO)?;
                valuation.recompute_from(tx, opened_on, &CancelFlag::new())?;
            } else {
                let opening =
                    FundFlowRequest::new(account.id, opened_on, opening_balance, "Opening balance")
                        .with_category(CATEGORY_OPENING_BALANCE);
                self.fund_flows
                    .apply(tx, valuation, &opening, &CancelFlag::new())?;
            }
            Ok(account)
        })?;

        info!(
            "Opened account '{}' ({}) on {opened_on} with {opening_balance}",
            account.name, account.id
        );
        Ok(account)
    }

    /// Stop counting an account towards net worth from `date` on.
    ///
    /// The account and its history are kept; Marks from `date` onwards are
    /// recomputed.
    pub fn deactivate_account(
        &self,
        account_id: &AccountId,
        date: NaiveDate,
    ) -> Result<Account, CoreError> {
        self.write("deactivate_account", |tx, valuation| {
            let mut account = find_account(&*tx, account_id)?;
            if let Some(closed) = account.deactivated_on {
                return Err(CoreError::ValidationError(format!(
                    "Account '{}' was already deactivated on {closed}",
                    account.name
                )));
            }
            if date < account.opened_on {
                return Err(CoreError::InvalidDate(format!(
                    "{date} precedes the genesis date {} of account '{}'",
                    account.opened_on, account.name
                )));
            }

            let units = self.fund_flows.account_units(&*tx, account_id)?;
            if !units.is_zero() {
                warn!(
                    "Deactivating '{}' while it still holds {units} units",
                    account.name
                );
            }

            account.deactivated_on = Some(date);
            tx.save_account(&account)?;
            valuation.recompute_from(tx, date, &CancelFlag::new())?;
            info!("Deactivated account '{}' on {date}", account.name);
            Ok(account)
        })
    }

    pub fn get_account(&self, account_id: &AccountId) -> Result<Account, CoreError> {
        find_account(&*self.repository.read_view()?, account_id)
    }

    /// Case-insensitive lookup by name.
    pub fn get_account_by_name(&self, name: &str) -> Result<Account, CoreError> {
        let wanted = name.trim();
        self.repository
            .read_view()?
            .load_accounts()?
            .into_iter()
            .find(|a| a.name.eq_ignore_ascii_case(wanted))
            .ok_or_else(|| CoreError::AccountNotFound(name.to_string()))
    }

    /// All accounts, including deactivated ones, sorted by name.
    pub fn get_accounts(&self) -> Result<Vec<Account>, CoreError> {
        let mut accounts = self.repository.read_view()?.load_accounts()?;
        accounts.sort_by_key(|a| a.name.to_lowercase());
        Ok(accounts)
    }

    /// Accounts contributing to net worth on `date`, sorted by name.
    pub fn get_active_accounts(&self, date: NaiveDate) -> Result<Vec<Account>, CoreError> {
        let mut accounts = self.get_accounts()?;
        accounts.retain(|a| a.is_active_on(date));
        Ok(accounts)
    }

    // ── Marks & Fund Flows ──────────────────────────────────────────

    /// Record the balance of an account on a date and refresh the Mark
    /// series from that date. Re-recording an identical balance is a no-op.
    pub fn record_mark(
        &self,
        account_id: &AccountId,
        date: NaiveDate,
        balance: Decimal,
    ) -> Result<MarkOutcome, CoreError> {
        self.write("record_mark", |tx, valuation| {
            let account = find_account(&*tx, account_id)?;
            let write = self.mark_store.record_mark(tx, &account, date, balance)?;
            let recompute = if write.changed() {
                Some(valuation.recompute_from(tx, date, &CancelFlag::new())?)
            } else {
                None
            };
            Ok(MarkOutcome { write, recompute })
        })
    }

    /// Deposit (`amount > 0`) or withdraw (`amount < 0`) cash for an account.
    pub fn apply_fund_flow(
        &self,
        account_id: &AccountId,
        date: NaiveDate,
        amount: Decimal,
        note: &str,
    ) -> Result<FundFlowReceipt, CoreError> {
        let request = FundFlowRequest::new(*account_id, date, amount, note);
        self.write("apply_fund_flow", |tx, valuation| {
            self.fund_flows
                .apply(tx, valuation, &request, &CancelFlag::new())
        })
    }

    /// Move cash between two accounts without changing units outstanding.
    pub fn transfer(
        &self,
        from: &AccountId,
        to: &AccountId,
        date: NaiveDate,
        amount: Decimal,
        note: &str,
    ) -> Result<TransferReceipt, CoreError> {
        let request = TransferRequest {
            from: *from,
            to: *to,
            date,
            amount,
            note: note.to_string(),
        };
        self.write("transfer", |tx, valuation| {
            self.fund_flows
                .transfer(tx, valuation, &request, &CancelFlag::new())
        })
    }

    // ── Valuation ───────────────────────────────────────────────────

    /// Sum of the latest balance of every account that is still active.
    pub fn get_total_balance(&self) -> Result<Decimal, CoreError> {
        let view = self.repository.read_view()?;
        Ok(self
            .mark_store
            .balances_as_of(&*view, NaiveDate::MAX)?
            .into_iter()
            .map(|(_, balance)| balance)
            .sum())
    }

    /// Aggregate net worth on `date` (forward-filled balances).
    pub fn get_net_worth(&self, date: NaiveDate) -> Result<Decimal, CoreError> {
        let view = self.repository.read_view()?;
        Ok(self
            .mark_store
            .balances_as_of(&*view, date)?
            .into_iter()
            .map(|(_, balance)| balance)
            .sum())
    }

    /// Price per unit of the most recent Mark at or before `date`.
    pub fn get_price_per_unit(&self, date: NaiveDate) -> Result<Decimal, CoreError> {
        self.valuation()
            .price_per_unit_at(&*self.repository.read_view()?, date)
    }

    pub fn get_units_outstanding(&self, date: NaiveDate) -> Result<Decimal, CoreError> {
        self.unit_ledger
            .units_outstanding(&*self.repository.read_view()?, date)
    }

    /// Units currently held by one account.
    pub fn get_account_units(&self, account_id: &AccountId) -> Result<Decimal, CoreError> {
        let view = self.repository.read_view()?;
        find_account(&*view, account_id)?;
        self.fund_flows.account_units(&*view, account_id)
    }

    /// Value of an account's units on `date` at that date's price per unit.
    pub fn get_account_value(
        &self,
        account_id: &AccountId,
        date: NaiveDate,
    ) -> Result<Decimal, CoreError> {
        let view = self.repository.read_view()?;
        find_account(&*view, account_id)?;
        let units: Decimal = view
            .load_account_units(account_id)?
            .iter()
            .filter(|u| u.date <= date)
            .map(|u| u.units)
            .sum();
        let price = self.valuation().price_per_unit_at(&*view, date)?;
        Ok(units * price)
    }

    /// The whole Mark series, oldest first.
    pub fn get_marks(&self) -> Result<Vec<Mark>, CoreError> {
        self.repository.read_view()?.load_marks()
    }

    /// The Mark computed for exactly `date`, if any.
    pub fn get_mark(&self, date: NaiveDate) -> Result<Option<Mark>, CoreError> {
        Ok(self
            .get_marks()?
            .into_iter()
            .find(|m| m.date == date))
    }

    /// Balance history of one account.
    pub fn get_account_marks(&self, account_id: &AccountId) -> Result<MarkHistory, CoreError> {
        let view = self.repository.read_view()?;
        find_account(&*view, account_id)?;
        self.mark_store.history(&*view, account_id)
    }

    pub fn get_fund_flows(&self, account_id: &AccountId) -> Result<Vec<FundFlowEvent>, CoreError> {
        let view = self.repository.read_view()?;
        find_account(&*view, account_id)?;
        view.load_fund_flow_events(account_id)
    }

    // ── Ledger Journal ──────────────────────────────────────────────

    pub fn get_ledger(&self) -> Result<Vec<LedgerEntry>, CoreError> {
        self.journal.entries(&*self.repository.read_view()?)
    }

    pub fn get_ledger_for_account(
        &self,
        account_id: &AccountId,
    ) -> Result<Vec<LedgerEntry>, CoreError> {
        let view = self.repository.read_view()?;
        find_account(&*view, account_id)?;
        self.journal.entries_for_account(&*view, account_id)
    }

    #[must_use]
    pub fn get_ledger_categories(&self) -> Vec<LedgerCategory> {
        self.journal.categories()
    }

    pub fn get_ledger_category(&self, id: u32) -> Result<LedgerCategory, CoreError> {
        self.journal.category(id)
    }

    // ── Maintenance ─────────────────────────────────────────────────

    /// Recompute every Mark on or after `date`.
    pub fn recompute_from(&self, date: NaiveDate) -> Result<RecomputeReport, CoreError> {
        self.recompute_from_cancellable(date, &CancelFlag::new())
    }

    /// Recompute the whole Mark series from the earliest genesis date.
    pub fn recompute_all(&self) -> Result<RecomputeReport, CoreError> {
        self.write("recompute_all", |tx, valuation| {
            let start = earliest_genesis(&*tx)?;
            valuation.recompute_from(tx, start, &CancelFlag::new())
        })
    }

    /// Like [`recompute_from`](Self::recompute_from), but abandons the work
    /// (writing nothing) once `cancel` is raised.
    pub fn recompute_from_cancellable(
        &self,
        date: NaiveDate,
        cancel: &CancelFlag,
    ) -> Result<RecomputeReport, CoreError> {
        let result = self.write("recompute", |tx, valuation| {
            valuation.recompute_from(tx, date, cancel)
        });
        if let Err(CoreError::RecomputationCancelled { date: at }) = &result {
            warn!("Recomputation from {date} cancelled at {at}; nothing written");
        }
        result
    }

    /// Dates whose Mark breaks `total_net_worth ≈ total_units × price_per_unit`
    /// beyond the configured epsilon.
    ///
    /// Every Mark is checked. Positive net worth always carries units, so a
    /// Mark without units is reported when its net worth is positive; a debt
    /// with no units outstanding is valid.
    pub fn verify_valuation_identity(&self) -> Result<Vec<NaiveDate>, CoreError> {
        let epsilon = self.settings.read().identity_epsilon;
        Ok(self
            .get_marks()?
            .into_iter()
            .filter(|m| breaks_identity(m, epsilon))
            .map(|m| m.date)
            .collect())
    }

    // ── Settings ────────────────────────────────────────────────────

    #[must_use]
    pub fn get_settings(&self) -> Settings {
        self.settings.read().clone()
    }

    /// Change the genesis price policy and recompute the whole series.
    ///
    /// The new price takes effect only once the recomputation has
    /// committed; if it fails, settings and data are left as they were.
    pub fn set_bootstrap_price_per_unit(&self, price: Decimal) -> Result<RecomputeReport, CoreError> {
        let _writer = self.writer.lock();
        let mut updated = self.get_settings();
        updated.bootstrap_price_per_unit = price;
        updated.validate()?;

        let report = self.run("set_bootstrap_price_per_unit", &updated, |tx, valuation| {
            let start = earliest_genesis(&*tx)?;
            valuation.recompute_from(tx, start, &CancelFlag::new())
        })?;
        *self.settings.write() = updated;
        info!("Bootstrap price per unit set to {price}");
        Ok(report)
    }

    pub fn set_conflict_retry_policy(&self, max_retries: u32, backoff_ms: u64) {
        let mut settings = self.settings.write();
        settings.max_conflict_retries = max_retries;
        settings.retry_backoff_ms = backoff_ms;
    }

    // ── Export ──────────────────────────────────────────────────────

    /// Export the ledger journal as a JSON string.
    pub fn export_ledger_to_json(&self) -> Result<String, CoreError> {
        serde_json::to_string_pretty(&self.get_ledger()?)
            .map_err(|e| CoreError::Serialization(format!("Failed to serialize ledger to JSON: {e}")))
    }

    /// Export the Mark series as CSV.
    /// Columns: date, total_net_worth, total_units, price_per_unit
    pub fn export_marks_to_csv(&self) -> Result<String, CoreError> {
        let mut csv = String::from("date,total_net_worth,total_units,price_per_unit\n");
        for mark in self.get_marks()? {
            csv.push_str(&format!(
                "{},{},{},{}\n",
                mark.date, mark.total_net_worth, mark.total_units, mark.price_per_unit
            ));
        }
        Ok(csv)
    }

    // ── Internal ────────────────────────────────────────────────────

    fn build(repository: Arc<dyn LedgerRepository>, settings: Settings) -> Self {
        Self {
            repository,
            settings: RwLock::new(settings),
            writer: Mutex::new(()),
            mark_store: AccountMarkStore::new(),
            unit_ledger: UnitLedger::new(),
            fund_flows: FundFlowProcessor::new(),
            journal: LedgerJournal::new(),
        }
    }

    fn valuation(&self) -> ValuationEngine {
        ValuationEngine::new(self.settings.read().bootstrap_price_per_unit)
    }

    /// Run `op` in a fresh transaction under the single-writer lock and
    /// commit it. Conflicting commits are retried with exponential backoff;
    /// any other error drops the transaction, discarding its writes.
    fn write<T>(
        &self,
        operation: &str,
        op: impl FnMut(&mut dyn LedgerTransaction, &ValuationEngine) -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        let _writer = self.writer.lock();
        let settings = self.get_settings();
        self.run(operation, &settings, op)
    }

    /// The retry loop behind [`write`](Self::write), under `settings`. The
    /// caller holds the writer lock.
    fn run<T>(
        &self,
        operation: &str,
        settings: &Settings,
        mut op: impl FnMut(&mut dyn LedgerTransaction, &ValuationEngine) -> Result<T, CoreError>,
    ) -> Result<T, CoreError> {
        let valuation = ValuationEngine::new(settings.bootstrap_price_per_unit);

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            let outcome = self.repository.begin().and_then(|mut tx| {
                let value = op(tx.as_mut(), &valuation)?;
                tx.commit()?;
                Ok(value)
            });

            match outcome {
                Err(e) if e.is_retryable() => {
                    if attempt > settings.max_conflict_retries {
                        warn!("{operation}: giving up after {attempt} attempts: {e}");
                        return Err(CoreError::ConflictRetriesExhausted { attempts: attempt });
                    }
                    let backoff = settings.backoff_for(attempt);
                    warn!(
                        "{operation}: {e}; retry {attempt}/{} in {backoff:?}",
                        settings.max_conflict_retries
                    );
                    std::thread::sleep(backoff);
                }
                other => return other,
            }
        }
    }
}

/// Earliest genesis date across all accounts.
fn earliest_genesis<R: LedgerReader + ?Sized>(reader: &R) -> Result<NaiveDate, CoreError> {
    Ok(reader
        .load_accounts()?
        .iter()
        .map(|a| a.opened_on)
        .min()
        .unwrap_or(NaiveDate::MIN))
}

fn breaks_identity(mark: &Mark, epsilon: Decimal) -> bool {
    if mark.total_units.is_zero() {
        return mark.total_net_worth > epsilon;
    }
    (mark.total_units * mark.price_per_unit - mark.total_net_worth).abs() > epsilon
}
