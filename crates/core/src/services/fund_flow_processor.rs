use chrono::NaiveDate;
use log::info;
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap};

use crate::errors::CoreError;
use crate::models::account::{Account, AccountId};
use crate::models::fund_flow::{
    AccountUnits, FundFlowEvent, FundFlowReceipt, FundFlowRequest, TransferReceipt,
    TransferRequest,
};
use crate::models::ledger::{LedgerCategory, CATEGORY_TRANSFER};
use crate::models::unit_ledger::UnitLedgerEntry;
use crate::services::account_mark_store::AccountMarkStore;
use crate::services::ledger_journal::LedgerJournal;
use crate::services::unit_ledger::UnitLedger;
use crate::services::valuation_engine::{CancelFlag, ValuationEngine, ValuationInputs};
use crate::storage::traits::{LedgerReader, LedgerTransaction};

/// Converts dated cash amounts into unit deltas at the prevailing price per
/// unit and applies them to the unit ledger and the journal.
///
/// Everything runs inside the caller's transaction: an error at any step
/// leaves nothing behind once the transaction is dropped.
pub struct FundFlowProcessor {
    unit_ledger: UnitLedger,
    journal: LedgerJournal,
}

impl FundFlowProcessor {
    pub fn new() -> Self {
        Self {
            unit_ledger: UnitLedger::new(),
            journal: LedgerJournal::new(),
        }
    }

    /// Deposit (`amount > 0`) into or withdraw (`amount < 0`) from an account.
    pub fn apply(
        &self,
        tx: &mut dyn LedgerTransaction,
        valuation: &ValuationEngine,
        request: &FundFlowRequest,
        cancel: &CancelFlag,
    ) -> Result<FundFlowReceipt, CoreError> {
        if request.amount.is_zero() {
            return Err(CoreError::InvalidAmount(
                "Fund flow amount must not be zero".into(),
            ));
        }
        let account = find_account(&*tx, &request.account_id)?;
        AccountMarkStore::check_date(&account, request.date)?;

        let price = self.price_for(&*tx, valuation, request.date)?;
        let event = self.post(tx, &account, request, price)?;
        let recompute = valuation.recompute_from(tx, request.date, cancel)?;

        let units = converted(&*tx, &event)?;
        let units_outstanding = self.unit_ledger.units_outstanding(&*tx, request.date)?;
        info!(
            "Fund flow {} for '{}' on {}: {} units at {}",
            request.amount, account.name, request.date, units.units, units.price_per_unit
        );

        Ok(FundFlowReceipt {
            event,
            units,
            units_outstanding,
            recompute,
        })
    }

    /// Move cash from one account to another on one date.
    ///
    /// Both legs convert at the same price, so units outstanding and price
    /// per unit are unchanged by the transfer itself.
    pub fn transfer(
        &self,
        tx: &mut dyn LedgerTransaction,
        valuation: &ValuationEngine,
        request: &TransferRequest,
        cancel: &CancelFlag,
    ) -> Result<TransferReceipt, CoreError> {
        let TransferRequest {
            from,
            to,
            date,
            amount,
            note,
        } = request;
        if *amount <= Decimal::ZERO {
            return Err(CoreError::InvalidAmount(format!(
                "Transfer amount must be positive, got {amount}"
            )));
        }
        if from == to {
            return Err(CoreError::ValidationError(
                "Cannot transfer between an account and itself".into(),
            ));
        }

        let source = find_account(&*tx, from)?;
        let target = find_account(&*tx, to)?;
        AccountMarkStore::check_date(&source, *date)?;
        AccountMarkStore::check_date(&target, *date)?;

        let price = self.price_for(&*tx, valuation, *date)?;
        let out = FundFlowRequest::new(*from, *date, -*amount, note.as_str())
            .with_category(CATEGORY_TRANSFER);
        let into = FundFlowRequest::new(*to, *date, *amount, note.as_str())
            .with_category(CATEGORY_TRANSFER);
        let withdrawal = self.post(tx, &source, &out, price)?;
        let deposit = self.post(tx, &target, &into, price)?;
        valuation.recompute_from(tx, *date, cancel)?;

        let moved = converted(&*tx, &deposit)?;
        info!(
            "Transfer {amount} from '{}' to '{}' on {date} at {}",
            source.name, target.name, moved.price_per_unit
        );

        Ok(TransferReceipt {
            withdrawal,
            deposit,
            price_per_unit: moved.price_per_unit,
            units_moved: moved.units,
        })
    }

    /// Units held by one account: the sum of its unit deltas.
    pub fn account_units<R: LedgerReader + ?Sized>(
        &self,
        reader: &R,
        account_id: &AccountId,
    ) -> Result<Decimal, CoreError> {
        Ok(reader
            .load_account_units(account_id)?
            .iter()
            .map(|u| u.units)
            .sum())
    }

    /// Price a flow on `date` converts at. Must be positive.
    fn price_for<R: LedgerReader + ?Sized>(
        &self,
        reader: &R,
        valuation: &ValuationEngine,
        date: NaiveDate,
    ) -> Result<Decimal, CoreError> {
        let price = valuation.price_per_unit_at(reader, date)?;
        if price <= Decimal::ZERO {
            return Err(CoreError::NonPositivePrice { date, price });
        }
        Ok(price)
    }

    /// Write the event, its unit row, its journal line and its unit delta.
    fn post(
        &self,
        tx: &mut dyn LedgerTransaction,
        account: &Account,
        request: &FundFlowRequest,
        price: Decimal,
    ) -> Result<FundFlowEvent, CoreError> {
        let FundFlowRequest {
            date,
            amount,
            note,
            category_id,
            ..
        } = request;
        let units_delta = to_units(*amount, price)?;

        let history = tx.load_account_units(&account.id)?;
        check_account_units(&history, *date, units_delta)?;

        let event = FundFlowEvent::new(account.id, *date, *amount, note.as_str());
        let units = AccountUnits {
            event_id: Some(event.id),
            account_id: account.id,
            date: *date,
            units: units_delta,
            amount: *amount,
            price_per_unit: price,
            note: event.note.clone(),
        };
        let category = category_id.unwrap_or_else(|| LedgerCategory::for_amount(*amount));

        tx.save_fund_flow_event(&event)?;
        tx.save_account_units(&units)?;
        self.journal.record(tx, &event, category)?;
        self.unit_ledger.apply_delta(tx, *date, units_delta)?;
        Ok(event)
    }
}

impl Default for FundFlowProcessor {
    fn default() -> Self {
        Self::new()
    }
}

/// Unit rows and running totals derived from every fund flow on record.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conversion {
    pub account_units: HashMap<AccountId, Vec<AccountUnits>>,
    pub unit_ledger: Vec<UnitLedgerEntry>,
}

impl Conversion {
    #[must_use]
    pub fn rows_for(&self, account_id: &AccountId) -> &[AccountUnits] {
        self.account_units
            .get(account_id)
            .map_or(&[][..], Vec::as_slice)
    }

    fn issue(&mut self, row: AccountUnits, holdings: &mut BTreeMap<AccountId, Decimal>) {
        *holdings.entry(row.account_id).or_default() += row.units;
        self.account_units.entry(row.account_id).or_default().push(row);
    }
}

/// Replay every fund flow in date order and convert it into units.
///
/// On each date, the day's flows all convert at the price before any of
/// them: net worth with that day's flows taken out over units outstanding,
/// or the bootstrap price while no units are outstanding. A deposit and an
/// equal withdrawal on one date therefore cancel out.
///
/// While no units are outstanding and net worth is positive, units are
/// first seeded at the bootstrap price so that units equal net worth over
/// the bootstrap price. The seed is split across the active accounts with
/// a positive balance.
///
/// Fails with `NonPositivePrice` if some flow would convert at a price at
/// or below zero, and with `NegativeUnits` if an account's holding or the
/// total would drop below zero at the end of any date.
pub fn convert_flows(
    inputs: &ValuationInputs,
    bootstrap_price: Decimal,
) -> Result<Conversion, CoreError> {
    let mut conversion = Conversion::default();
    let mut total = Decimal::ZERO;

    for date in inputs.event_dates() {
        let active: Vec<&Account> = inputs
            .accounts()
            .iter()
            .filter(|a| a.is_active_on(date))
            .collect();
        let balances: Vec<(AccountId, Decimal)> = active
            .iter()
            .filter_map(|a| inputs.balance_before_flows(&a.id, date).map(|b| (a.id, b)))
            .collect();
        let net_worth: Decimal = balances.iter().map(|(_, b)| *b).sum();

        let mut holdings = BTreeMap::new();
        let seeded = total.is_zero() && net_worth > Decimal::ZERO;
        if seeded {
            let positive: Decimal = balances
                .iter()
                .map(|(_, b)| *b)
                .filter(|b| *b > Decimal::ZERO)
                .sum();
            for &(account_id, balance) in balances.iter().filter(|(_, b)| *b > Decimal::ZERO) {
                let cash = if net_worth == positive {
                    balance
                } else {
                    balance * (net_worth / positive)
                };
                let units = to_units(cash, bootstrap_price)?;
                total += units;
                conversion.issue(
                    AccountUnits {
                        event_id: None,
                        account_id,
                        date,
                        units,
                        amount: cash,
                        price_per_unit: bootstrap_price,
                        note: "Genesis".into(),
                    },
                    &mut holdings,
                );
            }
        }

        let mut day_flows: Vec<&FundFlowEvent> = Vec::new();
        for account in inputs.accounts() {
            let mut own: Vec<&FundFlowEvent> = inputs
                .flows(&account.id)
                .iter()
                .filter(|f| f.date == date)
                .collect();
            // Fixed order keeps the unit sums independent of insertion order
            own.sort_by_key(|f| f.amount);
            day_flows.extend(own);
        }

        if !day_flows.is_empty() {
            let price = if seeded || total.is_zero() {
                bootstrap_price
            } else {
                net_worth.checked_div(total).ok_or_else(|| {
                    CoreError::ValidationError(format!(
                        "Price per unit overflows on {date}: {net_worth} / {total}"
                    ))
                })?
            };
            if price <= Decimal::ZERO {
                return Err(CoreError::NonPositivePrice { date, price });
            }

            for flow in day_flows.iter().copied() {
                let units = to_units(flow.amount, price)?;
                total += units;
                conversion.issue(
                    AccountUnits {
                        event_id: Some(flow.id),
                        account_id: flow.account_id,
                        date,
                        units,
                        amount: flow.amount,
                        price_per_unit: price,
                        note: flow.note.clone(),
                    },
                    &mut holdings,
                );
            }
        }

        if !seeded && day_flows.is_empty() {
            continue;
        }
        for account_id in holdings.keys() {
            let held: Decimal = conversion.rows_for(account_id).iter().map(|u| u.units).sum();
            if held < Decimal::ZERO {
                return Err(CoreError::NegativeUnits { date, units: held });
            }
        }
        if total < Decimal::ZERO {
            return Err(CoreError::NegativeUnits { date, units: total });
        }
        conversion.unit_ledger.push(UnitLedgerEntry::new(date, total));
    }

    Ok(conversion)
}

pub(crate) fn find_account<R: LedgerReader + ?Sized>(
    reader: &R,
    account_id: &AccountId,
) -> Result<Account, CoreError> {
    reader
        .load_accounts()?
        .into_iter()
        .find(|a| &a.id == account_id)
        .ok_or_else(|| CoreError::AccountNotFound(account_id.to_string()))
}

/// The stored conversion of one fund flow.
fn converted<R: LedgerReader + ?Sized>(
    reader: &R,
    event: &FundFlowEvent,
) -> Result<AccountUnits, CoreError> {
    reader
        .load_account_units(&event.account_id)?
        .into_iter()
        .find(|u| u.event_id == Some(event.id))
        .ok_or_else(|| {
            CoreError::Persistence(format!("No unit conversion stored for fund flow {}", event.id))
        })
}

fn to_units(amount: Decimal, price: Decimal) -> Result<Decimal, CoreError> {
    amount
        .checked_div(price)
        .ok_or_else(|| CoreError::InvalidAmount(format!("{amount} at {price} per unit overflows")))
}

/// The account's own holding must stay non-negative at the end of every
/// date from `date` onwards once `delta` is added on `date`.
fn check_account_units(
    history: &[AccountUnits],
    date: NaiveDate,
    delta: Decimal,
) -> Result<(), CoreError> {
    let mut per_day: BTreeMap<NaiveDate, Decimal> = BTreeMap::new();
    for row in history {
        *per_day.entry(row.date).or_default() += row.units;
    }
    *per_day.entry(date).or_default() += delta;

    let mut running = Decimal::ZERO;
    for (day, units) in per_day {
        running += units;
        if day >= date && running < Decimal::ZERO {
            return Err(CoreError::NegativeUnits {
                date: day,
                units: running,
            });
        }
    }
    Ok(())
}
