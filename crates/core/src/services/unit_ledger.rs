use chrono::NaiveDate;
use log::debug;
use rust_decimal::Decimal;
use std::collections::BTreeSet;

use crate::errors::CoreError;
use crate::models::unit_ledger::UnitLedgerEntry;
use crate::storage::traits::{LedgerReader, LedgerTransaction};

/// Process-wide running total of outstanding units.
///
/// Each entry holds the total from its date until the next entry. A new fund
/// flow moves it through [`apply_delta`](UnitLedger::apply_delta); when a
/// backdated entry changes the price later flows converted at, the
/// recomputation [`rebuild`](UnitLedger::rebuild)s it from the re-derived
/// conversions.
pub struct UnitLedger;

impl UnitLedger {
    pub fn new() -> Self {
        Self
    }

    /// Units outstanding as of `date`; zero before the first entry.
    pub fn units_outstanding<R: LedgerReader + ?Sized>(
        &self,
        reader: &R,
        date: NaiveDate,
    ) -> Result<Decimal, CoreError> {
        Ok(units_at(&reader.load_unit_ledger()?, date))
    }

    /// Add `delta` to the total from `date` forward.
    ///
    /// Writes the entry for `date` plus every later entry it shifts. Fails
    /// with `NegativeUnits` before writing anything if any total would drop
    /// below zero. Returns the new total on `date`.
    pub fn apply_delta(
        &self,
        tx: &mut dyn LedgerTransaction,
        date: NaiveDate,
        delta: Decimal,
    ) -> Result<Decimal, CoreError> {
        let entries = tx.load_unit_ledger()?;
        let shifted = shift_from(&entries, date, delta)?;

        for entry in &shifted {
            tx.save_unit_ledger_entry(entry)?;
        }

        let total = shifted
            .first()
            .map(|e| e.total_units)
            .unwrap_or_else(|| units_at(&entries, date));
        debug!(
            "Unit ledger {delta:+} on {date}: total {total}, {} entries written",
            shifted.len()
        );
        Ok(total)
    }

    /// Replace the stored entries with `entries` (sorted by date) if they
    /// differ. Returns the earliest date whose entry changed.
    pub fn rebuild(
        &self,
        tx: &mut dyn LedgerTransaction,
        entries: &[UnitLedgerEntry],
    ) -> Result<Option<NaiveDate>, CoreError> {
        let stored = tx.load_unit_ledger()?;
        let changed = first_difference(&stored, entries);
        if let Some(date) = changed {
            tx.replace_unit_ledger(entries)?;
            debug!("Unit ledger rebuilt from {date}: {} entries", entries.len());
        }
        Ok(changed)
    }
}

impl Default for UnitLedger {
    fn default() -> Self {
        Self::new()
    }
}

/// Forward-filled total at `date` over date-sorted entries.
pub(crate) fn units_at(entries: &[UnitLedgerEntry], date: NaiveDate) -> Decimal {
    let idx = entries.partition_point(|e| e.date <= date);
    idx.checked_sub(1)
        .map(|i| entries[i].total_units)
        .unwrap_or(Decimal::ZERO)
}

fn first_difference(
    stored: &[UnitLedgerEntry],
    derived: &[UnitLedgerEntry],
) -> Option<NaiveDate> {
    fn entry_on(entries: &[UnitLedgerEntry], date: NaiveDate) -> Option<Decimal> {
        entries
            .binary_search_by_key(&date, |e| e.date)
            .ok()
            .map(|i| entries[i].total_units)
    }

    stored
        .iter()
        .chain(derived)
        .map(|e| e.date)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .find(|&date| entry_on(stored, date) != entry_on(derived, date))
}

/// Entries that change when `delta` takes effect on `date`: the entry for
/// `date` itself (created from the forward-filled total if missing) followed
/// by every later entry, each moved by `delta`.
pub(crate) fn shift_from(
    entries: &[UnitLedgerEntry],
    date: NaiveDate,
    delta: Decimal,
) -> Result<Vec<UnitLedgerEntry>, CoreError> {
    let start = entries.partition_point(|e| e.date < date);
    let mut shifted = Vec::with_capacity(entries.len() - start + 1);

    let later = match entries.get(start) {
        Some(existing) if existing.date == date => {
            shifted.push(UnitLedgerEntry::new(date, existing.total_units + delta));
            &entries[start + 1..]
        }
        _ => {
            shifted.push(UnitLedgerEntry::new(date, units_at(entries, date) + delta));
            &entries[start..]
        }
    };

    shifted.extend(
        later
            .iter()
            .map(|e| UnitLedgerEntry::new(e.date, e.total_units + delta)),
    );

    if let Some(negative) = shifted.iter().find(|e| e.total_units < Decimal::ZERO) {
        return Err(CoreError::NegativeUnits {
            date: negative.date,
            units: negative.total_units,
        });
    }

    Ok(shifted)
}
