use chrono::Utc;
use uuid::Uuid;

use crate::errors::CoreError;
use crate::models::account::AccountId;
use crate::models::fund_flow::FundFlowEvent;
use crate::models::ledger::{LedgerCategory, LedgerEntry};
use crate::storage::traits::{LedgerReader, LedgerTransaction};

/// Append-only audit record of every cash-affecting event.
pub struct LedgerJournal;

impl LedgerJournal {
    pub fn new() -> Self {
        Self
    }

    /// Append the journal line for a fund flow. Unknown categories are rejected.
    pub fn record(
        &self,
        tx: &mut dyn LedgerTransaction,
        event: &FundFlowEvent,
        category_id: u32,
    ) -> Result<LedgerEntry, CoreError> {
        if LedgerCategory::by_id(category_id).is_none() {
            return Err(CoreError::ValidationError(format!(
                "Unknown ledger category {category_id}"
            )));
        }

        let entry = LedgerEntry {
            id: Uuid::new_v4(),
            event_id: event.id,
            account_id: event.account_id,
            date: event.date,
            amount: event.amount,
            category_id,
            note: event.note.clone(),
            recorded_at: Utc::now(),
        };
        tx.append_ledger_entry(&entry)?;
        Ok(entry)
    }

    /// Every journal line, oldest date first.
    pub fn entries<R: LedgerReader + ?Sized>(
        &self,
        reader: &R,
    ) -> Result<Vec<LedgerEntry>, CoreError> {
        reader.load_ledger_entries()
    }

    pub fn entries_for_account<R: LedgerReader + ?Sized>(
        &self,
        reader: &R,
        account_id: &AccountId,
    ) -> Result<Vec<LedgerEntry>, CoreError> {
        let mut entries = reader.load_ledger_entries()?;
        entries.retain(|e| &e.account_id == account_id);
        Ok(entries)
    }

    #[must_use]
    pub fn categories(&self) -> Vec<LedgerCategory> {
        LedgerCategory::all()
    }

    pub fn category(&self, id: u32) -> Result<LedgerCategory, CoreError> {
        LedgerCategory::by_id(id)
            .ok_or_else(|| CoreError::ValidationError(format!("Unknown ledger category {id}")))
    }
}

impl Default for LedgerJournal {
    fn default() -> Self {
        Self::new()
    }
}
