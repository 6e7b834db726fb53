use parking_lot::RwLock;
use std::sync::Arc;

use crate::errors::CoreError;
use crate::models::account::{Account, AccountId};
use crate::models::account_mark::AccountMark;
use crate::models::book::Book;
use crate::models::fund_flow::{AccountUnits, FundFlowEvent};
use crate::models::ledger::LedgerEntry;
use crate::models::mark::Mark;
use crate::models::unit_ledger::UnitLedgerEntry;

use super::manager::StorageManager;
use super::traits::{LedgerReader, LedgerRepository, LedgerTransaction};

impl LedgerReader for Book {
    fn load_accounts(&self) -> Result<Vec<Account>, CoreError> {
        Ok(self.accounts.clone())
    }

    fn load_account_marks(&self, account_id: &AccountId) -> Result<Vec<AccountMark>, CoreError> {
        Ok(self.account_marks.get(account_id).cloned().unwrap_or_default())
    }

    fn load_fund_flow_events(
        &self,
        account_id: &AccountId,
    ) -> Result<Vec<FundFlowEvent>, CoreError> {
        let mut events: Vec<FundFlowEvent> = self
            .fund_flows
            .iter()
            .filter(|e| &e.account_id == account_id)
            .cloned()
            .collect();
        // Stable: same-day flows stay in the order they were recorded
        events.sort_by_key(|e| e.date);
        Ok(events)
    }

    fn load_account_units(&self, account_id: &AccountId) -> Result<Vec<AccountUnits>, CoreError> {
        let mut units: Vec<AccountUnits> = self
            .account_units
            .iter()
            .filter(|u| &u.account_id == account_id)
            .cloned()
            .collect();
        units.sort_by_key(|u| u.date);
        Ok(units)
    }

    fn load_unit_ledger(&self) -> Result<Vec<UnitLedgerEntry>, CoreError> {
        Ok(self.unit_ledger.clone())
    }

    fn load_marks(&self) -> Result<Vec<Mark>, CoreError> {
        Ok(self.marks.clone())
    }

    fn load_ledger_entries(&self) -> Result<Vec<LedgerEntry>, CoreError> {
        let mut entries = self.ledger.clone();
        entries.sort_by_key(|e| e.date);
        Ok(entries)
    }
}

/// Reference persistence collaborator holding the whole book in memory.
///
/// Readers always see the last committed `Book` (a shared `Arc`, so a view
/// stays consistent for as long as it is held); a transaction works on a
/// private copy that replaces it atomically on commit. Commits are
/// optimistic: if another transaction committed after this one began, the
/// commit fails with `RecomputationConflict` and nothing is published.
#[derive(Debug, Default)]
pub struct InMemoryRepository {
    committed: RwLock<Arc<Book>>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_book(book: Book) -> Self {
        Self {
            committed: RwLock::new(Arc::new(book)),
        }
    }

    /// The currently committed book.
    #[must_use]
    pub fn snapshot(&self) -> Arc<Book> {
        Arc::clone(&*self.committed.read())
    }

    /// Encrypt the committed book to portable bytes.
    pub fn save_to_bytes(&self, password: &str) -> Result<Vec<u8>, CoreError> {
        StorageManager::save_to_bytes(&self.snapshot(), password)
    }

    /// Restore a repository from bytes produced by [`save_to_bytes`](Self::save_to_bytes).
    pub fn load_from_bytes(encrypted: &[u8], password: &str) -> Result<Self, CoreError> {
        let book = StorageManager::load_from_bytes(encrypted, password)?;
        Ok(Self::from_book(book))
    }

    /// Save the committed book to an encrypted file on disk.
    pub fn save_to_file(&self, path: &str, password: &str) -> Result<(), CoreError> {
        StorageManager::save_to_file(&self.snapshot(), path, password)
    }

    /// Load a repository from an encrypted file on disk.
    pub fn load_from_file(path: &str, password: &str) -> Result<Self, CoreError> {
        let book = StorageManager::load_from_file(path, password)?;
        Ok(Self::from_book(book))
    }
}

impl LedgerRepository for InMemoryRepository {
    fn read_view(&self) -> Result<Box<dyn LedgerReader + '_>, CoreError> {
        Ok(Box::new(self.snapshot()))
    }

    fn begin(&self) -> Result<Box<dyn LedgerTransaction + '_>, CoreError> {
        let base = self.snapshot();
        Ok(Box::new(MemoryTransaction {
            repository: self,
            base_version: base.version,
            staged: Book::clone(&base),
        }))
    }
}

struct MemoryTransaction<'a> {
    repository: &'a InMemoryRepository,
    base_version: u64,
    staged: Book,
}

impl LedgerReader for MemoryTransaction<'_> {
    fn load_accounts(&self) -> Result<Vec<Account>, CoreError> {
        self.staged.load_accounts()
    }

    fn load_account_marks(&self, account_id: &AccountId) -> Result<Vec<AccountMark>, CoreError> {
        self.staged.load_account_marks(account_id)
    }

    fn load_fund_flow_events(
        &self,
        account_id: &AccountId,
    ) -> Result<Vec<FundFlowEvent>, CoreError> {
        self.staged.load_fund_flow_events(account_id)
    }

    fn load_account_units(&self, account_id: &AccountId) -> Result<Vec<AccountUnits>, CoreError> {
        self.staged.load_account_units(account_id)
    }

    fn load_unit_ledger(&self) -> Result<Vec<UnitLedgerEntry>, CoreError> {
        self.staged.load_unit_ledger()
    }

    fn load_marks(&self) -> Result<Vec<Mark>, CoreError> {
        self.staged.load_marks()
    }

    fn load_ledger_entries(&self) -> Result<Vec<LedgerEntry>, CoreError> {
        self.staged.load_ledger_entries()
    }
}

impl LedgerTransaction for MemoryTransaction<'_> {
    fn save_account(&mut self, account: &Account) -> Result<(), CoreError> {
        self.staged.upsert_account(account.clone());
        Ok(())
    }

    fn save_account_mark(&mut self, mark: &AccountMark) -> Result<(), CoreError> {
        self.staged.upsert_account_mark(mark.clone());
        Ok(())
    }

    fn save_fund_flow_event(&mut self, event: &FundFlowEvent) -> Result<(), CoreError> {
        if self.staged.fund_flows.iter().any(|e| e.id == event.id) {
            return Err(CoreError::Persistence(format!(
                "Fund flow {} already recorded",
                event.id
            )));
        }
        self.staged.fund_flows.push(event.clone());
        Ok(())
    }

    fn save_account_units(&mut self, units: &AccountUnits) -> Result<(), CoreError> {
        self.staged.account_units.push(units.clone());
        Ok(())
    }

    fn replace_account_units(
        &mut self,
        account_id: &AccountId,
        rows: &[AccountUnits],
    ) -> Result<(), CoreError> {
        self.staged.replace_account_units(account_id, rows);
        Ok(())
    }

    fn save_unit_ledger_entry(&mut self, entry: &UnitLedgerEntry) -> Result<(), CoreError> {
        self.staged.upsert_unit_ledger_entry(entry.clone());
        Ok(())
    }

    fn replace_unit_ledger(&mut self, entries: &[UnitLedgerEntry]) -> Result<(), CoreError> {
        let mut entries = entries.to_vec();
        entries.sort_by_key(|e| e.date);
        self.staged.unit_ledger = entries;
        Ok(())
    }

    fn upsert_mark(&mut self, mark: &Mark) -> Result<(), CoreError> {
        self.staged.upsert_mark(mark.clone());
        Ok(())
    }

    fn append_ledger_entry(&mut self, entry: &LedgerEntry) -> Result<(), CoreError> {
        self.staged.ledger.push(entry.clone());
        Ok(())
    }

    fn commit(self: Box<Self>) -> Result<(), CoreError> {
        let MemoryTransaction {
            repository,
            base_version,
            mut staged,
        } = *self;

        let mut committed = repository.committed.write();
        if committed.version != base_version {
            return Err(CoreError::RecomputationConflict(format!(
                "book moved from version {base_version} to {} during the transaction",
                committed.version
            )));
        }
        staged.version = base_version + 1;
        *committed = Arc::new(staged);
        Ok(())
    }
}
