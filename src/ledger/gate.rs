use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::identity::SessionAuthority;

use super::model::{Collection, CollectionPatch, Expense, ExpensePatch, LedgerSummary, NewCollection, NewExpense};
use super::store::LedgerStore;

/// Ledger access for a client process: reads are open, mutations require the
/// session authority to report an authorized admin.
#[derive(Clone)]
pub struct AdminLedger {
    store: Arc<LedgerStore>,
    authority: SessionAuthority,
}

impl AdminLedger {
    pub fn new(store: Arc<LedgerStore>, authority: SessionAuthority) -> Self {
        Self { store, authority }
    }

    pub fn can_mutate(&self) -> bool {
        self.authority.is_authorized()
    }

    fn require_admin(&self, action: &str) -> AppResult<()> {
        if self.authority.is_authorized() {
            return Ok(());
        }
        warn!(target: "ledger", action, "mutation rejected: not authorized");
        Err(AppError::auth("not_authorized", "admin login required"))
    }

    pub fn collections(&self) -> Vec<Collection> { self.store.list_collections() }
    pub fn expenses(&self) -> Vec<Expense> { self.store.list_expenses() }
    pub fn summary(&self) -> LedgerSummary { self.store.summary() }

    pub fn add_collection(&self, new: NewCollection) -> AppResult<Collection> {
        self.require_admin("add_collection")?;
        self.store.insert_collection(new)
    }

    pub fn edit_collection(&self, id: Uuid, patch: CollectionPatch) -> AppResult<Collection> {
        self.require_admin("edit_collection")?;
        self.store.update_collection(id, patch)
    }

    pub fn remove_collection(&self, id: Uuid) -> AppResult<Collection> {
        self.require_admin("remove_collection")?;
        self.store.delete_collection(id)
    }

    pub fn add_expense(&self, new: NewExpense) -> AppResult<Expense> {
        self.require_admin("add_expense")?;
        self.store.insert_expense(new)
    }

    pub fn edit_expense(&self, id: Uuid, patch: ExpensePatch) -> AppResult<Expense> {
        self.require_admin("edit_expense")?;
        self.store.update_expense(id, patch)
    }

    pub fn remove_expense(&self, id: Uuid) -> AppResult<Expense> {
        self.require_admin("remove_expense")?;
        self.store.delete_expense(id)
    }
}
