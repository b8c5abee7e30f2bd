use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

use super::model::{
    Collection, CollectionPatch, Expense, ExpensePatch, LedgerEntry, LedgerSummary, NewCollection, NewExpense,
};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct LedgerData {
    #[serde(default)]
    collections: Vec<Collection>,
    #[serde(default)]
    expenses: Vec<Expense>,
}

/// Collections and expenses, optionally persisted to a JSON file. Every
/// mutation is applied to a copy, persisted, then swapped in, so a failed
/// write leaves the in-memory view unchanged.
pub struct LedgerStore {
    data: RwLock<LedgerData>,
    path: Option<PathBuf>,
}

/// Newest entry date first; same-day entries newest insert first.
fn sorted_desc<T: LedgerEntry>(rows: &[T]) -> Vec<T> {
    let mut out = rows.to_vec();
    out.sort_by(|a, b| {
        b.entry_date()
            .cmp(&a.entry_date())
            .then_with(|| b.created_at().cmp(&a.created_at()))
    });
    out
}

fn total<T: LedgerEntry>(rows: &[T]) -> f64 {
    rows.iter().map(|r| r.amount()).sum()
}

fn position<T: LedgerEntry>(rows: &[T], id: Uuid) -> AppResult<usize> {
    rows.iter()
        .position(|r| r.id() == id)
        .ok_or_else(|| AppError::not_found(format!("{}_not_found", T::KIND), format!("no {} with id {}", T::KIND, id)))
}

impl LedgerStore {
    pub fn in_memory() -> Self {
        Self { data: RwLock::new(LedgerData::default()), path: None }
    }

    pub fn open<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let data = if path.exists() {
            let bytes = std::fs::read(&path).with_context(|| format!("reading ledger file {}", path.display()))?;
            serde_json::from_slice(&bytes).with_context(|| format!("parsing ledger file {}", path.display()))?
        } else {
            LedgerData::default()
        };
        info!(
            target: "ledger",
            path = %path.display(),
            collections = data.collections.len(),
            expenses = data.expenses.len(),
            "ledger opened"
        );
        Ok(Self { data: RwLock::new(data), path: Some(path) })
    }

    fn persist(&self, data: &LedgerData) -> AppResult<()> {
        let Some(path) = &self.path else { return Ok(()); };
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let bytes = serde_json::to_vec_pretty(data)
            .map_err(|e| AppError::internal("ledger_encode".to_string(), e.to_string()))?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, path)?;
        debug!(target: "ledger", path = %path.display(), "ledger persisted");
        Ok(())
    }

    fn commit<R>(&self, f: impl FnOnce(&mut LedgerData) -> AppResult<R>) -> AppResult<R> {
        let mut guard = self.data.write();
        let mut next = guard.clone();
        let out = f(&mut next)?;
        self.persist(&next)?;
        *guard = next;
        Ok(out)
    }

    pub fn list_collections(&self) -> Vec<Collection> {
        sorted_desc(&self.data.read().collections)
    }

    pub fn list_expenses(&self) -> Vec<Expense> {
        sorted_desc(&self.data.read().expenses)
    }

    pub fn get_collection(&self, id: Uuid) -> AppResult<Collection> {
        let data = self.data.read();
        let i = position(&data.collections, id)?;
        Ok(data.collections[i].clone())
    }

    pub fn get_expense(&self, id: Uuid) -> AppResult<Expense> {
        let data = self.data.read();
        let i = position(&data.expenses, id)?;
        Ok(data.expenses[i].clone())
    }

    pub fn insert_collection(&self, new: NewCollection) -> AppResult<Collection> {
        let row = new.into_record(Utc::now().date_naive())?;
        self.commit(|d| {
            d.collections.push(row.clone());
            Ok(())
        })?;
        info!(target: "ledger", id = %row.id, amount = row.amount, "collection recorded");
        Ok(row)
    }

    pub fn insert_expense(&self, new: NewExpense) -> AppResult<Expense> {
        let row = new.into_record(Utc::now().date_naive())?;
        self.commit(|d| {
            d.expenses.push(row.clone());
            Ok(())
        })?;
        info!(target: "ledger", id = %row.id, amount = row.amount, "expense recorded");
        Ok(row)
    }

    pub fn update_collection(&self, id: Uuid, patch: CollectionPatch) -> AppResult<Collection> {
        self.commit(|d| {
            let i = position(&d.collections, id)?;
            patch.apply(&mut d.collections[i])?;
            Ok(d.collections[i].clone())
        })
    }

    pub fn update_expense(&self, id: Uuid, patch: ExpensePatch) -> AppResult<Expense> {
        self.commit(|d| {
            let i = position(&d.expenses, id)?;
            patch.apply(&mut d.expenses[i])?;
            Ok(d.expenses[i].clone())
        })
    }

    pub fn delete_collection(&self, id: Uuid) -> AppResult<Collection> {
        let row = self.commit(|d| {
            let i = position(&d.collections, id)?;
            Ok(d.collections.remove(i))
        })?;
        info!(target: "ledger", id = %id, "collection deleted");
        Ok(row)
    }

    pub fn delete_expense(&self, id: Uuid) -> AppResult<Expense> {
        let row = self.commit(|d| {
            let i = position(&d.expenses, id)?;
            Ok(d.expenses.remove(i))
        })?;
        info!(target: "ledger", id = %id, "expense deleted");
        Ok(row)
    }

    pub fn summary(&self) -> LedgerSummary {
        let data = self.data.read();
        let total_collected = total(&data.collections);
        let total_spent = total(&data.expenses);
        LedgerSummary {
            total_collected,
            total_spent,
            balance: total_collected - total_spent,
            collection_count: data.collections.len(),
            expense_count: data.expenses.len(),
        }
    }
}
