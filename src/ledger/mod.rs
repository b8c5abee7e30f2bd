//! Donation ledger: collections (money in), expenses (money out), totals and
//! balance.

mod model;
mod store;
mod gate;

pub use model::{
    Collection, CollectionPatch, Expense, ExpensePatch, LedgerEntry, LedgerSummary, NewCollection, NewExpense,
};
pub use store::LedgerStore;
pub use gate::AdminLedger;
