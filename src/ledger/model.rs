use chrono::{DateTime, NaiveDate, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AppError, AppResult};

/// Common shape of ledger rows: money in, or money out.
pub trait LedgerEntry: Clone + Serialize + DeserializeOwned + Send + Sync {
    const KIND: &'static str;
    fn id(&self) -> Uuid;
    fn amount(&self) -> f64;
    fn entry_date(&self) -> NaiveDate;
    fn created_at(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Collection {
    pub id: Uuid,
    pub donor_name: String,
    pub amount: f64,
    pub description: Option<String>,
    pub collection_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Expense {
    pub id: Uuid,
    pub title: String,
    pub amount: f64,
    pub description: Option<String>,
    pub expense_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

impl LedgerEntry for Collection {
    const KIND: &'static str = "collection";
    fn id(&self) -> Uuid { self.id }
    fn amount(&self) -> f64 { self.amount }
    fn entry_date(&self) -> NaiveDate { self.collection_date }
    fn created_at(&self) -> DateTime<Utc> { self.created_at }
}

impl LedgerEntry for Expense {
    const KIND: &'static str = "expense";
    fn id(&self) -> Uuid { self.id }
    fn amount(&self) -> f64 { self.amount }
    fn entry_date(&self) -> NaiveDate { self.expense_date }
    fn created_at(&self) -> DateTime<Utc> { self.created_at }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NewCollection {
    pub donor_name: String,
    pub amount: f64,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub collection_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NewExpense {
    pub title: String,
    pub amount: f64,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub expense_date: Option<NaiveDate>,
}

/// Partial update. A blank `description` clears it.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct CollectionPatch {
    pub donor_name: Option<String>,
    pub amount: Option<f64>,
    pub description: Option<String>,
    pub collection_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ExpensePatch {
    pub title: Option<String>,
    pub amount: Option<f64>,
    pub description: Option<String>,
    pub expense_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LedgerSummary {
    pub total_collected: f64,
    pub total_spent: f64,
    pub balance: f64,
    pub collection_count: usize,
    pub expense_count: usize,
}

fn required_text(field: &str, value: &str) -> AppResult<String> {
    let v = value.trim();
    if v.is_empty() {
        return Err(AppError::user(format!("missing_{}", field), format!("{} is required", field)));
    }
    Ok(v.to_string())
}

fn valid_amount(value: f64) -> AppResult<f64> {
    if !value.is_finite() || value < 0.0 {
        return Err(AppError::user("invalid_amount".to_string(), format!("amount must be a non-negative number, got {}", value)));
    }
    Ok(value)
}

fn optional_text(value: Option<String>) -> Option<String> {
    value.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

impl NewCollection {
    pub fn into_record(self, today: NaiveDate) -> AppResult<Collection> {
        Ok(Collection {
            id: Uuid::new_v4(),
            donor_name: required_text("donor_name", &self.donor_name)?,
            amount: valid_amount(self.amount)?,
            description: optional_text(self.description),
            collection_date: self.collection_date.unwrap_or(today),
            created_at: Utc::now(),
        })
    }
}

impl NewExpense {
    pub fn into_record(self, today: NaiveDate) -> AppResult<Expense> {
        Ok(Expense {
            id: Uuid::new_v4(),
            title: required_text("title", &self.title)?,
            amount: valid_amount(self.amount)?,
            description: optional_text(self.description),
            expense_date: self.expense_date.unwrap_or(today),
            created_at: Utc::now(),
        })
    }
}

impl CollectionPatch {
    /// Validates every field before touching `row`.
    pub fn apply(self, row: &mut Collection) -> AppResult<()> {
        let donor_name = self.donor_name.as_deref().map(|v| required_text("donor_name", v)).transpose()?;
        let amount = self.amount.map(valid_amount).transpose()?;
        if let Some(v) = donor_name { row.donor_name = v; }
        if let Some(v) = amount { row.amount = v; }
        if self.description.is_some() { row.description = optional_text(self.description); }
        if let Some(d) = self.collection_date { row.collection_date = d; }
        Ok(())
    }
}

impl ExpensePatch {
    pub fn apply(self, row: &mut Expense) -> AppResult<()> {
        let title = self.title.as_deref().map(|v| required_text("title", v)).transpose()?;
        let amount = self.amount.map(valid_amount).transpose()?;
        if let Some(v) = title { row.title = v; }
        if let Some(v) = amount { row.amount = v; }
        if self.description.is_some() { row.description = optional_text(self.description); }
        if let Some(d) = self.expense_date { row.expense_date = d; }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate { s.parse().unwrap() }

    #[test]
    fn new_collection_trims_and_defaults() {
        let c = NewCollection {
            donor_name: "  Rahim ".into(),
            amount: 500.0,
            description: Some("   ".into()),
            collection_date: None,
        }
        .into_record(day("2024-03-01"))
        .unwrap();
        assert_eq!(c.donor_name, "Rahim");
        assert_eq!(c.description, None);
        assert_eq!(c.collection_date, day("2024-03-01"));
    }

    #[test]
    fn new_records_reject_bad_input() {
        let blank = NewExpense { title: " ".into(), amount: 10.0, ..Default::default() };
        assert_eq!(blank.into_record(day("2024-03-01")).unwrap_err().code_str(), "missing_title");
        for amount in [-1.0, f64::NAN, f64::INFINITY] {
            let e = NewCollection { donor_name: "x".into(), amount, ..Default::default() };
            assert_eq!(e.into_record(day("2024-03-01")).unwrap_err().code_str(), "invalid_amount");
        }
    }

    #[test]
    fn patch_is_all_or_nothing() {
        let mut row = NewExpense { title: "Rice".into(), amount: 20.0, description: Some("5kg".into()), ..Default::default() }
            .into_record(day("2024-03-01"))
            .unwrap();
        let bad = ExpensePatch { title: Some("Oil".into()), amount: Some(-3.0), ..Default::default() };
        assert!(bad.apply(&mut row).is_err());
        assert_eq!(row.title, "Rice");

        let good = ExpensePatch { amount: Some(25.5), description: Some(String::new()), ..Default::default() };
        good.apply(&mut row).unwrap();
        assert_eq!(row.amount, 25.5);
        assert_eq!(row.description, None);
    }
}
