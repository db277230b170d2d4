// 🎯 Target Expander - monthly budget rows
//
// A target line spreads a monthly amount over every calendar month end
// between `start` and `end`. Expanded rows go through the same identity
// functions as actual rows.

use crate::error::{LedgerError, Result};
use crate::identity;
use crate::ledger::{LedgerRow, RowType};
use chrono::{Datelike, NaiveDate};
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, warn};

pub const TARGET_ACCOUNT: &str = "Target";
pub const TARGET_SOURCE_FILE: &str = "targets.csv";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TargetRecord {
    #[serde(default)]
    pub target_name: Option<String>,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub monthly_target_amount: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub sub_category: Option<String>,
}

fn text(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn month_end(year: i32, month: u32) -> Option<NaiveDate> {
    let (next_year, next_month) = if month == 12 { (year + 1, 1) } else { (year, month + 1) };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)?.pred_opt()
}

/// Every month end `d` with `start <= d <= end`
pub fn month_ends(start: NaiveDate, end: NaiveDate) -> Vec<NaiveDate> {
    let mut dates = Vec::new();
    let (mut year, mut month) = (start.year(), start.month());

    while let Some(date) = month_end(year, month) {
        if date > end {
            break;
        }
        if date >= start {
            dates.push(date);
        }
        if month == 12 {
            year += 1;
            month = 1;
        } else {
            month += 1;
        }
    }

    dates
}

/// Expand target lines into ledger rows
pub fn expand(records: &[TargetRecord], default_owner: &str) -> Result<Vec<LedgerRow>> {
    let mut rows = Vec::new();

    for (index, record) in records.iter().enumerate() {
        let Some(name) = text(&record.target_name) else {
            // blank line
            continue;
        };
        let label = format!("target {} (line {})", name, index + 2);

        let start = text(&record.start)
            .and_then(|raw| NaiveDate::parse_from_str(&raw, "%Y-%m-%d").ok())
            .ok_or_else(|| LedgerError::coercion(&label, "start", text(&record.start).unwrap_or_default()))?;
        let end = text(&record.end)
            .and_then(|raw| NaiveDate::parse_from_str(&raw, "%Y-%m-%d").ok())
            .ok_or_else(|| LedgerError::coercion(&label, "end", text(&record.end).unwrap_or_default()))?;
        let raw_amount = text(&record.monthly_target_amount).unwrap_or_default();
        let amount: f64 = raw_amount
            .replace(',', ".")
            .parse()
            .map_err(|_| LedgerError::coercion(&label, "monthly_target_amount", raw_amount.clone()))?;
        let owner = text(&record.owner).unwrap_or_else(|| default_owner.to_string());

        for date in month_ends(start, end) {
            let mut row = LedgerRow::new(Some(date), TARGET_ACCOUNT, &name, "", amount, TARGET_SOURCE_FILE);
            row.row_type = RowType::Target;
            row.owner = owner.clone();
            row.class = text(&record.class);
            row.category = text(&record.category);
            row.sub_category = text(&record.sub_category);
            row.rule_id = Some(name.clone());
            row.identity = identity::transaction_identity(&row)?;
            row.row_identity = identity::row_identity(&row.identity, &row.owner)?;
            rows.push(row);
        }
    }

    debug!("targets ok: {} rows", rows.len());
    Ok(rows)
}

/// Read the targets file; `None` when it does not exist
pub fn load_targets(path: &Path) -> Result<Option<Vec<TargetRecord>>> {
    if !path.is_file() {
        warn!("targets not found in {}, skipping...", path.display());
        return Ok(None);
    }

    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let mut records = Vec::new();
    for result in rdr.deserialize() {
        let record: TargetRecord = result?;
        records.push(record);
    }
    Ok(Some(records))
}
