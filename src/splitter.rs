// ✂️ Splitter - time-bounded ownership shares
//
// A split rule gives `owner` a `share` of every row on `account` dated within
// [start, end]. Each matching rule emits one copy of the row; the unsplit
// original is dropped once any rule matched it.

use crate::error::{LedgerError, Result};
use crate::identity;
use crate::ledger::LedgerRow;
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, info};

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d.%m.%Y", "%Y/%m/%d", "%d/%m/%Y"];

// ============================================================================
// SPLIT RULES
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SplitRecord {
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub end: Option<String>,
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub share: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SplitRule {
    pub account: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub owner: String,
    pub share: f64,
}

impl SplitRule {
    pub fn matches(&self, row: &LedgerRow) -> bool {
        row.account == self.account
            && row
                .date
                .is_some_and(|date| date >= self.start && date <= self.end)
    }
}

fn parse_rule_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    // tolerate a time part, e.g. "2024-01-01 00:00:00"
    let day = raw.split_whitespace().next().unwrap_or(raw);
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(day, fmt).ok())
}

fn text(value: &Option<String>) -> &str {
    value.as_deref().map(str::trim).unwrap_or("")
}

/// Validate raw split records. Records without a start date are blank
/// lines and skipped.
pub fn build_split_rules(records: &[SplitRecord]) -> Result<Vec<SplitRule>> {
    let mut rules = Vec::new();

    for (index, record) in records.iter().enumerate() {
        if text(&record.start).is_empty() {
            continue;
        }

        let label = format!(
            "split line {} ({} / {})",
            index + 2,
            text(&record.account),
            text(&record.owner)
        );

        let start = parse_rule_date(text(&record.start))
            .ok_or_else(|| LedgerError::coercion(&label, "start", text(&record.start)))?;
        let end = parse_rule_date(text(&record.end))
            .ok_or_else(|| LedgerError::coercion(&label, "end", text(&record.end)))?;
        let share: f64 = text(&record.share)
            .replace(',', ".")
            .parse()
            .map_err(|_| LedgerError::coercion(&label, "share", text(&record.share)))?;

        if !share.is_finite() {
            return Err(LedgerError::coercion(&label, "share", text(&record.share)));
        }
        if text(&record.account).is_empty() || text(&record.owner).is_empty() {
            return Err(LedgerError::validation("splits", format!("{}: account and owner are required", label)));
        }
        if end < start {
            return Err(LedgerError::validation("splits", format!("{}: end {} is before start {}", label, end, start)));
        }

        rules.push(SplitRule {
            account: text(&record.account).to_string(),
            start,
            end,
            owner: text(&record.owner).to_string(),
            share,
        });
    }

    Ok(rules)
}

/// Read and validate the splits file. A missing file means no splits.
pub fn load_split_rules(path: &Path) -> Result<Vec<SplitRule>> {
    if !path.is_file() {
        info!("no splits file at {}", path.display());
        return Ok(Vec::new());
    }

    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let mut records = Vec::new();
    for result in rdr.deserialize() {
        let record: SplitRecord = result?;
        records.push(record);
    }

    let rules = build_split_rules(&records)?;
    info!("read splits: {} ({} rules)", path.display(), rules.len());
    Ok(rules)
}

// ============================================================================
// SPLIT
// ============================================================================

/// Fan rows out into owner-shares.
///
/// Rows need their transaction `identity` already; every output row gets a
/// `row_identity` for its owner.
pub fn split(rows: Vec<LedgerRow>, rules: &[SplitRule], default_owner: &str) -> Result<Vec<LedgerRow>> {
    let mut matched = vec![false; rows.len()];
    let mut copies = Vec::new();

    for rule in rules {
        let mut count = 0;
        for (index, row) in rows.iter().enumerate() {
            if !rule.matches(row) {
                continue;
            }

            let mut copy = row.clone();
            copy.share = rule.share;
            copy.amount = row.amount_original * rule.share;
            copy.owner = rule.owner.clone();
            copy.row_identity = identity::row_identity(&copy.identity, &copy.owner)?;
            copies.push(copy);

            matched[index] = true;
            count += 1;
        }
        debug!("split {} {} -> {}: {} rows", rule.account, rule.start, rule.owner, count);
    }

    let mut result = Vec::with_capacity(rows.len() + copies.len());
    for (row, was_split) in rows.into_iter().zip(matched) {
        if was_split {
            continue;
        }
        let mut row = row;
        row.share = 1.0;
        row.amount = row.amount_original;
        row.owner = default_owner.to_string();
        row.row_identity = identity::row_identity(&row.identity, &row.owner)?;
        result.push(row);
    }
    result.extend(copies);

    info!("splits ok");
    Ok(result)
}

// ============================================================================
// TESTS
// ============================================================================
