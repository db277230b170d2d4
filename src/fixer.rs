// 🩹 Fix Applier - manual overrides keyed by identity
//
// Two phases: every override is resolved to its target rows first, and only
// when all of them resolved is anything written. One unmatched override
// fails the whole batch.

use crate::error::{FixFailure, LedgerError, Result};
use crate::ledger::LedgerRow;
use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, error, info};

// ============================================================================
// FIX RECORDS
// ============================================================================

/// One line of the fixes file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FixRecord {
    #[serde(default)]
    pub id: Option<String>,
    /// Identity prefix; `transaction_id` is accepted for older fix files
    #[serde(default, alias = "transaction_id")]
    pub target_identity: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub info: Option<String>,
    #[serde(default)]
    pub amount: Option<String>,
    #[serde(default)]
    pub class: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub sub_category: Option<String>,
    #[serde(default)]
    pub rule_id: Option<String>,
}

/// Which identity an override's target is compared against
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixScope {
    /// `row_identity` first, then `identity`
    Any,
    /// One owner-share, by `row_identity`
    Row,
    /// Every owner-share of a transaction, by `identity`
    Transaction,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FixOverride {
    pub id: String,
    pub target: String,
    pub scope: FixScope,
    pub date: Option<NaiveDate>,
    pub description: Option<String>,
    pub info: Option<String>,
    pub amount: Option<f64>,
    pub class: Option<String>,
    pub category: Option<String>,
    pub sub_category: Option<String>,
    /// Written to `rule_id` of every fixed row; the fix id when absent
    pub rule_id: Option<String>,
}

impl FixOverride {
    pub fn new(id: &str, target: &str) -> Self {
        FixOverride {
            id: id.to_string(),
            target: target.to_string(),
            scope: FixScope::Any,
            date: None,
            description: None,
            info: None,
            amount: None,
            class: None,
            category: None,
            sub_category: None,
            rule_id: None,
        }
    }

    /// Overwrite only the fields this override carries
    fn apply_to(&self, row: &mut LedgerRow) {
        if let Some(date) = self.date {
            row.date = Some(date);
        }
        if let Some(description) = &self.description {
            row.description = description.clone();
        }
        if let Some(info) = &self.info {
            row.info = info.clone();
        }
        if let Some(amount) = self.amount {
            row.amount = amount;
        }
        if let Some(class) = &self.class {
            row.class = Some(class.clone());
        }
        if let Some(category) = &self.category {
            row.category = Some(category.clone());
        }
        if let Some(sub_category) = &self.sub_category {
            row.sub_category = Some(sub_category.clone());
        }
        // a fixed row records which override touched it
        row.rule_id = Some(self.rule_id.clone().unwrap_or_else(|| self.id.clone()));
    }
}

fn has_content(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Validate raw fix records
pub fn parse_fixes(records: &[FixRecord]) -> Result<Vec<FixOverride>> {
    let mut fixes = Vec::with_capacity(records.len());

    for (index, record) in records.iter().enumerate() {
        let line = index + 2;
        let id = has_content(&record.id)
            .ok_or_else(|| LedgerError::validation("fixes", format!("empty 'id' on line {}", line)))?;
        let target = has_content(&record.target_identity).ok_or_else(|| {
            LedgerError::validation("fixes", format!("fix '{}' has no target identity", id))
        })?;

        let scope = match has_content(&record.scope).map(|s| s.to_lowercase()).as_deref() {
            None | Some("any") => FixScope::Any,
            Some("row") => FixScope::Row,
            Some("transaction") => FixScope::Transaction,
            Some(other) => {
                return Err(LedgerError::validation(
                    "fixes",
                    format!("fix '{}': scope must be row, transaction or empty, got '{}'", id, other),
                ))
            }
        };

        let date = match has_content(&record.date) {
            Some(raw) => Some(
                NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
                    .map_err(|_| LedgerError::coercion(format!("fix {}", id), "date", raw.clone()))?,
            ),
            None => None,
        };
        let amount = match has_content(&record.amount) {
            Some(raw) => Some(
                raw.replace(',', ".")
                    .parse::<f64>()
                    .map_err(|_| LedgerError::coercion(format!("fix {}", id), "amount", raw.clone()))?,
            ),
            None => None,
        };

        fixes.push(FixOverride {
            id,
            target,
            scope,
            date,
            description: has_content(&record.description),
            info: has_content(&record.info),
            amount,
            class: has_content(&record.class),
            category: has_content(&record.category),
            sub_category: has_content(&record.sub_category),
            rule_id: has_content(&record.rule_id),
        });
    }

    Ok(fixes)
}

/// Read and validate the fixes file. A missing file means no fixes.
pub fn load_fixes(path: &Path) -> Result<Vec<FixOverride>> {
    if !path.is_file() {
        info!("no fixes file at {}", path.display());
        return Ok(Vec::new());
    }

    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let mut records = Vec::new();
    for result in rdr.deserialize() {
        let record: FixRecord = result?;
        records.push(record);
    }

    parse_fixes(&records)
}

// ============================================================================
// APPLY
// ============================================================================

fn resolve_by<F>(rows: &[LedgerRow], target: &str, key: F) -> std::result::Result<Vec<usize>, String>
where
    F: Fn(&LedgerRow) -> &str,
{
    let hits: Vec<usize> = rows
        .iter()
        .enumerate()
        .filter(|(_, row)| key(row).starts_with(target))
        .map(|(index, _)| index)
        .collect();

    let distinct: BTreeSet<&str> = hits.iter().map(|&i| key(&rows[i])).collect();
    if distinct.len() > 1 {
        return Err(format!("ambiguous, prefix matches {} identities", distinct.len()));
    }
    Ok(hits)
}

/// Rows one override writes to
fn resolve(rows: &[LedgerRow], fix: &FixOverride) -> std::result::Result<Vec<usize>, String> {
    let by_row = |rows: &[LedgerRow]| {
        // an identical row_identity only happens for accepted duplicates; fix the first
        resolve_by(rows, &fix.target, |r| r.row_identity.as_str()).map(|hits| hits.into_iter().take(1).collect::<Vec<_>>())
    };
    let by_transaction = |rows: &[LedgerRow]| resolve_by(rows, &fix.target, |r| r.identity.as_str());

    let hits = match fix.scope {
        FixScope::Row => by_row(rows)?,
        FixScope::Transaction => by_transaction(rows)?,
        FixScope::Any => {
            let hits = by_row(rows)?;
            if hits.is_empty() {
                by_transaction(rows)?
            } else {
                hits
            }
        }
    };

    if hits.is_empty() {
        Err("no matching row".to_string())
    } else {
        Ok(hits)
    }
}

/// Apply every override or none. Returns the number of rows written.
pub fn apply(rows: &mut [LedgerRow], fixes: &[FixOverride]) -> Result<usize> {
    let mut plan = Vec::with_capacity(fixes.len());
    let mut failures = Vec::new();

    for fix in fixes {
        debug!("resolving fix {} -> {}", fix.id, fix.target);
        match resolve(rows, fix) {
            Ok(indices) => plan.push((fix, indices)),
            Err(reason) => failures.push(FixFailure {
                fix_id: fix.id.clone(),
                target: fix.target.clone(),
                reason,
            }),
        }
    }

    if !failures.is_empty() {
        let listing: Vec<String> = failures.iter().map(|f| f.to_string()).collect();
        error!("these fixes failed:\n{}", listing.join("\n"));
        return Err(LedgerError::FixApplication { failures });
    }

    let mut written = 0;
    for (fix, indices) in plan {
        for index in indices {
            fix.apply_to(&mut rows[index]);
            written += 1;
        }
    }

    info!("fixes ok ({} overrides, {} rows)", fixes.len(), written);
    Ok(written)
}

// ============================================================================
// TESTS
// ============================================================================
