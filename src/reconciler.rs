// ⚖️ Reconciler - diff the new ledger against the accepted one
//
// Previous rows are left-joined to new rows on `row_identity`:
//   - no match in the new ledger      → identity change
//   - match with other class/category → categorization change
// Any change: back up the previous ledger, write both reports, then ask the
// operator. Nothing is written to the ledger itself until the run commits.

use crate::error::{LedgerError, Result};
use crate::gate::{ConfirmationGate, GateContext, GatePayload};
use crate::identity;
use crate::ledger::{LedgerRow, LedgerStore, PreviousLedger};
use crate::artifacts;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const ID_CHANGE_DESCRIPTION: &str = "This row is created with new id. No comparison can be done.";
const ID_CHANGE_REASON: &str =
    "This happens when there's a change in: date, account, description, info, amount, row_type, source_file or owner";

// ============================================================================
// CHANGE RECORDS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryChange {
    pub row_identity: String,
    pub date_current: String,
    pub description_current: String,
    pub info_current: String,
    pub amount_current: f64,
    pub rule_id_current: String,
    pub rule_id_new: String,
    pub owner_current: String,
    pub owner_new: String,
    pub class_current: String,
    pub class_new: String,
    pub category_current: String,
    pub category_new: String,
    pub sub_category_current: String,
    pub sub_category_new: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IdChange {
    pub row_identity: String,
    pub identity: String,
    pub date: String,
    pub account: String,
    pub description: String,
    pub info: String,
    pub amount: f64,
    pub rule_id: String,
    pub owner: String,
    pub class: String,
    pub category: String,
    pub sub_category: String,
    pub change_description: &'static str,
    pub change_reason: &'static str,
}

#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub category_changes: Vec<CategoryChange>,
    pub id_changes: Vec<IdChange>,
    pub is_migration: bool,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.category_changes.is_empty() && self.id_changes.is_empty()
    }
}

fn opt(value: &Option<String>) -> String {
    value.clone().unwrap_or_default()
}

fn category_change(previous: &LedgerRow, new: &LedgerRow) -> CategoryChange {
    CategoryChange {
        row_identity: previous.row_identity.clone(),
        date_current: previous.date_label(),
        description_current: previous.description.clone(),
        info_current: previous.info.clone(),
        amount_current: previous.amount,
        rule_id_current: opt(&previous.rule_id),
        rule_id_new: opt(&new.rule_id),
        owner_current: previous.owner.clone(),
        owner_new: new.owner.clone(),
        class_current: opt(&previous.class),
        class_new: opt(&new.class),
        category_current: opt(&previous.category),
        category_new: opt(&new.category),
        sub_category_current: opt(&previous.sub_category),
        sub_category_new: opt(&new.sub_category),
    }
}

fn id_change(previous: &LedgerRow) -> IdChange {
    IdChange {
        row_identity: previous.row_identity.clone(),
        identity: previous.identity.clone(),
        date: previous.date_label(),
        account: previous.account.clone(),
        description: previous.description.clone(),
        info: previous.info.clone(),
        amount: previous.amount,
        rule_id: opt(&previous.rule_id),
        owner: previous.owner.clone(),
        class: opt(&previous.class),
        category: opt(&previous.category),
        sub_category: opt(&previous.sub_category),
        change_description: ID_CHANGE_DESCRIPTION,
        change_reason: ID_CHANGE_REASON,
    }
}

// ============================================================================
// DIFF
// ============================================================================

/// Previous rows with `row_identity` present. On a migration the missing
/// values are synthesized from `(identity, owner)`.
pub fn with_row_identities(previous: &PreviousLedger) -> Result<Vec<LedgerRow>> {
    let mut rows = previous.rows.clone();
    if previous.is_migration {
        identity::assign_row_identities(&mut rows)?;
        info!("row identities created for the previous ledger, normal only after a migration");
    }
    Ok(rows)
}

/// Compare `new_rows` against the previous ledger. Pure, writes nothing.
pub fn diff(new_rows: &[LedgerRow], previous: &PreviousLedger) -> Result<ChangeSet> {
    let previous_rows = with_row_identities(previous)?;

    // accepted duplicates repeat a row_identity: keep the first occurrence
    // for the category comparison and count how many copies are left
    let mut by_row_identity: HashMap<&str, (&LedgerRow, usize)> = HashMap::with_capacity(new_rows.len());
    for row in new_rows {
        by_row_identity
            .entry(row.row_identity.as_str())
            .or_insert((row, 0))
            .1 += 1;
    }

    let mut changes = ChangeSet {
        is_migration: previous.is_migration,
        ..Default::default()
    };

    // each previous row consumes one copy; a surplus previous row is gone
    for old in &previous_rows {
        match by_row_identity.get_mut(old.row_identity.as_str()) {
            Some((new, remaining)) if *remaining > 0 => {
                *remaining -= 1;
                if new.categorization() != old.categorization() {
                    changes.category_changes.push(category_change(old, *new));
                }
            }
            _ => changes.id_changes.push(id_change(old)),
        }
    }

    Ok(changes)
}

// ============================================================================
// RECONCILER
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct ReconcileOutcome {
    pub category_changes: usize,
    pub id_changes: usize,
    pub is_migration: bool,
    pub backup: Option<PathBuf>,
    pub reports: Vec<PathBuf>,
}

/// Owns the final ledger file for the run
pub struct Reconciler<'a> {
    store: &'a LedgerStore,
    backup_folder: PathBuf,
    changes_folder: PathBuf,
    timestamp: String,
}

impl<'a> Reconciler<'a> {
    pub fn new(store: &'a LedgerStore, backup_folder: &Path, changes_folder: &Path, timestamp: &str) -> Self {
        Reconciler {
            store,
            backup_folder: backup_folder.to_path_buf(),
            changes_folder: changes_folder.to_path_buf(),
            timestamp: timestamp.to_string(),
        }
    }

    /// Diff, and when anything changed: backup, reports, gate.
    ///
    /// Declining at the gate returns `ChangesRejected`; the ledger file is
    /// left exactly as it was.
    pub fn reconcile<G>(
        &self,
        new_rows: &[LedgerRow],
        previous: Option<&PreviousLedger>,
        gate: &mut G,
    ) -> Result<ReconcileOutcome>
    where
        G: ConfirmationGate + ?Sized,
    {
        let Some(previous) = previous else {
            info!("changes: none (first run)");
            return Ok(ReconcileOutcome::default());
        };

        let changes = diff(new_rows, previous)?;
        if changes.is_empty() {
            info!("changes: none");
            return Ok(ReconcileOutcome {
                is_migration: changes.is_migration,
                ..Default::default()
            });
        }

        let backup = self.store.backup(&self.backup_folder, &self.timestamp)?;
        let mut reports = Vec::new();

        if !changes.category_changes.is_empty() {
            let path = artifacts::write_once_records(
                &self.changes_folder,
                "category_changes",
                &self.timestamp,
                &changes.category_changes,
            )?;
            warn!(
                "category changes found: {}, please review records with category changes from file: {}",
                changes.category_changes.len(),
                path.display()
            );
            reports.push(path);
        }

        if !changes.id_changes.is_empty() {
            let path =
                artifacts::write_once_records(&self.changes_folder, "id_changes", &self.timestamp, &changes.id_changes)?;
            if changes.is_migration {
                info!(
                    "id changes found: {}, this happens after a migration, just accept changes ({})",
                    changes.id_changes.len(),
                    path.display()
                );
            } else {
                warn!(
                    "id changes found: {}, this happens when owner or any source field changes, please review {}",
                    changes.id_changes.len(),
                    path.display()
                );
            }
            reports.push(path);
        }

        let mut payload = GatePayload::new(
            format!(
                "{} category changes and {} id changes against the previous ledger",
                changes.category_changes.len(),
                changes.id_changes.len()
            ),
            changes.category_changes.len() + changes.id_changes.len(),
        );
        for report in &reports {
            payload = payload.with_report(report.clone());
        }

        if !gate.confirm(GateContext::AcceptChanges, &payload)? {
            let listing = reports
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(LedgerError::ChangesRejected { report: listing });
        }

        info!("changes: accepted");
        Ok(ReconcileOutcome {
            category_changes: changes.category_changes.len(),
            id_changes: changes.id_changes.len(),
            is_migration: changes.is_migration,
            backup,
            reports,
        })
    }

    /// Persist the accepted ledger
    pub fn commit(&self, rows: &[LedgerRow]) -> Result<()> {
        self.store.commit(rows)
    }
}

// ============================================================================
// TESTS
// ============================================================================
