// 🚂 Pipeline - one run, source files to committed ledger
//
// normalize -> categorize -> identify -> split -> fix -> targets
//           -> reconcile -> duplicates -> commit
//
// Any error returns before `commit`, so a failed or declined run never
// touches the final ledger.

use crate::artifacts;
use crate::categorizer::{self, CsvRuleFile};
use crate::config::PipelineConfig;
use crate::duplicates::{AcceptedDuplicateSet, DuplicateValidator};
use crate::error::{LedgerError, Result};
use crate::fixer;
use crate::gate::{ConfirmationGate, GateContext, GatePayload};
use crate::identity;
use crate::journal::Journal;
use crate::ledger::{LedgerRow, LedgerStore};
use crate::normalizer;
use crate::reconciler::Reconciler;
use crate::source;
use crate::splitter;
use crate::targets;
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

/// What a successful run did
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub timestamp: String,
    pub source_files: usize,
    pub rows: usize,
    pub categorization_iterations: usize,
    pub fixes_applied: usize,
    pub target_rows: usize,
    pub category_changes: usize,
    pub id_changes: usize,
    pub is_migration: bool,
    pub backup: Option<PathBuf>,
    pub duplicate_rows: usize,
    pub newly_accepted_duplicates: usize,
    pub ledger: PathBuf,
}

// ============================================================================
// JOURNALING GATE
// ============================================================================

/// Forwards to the operator's gate and journals each decision
struct JournalingGate<'a, G: ConfirmationGate + ?Sized> {
    inner: &'a mut G,
    journal: Option<&'a Journal>,
}

impl<G: ConfirmationGate + ?Sized> ConfirmationGate for JournalingGate<'_, G> {
    fn confirm(&mut self, context: GateContext, payload: &GatePayload) -> Result<bool> {
        let accepted = self.inner.confirm(context, payload)?;
        debug!("gate {}: {}", context.name(), if accepted { "accepted" } else { "declined" });

        if let Some(journal) = self.journal {
            journal.record(
                "gate_decision",
                json!({
                    "context": context.name(),
                    "accepted": accepted,
                    "count": payload.count,
                    "reports": payload.reports,
                }),
            )?;
        }
        Ok(accepted)
    }
}

// ============================================================================
// RUN
// ============================================================================

/// Run the whole pipeline once against `config`
pub fn run<G>(config: &PipelineConfig, gate: &mut G) -> Result<RunSummary>
where
    G: ConfirmationGate + ?Sized,
{
    let timestamp = artifacts::run_timestamp();
    let journal = config.journal_file.as_deref().map(Journal::open).transpose()?;

    if let Some(journal) = &journal {
        journal.record("run_started", json!({ "timestamp": timestamp }))?;
        info!("journal run id: {}", journal.run_id());
    }

    let mut gate = JournalingGate {
        inner: gate,
        journal: journal.as_ref(),
    };
    let result = Pipeline::new(config, &timestamp).execute(&mut gate);

    if let Some(journal) = &journal {
        // the ledger may already be committed; journaling problems only warn
        let recorded = match &result {
            Ok(summary) => serde_json::to_value(summary)
                .map_err(LedgerError::from)
                .and_then(|data| journal.record("run_completed", data)),
            Err(e) => journal.record("run_failed", json!({ "error": e.to_string() })),
        };
        if let Err(e) = recorded {
            warn!("could not journal run outcome: {}", e);
        }
    }

    if let Err(e) = &result {
        error!("run failed: {}", e);
    }
    result
}

struct Pipeline<'a> {
    config: &'a PipelineConfig,
    timestamp: &'a str,
}

impl<'a> Pipeline<'a> {
    fn new(config: &'a PipelineConfig, timestamp: &'a str) -> Self {
        Pipeline { config, timestamp }
    }

    fn snapshot(&self, stage: &str, rows: &[LedgerRow]) -> Result<()> {
        if !self.config.debug {
            return Ok(());
        }
        let path = self.config.intermediate_folder.join(format!("{}.csv", stage));
        artifacts::write_records(&path, rows)?;
        debug!("snapshot: {} ({} rows)", path.display(), rows.len());
        Ok(())
    }

    fn load_sources(&self) -> Result<(usize, Vec<LedgerRow>)> {
        let descriptors = source::load_descriptors(&self.config.descriptor_folder)?;
        let sources = source::collect_sources(&self.config.source_folder, &descriptors)?;

        let mut rows = Vec::new();
        for file in &sources {
            let frame = source::read_frame(file)?;
            let normalized = normalizer::normalize(&frame, &file.descriptor)?;
            info!("read source: {} ({} rows)", file.file_name, normalized.len());
            rows.extend(normalized);
        }

        Ok((sources.len(), rows))
    }

    fn execute<G>(&self, gate: &mut G) -> Result<RunSummary>
    where
        G: ConfirmationGate + ?Sized,
    {
        let config = self.config;
        artifacts::clean_folder(&config.intermediate_folder)?;

        let (source_files, rows) = self.load_sources()?;
        self.snapshot("1_loaded", &rows)?;

        let mut rules = CsvRuleFile::new(&config.categories_file);
        let outcome = categorizer::categorize_until_complete(rows, &mut rules, gate, config.uncategorized_preview)?;
        let mut rows = outcome.rows;
        info!("categories ok");
        self.snapshot("2_categorized", &rows)?;

        identity::assign_transaction_identities(&mut rows)?;
        let split_rules = splitter::load_split_rules(&config.splits_file)?;
        let mut rows = splitter::split(rows, &split_rules, &config.default_owner)?;
        self.snapshot("3_splitted", &rows)?;

        let fixes = fixer::load_fixes(&config.fixes_file)?;
        let fixes_applied = fixer::apply(&mut rows, &fixes)?;
        info!("fixes ok ({} rows)", fixes_applied);
        self.snapshot("4_fixed", &rows)?;

        let mut target_rows = 0;
        if config.use_targets {
            if let Some(records) = targets::load_targets(&config.targets_file)? {
                let expanded = targets::expand(&records, &config.default_owner)?;
                target_rows = expanded.len();
                rows.extend(expanded);
                info!("targets ok ({} rows)", target_rows);
            }
            self.snapshot("5_targets", &rows)?;
        }

        let store = LedgerStore::new(&config.final_ledger_file);
        let previous = store.load()?;
        let reconciler = Reconciler::new(&store, &config.backup_folder, &config.changes_folder, self.timestamp);
        let reconciled = reconciler.reconcile(&rows, previous.as_ref(), gate)?;

        let mut accepted = AcceptedDuplicateSet::load(config.accepted_duplicates_file())?;
        let duplicates =
            DuplicateValidator::new(&config.duplicates_folder, self.timestamp).validate(&rows, &accepted, gate)?;

        reconciler.commit(&rows)?;
        info!("ledger written: {} ({} rows)", store.path().display(), rows.len());

        // only after the ledger is in place
        let newly_accepted_duplicates = accepted.accept(duplicates.newly_accepted)?;

        Ok(RunSummary {
            timestamp: self.timestamp.to_string(),
            source_files,
            rows: rows.len(),
            categorization_iterations: outcome.iterations,
            fixes_applied,
            target_rows,
            category_changes: reconciled.category_changes,
            id_changes: reconciled.id_changes,
            is_migration: reconciled.is_migration,
            backup: reconciled.backup,
            duplicate_rows: duplicates.duplicate_rows,
            newly_accepted_duplicates,
            ledger: store.path().to_path_buf(),
        })
    }
}
