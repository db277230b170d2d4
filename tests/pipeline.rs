// End-to-end runs over a throwaway workspace

use fire_ledger::{
    ConfirmationGate, GateContext, GatePayload, LedgerError, LedgerStore, PipelineConfig, Result, ScriptedGate,
};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

const DESCRIPTOR: &str = r#"
pattern = "bank_.*\\.csv$"
account = "Checking"
date_format = "%Y-%m-%d"
"#;

const SOURCE: &str = "\
date,description,info,amount
2024-01-05,Cafe Mocca,card,-3.50
2024-01-06,Salary,ACME,2500.00
2024-01-07,Grocer,,-42.10
";

const CATEGORIES: &str = "\
id,account,description,info,amount,class,category,sub_category
coffee,,cafe,,neg,costs,food,coffee
salary,,salary,,pos,income,salary,
groceries,,grocer,,neg,costs,food,groceries
";

struct Workspace {
    _dir: TempDir,
    config: PipelineConfig,
}

impl Workspace {
    fn new() -> Self {
        Self::with_source(SOURCE)
    }

    fn with_source(source: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let config = PipelineConfig::with_folders(dir.path().join("data"), dir.path().join("config"));

        fs::create_dir_all(&config.descriptor_folder).unwrap();
        fs::create_dir_all(&config.source_folder).unwrap();
        fs::write(config.descriptor_folder.join("bank.toml"), DESCRIPTOR).unwrap();
        fs::write(config.source_folder.join("bank_jan.csv"), source).unwrap();
        fs::write(&config.categories_file, CATEGORIES).unwrap();

        Workspace { _dir: dir, config }
    }

    fn write_config_file(&self, path: &Path, contents: &str) {
        fs::write(path, contents).unwrap();
    }

    fn ledger(&self) -> Vec<fire_ledger::LedgerRow> {
        LedgerStore::new(&self.config.final_ledger_file)
            .load()
            .unwrap()
            .expect("ledger should exist")
            .rows
    }

    fn ledger_bytes(&self) -> Vec<u8> {
        fs::read(&self.config.final_ledger_file).unwrap()
    }

    fn files_in(&self, dir: &Path) -> Vec<PathBuf> {
        if !dir.exists() {
            return Vec::new();
        }
        let mut files: Vec<PathBuf> = fs::read_dir(dir).unwrap().map(|e| e.unwrap().path()).collect();
        files.sort();
        files
    }
}

fn row<'a>(rows: &'a [fire_ledger::LedgerRow], description: &str) -> &'a fire_ledger::LedgerRow {
    rows.iter()
        .find(|r| r.description == description)
        .unwrap_or_else(|| panic!("no row {description}"))
}

#[test]
fn test_first_run_commits_ledger() {
    let ws = Workspace::new();
    let mut gate = ScriptedGate::silent();

    let summary = fire_ledger::run(&ws.config, &mut gate).unwrap();

    assert_eq!(summary.source_files, 1);
    assert_eq!(summary.rows, 3);
    assert_eq!(summary.categorization_iterations, 1);
    assert!(gate.calls.is_empty(), "first run has nothing to confirm");

    let rows = ws.ledger();
    assert_eq!(rows.len(), 3);
    let coffee = row(&rows, "Cafe Mocca");
    assert_eq!(coffee.account, "Checking");
    assert_eq!(coffee.amount, -3.5);
    assert_eq!(coffee.owner, "mkk");
    assert_eq!(coffee.rule_id.as_deref(), Some("coffee"));
    assert_eq!(coffee.sub_category.as_deref(), Some("coffee"));
    assert!(!coffee.identity.is_empty());
    assert!(!coffee.row_identity.is_empty());
}

#[test]
fn test_rerun_without_changes_is_silent() {
    let ws = Workspace::new();
    fire_ledger::run(&ws.config, &mut ScriptedGate::silent()).unwrap();
    let before = ws.ledger_bytes();

    let summary = fire_ledger::run(&ws.config, &mut ScriptedGate::silent()).unwrap();

    assert_eq!(summary.category_changes, 0);
    assert_eq!(summary.id_changes, 0);
    assert_eq!(summary.backup, None);
    assert_eq!(ws.ledger_bytes(), before);
    assert!(ws.files_in(&ws.config.backup_folder).is_empty());
}

#[test]
fn test_category_change_rejected_leaves_ledger_untouched() {
    let ws = Workspace::new();
    fire_ledger::run(&ws.config, &mut ScriptedGate::silent()).unwrap();
    let before = ws.ledger_bytes();

    fs::write(&ws.config.categories_file, CATEGORIES.replace("food,coffee", "fun,coffee")).unwrap();
    let mut gate = ScriptedGate::new([false]);
    let err = fire_ledger::run(&ws.config, &mut gate).unwrap_err();

    assert!(matches!(err, LedgerError::ChangesRejected { .. }));
    assert_eq!(gate.calls_for(GateContext::AcceptChanges), 1);
    assert_eq!(ws.ledger_bytes(), before);

    // backup and report are taken before asking
    assert_eq!(ws.files_in(&ws.config.backup_folder).len(), 1);
    let reports = ws.files_in(&ws.config.changes_folder);
    assert_eq!(reports.len(), 1);
    let report = fs::read_to_string(&reports[0]).unwrap();
    assert!(report.contains("category_current"));
    assert!(report.contains("fun"));
}

#[test]
fn test_category_change_accepted_is_committed() {
    let ws = Workspace::new();
    fire_ledger::run(&ws.config, &mut ScriptedGate::silent()).unwrap();

    fs::write(&ws.config.categories_file, CATEGORIES.replace("food,coffee", "fun,coffee")).unwrap();
    let summary = fire_ledger::run(&ws.config, &mut ScriptedGate::new([true])).unwrap();

    assert_eq!(summary.category_changes, 1);
    assert_eq!(summary.id_changes, 0);
    assert!(summary.backup.is_some());
    assert_eq!(row(&ws.ledger(), "Cafe Mocca").category.as_deref(), Some("fun"));
}

#[test]
fn test_removed_source_row_is_id_change() {
    let ws = Workspace::new();
    fire_ledger::run(&ws.config, &mut ScriptedGate::silent()).unwrap();

    let trimmed: String = SOURCE.lines().filter(|l| !l.contains("Grocer")).map(|l| format!("{l}\n")).collect();
    fs::write(ws.config.source_folder.join("bank_jan.csv"), trimmed).unwrap();

    let mut gate = ScriptedGate::new([true]);
    let summary = fire_ledger::run(&ws.config, &mut gate).unwrap();

    assert_eq!(summary.id_changes, 1);
    assert_eq!(summary.rows, 2);
    let reports = ws.files_in(&ws.config.changes_folder);
    assert!(reports.iter().any(|p| p.file_name().unwrap().to_string_lossy().starts_with("id_changes_")));
}

#[test]
fn test_duplicates_prompted_once_then_remembered() {
    let ws = Workspace::with_source(&format!("{SOURCE}2024-01-05,Cafe Mocca,card,-3.50\n"));

    let mut gate = ScriptedGate::new([true]);
    let summary = fire_ledger::run(&ws.config, &mut gate).unwrap();

    assert_eq!(gate.calls_for(GateContext::AcceptDuplicates), 1);
    assert_eq!(summary.duplicate_rows, 2);
    assert_eq!(summary.newly_accepted_duplicates, 1);
    assert_eq!(ws.ledger().len(), 4, "accepted duplicates are both kept");
    assert!(ws.config.accepted_duplicates_file().is_file());

    let summary = fire_ledger::run(&ws.config, &mut ScriptedGate::silent()).unwrap();
    assert_eq!(summary.newly_accepted_duplicates, 0);
}

#[test]
fn test_duplicates_rejected_writes_nothing() {
    let ws = Workspace::with_source(&format!("{SOURCE}2024-01-05,Cafe Mocca,card,-3.50\n"));

    let err = fire_ledger::run(&ws.config, &mut ScriptedGate::new([false])).unwrap_err();

    assert!(matches!(err, LedgerError::DuplicatesRejected { .. }));
    assert!(!ws.config.final_ledger_file.exists());
    assert!(!ws.config.accepted_duplicates_file().exists());
    assert_eq!(ws.files_in(&ws.config.duplicates_folder).len(), 1, "review file only");
}

#[test]
fn test_duplicates_not_remembered_when_commit_fails() {
    let ws = Workspace::with_source(&format!("{SOURCE}2024-01-05,Cafe Mocca,card,-3.50\n"));
    // the commit temp file cannot be created over a directory
    let blocker = ws.config.final_ledger_file.with_extension("csv.tmp");
    fs::create_dir_all(&blocker).unwrap();

    let mut gate = ScriptedGate::new([true]);
    assert!(fire_ledger::run(&ws.config, &mut gate).is_err());

    assert_eq!(gate.calls_for(GateContext::AcceptDuplicates), 1);
    assert!(!ws.config.final_ledger_file.exists());
    assert!(!ws.config.accepted_duplicates_file().exists());

    // once the ledger can be written, the operator is asked again
    fs::remove_dir(&blocker).unwrap();
    let mut gate = ScriptedGate::new([true]);
    let summary = fire_ledger::run(&ws.config, &mut gate).unwrap();
    assert_eq!(gate.calls_for(GateContext::AcceptDuplicates), 1);
    assert_eq!(summary.newly_accepted_duplicates, 1);
    assert!(ws.config.accepted_duplicates_file().is_file());
}

/// Edits the rules file when asked to retry, like an operator would
struct EditingGate {
    categories_file: PathBuf,
    contents: String,
    retries: usize,
}

impl ConfirmationGate for EditingGate {
    fn confirm(&mut self, context: GateContext, payload: &GatePayload) -> Result<bool> {
        assert_eq!(context, GateContext::RetryCategorization);
        assert_eq!(payload.count, 1);
        assert!(payload.preview[0].contains("Grocer"));
        self.retries += 1;
        fs::write(&self.categories_file, &self.contents)?;
        Ok(true)
    }
}

#[test]
fn test_uncategorized_rows_block_until_rules_fixed() {
    let ws = Workspace::new();
    let without_groceries: String = CATEGORIES.lines().filter(|l| !l.starts_with("groceries")).map(|l| format!("{l}\n")).collect();
    fs::write(&ws.config.categories_file, without_groceries).unwrap();

    let mut gate = EditingGate {
        categories_file: ws.config.categories_file.clone(),
        contents: CATEGORIES.to_string(),
        retries: 0,
    };
    let summary = fire_ledger::run(&ws.config, &mut gate).unwrap();

    assert_eq!(gate.retries, 1);
    assert_eq!(summary.categorization_iterations, 2);
    assert_eq!(row(&ws.ledger(), "Grocer").rule_id.as_deref(), Some("groceries"));
}

#[test]
fn test_declined_retry_aborts() {
    let ws = Workspace::new();
    fs::write(&ws.config.categories_file, "id,account,description,info,amount,class,category,sub_category\n").unwrap();

    let err = fire_ledger::run(&ws.config, &mut ScriptedGate::new([false])).unwrap_err();

    assert!(matches!(err, LedgerError::Validation { .. }));
    assert!(err.to_string().contains("3 rows left uncategorized"));
    assert!(!ws.config.final_ledger_file.exists());
}

#[test]
fn test_failing_fixes_abort_without_writing() {
    let ws = Workspace::new();
    ws.write_config_file(
        &ws.config.fixes_file,
        "id,target_identity,category\nf1,doesnotexist,misc\nf2,alsomissing,misc\n",
    );

    let err = fire_ledger::run(&ws.config, &mut ScriptedGate::silent()).unwrap_err();

    match err {
        LedgerError::FixApplication { failures } => {
            assert_eq!(failures.len(), 2);
            assert_eq!(failures[0].fix_id, "f1");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert!(!ws.config.final_ledger_file.exists());
}

#[test]
fn test_fix_by_identity_prefix() {
    let ws = Workspace::new();
    fire_ledger::run(&ws.config, &mut ScriptedGate::silent()).unwrap();
    let coffee = row(&ws.ledger(), "Cafe Mocca").clone();

    ws.write_config_file(
        &ws.config.fixes_file,
        &format!("id,target_identity,category\nf1,{},treats\n", &coffee.identity[..12]),
    );
    let summary = fire_ledger::run(&ws.config, &mut ScriptedGate::new([true])).unwrap();

    assert_eq!(summary.fixes_applied, 1);
    assert_eq!(summary.category_changes, 1);
    let fixed = ws.ledger();
    let fixed = row(&fixed, "Cafe Mocca");
    assert_eq!(fixed.category.as_deref(), Some("treats"));
    assert_eq!(fixed.rule_id.as_deref(), Some("f1"), "fixed rows name their fix");
    assert_eq!(fixed.identity, coffee.identity, "identity survives a fix");
}

#[test]
fn test_splits_fan_out_owner_shares() {
    let ws = Workspace::new();
    ws.write_config_file(
        &ws.config.splits_file,
        "start,end,account,share,owner\n2024-01-01,2024-12-31,Checking,0.5,mkk\n2024-01-01,2024-12-31,Checking,0.5,partner\n",
    );

    let summary = fire_ledger::run(&ws.config, &mut ScriptedGate::silent()).unwrap();

    assert_eq!(summary.rows, 6);
    let rows = ws.ledger();
    let shares: Vec<_> = rows.iter().filter(|r| r.description == "Salary").collect();
    assert_eq!(shares.len(), 2);
    assert_eq!(shares[0].identity, shares[1].identity);
    assert_ne!(shares[0].row_identity, shares[1].row_identity);
    assert!(shares.iter().all(|r| r.amount == 1250.0 && r.amount_original == 2500.0));
}

#[test]
fn test_targets_appended() {
    let ws = Workspace::new();
    ws.write_config_file(
        &ws.config.targets_file,
        "target_name,start,end,monthly_target_amount,owner,class,category,sub_category\nFood,2024-01-01,2024-03-31,-300,,costs,food,\n",
    );

    let summary = fire_ledger::run(&ws.config, &mut ScriptedGate::silent()).unwrap();

    assert_eq!(summary.target_rows, 3);
    let rows = ws.ledger();
    assert_eq!(rows.iter().filter(|r| r.account == "Target").count(), 3);
}

#[test]
fn test_debug_writes_stage_snapshots() {
    let mut ws = Workspace::new();
    ws.config.debug = true;
    fs::create_dir_all(&ws.config.intermediate_folder).unwrap();
    fs::write(ws.config.intermediate_folder.join("stale.csv"), "old").unwrap();

    fire_ledger::run(&ws.config, &mut ScriptedGate::silent()).unwrap();

    let names: Vec<String> = ws
        .files_in(&ws.config.intermediate_folder)
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
        .collect();
    assert_eq!(
        names,
        vec!["1_loaded.csv", "2_categorized.csv", "3_splitted.csv", "4_fixed.csv", "5_targets.csv"]
    );
}

#[test]
fn test_journal_records_run_and_decisions() {
    let mut ws = Workspace::new();
    let journal = ws.config.data_folder.join("journal.sqlite");
    ws.config.journal_file = Some(journal.clone());

    fire_ledger::run(&ws.config, &mut ScriptedGate::silent()).unwrap();
    fs::write(&ws.config.categories_file, CATEGORIES.replace("food,coffee", "fun,coffee")).unwrap();
    let _ = fire_ledger::run(&ws.config, &mut ScriptedGate::new([false]));

    let conn = rusqlite::Connection::open(&journal).unwrap();
    let mut stmt = conn.prepare("SELECT event_type FROM events ORDER BY id").unwrap();
    let types: Vec<String> = stmt
        .query_map([], |r| r.get(0))
        .unwrap()
        .collect::<std::result::Result<_, _>>()
        .unwrap();

    assert_eq!(
        types,
        vec!["run_started", "run_completed", "run_started", "gate_decision", "run_failed"]
    );
}

#[cfg(unix)]
#[test]
fn test_committed_run_succeeds_when_summary_cannot_be_journaled() {
    use std::ffi::OsStr;
    use std::os::unix::ffi::OsStrExt;

    let mut ws = Workspace::new();
    let journal = ws.config.data_folder.join("journal.sqlite");
    ws.config.journal_file = Some(journal.clone());
    // a non UTF-8 ledger path cannot be rendered as JSON
    ws.config.final_ledger_file = ws.config.data_folder.join(OsStr::from_bytes(b"final_\xff.csv"));

    let summary = fire_ledger::run(&ws.config, &mut ScriptedGate::silent()).unwrap();
    assert_eq!(summary.rows, 3);
    assert_eq!(ws.ledger().len(), 3);

    let conn = rusqlite::Connection::open(&journal).unwrap();
    let mut stmt = conn.prepare("SELECT event_type FROM events ORDER BY id").unwrap();
    let types: Vec<String> = stmt
        .query_map([], |r| r.get(0))
        .unwrap()
        .collect::<std::result::Result<_, _>>()
        .unwrap();
    assert_eq!(types, vec!["run_started"]);
}

#[test]
fn test_unmatched_source_file_fails() {
    let ws = Workspace::new();
    fs::write(ws.config.source_folder.join("mystery.csv"), "a,b\n").unwrap();

    let err = fire_ledger::run(&ws.config, &mut ScriptedGate::silent()).unwrap_err();
    assert!(matches!(err, LedgerError::Validation { .. }));
}
