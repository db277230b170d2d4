// 📒 Ledger - canonical row schema and the persisted final ledger
//
// Rows are rebuilt from source files on every run. The final ledger file is
// the only row state carried between runs.

use crate::error::{LedgerError, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

// ============================================================================
// ROW TYPE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RowType {
    #[default]
    Actual,
    Target,
}

impl RowType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RowType::Actual => "Actual",
            RowType::Target => "Target",
        }
    }

    pub fn parse(value: &str) -> Option<RowType> {
        match value.trim().to_lowercase().as_str() {
            "actual" => Some(RowType::Actual),
            "target" => Some(RowType::Target),
            _ => None,
        }
    }
}

// ============================================================================
// LEDGER ROW
// ============================================================================

/// One financial event belonging to one owner-share.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRow {
    // ========================================================================
    // SOURCE FIELDS (immutable, feed the identity)
    // ========================================================================
    pub date: Option<NaiveDate>,

    pub account: String,

    pub description: String,

    #[serde(default)]
    pub info: String,

    /// Post-split amount: `amount_original * share`
    pub amount: f64,

    /// Pre-split amount as read from the source
    #[serde(default)]
    pub amount_original: f64,

    #[serde(default = "default_share")]
    pub share: f64,

    #[serde(default)]
    pub owner: String,

    #[serde(default)]
    pub row_type: RowType,

    #[serde(default)]
    pub source_file: String,

    // ========================================================================
    // CATEGORIZATION (empty until a rule matches)
    // ========================================================================
    #[serde(default)]
    pub class: Option<String>,

    #[serde(default)]
    pub category: Option<String>,

    #[serde(default)]
    pub sub_category: Option<String>,

    #[serde(default)]
    pub rule_id: Option<String>,

    // ========================================================================
    // IDENTITY (content hashes, see identity.rs)
    // ========================================================================
    /// Transaction-level identity, shared by all owner-shares of a row
    #[serde(default)]
    pub identity: String,

    /// Identity of this owner-share
    #[serde(default)]
    pub row_identity: String,
}

/// Column order of the ledger file, matching `LedgerRow`
pub const LEDGER_COLUMNS: [&str; 16] = [
    "date",
    "account",
    "description",
    "info",
    "amount",
    "amount_original",
    "share",
    "owner",
    "row_type",
    "source_file",
    "class",
    "category",
    "sub_category",
    "rule_id",
    "identity",
    "row_identity",
];

fn default_share() -> f64 {
    1.0
}

impl LedgerRow {
    /// Fresh unsplit, uncategorized row as produced by the normalizer
    pub fn new(
        date: Option<NaiveDate>,
        account: &str,
        description: &str,
        info: &str,
        amount: f64,
        source_file: &str,
    ) -> Self {
        LedgerRow {
            date,
            account: account.to_string(),
            description: description.to_string(),
            info: info.to_string(),
            amount,
            amount_original: amount,
            share: 1.0,
            owner: String::new(),
            row_type: RowType::Actual,
            source_file: source_file.to_string(),
            class: None,
            category: None,
            sub_category: None,
            rule_id: None,
            identity: String::new(),
            row_identity: String::new(),
        }
    }

    pub fn is_categorized(&self) -> bool {
        self.rule_id.as_deref().is_some_and(|id| !id.is_empty())
    }

    /// class/category/sub_category with nulls read as empty, for comparisons
    pub fn categorization(&self) -> (&str, &str, &str) {
        (
            self.class.as_deref().unwrap_or(""),
            self.category.as_deref().unwrap_or(""),
            self.sub_category.as_deref().unwrap_or(""),
        )
    }

    pub fn date_label(&self) -> String {
        self.date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_default()
    }
}

// ============================================================================
// CSV HELPERS
// ============================================================================

/// Write ledger rows with a header row, creating parent folders
pub fn write_rows(path: &Path, rows: &[LedgerRow]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let mut wtr = csv::Writer::from_path(path)?;
    if rows.is_empty() {
        // serde only emits the header with the first record
        wtr.write_record(LEDGER_COLUMNS)?;
    }
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;

    debug!("write csv: {} ({} rows)", path.display(), rows.len());
    Ok(())
}

// ============================================================================
// LEDGER STORE
// ============================================================================

/// Previously accepted ledger as read from disk
#[derive(Debug, Clone)]
pub struct PreviousLedger {
    pub rows: Vec<LedgerRow>,
    /// The file predates `row_identity`; identities were synthesized on load
    pub is_migration: bool,
}

/// Owner of the final ledger file. Reads are free; writes happen only in
/// `commit`, after every gate has passed.
#[derive(Debug, Clone)]
pub struct LedgerStore {
    path: PathBuf,
}

impl LedgerStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        LedgerStore {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Load the previous ledger, `None` on the first run.
    ///
    /// Legacy files without a `row_identity` column are flagged as a
    /// migration; the caller synthesizes the missing identities.
    pub fn load(&self) -> Result<Option<PreviousLedger>> {
        if !self.exists() {
            info!("no previous ledger at {}", self.path.display());
            return Ok(None);
        }

        let mut rdr = csv::Reader::from_path(&self.path)?;
        let headers = rdr.headers()?.clone();

        if !headers.iter().any(|h| h == "identity") {
            return Err(LedgerError::Schema {
                source_name: self.path.display().to_string(),
                missing: vec!["identity".to_string()],
            });
        }
        let is_migration = !headers.iter().any(|h| h == "row_identity");

        let mut rows = Vec::new();
        for result in rdr.deserialize() {
            let row: LedgerRow = result?;
            rows.push(row);
        }

        Ok(Some(PreviousLedger { rows, is_migration }))
    }

    /// Copy the current file byte-for-byte into `dir` under a new name.
    /// Returns `None` when there is nothing to back up.
    pub fn backup(&self, dir: &Path, timestamp: &str) -> Result<Option<PathBuf>> {
        if !self.exists() {
            return Ok(None);
        }

        let stem = self
            .path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("final_data");
        let contents = fs::read(&self.path)?;
        let backup = crate::artifacts::write_once_bytes(dir, stem, timestamp, &contents)?;

        info!("backup of the previous ledger created: {}", backup.display());
        Ok(Some(backup))
    }

    /// Replace the ledger with `rows`. Written to a sibling temp file first
    /// so a failed write never leaves a partial ledger behind.
    pub fn commit(&self, rows: &[LedgerRow]) -> Result<()> {
        let tmp = self.path.with_extension("csv.tmp");
        write_rows(&tmp, rows)?;
        fs::rename(&tmp, &self.path)?;

        info!("ledger saved: {} ({} rows)", self.path.display(), rows.len());
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
