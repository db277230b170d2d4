// 🚨 Error Taxonomy - every failure aborts the run before the ledger is written
//
// Each variant carries the context an operator needs to fix the input and rerun.

use thiserror::Error;

// ============================================================================
// FIX FAILURE
// ============================================================================

/// One override that could not be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixFailure {
    pub fix_id: String,
    pub target: String,
    pub reason: String,
}

impl std::fmt::Display for FixFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} -> {} ({})", self.fix_id, self.target, self.reason)
    }
}

fn list_failures(failures: &[FixFailure]) -> String {
    failures
        .iter()
        .map(|failure| format!("  {}", failure))
        .collect::<Vec<_>>()
        .join("\n")
}

// ============================================================================
// LEDGER ERROR
// ============================================================================

#[derive(Error, Debug)]
pub enum LedgerError {
    /// Canonical columns missing after column mapping
    #[error("{source_name}: missing required columns {missing:?}, check the column mapping in the descriptor")]
    Schema {
        source_name: String,
        missing: Vec<String>,
    },

    /// Malformed rule or config row
    #[error("{file}: {message}")]
    Validation { file: String, message: String },

    /// Identity computation found a required field absent
    #[error("cannot compute identity, field '{field}' is missing ({context})")]
    FieldMissing { field: String, context: String },

    /// Numeric/date coercion failure in a rule or source row
    #[error("rule '{rule}': cannot read {field} from '{value}'")]
    Coercion {
        rule: String,
        field: String,
        value: String,
    },

    #[error("{} fixes failed, correct or delete them and try again:\n{}", failures.len(), list_failures(failures))]
    FixApplication { failures: Vec<FixFailure> },

    #[error("data changes not accepted, interrupting pipeline (review {report})")]
    ChangesRejected { report: String },

    #[error("duplicates not accepted, interrupting pipeline (review {report})")]
    DuplicatesRejected { report: String },

    /// A confirmation gate could not produce a decision
    #[error("confirmation gate failed: {0}")]
    Gate(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    #[error(transparent)]
    Config(#[from] toml::de::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl LedgerError {
    pub fn validation(file: impl Into<String>, message: impl Into<String>) -> Self {
        LedgerError::Validation {
            file: file.into(),
            message: message.into(),
        }
    }

    pub fn coercion(rule: impl Into<String>, field: &str, value: impl Into<String>) -> Self {
        LedgerError::Coercion {
            rule: rule.into(),
            field: field.to_string(),
            value: value.into(),
        }
    }

    pub fn field_missing(field: &str, context: impl Into<String>) -> Self {
        LedgerError::FieldMissing {
            field: field.to_string(),
            context: context.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
