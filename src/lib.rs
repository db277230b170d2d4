// FIRE Ledger - Core Library
// Rebuilds a categorized, owner-split ledger from bank exports on every run
// and reconciles it against the previous one before committing.

pub mod error;
pub mod config;
pub mod ledger;
pub mod artifacts;
pub mod source;         // Source descriptors + raw CSV frames
pub mod normalizer;     // Raw frames -> canonical rows
pub mod identity;       // Content-hash identities
pub mod categorizer;    // Rule validation + convergence loop
pub mod splitter;       // Owner shares
pub mod fixer;          // Manual overrides
pub mod targets;        // Monthly budget rows
pub mod reconciler;     // Diff against the previous ledger
pub mod duplicates;     // Duplicate review + accepted set
pub mod gate;           // Human decision points
pub mod journal;        // SQLite audit trail
pub mod pipeline;

// Re-export commonly used types
pub use error::{FixFailure, LedgerError, Result};
pub use config::PipelineConfig;
pub use ledger::{LedgerRow, LedgerStore, PreviousLedger, RowType};
pub use source::{RawFrame, SourceDescriptor, SourceFile};
pub use categorizer::{
    CategorizationOutcome, CategorizationRule, CategorizationState, CsvRuleFile, RuleSource,
};
pub use splitter::SplitRule;
pub use fixer::{FixOverride, FixScope};
pub use reconciler::{CategoryChange, ChangeSet, IdChange, ReconcileOutcome, Reconciler};
pub use duplicates::{AcceptedDuplicateSet, DuplicateOutcome, DuplicateValidator};
pub use gate::{ConfirmationGate, ConsoleGate, GateContext, GatePayload, ScriptedGate};
pub use journal::{Journal, JournalEvent};
pub use pipeline::{run, RunSummary};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
