// 🔍 Duplicate Validator - rows that share an identity
//
// Bank exports legitimately repeat lines (two coffees, same day, same price),
// so a collision is not an error until an operator says so. Accepted
// identities go to a durable, append-only file and are not asked about again.

use crate::artifacts;
use crate::error::{LedgerError, Result};
use crate::gate::{ConfirmationGate, GateContext, GatePayload};
use crate::ledger::LedgerRow;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

// ============================================================================
// ACCEPTED DUPLICATE SET
// ============================================================================

#[derive(Debug, Serialize, Deserialize)]
struct AcceptedLine {
    row_identity: String,
}

/// Identities a human confirmed as legitimate duplicates. Insertion order
/// is kept; an identity is stored once.
#[derive(Debug, Clone)]
pub struct AcceptedDuplicateSet {
    path: PathBuf,
    ordered: Vec<String>,
    lookup: HashSet<String>,
}

impl AcceptedDuplicateSet {
    /// Load from `path`; a missing file is an empty set
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut set = AcceptedDuplicateSet {
            path,
            ordered: Vec::new(),
            lookup: HashSet::new(),
        };

        if set.path.is_file() {
            let mut rdr = csv::Reader::from_path(&set.path)?;
            for result in rdr.deserialize() {
                let line: AcceptedLine = result?;
                set.insert(line.row_identity);
            }
        }

        Ok(set)
    }

    fn insert(&mut self, identity: String) -> bool {
        if identity.is_empty() || self.lookup.contains(&identity) {
            return false;
        }
        self.lookup.insert(identity.clone());
        self.ordered.push(identity);
        true
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.lookup.contains(identity)
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn identities(&self) -> &[String] {
        &self.ordered
    }

    /// Append new identities and persist. Returns how many were new; the
    /// file is left alone when there are none.
    pub fn accept<I>(&mut self, identities: I) -> Result<usize>
    where
        I: IntoIterator<Item = String>,
    {
        let added = identities.into_iter().filter(|id| self.insert(id.clone())).count();
        if added > 0 {
            self.save()?;
        }
        Ok(added)
    }

    fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp = self.path.with_extension("csv.tmp");
        {
            let mut wtr = csv::Writer::from_path(&tmp)?;
            // header even when empty
            wtr.write_record(["row_identity"])?;
            for identity in &self.ordered {
                wtr.write_record([identity.as_str()])?;
            }
            wtr.flush()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

// ============================================================================
// VALIDATOR
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct DuplicateOutcome {
    /// Rows in duplicate groups, accepted earlier or now
    pub duplicate_rows: usize,
    /// Identities the operator accepted in this run, distinct, in row order.
    /// Not yet persisted: see `AcceptedDuplicateSet::accept`.
    pub newly_accepted: Vec<String>,
    pub review_file: Option<PathBuf>,
}

/// Every non-zero row whose `row_identity` appears more than once, whole
/// groups included
pub fn find_duplicates(rows: &[LedgerRow]) -> Vec<&LedgerRow> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for row in rows.iter().filter(|r| r.amount != 0.0) {
        *counts.entry(row.row_identity.as_str()).or_insert(0) += 1;
    }

    rows.iter()
        .filter(|r| r.amount != 0.0)
        .filter(|r| counts.get(r.row_identity.as_str()).copied().unwrap_or(0) > 1)
        .collect()
}

pub struct DuplicateValidator {
    review_folder: PathBuf,
    timestamp: String,
}

impl DuplicateValidator {
    pub fn new(review_folder: &Path, timestamp: &str) -> Self {
        DuplicateValidator {
            review_folder: review_folder.to_path_buf(),
            timestamp: timestamp.to_string(),
        }
    }

    /// Gate new duplicate groups; declining returns `DuplicatesRejected`.
    ///
    /// `accepted` is only read here. The caller persists
    /// `outcome.newly_accepted` once the ledger itself is committed, so the
    /// two files never disagree.
    pub fn validate<G>(
        &self,
        rows: &[LedgerRow],
        accepted: &AcceptedDuplicateSet,
        gate: &mut G,
    ) -> Result<DuplicateOutcome>
    where
        G: ConfirmationGate + ?Sized,
    {
        let duplicates = find_duplicates(rows);
        if duplicates.is_empty() {
            info!("duplicates: none");
            return Ok(DuplicateOutcome::default());
        }

        let new_duplicates: Vec<LedgerRow> = duplicates
            .iter()
            .filter(|r| !accepted.contains(&r.row_identity))
            .map(|r| (*r).clone())
            .collect();

        if new_duplicates.is_empty() {
            info!("all duplicates already accepted ({} rows)", duplicates.len());
            return Ok(DuplicateOutcome {
                duplicate_rows: duplicates.len(),
                ..Default::default()
            });
        }

        let review = artifacts::write_once_records(&self.review_folder, "duplicates", &self.timestamp, &new_duplicates)?;
        warn!(
            "new duplicates found: {}, please review: {}",
            new_duplicates.len(),
            review.display()
        );

        let payload = GatePayload::new(
            format!("new duplicates found: {}", new_duplicates.len()),
            new_duplicates.len(),
        )
        .with_report(review.clone());

        if !gate.confirm(GateContext::AcceptDuplicates, &payload)? {
            return Err(LedgerError::DuplicatesRejected {
                report: review.display().to_string(),
            });
        }

        let mut seen = HashSet::new();
        let newly_accepted: Vec<String> = new_duplicates
            .into_iter()
            .map(|r| r.row_identity)
            .filter(|id| seen.insert(id.clone()))
            .collect();
        info!("duplicates: accepted ({} identities)", newly_accepted.len());

        Ok(DuplicateOutcome {
            duplicate_rows: duplicates.len(),
            newly_accepted,
            review_file: Some(review),
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
