// 🔑 Identity Assigner - content-addressed row identities
//
// Two tiers:
//   identity      = H(date, account, description, info, amount_original, row_type, source_file)
//   row_identity  = H(identity, owner)
//
// Canonical serialization (changing any of this changes every identity and
// turns the next reconciliation into one big id-change report):
//   - fields in the order above
//   - dates as YYYYMMDD
//   - amounts via f64 `Display` (shortest round-trip form), `-0` written as `0`
//   - text lower-cased, whitespace and `-,.+!@#$%^&*()={}[]|:;"'<>?/\` removed
//   - fields joined with U+001F (unit separator), which text can never contain
//     after stripping control characters
//   - H = SHA-256, lowercase hex

use crate::error::{LedgerError, Result};
use crate::ledger::LedgerRow;
use sha2::{Digest, Sha256};

const SEPARATOR: char = '\u{1f}';
const STRIPPED: &str = "-,.+!@#$%^&*()={}[]|:;\"'<>?/\\";

fn clean_text(value: &str) -> String {
    value
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace() && !c.is_control() && !STRIPPED.contains(*c))
        .collect()
}

fn canonical_amount(amount: f64) -> String {
    if amount == 0.0 {
        // covers -0.0
        "0".to_string()
    } else {
        format!("{}", amount)
    }
}

fn digest(canonical: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    format!("{:x}", hasher.finalize())
}

fn row_context(row: &LedgerRow) -> String {
    format!("{} | {} | {}", row.source_file, row.account, row.description)
}

/// The string hashed into `identity`
pub fn canonical_transaction_string(row: &LedgerRow) -> Result<String> {
    let date = row
        .date
        .ok_or_else(|| LedgerError::field_missing("date", row_context(row)))?;
    if row.account.trim().is_empty() {
        return Err(LedgerError::field_missing("account", row_context(row)));
    }
    if row.source_file.trim().is_empty() {
        return Err(LedgerError::field_missing("source_file", row_context(row)));
    }
    if !row.amount_original.is_finite() {
        return Err(LedgerError::field_missing("amount_original", row_context(row)));
    }

    let fields = [
        date.format("%Y%m%d").to_string(),
        clean_text(&row.account),
        clean_text(&row.description),
        clean_text(&row.info),
        canonical_amount(row.amount_original),
        clean_text(row.row_type.as_str()),
        clean_text(&row.source_file),
    ];

    Ok(fields.join(&SEPARATOR.to_string()))
}

/// Transaction-level identity of a row
pub fn transaction_identity(row: &LedgerRow) -> Result<String> {
    Ok(digest(&canonical_transaction_string(row)?))
}

/// Identity of one owner-share of a transaction
pub fn row_identity(identity: &str, owner: &str) -> Result<String> {
    if identity.is_empty() {
        return Err(LedgerError::field_missing("identity", format!("owner {}", owner)));
    }
    if owner.trim().is_empty() {
        return Err(LedgerError::field_missing("owner", format!("identity {}", identity)));
    }

    Ok(digest(&format!("{}{}{}", identity, SEPARATOR, clean_text(owner))))
}

/// Stamp `identity` on every row
pub fn assign_transaction_identities(rows: &mut [LedgerRow]) -> Result<()> {
    for row in rows.iter_mut() {
        row.identity = transaction_identity(row)?;
    }
    Ok(())
}

/// Stamp `row_identity` on every row from its `identity` and `owner`
pub fn assign_row_identities(rows: &mut [LedgerRow]) -> Result<()> {
    for row in rows.iter_mut() {
        row.row_identity = row_identity(&row.identity, &row.owner)?;
    }
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================
