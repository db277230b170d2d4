// 🧹 Normalizer - raw frames to canonical ledger rows
//
// Mapping, then coercion. A column the descriptor does not rename is looked
// up under its canonical name.

use crate::error::{LedgerError, Result};
use crate::ledger::{LedgerRow, RowType};
use crate::source::{RawFrame, SourceDescriptor};
use chrono::{NaiveDate, NaiveDateTime};
use tracing::debug;

const REQUIRED: &[&str] = &["date", "description", "info", "amount"];

const DAY_FIRST_FORMATS: &[&str] = &["%d.%m.%Y", "%d/%m/%Y", "%d-%m-%Y", "%Y-%m-%d", "%Y/%m/%d"];
const MONTH_FIRST_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%m-%d-%Y", "%d.%m.%Y"];
const DATETIME_SUFFIXES: &[&str] = &[" %H:%M:%S", " %H:%M", "T%H:%M:%S"];

// ============================================================================
// COERCION
// ============================================================================

/// Parse a bank-formatted amount: `"-1 234,50"`, `"1,234.50"`, `"1.234,56"`, `"−12"`
pub fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '\u{a0}' | '\u{202f}' | ' '))
        .map(|c| match c {
            '\u{2212}' | '\u{2013}' => '-',
            other => other,
        })
        .collect();

    // the separator that comes last is the decimal one
    let cleaned = match (cleaned.rfind('.'), cleaned.rfind(',')) {
        (Some(dot), Some(comma)) if comma > dot => cleaned.replace('.', "").replace(',', "."),
        (Some(_), Some(_)) => cleaned.replace(',', ""),
        (None, Some(_)) => cleaned.replace(',', "."),
        _ => cleaned,
    };

    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

fn date_formats<'a>(configured: &'a str, day_first: bool) -> Vec<&'a str> {
    let formats: Vec<&str> = configured
        .split('|')
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .collect();

    if !formats.is_empty() {
        formats
    } else if day_first {
        DAY_FIRST_FORMATS.to_vec()
    } else {
        MONTH_FIRST_FORMATS.to_vec()
    }
}

fn parse_with(raw: &str, format: &str) -> Option<NaiveDate> {
    if let Ok(date) = NaiveDate::parse_from_str(raw, format) {
        return Some(date);
    }
    if let Ok(datetime) = NaiveDateTime::parse_from_str(raw, format) {
        return Some(datetime.date());
    }
    DATETIME_SUFFIXES.iter().find_map(|suffix| {
        NaiveDateTime::parse_from_str(raw, &format!("{}{}", format, suffix))
            .ok()
            .map(|dt| dt.date())
    })
}

/// First format that parses wins; time of day is dropped. `None` when every
/// format fails.
pub fn parse_date(raw: &str, configured: &str, day_first: bool) -> Option<NaiveDate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    date_formats(configured, day_first)
        .into_iter()
        .find_map(|format| parse_with(raw, format))
}

// ============================================================================
// NORMALIZE
// ============================================================================

fn cell(record: &[String], index: Option<usize>) -> &str {
    index
        .and_then(|i| record.get(i))
        .map(|v| v.trim())
        .unwrap_or("")
}

/// Map and coerce one raw frame into canonical rows.
///
/// Missing canonical columns fail with `Schema`. Rows with neither a parsed
/// date nor a description are blank or footer lines and dropped.
pub fn normalize(frame: &RawFrame, descriptor: &SourceDescriptor) -> Result<Vec<LedgerRow>> {
    let lookup = |canonical: &str| frame.column(descriptor.source_column(canonical));

    let mut missing: Vec<String> = REQUIRED
        .iter()
        .filter(|name| lookup(*name).is_none())
        .map(|name| name.to_string())
        .collect();

    let account_col = lookup("account");
    let fixed_account = descriptor.account.as_deref().map(str::trim).filter(|a| !a.is_empty());
    if account_col.is_none() && fixed_account.is_none() {
        missing.push("account".to_string());
    }

    if !missing.is_empty() {
        return Err(LedgerError::Schema {
            source_name: frame.source_name.clone(),
            missing,
        });
    }

    let date_col = lookup("date");
    let description_col = lookup("description");
    let info_col = lookup("info");
    let amount_col = lookup("amount");
    let record_type_col = lookup("record_type");

    let mut rows = Vec::with_capacity(frame.records.len());
    for (index, record) in frame.records.iter().enumerate() {
        let raw_date = cell(record, date_col);
        let description = cell(record, description_col);
        let date = parse_date(raw_date, &descriptor.date_format, descriptor.day_first);
        if date.is_none() && description.is_empty() {
            // blank or footer line, e.g. "Total,,,-3.5"
            continue;
        }
        if date.is_none() {
            debug!("{} line {}: unparsed date '{}'", frame.source_name, index + 2, raw_date);
        }

        let raw_amount = cell(record, amount_col);
        let amount = parse_amount(raw_amount).ok_or_else(|| {
            LedgerError::coercion(format!("{} line {}", frame.source_name, index + 2), "amount", raw_amount)
        })?;

        let account = match account_col {
            Some(_) => cell(record, account_col),
            None => fixed_account.unwrap_or_default(),
        };

        let mut row = LedgerRow::new(
            date,
            account,
            description,
            cell(record, info_col),
            amount,
            &frame.source_name,
        );
        row.row_type = RowType::parse(cell(record, record_type_col)).unwrap_or_default();
        rows.push(row);
    }

    debug!("normalized {}: {} rows", frame.source_name, rows.len());
    Ok(rows)
}

// ============================================================================
// TESTS
// ============================================================================
