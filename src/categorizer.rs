// 🏷️ Categorizer - Rules as Data
// Pattern rules assign class/category/sub_category, in file order, last match wins.
// `categorize_until_complete` loops until every row is categorized, reloading
// the rules between iterations so the operator can edit them mid-run.

use crate::error::{LedgerError, Result};
use crate::gate::{ConfirmationGate, GateContext, GatePayload};
use crate::ledger::LedgerRow;
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

// ============================================================================
// RULE RECORD (as written in the categories file)
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuleRecord {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub account: Option<String>,
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
}

// ============================================================================
// PATTERNS
// ============================================================================

/// Case-insensitive substring-or-regex match
#[derive(Debug, Clone)]
pub enum Pattern {
    Any,
    Regex(Regex),
}

impl Pattern {
    /// Empty, `*` and `.*` match anything. A pattern that is not a valid
    /// regex is searched for literally.
    pub fn parse(raw: Option<&str>) -> Pattern {
        let raw = raw.map(str::trim).unwrap_or("");
        if raw.is_empty() || raw == "*" || raw == ".*" {
            return Pattern::Any;
        }

        let regex = RegexBuilder::new(raw)
            .case_insensitive(true)
            .build()
            .or_else(|_| {
                RegexBuilder::new(&regex::escape(raw))
                    .case_insensitive(true)
                    .build()
            });

        match regex {
            Ok(re) => Pattern::Regex(re),
            // an escaped literal always compiles; keep the rule usable regardless
            Err(_) => Pattern::Any,
        }
    }

    pub fn matches(&self, text: &str) -> bool {
        match self {
            Pattern::Any => true,
            Pattern::Regex(re) => re.is_match(text),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountSign {
    Any,
    Pos,
    Neg,
    Zero,
}

impl AmountSign {
    pub fn parse(raw: Option<&str>) -> Option<AmountSign> {
        match raw.map(|s| s.trim().to_lowercase()).as_deref() {
            None | Some("") | Some("*") | Some(".*") => Some(AmountSign::Any),
            Some("pos") => Some(AmountSign::Pos),
            Some("neg") => Some(AmountSign::Neg),
            Some("zero") => Some(AmountSign::Zero),
            _ => None,
        }
    }

    pub fn matches(&self, amount: f64) -> bool {
        match self {
            AmountSign::Any => true,
            AmountSign::Pos => amount > 0.0,
            AmountSign::Neg => amount < 0.0,
            AmountSign::Zero => amount == 0.0,
        }
    }
}

// ============================================================================
// CATEGORIZATION RULE
// ============================================================================

#[derive(Debug, Clone)]
pub struct CategorizationRule {
    pub id: String,
    pub account: Pattern,
    pub description: Pattern,
    pub info: Pattern,
    pub amount_sign: AmountSign,
    pub class: Option<String>,
    pub category: Option<String>,
    pub sub_category: Option<String>,
}

impl CategorizationRule {
    pub fn matches(&self, row: &LedgerRow) -> bool {
        self.amount_sign.matches(row.amount)
            && self.account.matches(&row.account)
            && self.description.matches(&row.description)
            && self.info.matches(&row.info)
    }

    fn assign(&self, row: &mut LedgerRow) {
        row.rule_id = Some(self.id.clone());
        row.class = self.class.clone();
        row.category = self.category.clone();
        row.sub_category = self.sub_category.clone();
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_deref()
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Turn raw records into rules. Every rule needs an id; everything else
/// defaults to "match any".
pub fn validate(records: &[RuleRecord], file: &str) -> Result<Vec<CategorizationRule>> {
    let mut rules = Vec::with_capacity(records.len());

    for (index, record) in records.iter().enumerate() {
        // header is line 1
        let line = index + 2;

        let id = non_empty(&record.id).ok_or_else(|| {
            LedgerError::validation(
                file,
                format!("empty 'id' on line {}, add an id to each rule", line),
            )
        })?;

        let amount_sign = AmountSign::parse(record.amount.as_deref()).ok_or_else(|| {
            LedgerError::validation(
                file,
                format!(
                    "rule '{}': amount must be pos, neg, zero or empty, got '{}'",
                    id,
                    record.amount.as_deref().unwrap_or("")
                ),
            )
        })?;

        rules.push(CategorizationRule {
            id,
            account: Pattern::parse(record.account.as_deref()),
            description: Pattern::parse(record.description.as_deref()),
            info: Pattern::parse(record.info.as_deref()),
            amount_sign,
            class: non_empty(&record.class),
            category: non_empty(&record.category),
            sub_category: non_empty(&record.sub_category),
        });
    }

    Ok(rules)
}

/// Apply rules in order; a later matching rule overwrites an earlier one.
/// Rows no rule matches keep whatever they had.
pub fn apply(rows: &mut [LedgerRow], rules: &[CategorizationRule]) {
    for rule in rules {
        let mut matched = 0;
        for row in rows.iter_mut().filter(|row| rule.matches(row)) {
            rule.assign(row);
            matched += 1;
        }
        debug!("rule {}: {} rows", rule.id, matched);
    }
}

// ============================================================================
// RULE SOURCES
// ============================================================================

/// Where the loop gets a fresh rule set on each iteration
pub trait RuleSource {
    fn load(&mut self) -> Result<Vec<CategorizationRule>>;

    fn name(&self) -> String {
        "categories".to_string()
    }
}

/// The human-editable categories file
pub struct CsvRuleFile {
    path: PathBuf,
}

impl CsvRuleFile {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        CsvRuleFile {
            path: path.as_ref().to_path_buf(),
        }
    }
}

pub fn read_rule_records(path: &Path) -> Result<Vec<RuleRecord>> {
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_path(path)?;
    let mut records = Vec::new();
    for result in rdr.deserialize() {
        let record: RuleRecord = result?;
        records.push(record);
    }
    Ok(records)
}

impl RuleSource for CsvRuleFile {
    fn load(&mut self) -> Result<Vec<CategorizationRule>> {
        let records = read_rule_records(&self.path)?;
        info!("read categorization: {} ({} rules)", self.path.display(), records.len());
        validate(&records, &self.path.display().to_string())
    }

    fn name(&self) -> String {
        self.path.display().to_string()
    }
}

impl<F> RuleSource for F
where
    F: FnMut() -> Result<Vec<CategorizationRule>>,
{
    fn load(&mut self) -> Result<Vec<CategorizationRule>> {
        self()
    }
}

// ============================================================================
// CONVERGENCE LOOP
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategorizationState {
    Pending,
    PartiallyCategorized { remaining: usize },
    FullyCategorized,
}

#[derive(Debug)]
pub struct CategorizationOutcome {
    pub rows: Vec<LedgerRow>,
    pub iterations: usize,
    pub state: CategorizationState,
}

fn preview_line(row: &LedgerRow) -> String {
    format!(
        "{} | {} | {} | {} | {}",
        row.date_label(),
        row.account,
        row.description,
        row.info,
        row.amount
    )
}

/// Categorize until no row is left without a rule.
///
/// Each iteration reloads and validates the rules and applies them on top of
/// what earlier iterations assigned: within a rule set the last match wins,
/// and a row once categorized never goes back to uncategorized. While rows
/// remain uncategorized the gate blocks; declining aborts with a
/// `Validation` error.
pub fn categorize_until_complete<S, G>(
    mut rows: Vec<LedgerRow>,
    source: &mut S,
    gate: &mut G,
    preview_limit: usize,
) -> Result<CategorizationOutcome>
where
    S: RuleSource + ?Sized,
    G: ConfirmationGate + ?Sized,
{
    let mut state = CategorizationState::Pending;
    let mut iterations = 0;

    loop {
        debug!("categorization state: {:?}", state);
        let rules = source.load()?;
        iterations += 1;

        apply(&mut rows, &rules);

        let mut uncategorized: Vec<&LedgerRow> = rows.iter().filter(|r| !r.is_categorized()).collect();
        if uncategorized.is_empty() {
            state = CategorizationState::FullyCategorized;
            info!("all data categorized ok ({} iterations)", iterations);
            return Ok(CategorizationOutcome {
                rows,
                iterations,
                state,
            });
        }

        let remaining = uncategorized.len();
        state = CategorizationState::PartiallyCategorized { remaining };

        uncategorized.sort_by(|a, b| a.description.cmp(&b.description));
        let preview = uncategorized
            .iter()
            .take(preview_limit)
            .map(|row| preview_line(row))
            .collect();

        warn!("categories not found for {} rows", remaining);
        let payload = GatePayload::new(
            format!("ToDo: {} rows, update {} to categorize them", remaining, source.name()),
            remaining,
        )
        .with_preview(preview);

        if !gate.confirm(GateContext::RetryCategorization, &payload)? {
            return Err(LedgerError::validation(
                source.name(),
                format!("{} rows left uncategorized, edit the categories file and rerun", remaining),
            ));
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::ScriptedGate;
    use chrono::NaiveDate;

    fn create_test_row(account: &str, description: &str, info: &str, amount: f64) -> LedgerRow {
        LedgerRow::new(
            NaiveDate::from_ymd_opt(2024, 1, 5),
            account,
            description,
            info,
            amount,
            "bank.csv",
        )
    }

    fn record(id: &str, description: &str, amount: &str, class: &str) -> RuleRecord {
        RuleRecord {
            id: Some(id.to_string()),
            account: Some(".*".to_string()),
            description: Some(description.to_string()),
            info: Some(".*".to_string()),
            amount: Some(amount.to_string()),
            class: Some(class.to_string()),
            category: Some(format!("{}-category", class)),
            sub_category: None,
        }
    }

    #[test]
    fn test_netflix_scenario() {
        let rules = validate(&[record("1", "Netflix", "neg", "costs")], "categories.csv").unwrap();
        let mut rows = vec![create_test_row("A", "Netflix", "x", -11.65)];

        apply(&mut rows, &rules);

        assert_eq!(rows[0].class.as_deref(), Some("costs"));
        assert_eq!(rows[0].rule_id.as_deref(), Some("1"));
        assert!(rows[0].is_categorized());
    }

    #[test]
    fn test_pattern_case_insensitive_substring() {
        let pattern = Pattern::parse(Some("NETFLIX"));
        assert!(pattern.matches("netflix.com subscription"));
        assert!(!pattern.matches("spotify"));
    }

    #[test]
    fn test_pattern_regex_and_invalid_regex_literal() {
        let regex = Pattern::parse(Some("^k-market|s-market"));
        assert!(regex.matches("S-Market Kamppi"));
        assert!(regex.matches("K-Market"));

        let literal = Pattern::parse(Some("cafe (downtown"));
        assert!(literal.matches("CAFE (DOWNTOWN) 12"));
        assert!(!literal.matches("cafe downtown"));
    }

    #[test]
    fn test_empty_star_and_dotstar_match_any() {
        for raw in [None, Some(""), Some("*"), Some(".*")] {
            assert!(matches!(Pattern::parse(raw), Pattern::Any));
            assert_eq!(AmountSign::parse(raw), Some(AmountSign::Any));
        }
    }

    #[test]
    fn test_amount_sign() {
        assert!(AmountSign::Pos.matches(1.0));
        assert!(!AmountSign::Pos.matches(0.0));
        assert!(AmountSign::Neg.matches(-0.01));
        assert!(AmountSign::Zero.matches(0.0));
        assert_eq!(AmountSign::parse(Some("NEG")), Some(AmountSign::Neg));
        assert_eq!(AmountSign::parse(Some("negative")), None);
    }

    #[test]
    fn test_validate_requires_id() {
        let mut bad = record("", "Netflix", "neg", "costs");
        bad.id = None;
        let err = validate(&[record("1", "a", "", "b"), bad], "categories.csv").unwrap_err();

        match err {
            LedgerError::Validation { file, message } => {
                assert_eq!(file, "categories.csv");
                assert!(message.contains("line 3"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_validate_rejects_unknown_amount() {
        let err = validate(&[record("1", "a", "plus", "b")], "categories.csv").unwrap_err();
        assert!(matches!(err, LedgerError::Validation { .. }));
    }

    #[test]
    fn test_last_match_wins() {
        let rules = validate(
            &[
                record("general", "market", "", "groceries"),
                record("specific", "k-market", "", "snacks"),
            ],
            "categories.csv",
        )
        .unwrap();

        let mut rows = vec![
            create_test_row("A", "K-Market Kamppi", "", -5.0),
            create_test_row("A", "S-Market", "", -7.0),
        ];
        apply(&mut rows, &rules);

        assert_eq!(rows[0].rule_id.as_deref(), Some("specific"));
        assert_eq!(rows[0].class.as_deref(), Some("snacks"));
        assert_eq!(rows[1].rule_id.as_deref(), Some("general"));
    }

    #[test]
    fn test_apply_is_idempotent() {
        let rules = validate(
            &[record("1", "netflix", "neg", "costs"), record("2", "salary", "pos", "income")],
            "categories.csv",
        )
        .unwrap();
        let mut rows = vec![
            create_test_row("A", "Netflix", "x", -11.65),
            create_test_row("A", "Salary", "", 2500.0),
        ];

        apply(&mut rows, &rules);
        let first = rows.clone();
        apply(&mut rows, &rules);

        assert_eq!(rows, first);
    }

    #[test]
    fn test_account_and_info_patterns_are_anded() {
        let mut rec = record("1", ".*", "", "transfer");
        rec.account = Some("savings".to_string());
        rec.info = Some("own".to_string());
        let rules = validate(&[rec], "categories.csv").unwrap();

        let mut rows = vec![
            create_test_row("Savings 1", "Transfer", "own account", 100.0),
            create_test_row("Savings 1", "Transfer", "rent", 100.0),
            create_test_row("Checking", "Transfer", "own account", 100.0),
        ];
        apply(&mut rows, &rules);

        assert!(rows[0].is_categorized());
        assert!(!rows[1].is_categorized());
        assert!(!rows[2].is_categorized());
    }

    #[test]
    fn test_full_coverage_terminates_in_one_pass() {
        let mut source = || validate(&[record("all", "", "", "misc")], "categories.csv");
        let mut gate = ScriptedGate::silent();

        let outcome = categorize_until_complete(
            vec![create_test_row("A", "Netflix", "x", -11.65)],
            &mut source,
            &mut gate,
            25,
        )
        .unwrap();

        assert_eq!(outcome.iterations, 1);
        assert_eq!(outcome.state, CategorizationState::FullyCategorized);
        assert!(gate.calls.is_empty());
    }

    #[test]
    fn test_loop_reloads_rules_after_gate() {
        let mut loads = 0;
        let mut source = || {
            loads += 1;
            if loads == 1 {
                validate(&[record("1", "netflix", "neg", "costs")], "categories.csv")
            } else {
                validate(
                    &[record("1", "netflix", "neg", "costs"), record("2", "salary", "pos", "income")],
                    "categories.csv",
                )
            }
        };
        let mut gate = ScriptedGate::new([true]);

        let outcome = categorize_until_complete(
            vec![
                create_test_row("A", "Netflix", "x", -11.65),
                create_test_row("A", "Salary", "", 2500.0),
            ],
            &mut source,
            &mut gate,
            25,
        )
        .unwrap();

        assert_eq!(outcome.iterations, 2);
        assert!(outcome.rows.iter().all(|r| r.is_categorized()));

        let (context, payload) = &gate.calls[0];
        assert_eq!(*context, GateContext::RetryCategorization);
        assert_eq!(payload.count, 1);
        assert!(payload.preview[0].contains("Salary"));
    }

    #[test]
    fn test_categories_kept_when_rule_dropped_between_iterations() {
        let mut loads = 0;
        let mut source = || {
            loads += 1;
            if loads == 1 {
                validate(&[record("r1", "netflix", "neg", "costs")], "categories.csv")
            } else {
                // operator replaced the file with only the missing rule
                validate(&[record("r2", "salary", "pos", "income")], "categories.csv")
            }
        };
        let mut gate = ScriptedGate::new([true]);

        let outcome = categorize_until_complete(
            vec![
                create_test_row("A", "Netflix", "x", -11.65),
                create_test_row("A", "Salary", "", 2500.0),
            ],
            &mut source,
            &mut gate,
            25,
        )
        .unwrap();

        assert_eq!(outcome.iterations, 2);
        assert_eq!(outcome.state, CategorizationState::FullyCategorized);
        assert_eq!(gate.calls.len(), 1);
        assert_eq!(outcome.rows[0].rule_id.as_deref(), Some("r1"));
        assert_eq!(outcome.rows[0].class.as_deref(), Some("costs"));
        assert_eq!(outcome.rows[1].rule_id.as_deref(), Some("r2"));
    }

    #[test]
    fn test_preview_is_bounded() {
        let mut source = || validate(&[record("1", "nothing-matches-this", "", "x")], "categories.csv");
        let mut gate = ScriptedGate::new([false]);
        let rows = (0..10)
            .map(|i| create_test_row("A", &format!("shop {}", i), "", -1.0))
            .collect();

        let err = categorize_until_complete(rows, &mut source, &mut gate, 3).unwrap_err();

        assert!(err.to_string().contains("10 rows left uncategorized"));
        assert_eq!(gate.calls[0].1.preview.len(), 3);
        assert_eq!(gate.calls[0].1.count, 10);
    }
}
