// 🚦 Confirmation Gates - the only points where a run waits on a human
//
// Production wires `ConsoleGate` (blocks on stdin, no timeout). Tests inject
// `ScriptedGate` with canned answers.

use crate::error::{LedgerError, Result};
use crossterm::style::Stylize;
use serde::Serialize;
use std::collections::VecDeque;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

// ============================================================================
// CONTEXT & PAYLOAD
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateContext {
    /// Rows are still uncategorized; operator edits the rules and retries
    RetryCategorization,
    /// Categorization or identity changes against the previous ledger
    AcceptChanges,
    /// New duplicate identities
    AcceptDuplicates,
}

impl GateContext {
    pub fn name(&self) -> &'static str {
        match self {
            GateContext::RetryCategorization => "retry_categorization",
            GateContext::AcceptChanges => "accept_changes",
            GateContext::AcceptDuplicates => "accept_duplicates",
        }
    }
}

/// What the operator is asked to decide on
#[derive(Debug, Clone, Default, Serialize)]
pub struct GatePayload {
    pub message: String,
    /// Rows behind the decision (uncategorized rows, changes, duplicates)
    pub count: usize,
    /// Bounded preview lines shown inline
    pub preview: Vec<String>,
    /// Report files written for review
    pub reports: Vec<PathBuf>,
}

impl GatePayload {
    pub fn new(message: impl Into<String>, count: usize) -> Self {
        GatePayload {
            message: message.into(),
            count,
            ..Default::default()
        }
    }

    pub fn with_preview(mut self, preview: Vec<String>) -> Self {
        self.preview = preview;
        self
    }

    pub fn with_report(mut self, report: PathBuf) -> Self {
        self.reports.push(report);
        self
    }
}

// ============================================================================
// GATE TRAIT
// ============================================================================

/// A blocking decision point. `Ok(true)` proceeds, `Ok(false)` declines.
pub trait ConfirmationGate {
    fn confirm(&mut self, context: GateContext, payload: &GatePayload) -> Result<bool>;
}

impl<G: ConfirmationGate + ?Sized> ConfirmationGate for &mut G {
    fn confirm(&mut self, context: GateContext, payload: &GatePayload) -> Result<bool> {
        (**self).confirm(context, payload)
    }
}

// ============================================================================
// CONSOLE GATE
// ============================================================================

/// Interactive operator prompt on stdin/stdout
pub struct ConsoleGate<R: BufRead, W: Write> {
    input: R,
    output: W,
}

impl ConsoleGate<io::StdinLock<'static>, io::Stdout> {
    pub fn stdio() -> Self {
        ConsoleGate {
            input: io::stdin().lock(),
            output: io::stdout(),
        }
    }
}

impl<R: BufRead, W: Write> ConsoleGate<R, W> {
    pub fn new(input: R, output: W) -> Self {
        ConsoleGate { input, output }
    }

    fn prompt(context: GateContext) -> &'static str {
        match context {
            GateContext::RetryCategorization => {
                "Update the categories file and press enter to re-categorize (ctrl + c to quit)"
            }
            GateContext::AcceptChanges => "accept changes? (y/n)",
            GateContext::AcceptDuplicates => "accept new duplicates? (y/n)",
        }
    }
}

impl<R: BufRead, W: Write> ConfirmationGate for ConsoleGate<R, W> {
    fn confirm(&mut self, context: GateContext, payload: &GatePayload) -> Result<bool> {
        writeln!(self.output)?;
        writeln!(self.output, "{}", payload.message.as_str().yellow().bold())?;
        for line in &payload.preview {
            writeln!(self.output, "  {}", line)?;
        }
        for report in &payload.reports {
            writeln!(self.output, "  review: {}", report.display().to_string().cyan())?;
        }
        writeln!(self.output)?;
        writeln!(self.output, "{}", Self::prompt(context))?;
        self.output.flush()?;

        let mut answer = String::new();
        let read = self.input.read_line(&mut answer)?;
        if read == 0 {
            return Err(LedgerError::Gate("input closed while waiting for a decision".to_string()));
        }

        match context {
            // enter means "rules edited, go again"
            GateContext::RetryCategorization => Ok(true),
            _ => Ok(answer.trim().eq_ignore_ascii_case("y")),
        }
    }
}

// ============================================================================
// SCRIPTED GATE
// ============================================================================

/// Deterministic gate: answers are consumed in order, every call is recorded.
/// Running out of answers is an error, never a hang.
#[derive(Debug, Default)]
pub struct ScriptedGate {
    answers: VecDeque<bool>,
    pub calls: Vec<(GateContext, GatePayload)>,
}

impl ScriptedGate {
    pub fn new(answers: impl IntoIterator<Item = bool>) -> Self {
        ScriptedGate {
            answers: answers.into_iter().collect(),
            calls: Vec::new(),
        }
    }

    /// A gate that must never be consulted
    pub fn silent() -> Self {
        Self::new([])
    }

    pub fn calls_for(&self, context: GateContext) -> usize {
        self.calls.iter().filter(|(c, _)| *c == context).count()
    }
}

impl ConfirmationGate for ScriptedGate {
    fn confirm(&mut self, context: GateContext, payload: &GatePayload) -> Result<bool> {
        self.calls.push((context, payload.clone()));
        self.answers
            .pop_front()
            .ok_or_else(|| LedgerError::Gate(format!("no scripted answer for {}", context.name())))
    }
}
