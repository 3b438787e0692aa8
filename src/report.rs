// ABOUTME: Migration report aggregating outcomes and verification results
// ABOUTME: Renders the end-of-run summary as text or JSON

use crate::classify::KindCounts;
use crate::dump::{CleanStats, DetectedEncoding};
use crate::import::{FailurePolicy, ImportOutcome, ImportRun, StopReason};
use crate::utils::truncate_for_display;
use crate::verify::TableVerification;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;

/// Error samples shown in the summary
pub const ERROR_SAMPLE_LIMIT: usize = 10;
/// Characters kept from each sampled error message
pub const ERROR_SAMPLE_CHARS: usize = 160;

/// Stage a run is in; `Done` and `Aborted` are final
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunState {
    Decoding,
    Cleaning,
    Segmenting,
    Classifying,
    Executing,
    Verifying,
    Done,
    Aborted,
}

impl RunState {
    pub fn is_final(&self) -> bool {
        matches!(self, RunState::Done | RunState::Aborted)
    }

    /// Whether the pipeline may move from `self` to `next`
    ///
    /// Stages only move forward. A clean-only run finishes after
    /// classification, verification may be skipped, and any non-final state
    /// may abort.
    pub fn can_advance_to(&self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Decoding, Cleaning)
                | (Cleaning, Segmenting)
                | (Segmenting, Classifying)
                | (Classifying, Executing)
                | (Classifying, Done)
                | (Executing, Verifying)
                | (Executing, Done)
                | (Verifying, Done)
        ) || (!self.is_final() && next == Aborted)
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Decoding => "decoding",
            RunState::Cleaning => "cleaning",
            RunState::Segmenting => "segmenting",
            RunState::Classifying => "classifying",
            RunState::Executing => "executing",
            RunState::Verifying => "verifying",
            RunState::Done => "done",
            RunState::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Aggregate of one migration run
///
/// `succeeded + failed` always equals the number of attempted statements;
/// each outcome is counted exactly once.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationReport {
    pub source: Option<PathBuf>,
    pub encoding: Option<DetectedEncoding>,
    /// SHA-256 of the raw dump
    pub fingerprint: Option<String>,
    pub target: Option<String>,
    pub clean_stats: Option<CleanStats>,
    pub total_statements: usize,
    pub kinds: KindCounts,
    pub eligible: usize,
    /// Data statements skipped by the table filter
    pub filtered: usize,
    pub failure_policy: FailurePolicy,
    pub outcomes: Vec<ImportOutcome>,
    pub not_attempted: usize,
    pub stopped: Option<StopReason>,
    pub verification: Vec<TableVerification>,
    pub state: RunState,
}

impl Default for MigrationReport {
    fn default() -> Self {
        Self {
            source: None,
            encoding: None,
            fingerprint: None,
            target: None,
            clean_stats: None,
            total_statements: 0,
            kinds: KindCounts::default(),
            eligible: 0,
            filtered: 0,
            failure_policy: FailurePolicy::default(),
            outcomes: Vec::new(),
            not_attempted: 0,
            stopped: None,
            verification: Vec::new(),
            state: RunState::Decoding,
        }
    }
}

impl MigrationReport {
    /// Fold the executor's results into the report
    pub fn record_import(&mut self, run: ImportRun) {
        self.outcomes = run.outcomes;
        self.not_attempted = run.not_attempted;
        self.stopped = run.stopped;
    }

    pub fn attempted(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes.iter().filter(|o| o.success).count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.success).count()
    }

    pub fn has_failures(&self) -> bool {
        self.failed() > 0
    }

    /// True when the operator interrupted the run
    pub fn interrupted(&self) -> bool {
        self.stopped == Some(StopReason::Cancelled)
    }

    pub fn verification_problems(&self) -> usize {
        self.verification
            .iter()
            .filter(|v| v.status() != crate::verify::VerificationStatus::Ok)
            .count()
    }

    /// First `limit` failure messages, each cut to a bounded length
    pub fn sample_errors(&self, limit: usize) -> Vec<String> {
        self.outcomes
            .iter()
            .filter_map(|o| o.error.as_ref())
            .take(limit)
            .map(|e| {
                format!(
                    "#{}: {}",
                    e.ordinal,
                    truncate_for_display(&e.message, ERROR_SAMPLE_CHARS)
                )
            })
            .collect()
    }

    /// Machine-readable form of the report
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "state": self.state,
            "source": self.source,
            "encoding": self.encoding,
            "fingerprint": self.fingerprint,
            "target": self.target,
            "clean": self.clean_stats,
            "statements": {
                "total": self.total_statements,
                "kinds": self.kinds,
                "eligible": self.eligible,
                "filtered": self.filtered,
                "attempted": self.attempted(),
                "succeeded": self.succeeded(),
                "failed": self.failed(),
                "not_attempted": self.not_attempted,
            },
            "failure_policy": self.failure_policy,
            "stopped": self.stopped,
            "interrupted": self.interrupted(),
            "errors": self.outcomes.iter().filter_map(|o| o.error.as_ref()).collect::<Vec<_>>(),
            "verification": self.verification,
        })
    }
}

impl fmt::Display for MigrationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "========================================")?;
        writeln!(f, "Migration report ({})", self.state)?;
        writeln!(f, "========================================")?;

        if let Some(ref source) = self.source {
            writeln!(f, "Source:       {}", source.display())?;
        }
        if let Some(encoding) = self.encoding {
            writeln!(f, "Encoding:     {}", encoding)?;
        }
        if let Some(ref fingerprint) = self.fingerprint {
            writeln!(f, "SHA-256:      {}", fingerprint)?;
        }
        if let Some(ref target) = self.target {
            writeln!(f, "Target:       {}", target)?;
        }
        writeln!(f)?;

        writeln!(f, "Statements seen:   {}", self.total_statements)?;
        writeln!(
            f,
            "  data {} / schema {} / transaction {} / unknown {}",
            self.kinds.data_dml,
            self.kinds.schema_ddl,
            self.kinds.transaction_control,
            self.kinds.unknown
        )?;
        writeln!(f, "Eligible:          {}", self.eligible)?;
        if self.filtered > 0 {
            writeln!(f, "Filtered by table: {}", self.filtered)?;
        }
        writeln!(f, "Succeeded:         {}", self.succeeded())?;
        writeln!(f, "Failed:            {}", self.failed())?;
        if self.not_attempted > 0 {
            writeln!(f, "Not attempted:     {}", self.not_attempted)?;
        }
        match self.stopped {
            Some(StopReason::Cancelled) => writeln!(
                f,
                "Run was interrupted by the operator. It finished cleanly at a \
                 statement boundary; exit code 130 means done but interrupted."
            )?,
            Some(StopReason::FailedFast { ordinal }) => writeln!(
                f,
                "Stopped at statement #{} (on error: {})",
                ordinal, self.failure_policy
            )?,
            None => {}
        }

        if self.has_failures() {
            writeln!(f)?;
            writeln!(
                f,
                "⚠ {} statement(s) failed. Rows that succeeded were committed; \
                 the target now holds a partial import.",
                self.failed()
            )?;
            for sample in self.sample_errors(ERROR_SAMPLE_LIMIT) {
                writeln!(f, "  {}", sample)?;
            }
            if self.failed() > ERROR_SAMPLE_LIMIT {
                writeln!(f, "  ... and {} more", self.failed() - ERROR_SAMPLE_LIMIT)?;
            }
        }

        if !self.verification.is_empty() {
            writeln!(f)?;
            f.write_str(&render_verification(&self.verification))?;
        }

        Ok(())
    }
}

/// Render per-table verification results as an aligned text table
pub fn render_verification(results: &[TableVerification]) -> String {
    let mut out = format!("{:<32} {:>10} {:>10}  status\n", "table", "rows", "expected");

    for v in results {
        let rows = v
            .actual_rows
            .map(|n| n.to_string())
            .unwrap_or_else(|| "-".to_string());
        out.push_str(&format!(
            "{:<32} {:>10} {:>10}  {}\n",
            v.table,
            rows,
            v.expected.to_string(),
            v.status()
        ));
        if let Some(ref error) = v.error {
            out.push_str(&format!(
                "    {}\n",
                truncate_for_display(&error.message, ERROR_SAMPLE_CHARS)
            ));
        }
        for row in &v.sample_rows {
            out.push_str(&format!("    {}\n", row));
        }
    }

    out
}
