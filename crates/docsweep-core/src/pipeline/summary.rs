//! Run state and aggregate outcome of a pipeline run.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::discovery::DiscoveryWarning;
use crate::error::{ErrorKind, WriteError};
use crate::types::{DocumentRef, ExtractionResult};

/// Coordinator state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Discovering,
    Processing,
    Finalizing,
    Done,
    Failed,
    Cancelled,
}

impl RunState {
    pub fn can_transition_to(self, next: RunState) -> bool {
        use RunState::*;
        matches!(
            (self, next),
            (Idle, Discovering)
                | (Discovering, Processing)
                | (Discovering, Failed)
                | (Discovering, Finalizing)
                | (Processing, Finalizing)
                | (Finalizing, Done)
                | (Finalizing, Cancelled)
                | (Finalizing, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::Done | RunState::Failed | RunState::Cancelled)
    }

    /// Process exit status for a run that ended in this state.
    pub fn exit_code(self) -> i32 {
        match self {
            RunState::Done => 0,
            RunState::Failed => 2,
            RunState::Cancelled => 3,
            _ => 1,
        }
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            RunState::Idle => "idle",
            RunState::Discovering => "discovering",
            RunState::Processing => "processing",
            RunState::Finalizing => "finalizing",
            RunState::Done => "done",
            RunState::Failed => "failed",
            RunState::Cancelled => "cancelled",
        };
        write!(f, "{name}")
    }
}

/// A document that could not be extracted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureRecord {
    pub path: String,
    pub kind: ErrorKind,
    pub message: String,
}

/// An artifact that could not be written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WriteWarning {
    pub path: String,
    pub output: String,
    pub message: String,
}

#[derive(Debug, Clone)]
struct Outcome {
    relative_path: String,
    failure: Option<(ErrorKind, String)>,
}

/// Aggregate outcome, owned and updated only by the coordinator.
#[derive(Debug, Clone)]
pub struct RunSummary {
    state: RunState,
    discovered: usize,
    /// Keyed by source path; relative paths can repeat for non-UTF-8 names
    outcomes: HashMap<PathBuf, Outcome>,
    write_warnings: Vec<WriteWarning>,
    discovery_warnings: Vec<DiscoveryWarning>,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl Default for RunSummary {
    fn default() -> Self {
        Self::new()
    }
}

impl RunSummary {
    pub fn new() -> Self {
        Self {
            state: RunState::Idle,
            discovered: 0,
            outcomes: HashMap::new(),
            write_warnings: Vec::new(),
            discovery_warnings: Vec::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Move to `next`. Invalid transitions are logged and ignored.
    pub fn transition(&mut self, next: RunState) -> bool {
        if !self.state.can_transition_to(next) {
            tracing::error!(from = %self.state, to = %next, "Invalid run state transition");
            return false;
        }
        tracing::debug!(from = %self.state, to = %next, "Run state changed");
        self.state = next;
        if next.is_terminal() {
            self.finished_at = Some(Utc::now());
        }
        true
    }

    pub fn set_discovered(&mut self, count: usize, warnings: Vec<DiscoveryWarning>) {
        self.discovered = count;
        self.discovery_warnings = warnings;
    }

    /// Record the outcome for one document. A second outcome for the same
    /// document is ignored.
    pub fn record(&mut self, doc: &DocumentRef, result: &ExtractionResult) {
        if self.outcomes.contains_key(&doc.path) {
            tracing::warn!(path = %doc.relative_path, "Duplicate outcome ignored");
            return;
        }
        let failure = match result {
            ExtractionResult::Success { .. } => None,
            ExtractionResult::Failure { kind, message } => Some((*kind, message.clone())),
        };
        self.outcomes.insert(
            doc.path.clone(),
            Outcome {
                relative_path: doc.relative_path.clone(),
                failure,
            },
        );
    }

    pub fn record_write_error(&mut self, doc: &DocumentRef, err: &WriteError) {
        self.write_warnings.push(WriteWarning {
            path: doc.relative_path.clone(),
            output: err.path.display().to_string(),
            message: err.source.to_string(),
        });
    }

    pub fn discovered(&self) -> usize {
        self.discovered
    }

    pub fn succeeded(&self) -> usize {
        self.outcomes
            .values()
            .filter(|o| o.failure.is_none())
            .count()
    }

    pub fn failed(&self) -> usize {
        self.outcomes.len() - self.succeeded()
    }

    pub fn processed(&self) -> usize {
        self.outcomes.len()
    }

    /// Discovered documents with no recorded outcome.
    pub fn pending(&self) -> usize {
        self.discovered.saturating_sub(self.outcomes.len())
    }

    /// Failed documents sorted by relative path.
    pub fn failures(&self) -> Vec<FailureRecord> {
        let mut failures: Vec<(&PathBuf, FailureRecord)> = self
            .outcomes
            .iter()
            .filter_map(|(source, outcome)| {
                let (kind, message) = outcome.failure.as_ref()?;
                Some((
                    source,
                    FailureRecord {
                        path: outcome.relative_path.clone(),
                        kind: *kind,
                        message: message.clone(),
                    },
                ))
            })
            .collect();
        // Source path breaks ties between lossy twins.
        failures.sort_by(|a, b| a.1.path.cmp(&b.1.path).then_with(|| a.0.cmp(b.0)));
        failures.into_iter().map(|(_, record)| record).collect()
    }

    pub fn write_warnings(&self) -> &[WriteWarning] {
        &self.write_warnings
    }

    pub fn discovery_warnings(&self) -> &[DiscoveryWarning] {
        &self.discovery_warnings
    }

    pub fn exit_code(&self) -> i32 {
        self.state.exit_code()
    }

    /// Serializable snapshot for the run summary artifact.
    pub fn report(&self) -> SummaryReport {
        let mut write_warnings = self.write_warnings.clone();
        write_warnings.sort_by(|a, b| a.path.cmp(&b.path));

        let finished_at = self.finished_at.unwrap_or_else(Utc::now);
        SummaryReport {
            state: self.state,
            discovered: self.discovered,
            succeeded: self.succeeded(),
            failed: self.failed(),
            pending: self.pending(),
            failures: self.failures(),
            write_warnings,
            discovery_warnings: self.discovery_warnings.clone(),
            started_at: self.started_at,
            finished_at,
            elapsed_ms: (finished_at - self.started_at).num_milliseconds().max(0),
        }
    }
}

/// JSON shape of `run-summary.json`.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryReport {
    pub state: RunState,
    pub discovered: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub pending: usize,
    pub failures: Vec<FailureRecord>,
    pub write_warnings: Vec<WriteWarning>,
    pub discovery_warnings: Vec<DiscoveryWarning>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: i64,
}
