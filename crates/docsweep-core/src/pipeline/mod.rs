//! Batch pipeline coordinator.
//!
//! # Architecture
//!
//! ```text
//!  input root
//!      │
//!      ▼
//!  Discovery (once, sorted)
//!      │
//!      ▼
//!  OutputPlan ── bounded queue ──► Worker pool (N)
//!                                     │
//!                          ┌──────────┴──────────┐
//!                          ▼                     ▼
//!                      Extractor           ResultWriter
//!                  (blocking + deadline)   (temp + rename)
//!                          └──────────┬──────────┘
//!                                     ▼
//!                            RunSummary (coordinator)
//!                                     │
//!                                     ▼
//!                             run-summary.json
//! ```
//!
//! State machine: `Idle → Discovering → Processing → Finalizing → Done`,
//! ending in `Failed` when discovery is fatal or `Cancelled` when the
//! cancellation token fires before every document is processed.

mod summary;
mod workers;
mod writer;

pub use summary::{FailureRecord, RunState, RunSummary, SummaryReport, WriteWarning};
pub use workers::{run_pool, DocumentOutcome, PoolConfig, PoolStats};
pub use writer::{write_atomic, OutputPlan, ResultWriter};

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::config::{PipelineConfig, RUN_SUMMARY_FILE};
use crate::discovery::{self, Discovered};
use crate::error::{DiscoveryError, PipelineError, WriteError};
use crate::extract::Extractor;
use crate::pdf::{LopdfBackend, PdfBackend};
use crate::types::DocumentRef;

/// Owns one end-to-end run.
pub struct Pipeline<B> {
    config: PipelineConfig,
    extractor: Extractor<B>,
    cancel: CancellationToken,
}

impl Pipeline<LopdfBackend> {
    /// Pipeline backed by the lopdf parser.
    pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
        Self::with_backend(config, LopdfBackend)
    }
}

impl<B: PdfBackend> Pipeline<B> {
    /// Pipeline with a custom extraction backend.
    pub fn with_backend(config: PipelineConfig, backend: B) -> Result<Self, PipelineError> {
        let config = config.validate()?;
        let extractor = Extractor::new(backend, config.timeout);
        Ok(Self {
            config,
            extractor,
            cancel: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Token that cancels this run when triggered.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run discovery, processing and finalization.
    ///
    /// Returns `Err` only for run-level failures: a fatal discovery error,
    /// an unusable output root, or a run summary that cannot be written.
    /// Per-document failures are inside the returned summary.
    pub async fn run(self) -> Result<RunSummary, PipelineError> {
        let mut summary = RunSummary::new();
        summary.transition(RunState::Discovering);

        let Discovered {
            documents,
            warnings,
        } = match self.discover().await {
            Ok(found) => found,
            Err(e) => {
                tracing::error!(error = %e, "Discovery failed");
                summary.transition(RunState::Failed);
                return Err(e);
            }
        };
        summary.set_discovered(documents.len(), warnings);

        tokio::fs::create_dir_all(&self.config.output_root)
            .await
            .map_err(|source| PipelineError::OutputRoot {
                path: self.config.output_root.clone(),
                source,
            })?;

        if self.cancel.is_cancelled() {
            tracing::info!("Cancelled before processing started");
        } else {
            summary.transition(RunState::Processing);
            self.process(documents, &mut summary).await;
        }

        self.finalize(summary).await
    }

    async fn discover(&self) -> Result<Discovered, PipelineError> {
        let config = self.config.clone();
        let found = tokio::task::spawn_blocking(move || discovery::discover(&config))
            .await
            .map_err(|e| {
                PipelineError::Discovery(DiscoveryError::RootInaccessible {
                    path: self.config.input_root.clone(),
                    source: std::io::Error::other(e.to_string()),
                })
            })??;
        Ok(found)
    }

    async fn process(&self, documents: Vec<DocumentRef>, summary: &mut RunSummary) {
        let plan = OutputPlan::new(&documents, &self.config.output_extension);
        let writer = Arc::new(ResultWriter::new(
            &self.config.output_root,
            plan,
            &self.config.output_extension,
        ));
        let total = documents.len();

        tracing::info!(
            documents = total,
            workers = self.config.workers,
            timeout_secs = self.extractor.timeout().as_secs_f64(),
            "Processing started"
        );

        let stats = run_pool(
            documents,
            self.extractor.clone(),
            writer,
            PoolConfig {
                workers: self.config.workers,
                queue_capacity: self.config.queue_capacity,
            },
            self.cancel.clone(),
            |outcome| {
                summary.record(&outcome.doc, &outcome.result);
                if let Err(ref e) = outcome.written {
                    tracing::warn!(path = %outcome.doc.relative_path, error = %e, "Artifact not written");
                    summary.record_write_error(&outcome.doc, e);
                }
                tracing::info!(
                    path = %outcome.doc.relative_path,
                    ok = outcome.result.is_success(),
                    processed = summary.processed(),
                    total,
                    "Document processed"
                );
            },
        )
        .await;

        tracing::debug!(
            dispatched = stats.dispatched,
            completed = stats.completed,
            cancelled = stats.cancelled,
            "Processing finished"
        );

        let abandoned = self.extractor.abandoned();
        if abandoned > 0 {
            tracing::warn!(abandoned, "Timed-out extractions still hold blocking threads");
        }
    }

    async fn finalize(&self, mut summary: RunSummary) -> Result<RunSummary, PipelineError> {
        summary.transition(RunState::Finalizing);

        let terminal = if summary.pending() > 0 {
            RunState::Cancelled
        } else {
            RunState::Done
        };
        summary.transition(terminal);

        let report = summary.report();
        let path = self.config.output_root.join(RUN_SUMMARY_FILE);
        let bytes = serde_json::to_vec_pretty(&report).map_err(|e| {
            PipelineError::Summary(WriteError {
                path: path.clone(),
                source: std::io::Error::other(e),
            })
        })?;
        write_atomic(&path, &bytes)
            .await
            .map_err(PipelineError::Summary)?;

        tracing::info!(
            state = %report.state,
            discovered = report.discovered,
            succeeded = report.succeeded,
            failed = report.failed,
            pending = report.pending,
            write_warnings = report.write_warnings.len(),
            elapsed_ms = report.elapsed_ms,
            "Run finished"
        );

        Ok(summary)
    }
}
