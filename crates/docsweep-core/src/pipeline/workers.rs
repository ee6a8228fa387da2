//! Bounded worker pool.
//!
//! A feeder task pushes documents into a bounded channel and blocks when it
//! is full. The dispatch loop only pulls from the channel while fewer than
//! `workers` tasks are in flight, so memory stays bounded by
//! `queue_capacity + workers` documents beyond the discovery list.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::{self, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::error::{ErrorKind, WriteError};
use crate::extract::Extractor;
use crate::pdf::PdfBackend;
use crate::types::{DocumentRef, ExtractionResult};

use super::writer::ResultWriter;

/// Pool sizing.
#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub workers: usize,
    pub queue_capacity: usize,
}

/// Everything that happened to one document.
#[derive(Debug)]
pub struct DocumentOutcome {
    pub doc: Arc<DocumentRef>,
    pub result: ExtractionResult,
    pub written: Result<PathBuf, WriteError>,
}

/// Counters returned when the pool drains.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub dispatched: usize,
    pub completed: usize,
    /// Whether the pool stopped dispatching because of cancellation
    pub cancelled: bool,
}

/// Extract and write every document, calling `on_outcome` as each finishes.
///
/// Completion order is unconstrained. On cancellation no further documents
/// are dispatched; in-flight work still runs to completion (or its timeout)
/// and is reported.
pub async fn run_pool<B, F>(
    documents: Vec<DocumentRef>,
    extractor: Extractor<B>,
    writer: Arc<ResultWriter>,
    config: PoolConfig,
    cancel: CancellationToken,
    mut on_outcome: F,
) -> PoolStats
where
    B: PdfBackend,
    F: FnMut(DocumentOutcome),
{
    let workers = config.workers.max(1);
    let (tx, mut rx) = mpsc::channel::<Arc<DocumentRef>>(config.queue_capacity.max(1));

    let feeder_cancel = cancel.clone();
    let feeder = tokio::spawn(async move {
        for doc in documents {
            tokio::select! {
                biased;

                _ = feeder_cancel.cancelled() => break,

                sent = tx.send(Arc::new(doc)) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut in_flight: JoinSet<DocumentOutcome> = JoinSet::new();
    // The task's document, so a task that dies still gets a record.
    let mut tasks: HashMap<task::Id, Arc<DocumentRef>> = HashMap::new();
    let mut stats = PoolStats::default();
    let mut queue_open = true;

    loop {
        if !queue_open && in_flight.is_empty() {
            break;
        }

        tokio::select! {
            biased;

            _ = cancel.cancelled() => {
                tracing::info!(in_flight = in_flight.len(), "Cancellation requested, draining workers");
                stats.cancelled = true;
                break;
            }

            // Accept new work only while there is a free worker
            next = rx.recv(), if queue_open && in_flight.len() < workers => match next {
                Some(doc) => {
                    stats.dispatched += 1;
                    let handle = in_flight.spawn(process_one(doc.clone(), extractor.clone(), writer.clone()));
                    tasks.insert(handle.id(), doc);
                }
                None => queue_open = false,
            },

            Some(joined) = in_flight.join_next_with_id() => {
                if let Some(outcome) = settle(joined, &mut tasks, &writer).await {
                    stats.completed += 1;
                    on_outcome(outcome);
                }
            }
        }
    }

    // Stop the feeder and drop whatever it had queued.
    rx.close();
    feeder.abort();

    while let Some(joined) = in_flight.join_next_with_id().await {
        if let Some(outcome) = settle(joined, &mut tasks, &writer).await {
            stats.completed += 1;
            on_outcome(outcome);
        }
    }

    tracing::debug!(
        dispatched = stats.dispatched,
        completed = stats.completed,
        "Worker pool drained"
    );
    stats
}

async fn process_one<B: PdfBackend>(
    doc: Arc<DocumentRef>,
    extractor: Extractor<B>,
    writer: Arc<ResultWriter>,
) -> DocumentOutcome {
    let work = async {
        let result = extractor.extract(&doc).await;
        let written = writer.write(&doc, &result).await;
        (result, written)
    };

    match AssertUnwindSafe(work).catch_unwind().await {
        Ok((result, written)) => DocumentOutcome {
            doc,
            result,
            written,
        },
        Err(_) => {
            tracing::error!(path = %doc.relative_path, "Worker panicked");
            let result = ExtractionResult::failure(ErrorKind::Corrupt, "worker panicked");
            let written = writer.write(&doc, &result).await;
            DocumentOutcome {
                doc,
                result,
                written,
            }
        }
    }
}

/// Turn a joined task into its outcome. A task that died without returning
/// one is recorded as corrupt against the document it was carrying.
async fn settle(
    joined: Result<(task::Id, DocumentOutcome), task::JoinError>,
    tasks: &mut HashMap<task::Id, Arc<DocumentRef>>,
    writer: &ResultWriter,
) -> Option<DocumentOutcome> {
    match joined {
        Ok((id, outcome)) => {
            tasks.remove(&id);
            Some(outcome)
        }
        Err(e) => {
            let Some(doc) = tasks.remove(&e.id()) else {
                tracing::error!(error = %e, "Unknown worker task failed");
                return None;
            };
            tracing::error!(path = %doc.relative_path, error = %e, "Worker task failed");
            let result = ExtractionResult::failure(ErrorKind::Corrupt, format!("worker task failed: {e}"));
            let written = writer.write(&doc, &result).await;
            Some(DocumentOutcome {
                doc,
                result,
                written,
            })
        }
    }
}
