//! Per-document extraction boundary.
//!
//! Every parse runs on the blocking pool under a hard deadline. Whatever
//! happens inside the backend (an error, a panic, a hang) comes back out as
//! an [`ExtractionResult`]; nothing escapes to other documents.

use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{ErrorKind, ParseError};
use crate::pdf::PdfBackend;
use crate::types::{DocumentRef, ExtractedContent, ExtractionResult};

/// Runs a [`PdfBackend`] for one document at a time with fault containment.
pub struct Extractor<B> {
    backend: Arc<B>,
    timeout: Duration,
    /// Timed-out attempts whose blocking thread has not returned yet
    abandoned: Arc<AtomicUsize>,
}

impl<B> Clone for Extractor<B> {
    fn clone(&self) -> Self {
        Self {
            backend: self.backend.clone(),
            timeout: self.timeout,
            abandoned: self.abandoned.clone(),
        }
    }
}

impl<B: PdfBackend> Extractor<B> {
    pub fn new(backend: B, timeout: Duration) -> Self {
        Self {
            backend: Arc::new(backend),
            timeout,
            abandoned: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Blocking threads still held by attempts that already timed out.
    /// A parser stuck before its first checkpoint keeps one until it returns.
    pub fn abandoned(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }

    /// Extract one document.
    ///
    /// On timeout the attempt's token is cancelled so the backend can drop
    /// its parsed state at the next checkpoint; this call returns at the
    /// deadline without waiting for it.
    pub async fn extract(&self, doc: &DocumentRef) -> ExtractionResult {
        let cancel = CancellationToken::new();
        // Dropping this future (or returning) releases the attempt.
        let _guard = cancel.clone().drop_guard();

        let backend = self.backend.clone();
        let path = doc.path.clone();
        let attempt = cancel.clone();

        let mut task = tokio::task::spawn_blocking(move || {
            let handle = backend.open(&path)?;
            if attempt.is_cancelled() {
                return Err(ParseError::Cancelled);
            }
            backend.extract(handle, &attempt)
        });

        let outcome = tokio::time::timeout(self.timeout, &mut task).await;
        match outcome {
            Ok(Ok(Ok(content))) => {
                tracing::debug!(
                    path = %doc.relative_path,
                    pages = content.page_count(),
                    "Extraction succeeded"
                );
                ExtractionResult::Success { content }
            }
            Ok(Ok(Err(e))) => {
                tracing::warn!(path = %doc.relative_path, kind = %e.kind(), error = %e, "Extraction failed");
                ExtractionResult::failure(e.kind(), e.to_string())
            }
            Ok(Err(join_err)) if join_err.is_panic() => {
                let message = panic_message(join_err.into_panic());
                tracing::error!(path = %doc.relative_path, panic = %message, "Parser panicked");
                ExtractionResult::failure(ErrorKind::Corrupt, format!("parser panicked: {message}"))
            }
            Ok(Err(join_err)) => {
                tracing::error!(path = %doc.relative_path, error = %join_err, "Extraction task aborted");
                ExtractionResult::failure(ErrorKind::Corrupt, join_err.to_string())
            }
            Err(_) => {
                cancel.cancel();
                let abandoned = self.abandoned.fetch_add(1, Ordering::SeqCst) + 1;
                tracing::warn!(
                    path = %doc.relative_path,
                    timeout_secs = self.timeout.as_secs_f64(),
                    abandoned,
                    "Extraction timed out"
                );
                self.watch_abandoned(task, doc.relative_path.clone());
                ExtractionResult::failure(
                    ErrorKind::Timeout,
                    format!(
                        "extraction exceeded {:.1}s budget",
                        self.timeout.as_secs_f64()
                    ),
                )
            }
        }
    }

    fn watch_abandoned(
        &self,
        task: tokio::task::JoinHandle<Result<ExtractedContent, ParseError>>,
        path: String,
    ) {
        let abandoned = self.abandoned.clone();
        tokio::spawn(async move {
            let _ = task.await;
            let left = abandoned.fetch_sub(1, Ordering::SeqCst) - 1;
            tracing::debug!(path = %path, abandoned = left, "Timed-out extraction released its thread");
        });
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicBool, Ordering};

    use crate::types::{ExtractedContent, PageRecord};

    fn doc() -> DocumentRef {
        DocumentRef {
            path: PathBuf::from("/virtual/doc.pdf"),
            relative_path: "doc.pdf".to_string(),
            size: 0,
            modified: None,
        }
    }

    struct OnePage;

    impl PdfBackend for OnePage {
        type Handle = ();

        fn open(&self, _path: &Path) -> Result<(), ParseError> {
            Ok(())
        }

        fn extract(&self, _: (), _: &CancellationToken) -> Result<ExtractedContent, ParseError> {
            Ok(ExtractedContent {
                pages: vec![PageRecord {
                    number: 1,
                    width: 612.0,
                    height: 792.0,
                    text: "hello".into(),
                    assets: vec![],
                }],
                ..Default::default()
            })
        }
    }

    struct Failing(fn() -> ParseError);

    impl PdfBackend for Failing {
        type Handle = ();

        fn open(&self, _path: &Path) -> Result<(), ParseError> {
            Err((self.0)())
        }

        fn extract(&self, _: (), _: &CancellationToken) -> Result<ExtractedContent, ParseError> {
            unreachable!("open always fails")
        }
    }

    struct Panicking;

    impl PdfBackend for Panicking {
        type Handle = ();

        fn open(&self, _path: &Path) -> Result<(), ParseError> {
            Ok(())
        }

        fn extract(&self, _: (), _: &CancellationToken) -> Result<ExtractedContent, ParseError> {
            panic!("bad glyph table");
        }
    }

    /// Spins until cancelled, then records that it let go of its state.
    struct Hanging {
        released: Arc<AtomicBool>,
    }

    impl PdfBackend for Hanging {
        type Handle = Vec<u8>;

        fn open(&self, _path: &Path) -> Result<Vec<u8>, ParseError> {
            Ok(vec![0u8; 1024])
        }

        fn extract(
            &self,
            handle: Vec<u8>,
            cancel: &CancellationToken,
        ) -> Result<ExtractedContent, ParseError> {
            while !cancel.is_cancelled() {
                std::thread::sleep(Duration::from_millis(5));
            }
            drop(handle);
            self.released.store(true, Ordering::SeqCst);
            Err(ParseError::Cancelled)
        }
    }

    #[tokio::test]
    async fn test_success() {
        let extractor = Extractor::new(OnePage, Duration::from_secs(5));
        match extractor.extract(&doc()).await {
            ExtractionResult::Success { content } => assert_eq!(content.page_count(), 1),
            other => panic!("expected success, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_backend_errors_map_to_kinds() {
        let cases: [(fn() -> ParseError, ErrorKind); 3] = [
            (
                || ParseError::Io(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied")),
                ErrorKind::IoError,
            ),
            (|| ParseError::Corrupt("bad xref".into()), ErrorKind::Corrupt),
            (
                || ParseError::Unsupported("encrypted".into()),
                ErrorKind::Unsupported,
            ),
        ];

        for (make, expected) in cases {
            let extractor = Extractor::new(Failing(make), Duration::from_secs(5));
            match extractor.extract(&doc()).await {
                ExtractionResult::Failure { kind, .. } => assert_eq!(kind, expected),
                other => panic!("expected failure, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let extractor = Extractor::new(Panicking, Duration::from_secs(5));
        match extractor.extract(&doc()).await {
            ExtractionResult::Failure { kind, message } => {
                assert_eq!(kind, ErrorKind::Corrupt);
                assert!(message.contains("bad glyph table"), "got: {message}");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_hang_times_out_and_releases() {
        let released = Arc::new(AtomicBool::new(false));
        let extractor = Extractor::new(
            Hanging {
                released: released.clone(),
            },
            Duration::from_millis(50),
        );

        match extractor.extract(&doc()).await {
            ExtractionResult::Failure { kind, .. } => assert_eq!(kind, ErrorKind::Timeout),
            other => panic!("expected timeout, got {other:?}"),
        }
        assert_eq!(extractor.abandoned(), 1);

        for _ in 0..200 {
            if released.load(Ordering::SeqCst) && extractor.abandoned() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("hanging backend was never released");
    }

    /// Ignores cancellation while opening, like a parser stuck in one call.
    struct SlowOpen;

    impl PdfBackend for SlowOpen {
        type Handle = ();

        fn open(&self, _path: &Path) -> Result<(), ParseError> {
            std::thread::sleep(Duration::from_millis(150));
            Ok(())
        }

        fn extract(&self, _: (), _: &CancellationToken) -> Result<ExtractedContent, ParseError> {
            Ok(ExtractedContent::default())
        }
    }

    #[tokio::test]
    async fn test_abandoned_count_tracks_stuck_threads() {
        let extractor = Extractor::new(SlowOpen, Duration::from_millis(20));

        for _ in 0..2 {
            match extractor.extract(&doc()).await {
                ExtractionResult::Failure { kind, .. } => assert_eq!(kind, ErrorKind::Timeout),
                other => panic!("expected timeout, got {other:?}"),
            }
        }
        assert_eq!(extractor.abandoned(), 2);
        assert_eq!(extractor.clone().abandoned(), 2);

        for _ in 0..200 {
            if extractor.abandoned() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("abandoned threads were never released");
    }
}
