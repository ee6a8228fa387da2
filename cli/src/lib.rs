//! docsweep command line: argument handling, logging and the run loop
//! around [`docsweep_core::Pipeline`].

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use docsweep_core::{Pipeline, PipelineConfig, PipelineError, RunSummary, Settings};

/// Exit status for run-level errors other than a fatal discovery.
pub const EXIT_ERROR: i32 = 1;
/// Exit status when the input root cannot be walked.
pub const EXIT_DISCOVERY_FAILED: i32 = 2;

/// How long abandoned parser threads may delay process exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(name = "docsweep")]
#[command(about = "Extract text, layout and outline from a tree of PDFs into JSON")]
pub struct Args {
    /// Directory tree to scan for documents
    #[arg(long, env = "DOCSWEEP_INPUT_DIR")]
    pub input_dir: PathBuf,

    /// Where artifacts and run-summary.json are written
    #[arg(long, env = "DOCSWEEP_OUTPUT_DIR")]
    pub output_dir: PathBuf,

    /// Concurrent extractions (defaults to available parallelism)
    #[arg(long, env = "DOCSWEEP_WORKERS")]
    pub workers: Option<usize>,

    /// Per-document time budget in seconds
    #[arg(long, env = "DOCSWEEP_TIMEOUT_SECS")]
    pub timeout_secs: Option<u64>,

    /// Accepted file extension, repeatable (defaults to pdf)
    #[arg(long = "extension", env = "DOCSWEEP_EXTENSIONS", value_delimiter = ',')]
    pub extensions: Vec<String>,

    /// JSON settings file; flags take precedence over it
    #[arg(long, env = "DOCSWEEP_CONFIG")]
    pub config: Option<PathBuf>,

    /// Debug-level logging
    #[arg(short, long, env = "DOCSWEEP_VERBOSE")]
    pub verbose: bool,
}

impl Args {
    /// Defaults, then the settings file, then flags.
    pub fn pipeline_config(&self) -> anyhow::Result<PipelineConfig> {
        let mut config = PipelineConfig::new(&self.input_dir, &self.output_dir);

        if let Some(ref path) = self.config {
            let settings = Settings::load(path)
                .with_context(|| format!("loading settings from {}", path.display()))?;
            config = config.with_settings(&settings);
        }

        let overrides = Settings {
            workers: self.workers,
            timeout_secs: self.timeout_secs,
            extensions: (!self.extensions.is_empty()).then(|| self.extensions.clone()),
            ..Default::default()
        };
        Ok(config.with_settings(&overrides))
    }

    pub fn log_directives(&self) -> &'static [&'static str] {
        if self.verbose {
            &["docsweep=debug", "docsweep_core=debug"]
        } else {
            &["docsweep=info", "docsweep_core=info"]
        }
    }
}

/// Install the global subscriber. `RUST_LOG` is honored; `directives` are
/// layered on top of it.
pub fn init_logging(directives: &[&str]) {
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    for directive in directives {
        match directive.parse() {
            Ok(d) => filter = filter.add_directive(d),
            Err(e) => eprintln!("ignoring log directive {directive:?}: {e}"),
        }
    }
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Run the pipeline to completion and return the process exit status.
pub fn run(args: &Args) -> i32 {
    let config = match args.pipeline_config() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("{:#}", e);
            return EXIT_ERROR;
        }
    };

    let pipeline = match Pipeline::new(config) {
        Ok(pipeline) => pipeline,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            return EXIT_ERROR;
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "Failed to create Tokio runtime");
            return EXIT_ERROR;
        }
    };

    let cancel = pipeline.cancellation_token();
    let outcome = rt.block_on(async move {
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupted, finishing in-flight documents");
                cancel.cancel();
            }
        });
        pipeline.run().await
    });

    // Timed-out parses may still be unwinding on the blocking pool.
    rt.shutdown_timeout(SHUTDOWN_GRACE);

    exit_code(&outcome)
}

/// Map a finished run to its exit status.
pub fn exit_code(outcome: &Result<RunSummary, PipelineError>) -> i32 {
    match outcome {
        Ok(summary) => {
            tracing::info!(
                state = %summary.state(),
                succeeded = summary.succeeded(),
                failed = summary.failed(),
                pending = summary.pending(),
                "docsweep finished"
            );
            summary.exit_code()
        }
        Err(PipelineError::Discovery(e)) => {
            tracing::error!(error = %e, "Discovery failed");
            EXIT_DISCOVERY_FAILED
        }
        Err(e) => {
            tracing::error!(error = %e, "Run failed");
            EXIT_ERROR
        }
    }
}
