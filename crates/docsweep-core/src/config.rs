use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default per-document processing budget.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default output artifact extension.
pub const DEFAULT_OUTPUT_EXTENSION: &str = "json";

/// Upper bound on queued documents, whatever the worker count.
pub const MAX_QUEUE_CAPACITY: usize = 1 << 16;

/// File name of the run summary artifact at the output root.
pub const RUN_SUMMARY_FILE: &str = "run-summary.json";

/// Number of workers when none is configured.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// Runtime configuration for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Directory tree to scan for documents
    pub input_root: PathBuf,
    /// Directory receiving one artifact per document plus the run summary
    pub output_root: PathBuf,
    /// Maximum concurrent extractions
    pub workers: usize,
    /// Bounded queue capacity between discovery and the worker pool
    pub queue_capacity: usize,
    /// Per-document extraction budget
    pub timeout: Duration,
    /// Accepted input extensions, lowercase, without the leading dot
    pub extensions: Vec<String>,
    /// Extension for output artifacts, without the leading dot
    pub output_extension: String,
}

impl PipelineConfig {
    /// Configuration with defaults for everything but the two roots.
    pub fn new(input_root: impl Into<PathBuf>, output_root: impl Into<PathBuf>) -> Self {
        let workers = default_workers();
        Self {
            input_root: input_root.into(),
            output_root: output_root.into(),
            workers,
            queue_capacity: workers.saturating_mul(2),
            timeout: DEFAULT_TIMEOUT,
            extensions: vec!["pdf".to_string()],
            output_extension: DEFAULT_OUTPUT_EXTENSION.to_string(),
        }
    }

    /// Overlay values from a settings file.
    pub fn with_settings(mut self, settings: &Settings) -> Self {
        if let Some(workers) = settings.workers {
            self.workers = workers;
            self.queue_capacity = workers.saturating_mul(2);
        }
        if let Some(capacity) = settings.queue_capacity {
            self.queue_capacity = capacity;
        }
        if let Some(secs) = settings.timeout_secs {
            self.timeout = Duration::from_secs(secs);
        }
        if let Some(ref extensions) = settings.extensions {
            self.extensions = extensions.clone();
        }
        if let Some(ref ext) = settings.output_extension {
            self.output_extension = ext.clone();
        }
        self
    }

    /// Normalize extensions and reject unusable values.
    pub fn validate(mut self) -> Result<Self, ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if self.timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }

        self.extensions = self
            .extensions
            .iter()
            .map(|e| normalize_extension(e))
            .filter(|e| !e.is_empty())
            .collect();
        self.extensions.sort();
        self.extensions.dedup();
        if self.extensions.is_empty() {
            return Err(ConfigError::NoExtensions);
        }

        self.output_extension = normalize_extension(&self.output_extension);
        if self.output_extension.is_empty() {
            return Err(ConfigError::EmptyOutputExtension);
        }

        self.queue_capacity = self.queue_capacity.clamp(1, MAX_QUEUE_CAPACITY);
        Ok(self)
    }

    /// Whether a file extension is accepted, case-insensitively.
    pub fn accepts_extension(&self, ext: &str) -> bool {
        let ext = ext.to_lowercase();
        self.extensions.iter().any(|e| *e == ext)
    }
}

fn normalize_extension(ext: &str) -> String {
    ext.trim().trim_start_matches('.').to_lowercase()
}

/// Optional settings file. Every field falls back to the built-in default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub workers: Option<usize>,
    pub queue_capacity: Option<usize>,
    pub timeout_secs: Option<u64>,
    pub extensions: Option<Vec<String>>,
    pub output_extension: Option<String>,
}

impl Settings {
    /// Load settings from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::SettingsIo {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::SettingsFormat {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::new("/in", "/out");
        assert!(config.workers >= 1);
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert_eq!(config.extensions, vec!["pdf".to_string()]);
        assert_eq!(config.output_extension, "json");
        assert_eq!(config.queue_capacity, config.workers * 2);
    }

    #[test]
    fn test_validate_normalizes_extensions() {
        let mut config = PipelineConfig::new("/in", "/out");
        config.extensions = vec![".PDF".into(), "pdf".into(), " Ai ".into()];
        config.output_extension = ".JSON".into();
        let config = config.validate().unwrap();

        assert_eq!(config.extensions, vec!["ai".to_string(), "pdf".to_string()]);
        assert_eq!(config.output_extension, "json");
        assert!(config.accepts_extension("PdF"));
        assert!(!config.accepts_extension("txt"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = PipelineConfig::new("/in", "/out");
        config.workers = 0;
        assert!(matches!(config.validate(), Err(ConfigError::NoWorkers)));

        let mut config = PipelineConfig::new("/in", "/out");
        config.timeout = Duration::ZERO;
        assert!(matches!(config.validate(), Err(ConfigError::ZeroTimeout)));

        let mut config = PipelineConfig::new("/in", "/out");
        config.extensions = vec![".".into(), "".into()];
        assert!(matches!(config.validate(), Err(ConfigError::NoExtensions)));
    }

    #[test]
    fn test_settings_overlay() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("settings.json");
        std::fs::write(&path, r#"{"workers": 3, "timeout_secs": 5}"#).unwrap();

        let settings = Settings::load(&path).unwrap();
        let config = PipelineConfig::new("/in", "/out").with_settings(&settings);

        assert_eq!(config.workers, 3);
        assert_eq!(config.queue_capacity, 6);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert_eq!(config.extensions, vec!["pdf".to_string()]);
    }

    #[test]
    fn test_huge_worker_count_does_not_overflow_queue() {
        let settings = Settings {
            workers: Some(usize::MAX),
            ..Default::default()
        };
        let config = PipelineConfig::new("/in", "/out").with_settings(&settings);
        assert_eq!(config.queue_capacity, usize::MAX);

        let config = config.validate().unwrap();
        assert_eq!(config.workers, usize::MAX);
        assert_eq!(config.queue_capacity, MAX_QUEUE_CAPACITY);
    }

    #[test]
    fn test_settings_invalid_json() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            Settings::load(&path),
            Err(ConfigError::SettingsFormat { .. })
        ));
    }
}
