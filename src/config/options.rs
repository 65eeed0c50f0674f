use std::path::PathBuf;
use std::str::FromStr;

use chrono::TimeDelta;
use log::LevelFilter;
use serde::{Deserialize, Serialize};

use super::environment::Environment;
use crate::batch::format::DEFAULT_FLOAT_THRESHOLD;
use crate::error::ConfigurationError;

pub const DEFAULT_PROGRESS_INTERVAL_SECS: f64 = 60.0;

/// Options for a job run, as supplied by the caller
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobOptions {
    /// Who is performing the run; falls back to `USER`
    pub user_name: Option<String>,

    /// Explicit report directory name, replacing the timestamped default
    pub report_directory: Option<String>,

    /// Severity for `report.log`; falls back to `LOG_LEVEL`, then info
    pub log_level: Option<String>,

    /// Whether to print progress lines from the start of the run
    pub show_progress: bool,

    /// Expected number of items, enabling percentage and ETA
    pub expected: Option<u64>,

    /// Seconds between progress lines
    pub progress_interval: Option<f64>,

    /// Values below this render with two decimals
    pub float_threshold: Option<f64>,

    /// Root under which report directories are created
    pub storage_root: Option<PathBuf>,

    /// Place reports under `tmp/<user>/batch/jobs` inside the storage root
    pub namespace_by_user: bool,

    /// Number of worker threads for a worker pool
    pub workers: Option<usize>,
}

/// Options with defaults and environment fallbacks applied.
#[derive(Debug, Clone, PartialEq)]
pub struct JobConfig {
    pub user_name: Option<String>,
    pub report_directory: Option<String>,
    pub log_level: LevelFilter,
    pub show_progress: bool,
    pub expected: Option<u64>,
    pub progress_interval: TimeDelta,
    pub float_threshold: f64,
    pub storage_root: PathBuf,
    pub namespace_by_user: bool,
    pub workers: Option<usize>,
    /// `REALLY_DO_IT=true` in the environment
    pub really_do_it: bool,
    /// Index of this job inside a worker pool
    pub worker: Option<usize>,
}

impl JobConfig {
    /// The only place environment fallbacks are consulted.
    pub fn resolve(options: &JobOptions, env: &Environment) -> Result<Self, ConfigurationError> {
        let user_name = options
            .user_name
            .as_deref()
            .or_else(|| env.get("USER"))
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string);

        let log_level = match options.log_level.as_deref().or_else(|| env.get("LOG_LEVEL")) {
            Some(level) => parse_log_level(level)?,
            None => LevelFilter::Info,
        };

        let interval_secs = options
            .progress_interval
            .unwrap_or(DEFAULT_PROGRESS_INTERVAL_SECS);
        if !interval_secs.is_finite() || interval_secs < 0.0 {
            return Err(ConfigurationError::InvalidOption {
                key: "progress_interval",
                message: format!("expected a non-negative number of seconds, got {}", interval_secs),
            });
        }
        let progress_interval = TimeDelta::try_milliseconds((interval_secs * 1000.0).round() as i64)
            .ok_or(ConfigurationError::InvalidOption {
                key: "progress_interval",
                message: format!("{} seconds is out of range", interval_secs),
            })?;

        let float_threshold = options.float_threshold.unwrap_or(DEFAULT_FLOAT_THRESHOLD);
        if !float_threshold.is_finite() {
            return Err(ConfigurationError::InvalidOption {
                key: "float_threshold",
                message: "must be a finite number".to_string(),
            });
        }

        if options.workers == Some(0) {
            return Err(ConfigurationError::InvalidOption {
                key: "workers",
                message: "at least one worker is required".to_string(),
            });
        }

        if let Some(dir) = &options.report_directory {
            if dir.trim().is_empty() {
                return Err(ConfigurationError::InvalidOption {
                    key: "report_directory",
                    message: "must not be empty".to_string(),
                });
            }
        }

        Ok(Self {
            user_name,
            report_directory: options.report_directory.clone(),
            log_level,
            show_progress: options.show_progress,
            expected: options.expected,
            progress_interval,
            float_threshold,
            storage_root: options.storage_root.clone().unwrap_or_else(|| PathBuf::from(".")),
            namespace_by_user: options.namespace_by_user,
            workers: options.workers,
            really_do_it: env.get("REALLY_DO_IT") == Some("true"),
            worker: None,
        })
    }
}

/// Accepts level names (`info`, `WARN`, `fatal`) and numeric logger
/// severities (0 = debug .. 4 = fatal).
pub fn parse_log_level(level: &str) -> Result<LevelFilter, ConfigurationError> {
    let level = level.trim();
    match level.to_ascii_lowercase().as_str() {
        "0" => return Ok(LevelFilter::Debug),
        "1" => return Ok(LevelFilter::Info),
        "2" => return Ok(LevelFilter::Warn),
        "3" | "4" | "5" | "fatal" | "unknown" => return Ok(LevelFilter::Error),
        _ => {}
    }
    LevelFilter::from_str(level).map_err(|_| ConfigurationError::InvalidLogLevel(level.to_string()))
}

/// Builder pattern for JobOptions
pub struct JobOptionsBuilder {
    options: JobOptions,
}

impl JobOptionsBuilder {
    /// Creates a new JobOptionsBuilder with default values
    pub fn new() -> Self {
        Self {
            options: JobOptions::default(),
        }
    }

    /// Sets the operator performing the run
    pub fn user_name(mut self, name: impl Into<String>) -> Self {
        self.options.user_name = Some(name.into());
        self
    }

    /// Overrides the generated report directory name
    pub fn report_directory(mut self, dir: impl Into<String>) -> Self {
        self.options.report_directory = Some(dir.into());
        self
    }

    /// Sets the report log severity
    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.options.log_level = Some(level.into());
        self
    }

    /// Sets whether progress lines are shown
    pub fn show_progress(mut self, show: bool) -> Self {
        self.options.show_progress = show;
        self
    }

    /// Sets the expected total
    pub fn expected(mut self, expected: Option<u64>) -> Self {
        self.options.expected = expected;
        self
    }

    /// Sets the seconds between progress lines
    pub fn progress_interval(mut self, secs: f64) -> Self {
        self.options.progress_interval = Some(secs);
        self
    }

    /// Sets the threshold below which numbers keep two decimals
    pub fn float_threshold(mut self, threshold: f64) -> Self {
        self.options.float_threshold = Some(threshold);
        self
    }

    /// Sets the storage root for report directories
    pub fn storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.options.storage_root = Some(root.into());
        self
    }

    /// Sets whether reports are namespaced by operator
    pub fn namespace_by_user(mut self, namespace: bool) -> Self {
        self.options.namespace_by_user = namespace;
        self
    }

    /// Sets the number of worker threads
    pub fn workers(mut self, workers: Option<usize>) -> Self {
        self.options.workers = workers;
        self
    }

    /// Builds the JobOptions
    pub fn build(self) -> JobOptions {
        self.options
    }
}

impl Default for JobOptionsBuilder {
    fn default() -> Self {
        Self::new()
    }
}
