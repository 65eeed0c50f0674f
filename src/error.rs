use std::path::PathBuf;
use thiserror::Error;

/// Problems detected before a run touches the filesystem.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error(
        "You need to set user_name to whoever is performing the job. This can be done \
         by setting the USER environment variable or the `user_name` option"
    )]
    MissingUserName,

    #[error("Invalid log level: {0}")]
    InvalidLogLevel(String),

    #[error("Invalid value for option `{key}`: {message}")]
    InvalidOption { key: &'static str, message: String },
}

/// Failures writing the report directory, or misuse of the run lifecycle.
#[derive(Error, Debug)]
pub enum ReportError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Cannot {action} a run that is {phase}")]
    Phase {
        action: &'static str,
        phase: &'static str,
    },
}

impl ReportError {
    pub fn io_error(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ReportError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Error returned from [`crate::Job::perform`].
///
/// `Item` carries the caller's own error exactly as the unit of work returned it.
#[derive(Error, Debug)]
pub enum JobError<E> {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("Report error: {0}")]
    Report(#[from] ReportError),

    #[error("Item failed: {0}")]
    Item(E),
}

impl<E> JobError<E> {
    /// Returns the caller's error if the run failed inside a unit of work.
    pub fn into_item(self) -> Option<E> {
        match self {
            JobError::Item(err) => Some(err),
            _ => None,
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, JobError::Configuration(_))
    }
}
