mod environment;
mod options;

pub use environment::Environment;
pub use options::{
    parse_log_level, JobConfig, JobOptions, JobOptionsBuilder, DEFAULT_PROGRESS_INTERVAL_SECS,
};
