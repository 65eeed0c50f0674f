//! Operational harness for long-running batch jobs: counters, throttled
//! progress with rate and ETA, a per-run report directory with a generated
//! README, `report.log` and named output files.

pub mod batch;
pub mod clock;
pub mod config;
pub mod error;
pub mod job;
pub mod report;

pub use batch::{ItemProcessor, PoolReport, Progress, RunState, WorkerOutcome, WorkerPool};
pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use config::{Environment, JobConfig, JobOptions, JobOptionsBuilder};
pub use error::{ConfigurationError, JobError, ReportError};
pub use job::{Job, JobBuilder};
pub use report::{CapturedOutput, Console, OutputFile, OutputFiles, Phase, Reporter, RunSummary};
