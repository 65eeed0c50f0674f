pub mod directory;
mod files;
pub mod readme;
mod reporter;
mod run_log;

pub use files::{OutputFile, OutputFiles};
pub use reporter::{Phase, Reporter, RunSummary, REPORT_LOG};
pub use run_log::{CapturedOutput, Console, RunLog};
