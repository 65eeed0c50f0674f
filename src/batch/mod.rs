pub mod format;
mod pool;
mod processor;
mod progress;
mod state;

pub use pool::{PoolReport, WorkerOutcome, WorkerPool};
pub use processor::ItemProcessor;
pub use progress::{Emission, Progress};
pub use state::{PeriodStats, RunState};
