use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use log::{info, warn};
use rayon::prelude::*;

use crate::clock::{Clock, SystemClock};
use crate::config::{Environment, JobOptions};
use crate::error::{ConfigurationError, JobError};
use crate::job::JobBuilder;
use crate::report::{Console, RunSummary};

/// Runs partitions of a batch on a thread pool, one independent job per
/// worker. Workers share nothing but the console.
pub struct WorkerPool {
    name: String,
    options: JobOptions,
    environment: Environment,
    clock: Arc<dyn Clock>,
    console: Console,
    revision: Option<String>,
}

/// What one worker's job did.
#[derive(Debug)]
pub struct WorkerOutcome<E> {
    pub index: usize,
    pub processed: u64,
    pub report_directory: PathBuf,
    pub summary: Option<RunSummary>,
    pub result: Result<(), JobError<E>>,
}

/// Outcomes of every worker, in worker order.
#[derive(Debug)]
pub struct PoolReport<E> {
    pub outcomes: Vec<WorkerOutcome<E>>,
}

impl<E> PoolReport<E> {
    pub fn total_processed(&self) -> u64 {
        self.outcomes.iter().map(|o| o.processed).sum()
    }

    pub fn failures(&self) -> impl Iterator<Item = &WorkerOutcome<E>> {
        self.outcomes.iter().filter(|o| o.result.is_err())
    }

    pub fn is_success(&self) -> bool {
        self.failures().next().is_none()
    }
}

impl WorkerPool {
    pub fn new(name: impl Into<String>, options: JobOptions) -> Self {
        Self {
            name: name.into(),
            options,
            environment: Environment::capture(),
            clock: Arc::new(SystemClock),
            console: Console::stdout(),
            revision: None,
        }
    }

    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = environment;
        self
    }

    pub fn clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn console(mut self, console: Console) -> Self {
        self.console = console;
        self
    }

    pub fn revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    /// Configured worker count, or one per available thread.
    pub fn workers(&self) -> usize {
        self.options
            .workers
            .unwrap_or_else(rayon::current_num_threads)
            .max(1)
    }

    /// Splits `items` into one contiguous partition per worker and runs each
    /// partition as its own job. A failing worker does not stop the others.
    pub fn run<I, E, F>(&self, items: &[I], unit: F) -> Result<PoolReport<E>, ConfigurationError>
    where
        I: Sync,
        E: fmt::Display + fmt::Debug + Send,
        F: Fn(usize, &I) -> Result<(), E> + Sync,
    {
        let workers = self.workers();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .build()
            .map_err(|e| ConfigurationError::InvalidOption {
                key: "workers",
                message: e.to_string(),
            })?;

        let chunk_size = items.len().div_ceil(workers).max(1);
        let partitions: Vec<&[I]> = items.chunks(chunk_size).collect();
        info!(
            "{}: {} items across {} partitions",
            self.name,
            items.len(),
            partitions.len()
        );

        let outcomes = pool.install(|| {
            partitions
                .par_iter()
                .enumerate()
                .map(|(index, partition)| self.run_worker(index, partition, &unit))
                .collect::<Vec<_>>()
        });

        let report = PoolReport { outcomes };
        for failed in report.failures() {
            warn!("{}: worker {} failed after {} items", self.name, failed.index, failed.processed);
        }
        Ok(report)
    }

    fn run_worker<I, E, F>(&self, index: usize, partition: &[I], unit: &F) -> WorkerOutcome<E>
    where
        E: fmt::Display + fmt::Debug,
        F: Fn(usize, &I) -> Result<(), E>,
    {
        let mut builder = JobBuilder::new(&self.name)
            .options(self.options.clone())
            .environment(self.environment.clone())
            .shared_clock(Arc::clone(&self.clock))
            .console(self.console.clone())
            .worker(index);
        if let Some(revision) = &self.revision {
            builder = builder.revision(revision.clone());
        }

        let mut job = match builder.build() {
            Ok(job) => job,
            Err(e) => {
                return WorkerOutcome {
                    index,
                    processed: 0,
                    report_directory: PathBuf::new(),
                    summary: None,
                    result: Err(e.into()),
                }
            }
        };
        if self.options.expected.is_some() {
            job.set_expected(Some(partition.len() as u64));
        }

        let result = job.perform(|job| {
            for item in partition {
                job.process_item(|| unit(index, item))?;
            }
            Ok::<_, E>(())
        });

        WorkerOutcome {
            index,
            processed: job.counter(),
            report_directory: job.report_directory().to_path_buf(),
            summary: job.summary().cloned(),
            result,
        }
    }
}
