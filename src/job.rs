use std::fmt;
use std::path::Path;
use std::sync::Arc;

use log::Level;

use crate::batch::{ItemProcessor, RunState};
use crate::clock::{Clock, SystemClock};
use crate::config::{Environment, JobConfig, JobOptions};
use crate::error::{ConfigurationError, JobError, ReportError};
use crate::report::{Console, OutputFile, Phase, Reporter, RunSummary};

/// A named batch job run inside the harness.
///
/// ```no_run
/// use batch_harness::{Job, JobOptionsBuilder};
///
/// let options = JobOptionsBuilder::new().show_progress(true).expected(Some(3)).build();
/// let mut job = Job::new("ImportUsers", options)?;
/// job.perform(|job| {
///     for id in 1..=3 {
///         job.process_item(|| id.to_string().parse::<u32>())?;
///     }
///     Ok::<_, std::num::ParseIntError>(())
/// })?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct Job {
    name: String,
    config: JobConfig,
    reporter: Reporter,
}

/// Explicit construction of a [`Job`] and its collaborators.
pub struct JobBuilder {
    name: String,
    options: JobOptions,
    environment: Option<Environment>,
    clock: Option<Arc<dyn Clock>>,
    console: Option<Console>,
    revision: Option<String>,
    worker: Option<usize>,
}

impl JobBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            options: JobOptions::default(),
            environment: None,
            clock: None,
            console: None,
            revision: None,
            worker: None,
        }
    }

    pub fn options(mut self, options: JobOptions) -> Self {
        self.options = options;
        self
    }

    /// Uses this environment instead of capturing the process environment.
    pub fn environment(mut self, environment: Environment) -> Self {
        self.environment = Some(environment);
        self
    }

    pub fn clock(self, clock: impl Clock + 'static) -> Self {
        self.shared_clock(Arc::new(clock))
    }

    pub fn shared_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn console(mut self, console: Console) -> Self {
        self.console = Some(console);
        self
    }

    /// Records this revision in the manifest instead of asking git.
    pub fn revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    /// Marks the job as worker `index` of a pool.
    pub fn worker(mut self, index: usize) -> Self {
        self.worker = Some(index);
        self
    }

    pub fn build(self) -> Result<Job, ConfigurationError> {
        let environment = self.environment.unwrap_or_else(Environment::capture);
        let mut config = JobConfig::resolve(&self.options, &environment)?;
        config.worker = self.worker;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let console = self.console.unwrap_or_else(Console::stdout);
        let reporter = Reporter::new(
            &self.name,
            &config,
            environment,
            clock,
            console,
            self.revision,
        );
        Ok(Job {
            name: self.name,
            config,
            reporter,
        })
    }
}

impl Job {
    /// A job reading fallbacks from the process environment, timed by the
    /// system clock and reporting to stdout.
    pub fn new(name: impl Into<String>, options: JobOptions) -> Result<Self, ConfigurationError> {
        JobBuilder::new(name).options(options).build()
    }

    pub fn builder(name: impl Into<String>) -> JobBuilder {
        JobBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &JobConfig {
        &self.config
    }

    pub fn user_name(&self) -> Option<&str> {
        self.config.user_name.as_deref()
    }

    pub fn report_directory(&self) -> &Path {
        self.reporter.report_directory()
    }

    /// Whether `REALLY_DO_IT=true` was set, for jobs that default to a dry run.
    pub fn really_do_it(&self) -> bool {
        self.config.really_do_it
    }

    pub fn counter(&self) -> u64 {
        self.reporter.counter()
    }

    pub fn state(&self) -> &RunState {
        self.reporter.state()
    }

    pub fn phase(&self) -> Phase {
        self.reporter.phase()
    }

    pub fn summary(&self) -> Option<&RunSummary> {
        self.reporter.summary()
    }

    /// Turns on progress lines for the rest of the run.
    pub fn show_progress(&mut self) {
        self.reporter.progress_mut().start();
    }

    /// Sets the expected total, e.g. once a query has counted the records.
    pub fn set_expected(&mut self, expected: Option<u64>) {
        self.reporter.progress_mut().set_expected(expected);
    }

    /// Runs `block` as the whole job: checks the operator, starts the
    /// reporter, runs the block and prints the summary. An error from the
    /// block is logged once (whether or not it came from
    /// [`Job::process_item`]), fixes the finish time and is returned as
    /// [`JobError::Item`]; the report directory is left in place.
    pub fn perform<T, E, F>(&mut self, block: F) -> Result<T, JobError<E>>
    where
        F: FnOnce(&mut Job) -> Result<T, E>,
        E: fmt::Display + fmt::Debug,
    {
        if self.config.user_name.is_none() {
            return Err(ConfigurationError::MissingUserName.into());
        }
        self.reporter.start()?;
        match block(self) {
            Ok(value) => {
                self.reporter.finish()?;
                Ok(value)
            }
            Err(err) => {
                self.reporter.abort(&err);
                Err(JobError::Item(err))
            }
        }
    }

    /// Runs one unit of work, counting it on success. Outside
    /// [`Job::perform`] the unit still runs but nothing is counted.
    pub fn process_item<T, E, F>(&mut self, unit: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: fmt::Display + fmt::Debug,
    {
        ItemProcessor::new(&mut self.reporter).process(unit)
    }

    pub fn increment_counter(&mut self) -> u64 {
        self.reporter.increment_counter()
    }

    /// Opens (or reuses) a named file in the report directory.
    pub fn output_file(&mut self, file_name: &str) -> Result<OutputFile, ReportError> {
        self.reporter.output_file(file_name)
    }

    pub fn log(&mut self, text: &str, level: Level) {
        self.reporter.log(level, text);
    }

    pub fn console(&self, text: &str) {
        self.reporter.console(text);
    }

    pub fn tee(&mut self, text: &str, level: Level) {
        self.reporter.tee(text, level);
    }

    pub fn handle<E: fmt::Display + fmt::Debug>(&mut self, err: &E) {
        self.reporter.handle(err);
    }
}
