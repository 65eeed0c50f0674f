use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::TimeDelta;
use log::{debug, error, warn, Level};

use super::directory;
use super::files::{OutputFile, OutputFiles};
use super::run_log::{Console, RunLog};
use super::readme::{git_commit, readme_file_name, Manifest};
use crate::batch::format::{nice_number, seconds};
use crate::batch::{Progress, RunState};
use crate::clock::{Clock, Timestamp};
use crate::config::{Environment, JobConfig};
use crate::error::ReportError;

pub const REPORT_LOG: &str = "report.log";

/// Lifecycle of a reporter. A reporter is used for exactly one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Running,
    Finished,
}

impl Phase {
    fn as_str(self) -> &'static str {
        match self {
            Phase::Idle => "not started",
            Phase::Running => "running",
            Phase::Finished => "finished",
        }
    }
}

/// Totals for a finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub run_name: String,
    pub processed: u64,
    pub started_at: Timestamp,
    pub finished_at: Timestamp,
    pub elapsed: TimeDelta,
    pub report_directory: PathBuf,
}

impl RunSummary {
    pub fn elapsed_seconds(&self) -> f64 {
        seconds(self.elapsed)
    }
}

/// Reports on a batch job: the run manifest, counters, progress and the
/// closing summary.
pub struct Reporter {
    name: String,
    phase: Phase,
    state: RunState,
    progress: Progress,
    files: OutputFiles,
    log: RunLog,
    console: Console,
    clock: Arc<dyn Clock>,
    user_name: Option<String>,
    environment: Environment,
    revision: Option<String>,
    report_directory: PathBuf,
    summary: Option<RunSummary>,
    failure_handled: bool,
}

impl Reporter {
    pub fn new(
        name: &str,
        config: &JobConfig,
        environment: Environment,
        clock: Arc<dyn Clock>,
        console: Console,
        revision: Option<String>,
    ) -> Self {
        let now = clock.now();
        let report_directory = directory::resolve(config, name, now);
        Self {
            name: name.to_string(),
            phase: Phase::Idle,
            state: RunState::new(now),
            progress: Progress::new(name, config),
            files: OutputFiles::new(&report_directory),
            log: RunLog::new(report_directory.join(REPORT_LOG), name, config.log_level),
            console,
            clock,
            user_name: config.user_name.clone(),
            environment,
            revision,
            report_directory,
            summary: None,
            failure_handled: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    pub fn counter(&self) -> u64 {
        self.state.counter
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    pub fn progress_mut(&mut self) -> &mut Progress {
        &mut self.progress
    }

    pub fn report_directory(&self) -> &Path {
        &self.report_directory
    }

    pub fn open_file_count(&self) -> usize {
        self.files.len()
    }

    pub fn summary(&self) -> Option<&RunSummary> {
        self.summary.as_ref()
    }

    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Writes to `report.log`. A failing log write is reported through the
    /// `log` facade rather than aborting the run.
    pub fn log(&mut self, level: Level, text: &str) {
        let now = self.clock.now();
        if let Err(e) = self.log.write(level, text, now) {
            warn!("Could not write {}: {}", self.log.path().display(), e);
        }
    }

    pub fn console(&self, text: &str) {
        self.console.line(text);
    }

    /// Both `report.log` and the console.
    pub fn tee(&mut self, text: &str, level: Level) {
        self.log(level, text);
        self.console(text);
    }

    /// Records a failure in `report.log`: type, message, debug detail and,
    /// when backtraces are enabled, the stack.
    pub fn handle<E: fmt::Display + fmt::Debug>(&mut self, err: &E) {
        error!("{} failed: {}", self.name, err);
        let text = failure_record(err, &Backtrace::capture());
        self.log(Level::Error, &text);
    }

    /// Records a failed unit of work. If the same error then ends the run,
    /// [`Reporter::abort`] does not record it a second time.
    pub fn handle_item_failure<E: fmt::Display + fmt::Debug>(&mut self, err: &E) {
        self.handle(err);
        self.failure_handled = true;
    }

    /// Begins the run: fresh state, report directory, manifest.
    pub fn start(&mut self) -> Result<Timestamp, ReportError> {
        self.expect_phase(Phase::Idle, "start")?;

        let now = self.clock.now();
        self.state = RunState::reset(now);
        let start_time = self.state.start_time(now);

        std::fs::create_dir_all(&self.report_directory)
            .map_err(|e| ReportError::io_error(&self.report_directory, e))?;
        self.console(&format!(
            "Results for {} are in {}",
            self.name,
            self.report_directory.display()
        ));

        if let Some(expected) = self.progress.expected() {
            let text = format!("Processing {} {} items", nice_number(expected), self.name);
            self.tee(&text, Level::Info);
        }
        let text = format!("{} beginning at {}", self.name, display_time(start_time));
        self.tee(&text, Level::Info);

        self.write_readme()?;
        self.phase = Phase::Running;
        debug!("{} started, reporting to {}", self.name, self.report_directory.display());
        Ok(start_time)
    }

    fn write_readme(&mut self) -> Result<(), ReportError> {
        let revision = self.revision.clone().unwrap_or_else(git_commit);
        let text = Manifest {
            run_name: &self.name,
            user_name: self.user_name.as_deref().unwrap_or_default(),
            revision: &revision,
            report_directory: &self.report_directory,
            environment: &self.environment,
        }
        .render();

        let file = self.files.open(&readme_file_name(&self.name))?;
        let mut writer = &file;
        writer
            .write_all(text.as_bytes())
            .and_then(|_| writer.flush())
            .map_err(|e| ReportError::io_error(file.path(), e))
    }

    /// Counts one processed item and gives progress a chance to print.
    /// Only a running run counts; otherwise the counter is left as it is.
    pub fn increment_counter(&mut self) -> u64 {
        if self.phase != Phase::Running {
            warn!(
                "{}: item not counted, the run is {}",
                self.name,
                self.phase.as_str()
            );
            return self.state.counter;
        }
        self.failure_handled = false;
        let counter = self.state.increment();
        let now = self.clock.now();
        if let Some(emission) = self.progress.show(&mut self.state, now) {
            self.console.line(&emission.to_string());
        }
        counter
    }

    pub fn output_file(&mut self, file_name: &str) -> Result<OutputFile, ReportError> {
        self.files.open(file_name)
    }

    /// Ends the run: fixes the finish time, closes report files and prints
    /// the summary.
    pub fn finish(&mut self) -> Result<RunSummary, ReportError> {
        self.expect_phase(Phase::Running, "finish")?;

        let now = self.clock.now();
        let finished_at = self.state.finish_time(now);
        let elapsed = self.state.elapsed_time(now);
        let started_at = self.state.start_time(now);
        let closed = self.files.close();

        self.progress.finish();
        let text = format!("{} finished at {}", self.name, display_time(finished_at));
        self.tee(&text, Level::Info);
        let text = format!(
            "{} {} records processed in {} seconds",
            nice_number(self.state.counter),
            self.name,
            self.progress.nice_float(seconds(elapsed))
        );
        self.tee(&text, Level::Info);
        self.console(&format!(
            "Results for {} are in {}",
            self.name,
            self.report_directory.display()
        ));
        if let Err(e) = self.log.flush() {
            warn!("Could not flush {}: {}", self.log.path().display(), e);
        }
        self.phase = Phase::Finished;
        closed?;

        let summary = RunSummary {
            run_name: self.name.clone(),
            processed: self.state.counter,
            started_at,
            finished_at,
            elapsed,
            report_directory: self.report_directory.clone(),
        };
        self.summary = Some(summary.clone());
        Ok(summary)
    }

    /// Ends a run that failed. The error is recorded unless it is the item
    /// failure just handled, the finish time is fixed and files are flushed
    /// and closed so the partial report stays readable. No summary is
    /// produced.
    pub fn abort<E: fmt::Display + fmt::Debug>(&mut self, err: &E) {
        if !std::mem::take(&mut self.failure_handled) {
            self.handle(err);
        }
        let now = self.clock.now();
        self.state.finish_time(now);
        self.state.elapsed_time(now);

        let text = format!(
            "{} aborted after {} records: {}",
            self.name,
            nice_number(self.state.counter),
            err
        );
        self.log(Level::Error, &text);
        self.console(&text);
        if let Err(e) = self.files.close() {
            warn!("Could not close report files: {}", e);
        }
        if let Err(e) = self.log.flush() {
            warn!("Could not flush {}: {}", self.log.path().display(), e);
        }
        self.phase = Phase::Finished;
    }

    fn expect_phase(&self, expected: Phase, action: &'static str) -> Result<(), ReportError> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(ReportError::Phase {
                action,
                phase: self.phase.as_str(),
            })
        }
    }
}

fn failure_record<E: fmt::Display + fmt::Debug>(err: &E, backtrace: &Backtrace) -> String {
    let mut text = format!(
        "{}\n{}\n  details: {:?}",
        std::any::type_name::<E>(),
        err,
        err
    );
    if backtrace.status() == BacktraceStatus::Captured {
        for frame in backtrace.to_string().lines() {
            text.push_str("\n  from ");
            text.push_str(frame.trim());
        }
    }
    text
}

fn display_time(at: Timestamp) -> String {
    at.format("%Y-%m-%d %H:%M:%S %Z").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::JobOptionsBuilder;
    use crate::report::CapturedOutput;
    use chrono::{TimeZone, Utc};
    use tempfile::{tempdir, TempDir};

    struct Fixture {
        _temp_dir: TempDir,
        clock: ManualClock,
        captured: CapturedOutput,
        reporter: Reporter,
    }

    fn fixture(builder: JobOptionsBuilder) -> Fixture {
        let temp_dir = tempdir().unwrap();
        let options = builder
            .user_name("ops")
            .storage_root(temp_dir.path())
            .build();
        let env = Environment::from_pairs([("B_VAR", "2"), ("A_VAR", "1")]);
        let config = JobConfig::resolve(&options, &env).unwrap();
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 10, 0, 0).unwrap());
        let (console, captured) = Console::capture();
        let reporter = Reporter::new(
            "ImportUsers",
            &config,
            env,
            Arc::new(clock.clone()),
            console,
            Some("deadbeef".to_string()),
        );
        Fixture {
            _temp_dir: temp_dir,
            clock,
            captured,
            reporter,
        }
    }

    #[test]
    fn test_start_writes_readme_and_announces() {
        let mut f = fixture(JobOptionsBuilder::new());
        let start = f.reporter.start().unwrap();

        assert_eq!(start, f.clock.now());
        assert_eq!(f.reporter.phase(), Phase::Running);
        assert_eq!(f.reporter.state().started_at(), Some(start));

        let dir = f.reporter.report_directory().to_path_buf();
        assert!(dir.ends_with("2024-06-01_10-00-00_import_users"));
        let readme = std::fs::read_to_string(dir.join("README_ImportUsers.md")).unwrap();
        assert!(readme.contains("## ImportUsers"));
        assert!(readme.contains("* Run as: `ops`"));
        assert!(readme.contains("* Git commit: `deadbeef`"));
        assert!(readme.contains("| A_VAR | 1 |\n| B_VAR | 2 |"));

        let output = f.captured.contents();
        assert!(output.contains("ImportUsers beginning at 2024-06-01 10:00:00 UTC"));
        let log = std::fs::read_to_string(dir.join(REPORT_LOG)).unwrap();
        assert!(log.contains("ImportUsers beginning at"));
    }

    #[test]
    fn test_start_announces_expected_total() {
        let mut f = fixture(JobOptionsBuilder::new().expected(Some(12_000)));
        f.reporter.start().unwrap();
        assert!(f.captured.contents().contains("Processing 12,000 ImportUsers items"));
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let mut f = fixture(JobOptionsBuilder::new());
        f.reporter.start().unwrap();
        assert!(matches!(
            f.reporter.start(),
            Err(ReportError::Phase { action: "start", phase: "running" })
        ));
    }

    #[test]
    fn test_finish_before_start_is_rejected() {
        let mut f = fixture(JobOptionsBuilder::new());
        assert!(matches!(
            f.reporter.finish(),
            Err(ReportError::Phase { action: "finish", .. })
        ));
    }

    #[test]
    fn test_increment_counter_returns_new_value() {
        let mut f = fixture(JobOptionsBuilder::new());
        f.reporter.start().unwrap();
        for n in 1..=5 {
            assert_eq!(f.reporter.increment_counter(), n);
            assert!(f.reporter.state().previous_counter <= f.reporter.counter());
        }
    }

    #[test]
    fn test_progress_prints_on_interval() {
        let mut f = fixture(JobOptionsBuilder::new().show_progress(true).expected(Some(1000)));
        f.reporter.start().unwrap();

        for _ in 0..300 {
            f.reporter.increment_counter();
        }
        f.clock.advance_secs(60);
        f.reporter.increment_counter();

        let lines: Vec<_> = f
            .captured
            .lines()
            .into_iter()
            .filter(|l| l.contains(" processed ("))
            .collect();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("301 in the last 1 minute"));
        assert!(lines[0].contains("30.1% complete"));
        assert!(lines[0].contains("ETA"));
    }

    #[test]
    fn test_finish_summarises_and_closes_files() {
        let mut f = fixture(JobOptionsBuilder::new());
        f.reporter.start().unwrap();
        let extra = f.reporter.output_file("x.log").unwrap();
        assert!(extra.ptr_eq(&f.reporter.output_file("x.log").unwrap()));
        assert_eq!(f.reporter.open_file_count(), 2);

        for _ in 0..300 {
            f.reporter.increment_counter();
        }
        f.clock.advance_secs(90);
        let summary = f.reporter.finish().unwrap();

        assert_eq!(summary.processed, 300);
        assert_eq!(summary.elapsed, TimeDelta::seconds(90));
        assert_eq!(summary.elapsed_seconds(), 90.0);
        assert_eq!(f.reporter.phase(), Phase::Finished);
        assert_eq!(f.reporter.open_file_count(), 0);
        assert!(extra.is_closed());
        assert_eq!(f.reporter.summary(), Some(&summary));

        let output = f.captured.contents();
        assert!(output.contains("ImportUsers finished at 2024-06-01 10:01:30 UTC"));
        assert!(output.contains("300 ImportUsers records processed in 90 seconds"));
        assert!(output.trim_end().ends_with(&format!(
            "Results for ImportUsers are in {}",
            f.reporter.report_directory().display()
        )));
    }

    #[test]
    fn test_elapsed_fixed_only_by_finish() {
        let mut f = fixture(JobOptionsBuilder::new());
        f.reporter.start().unwrap();
        f.clock.advance_secs(10);
        assert!(f.reporter.state().finished_at().is_none());

        f.reporter.finish().unwrap();
        let finished = f.reporter.state().finished_at().unwrap();
        f.clock.advance_secs(10);
        assert_eq!(f.reporter.state().finished_at(), Some(finished));
    }

    #[test]
    fn test_handle_logs_failure() {
        let mut f = fixture(JobOptionsBuilder::new());
        f.reporter.start().unwrap();
        let err = "abc".parse::<u32>().unwrap_err();
        f.reporter.handle(&err);

        let log =
            std::fs::read_to_string(f.reporter.report_directory().join(REPORT_LOG)).unwrap();
        assert!(log.contains("ERROR -- ImportUsers: core::num::error::ParseIntError"));
        assert!(log.contains("invalid digit found in string"));
    }

    #[test]
    fn test_failure_record_appends_stack_when_captured() {
        let err = "abc".parse::<u32>().unwrap_err();

        let plain = failure_record(&err, &Backtrace::disabled());
        assert_eq!(
            plain,
            "core::num::error::ParseIntError\ninvalid digit found in string\n  details: ParseIntError { kind: InvalidDigit }"
        );

        let backtrace = Backtrace::force_capture();
        let record = failure_record(&err, &backtrace);
        assert!(record.starts_with(&plain));
        if backtrace.status() == BacktraceStatus::Captured {
            assert!(record.contains("\n  from "));
        }
    }

    #[test]
    fn test_increment_outside_running_run_is_ignored() {
        let mut f = fixture(JobOptionsBuilder::new());
        assert_eq!(f.reporter.increment_counter(), 0);
        assert!(f.reporter.state().started_at().is_none());

        f.reporter.start().unwrap();
        assert_eq!(f.reporter.increment_counter(), 1);
        f.reporter.finish().unwrap();

        assert_eq!(f.reporter.increment_counter(), 1);
        assert_eq!(f.reporter.counter(), 1);
    }

    #[test]
    fn test_abort_keeps_partial_report() {
        let mut f = fixture(JobOptionsBuilder::new());
        f.reporter.start().unwrap();
        let mut out = f.reporter.output_file("partial.csv").unwrap();
        writeln!(out, "row").unwrap();
        f.reporter.increment_counter();

        f.clock.advance_secs(30);
        f.reporter.abort(&"disk on fire");

        let finished = f.reporter.state().finished_at().unwrap();
        assert_eq!(finished, f.clock.now());
        f.clock.advance_secs(30);
        assert_eq!(f.reporter.state().finished_at(), Some(finished));
        assert_eq!(f.reporter.state().clone().elapsed_time(f.clock.now()), TimeDelta::seconds(30));

        let dir = f.reporter.report_directory();
        assert_eq!(std::fs::read_to_string(dir.join("partial.csv")).unwrap(), "row\n");
        let log = std::fs::read_to_string(dir.join(REPORT_LOG)).unwrap();
        assert!(log.contains("ImportUsers aborted after 1 records: disk on fire"));
        assert!(log.contains("ERROR -- ImportUsers: &str\ndisk on fire"));
        assert!(f.reporter.summary().is_none());
    }

    #[test]
    fn test_abort_skips_item_failure_already_handled() {
        let mut f = fixture(JobOptionsBuilder::new());
        f.reporter.start().unwrap();
        let err = "x".parse::<u32>().unwrap_err();
        f.reporter.handle_item_failure(&err);
        f.reporter.abort(&err);

        let log =
            std::fs::read_to_string(f.reporter.report_directory().join(REPORT_LOG)).unwrap();
        let records = log
            .lines()
            .filter(|l| l.ends_with(": core::num::error::ParseIntError"))
            .count();
        assert_eq!(records, 1);
    }
}
