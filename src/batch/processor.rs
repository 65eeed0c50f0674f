use std::fmt;

use crate::report::Reporter;

/// Runs one unit of work and accounts for it
pub struct ItemProcessor<'a> {
    reporter: &'a mut Reporter,
}

impl<'a> ItemProcessor<'a> {
    pub fn new(reporter: &'a mut Reporter) -> Self {
        Self { reporter }
    }

    /// Executes `unit`. Success increments the run counter once (only while
    /// the run is going); a failure is logged and handed back unchanged
    /// without touching the counter.
    pub fn process<T, E, F>(self, unit: F) -> Result<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: fmt::Display + fmt::Debug,
    {
        match unit() {
            Ok(value) => {
                self.reporter.increment_counter();
                Ok(value)
            }
            Err(err) => {
                self.reporter.handle_item_failure(&err);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::{Environment, JobConfig, JobOptionsBuilder};
    use crate::report::{Console, REPORT_LOG};
    use chrono::{TimeZone, Utc};
    use std::sync::Arc;
    use tempfile::tempdir;

    #[derive(Debug, PartialEq)]
    struct Rejected(u32);

    impl fmt::Display for Rejected {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "record {} rejected", self.0)
        }
    }

    fn reporter(root: &std::path::Path) -> Reporter {
        let options = JobOptionsBuilder::new()
            .user_name("ops")
            .storage_root(root)
            .report_directory("run")
            .build();
        let config = JobConfig::resolve(&options, &Environment::empty()).unwrap();
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let (console, _) = Console::capture();
        Reporter::new(
            "Processor",
            &config,
            Environment::empty(),
            Arc::new(clock),
            console,
            Some("rev".to_string()),
        )
    }

    #[test]
    fn test_success_increments_once() {
        let temp_dir = tempdir().unwrap();
        let mut reporter = reporter(temp_dir.path());
        reporter.start().unwrap();

        let value = ItemProcessor::new(&mut reporter).process(|| Ok::<_, Rejected>(7));
        assert_eq!(value, Ok(7));
        assert_eq!(reporter.counter(), 1);
    }

    #[test]
    fn test_failure_is_logged_once_and_returned_unchanged() {
        let temp_dir = tempdir().unwrap();
        let mut reporter = reporter(temp_dir.path());
        reporter.start().unwrap();
        ItemProcessor::new(&mut reporter)
            .process(|| Ok::<_, Rejected>(()))
            .unwrap();

        let result = ItemProcessor::new(&mut reporter).process(|| Err::<(), _>(Rejected(42)));

        assert_eq!(result, Err(Rejected(42)));
        assert_eq!(reporter.counter(), 1);
        let log = std::fs::read_to_string(temp_dir.path().join("run").join(REPORT_LOG)).unwrap();
        assert_eq!(log.matches("record 42 rejected").count(), 1);
        assert!(log.contains("Rejected"));
    }

    #[test]
    fn test_unit_before_start_runs_but_is_not_counted() {
        let temp_dir = tempdir().unwrap();
        let mut reporter = reporter(temp_dir.path());

        let value = ItemProcessor::new(&mut reporter).process(|| Ok::<_, Rejected>(3));
        assert_eq!(value, Ok(3));
        assert_eq!(reporter.counter(), 0);
        assert!(reporter.state().started_at().is_none());
    }
}
