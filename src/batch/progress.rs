use std::fmt;

use chrono::TimeDelta;

use super::format::{human_period, nice_float, nice_number, seconds};
use super::state::RunState;
use crate::clock::Timestamp;
use crate::config::JobConfig;

/// Throttled console progress for a run (if configured to show it).
#[derive(Debug, Clone)]
pub struct Progress {
    label: String,
    worker: Option<usize>,
    enabled: bool,
    expected: Option<u64>,
    interval: TimeDelta,
    float_threshold: f64,
}

/// One rendered progress line and the numbers behind it.
#[derive(Debug, Clone, PartialEq)]
pub struct Emission {
    pub label: String,
    pub worker: Option<usize>,
    pub total: u64,
    pub items_in_period: u64,
    pub period: TimeDelta,
    pub average: f64,
    pub peak: u64,
    pub percent: Option<f64>,
    pub eta: Option<Timestamp>,
    float_threshold: f64,
}

impl Progress {
    pub fn new(label: impl Into<String>, config: &JobConfig) -> Self {
        Self {
            label: label.into(),
            worker: config.worker,
            enabled: config.show_progress,
            expected: config.expected,
            interval: config.progress_interval,
            float_threshold: config.float_threshold,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Turns emission on. Calling it again has no further effect.
    pub fn start(&mut self) {
        self.enabled = true;
    }

    /// Hook for the end of a run; does nothing, whether or not `start` was called.
    pub fn finish(&mut self) {}

    pub fn expected(&self) -> Option<u64> {
        self.expected
    }

    pub fn set_expected(&mut self, expected: Option<u64>) {
        self.expected = expected;
    }

    pub fn interval(&self) -> TimeDelta {
        self.interval
    }

    fn percent_mode(&self) -> Option<u64> {
        self.expected.filter(|expected| *expected > 0)
    }

    /// Emits a line if at least one interval has passed since the previous
    /// emission. Otherwise returns `None` and leaves `state` untouched, so it
    /// is safe to call for every item.
    pub fn show(&self, state: &mut RunState, now: Timestamp) -> Option<Emission> {
        if !self.enabled {
            return None;
        }
        let period = now - state.previous_time;
        if period < self.interval {
            return None;
        }

        let items_in_period = state.counter - state.previous_counter;
        state.items_in_period = items_in_period;
        state.previous_counter = state.counter;
        state.previous_time = now;
        state.stats.max_items_in_period = state.stats.max_items_in_period.max(items_in_period);
        state.stats.frequency += 1;

        let percent = self
            .percent_mode()
            .map(|expected| 100.0 * state.counter as f64 / expected as f64);
        let eta = self
            .percent_mode()
            .and_then(|expected| self.eta(expected, state.counter, items_in_period, now));

        Some(Emission {
            label: self.label.clone(),
            worker: self.worker,
            total: state.counter,
            items_in_period,
            period,
            average: state.counter as f64 / state.stats.frequency as f64,
            peak: state.stats.max_items_in_period,
            percent,
            eta,
            float_threshold: self.float_threshold,
        })
    }

    /// `now + remaining * interval / items_in_period`, or `None` when nothing
    /// was processed in the period.
    pub fn eta(
        &self,
        expected: u64,
        counter: u64,
        items_in_period: u64,
        now: Timestamp,
    ) -> Option<Timestamp> {
        if items_in_period == 0 {
            return None;
        }
        let remaining = expected.saturating_sub(counter) as f64;
        let secs = remaining * seconds(self.interval) / items_in_period as f64;
        let delta = TimeDelta::try_milliseconds((secs * 1000.0).round() as i64)?;
        now.checked_add_signed(delta)
    }

    pub fn nice_float(&self, number: f64) -> String {
        nice_float(number, self.float_threshold)
    }
}

impl fmt::Display for Emission {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(worker) = self.worker {
            write!(f, "[w{}] ", worker)?;
        }
        write!(
            f,
            "{}\t{} processed ({} in the last {}, average {} per interval, peak {})",
            self.label,
            nice_number(self.total),
            nice_number(self.items_in_period),
            human_period(self.period),
            nice_float(self.average, self.float_threshold),
            nice_number(self.peak),
        )?;
        if let Some(percent) = self.percent {
            write!(f, ", {:.1}% complete", percent)?;
        }
        if let Some(eta) = self.eta {
            write!(f, ", ETA {}", eta.format("%H:%M:%S"))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{JobConfig, JobOptionsBuilder};
    use crate::Environment;
    use chrono::{TimeZone, Utc};

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 5, 6, 10, 0, 0).unwrap()
    }

    fn progress(expected: Option<u64>) -> Progress {
        let options = JobOptionsBuilder::new()
            .user_name("tester")
            .show_progress(true)
            .expected(expected)
            .progress_interval(60.0)
            .build();
        let config = JobConfig::resolve(&options, &Environment::empty()).unwrap();
        Progress::new("ImportUsers", &config)
    }

    fn at(secs: i64) -> Timestamp {
        t0() + TimeDelta::seconds(secs)
    }

    #[test]
    fn test_disabled_until_started() {
        let options = JobOptionsBuilder::new().user_name("tester").build();
        let config = JobConfig::resolve(&options, &Environment::empty()).unwrap();
        let mut progress = Progress::new("Quiet", &config);
        let mut state = RunState::new(t0());
        state.counter = 10;

        assert!(progress.show(&mut state, at(120)).is_none());

        progress.start();
        progress.start();
        assert!(progress.is_enabled());
        assert!(progress.show(&mut state, at(120)).is_some());
    }

    #[test]
    fn test_finish_without_start_is_harmless() {
        let mut progress = progress(None);
        progress.finish();
        progress.finish();
    }

    #[test]
    fn test_no_emission_before_interval_and_no_mutation() {
        let progress = progress(None);
        let mut state = RunState::new(t0());
        state.counter = 42;

        assert!(progress.show(&mut state, at(59)).is_none());
        assert_eq!(state.previous_counter, 0);
        assert_eq!(state.previous_time, t0());
        assert_eq!(state.stats.frequency, 0);
    }

    #[test]
    fn test_emits_at_most_once_per_interval() {
        let progress = progress(None);
        let mut state = RunState::new(t0());
        let mut emissions = 0;

        for second in 0..=61 {
            state.increment();
            assert!(state.previous_counter <= state.counter);
            if progress.show(&mut state, at(second)).is_some() {
                emissions += 1;
            }
        }
        state.increment();
        if progress.show(&mut state, at(61)).is_some() {
            emissions += 1;
        }

        assert_eq!(emissions, 1);
        assert_eq!(state.stats.frequency, 1);
        assert_eq!(state.previous_time, at(60));
    }

    #[test]
    fn test_stats_track_peak_and_average() {
        let progress = progress(None);
        let mut state = RunState::new(t0());

        state.counter = 100;
        progress.show(&mut state, at(60)).unwrap();
        state.counter = 130;
        let emission = progress.show(&mut state, at(120)).unwrap();

        assert_eq!(emission.items_in_period, 30);
        assert_eq!(emission.peak, 100);
        assert_eq!(emission.average, 65.0);
        assert_eq!(state.stats.max_items_in_period, 100);
        assert_eq!(state.stats.frequency, 2);
    }

    #[test]
    fn test_no_percent_or_eta_without_expected() {
        for expected in [None, Some(0)] {
            let progress = progress(expected);
            let mut state = RunState::new(t0());
            state.counter = 300;
            let emission = progress.show(&mut state, at(60)).unwrap();

            assert!(emission.percent.is_none());
            assert!(emission.eta.is_none());
            let line = emission.to_string();
            assert!(!line.contains('%'));
            assert!(!line.contains("ETA"));
        }
    }

    #[test]
    fn test_percent_at_half_way() {
        let progress = progress(Some(200));
        let mut state = RunState::new(t0());
        state.counter = 100;
        let emission = progress.show(&mut state, at(60)).unwrap();

        assert_eq!(emission.percent, Some(50.0));
        assert!(emission.to_string().contains("50.0% complete"));
    }

    #[test]
    fn test_eta_is_omitted_when_nothing_processed_in_period() {
        let progress = progress(Some(200));
        let mut state = RunState::new(t0());
        state.counter = 50;
        progress.show(&mut state, at(60)).unwrap();

        let emission = progress.show(&mut state, at(120)).unwrap();
        assert_eq!(emission.items_in_period, 0);
        assert!(emission.eta.is_none());
        assert!(emission.percent.is_some());
        assert!(progress.eta(200, 50, 0, at(120)).is_none());
    }

    #[test]
    fn test_import_users_line() {
        let progress = progress(Some(1000));
        let mut state = RunState::new(t0());
        state.counter = 300;
        let emission = progress.show(&mut state, at(60)).unwrap();

        // 700 remaining at 300 per 60 seconds
        assert_eq!(emission.eta, Some(at(60 + 140)));
        let line = emission.to_string();
        assert!(line.starts_with("ImportUsers\t300 processed (300 in the last 1 minute"));
        assert!(line.contains("30.0% complete"));
        assert!(line.contains("ETA 10:03:20"));
    }

    #[test]
    fn test_eta_when_past_expected_is_now() {
        let progress = progress(Some(10));
        assert_eq!(progress.eta(10, 25, 5, at(0)), Some(at(0)));
    }

    #[test]
    fn test_worker_prefix() {
        let options = JobOptionsBuilder::new()
            .user_name("tester")
            .show_progress(true)
            .build();
        let mut config = JobConfig::resolve(&options, &Environment::empty()).unwrap();
        config.worker = Some(3);
        let progress = Progress::new("Sync", &config);
        let mut state = RunState::new(t0());
        state.counter = 1_500;

        let line = progress.show(&mut state, at(60)).unwrap().to_string();
        assert!(line.starts_with("[w3] Sync\t1,500 processed"));
    }
}
