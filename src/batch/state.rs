use crate::clock::Timestamp;
use chrono::TimeDelta;

/// Aggregates kept across progress emissions.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PeriodStats {
    pub max_items_in_period: u64,
    pub frequency: u64,
}

/// Counters and timestamps for the current run.
///
/// Restarting a run means replacing this with [`RunState::reset`]; nothing
/// here survives the process.
#[derive(Debug, Clone)]
pub struct RunState {
    pub counter: u64,
    pub previous_counter: u64,
    pub previous_time: Timestamp,
    pub items_in_period: u64,
    pub stats: PeriodStats,
    start_time: Option<Timestamp>,
    finish_time: Option<Timestamp>,
    elapsed_time: Option<TimeDelta>,
}

impl RunState {
    pub fn new(now: Timestamp) -> Self {
        Self {
            counter: 0,
            previous_counter: 0,
            previous_time: now,
            items_in_period: 0,
            stats: PeriodStats::default(),
            start_time: None,
            finish_time: None,
            elapsed_time: None,
        }
    }

    /// Fresh state whose emission window begins at `now`.
    pub fn reset(now: Timestamp) -> Self {
        Self::new(now)
    }

    /// Fixes the start time on first call; later calls return the same value.
    pub fn start_time(&mut self, now: Timestamp) -> Timestamp {
        *self.start_time.get_or_insert(now)
    }

    /// Fixes the finish time on first call; later calls return the same value.
    pub fn finish_time(&mut self, now: Timestamp) -> Timestamp {
        *self.finish_time.get_or_insert(now)
    }

    /// `finish_time - start_time`, computed once. Fixes both timestamps if
    /// they were not yet fixed.
    pub fn elapsed_time(&mut self, now: Timestamp) -> TimeDelta {
        if let Some(elapsed) = self.elapsed_time {
            return elapsed;
        }
        let start = self.start_time(now);
        let elapsed = self.finish_time(now) - start;
        self.elapsed_time = Some(elapsed);
        elapsed
    }

    pub fn started_at(&self) -> Option<Timestamp> {
        self.start_time
    }

    pub fn finished_at(&self) -> Option<Timestamp> {
        self.finish_time
    }

    pub fn increment(&mut self) -> u64 {
        self.counter += 1;
        self.counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    #[test]
    fn test_new_state_is_empty() {
        let state = RunState::new(t0());
        assert_eq!(state.counter, 0);
        assert_eq!(state.previous_counter, 0);
        assert_eq!(state.previous_time, t0());
        assert_eq!(state.stats, PeriodStats::default());
        assert!(state.started_at().is_none());
        assert!(state.finished_at().is_none());
    }

    #[test]
    fn test_times_are_fixed_on_first_read() {
        let mut state = RunState::new(t0());
        let later = t0() + TimeDelta::seconds(30);

        assert_eq!(state.start_time(t0()), t0());
        assert_eq!(state.start_time(later), t0());

        assert_eq!(state.finish_time(later), later);
        assert_eq!(state.finish_time(later + TimeDelta::seconds(5)), later);
    }

    #[test]
    fn test_elapsed_time_is_cached() {
        let mut state = RunState::new(t0());
        state.start_time(t0());
        let finish = t0() + TimeDelta::seconds(90);

        assert_eq!(state.elapsed_time(finish), TimeDelta::seconds(90));
        assert_eq!(
            state.elapsed_time(finish + TimeDelta::seconds(100)),
            TimeDelta::seconds(90)
        );
        assert_eq!(state.finished_at(), Some(finish));
    }

    #[test]
    fn test_reset_discards_counters() {
        let mut state = RunState::new(t0());
        state.increment();
        state.increment();
        state.start_time(t0());

        let later = t0() + TimeDelta::seconds(10);
        let state = RunState::reset(later);
        assert_eq!(state.counter, 0);
        assert_eq!(state.previous_time, later);
        assert!(state.started_at().is_none());
    }
}
