use chrono::TimeDelta;
use indicatif::HumanCount;

pub const DEFAULT_FLOAT_THRESHOLD: f64 = 5.0;

/// Integer with thousands separators: `1234567` -> `1,234,567`.
pub fn nice_number(number: u64) -> String {
    HumanCount(number).to_string()
}

/// Small values keep two decimals, anything at or above `threshold` is
/// truncated and rendered like [`nice_number`].
pub fn nice_float(number: f64, threshold: f64) -> String {
    if !number.is_finite() {
        return number.to_string();
    }
    if number < threshold {
        format!("{:.2}", number)
    } else {
        nice_number(number.trunc() as u64)
    }
}

/// Fractional seconds of a chrono delta.
pub fn seconds(delta: TimeDelta) -> f64 {
    delta.num_milliseconds() as f64 / 1000.0
}

const PERIOD_UNITS: [(i64, &str); 3] = [(86_400, "day"), (3_600, "hour"), (60, "minute")];

/// Human phrase for a period in its largest whole unit, e.g. "1 minute",
/// "2 hours", "45 seconds". Negative periods count as zero.
pub fn human_period(delta: TimeDelta) -> String {
    let secs = delta.num_seconds().max(0);
    let (count, unit) = PERIOD_UNITS
        .iter()
        .find(|(size, _)| secs >= *size)
        .map(|(size, unit)| (secs / size, *unit))
        .unwrap_or((secs, "second"));
    if count == 1 {
        format!("1 {}", unit)
    } else {
        format!("{} {}s", count, unit)
    }
}
