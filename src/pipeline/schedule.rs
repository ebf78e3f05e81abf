//! Poll scheduling: interval policy and startup jitter.

use rand::Rng;
use std::time::Duration;

/// Delay until the device's next expected report.
///
/// `elapsed_millis` is the time since the device last reported, measured on
/// the source's clock. A negative candidate (the report is overdue) or one
/// above the cadence (clock skew) falls back to the full cadence.
pub fn next_interval(nominal: Duration, elapsed_millis: i64) -> Duration {
    let nominal_millis = i64::try_from(nominal.as_millis()).unwrap_or(i64::MAX);
    let candidate = nominal_millis.saturating_sub(elapsed_millis);
    if candidate < 0 || candidate > nominal_millis {
        nominal
    } else {
        Duration::from_millis(candidate as u64)
    }
}

/// Generate a random jitter duration up to the specified maximum seconds.
pub fn random_jitter(max_secs: u64) -> Duration {
    if max_secs > 0 {
        Duration::from_millis(rand::rng().random_range(0..max_secs * 1000))
    } else {
        Duration::ZERO
    }
}
