//! Entry interval and index arithmetic.

use tracing::error;

/// SI unit code for seconds.
pub const SI_UNIT_SECOND: i32 = 4;
/// SI unit code for hours.
pub const SI_UNIT_HOUR: i32 = 84;
/// SI unit code for minutes.
pub const SI_UNIT_MINUTE: i32 = 85;

/// Seconds per unit for the supported SI codes.
///
/// Unsupported codes are logged and treated as seconds.
pub fn unit_base_seconds(si_unit: i32) -> u64 {
    match si_unit {
        SI_UNIT_SECOND => 1,
        SI_UNIT_MINUTE => 60,
        SI_UNIT_HOUR => 3600,
        other => {
            error!(si_unit = other, "unsupported interval unit, assuming seconds");
            1
        }
    }
}

/// Converts an interval triple into milliseconds.
///
/// `ms = set_val × base × 1000 × 10^multiplier`, rounded to the nearest
/// millisecond. A missing unit means seconds and a missing multiplier means
/// zero. Returns `None` unless the result is at least one millisecond.
///
/// # Examples
///
/// ```
/// use der_scheduler::schedule::interval::{interval_ms, SI_UNIT_MINUTE};
///
/// assert_eq!(interval_ms(2, Some(SI_UNIT_MINUTE), None), Some(120_000));
/// assert_eq!(interval_ms(500, None, Some(-3)), Some(500));
/// assert_eq!(interval_ms(0, None, None), None);
/// ```
pub fn interval_ms(set_val: i32, si_unit: Option<i32>, multiplier: Option<i32>) -> Option<u64> {
    if set_val <= 0 {
        return None;
    }

    let base = unit_base_seconds(si_unit.unwrap_or(SI_UNIT_SECOND)) as f64;
    let ms = (f64::from(set_val) * base * 1000.0 * 10f64.powi(multiplier.unwrap_or(0))).round();

    if ms.is_finite() && ms >= 1.0 && ms <= u64::MAX as f64 {
        Some(ms as u64)
    } else {
        None
    }
}

/// Picks a `(set_val, si_unit, multiplier)` triple that reproduces `ms`
/// exactly, preferring whole seconds.
pub fn encode_interval(ms: u64) -> Option<(i32, i32, i32)> {
    if ms == 0 {
        return None;
    }
    let whole_seconds = (ms % 1000 == 0)
        .then(|| i32::try_from(ms / 1000).ok())
        .flatten();
    if let Some(seconds) = whole_seconds {
        return Some((seconds, SI_UNIT_SECOND, 0));
    }
    i32::try_from(ms)
        .ok()
        .map(|millis| (millis, SI_UNIT_SECOND, -3))
}

/// Zero-based entry index active at `now`, or `None` once the run is over.
pub fn entry_index(now: u64, start: u64, duration_ms: u64, count: usize) -> Option<usize> {
    if duration_ms == 0 {
        return None;
    }
    let idx = now.saturating_sub(start) / duration_ms;
    usize::try_from(idx).ok().filter(|idx| *idx < count)
}
