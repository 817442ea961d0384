//! Start conditions: time-triggered start times and event-triggered sync
//! inputs.

/// One `StrTm<n>` start-time slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartTimeSlot {
    /// Data object name, e.g. `StrTm01`.
    pub id: String,
    /// Short reference of its `setTm` attribute.
    pub attribute: String,
}

/// How an enabled schedule waits for its run to begin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TriggerMode {
    /// Starts when the earliest future start time is crossed.
    Time,
    /// Starts on a rising edge of the boolean sync input.
    Event {
        /// Short reference of the boolean signal.
        sync_input: String,
    },
}

/// Earliest start time strictly after `now`, or 0 when there is none.
pub fn next_start_time(now: u64, start_times: impl IntoIterator<Item = u64>) -> u64 {
    start_times
        .into_iter()
        .filter(|t| *t > now)
        .min()
        .unwrap_or(0)
}

/// Tracks a boolean signal and reports false-to-true transitions.
#[derive(Debug, Default, Clone, Copy)]
pub struct EdgeDetector {
    last: Option<bool>,
}

impl EdgeDetector {
    /// Seeds the detector so that a signal already high is not an edge.
    pub fn arm(&mut self, level: bool) {
        self.last = Some(level);
    }

    pub fn reset(&mut self) {
        self.last = None;
    }

    /// Records `level` and returns `true` on a rising edge.
    pub fn rising(&mut self, level: bool) -> bool {
        let edge = self.last == Some(false) && level;
        self.last = Some(level);
        edge
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn next_start_ignores_past_and_unset() {
        assert_eq!(next_start_time(1_000, [0, 500, 3_000, 2_000]), 2_000);
        assert_eq!(next_start_time(1_000, [0, 1_000]), 0);
        assert_eq!(next_start_time(1_000, []), 0);
    }

    #[test]
    fn rising_edge_only_after_low() {
        let mut edge = EdgeDetector::default();
        edge.arm(true);
        assert!(!edge.rising(true));
        assert!(!edge.rising(false));
        assert!(edge.rising(true));
        assert!(!edge.rising(true));
    }

    #[test]
    fn unarmed_detector_needs_a_low_sample() {
        let mut edge = EdgeDetector::default();
        assert!(!edge.rising(true));
        edge.reset();
        assert!(!edge.rising(false));
        assert!(edge.rising(true));
    }
}
