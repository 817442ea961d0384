//! In-memory recording of target value changes.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::controller::TargetValueChange;
use crate::scheduler::Scheduler;

/// Records every target value change a scheduler publishes.
///
/// Clones share the same record list, so a clone can be moved into the
/// scheduler's handler while the original is read by the host.
#[derive(Debug, Default, Clone)]
pub struct TargetValueLog {
    records: Arc<Mutex<Vec<TargetValueChange>>>,
}

impl TargetValueLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs this log as the scheduler's target value handler.
    pub fn install(&self, scheduler: &Scheduler) {
        let log = self.clone();
        scheduler.set_target_value_handler(move |change| log.record(change));
    }

    pub fn record(&self, change: &TargetValueChange) {
        self.records.lock().push(change.clone());
    }

    /// Copy of all records in arrival order.
    pub fn records(&self) -> Vec<TargetValueChange> {
        self.records.lock().clone()
    }

    /// Most recent change published for `target`.
    pub fn latest(&self, target: &str) -> Option<TargetValueChange> {
        self.records
            .lock()
            .iter()
            .rev()
            .find(|c| c.target == target)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    pub fn clear(&self) {
        self.records.lock().clear();
    }
}
