use std::io;
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error};

use super::Schedule;

/// Background loop driving one schedule.
///
/// The loop ticks the schedule, then sleeps for the poll period on a
/// channel so that [`ScheduleWorker::stop`] wakes it immediately. Dropping
/// the worker stops it and joins the thread.
pub struct ScheduleWorker {
    reference: String,
    cancel: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ScheduleWorker {
    /// Spawns the loop for `schedule`.
    ///
    /// # Errors
    ///
    /// Returns the OS error if the thread cannot be created.
    pub fn spawn(schedule: Arc<Schedule>, period: Duration) -> io::Result<Self> {
        let (cancel, cancelled) = mpsc::channel::<()>();
        let reference = schedule.reference().to_string();

        let handle = thread::Builder::new()
            .name(format!("schd-{}", schedule.short_reference()))
            .spawn(move || {
                debug!(schedule = %schedule.reference(), "schedule loop started");
                loop {
                    schedule.tick_now();
                    match cancelled.recv_timeout(period) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                debug!(schedule = %schedule.reference(), "schedule loop stopped");
            })?;

        Ok(Self {
            reference,
            cancel: Some(cancel),
            handle: Some(handle),
        })
    }

    pub fn reference(&self) -> &str {
        &self.reference
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Signals the loop and waits for it to exit. Idempotent.
    pub fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            // The loop may already be gone; disconnection stops it too.
            let _ = cancel.send(());
        }
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                error!(schedule = %self.reference, "schedule loop panicked");
            }
        }
    }
}

impl Drop for ScheduleWorker {
    fn drop(&mut self) {
        self.stop();
    }
}
