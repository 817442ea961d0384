//! Power-device scheduling engine.
//!
//! Schedules, found as nodes of an in-memory information model, publish a
//! sequence of setpoints at fixed intervals once triggered. Schedule
//! controllers arbitrate between the schedules bound to them by priority
//! and forward the winner's values to a controlled entity. The
//! [`Scheduler`](scheduler::Scheduler) ties them together, runs one loop per
//! schedule and persists their configuration.

#[cfg(feature = "api")]
pub mod api;
pub mod clock;
pub mod config;
pub mod controller;
pub mod error;
pub mod io;
pub mod model;
pub mod schedule;
pub mod scheduler;
pub mod storage;
pub mod telemetry;

pub use error::{Result, SchedulerError};
pub use scheduler::Scheduler;
