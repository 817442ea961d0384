use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};

/// Lifecycle state of a schedule, with its published integer code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ScheduleState {
    NotReady,
    StartTimeRequired,
    Ready,
    Running,
}

impl ScheduleState {
    pub fn code(self) -> i32 {
        match self {
            ScheduleState::NotReady => 1,
            ScheduleState::StartTimeRequired => 2,
            ScheduleState::Ready => 3,
            ScheduleState::Running => 4,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(ScheduleState::NotReady),
            2 => Some(ScheduleState::StartTimeRequired),
            3 => Some(ScheduleState::Ready),
            4 => Some(ScheduleState::Running),
            _ => None,
        }
    }
}

impl fmt::Display for ScheduleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScheduleState::NotReady => "NOT_READY",
            ScheduleState::StartTimeRequired => "START_TIME_REQUIRED",
            ScheduleState::Ready => "READY",
            ScheduleState::Running => "RUNNING",
        };
        f.write_str(name)
    }
}

/// Diagnostic published in `SchdEnaErr.stVal` after an enable attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EnableError {
    None,
    MissingValidNumEntr,
    MissingValidSchdIntv,
    MissingValidScheduleValues,
    InconsistentValuesCdc,
    MissingValidStrTm,
    Other,
}

impl EnableError {
    pub fn code(self) -> i32 {
        match self {
            EnableError::None => 1,
            EnableError::MissingValidNumEntr => 2,
            EnableError::MissingValidSchdIntv => 3,
            EnableError::MissingValidScheduleValues => 4,
            EnableError::InconsistentValuesCdc => 5,
            EnableError::MissingValidStrTm => 6,
            EnableError::Other => 99,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(EnableError::None),
            2 => Some(EnableError::MissingValidNumEntr),
            3 => Some(EnableError::MissingValidSchdIntv),
            4 => Some(EnableError::MissingValidScheduleValues),
            5 => Some(EnableError::InconsistentValuesCdc),
            6 => Some(EnableError::MissingValidStrTm),
            99 => Some(EnableError::Other),
            _ => None,
        }
    }
}

impl fmt::Display for EnableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            EnableError::None => "none",
            EnableError::MissingValidNumEntr => "missing valid entry count",
            EnableError::MissingValidSchdIntv => "missing valid interval",
            EnableError::MissingValidScheduleValues => "missing valid schedule values",
            EnableError::InconsistentValuesCdc => "inconsistent value kind",
            EnableError::MissingValidStrTm => "missing valid start time",
            EnableError::Other => "other",
        };
        f.write_str(text)
    }
}

/// Schedule parameters with their own remote write policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleParameter {
    Priority,
    StartTime,
    Reuse,
}

/// Remote access switches of one schedule.
#[derive(Debug)]
pub struct AccessPolicy {
    remote_control: AtomicBool,
    write_priority: AtomicBool,
    write_start_time: AtomicBool,
    write_reuse: AtomicBool,
}

impl Default for AccessPolicy {
    fn default() -> Self {
        Self {
            remote_control: AtomicBool::new(true),
            write_priority: AtomicBool::new(true),
            write_start_time: AtomicBool::new(true),
            write_reuse: AtomicBool::new(true),
        }
    }
}

impl AccessPolicy {
    pub fn remote_control(&self) -> bool {
        self.remote_control.load(Ordering::Acquire)
    }

    pub fn set_remote_control(&self, allowed: bool) {
        self.remote_control.store(allowed, Ordering::Release);
    }

    pub fn write_allowed(&self, parameter: ScheduleParameter) -> bool {
        self.flag(parameter).load(Ordering::Acquire)
    }

    pub fn set_write_allowed(&self, parameter: ScheduleParameter, allowed: bool) {
        self.flag(parameter).store(allowed, Ordering::Release);
    }

    fn flag(&self, parameter: ScheduleParameter) -> &AtomicBool {
        match parameter {
            ScheduleParameter::Priority => &self.write_priority,
            ScheduleParameter::StartTime => &self.write_start_time,
            ScheduleParameter::Reuse => &self.write_reuse,
        }
    }
}
