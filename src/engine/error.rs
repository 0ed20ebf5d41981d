use ulid::Ulid;

use crate::model::AppointmentStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    InvalidTimeFormat(String),
    InvalidStep(i32),
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },
    /// Overlaps the existing appointment with this id.
    Conflict(Ulid),
    NotFound(Ulid),
    AlreadyExists(Ulid),
    InvalidWindow(&'static str),
    InvalidDuration(u32),
    OutsideWorkingHours,
    CancellationWindowClosed,
    /// Cancelled and completed appointments can't be reassigned.
    AppointmentClosed(AppointmentStatus),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Expected outcome of contended booking rather than a failed request.
    pub fn is_conflict(&self) -> bool {
        matches!(self, EngineError::Conflict(_))
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidTimeFormat(s) => write!(f, "invalid time {s:?}: expected HH:MM"),
            EngineError::InvalidStep(step) => write!(f, "invalid slot step: {step} minutes"),
            EngineError::InvalidTransition { from, to } => {
                write!(f, "invalid status transition: {from} -> {to}")
            }
            EngineError::Conflict(id) => write!(f, "conflict with appointment: {id}"),
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::AlreadyExists(id) => write!(f, "already exists: {id}"),
            EngineError::InvalidWindow(msg) => write!(f, "invalid working window: {msg}"),
            EngineError::InvalidDuration(d) => write!(f, "invalid service duration: {d} minutes"),
            EngineError::OutsideWorkingHours => {
                write!(f, "appointment falls outside working hours")
            }
            EngineError::CancellationWindowClosed => {
                write!(f, "too late to cancel this appointment")
            }
            EngineError::AppointmentClosed(status) => {
                write!(f, "appointment is {status} and can no longer be reassigned")
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
