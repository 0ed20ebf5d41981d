//! Hard caps on store contents. Every write path checks the relevant one and
//! fails with `EngineError::LimitExceeded` instead of growing without bound.

pub const MAX_RESOURCES: usize = 1_000;
pub const MAX_SERVICES: usize = 1_000;
pub const MAX_NAME_LEN: usize = 256;
pub const MAX_NOTES_LEN: usize = 2_048;

/// Appointments kept per resource per calendar day, cancelled ones included.
pub const MAX_APPOINTMENTS_PER_DAY: usize = 512;

/// A service longer than a full day can never fit a working window.
pub const MAX_SERVICE_DURATION_MIN: u32 = 24 * 60;

/// Upper bound on candidates accepted by a single availability query.
pub const MAX_CANDIDATES: usize = 256;

/// Longest cancellation cutoff accepted from configuration (30 days).
pub const MAX_CANCELLATION_CUTOFF_MIN: i64 = 30 * 24 * 60;

/// Longest pause between reminder sweeps (one week).
pub const MAX_REMINDER_INTERVAL_SECS: u64 = 7 * 24 * 3600;
