use std::fmt::Display;
use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::clock::MINUTES_PER_DAY;
use crate::limits::{MAX_CANCELLATION_CUTOFF_MIN, MAX_REMINDER_INTERVAL_SECS};

/// Scheduling knobs handed explicitly to the resolver, the guard and the
/// cancellation path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleConfig {
    /// Distance between candidate start times.
    pub slot_step_minutes: i32,
    /// Clients may not cancel closer than this to the appointment start.
    pub cancellation_cutoff_minutes: i64,
    /// Reject reservations that don't fit the resource's working window.
    pub enforce_working_hours: bool,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            slot_step_minutes: 30,
            cancellation_cutoff_minutes: 120,
            enforce_working_hours: true,
        }
    }
}

/// Settings for the `chairbook` daemon, read from `CHAIRBOOK_*` variables.
#[derive(Debug, Clone)]
pub struct DaemonConfig {
    pub data_dir: PathBuf,
    pub seed_path: Option<PathBuf>,
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,
    pub reminder_interval: Duration,
    pub schedule: ScheduleConfig,
}

impl DaemonConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup. Values that don't parse, or parse to
    /// something outside the accepted range, fall back to defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = ScheduleConfig::default();
        let schedule = ScheduleConfig {
            slot_step_minutes: bounded(
                &get,
                "CHAIRBOOK_SLOT_STEP_MINUTES",
                1..=MINUTES_PER_DAY as i32,
                defaults.slot_step_minutes,
            ),
            cancellation_cutoff_minutes: bounded(
                &get,
                "CHAIRBOOK_CANCELLATION_CUTOFF_MINUTES",
                0..=MAX_CANCELLATION_CUTOFF_MIN,
                defaults.cancellation_cutoff_minutes,
            ),
            enforce_working_hours: get("CHAIRBOOK_ENFORCE_WORKING_HOURS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.enforce_working_hours),
        };

        Self {
            data_dir: PathBuf::from(get("CHAIRBOOK_DATA_DIR").unwrap_or_else(|| "./data".into())),
            seed_path: get("CHAIRBOOK_SEED").map(PathBuf::from),
            metrics_port: get("CHAIRBOOK_METRICS_PORT").and_then(|s| s.parse().ok()),
            compact_threshold: bounded(&get, "CHAIRBOOK_COMPACT_THRESHOLD", 1..=u64::MAX, 1000),
            reminder_interval: Duration::from_secs(bounded(
                &get,
                "CHAIRBOOK_REMINDER_INTERVAL_SECS",
                1..=MAX_REMINDER_INTERVAL_SECS,
                3600,
            )),
            schedule,
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("chairbook.wal")
    }
}

fn bounded<T>(
    get: &impl Fn(&str) -> Option<String>,
    key: &str,
    range: RangeInclusive<T>,
    default: T,
) -> T
where
    T: FromStr + PartialOrd + Display + Copy,
{
    let Some(raw) = get(key) else {
        return default;
    };
    match raw.parse::<T>() {
        Ok(v) if range.contains(&v) => v,
        _ => {
            warn!(
                "{key}={raw:?} must be within {}..={}, using {default}",
                range.start(),
                range.end()
            );
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let cfg = DaemonConfig::from_lookup(lookup(&[]));
        assert_eq!(cfg.data_dir, PathBuf::from("./data"));
        assert_eq!(cfg.seed_path, None);
        assert_eq!(cfg.metrics_port, None);
        assert_eq!(cfg.compact_threshold, 1000);
        assert_eq!(cfg.reminder_interval, Duration::from_secs(3600));
        assert_eq!(cfg.schedule, ScheduleConfig::default());
        assert_eq!(cfg.wal_path(), PathBuf::from("./data/chairbook.wal"));
    }

    #[test]
    fn overrides_are_parsed() {
        let cfg = DaemonConfig::from_lookup(lookup(&[
            ("CHAIRBOOK_DATA_DIR", "/var/lib/chairbook"),
            ("CHAIRBOOK_SEED", "seed.json"),
            ("CHAIRBOOK_METRICS_PORT", "9100"),
            ("CHAIRBOOK_SLOT_STEP_MINUTES", "15"),
            ("CHAIRBOOK_CANCELLATION_CUTOFF_MINUTES", "60"),
            ("CHAIRBOOK_ENFORCE_WORKING_HOURS", "false"),
        ]));
        assert_eq!(cfg.data_dir, PathBuf::from("/var/lib/chairbook"));
        assert_eq!(cfg.seed_path, Some(PathBuf::from("seed.json")));
        assert_eq!(cfg.metrics_port, Some(9100));
        assert_eq!(cfg.schedule.slot_step_minutes, 15);
        assert_eq!(cfg.schedule.cancellation_cutoff_minutes, 60);
        assert!(!cfg.schedule.enforce_working_hours);
    }

    #[test]
    fn garbage_falls_back_to_defaults() {
        let cfg = DaemonConfig::from_lookup(lookup(&[
            ("CHAIRBOOK_METRICS_PORT", "not-a-port"),
            ("CHAIRBOOK_SLOT_STEP_MINUTES", "thirty"),
        ]));
        assert_eq!(cfg.metrics_port, None);
        assert_eq!(cfg.schedule.slot_step_minutes, 30);
    }

    #[test]
    fn out_of_range_falls_back_to_defaults() {
        let cfg = DaemonConfig::from_lookup(lookup(&[
            ("CHAIRBOOK_REMINDER_INTERVAL_SECS", "0"),
            ("CHAIRBOOK_SLOT_STEP_MINUTES", "-15"),
            ("CHAIRBOOK_CANCELLATION_CUTOFF_MINUTES", "9223372036854775807"),
            ("CHAIRBOOK_COMPACT_THRESHOLD", "0"),
        ]));
        assert_eq!(cfg.reminder_interval, Duration::from_secs(3600));
        assert_eq!(cfg.schedule, ScheduleConfig::default());
        assert_eq!(cfg.compact_threshold, 1000);

        let zero_step = DaemonConfig::from_lookup(lookup(&[
            ("CHAIRBOOK_SLOT_STEP_MINUTES", "0"),
            ("CHAIRBOOK_CANCELLATION_CUTOFF_MINUTES", "-1"),
        ]));
        assert_eq!(zero_step.schedule, ScheduleConfig::default());
    }

    #[test]
    fn range_edges_are_accepted() {
        let cfg = DaemonConfig::from_lookup(lookup(&[
            ("CHAIRBOOK_REMINDER_INTERVAL_SECS", "1"),
            ("CHAIRBOOK_SLOT_STEP_MINUTES", "1"),
            ("CHAIRBOOK_CANCELLATION_CUTOFF_MINUTES", "0"),
        ]));
        assert_eq!(cfg.reminder_interval, Duration::from_secs(1));
        assert_eq!(cfg.schedule.slot_step_minutes, 1);
        assert_eq!(cfg.schedule.cancellation_cutoff_minutes, 0);
    }

    #[tokio::test]
    async fn reminder_task_survives_zero_interval_setting() {
        use crate::engine::Engine;
        use crate::notify::NotifyHub;
        use std::sync::Arc;

        let dir = std::env::temp_dir().join("chairbook_test_config");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("zero_interval.wal");
        let _ = std::fs::remove_file(&path);
        let engine = Arc::new(Engine::new(path, Arc::new(NotifyHub::new())).unwrap());

        let cfg = DaemonConfig::from_lookup(lookup(&[("CHAIRBOOK_REMINDER_INTERVAL_SECS", "0")]));
        let task = tokio::spawn(crate::sweeper::run_reminders(engine, cfg.reminder_interval));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!task.is_finished());
        task.abort();
    }
}
