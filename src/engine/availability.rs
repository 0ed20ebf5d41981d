use std::collections::BTreeSet;

use chrono::NaiveDate;
use ulid::Ulid;

use crate::clock::generate_slots;
use crate::config::ScheduleConfig;
use crate::model::*;

use super::EngineError;
use super::overlap::overlaps;

// ── Availability Algorithm ────────────────────────────────────────

/// Compute the bookable slots for `service` on `date` across `candidates`.
///
/// Works purely on the snapshots passed in:
/// 1. Each candidate's active window for the date's weekday (none → skipped).
/// 2. Candidate starts every `slot_step_minutes` inside the window.
/// 3. Starts whose service would run past the window end are dropped.
/// 4. Starts overlapping a non-cancelled booking of that resource are dropped.
///
/// Output is ordered by start time, then resource id, so identical inputs
/// always produce identical output.
pub fn resolve(
    date: NaiveDate,
    service: &ServiceSpec,
    candidates: &[Ulid],
    windows: &[WorkingWindow],
    booked: &[BookedInterval],
    config: &ScheduleConfig,
) -> Result<Vec<Slot>, EngineError> {
    if config.slot_step_minutes <= 0 {
        return Err(EngineError::InvalidStep(config.slot_step_minutes));
    }
    if service.duration_minutes == 0 {
        return Err(EngineError::InvalidDuration(0));
    }

    let weekday = weekday_of(date);
    let candidates: BTreeSet<Ulid> = candidates.iter().copied().collect();
    let mut slots = Vec::new();

    for resource_id in candidates {
        let Some(window) = windows
            .iter()
            .find(|w| w.resource_id == resource_id && w.weekday == weekday && w.active)
        else {
            continue;
        };

        let busy: Vec<&BookedInterval> = booked
            .iter()
            .filter(|b| b.resource_id == resource_id && b.date == date && b.status.occupies_slot())
            .collect();

        for start in generate_slots(window.start, window.end, config.slot_step_minutes)? {
            // Starts only grow, so the first one that doesn't fit ends the window.
            let Some(end) = start.checked_add_minutes(service.duration_minutes) else {
                break;
            };
            if end > window.end {
                break;
            }
            if busy.iter().any(|b| overlaps(start, end, b.start, b.end)) {
                continue;
            }
            slots.push(Slot {
                start,
                end,
                resource_id,
                available: true,
            });
        }
    }

    slots.sort_by(|a, b| a.start.cmp(&b.start).then(a.resource_id.cmp(&b.resource_id)));
    Ok(slots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ClockTime;

    fn t(s: &str) -> ClockTime {
        ClockTime::parse(s).unwrap()
    }

    // Tuesday.
    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 20).unwrap()
    }

    fn service(duration: u32) -> ServiceSpec {
        ServiceSpec {
            id: Ulid::new(),
            name: "Corte".into(),
            duration_minutes: duration,
            price_cents: 3500,
            active: true,
        }
    }

    fn window(rid: Ulid, start: &str, end: &str) -> WorkingWindow {
        WorkingWindow::new(rid, weekday_of(day()), t(start), t(end)).unwrap()
    }

    fn booking(rid: Ulid, start: &str, end: &str, status: AppointmentStatus) -> BookedInterval {
        BookedInterval {
            id: Ulid::new(),
            resource_id: rid,
            date: day(),
            start: t(start),
            end: t(end),
            status,
        }
    }

    fn starts(slots: &[Slot]) -> Vec<String> {
        slots.iter().map(|s| s.start.to_string()).collect()
    }

    #[test]
    fn full_day_without_bookings() {
        let rid = Ulid::new();
        let slots = resolve(
            day(),
            &service(30),
            &[rid],
            &[window(rid, "08:00", "18:00")],
            &[],
            &ScheduleConfig::default(),
        )
        .unwrap();
        assert_eq!(slots.len(), 20);
        assert_eq!(slots[0].start, t("08:00"));
        assert_eq!(slots[19].start, t("17:30"));
        assert_eq!(slots[19].end, t("18:00"));
        assert!(slots.iter().all(|s| s.available && s.resource_id == rid));
    }

    #[test]
    fn confirmed_booking_excludes_slot() {
        let rid = Ulid::new();
        let slots = resolve(
            day(),
            &service(30),
            &[rid],
            &[window(rid, "08:00", "10:00")],
            &[booking(rid, "09:00", "09:30", AppointmentStatus::Confirmed)],
            &ScheduleConfig::default(),
        )
        .unwrap();
        assert_eq!(starts(&slots), vec!["08:00", "08:30", "09:30"]);
    }

    #[test]
    fn cancelled_booking_does_not_exclude() {
        let rid = Ulid::new();
        let slots = resolve(
            day(),
            &service(30),
            &[rid],
            &[window(rid, "08:00", "10:00")],
            &[booking(rid, "09:00", "09:30", AppointmentStatus::Cancelled)],
            &ScheduleConfig::default(),
        )
        .unwrap();
        assert_eq!(starts(&slots), vec!["08:00", "08:30", "09:00", "09:30"]);
    }

    #[test]
    fn completed_and_pending_still_block() {
        let rid = Ulid::new();
        let slots = resolve(
            day(),
            &service(30),
            &[rid],
            &[window(rid, "08:00", "10:00")],
            &[
                booking(rid, "08:00", "08:30", AppointmentStatus::Completed),
                booking(rid, "09:30", "10:00", AppointmentStatus::Pending),
            ],
            &ScheduleConfig::default(),
        )
        .unwrap();
        assert_eq!(starts(&slots), vec!["08:30", "09:00"]);
    }

    #[test]
    fn long_service_blocked_by_partial_overlap() {
        let rid = Ulid::new();
        let slots = resolve(
            day(),
            &service(45),
            &[rid],
            &[window(rid, "08:00", "11:00")],
            &[booking(rid, "09:15", "09:45", AppointmentStatus::Confirmed)],
            &ScheduleConfig::default(),
        )
        .unwrap();
        // 08:30 would run to 09:15 (touching), 09:00 overlaps, 09:30 overlaps.
        assert_eq!(starts(&slots), vec!["08:00", "08:30", "10:00"]);
    }

    #[test]
    fn service_must_end_inside_window() {
        let rid = Ulid::new();
        let slots = resolve(
            day(),
            &service(45),
            &[rid],
            &[window(rid, "08:00", "09:30")],
            &[],
            &ScheduleConfig::default(),
        )
        .unwrap();
        assert_eq!(starts(&slots), vec!["08:00", "08:30"]);
        assert!(slots.iter().all(|s| s.end <= t("09:30")));
    }

    #[test]
    fn service_longer_than_window_yields_nothing() {
        let rid = Ulid::new();
        let slots = resolve(
            day(),
            &service(120),
            &[rid],
            &[window(rid, "08:00", "09:00")],
            &[],
            &ScheduleConfig::default(),
        )
        .unwrap();
        assert!(slots.is_empty());
    }

    #[test]
    fn late_window_never_wraps_past_midnight() {
        let rid = Ulid::new();
        let slots = resolve(
            day(),
            &service(60),
            &[rid],
            &[window(rid, "22:00", "23:59")],
            &[],
            &ScheduleConfig::default(),
        )
        .unwrap();
        assert_eq!(starts(&slots), vec!["22:00", "22:30"]);
    }

    #[test]
    fn resource_without_window_is_skipped() {
        let with = Ulid::new();
        let without = Ulid::new();
        let tomorrow = (weekday_of(day()) + 1) % 7;
        let other_day = WorkingWindow::new(without, tomorrow, t("08:00"), t("18:00")).unwrap();
        let slots = resolve(
            day(),
            &service(30),
            &[with, without],
            &[window(with, "08:00", "09:00"), other_day],
            &[],
            &ScheduleConfig::default(),
        )
        .unwrap();
        assert_eq!(slots.len(), 2);
        assert!(slots.iter().all(|s| s.resource_id == with));
    }

    #[test]
    fn inactive_window_is_ignored() {
        let rid = Ulid::new();
        let mut w = window(rid, "08:00", "10:00");
        w.active = false;
        let config = ScheduleConfig::default();
        let slots = resolve(day(), &service(30), &[rid], &[w], &[], &config).unwrap();
        assert!(slots.is_empty());
    }

    #[test]
    fn no_candidates_is_empty_not_error() {
        let rid = Ulid::new();
        let slots = resolve(
            day(),
            &service(30),
            &[],
            &[window(rid, "08:00", "10:00")],
            &[],
            &ScheduleConfig::default(),
        )
        .unwrap();
        assert!(slots.is_empty());
    }

    #[test]
    fn bookings_of_other_resources_and_days_are_ignored() {
        let rid = Ulid::new();
        let other = Ulid::new();
        let mut next_day = booking(rid, "08:00", "08:30", AppointmentStatus::Confirmed);
        next_day.date = day().succ_opt().unwrap();
        let slots = resolve(
            day(),
            &service(30),
            &[rid],
            &[window(rid, "08:00", "09:00")],
            &[booking(other, "08:00", "08:30", AppointmentStatus::Confirmed), next_day],
            &ScheduleConfig::default(),
        )
        .unwrap();
        assert_eq!(starts(&slots), vec!["08:00", "08:30"]);
    }

    #[test]
    fn merged_output_sorted_by_time_then_resource() {
        let a = Ulid::from_parts(1, 1);
        let b = Ulid::from_parts(2, 2);
        // Pass candidates in reverse order; output must not depend on it.
        let slots = resolve(
            day(),
            &service(30),
            &[b, a],
            &[window(b, "08:00", "09:00"), window(a, "08:30", "09:30")],
            &[],
            &ScheduleConfig::default(),
        )
        .unwrap();
        let got: Vec<(String, Ulid)> = slots
            .iter()
            .map(|s| (s.start.to_string(), s.resource_id))
            .collect();
        assert_eq!(
            got,
            vec![
                ("08:00".to_string(), b),
                ("08:30".to_string(), a),
                ("08:30".to_string(), b),
                ("09:00".to_string(), a),
            ]
        );
    }

    #[test]
    fn duplicate_candidates_do_not_duplicate_slots() {
        let rid = Ulid::new();
        let slots = resolve(
            day(),
            &service(30),
            &[rid, rid],
            &[window(rid, "08:00", "09:00")],
            &[],
            &ScheduleConfig::default(),
        )
        .unwrap();
        assert_eq!(slots.len(), 2);
    }

    #[test]
    fn custom_step() {
        let rid = Ulid::new();
        let config = ScheduleConfig {
            slot_step_minutes: 15,
            ..ScheduleConfig::default()
        };
        let windows = [window(rid, "08:00", "09:00")];
        let slots = resolve(day(), &service(30), &[rid], &windows, &[], &config).unwrap();
        assert_eq!(starts(&slots), vec!["08:00", "08:15", "08:30"]);
    }

    #[test]
    fn invalid_step_rejected() {
        let rid = Ulid::new();
        let config = ScheduleConfig {
            slot_step_minutes: 0,
            ..ScheduleConfig::default()
        };
        let windows = [window(rid, "08:00", "09:00")];
        let result = resolve(day(), &service(30), &[rid], &windows, &[], &config);
        assert_eq!(result, Err(EngineError::InvalidStep(0)));
    }

    #[test]
    fn repeated_queries_are_identical() {
        let a = Ulid::new();
        let b = Ulid::new();
        let windows = [window(a, "08:00", "12:00"), window(b, "09:00", "13:00")];
        let booked = [
            booking(a, "10:00", "10:45", AppointmentStatus::Confirmed),
            booking(b, "09:00", "09:30", AppointmentStatus::Pending),
        ];
        let config = ScheduleConfig::default();
        let first = resolve(day(), &service(30), &[a, b], &windows, &booked, &config).unwrap();
        let second = resolve(day(), &service(30), &[a, b], &windows, &booked, &config).unwrap();
        assert_eq!(first, second);
    }
}
