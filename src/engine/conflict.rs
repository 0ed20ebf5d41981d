use chrono::{NaiveDate, NaiveDateTime};
use tracing::debug;
use ulid::Ulid;

use crate::clock::ClockTime;
use crate::config::ScheduleConfig;
use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::EngineError;
use super::store::BookingStore;

/// Fail with `Conflict` if `proposed` overlaps any non-cancelled interval of
/// the same resource and date in `existing`.
pub fn check_no_conflict(
    existing: &[BookedInterval],
    proposed: &BookedInterval,
) -> Result<(), EngineError> {
    let hit = existing.iter().find(|b| {
        b.id != proposed.id
            && b.resource_id == proposed.resource_id
            && b.date == proposed.date
            && b.status.occupies_slot()
            && b.range().overlaps(&proposed.range())
    });
    match hit {
        Some(b) => Err(EngineError::Conflict(b.id)),
        None => Ok(()),
    }
}

/// `Pending -> Confirmed -> Completed`, and `Pending | Confirmed -> Cancelled`.
pub fn validate_transition(
    from: AppointmentStatus,
    to: AppointmentStatus,
) -> Result<(), EngineError> {
    use AppointmentStatus::*;
    match (from, to) {
        (Pending, Confirmed) | (Confirmed, Completed) | (Pending | Confirmed, Cancelled) => Ok(()),
        _ => Err(EngineError::InvalidTransition { from, to }),
    }
}

/// What a client asks for. There is deliberately no end time: it is always
/// derived from the service duration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationRequest {
    pub id: Ulid,
    pub client_id: Ulid,
    pub resource_id: Ulid,
    pub service_id: Ulid,
    pub date: NaiveDate,
    pub start: ClockTime,
    pub notes: Option<String>,
}

/// Validate a reservation against current bookings and write it.
///
/// A `Conflict` from the store's own constraint check is returned exactly
/// like one found by the pre-check here.
pub async fn check_and_reserve<S: BookingStore + ?Sized>(
    store: &S,
    request: ReservationRequest,
    config: &ScheduleConfig,
    now: NaiveDateTime,
) -> Result<Appointment, EngineError> {
    if let Some(ref n) = request.notes
        && n.len() > MAX_NOTES_LEN
    {
        return Err(EngineError::LimitExceeded("notes too long"));
    }

    let service = store.service(request.service_id).await?;
    if !service.active {
        return Err(EngineError::NotFound(service.id));
    }
    let end = request
        .start
        .checked_add_minutes(service.duration_minutes)
        .ok_or(EngineError::LimitExceeded("appointment runs past midnight"))?;
    let range = TimeRange::new(request.start, end)?;

    if config.enforce_working_hours {
        let windows = store
            .working_windows(request.resource_id, weekday_of(request.date))
            .await?;
        if !windows.iter().any(|w| w.active && w.range().contains_range(&range)) {
            record_outcome("outside_hours");
            return Err(EngineError::OutsideWorkingHours);
        }
    }

    let proposed = BookedInterval {
        id: request.id,
        resource_id: request.resource_id,
        date: request.date,
        start: range.start,
        end: range.end,
        status: AppointmentStatus::Pending,
    };

    let existing = store
        .booked_intervals(request.resource_id, request.date)
        .await?;
    if let Err(e) = check_no_conflict(&existing, &proposed) {
        debug!("reservation {} rejected by pre-check: {e}", request.id);
        record_outcome("conflict");
        return Err(e);
    }

    let appointment = Appointment {
        interval: proposed,
        client_id: request.client_id,
        service_id: service.id,
        notes: request.notes,
        price_cents: service.price_cents,
        booked_at: now,
    };

    match store.insert_appointment(appointment.clone()).await {
        Ok(()) => {
            record_outcome("reserved");
            Ok(appointment)
        }
        Err(e) => {
            if e.is_conflict() {
                debug!("reservation {} rejected by store: {e}", appointment.id());
                record_outcome("conflict");
            }
            Err(e)
        }
    }
}

/// Reserve with the first candidate that can take the request, trying them
/// in ascending id order. `request.resource_id` is replaced by each candidate.
///
/// When nobody can take it, the first conflict seen is returned; if there
/// was none, `OutsideWorkingHours`.
pub async fn reserve_first_available<S: BookingStore + ?Sized>(
    store: &S,
    candidates: &[Ulid],
    request: ReservationRequest,
    config: &ScheduleConfig,
    now: NaiveDateTime,
) -> Result<Appointment, EngineError> {
    let mut ordered = candidates.to_vec();
    ordered.sort();
    ordered.dedup();

    let mut first_conflict = None;
    for resource_id in ordered {
        let attempt = ReservationRequest {
            resource_id,
            ..request.clone()
        };
        match check_and_reserve(store, attempt, config, now).await {
            Ok(appointment) => return Ok(appointment),
            Err(e @ EngineError::Conflict(_)) => {
                first_conflict.get_or_insert(e);
            }
            Err(EngineError::OutsideWorkingHours) => {}
            Err(e) => return Err(e),
        }
    }
    Err(first_conflict.unwrap_or(EngineError::OutsideWorkingHours))
}

fn record_outcome(outcome: &'static str) {
    metrics::counter!(observability::RESERVATIONS_TOTAL, "outcome" => outcome).increment(1);
}
