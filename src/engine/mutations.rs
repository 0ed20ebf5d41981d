use std::sync::Arc;

use chrono::{Duration, NaiveDateTime};
use tokio::sync::{RwLock, oneshot};
use tracing::{debug, info};
use ulid::Ulid;

use crate::config::ScheduleConfig;
use crate::limits::*;
use crate::model::*;

use super::conflict::{
    check_and_reserve, check_no_conflict, reserve_first_available, validate_transition,
};
use super::store::ScheduleLookup;
use super::{Engine, EngineError, ReservationRequest, WalCommand, apply_appointment_update};

fn check_name(name: &str, what: &'static str) -> Result<(), EngineError> {
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded(what));
    }
    Ok(())
}

fn check_note(note: Option<&str>) -> Result<(), EngineError> {
    if note.is_some_and(|n| n.len() > MAX_NOTES_LEN) {
        return Err(EngineError::LimitExceeded("notes too long"));
    }
    Ok(())
}

/// What `create_resource` checks before touching the store.
pub fn validate_resource_name(name: &str) -> Result<(), EngineError> {
    check_name(name, "resource name too long")
}

/// What `upsert_service` checks before touching the store.
pub fn validate_service(service: &ServiceSpec) -> Result<(), EngineError> {
    check_name(&service.name, "service name too long")?;
    if service.duration_minutes == 0 || service.duration_minutes > MAX_SERVICE_DURATION_MIN {
        return Err(EngineError::InvalidDuration(service.duration_minutes));
    }
    Ok(())
}

/// Changes for `Engine::update_appointment`. `None` leaves a field as it is.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppointmentUpdate {
    /// `Some(None)` clears the notes.
    pub notes: Option<Option<String>>,
    /// Hand the appointment to this barber, same date and time.
    pub resource_id: Option<Ulid>,
}

impl Engine {
    // ── Resources ────────────────────────────────────────────

    pub async fn create_resource(&self, id: Ulid, name: String) -> Result<(), EngineError> {
        validate_resource_name(&name)?;
        let _catalog = self.catalog_lock.lock().await;
        if self.resources.len() >= MAX_RESOURCES {
            return Err(EngineError::LimitExceeded("too many resources"));
        }
        if self.resources.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let event = Event::ResourceCreated {
            id,
            name: name.clone(),
        };
        self.wal_append(&event).await?;
        self.resources
            .insert(id, Arc::new(RwLock::new(ResourceState::new(id, name))));
        self.notify.send(&event);
        info!("resource {id} created");
        Ok(())
    }

    /// Rename and/or (de)activate. An inactive resource keeps its bookings
    /// but is offered no new slots.
    pub async fn update_resource(
        &self,
        id: Ulid,
        name: String,
        active: bool,
    ) -> Result<(), EngineError> {
        validate_resource_name(&name)?;
        let rs = self.get_resource(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = rs.write().await;
        let event = Event::ResourceUpdated { id, name, active };
        self.persist_and_apply(&mut guard, &event).await
    }

    /// Replace the resource's window for `window.weekday`.
    pub async fn set_working_window(&self, window: WorkingWindow) -> Result<(), EngineError> {
        if window.weekday > 6 {
            return Err(EngineError::InvalidWindow("weekday must be 0..=6"));
        }
        TimeRange::new(window.start, window.end)?;
        let rs = self
            .get_resource(&window.resource_id)
            .ok_or(EngineError::NotFound(window.resource_id))?;
        let mut guard = rs.write().await;
        let event = Event::WindowSet { window };
        self.persist_and_apply(&mut guard, &event).await
    }

    pub async fn remove_working_window(
        &self,
        resource_id: Ulid,
        weekday: Weekday,
    ) -> Result<(), EngineError> {
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let mut guard = rs.write().await;
        if guard.windows.get(weekday as usize).is_none_or(|w| w.is_none()) {
            return Err(EngineError::InvalidWindow("no window on that weekday"));
        }
        let event = Event::WindowRemoved {
            resource_id,
            weekday,
        };
        self.persist_and_apply(&mut guard, &event).await
    }

    // ── Services ─────────────────────────────────────────────

    /// Create or replace a service. Existing appointments keep the duration
    /// and price they were booked with.
    pub async fn upsert_service(&self, service: ServiceSpec) -> Result<(), EngineError> {
        validate_service(&service)?;
        let _catalog = self.catalog_lock.lock().await;
        if !self.services.contains_key(&service.id) && self.services.len() >= MAX_SERVICES {
            return Err(EngineError::LimitExceeded("too many services"));
        }

        let event = Event::ServiceUpserted {
            service: service.clone(),
        };
        self.wal_append(&event).await?;
        self.services.insert(service.id, service);
        self.notify.send(&event);
        Ok(())
    }

    // ── Appointments ─────────────────────────────────────────

    /// Reserve with the barber named in the request.
    pub async fn book(
        &self,
        request: ReservationRequest,
        config: &ScheduleConfig,
        now: NaiveDateTime,
    ) -> Result<Appointment, EngineError> {
        let appointment = check_and_reserve(self, request, config, now).await?;
        info!(
            "appointment {} booked with {} on {} at {}",
            appointment.id(),
            appointment.resource_id(),
            appointment.interval.date,
            appointment.interval.start
        );
        Ok(appointment)
    }

    /// Reserve with whichever active barber can take the request first.
    pub async fn book_any(
        &self,
        request: ReservationRequest,
        config: &ScheduleConfig,
        now: NaiveDateTime,
    ) -> Result<Appointment, EngineError> {
        let candidates = self.active_resources().await?;
        let appointment = reserve_first_available(self, &candidates, request, config, now).await?;
        info!(
            "appointment {} booked with first free barber {}",
            appointment.id(),
            appointment.resource_id()
        );
        Ok(appointment)
    }

    /// Move an appointment along the status graph. Returns the updated
    /// appointment.
    pub async fn transition_status(
        &self,
        id: Ulid,
        to: AppointmentStatus,
        now: NaiveDateTime,
        note: Option<String>,
    ) -> Result<Appointment, EngineError> {
        check_note(note.as_deref())?;
        let (date, mut guard) = self.resolve_appointment_write(&id).await?;
        let from = guard
            .day(date)
            .iter()
            .find(|r| r.appointment.id() == id)
            .map(|r| r.appointment.status())
            .ok_or(EngineError::NotFound(id))?;
        validate_transition(from, to)?;

        let event = Event::StatusChanged {
            id,
            resource_id: guard.id,
            date,
            from,
            to,
            at: now,
            note,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        debug!("appointment {id}: {from} -> {to}");
        guard
            .find_mut(date, id)
            .map(|r| r.appointment.clone())
            .ok_or(EngineError::NotFound(id))
    }

    /// Cancel, holding clients to the cancellation cutoff. Staff can cancel
    /// at any time.
    pub async fn cancel_appointment(
        &self,
        id: Ulid,
        by: CancelledBy,
        now: NaiveDateTime,
        config: &ScheduleConfig,
    ) -> Result<Appointment, EngineError> {
        let (date, mut guard) = self.resolve_appointment_write(&id).await?;
        let (from, starts_at) = guard
            .day(date)
            .iter()
            .find(|r| r.appointment.id() == id)
            .map(|r| (r.appointment.status(), r.appointment.starts_at()))
            .ok_or(EngineError::NotFound(id))?;
        validate_transition(from, AppointmentStatus::Cancelled)?;

        if by == CancelledBy::Client {
            let cutoff = Duration::try_minutes(config.cancellation_cutoff_minutes)
                .ok_or(EngineError::LimitExceeded("cancellation cutoff out of range"))?;
            if starts_at - now < cutoff {
                return Err(EngineError::CancellationWindowClosed);
            }
        }

        let note = match by {
            CancelledBy::Client => "cancelled by client",
            CancelledBy::Staff => "cancelled by staff",
        };
        let event = Event::StatusChanged {
            id,
            resource_id: guard.id,
            date,
            from,
            to: AppointmentStatus::Cancelled,
            at: now,
            note: Some(note.into()),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!("appointment {id} {note}");
        guard
            .find_mut(date, id)
            .map(|r| r.appointment.clone())
            .ok_or(EngineError::NotFound(id))
    }

    /// Edit notes and/or reassign to another barber.
    ///
    /// Notes can be edited on any appointment. Reassignment needs a pending
    /// or confirmed appointment and an active target whose calendar is free
    /// for the same interval; the target is checked under its write lock.
    pub async fn update_appointment(
        &self,
        id: Ulid,
        update: AppointmentUpdate,
        config: &ScheduleConfig,
        now: NaiveDateTime,
    ) -> Result<Appointment, EngineError> {
        if let Some(notes) = &update.notes {
            check_note(notes.as_deref())?;
        }

        loop {
            let (from_id, date) = self.locate(&id)?;
            let to_id = update.resource_id.unwrap_or(from_id);
            let from_rs = self
                .get_resource(&from_id)
                .ok_or(EngineError::NotFound(from_id))?;

            if to_id == from_id {
                let mut guard = from_rs.write_owned().await;
                if self.locate(&id)?.0 != from_id {
                    continue;
                }
                let current = guard
                    .day(date)
                    .iter()
                    .find(|r| r.appointment.id() == id)
                    .map(|r| r.appointment.notes.clone())
                    .ok_or(EngineError::NotFound(id))?;
                let event = Event::AppointmentUpdated {
                    id,
                    from_resource: from_id,
                    to_resource: from_id,
                    date,
                    notes: update.notes.clone().unwrap_or(current),
                    at: now,
                };
                self.persist_and_apply(&mut guard, &event).await?;
                debug!("appointment {id} updated");
                return guard
                    .find_mut(date, id)
                    .map(|r| r.appointment.clone())
                    .ok_or(EngineError::NotFound(id));
            }

            let to_rs = self
                .get_resource(&to_id)
                .ok_or(EngineError::NotFound(to_id))?;
            let (mut from, mut to) = if from_id < to_id {
                let from = from_rs.write_owned().await;
                (from, to_rs.write_owned().await)
            } else {
                let to = to_rs.write_owned().await;
                (from_rs.write_owned().await, to)
            };
            if self.locate(&id)?.0 != from_id {
                continue;
            }

            let record = from
                .day(date)
                .iter()
                .find(|r| r.appointment.id() == id)
                .ok_or(EngineError::NotFound(id))?;
            let status = record.appointment.status();
            if status.is_terminal() {
                return Err(EngineError::AppointmentClosed(status));
            }
            if !to.active {
                return Err(EngineError::NotFound(to_id));
            }
            let mut moved = record.appointment.interval.clone();
            moved.resource_id = to_id;
            let notes = update
                .notes
                .clone()
                .unwrap_or_else(|| record.appointment.notes.clone());

            if config.enforce_working_hours
                && !to
                    .window_for(weekday_of(date))
                    .is_some_and(|w| w.active && w.range().contains_range(&moved.range()))
            {
                return Err(EngineError::OutsideWorkingHours);
            }
            if to.day(date).len() >= MAX_APPOINTMENTS_PER_DAY {
                return Err(EngineError::LimitExceeded("too many appointments on this day"));
            }
            check_no_conflict(&to.booked_intervals(date), &moved)?;

            let event = Event::AppointmentUpdated {
                id,
                from_resource: from_id,
                to_resource: to_id,
                date,
                notes,
                at: now,
            };
            self.wal_append(&event).await?;
            apply_appointment_update(&mut from, Some(&mut *to), &event, &self.appointment_index);
            self.notify.send(&event);
            info!("appointment {id} reassigned from {from_id} to {to_id}");
            return to
                .find_mut(date, id)
                .map(|r| r.appointment.clone())
                .ok_or(EngineError::NotFound(id));
        }
    }

    /// Record that the reminder went out. `Ok(false)` if one was already
    /// sent or the appointment is no longer confirmed.
    pub async fn mark_reminded(&self, id: Ulid, now: NaiveDateTime) -> Result<bool, EngineError> {
        let (date, mut guard) = self.resolve_appointment_write(&id).await?;
        let record = guard
            .day(date)
            .iter()
            .find(|r| r.appointment.id() == id)
            .ok_or(EngineError::NotFound(id))?;
        if record.reminder_sent || record.appointment.status() != AppointmentStatus::Confirmed {
            return Ok(false);
        }

        let event = Event::ReminderSent {
            id,
            resource_id: guard.id,
            date,
            at: now,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(true)
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL as the minimal event list that rebuilds current state.
    ///
    /// Every resource is read-locked and catalog changes are blocked until
    /// the new file is in place, so nothing committed meanwhile is lost.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _catalog = self.catalog_lock.lock().await;

        let mut events = Vec::new();
        let mut services: Vec<ServiceSpec> =
            self.services.iter().map(|e| e.value().clone()).collect();
        services.sort_by_key(|s| s.id);
        events.extend(
            services
                .into_iter()
                .map(|service| Event::ServiceUpserted { service }),
        );

        // Ascending id order, like every other multi-resource lock.
        let mut handles: Vec<_> = self
            .resources
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        handles.sort_by_key(|(id, _)| *id);
        let mut guards = Vec::with_capacity(handles.len());
        for (_, rs) in handles {
            guards.push(rs.read_owned().await);
        }

        for rs in &guards {
            events.push(Event::ResourceCreated {
                id: rs.id,
                name: rs.name.clone(),
            });
            if !rs.active {
                events.push(Event::ResourceUpdated {
                    id: rs.id,
                    name: rs.name.clone(),
                    active: false,
                });
            }
            events.extend(
                rs.windows
                    .iter()
                    .flatten()
                    .map(|window| Event::WindowSet { window: *window }),
            );
            for record in rs.appointments.values().flatten() {
                events.push(Event::AppointmentRestored {
                    appointment: record.appointment.clone(),
                    history: record.history.clone(),
                    reminder_sent: record.reminder_sent,
                });
            }
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        drop(guards);

        info!("WAL compacted to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
