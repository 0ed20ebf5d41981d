use async_trait::async_trait;
use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::check_no_conflict;
use super::{Engine, EngineError};

/// Read side of the storage collaborator: snapshots the resolver and the
/// guard work from.
#[async_trait]
pub trait ScheduleLookup: Send + Sync {
    /// `NotFound` if the service doesn't exist.
    async fn service(&self, id: Ulid) -> Result<ServiceSpec, EngineError>;

    /// Ids of resources currently taking bookings, ascending.
    async fn active_resources(&self) -> Result<Vec<Ulid>, EngineError>;

    /// Active windows of `resource_id` on `weekday`. `NotFound` for an
    /// unknown resource; empty for an inactive one.
    async fn working_windows(
        &self,
        resource_id: Ulid,
        weekday: Weekday,
    ) -> Result<Vec<WorkingWindow>, EngineError>;

    /// Every interval stored for `resource_id` on `date`, cancelled included.
    async fn booked_intervals(
        &self,
        resource_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<BookedInterval>, EngineError>;
}

/// Write side of the storage collaborator.
#[async_trait]
pub trait BookingStore: ScheduleLookup {
    /// Persist a new appointment. Must fail with `Conflict` when it would
    /// overlap a non-cancelled appointment already stored for the same
    /// resource and date, however recently that one was written.
    async fn insert_appointment(&self, appointment: Appointment) -> Result<(), EngineError>;
}

#[async_trait]
impl ScheduleLookup for Engine {
    async fn service(&self, id: Ulid) -> Result<ServiceSpec, EngineError> {
        self.get_service(&id).ok_or(EngineError::NotFound(id))
    }

    async fn active_resources(&self) -> Result<Vec<Ulid>, EngineError> {
        let mut ids = Vec::new();
        for rs in self.resource_handles() {
            let guard = rs.read().await;
            if guard.active {
                ids.push(guard.id);
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn working_windows(
        &self,
        resource_id: Ulid,
        weekday: Weekday,
    ) -> Result<Vec<WorkingWindow>, EngineError> {
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.read().await;
        if !guard.active {
            return Ok(Vec::new());
        }
        Ok(guard.window_for(weekday).copied().into_iter().collect())
    }

    async fn booked_intervals(
        &self,
        resource_id: Ulid,
        date: NaiveDate,
    ) -> Result<Vec<BookedInterval>, EngineError> {
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.read().await;
        Ok(guard.booked_intervals(date))
    }
}

#[async_trait]
impl BookingStore for Engine {
    async fn insert_appointment(&self, appointment: Appointment) -> Result<(), EngineError> {
        let resource_id = appointment.resource_id();
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let mut guard = rs.write().await;
        if !guard.active {
            return Err(EngineError::NotFound(resource_id));
        }
        if self.appointment_index.contains_key(&appointment.id()) {
            return Err(EngineError::AlreadyExists(appointment.id()));
        }
        let date = appointment.interval.date;
        if guard.day(date).len() >= MAX_APPOINTMENTS_PER_DAY {
            return Err(EngineError::LimitExceeded("too many appointments on this day"));
        }

        // Uniqueness constraint: re-checked under the write lock, so a
        // reservation that passed a stale pre-check still can't land.
        check_no_conflict(&guard.booked_intervals(date), &appointment.interval)?;

        let event = Event::AppointmentBooked { appointment };
        self.persist_and_apply(&mut guard, &event).await
    }
}
