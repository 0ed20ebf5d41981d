use std::time::Instant;

use chrono::NaiveDate;
use futures::future::{try_join, try_join_all};
use ulid::Ulid;

use crate::config::ScheduleConfig;
use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::availability::resolve;
use super::store::ScheduleLookup;
use super::{Engine, EngineError};

/// Gather snapshots through `lookup` and resolve the open slots.
///
/// `barber: None` means every active resource. An explicitly named barber
/// that doesn't exist is `NotFound`; one that is inactive simply has no slots.
pub async fn resolve_availability<L: ScheduleLookup + ?Sized>(
    lookup: &L,
    date: NaiveDate,
    service_id: Ulid,
    barber: Option<Ulid>,
    config: &ScheduleConfig,
) -> Result<Vec<Slot>, EngineError> {
    let started = Instant::now();

    let service = lookup.service(service_id).await?;
    if !service.active {
        return Err(EngineError::NotFound(service_id));
    }
    let candidates = match barber {
        Some(id) => vec![id],
        None => lookup.active_resources().await?,
    };
    if candidates.len() > MAX_CANDIDATES {
        return Err(EngineError::LimitExceeded("too many candidate resources"));
    }

    let weekday = weekday_of(date);
    let (windows, booked) = try_join(
        try_join_all(candidates.iter().map(|&id| lookup.working_windows(id, weekday))),
        try_join_all(candidates.iter().map(|&id| lookup.booked_intervals(id, date))),
    )
    .await?;
    let windows: Vec<WorkingWindow> = windows.into_iter().flatten().collect();
    let booked: Vec<BookedInterval> = booked.into_iter().flatten().collect();

    let slots = resolve(date, &service, &candidates, &windows, &booked, config)?;

    metrics::histogram!(observability::AVAILABILITY_QUERY_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    metrics::histogram!(observability::SLOTS_RETURNED).record(slots.len() as f64);
    Ok(slots)
}

/// Every field is optional; unset fields match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppointmentFilter {
    pub resource_id: Option<Ulid>,
    pub client_id: Option<Ulid>,
    pub date: Option<NaiveDate>,
    pub status: Option<AppointmentStatus>,
}

impl AppointmentFilter {
    pub fn matches(&self, appointment: &Appointment) -> bool {
        self.resource_id.is_none_or(|id| id == appointment.resource_id())
            && self.client_id.is_none_or(|id| id == appointment.client_id)
            && self.date.is_none_or(|d| d == appointment.interval.date)
            && self.status.is_none_or(|s| s == appointment.status())
    }
}

impl Engine {
    pub async fn availability(
        &self,
        date: NaiveDate,
        service_id: Ulid,
        barber: Option<Ulid>,
        config: &ScheduleConfig,
    ) -> Result<Vec<Slot>, EngineError> {
        resolve_availability(self, date, service_id, barber, config).await
    }

    /// All resources, inactive ones included, ordered by id.
    pub async fn list_resources(&self) -> Vec<ResourceInfo> {
        let mut out = Vec::new();
        for rs in self.resource_handles() {
            out.push(rs.read().await.info());
        }
        out.sort_by_key(|r| r.id);
        out
    }

    pub async fn list_windows(&self, resource_id: Ulid) -> Result<Vec<WorkingWindow>, EngineError> {
        let rs = self
            .get_resource(&resource_id)
            .ok_or(EngineError::NotFound(resource_id))?;
        let guard = rs.read().await;
        Ok(guard.windows.iter().flatten().copied().collect())
    }

    /// All services, retired ones included, ordered by name.
    pub fn list_services(&self) -> Vec<ServiceSpec> {
        let mut out: Vec<ServiceSpec> = self.services.iter().map(|e| e.value().clone()).collect();
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        out
    }

    async fn with_record<T>(
        &self,
        id: Ulid,
        f: impl FnOnce(&AppointmentRecord) -> T,
    ) -> Result<T, EngineError> {
        loop {
            let (resource_id, date) = self.locate(&id)?;
            let rs = self
                .get_resource(&resource_id)
                .ok_or(EngineError::NotFound(resource_id))?;
            let guard = rs.read().await;
            // Moved to another barber while we waited for the lock.
            if self.locate(&id)?.0 != resource_id {
                continue;
            }
            return guard
                .day(date)
                .iter()
                .find(|r| r.appointment.id() == id)
                .map(f)
                .ok_or(EngineError::NotFound(id));
        }
    }

    pub async fn get_appointment(&self, id: Ulid) -> Result<Appointment, EngineError> {
        self.with_record(id, |r| r.appointment.clone()).await
    }

    /// Oldest entry first.
    pub async fn audit_trail(&self, id: Ulid) -> Result<Vec<AuditEntry>, EngineError> {
        self.with_record(id, |r| r.history.clone()).await
    }

    /// Matching appointments ordered by date, start, then resource.
    pub async fn list_appointments(&self, filter: &AppointmentFilter) -> Vec<Appointment> {
        let handles = match filter.resource_id {
            Some(id) => self.get_resource(&id).into_iter().collect(),
            None => self.resource_handles(),
        };

        let mut out = Vec::new();
        for rs in handles {
            let guard = rs.read().await;
            let days: Box<dyn Iterator<Item = &Vec<AppointmentRecord>> + '_> = match filter.date {
                Some(date) => Box::new(guard.appointments.get(&date).into_iter()),
                None => Box::new(guard.appointments.values()),
            };
            out.extend(
                days.flatten()
                    .map(|r| &r.appointment)
                    .filter(|a| filter.matches(a))
                    .cloned(),
            );
        }
        out.sort_by(|a, b| {
            (a.interval.date, a.interval.start, a.resource_id())
                .cmp(&(b.interval.date, b.interval.start, b.resource_id()))
        });
        out
    }

    /// Confirmed appointments on `date` still waiting for their reminder.
    pub async fn due_reminders(&self, date: NaiveDate) -> Vec<Appointment> {
        let mut out = Vec::new();
        for rs in self.resource_handles() {
            let guard = rs.read().await;
            out.extend(
                guard
                    .day(date)
                    .iter()
                    .filter(|r| {
                        !r.reminder_sent && r.appointment.status() == AppointmentStatus::Confirmed
                    })
                    .map(|r| r.appointment.clone()),
            );
        }
        out.sort_by(|a, b| {
            (a.interval.start, a.resource_id()).cmp(&(b.interval.start, b.resource_id()))
        });
        out
    }
}
