use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::clock::ClockTime;
use crate::engine::{EngineError, overlaps};

/// Day of week, `0 = Sunday` through `6 = Saturday`.
pub type Weekday = u8;

pub fn weekday_of(date: NaiveDate) -> Weekday {
    date.weekday().num_days_from_sunday() as Weekday
}

/// Half-open time-of-day range `[start, end)` inside a single day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: ClockTime,
    pub end: ClockTime,
}

impl TimeRange {
    pub fn new(start: ClockTime, end: ClockTime) -> Result<Self, EngineError> {
        if start >= end {
            return Err(EngineError::InvalidWindow("start must be before end"));
        }
        Ok(Self { start, end })
    }

    pub fn overlaps(&self, other: &TimeRange) -> bool {
        overlaps(self.start, self.end, other.start, other.end)
    }

    /// True if `other` lies entirely inside `self`.
    pub fn contains_range(&self, other: &TimeRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Recurring daily hours during which a resource takes bookings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingWindow {
    pub resource_id: Ulid,
    pub weekday: Weekday,
    pub start: ClockTime,
    pub end: ClockTime,
    pub active: bool,
}

impl WorkingWindow {
    pub fn new(
        resource_id: Ulid,
        weekday: Weekday,
        start: ClockTime,
        end: ClockTime,
    ) -> Result<Self, EngineError> {
        if weekday > 6 {
            return Err(EngineError::InvalidWindow("weekday must be 0..=6"));
        }
        TimeRange::new(start, end)?;
        Ok(Self {
            resource_id,
            weekday,
            start,
            end,
            active: true,
        })
    }

    pub fn range(&self) -> TimeRange {
        TimeRange {
            start: self.start,
            end: self.end,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AppointmentStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl AppointmentStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::Completed)
    }

    /// Everything except a cancellation keeps its time slot occupied.
    pub fn occupies_slot(self) -> bool {
        self != Self::Cancelled
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        }
    }
}

impl std::fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An occupied (or formerly occupied) interval on a resource's calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookedInterval {
    pub id: Ulid,
    pub resource_id: Ulid,
    pub date: NaiveDate,
    pub start: ClockTime,
    pub end: ClockTime,
    pub status: AppointmentStatus,
}

impl BookedInterval {
    pub fn range(&self) -> TimeRange {
        TimeRange {
            start: self.start,
            end: self.end,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub id: Ulid,
    pub name: String,
    pub duration_minutes: u32,
    pub price_cents: u64,
    pub active: bool,
}

/// A bookable start time. Computed per query, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Slot {
    pub start: ClockTime,
    pub end: ClockTime,
    pub resource_id: Ulid,
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Appointment {
    pub interval: BookedInterval,
    pub client_id: Ulid,
    pub service_id: Ulid,
    pub notes: Option<String>,
    /// Copied from the service when booked; later price changes don't apply.
    pub price_cents: u64,
    pub booked_at: NaiveDateTime,
}

impl Appointment {
    pub fn id(&self) -> Ulid {
        self.interval.id
    }

    pub fn resource_id(&self) -> Ulid {
        self.interval.resource_id
    }

    pub fn status(&self) -> AppointmentStatus {
        self.interval.status
    }

    pub fn starts_at(&self) -> NaiveDateTime {
        self.interval.date.and_time(self.interval.start.to_naive_time())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditAction {
    Created,
    StatusChanged,
    Cancelled,
    ReminderSent,
    Updated,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub at: NaiveDateTime,
    pub action: AuditAction,
    pub old_status: Option<AppointmentStatus>,
    pub new_status: Option<AppointmentStatus>,
    pub note: Option<String>,
}

/// Who asked for a cancellation. Only clients are held to the cutoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelledBy {
    Client,
    Staff,
}

#[derive(Debug, Clone)]
pub struct AppointmentRecord {
    pub appointment: Appointment,
    pub history: Vec<AuditEntry>,
    pub reminder_sent: bool,
}

#[derive(Debug, Clone)]
pub struct ResourceState {
    pub id: Ulid,
    pub name: String,
    pub active: bool,
    /// Indexed by weekday; at most one window per day.
    pub windows: [Option<WorkingWindow>; 7],
    /// Per date, sorted by start time.
    pub appointments: BTreeMap<NaiveDate, Vec<AppointmentRecord>>,
}

impl ResourceState {
    pub fn new(id: Ulid, name: String) -> Self {
        Self {
            id,
            name,
            active: true,
            windows: [None; 7],
            appointments: BTreeMap::new(),
        }
    }

    pub fn window_for(&self, weekday: Weekday) -> Option<&WorkingWindow> {
        self.windows
            .get(weekday as usize)
            .and_then(|w| w.as_ref())
            .filter(|w| w.active)
    }

    /// Insert keeping the day's list sorted by start.
    pub fn insert_appointment(&mut self, record: AppointmentRecord) {
        let day = self
            .appointments
            .entry(record.appointment.interval.date)
            .or_default();
        let start = record.appointment.interval.start;
        let pos = day.partition_point(|r| r.appointment.interval.start <= start);
        day.insert(pos, record);
    }

    /// Remove an appointment from this calendar, e.g. to hand it to another
    /// resource.
    pub fn take_appointment(&mut self, date: NaiveDate, id: Ulid) -> Option<AppointmentRecord> {
        let day = self.appointments.get_mut(&date)?;
        let pos = day.iter().position(|r| r.appointment.id() == id)?;
        let record = day.remove(pos);
        if day.is_empty() {
            self.appointments.remove(&date);
        }
        Some(record)
    }

    pub fn find_mut(&mut self, date: NaiveDate, id: Ulid) -> Option<&mut AppointmentRecord> {
        self.appointments
            .get_mut(&date)?
            .iter_mut()
            .find(|r| r.appointment.id() == id)
    }

    pub fn day(&self, date: NaiveDate) -> &[AppointmentRecord] {
        self.appointments.get(&date).map_or(&[], |d| d.as_slice())
    }

    pub fn booked_intervals(&self, date: NaiveDate) -> Vec<BookedInterval> {
        self.day(date)
            .iter()
            .map(|r| r.appointment.interval.clone())
            .collect()
    }

    pub fn info(&self) -> ResourceInfo {
        ResourceInfo {
            id: self.id,
            name: self.name.clone(),
            active: self.active,
        }
    }
}

/// WAL record format, also what subscribers receive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ResourceCreated {
        id: Ulid,
        name: String,
    },
    ResourceUpdated {
        id: Ulid,
        name: String,
        active: bool,
    },
    WindowSet {
        window: WorkingWindow,
    },
    WindowRemoved {
        resource_id: Ulid,
        weekday: Weekday,
    },
    ServiceUpserted {
        service: ServiceSpec,
    },
    AppointmentBooked {
        appointment: Appointment,
    },
    StatusChanged {
        id: Ulid,
        resource_id: Ulid,
        date: NaiveDate,
        from: AppointmentStatus,
        to: AppointmentStatus,
        at: NaiveDateTime,
        note: Option<String>,
    },
    ReminderSent {
        id: Ulid,
        resource_id: Ulid,
        date: NaiveDate,
        at: NaiveDateTime,
    },
    /// New notes and/or a different barber. `notes` is the full new value.
    AppointmentUpdated {
        id: Ulid,
        from_resource: Ulid,
        to_resource: Ulid,
        date: NaiveDate,
        notes: Option<String>,
        at: NaiveDateTime,
    },
    /// Written only by compaction: an appointment with its full audit trail.
    AppointmentRestored {
        appointment: Appointment,
        history: Vec<AuditEntry>,
        reminder_sent: bool,
    },
}

impl Event {
    /// Resource an event belongs to; services are shop-wide.
    pub fn resource_id(&self) -> Option<Ulid> {
        match self {
            Event::ResourceCreated { id, .. } | Event::ResourceUpdated { id, .. } => Some(*id),
            Event::WindowSet { window } => Some(window.resource_id),
            Event::WindowRemoved { resource_id, .. }
            | Event::StatusChanged { resource_id, .. }
            | Event::ReminderSent { resource_id, .. } => Some(*resource_id),
            Event::AppointmentUpdated { from_resource, .. } => Some(*from_resource),
            Event::AppointmentBooked { appointment }
            | Event::AppointmentRestored { appointment, .. } => Some(appointment.resource_id()),
            Event::ServiceUpserted { .. } => None,
        }
    }

    /// The second resource of a reassignment, if the event is one.
    pub fn moved_to(&self) -> Option<Ulid> {
        match self {
            Event::AppointmentUpdated {
                from_resource,
                to_resource,
                ..
            } if from_resource != to_resource => Some(*to_resource),
            _ => None,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceInfo {
    pub id: Ulid,
    pub name: String,
    pub active: bool,
}
