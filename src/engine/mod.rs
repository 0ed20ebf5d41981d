mod availability;
mod conflict;
mod error;
mod mutations;
mod overlap;
mod queries;
mod store;

pub use availability::resolve;
pub use conflict::{
    ReservationRequest, check_and_reserve, check_no_conflict, reserve_first_available,
    validate_transition,
};
pub use error::EngineError;
pub use mutations::{AppointmentUpdate, validate_resource_name, validate_service};
pub use overlap::overlaps;
pub use queries::{AppointmentFilter, resolve_availability};
pub use store::{BookingStore, ScheduleLookup};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};
use ulid::Ulid;

use crate::model::*;
use crate::notify::NotifyHub;
use crate::wal::Wal;

pub type SharedResourceState = Arc<RwLock<ResourceState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Appends that queue up while a flush is running are written
/// together and share one fsync; every sender in the batch gets that result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    let mut deferred: Option<WalCommand> = None;
    loop {
        let cmd = match deferred.take() {
            Some(cmd) => cmd,
            None => match rx.recv().await {
                Some(cmd) => cmd,
                None => break,
            },
        };

        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_control(&mut wal, other);
                continue;
            }
        };

        let mut batch: Vec<PendingAppend> = vec![(event, response)];
        while let Ok(next) = rx.try_recv() {
            match next {
                WalCommand::Append { event, response } => batch.push((event, response)),
                // Keep ordering: flush what we have, then run the control command.
                other => {
                    deferred = Some(other);
                    break;
                }
            }
        }
        commit_batch(&mut wal, batch);
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let mut result = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed append so half-written bytes can't bleed
    // into the next batch.
    let flushed = wal.flush_sync();
    if result.is_ok() {
        result = flushed;
    }

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());

    for (_, tx) in batch {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result =
                Wal::write_compact_file(wal.path(), &events).and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { response, .. } => {
            let _ = response.send(Err(io::Error::other("append routed to control path")));
        }
    }
}

pub struct Engine {
    pub(super) resources: DashMap<Ulid, SharedResourceState>,
    pub(super) services: DashMap<Ulid, ServiceSpec>,
    /// Reverse lookup: appointment id → (resource id, date).
    pub(super) appointment_index: DashMap<Ulid, (Ulid, NaiveDate)>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    /// Serializes resource/service creation against compaction snapshots.
    pub(super) catalog_lock: Mutex<()>,
    pub notify: Arc<NotifyHub>,
}

/// Apply a resource-scoped event (caller holds the write lock).
fn apply_to_resource(
    rs: &mut ResourceState,
    event: &Event,
    index: &DashMap<Ulid, (Ulid, NaiveDate)>,
) {
    match event {
        Event::ResourceUpdated { name, active, .. } => {
            rs.name = name.clone();
            rs.active = *active;
        }
        Event::WindowSet { window } => {
            if let Some(slot) = rs.windows.get_mut(window.weekday as usize) {
                *slot = Some(*window);
            }
        }
        Event::WindowRemoved { weekday, .. } => {
            if let Some(slot) = rs.windows.get_mut(*weekday as usize) {
                *slot = None;
            }
        }
        Event::AppointmentBooked { appointment } => {
            index.insert(appointment.id(), (rs.id, appointment.interval.date));
            rs.insert_appointment(AppointmentRecord {
                history: vec![AuditEntry {
                    at: appointment.booked_at,
                    action: AuditAction::Created,
                    old_status: None,
                    new_status: Some(appointment.status()),
                    note: appointment.notes.clone(),
                }],
                appointment: appointment.clone(),
                reminder_sent: false,
            });
        }
        Event::AppointmentRestored {
            appointment,
            history,
            reminder_sent,
        } => {
            index.insert(appointment.id(), (rs.id, appointment.interval.date));
            rs.insert_appointment(AppointmentRecord {
                appointment: appointment.clone(),
                history: history.clone(),
                reminder_sent: *reminder_sent,
            });
        }
        Event::StatusChanged {
            id,
            date,
            from,
            to,
            at,
            note,
            ..
        } => {
            if let Some(record) = rs.find_mut(*date, *id) {
                record.appointment.interval.status = *to;
                record.history.push(AuditEntry {
                    at: *at,
                    action: if *to == AppointmentStatus::Cancelled {
                        AuditAction::Cancelled
                    } else {
                        AuditAction::StatusChanged
                    },
                    old_status: Some(*from),
                    new_status: Some(*to),
                    note: note.clone(),
                });
            }
        }
        Event::ReminderSent { id, date, at, .. } => {
            if let Some(record) = rs.find_mut(*date, *id) {
                record.reminder_sent = true;
                record.history.push(AuditEntry {
                    at: *at,
                    action: AuditAction::ReminderSent,
                    old_status: None,
                    new_status: None,
                    note: None,
                });
            }
        }
        Event::AppointmentUpdated { .. } => {
            // Reassignments need both calendars; see apply_appointment_update.
            if event.moved_to().is_none() {
                apply_appointment_update(rs, None, event, index);
            }
        }
        // Created at the map level; services aren't resource-scoped.
        Event::ResourceCreated { .. } | Event::ServiceUpserted { .. } => {}
    }
}

/// Apply `AppointmentUpdated`. `to` is the target calendar when the
/// appointment changes barber; the caller holds both write locks.
fn apply_appointment_update(
    from: &mut ResourceState,
    to: Option<&mut ResourceState>,
    event: &Event,
    index: &DashMap<Ulid, (Ulid, NaiveDate)>,
) {
    let Event::AppointmentUpdated {
        id,
        from_resource,
        to_resource,
        date,
        notes,
        at,
    } = event
    else {
        return;
    };
    let Some(record) = from.find_mut(*date, *id) else {
        return;
    };
    let status = record.appointment.status();
    record.appointment.notes = notes.clone();
    record.history.push(AuditEntry {
        at: *at,
        action: AuditAction::Updated,
        old_status: Some(status),
        new_status: Some(status),
        note: Some(if from_resource == to_resource {
            "details updated".to_string()
        } else {
            format!("reassigned from {from_resource} to {to_resource}")
        }),
    });

    if let Some(to) = to
        && let Some(mut record) = from.take_appointment(*date, *id)
    {
        record.appointment.interval.resource_id = to.id;
        index.insert(*id, (to.id, *date));
        to.insert_appointment(record);
    }
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>) -> io::Result<Self> {
        let replay = Wal::replay(&wal_path)?;
        let events = replay.events;
        let mut wal = Wal::open(&wal_path)?;
        if replay.discarded_tail {
            // Rewrite without the damaged tail, or new appends would land
            // behind it and be unreachable on the next replay.
            tracing::warn!(
                "discarded damaged tail of {} after {} events",
                wal_path.display(),
                events.len()
            );
            Wal::write_compact_file(&wal_path, &events)?;
            wal.swap_compact_file()?;
        }
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            resources: DashMap::new(),
            services: DashMap::new(),
            appointment_index: DashMap::new(),
            wal_tx,
            catalog_lock: Mutex::new(()),
            notify,
        };

        // We're the only owner of every lock during replay, so try_write
        // never fails; blocking_write would panic inside a runtime.
        for event in &events {
            match event {
                Event::ResourceCreated { id, name } => {
                    let rs = ResourceState::new(*id, name.clone());
                    engine.resources.insert(*id, Arc::new(RwLock::new(rs)));
                }
                Event::ServiceUpserted { service } => {
                    engine.services.insert(service.id, service.clone());
                }
                other => {
                    let Some(resource_id) = other.resource_id() else {
                        continue;
                    };
                    let Some(rs) = engine.get_resource(&resource_id) else {
                        continue;
                    };
                    let Ok(mut guard) = rs.try_write() else {
                        continue;
                    };
                    match other.moved_to().and_then(|to| engine.get_resource(&to)) {
                        Some(target) => {
                            if let Ok(mut target) = target.try_write() {
                                apply_appointment_update(
                                    &mut guard,
                                    Some(&mut *target),
                                    other,
                                    &engine.appointment_index,
                                );
                            }
                        }
                        None => apply_to_resource(&mut guard, other, &engine.appointment_index),
                    }
                }
            }
        }

        tracing::info!(
            "engine ready: {} events replayed, {} resources, {} services",
            events.len(),
            engine.resources.len(),
            engine.services.len()
        );
        Ok(engine)
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// WAL-append, apply, notify.
    pub(super) async fn persist_and_apply(
        &self,
        rs: &mut ResourceState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_resource(rs, event, &self.appointment_index);
        self.notify.send(event);
        Ok(())
    }

    pub fn get_resource(&self, id: &Ulid) -> Option<SharedResourceState> {
        self.resources.get(id).map(|e| e.value().clone())
    }

    pub fn get_service(&self, id: &Ulid) -> Option<ServiceSpec> {
        self.services.get(id).map(|e| e.value().clone())
    }

    /// True when nothing has been created yet (fresh data directory).
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty() && self.services.is_empty()
    }

    /// Cloned handles, so no map shard is held across an await.
    pub(super) fn resource_handles(&self) -> Vec<SharedResourceState> {
        self.resources.iter().map(|e| e.value().clone()).collect()
    }

    /// Where an appointment lives: (resource id, date).
    pub(super) fn locate(&self, appointment_id: &Ulid) -> Result<(Ulid, NaiveDate), EngineError> {
        self.appointment_index
            .get(appointment_id)
            .map(|e| *e.value())
            .ok_or(EngineError::NotFound(*appointment_id))
    }

    /// Lookup appointment → resource, acquire its write lock.
    ///
    /// A reassignment can move the appointment between the lookup and the
    /// lock; the index only changes under the owning resource's write lock,
    /// so re-reading it once the lock is held settles where it lives.
    pub(super) async fn resolve_appointment_write(
        &self,
        appointment_id: &Ulid,
    ) -> Result<(NaiveDate, OwnedRwLockWriteGuard<ResourceState>), EngineError> {
        loop {
            let (resource_id, date) = self.locate(appointment_id)?;
            let rs = self
                .get_resource(&resource_id)
                .ok_or(EngineError::NotFound(resource_id))?;
            let guard = rs.write_owned().await;
            if self.locate(appointment_id)?.0 == resource_id {
                return Ok((date, guard));
            }
        }
    }
}
