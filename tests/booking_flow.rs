//! End-to-end booking flow through the public API: seed a shop, query slots,
//! book, cancel, remind, restart.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use tokio::sync::broadcast::error::TryRecvError;
use ulid::Ulid;

use chairbook::clock::{ClockTime, add_minutes, generate_slots};
use chairbook::config::{DaemonConfig, ScheduleConfig};
use chairbook::engine::{
    AppointmentFilter, Engine, EngineError, ReservationRequest, check_and_reserve, overlaps,
    resolve_availability,
};
use chairbook::model::{AppointmentStatus, CancelledBy, Event};
use chairbook::notify::NotifyHub;
use chairbook::seed::SeedFile;
use chairbook::sweeper::send_due_reminders;

fn test_data_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("chairbook_test_flow").join(name);
    let _ = std::fs::remove_dir_all(&dir);
    dir
}

fn t(s: &str) -> ClockTime {
    ClockTime::parse(s).unwrap()
}

fn tuesday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 10, 20).unwrap()
}

fn monday(h: u32, m: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2026, 10, 19)
        .unwrap()
        .and_hms_opt(h, m, 0)
        .unwrap()
}

fn seed() -> SeedFile {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("seed/barbershop.json");
    SeedFile::load(&path).unwrap()
}

async fn open(dir: &Path) -> Engine {
    let config = DaemonConfig::from_lookup(|key| match key {
        "CHAIRBOOK_DATA_DIR" => Some(dir.display().to_string()),
        _ => None,
    });
    Engine::new(config.wal_path(), Arc::new(NotifyHub::new())).unwrap()
}

#[test]
fn time_helpers_agree() {
    assert_eq!(add_minutes("23:30", 45).unwrap(), t("00:15"));
    assert_eq!(add_minutes("00:10", -20).unwrap(), t("23:50"));
    assert!(matches!(add_minutes("9:00", 10), Err(EngineError::InvalidTimeFormat(_))));

    let slots: Vec<String> = generate_slots(t("09:00"), t("10:00"), 20)
        .unwrap()
        .map(|s| s.to_string())
        .collect();
    assert_eq!(slots, vec!["09:00", "09:20", "09:40"]);
    assert_eq!(
        generate_slots(t("09:00"), t("10:00"), 0).map(|_| ()),
        Err(EngineError::InvalidStep(0))
    );

    assert!(!overlaps(t("10:00"), t("10:30"), t("10:30"), t("11:00")));
    assert!(overlaps(t("10:00"), t("10:30"), t("10:15"), t("10:45")));
}

#[tokio::test]
async fn seeded_shop_books_cancels_and_survives_restart() {
    let dir = test_data_dir("full_flow");
    let config = ScheduleConfig::default();

    let (barber, combo, booked_id) = {
        let engine = open(&dir).await;
        seed().apply_if_empty(&engine).await.unwrap().unwrap();

        let barbers = engine.list_resources().await;
        assert_eq!(barbers.len(), 2);
        let barber = barbers[0].id;
        let combo = engine
            .list_services()
            .into_iter()
            .find(|s| s.name == "Corte + Barba")
            .unwrap();
        assert_eq!(combo.duration_minutes, 45);

        // 08:00–18:00 with a 45 minute service on a 30 minute grid.
        let slots = resolve_availability(&engine, tuesday(), combo.id, Some(barber), &config)
            .await
            .unwrap();
        assert_eq!(slots.first().map(|s| s.start), Some(t("08:00")));
        assert_eq!(slots.last().map(|s| (s.start, s.end)), Some((t("17:00"), t("17:45"))));
        assert_eq!(slots.len(), 19);

        let mut events = engine.notify.subscribe_all();
        let appt = check_and_reserve(
            &engine,
            ReservationRequest {
                id: Ulid::new(),
                client_id: Ulid::new(),
                resource_id: barber,
                service_id: combo.id,
                date: tuesday(),
                start: t("10:00"),
                notes: Some("primeira visita".into()),
            },
            &config,
            monday(9, 0),
        )
        .await
        .unwrap();
        assert_eq!(appt.interval.end, t("10:45"));
        assert_eq!(appt.price_cents, 5000);
        assert!(matches!(events.try_recv(), Ok(Event::AppointmentBooked { .. })));
        assert_eq!(events.try_recv().unwrap_err(), TryRecvError::Empty);

        // 10:00 and 10:30 are gone; 09:30 would run into 10:00 too.
        let after = resolve_availability(&engine, tuesday(), combo.id, Some(barber), &config)
            .await
            .unwrap();
        let starts: Vec<ClockTime> = after.iter().map(|s| s.start).collect();
        for taken in ["09:30", "10:00", "10:30"] {
            assert!(!starts.contains(&t(taken)), "{taken} still offered");
        }
        assert!(starts.contains(&t("11:00")));

        (barber, combo, appt.id())
    };

    let engine = open(&dir).await;
    assert_eq!(seed().apply_if_empty(&engine).await.unwrap(), None);

    let appt = engine.get_appointment(booked_id).await.unwrap();
    assert_eq!(appt.resource_id(), barber);
    assert_eq!(appt.notes.as_deref(), Some("primeira visita"));

    engine
        .transition_status(booked_id, AppointmentStatus::Confirmed, monday(10, 0), None)
        .await
        .unwrap();
    assert_eq!(send_due_reminders(&engine, monday(18, 0)).await.unwrap(), 1);
    assert_eq!(send_due_reminders(&engine, monday(19, 0)).await.unwrap(), 0);

    let tuesday_nine = tuesday().and_hms_opt(9, 0, 0).unwrap();
    let late = engine
        .cancel_appointment(booked_id, CancelledBy::Client, tuesday_nine, &config)
        .await;
    assert_eq!(late, Err(EngineError::CancellationWindowClosed));
    engine
        .cancel_appointment(booked_id, CancelledBy::Staff, tuesday_nine, &config)
        .await
        .unwrap();

    let slots = engine
        .availability(tuesday(), combo.id, Some(barber), &config)
        .await
        .unwrap();
    assert_eq!(slots.len(), 19);

    let cancelled = engine
        .list_appointments(&AppointmentFilter {
            status: Some(AppointmentStatus::Cancelled),
            ..AppointmentFilter::default()
        })
        .await;
    assert_eq!(cancelled.len(), 1);
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn saturday_closes_early() {
    let dir = test_data_dir("saturday");
    let engine = open(&dir).await;
    seed().apply_if_empty(&engine).await.unwrap();
    let corte = engine
        .list_services()
        .into_iter()
        .find(|s| s.name == "Corte Masculino")
        .unwrap();

    let saturday = NaiveDate::from_ymd_opt(2026, 10, 24).unwrap();
    let slots = engine
        .availability(saturday, corte.id, None, &ScheduleConfig::default())
        .await
        .unwrap();
    // Two barbers, 08:00–16:00.
    assert_eq!(slots.len(), 32);
    assert!(slots.iter().all(|s| s.end <= t("16:00")));
    let _ = std::fs::remove_dir_all(&dir);
}
