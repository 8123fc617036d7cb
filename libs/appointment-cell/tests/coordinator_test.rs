mod common;

use std::time::Duration;

use assert_matches::assert_matches;
use futures::future::join_all;
use tokio_test::assert_ok;
use uuid::Uuid;

use appointment_cell::models::{AppointmentFilter, AppointmentStatus, SlotKey, UpdateAppointmentRequest};
use appointment_cell::{BookingError, ConflictReason};
use common::*;

// ==============================================================================
// CREATE
// ==============================================================================

#[tokio::test]
async fn test_create_books_scheduled_appointment() {
    let h = harness();
    let doctor_id = Uuid::new_v4();

    let outcome = h.coordinator.create(booking_request(doctor_id, "09:00", "09:30")).await.unwrap();

    assert!(outcome.event_published());
    let appointment = outcome.appointment;
    assert_eq!(appointment.status, AppointmentStatus::Scheduled);
    assert_eq!(appointment.doctor_id, doctor_id);
    assert_eq!(appointment.version, 1);
    assert_eq!(appointment.start_time, time("09:00"));

    // Lease is gone once the call returns.
    assert_eq!(h.lock_store.live_keys().await, 0);

    let stored = h.coordinator.get(appointment.id).await.unwrap();
    assert_eq!(stored, appointment);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_for_same_slot_yield_one_booking() {
    let h = harness();
    let doctor_id = Uuid::new_v4();

    let attempts = (0..16).map(|_| {
        let coordinator = h.coordinator.clone();
        tokio::spawn(async move { coordinator.create(booking_request(doctor_id, "09:00", "09:30")).await })
    });
    let results: Vec<_> = join_all(attempts).await.into_iter().map(|r| r.unwrap()).collect();

    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one request may win the slot");

    for result in results.iter().filter(|r| r.is_err()) {
        assert_matches!(
            result,
            Err(BookingError::Conflict(ConflictReason::SlotBeingBooked | ConflictReason::SlotAlreadyBooked))
        );
    }

    let booked = h
        .coordinator
        .list(&AppointmentFilter {
            doctor_id: Some(doctor_id),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(booked.len(), 1);
    assert_eq!(h.bus.published().await.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_for_distinct_slots_all_succeed() {
    let h = harness();
    let doctor_id = Uuid::new_v4();
    let slots = [
        ("09:00", "09:30"),
        ("09:30", "10:00"),
        ("10:00", "10:30"),
        ("10:30", "11:00"),
        ("11:00", "11:30"),
        ("11:30", "12:00"),
    ];

    let attempts = slots.iter().map(|(start, end)| {
        let coordinator = h.coordinator.clone();
        let request = booking_request(doctor_id, start, end);
        tokio::spawn(async move { coordinator.create(request).await })
    });
    let results: Vec<_> = join_all(attempts).await.into_iter().map(|r| r.unwrap()).collect();

    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(h.bus.published().await.len(), slots.len());
}

#[tokio::test]
async fn test_second_create_after_first_sees_slot_already_booked() {
    let h = harness();
    let doctor_id = Uuid::new_v4();

    h.coordinator.create(booking_request(doctor_id, "09:00", "09:30")).await.unwrap();
    let second = h.coordinator.create(booking_request(doctor_id, "09:00", "09:30")).await;

    assert_matches!(second, Err(BookingError::Conflict(ConflictReason::SlotAlreadyBooked)));
    assert_eq!(h.lock_store.live_keys().await, 0);
}

#[tokio::test]
async fn test_held_lease_rejects_without_touching_repository() {
    let h = harness();
    let doctor_id = Uuid::new_v4();
    let slot = SlotKey {
        doctor_id,
        appointment_date: date(),
        start_time: time("09:00"),
    };
    assert!(h.locks.acquire(&slot.lock_key(), Duration::from_secs(30)).await.unwrap());

    let result = h.coordinator.create(booking_request(doctor_id, "09:00", "09:30")).await;

    assert_matches!(result, Err(BookingError::Conflict(ConflictReason::SlotBeingBooked)));
    assert_eq!(h.repository.calls(), 0);
    assert!(h.bus.published().await.is_empty());
}

#[tokio::test]
async fn test_lock_store_failure_aborts_before_insert() {
    let h = harness();
    h.lock_store.set_unavailable(true);

    let result = h.coordinator.create(booking_request(Uuid::new_v4(), "09:00", "09:30")).await;

    assert_matches!(result, Err(BookingError::Infrastructure(_)));
    assert_eq!(h.repository.calls(), 0);
}

#[tokio::test]
async fn test_repository_failure_releases_lease() {
    let h = harness();
    h.repository.set_failing(true);

    let result = h.coordinator.create(booking_request(Uuid::new_v4(), "09:00", "09:30")).await;

    assert_matches!(result, Err(BookingError::Infrastructure(_)));
    assert_eq!(h.lock_store.live_keys().await, 0);
    assert!(h.bus.published().await.is_empty());
}

#[tokio::test]
async fn test_publish_failure_keeps_booking() {
    let h = harness();
    h.bus.set_failing(true);

    let outcome = h.coordinator.create(booking_request(Uuid::new_v4(), "09:00", "09:30")).await.unwrap();

    assert!(!outcome.event_published());
    assert_matches!(outcome.publish_error, Some(ref e) if e.is_retryable());

    let stored = h.coordinator.get(outcome.appointment.id).await.unwrap();
    assert_eq!(stored.status, AppointmentStatus::Scheduled);
    assert!(h.bus.published().await.is_empty());
}

// ==============================================================================
// VALIDATION
// ==============================================================================

#[tokio::test]
async fn test_missing_fields_are_named() {
    let h = harness();
    let mut request = booking_request(Uuid::new_v4(), "09:00", "09:30");
    request.doctor_id = None;
    request.end_time = None;

    let result = h.coordinator.create(request).await;

    assert_matches!(result, Err(BookingError::Validation(msg)) if msg.contains("doctor_id") && msg.contains("end_time"));
    assert_eq!(h.repository.calls(), 0);
}

#[tokio::test]
async fn test_end_must_follow_start() {
    let h = harness();

    let same = h.coordinator.create(booking_request(Uuid::new_v4(), "09:00", "09:00")).await;
    let before = h.coordinator.create(booking_request(Uuid::new_v4(), "10:00", "09:30")).await;

    assert_matches!(same, Err(BookingError::Validation(_)));
    assert_matches!(before, Err(BookingError::Validation(_)));
}

#[tokio::test]
async fn test_start_must_lie_on_grid() {
    let h = harness();
    let doctor_id = Uuid::new_v4();

    for (start, end) in [("09:15", "09:45"), ("08:30", "09:00"), ("17:00", "17:30"), ("16:45", "17:00")] {
        let result = h.coordinator.create(booking_request(doctor_id, start, end)).await;
        assert_matches!(result, Err(BookingError::Validation(_)), "{} should be rejected", start);
    }
    assert_ok!(h.coordinator.create(booking_request(doctor_id, "16:30", "17:00")).await);
}

// ==============================================================================
// TRANSITIONS
// ==============================================================================

#[tokio::test]
async fn test_full_lifecycle_emits_one_event_per_step() {
    let h = harness();
    let created = h.coordinator.create(booking_request(Uuid::new_v4(), "09:00", "09:30")).await.unwrap();
    let id = created.appointment.id;

    let confirmed = h.coordinator.confirm(id).await.unwrap();
    assert_eq!(confirmed.appointment.status, AppointmentStatus::Confirmed);
    assert_eq!(confirmed.appointment.version, 2);

    let completed = h.coordinator.complete(id).await.unwrap();
    assert_eq!(completed.appointment.status, AppointmentStatus::Completed);
    assert_eq!(completed.appointment.version, 3);

    let events = h.bus.published_on(TOPIC).await;
    let types: Vec<_> = events.iter().map(|e| e.event_type.as_str()).collect();
    assert_eq!(
        types,
        vec!["appointment.created", "appointment.confirmed", "appointment.completed"]
    );
    assert!(events.iter().all(|e| e.key == id.to_string()));
    assert!(events.windows(2).all(|w| w[0].emitted_at_logical < w[1].emitted_at_logical));
    assert_eq!(events[2].payload["status"], "completed");
}

#[tokio::test]
async fn test_cancel_records_reason_and_frees_slot() {
    let h = harness();
    let doctor_id = Uuid::new_v4();
    let created = h.coordinator.create(booking_request(doctor_id, "09:00", "09:30")).await.unwrap();

    let cancelled = h
        .coordinator
        .cancel(created.appointment.id, Some("Patient travelling".to_string()))
        .await
        .unwrap();

    assert_eq!(cancelled.appointment.status, AppointmentStatus::Cancelled);
    assert_eq!(cancelled.appointment.cancellation_reason.as_deref(), Some("Patient travelling"));

    // The cancelled record stays for audit and no longer blocks the slot.
    let rebooked = h.coordinator.create(booking_request(doctor_id, "09:00", "09:30")).await.unwrap();
    assert_ne!(rebooked.appointment.id, created.appointment.id);
    assert_eq!(h.coordinator.list(&AppointmentFilter::default()).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_cancel_emits_one_event_keyed_by_appointment() {
    let h = harness();
    let created = h.coordinator.create(booking_request(Uuid::new_v4(), "09:00", "09:30")).await.unwrap();
    let id = created.appointment.id;

    let outcome = h.coordinator.cancel(id, None).await.unwrap();
    assert!(outcome.event_published());

    let cancellations: Vec<_> = h
        .bus
        .published_on(TOPIC)
        .await
        .into_iter()
        .filter(|event| event.event_type == "appointment.cancelled")
        .collect();
    assert_eq!(cancellations.len(), 1);
    assert_eq!(cancellations[0].key, id.to_string());
    assert_eq!(cancellations[0].payload["status"], "cancelled");
    assert_eq!(h.bus.published().await.len(), 2);
}

#[tokio::test]
async fn test_illegal_transitions_leave_status_unchanged() {
    let h = harness();
    let doctor_id = Uuid::new_v4();

    let scheduled = h.coordinator.create(booking_request(doctor_id, "09:00", "09:30")).await.unwrap().appointment;

    let confirmed = h.coordinator.create(booking_request(doctor_id, "09:30", "10:00")).await.unwrap().appointment;
    h.coordinator.confirm(confirmed.id).await.unwrap();

    let cancelled = h.coordinator.create(booking_request(doctor_id, "10:00", "10:30")).await.unwrap().appointment;
    h.coordinator.cancel(cancelled.id, None).await.unwrap();

    let completed = h.coordinator.create(booking_request(doctor_id, "10:30", "11:00")).await.unwrap().appointment;
    assert_ok!(h.coordinator.confirm(completed.id).await);
    assert_ok!(h.coordinator.complete(completed.id).await);

    let events_before = h.bus.published().await.len();

    let illegal = [
        (scheduled.id, "complete"),
        (confirmed.id, "confirm"),
        (cancelled.id, "confirm"),
        (cancelled.id, "cancel"),
        (cancelled.id, "complete"),
        (completed.id, "confirm"),
        (completed.id, "cancel"),
        (completed.id, "complete"),
    ];

    for (id, operation) in illegal {
        let before = h.coordinator.get(id).await.unwrap();
        let result = match operation {
            "confirm" => h.coordinator.confirm(id).await,
            "cancel" => h.coordinator.cancel(id, None).await,
            _ => h.coordinator.complete(id).await,
        };

        assert_matches!(
            result,
            Err(BookingError::Conflict(ConflictReason::IllegalTransition { .. })),
            "{} from {} must be rejected",
            operation,
            before.status
        );
        assert_eq!(h.coordinator.get(id).await.unwrap(), before);
    }

    assert_eq!(h.bus.published().await.len(), events_before);
}

#[tokio::test]
async fn test_transition_on_unknown_id_is_not_found() {
    let h = harness();
    let id = Uuid::new_v4();

    assert_matches!(h.coordinator.confirm(id).await, Err(BookingError::NotFound(missing)) if missing == id);
    assert_matches!(h.coordinator.get(id).await, Err(BookingError::NotFound(_)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_racing_transitions_commit_once() {
    let h = harness();
    let created = h.coordinator.create(booking_request(Uuid::new_v4(), "09:00", "09:30")).await.unwrap();
    let id = created.appointment.id;

    let attempts = (0..8).map(|i| {
        let coordinator = h.coordinator.clone();
        tokio::spawn(async move {
            if i % 2 == 0 {
                coordinator.cancel(id, Some(format!("attempt {}", i))).await
            } else {
                coordinator.confirm(id).await
            }
        })
    });
    let results: Vec<_> = join_all(attempts).await.into_iter().map(|r| r.unwrap()).collect();

    for result in results.iter().filter(|r| r.is_err()) {
        assert_matches!(result, Err(BookingError::Conflict(_)));
    }

    // confirm then cancel is legal, so at most two commits; never two of the same kind.
    let stored = h.coordinator.get(id).await.unwrap();
    let commits = results.iter().filter(|r| r.is_ok()).count();
    assert!((1..=2).contains(&commits));
    assert_eq!(stored.version, 1 + commits as u64);
    assert_eq!(h.bus.published().await.len(), 1 + commits);
}

// ==============================================================================
// UPDATE AND READS
// ==============================================================================

#[tokio::test]
async fn test_update_changes_notes_only() {
    let h = harness();
    let created = h.coordinator.create(booking_request(Uuid::new_v4(), "09:00", "09:30")).await.unwrap();
    let id = created.appointment.id;

    let updated = h
        .coordinator
        .update(
            id,
            UpdateAppointmentRequest {
                reason: None,
                notes: Some("Bring previous lab results".to_string()),
            },
        )
        .await
        .unwrap();

    assert_eq!(updated.appointment.notes.as_deref(), Some("Bring previous lab results"));
    assert_eq!(updated.appointment.reason, created.appointment.reason);
    assert_eq!(updated.appointment.status, AppointmentStatus::Scheduled);
    assert_eq!(updated.appointment.version, 2);

    let last = h.bus.published().await.pop().unwrap();
    assert_eq!(last.event_type, "appointment.updated");
}

#[tokio::test]
async fn test_empty_update_is_rejected() {
    let h = harness();
    let created = h.coordinator.create(booking_request(Uuid::new_v4(), "09:00", "09:30")).await.unwrap();

    let result = h
        .coordinator
        .update(created.appointment.id, UpdateAppointmentRequest::default())
        .await;

    assert_matches!(result, Err(BookingError::Validation(_)));
}

#[tokio::test]
async fn test_list_filters_and_orders_by_slot() {
    let h = harness();
    let doctor_a = Uuid::new_v4();
    let doctor_b = Uuid::new_v4();

    h.coordinator.create(booking_request(doctor_a, "11:00", "11:30")).await.unwrap();
    h.coordinator.create(booking_request(doctor_a, "09:00", "09:30")).await.unwrap();
    let other = h.coordinator.create(booking_request(doctor_b, "10:00", "10:30")).await.unwrap();
    h.coordinator.confirm(other.appointment.id).await.unwrap();

    let for_a = h
        .coordinator
        .list(&AppointmentFilter {
            doctor_id: Some(doctor_a),
            ..Default::default()
        })
        .await
        .unwrap();
    let starts: Vec<_> = for_a.iter().map(|a| a.start_time).collect();
    assert_eq!(starts, vec![time("09:00"), time("11:00")]);

    let confirmed = h
        .coordinator
        .list(&AppointmentFilter {
            status: Some(AppointmentStatus::Confirmed),
            ..Default::default()
        })
        .await
        .unwrap();
    assert_eq!(confirmed.len(), 1);
    assert_eq!(confirmed[0].doctor_id, doctor_b);
}
