mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{Duration, NaiveTime};
use futures::future::join_all;
use uuid::Uuid;

use appointment_cell::*;
use availability_cell::{SlotStatus, WeeklyRule};
use shared_models::auth::Role;

use common::*;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_bookings_of_one_slot_have_one_winner() {
    let harness = Harness::new().await;
    let doctor_id = Uuid::new_v4();
    let slot = harness.open_slot(doctor_id, monday_at(9, 0)).await;
    let booking = harness.state.booking.clone();

    let attempts = (0..16).map(|i| {
        let booking = Arc::clone(&booking);
        tokio::spawn(async move {
            let request = slot_request(doctor_id, monday_at(9, 0), &format!("patient{}@example.com", i));
            booking.book_slot(&reception(), request).await
        })
    });

    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.expect("task panicked"))
        .collect();

    let winners = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(winners, 1, "exactly one booking must succeed");
    for result in results.iter().filter(|r| r.is_err()) {
        assert_matches!(
            result,
            Err(AppointmentError::SlotUnavailable { status: SlotStatus::Booked })
                | Err(AppointmentError::Conflict(_))
        );
    }

    let stored = harness.state.slots.get_slot(slot.id).await.unwrap();
    assert_eq!(stored.status, SlotStatus::Booked);
    let active = harness
        .state
        .queries
        .list_by_doctor(&reception(), doctor_id, None)
        .await
        .unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(stored.appointment_id, Some(active[0].id));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_two_simultaneous_claims_on_new_year_slot() {
    let harness = Harness::new().await;
    let doctor_id = Uuid::new_v4();
    harness.open_slot(doctor_id, monday_at(9, 0)).await;

    let (desk, manager) = (reception(), admin());
    let first = harness.state.booking.book_slot(&desk, slot_request(doctor_id, monday_at(9, 0), "a@example.com"));
    let second = harness.state.booking.book_slot(&manager, slot_request(doctor_id, monday_at(9, 0), "b@example.com"));
    let (first, second) = tokio::join!(first, second);

    let outcomes = [first, second];
    assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(outcomes.iter().any(|r| matches!(
        r,
        Err(AppointmentError::SlotUnavailable { status: SlotStatus::Booked })
    )));
}

#[tokio::test]
async fn test_booking_missing_or_withdrawn_slot() {
    let harness = Harness::new().await;
    let doctor_id = Uuid::new_v4();

    let missing = harness
        .state
        .booking
        .book_slot(&reception(), slot_request(doctor_id, monday_at(10, 0), "a@example.com"))
        .await;
    assert_matches!(missing, Err(AppointmentError::NoSuchSlot));

    let slot = harness.open_slot(doctor_id, monday_at(10, 0)).await;
    harness.state.slots.withdraw(slot.id).await.unwrap();

    let withdrawn = harness
        .state
        .booking
        .book_slot(&reception(), slot_request(doctor_id, monday_at(10, 0), "a@example.com"))
        .await;
    assert_matches!(withdrawn, Err(AppointmentError::SlotUnavailable { status: SlotStatus::Cancelled }));
}

#[tokio::test]
async fn test_cancel_then_rebook_creates_fresh_appointment() {
    let harness = Harness::new().await;
    let doctor_id = Uuid::new_v4();
    let slot = harness.open_slot(doctor_id, monday_at(9, 0)).await;
    let desk = reception();

    let first = harness
        .state
        .booking
        .book_slot(&desk, slot_request(doctor_id, monday_at(9, 0), "first@example.com"))
        .await
        .unwrap();
    assert_eq!(first.slot_id, Some(slot.id));

    let cancelled = harness
        .state
        .booking
        .cancel_appointment(first.id, &desk, Some("Patient called".to_string()))
        .await
        .unwrap();
    assert_eq!(cancelled.status, AppointmentStatus::Cancelled);
    assert_eq!(cancelled.cancellation().unwrap().cancelled_by, desk.id);

    let released = harness.state.slots.get_slot(slot.id).await.unwrap();
    assert_eq!(released.status, SlotStatus::Available);
    assert!(released.appointment_id.is_none());
    assert!(released.patient.is_none());

    let second = harness
        .state
        .booking
        .book_slot(&desk, slot_request(doctor_id, monday_at(9, 0), "second@example.com"))
        .await
        .unwrap();
    assert_ne!(second.id, first.id);
    assert_eq!(second.status, AppointmentStatus::Booked);

    let rebooked = harness.state.slots.get_slot(slot.id).await.unwrap();
    assert_eq!(rebooked.appointment_id, Some(second.id));
    assert_eq!(rebooked.patient.unwrap().email, "second@example.com");
}

#[tokio::test]
async fn test_repeated_cancel_is_noop_and_keeps_rebooked_slot() {
    let harness = Harness::new().await;
    let doctor_id = Uuid::new_v4();
    let slot = harness.open_slot(doctor_id, monday_at(9, 0)).await;
    let desk = reception();

    let first = harness
        .state
        .booking
        .book_slot(&desk, slot_request(doctor_id, monday_at(9, 0), "first@example.com"))
        .await
        .unwrap();
    harness.state.booking.cancel_appointment(first.id, &desk, None).await.unwrap();

    let second = harness
        .state
        .booking
        .book_slot(&desk, slot_request(doctor_id, monday_at(9, 0), "second@example.com"))
        .await
        .unwrap();

    let again = harness.state.booking.cancel_appointment(first.id, &desk, None).await.unwrap();
    assert_eq!(again.status, AppointmentStatus::Cancelled);

    let slot = harness.state.slots.get_slot(slot.id).await.unwrap();
    assert_eq!(slot.status, SlotStatus::Booked);
    assert_eq!(slot.appointment_id, Some(second.id));
}

#[tokio::test]
async fn test_cancel_after_treatment_started_is_rejected() {
    let harness = Harness::new().await;
    let doctor = doctor();
    harness.open_slot(doctor.id, monday_at(9, 0)).await;

    let appointment = harness
        .state
        .booking
        .book_slot(&reception(), slot_request(doctor.id, monday_at(9, 0), "a@example.com"))
        .await
        .unwrap();
    let lifecycle = harness.state.lifecycle.clone();
    lifecycle.set_status(appointment.id, AppointmentStatus::Arrived, &doctor, None).await.unwrap();
    lifecycle.set_status(appointment.id, AppointmentStatus::InProgress, &doctor, None).await.unwrap();

    let result = harness.state.booking.cancel_appointment(appointment.id, &reception(), None).await;
    assert_matches!(
        result,
        Err(AppointmentError::InvalidTransition {
            from: AppointmentStatus::InProgress,
            to: AppointmentStatus::Cancelled
        })
    );
}

#[tokio::test]
async fn test_patient_identity_resolution() {
    let harness = Harness::new().await;
    let doctor_id = Uuid::new_v4();
    harness.open_slot(doctor_id, monday_at(9, 0)).await;
    harness.open_slot(doctor_id, monday_at(9, 15)).await;

    // A patient always books for themself and their token email fills the gap
    let ada = patient("ada@example.com");
    let mut request = slot_request(doctor_id, monday_at(9, 0), "ignored@example.com");
    request.patient_email = None;
    let booked = harness.state.booking.book_slot(&ada, request).await.unwrap();
    assert_eq!(booked.patient_id, Some(ada.id));
    assert_eq!(booked.patient_email, "ada@example.com");
    assert_eq!(booked.created_by, ada.id);

    let mut impersonation = slot_request(doctor_id, monday_at(9, 15), "ada@example.com");
    impersonation.patient_id = Some(Uuid::new_v4());
    assert_matches!(
        harness.state.booking.book_slot(&ada, impersonation).await,
        Err(AppointmentError::Forbidden(_))
    );

    assert_matches!(
        harness
            .state
            .booking
            .book_slot(&doctor(), slot_request(doctor_id, monday_at(9, 15), "x@example.com"))
            .await,
        Err(AppointmentError::Forbidden(_))
    );

    let mut nobody = slot_request(doctor_id, monday_at(9, 15), "x@example.com");
    nobody.patient_email = None;
    assert_matches!(
        harness.state.booking.book_slot(&reception(), nobody).await,
        Err(AppointmentError::Validation(_))
    );

    let invalid = slot_request(doctor_id, monday_at(9, 15), "not-an-email");
    assert_matches!(
        harness.state.booking.book_slot(&reception(), invalid).await,
        Err(AppointmentError::Validation(_))
    );
}

#[tokio::test]
async fn test_reception_booking_links_known_account_by_email() {
    let account = Account {
        id: Uuid::new_v4(),
        name: "Grace Hopper".to_string(),
        email: "grace@example.com".to_string(),
        role: Role::Patient,
    };
    let harness = Harness::with_accounts(vec![account.clone()]).await;
    let doctor_id = Uuid::new_v4();
    harness.open_slot(doctor_id, monday_at(9, 0)).await;

    let mut request = slot_request(doctor_id, monday_at(9, 0), "GRACE@example.com");
    request.patient_name = None;
    let appointment = harness.state.booking.book_slot(&reception(), request).await.unwrap();

    assert_eq!(appointment.patient_id, Some(account.id));
    assert_eq!(appointment.patient_name, "Grace Hopper");
}

#[tokio::test]
async fn test_interval_booking_requires_staff_and_open_hours() {
    let harness = Harness::new().await;
    let doctor_id = Uuid::new_v4();
    harness.monday_morning(doctor_id).await;

    assert_matches!(
        harness
            .state
            .booking
            .book_interval(&patient("ada@example.com"), interval_request(doctor_id, monday_at(9, 0), 15))
            .await,
        Err(AppointmentError::Forbidden(_))
    );

    assert_matches!(
        harness
            .state
            .booking
            .book_interval(&reception(), interval_request(doctor_id, monday_at(9, 15), 30))
            .await,
        Err(AppointmentError::Validation(_))
    );

    let booked = harness
        .state
        .booking
        .book_interval(&reception(), interval_request(doctor_id, monday_at(9, 0), 20))
        .await
        .unwrap();
    assert_eq!(booked.end_at, monday_at(9, 20));
    assert!(booked.slot_id.is_none());

    assert_matches!(
        harness
            .state
            .booking
            .book_interval(&reception(), interval_request(doctor_id, monday_at(9, 10), 10))
            .await,
        Err(AppointmentError::Conflict(_))
    );
}

#[tokio::test]
async fn test_both_protocols_share_the_overlap_invariant() {
    let harness = Harness::new().await;
    let doctor_id = Uuid::new_v4();
    harness.monday_morning(doctor_id).await;

    harness
        .state
        .booking
        .book_interval(&reception(), interval_request(doctor_id, monday_at(9, 0), 20))
        .await
        .unwrap();

    // The slot itself is free, but its time is taken by the direct booking
    let slot = harness.open_slot(doctor_id, monday_at(9, 15)).await;
    let result = harness
        .state
        .booking
        .book_slot(&reception(), slot_request(doctor_id, monday_at(9, 15), "a@example.com"))
        .await;
    assert_matches!(result, Err(AppointmentError::Conflict(_)));

    let untouched = harness.state.slots.get_slot(slot.id).await.unwrap();
    assert_eq!(untouched.status, SlotStatus::Available);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_randomized_interval_bookings_never_overlap() {
    let harness = Harness::new().await;
    let doctor_id = Uuid::new_v4();
    harness
        .state
        .availability
        .set_weekly_rules(
            doctor_id,
            vec![WeeklyRule::new(1, NaiveTime::from_hms_opt(8, 0, 0).unwrap(), NaiveTime::from_hms_opt(12, 0, 0).unwrap())],
        )
        .await
        .unwrap();

    // Deterministic pseudo-random offsets and lengths
    let mut seed: u64 = 0x2545_F491_4F6C_DD1D;
    let mut requests = Vec::new();
    for _ in 0..40 {
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;
        let offset = (seed % 200) as i64;
        let minutes = 5 + (seed % 40) as i32;
        let start = monday_at(8, 0) + Duration::minutes(offset);
        requests.push(interval_request(doctor_id, start, minutes));
    }

    let booking = harness.state.booking.clone();
    let attempts = requests.into_iter().map(|request| {
        let booking = Arc::clone(&booking);
        tokio::spawn(async move { booking.book_interval(&reception(), request).await })
    });
    let results = join_all(attempts).await;
    assert!(results.iter().any(|r| matches!(r, Ok(Ok(_)))));

    let survivors = harness
        .state
        .queries
        .list_by_doctor(&reception(), doctor_id, None)
        .await
        .unwrap();
    for (i, a) in survivors.iter().enumerate() {
        for b in survivors.iter().skip(i + 1) {
            assert!(!a.interval().overlaps(&b.interval()), "{:?} overlaps {:?}", a.interval(), b.interval());
        }
    }
}
