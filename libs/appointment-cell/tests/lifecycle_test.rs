mod common;

use std::sync::Arc;

use assert_matches::assert_matches;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{timeout, Duration};
use uuid::Uuid;

use appointment_cell::*;
use availability_cell::SlotStatus;
use notification_cell::{Channel, NotificationError, NotificationEvent, NotificationPublisher};
use shared_models::auth::Actor;

use common::*;

async fn booked(harness: &Harness, doctor_id: Uuid, patient: &Actor) -> Appointment {
    harness.open_slot(doctor_id, monday_at(11, 0)).await;
    let mut request = slot_request(doctor_id, monday_at(11, 0), "unused@example.com");
    request.patient_email = None;
    harness.state.booking.book_slot(patient, request).await.unwrap()
}

async fn next_event(receiver: &mut tokio::sync::broadcast::Receiver<String>) -> NotificationEvent {
    let message = timeout(Duration::from_millis(200), receiver.recv())
        .await
        .expect("event should arrive")
        .unwrap();
    serde_json::from_str(&message).unwrap()
}

#[tokio::test]
async fn test_doctor_walks_appointment_to_completion() {
    let harness = Harness::new().await;
    let doctor = doctor();
    let ada = patient("ada@example.com");
    let appointment = booked(&harness, doctor.id, &ada).await;
    let lifecycle = &harness.state.lifecycle;

    for status in [AppointmentStatus::Arrived, AppointmentStatus::InProgress, AppointmentStatus::Completed] {
        let updated = lifecycle.set_status(appointment.id, status, &doctor, None).await.unwrap();
        assert_eq!(updated.status, status);
    }

    // Terminal: nothing moves a completed appointment, not even staff
    for status in [AppointmentStatus::Booked, AppointmentStatus::Arrived, AppointmentStatus::NoShow] {
        let result = lifecycle.set_status(appointment.id, status, &admin(), None).await;
        assert_matches!(
            result,
            Err(AppointmentError::InvalidTransition { from: AppointmentStatus::Completed, .. })
        );
    }

    let result = harness.state.booking.cancel_appointment(appointment.id, &admin(), None).await;
    assert_matches!(result, Err(AppointmentError::InvalidTransition { .. }));
}

#[tokio::test]
async fn test_notes_are_recorded_on_transition() {
    let harness = Harness::new().await;
    let doctor = doctor();
    let appointment = booked(&harness, doctor.id, &patient("ada@example.com")).await;

    let updated = harness
        .state
        .lifecycle
        .set_status(appointment.id, AppointmentStatus::Arrived, &reception(), Some("Checked in at desk".to_string()))
        .await
        .unwrap();
    assert_eq!(updated.notes.as_deref(), Some("Checked in at desk"));
}

#[tokio::test]
async fn test_role_permissions() {
    let harness = Harness::new().await;
    let doctor = doctor();
    let ada = patient("ada@example.com");
    let appointment = booked(&harness, doctor.id, &ada).await;
    let lifecycle = &harness.state.lifecycle;

    assert_matches!(
        lifecycle.set_status(appointment.id, AppointmentStatus::Completed, &ada, None).await,
        Err(AppointmentError::Forbidden(_))
    );
    assert_matches!(
        lifecycle.set_status(appointment.id, AppointmentStatus::Arrived, &ada, None).await,
        Err(AppointmentError::Forbidden(_))
    );

    let stranger_doctor = common::doctor();
    assert_matches!(
        lifecycle.set_status(appointment.id, AppointmentStatus::Arrived, &stranger_doctor, None).await,
        Err(AppointmentError::Forbidden(_))
    );
    assert_matches!(
        lifecycle.set_status(appointment.id, AppointmentStatus::Cancelled, &doctor, None).await,
        Err(AppointmentError::Forbidden(_))
    );

    let other_patient = patient("eve@example.com");
    assert_matches!(
        harness.state.booking.cancel_appointment(appointment.id, &other_patient, None).await,
        Err(AppointmentError::Forbidden(_))
    );

    let cancelled = lifecycle
        .set_status(appointment.id, AppointmentStatus::Cancelled, &ada, None)
        .await
        .unwrap();
    assert_eq!(cancelled.status, AppointmentStatus::Cancelled);
    assert_eq!(cancelled.cancellation().unwrap().cancelled_by, ada.id);
}

#[tokio::test]
async fn test_checks_run_in_order() {
    let harness = Harness::new().await;
    let lifecycle = &harness.state.lifecycle;

    // Missing beats everything else
    assert_matches!(
        lifecycle.set_status(Uuid::new_v4(), AppointmentStatus::Completed, &patient("x@example.com"), None).await,
        Err(AppointmentError::NotFound(_))
    );

    // Permission is checked before the graph
    let doctor = doctor();
    let ada = patient("ada@example.com");
    let appointment = booked(&harness, doctor.id, &ada).await;
    assert_matches!(
        lifecycle.set_status(appointment.id, AppointmentStatus::Completed, &ada, None).await,
        Err(AppointmentError::Forbidden(_))
    );

    // Allowed for the role but not reachable from booked
    assert_matches!(
        lifecycle.set_status(appointment.id, AppointmentStatus::Completed, &doctor, None).await,
        Err(AppointmentError::InvalidTransition {
            from: AppointmentStatus::Booked,
            to: AppointmentStatus::Completed
        })
    );
}

#[tokio::test]
async fn test_status_cancel_twice_is_invalid_transition() {
    let harness = Harness::new().await;
    let doctor = doctor();
    let appointment = booked(&harness, doctor.id, &patient("ada@example.com")).await;
    let desk = reception();

    harness
        .state
        .lifecycle
        .set_status(appointment.id, AppointmentStatus::Cancelled, &desk, None)
        .await
        .unwrap();

    let slot = harness.state.slots.get_slot(appointment.slot_id.unwrap()).await.unwrap();
    assert_eq!(slot.status, SlotStatus::Available);

    assert_matches!(
        harness
            .state
            .lifecycle
            .set_status(appointment.id, AppointmentStatus::Cancelled, &desk, None)
            .await,
        Err(AppointmentError::InvalidTransition {
            from: AppointmentStatus::Cancelled,
            to: AppointmentStatus::Cancelled
        })
    );

    // The dedicated cancel operation stays idempotent
    let again = harness.state.booking.cancel_appointment(appointment.id, &desk, None).await.unwrap();
    assert_eq!(again.status, AppointmentStatus::Cancelled);
}

#[tokio::test]
async fn test_events_reach_doctor_patient_and_reception_rooms() {
    let harness = Harness::new().await;
    let doctor = doctor();
    let ada = patient("ada@example.com");

    let mut doctor_room = harness.hub.subscribe(&Channel::Doctor(doctor.id).to_string()).await;
    let mut patient_room = harness.hub.subscribe(&Channel::Patient(ada.id).to_string()).await;
    let mut reception_room = harness.hub.subscribe(&Channel::Reception.to_string()).await;
    let mut admin_room = harness.hub.subscribe(&Channel::Admin.to_string()).await;

    harness.open_slot(doctor.id, monday_at(11, 0)).await;
    let slot_created = next_event(&mut doctor_room).await;
    assert_eq!(slot_created.event, "slot.created");
    assert_eq!(next_event(&mut reception_room).await.event, "slot.created");

    let mut request = slot_request(doctor.id, monday_at(11, 0), "ada@example.com");
    request.patient_email = None;
    let appointment = harness.state.booking.book_slot(&ada, request).await.unwrap();

    let created = next_event(&mut doctor_room).await;
    assert_eq!(created.event, "appointment.created");
    assert_eq!(created.payload["id"], appointment.id.to_string());
    assert_eq!(next_event(&mut doctor_room).await.event, "slot.updated");

    let for_patient = next_event(&mut patient_room).await;
    assert_eq!(for_patient.event, "appointment.created");
    assert_eq!(for_patient.channel, format!("patient:{}", ada.id));

    harness
        .state
        .booking
        .cancel_appointment(appointment.id, &ada, None)
        .await
        .unwrap();
    assert_eq!(next_event(&mut patient_room).await.event, "appointment.cancelled");

    // Admin notifications are off in this harness
    let admin_traffic = timeout(Duration::from_millis(50), admin_room.recv()).await;
    assert!(admin_traffic.is_err());
}

struct BrokenPublisher;

#[async_trait]
impl NotificationPublisher for BrokenPublisher {
    async fn publish(&self, channel: &str, _event: &str, _payload: &Value) -> Result<(), NotificationError> {
        Err(NotificationError::PublishFailed {
            channel: channel.to_string(),
            reason: "broker down".to_string(),
        })
    }
}

/// Reports every attempt, then fails it.
struct BrokenMailer {
    attempts: mpsc::UnboundedSender<NoticeKind>,
}

#[async_trait]
impl AppointmentMailer for BrokenMailer {
    async fn send_appointment_notice(
        &self,
        _to_email: &str,
        kind: NoticeKind,
        _appointment: &Appointment,
    ) -> Result<(), NotificationError> {
        let _ = self.attempts.send(kind);
        Err(NotificationError::PoolError("smtp unreachable".to_string()))
    }
}

#[tokio::test]
async fn test_failed_delivery_does_not_undo_changes() {
    let (attempts, mut mail_log) = mpsc::unbounded_channel();
    let fanout = NotificationFanout::new(Arc::new(BrokenPublisher), Arc::new(BrokenMailer { attempts }), true);
    let harness = Harness::with_fanout(fanout).await;
    let doctor = doctor();
    let desk = reception();
    let slot = harness.open_slot(doctor.id, monday_at(9, 0)).await;

    let appointment = harness
        .state
        .booking
        .book_slot(&desk, slot_request(doctor.id, monday_at(9, 0), "ada@example.com"))
        .await
        .unwrap();
    let stored = harness.store.get_appointment(appointment.id).await.unwrap().unwrap();
    assert_eq!(stored.status, AppointmentStatus::Booked);
    assert_eq!(harness.state.slots.get_slot(slot.id).await.unwrap().status, SlotStatus::Booked);
    let first_notice = timeout(Duration::from_millis(200), mail_log.recv()).await.unwrap();
    assert_eq!(first_notice, Some(NoticeKind::Created));

    let arrived = harness
        .state
        .lifecycle
        .set_status(appointment.id, AppointmentStatus::Arrived, &doctor, None)
        .await
        .unwrap();
    assert_eq!(arrived.status, AppointmentStatus::Arrived);
    let stored = harness.store.get_appointment(appointment.id).await.unwrap().unwrap();
    assert_eq!(stored.status, AppointmentStatus::Arrived);

    let second = harness.open_slot(doctor.id, monday_at(9, 15)).await;
    let other = harness
        .state
        .booking
        .book_slot(&desk, slot_request(doctor.id, monday_at(9, 15), "grace@example.com"))
        .await
        .unwrap();
    let cancelled = harness.state.booking.cancel_appointment(other.id, &desk, None).await.unwrap();
    assert_eq!(cancelled.status, AppointmentStatus::Cancelled);
    let stored = harness.store.get_appointment(other.id).await.unwrap().unwrap();
    assert_eq!(stored.status, AppointmentStatus::Cancelled);
    assert_eq!(harness.state.slots.get_slot(second.id).await.unwrap().status, SlotStatus::Available);
}
