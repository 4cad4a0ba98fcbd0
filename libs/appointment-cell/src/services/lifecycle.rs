// libs/appointment-cell/src/services/lifecycle.rs
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use availability_cell::SlotService;
use notification_cell::ScheduleEvent;
use shared_models::auth::{Actor, Role};

use crate::models::{Appointment, AppointmentError, AppointmentStatus, StatusChange};
use crate::services::notification::{NoticeKind, NotificationFanout};
use crate::store::AppointmentStore;

/// Drives appointments through the status graph on behalf of an actor.
pub struct AppointmentLifecycleService {
    store: Arc<dyn AppointmentStore>,
    slots: Arc<SlotService<dyn AppointmentStore>>,
    fanout: NotificationFanout,
}

impl AppointmentLifecycleService {
    pub fn new(
        store: Arc<dyn AppointmentStore>,
        slots: Arc<SlotService<dyn AppointmentStore>>,
        fanout: NotificationFanout,
    ) -> Self {
        Self { store, slots, fanout }
    }

    /// Statuses a role may request through `set_status`, ownership aside.
    pub fn allowed_targets(role: Role) -> &'static [AppointmentStatus] {
        match role {
            Role::Patient => &[AppointmentStatus::Cancelled],
            Role::Doctor => &[
                AppointmentStatus::Arrived,
                AppointmentStatus::InProgress,
                AppointmentStatus::Completed,
                AppointmentStatus::NoShow,
            ],
            Role::Reception | Role::Admin => &[
                AppointmentStatus::Booked,
                AppointmentStatus::Arrived,
                AppointmentStatus::InProgress,
                AppointmentStatus::Completed,
                AppointmentStatus::Cancelled,
                AppointmentStatus::NoShow,
            ],
        }
    }

    pub fn may_set(actor: &Actor, appointment: &Appointment, target: AppointmentStatus) -> bool {
        let owns = match actor.role {
            Role::Patient => appointment.is_for_patient(actor),
            Role::Doctor => appointment.is_with_doctor(actor),
            Role::Reception | Role::Admin => true,
        };
        owns && Self::allowed_targets(actor.role).contains(&target)
    }

    /// Patients cancel their own bookings, doctors those on their calendar, staff any.
    pub fn may_cancel(actor: &Actor, appointment: &Appointment) -> bool {
        match actor.role {
            Role::Patient => appointment.is_for_patient(actor),
            Role::Doctor => appointment.is_with_doctor(actor),
            Role::Reception | Role::Admin => true,
        }
    }

    pub fn may_view(actor: &Actor, appointment: &Appointment) -> bool {
        Self::may_cancel(actor, appointment)
    }

    pub async fn load(&self, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        self.store
            .get_appointment(appointment_id)
            .await?
            .ok_or_else(|| AppointmentError::NotFound("Appointment".to_string()))
    }

    /// Move an appointment to `new_status`.
    ///
    /// Checks run in a fixed order: existence, then permission, then the graph.
    pub async fn set_status(
        &self,
        appointment_id: Uuid,
        new_status: AppointmentStatus,
        actor: &Actor,
        notes: Option<String>,
    ) -> Result<Appointment, AppointmentError> {
        let appointment = self.load(appointment_id).await?;

        if !Self::may_set(actor, &appointment, new_status) {
            warn!(
                "{} {} may not set appointment {} to {}",
                actor.role, actor.id, appointment_id, new_status
            );
            return Err(AppointmentError::Forbidden(format!(
                "A {} cannot set this appointment to {}",
                actor.role, new_status
            )));
        }

        if !appointment.status.can_transition_to(new_status) {
            debug!("Rejected transition {} -> {} for {}", appointment.status, new_status, appointment_id);
            return Err(AppointmentError::InvalidTransition {
                from: appointment.status,
                to: new_status,
            });
        }

        if new_status == AppointmentStatus::Cancelled {
            return self.apply_cancellation(appointment, actor, notes).await;
        }

        let change = StatusChange::to(appointment.status, new_status, notes);
        let updated = self
            .store
            .update_appointment_status(appointment_id, change)
            .await?
            .ok_or_else(|| AppointmentError::Conflict("Appointment status changed concurrently".to_string()))?;

        info!("Appointment {} moved {} -> {}", appointment_id, appointment.status, new_status);
        self.fanout.appointment_changed(ScheduleEvent::AppointmentUpdated, &updated).await;
        if new_status == AppointmentStatus::Completed {
            self.fanout.mail(NoticeKind::Completed, &updated);
        }

        Ok(updated)
    }

    /// Write the cancellation against the status the caller observed, then free the slot.
    pub(crate) async fn apply_cancellation(
        &self,
        appointment: Appointment,
        actor: &Actor,
        reason: Option<String>,
    ) -> Result<Appointment, AppointmentError> {
        let change = StatusChange::cancel(appointment.status, actor.id, reason);
        let cancelled = self
            .store
            .update_appointment_status(appointment.id, change)
            .await?
            .ok_or_else(|| AppointmentError::Conflict("Appointment status changed concurrently".to_string()))?;

        info!("Appointment {} cancelled by {} {}", cancelled.id, actor.role, actor.id);
        self.release_slot(&cancelled).await;

        self.fanout.appointment_changed(ScheduleEvent::AppointmentCancelled, &cancelled).await;
        self.fanout.mail(NoticeKind::Cancelled, &cancelled);
        Ok(cancelled)
    }

    /// Return the appointment's slot to the pool if it still holds it.
    pub(crate) async fn release_slot(&self, appointment: &Appointment) {
        let Some(slot_id) = appointment.slot_id else {
            return;
        };

        if let Err(e) = self.slots.release_for(slot_id, appointment.id).await {
            // The cancellation stands; a repeated cancel retries the release.
            warn!("Failed to release slot {} for appointment {}: {}", slot_id, appointment.id, e);
        }
    }
}
