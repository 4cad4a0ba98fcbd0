// libs/appointment-cell/src/services/booking.rs
use std::sync::Arc;

use regex::Regex;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use availability_cell::{
    is_minute_aligned, SchedulingRules, SlotService, SlotStatus, TimeInterval,
};
use notification_cell::ScheduleEvent;
use shared_models::auth::{Actor, Role};

use crate::models::{
    Account, Appointment, AppointmentError, AppointmentStatus, BookIntervalRequest, BookSlotRequest,
    ResolvedPatient,
};
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::services::notification::{NoticeKind, NotificationFanout};
use crate::store::{AccountDirectory, AppointmentStore};

const EMAIL_PATTERN: &str = r"^[^@\s]+@[^@\s]+\.[^@\s]+$";

/// Patient details as supplied by the caller, before identity resolution.
struct PatientInput {
    patient_id: Option<Uuid>,
    patient_name: Option<String>,
    patient_email: Option<String>,
}

pub struct BookingService {
    store: Arc<dyn AppointmentStore>,
    accounts: Arc<dyn AccountDirectory>,
    slots: Arc<SlotService<dyn AppointmentStore>>,
    lifecycle: Arc<AppointmentLifecycleService>,
    fanout: NotificationFanout,
    rules: SchedulingRules,
    email_pattern: Option<Regex>,
}

impl BookingService {
    pub fn new(
        store: Arc<dyn AppointmentStore>,
        accounts: Arc<dyn AccountDirectory>,
        fanout: NotificationFanout,
        rules: SchedulingRules,
    ) -> Self {
        let slots = Arc::new(
            SlotService::new(Arc::clone(&store), rules.clone()).with_publisher(fanout.publisher()),
        );
        let lifecycle = Arc::new(AppointmentLifecycleService::new(
            Arc::clone(&store),
            Arc::clone(&slots),
            fanout.clone(),
        ));

        Self {
            store,
            accounts,
            slots,
            lifecycle,
            fanout,
            rules,
            email_pattern: Regex::new(EMAIL_PATTERN).ok(),
        }
    }

    pub fn slots(&self) -> Arc<SlotService<dyn AppointmentStore>> {
        Arc::clone(&self.slots)
    }

    pub fn lifecycle(&self) -> Arc<AppointmentLifecycleService> {
        Arc::clone(&self.lifecycle)
    }

    /// Book a materialized slot.
    ///
    /// The availability read up front only produces a friendlier error; the
    /// storage primitive re-checks it atomically and has the final word.
    #[instrument(skip(self, actor, request), fields(doctor_id = %request.doctor_id, start_at = %request.start_at))]
    pub async fn book_slot(&self, actor: &Actor, request: BookSlotRequest) -> Result<Appointment, AppointmentError> {
        debug!("Booking slot for {} {}", actor.role, actor.id);

        // Step 1: Locate the slot
        let slot = self
            .slots
            .find_slot(request.doctor_id, request.start_at)
            .await?
            .ok_or(AppointmentError::NoSuchSlot)?;

        if !slot.is_available() {
            return Err(AppointmentError::SlotUnavailable { status: slot.status });
        }

        // Step 2: Resolve who the appointment is for
        let patient = self
            .resolve_patient(
                actor,
                PatientInput {
                    patient_id: request.patient_id,
                    patient_name: request.patient_name,
                    patient_email: request.patient_email,
                },
            )
            .await?;

        let mut appointment = Appointment::booked(
            request.doctor_id,
            &patient,
            slot.start_at,
            slot.duration_minutes,
            actor.id,
        );
        appointment.reason = request.reason;

        // Step 3: Claim the slot and insert the appointment together
        let (appointment, booked_slot) = match self.store.book_slot(slot.id, appointment).await {
            Ok(booked) => booked,
            Err(AppointmentError::Conflict(reason)) => {
                return Err(self.lost_slot(slot.id, reason).await);
            }
            Err(e) => return Err(e),
        };

        info!("Booked appointment {} in slot {}", appointment.id, booked_slot.id);

        // Step 4: Tell everyone who cares
        self.fanout.appointment_changed(ScheduleEvent::AppointmentCreated, &appointment).await;
        self.slots.announce(ScheduleEvent::SlotUpdated, &booked_slot).await;
        self.fanout.mail(NoticeKind::Created, &appointment);

        Ok(appointment)
    }

    /// Book an arbitrary interval directly on the doctor's calendar (reception desk).
    #[instrument(skip(self, actor, request), fields(doctor_id = %request.doctor_id, start_at = %request.start_at))]
    pub async fn book_interval(
        &self,
        actor: &Actor,
        request: BookIntervalRequest,
    ) -> Result<Appointment, AppointmentError> {
        if !actor.role.is_staff() {
            return Err(AppointmentError::Forbidden(
                "Only reception or admin can book directly on the calendar".to_string(),
            ));
        }
        if !is_minute_aligned(&request.start_at) {
            return Err(AppointmentError::Validation(
                "Start time must fall on a whole minute".to_string(),
            ));
        }

        let template = self
            .store
            .get_template(request.doctor_id)
            .await?
            .ok_or_else(|| AppointmentError::Validation("Doctor has no availability template".to_string()))?;

        let duration = request.duration_minutes.unwrap_or(template.slot_duration_minutes);
        self.rules.validate_duration(duration)?;

        let interval = TimeInterval::starting_at(request.start_at, duration);
        if !template.covers(&interval) {
            return Err(AppointmentError::Validation(
                "Requested time is outside the doctor's open hours".to_string(),
            ));
        }

        let patient = self
            .resolve_patient(
                actor,
                PatientInput {
                    patient_id: request.patient_id,
                    patient_name: request.patient_name,
                    patient_email: request.patient_email,
                },
            )
            .await?;

        let mut appointment = Appointment::booked(request.doctor_id, &patient, request.start_at, duration, actor.id);
        appointment.reason = request.reason;

        let appointment = self.store.insert_appointment_exclusive(appointment).await?;
        info!(
            "Booked appointment {} for doctor {} from {} to {}",
            appointment.id, appointment.doctor_id, appointment.start_at, appointment.end_at
        );

        self.fanout.appointment_changed(ScheduleEvent::AppointmentCreated, &appointment).await;
        self.fanout.mail(NoticeKind::Created, &appointment);

        Ok(appointment)
    }

    /// Cancel an appointment and free its slot.
    ///
    /// Cancelling an already cancelled appointment succeeds and retries the slot
    /// release, which completes a cancellation that stopped half way.
    #[instrument(skip(self, actor, reason))]
    pub async fn cancel_appointment(
        &self,
        appointment_id: Uuid,
        actor: &Actor,
        reason: Option<String>,
    ) -> Result<Appointment, AppointmentError> {
        let appointment = self.lifecycle.load(appointment_id).await?;

        if !AppointmentLifecycleService::may_cancel(actor, &appointment) {
            return Err(AppointmentError::Forbidden(
                "Not authorized to cancel this appointment".to_string(),
            ));
        }

        if appointment.status == AppointmentStatus::Cancelled {
            debug!("Appointment {} already cancelled", appointment_id);
            self.lifecycle.release_slot(&appointment).await;
            return Ok(appointment);
        }

        if !appointment.status.can_transition_to(AppointmentStatus::Cancelled) {
            return Err(AppointmentError::InvalidTransition {
                from: appointment.status,
                to: AppointmentStatus::Cancelled,
            });
        }

        self.lifecycle.apply_cancellation(appointment, actor, reason).await
    }

    /// Explain why the atomic claim failed, from the slot's state after the fact.
    async fn lost_slot(&self, slot_id: Uuid, reason: String) -> AppointmentError {
        match self.slots.get_slot(slot_id).await {
            Ok(slot) if slot.status != SlotStatus::Available => {
                debug!("Slot {} taken concurrently ({})", slot_id, slot.status);
                AppointmentError::SlotUnavailable { status: slot.status }
            }
            Ok(_) => AppointmentError::Conflict(reason),
            Err(e) => e.into(),
        }
    }

    async fn resolve_patient(&self, actor: &Actor, input: PatientInput) -> Result<ResolvedPatient, AppointmentError> {
        let mut patient_id = input.patient_id;
        let mut email = input.patient_email.map(|e| e.trim().to_string()).filter(|e| !e.is_empty());
        let mut name = input.patient_name.map(|n| n.trim().to_string()).filter(|n| !n.is_empty());

        match actor.role {
            Role::Doctor => {
                return Err(AppointmentError::Forbidden("Doctors cannot create bookings".to_string()));
            }
            Role::Patient => {
                if patient_id.is_some_and(|id| id != actor.id) {
                    return Err(AppointmentError::Forbidden(
                        "Patients can only book for themselves".to_string(),
                    ));
                }
                patient_id = Some(actor.id);
                if email.is_none() {
                    email = actor.email.clone();
                }
            }
            Role::Reception | Role::Admin => {}
        }

        if patient_id.is_none() && email.is_none() {
            return Err(AppointmentError::Validation(
                "Either patient_id or patient_email is required".to_string(),
            ));
        }

        let account = self.lookup_account(patient_id, email.as_deref()).await;
        if let Some(account) = account {
            patient_id = patient_id.or(Some(account.id));
            email = email.or(Some(account.email));
            name = name.or(Some(account.name));
        }

        let email = email.ok_or_else(|| AppointmentError::Validation("patient_email is required".to_string()))?;
        if !self.is_valid_email(&email) {
            return Err(AppointmentError::Validation(format!("Invalid email address: {}", email)));
        }
        let name = name.ok_or_else(|| AppointmentError::Validation("patient_name is required".to_string()))?;

        Ok(ResolvedPatient { patient_id, name, email })
    }

    /// A failed lookup never blocks a booking; the patient is recorded anonymously instead.
    async fn lookup_account(&self, patient_id: Option<Uuid>, email: Option<&str>) -> Option<Account> {
        let result = match (patient_id, email) {
            (Some(id), _) => self.accounts.find_account(id).await,
            (None, Some(email)) => self.accounts.find_account_by_email(email).await,
            (None, None) => Ok(None),
        };

        match result {
            Ok(Some(account)) if patient_id.is_none() && account.role != Role::Patient => {
                debug!("Account {} is not a patient, booking anonymously", account.id);
                None
            }
            Ok(account) => account,
            Err(e) => {
                warn!("Account lookup failed, continuing without a patient account: {}", e);
                None
            }
        }
    }

    fn is_valid_email(&self, email: &str) -> bool {
        self.email_pattern
            .as_ref()
            .map_or(email.contains('@'), |pattern| pattern.is_match(email))
    }
}
