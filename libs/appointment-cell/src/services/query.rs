use std::sync::Arc;

use chrono::NaiveDate;
use tracing::debug;
use uuid::Uuid;

use availability_cell::{AvailabilityService, DateRange, FreeIntervals, SchedulingRules, TimeInterval};
use shared_models::auth::{Actor, Role};

use crate::models::{Appointment, AppointmentError, AppointmentQuery, AppointmentScope, AppointmentStatus};
use crate::services::lifecycle::AppointmentLifecycleService;
use crate::store::AppointmentStore;

/// Role-scoped reads over appointments plus the appointment-aware availability preview.
pub struct AppointmentQueryService {
    store: Arc<dyn AppointmentStore>,
    availability: AvailabilityService<dyn AppointmentStore>,
    rules: SchedulingRules,
}

pub fn busy_intervals(appointments: &[Appointment]) -> Vec<TimeInterval> {
    appointments
        .iter()
        .filter(|appointment| appointment.status != AppointmentStatus::Cancelled)
        .map(Appointment::interval)
        .collect()
}

impl AppointmentQueryService {
    pub fn new(store: Arc<dyn AppointmentStore>, rules: SchedulingRules) -> Self {
        Self {
            availability: AvailabilityService::new(Arc::clone(&store), rules.clone()),
            store,
            rules,
        }
    }

    pub async fn get_appointment(&self, actor: &Actor, appointment_id: Uuid) -> Result<Appointment, AppointmentError> {
        let appointment = self
            .store
            .get_appointment(appointment_id)
            .await?
            .ok_or_else(|| AppointmentError::NotFound("Appointment".to_string()))?;

        if !AppointmentLifecycleService::may_view(actor, &appointment) {
            return Err(AppointmentError::Forbidden("Not authorized to view this appointment".to_string()));
        }
        Ok(appointment)
    }

    /// "My appointments": a patient's bookings, a doctor's calendar, or everything for staff.
    pub async fn list_for_actor(
        &self,
        actor: &Actor,
        range: Option<DateRange>,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let scope = match actor.role {
            Role::Patient => AppointmentScope::Patient {
                patient_id: actor.id,
                email: actor.email.clone(),
            },
            Role::Doctor => AppointmentScope::Doctor(actor.id),
            Role::Reception | Role::Admin => AppointmentScope::All,
        };

        self.list(AppointmentQuery::new(scope), range).await
    }

    pub async fn list_by_doctor(
        &self,
        actor: &Actor,
        doctor_id: Uuid,
        range: Option<DateRange>,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        match actor.role {
            Role::Reception | Role::Admin => {}
            Role::Doctor if actor.id == doctor_id => {}
            _ => {
                return Err(AppointmentError::Forbidden(
                    "Not authorized to view this doctor's appointments".to_string(),
                ))
            }
        }

        self.list(AppointmentQuery::new(AppointmentScope::Doctor(doctor_id)), range).await
    }

    /// A patient's appointments. Doctors only see the ones on their own calendar.
    pub async fn list_by_patient(
        &self,
        actor: &Actor,
        patient_id: Uuid,
        range: Option<DateRange>,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let email = match actor.role {
            Role::Patient if actor.id != patient_id => {
                return Err(AppointmentError::Forbidden(
                    "Patients can only view their own appointments".to_string(),
                ))
            }
            Role::Patient => actor.email.clone(),
            _ => None,
        };

        let query = AppointmentQuery::new(AppointmentScope::Patient { patient_id, email });
        let mut appointments = self.list(query, range).await?;
        if actor.role == Role::Doctor {
            appointments.retain(|appointment| appointment.doctor_id == actor.id);
        }
        Ok(appointments)
    }

    /// One doctor's day, cancelled appointments excluded.
    pub async fn doctor_schedule(
        &self,
        actor: &Actor,
        doctor_id: Uuid,
        day: NaiveDate,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let mut appointments = self.list_by_doctor(actor, doctor_id, Some(DateRange::single(day))).await?;
        appointments.retain(|appointment| appointment.status != AppointmentStatus::Cancelled);
        Ok(appointments)
    }

    /// Free intervals of the doctor's template over `range`, minus booked time.
    pub async fn preview_free_intervals(
        &self,
        doctor_id: Uuid,
        range: DateRange,
    ) -> Result<FreeIntervals, AppointmentError> {
        self.rules.validate_range(&range)?;

        let query = AppointmentQuery::new(AppointmentScope::Doctor(doctor_id))
            .within(range.to_interval())
            .active_only();
        let appointments = self.store.list_appointments(query).await?;
        debug!("Preview for doctor {} sees {} busy appointments", doctor_id, appointments.len());

        Ok(self
            .availability
            .preview_free_intervals(doctor_id, range, busy_intervals(&appointments))
            .await?)
    }

    async fn list(
        &self,
        query: AppointmentQuery,
        range: Option<DateRange>,
    ) -> Result<Vec<Appointment>, AppointmentError> {
        let query = match range {
            Some(range) => {
                self.rules.validate_range(&range)?;
                query.within(range.to_interval())
            }
            None => query,
        };

        self.store.list_appointments(query).await
    }
}
