// libs/appointment-cell/src/models.rs
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use availability_cell::{AvailabilityError, PatientSnapshot, SlotStatus, TimeInterval};
use shared_database::DatabaseError;
use shared_models::auth::{Actor, Role};
use shared_models::error::AppError;

// ==============================================================================
// CORE APPOINTMENT MODELS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appointment {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub patient_id: Option<Uuid>,
    pub patient_name: String,
    pub patient_email: String,
    pub slot_id: Option<Uuid>,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub duration_minutes: i32,
    pub status: AppointmentStatus,
    pub reason: Option<String>,
    pub notes: Option<String>,
    pub created_by: Uuid,
    pub cancelled_by: Option<Uuid>,
    pub cancelled_reason: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Appointment {
    pub fn booked(
        doctor_id: Uuid,
        patient: &ResolvedPatient,
        start_at: DateTime<Utc>,
        duration_minutes: i32,
        created_by: Uuid,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            doctor_id,
            patient_id: patient.patient_id,
            patient_name: patient.name.clone(),
            patient_email: patient.email.clone(),
            slot_id: None,
            start_at,
            end_at: start_at + Duration::minutes(duration_minutes as i64),
            duration_minutes,
            status: AppointmentStatus::Booked,
            reason: None,
            notes: None,
            created_by,
            cancelled_by: None,
            cancelled_reason: None,
            cancelled_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn interval(&self) -> TimeInterval {
        TimeInterval::new(self.start_at, self.end_at)
    }

    /// Identity rule for "my appointments": the patient id wins when recorded,
    /// otherwise the email is compared case-insensitively.
    pub fn belongs_to_patient(&self, patient_id: Uuid, email: Option<&str>) -> bool {
        match self.patient_id {
            Some(id) => id == patient_id,
            None => email.map_or(false, |email| self.patient_email.eq_ignore_ascii_case(email)),
        }
    }

    pub fn is_for_patient(&self, actor: &Actor) -> bool {
        self.belongs_to_patient(actor.id, actor.email.as_deref())
    }

    pub fn is_with_doctor(&self, actor: &Actor) -> bool {
        self.doctor_id == actor.id
    }

    pub fn cancellation(&self) -> Option<Cancellation> {
        match (self.cancelled_by, self.cancelled_at) {
            (Some(cancelled_by), Some(cancelled_at)) => Some(Cancellation {
                cancelled_by,
                cancelled_reason: self.cancelled_reason.clone(),
                cancelled_at,
            }),
            _ => None,
        }
    }

    pub fn patient_snapshot(&self) -> PatientSnapshot {
        PatientSnapshot {
            name: self.patient_name.clone(),
            email: self.patient_email.clone(),
            patient_id: self.patient_id,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AppointmentStatus {
    Booked,
    Arrived,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Booked => "booked",
            AppointmentStatus::Arrived => "arrived",
            AppointmentStatus::InProgress => "in_progress",
            AppointmentStatus::Completed => "completed",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::NoShow => "no_show",
        }
    }

    /// All statuses reachable in one step.
    pub fn valid_transitions(&self) -> &'static [AppointmentStatus] {
        match self {
            AppointmentStatus::Booked => &[AppointmentStatus::Arrived, AppointmentStatus::Cancelled],
            AppointmentStatus::Arrived => &[
                AppointmentStatus::InProgress,
                AppointmentStatus::Cancelled,
                AppointmentStatus::NoShow,
            ],
            AppointmentStatus::InProgress => &[AppointmentStatus::Completed, AppointmentStatus::NoShow],
            // Terminal states - no transitions allowed
            AppointmentStatus::Completed | AppointmentStatus::Cancelled | AppointmentStatus::NoShow => &[],
        }
    }

    pub fn can_transition_to(&self, next: AppointmentStatus) -> bool {
        self.valid_transitions().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        self.valid_transitions().is_empty()
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cancellation {
    pub cancelled_by: Uuid,
    pub cancelled_reason: Option<String>,
    pub cancelled_at: DateTime<Utc>,
}

/// Conditional status write, applied only while the appointment still has the expected status.
#[derive(Debug, Clone, PartialEq)]
pub struct StatusChange {
    pub expected: AppointmentStatus,
    pub status: AppointmentStatus,
    pub notes: Option<String>,
    pub cancellation: Option<Cancellation>,
}

impl StatusChange {
    pub fn to(expected: AppointmentStatus, status: AppointmentStatus, notes: Option<String>) -> Self {
        Self { expected, status, notes, cancellation: None }
    }

    pub fn cancel(expected: AppointmentStatus, cancelled_by: Uuid, reason: Option<String>) -> Self {
        Self {
            expected,
            status: AppointmentStatus::Cancelled,
            notes: None,
            cancellation: Some(Cancellation {
                cancelled_by,
                cancelled_reason: reason,
                cancelled_at: Utc::now(),
            }),
        }
    }

    pub fn apply(&self, appointment: &mut Appointment) -> bool {
        if appointment.status != self.expected {
            return false;
        }

        appointment.status = self.status;
        if let Some(notes) = &self.notes {
            appointment.notes = Some(notes.clone());
        }
        if let Some(cancellation) = &self.cancellation {
            appointment.cancelled_by = Some(cancellation.cancelled_by);
            appointment.cancelled_reason = cancellation.cancelled_reason.clone();
            appointment.cancelled_at = Some(cancellation.cancelled_at);
        }
        appointment.updated_at = Utc::now();
        true
    }
}

// ==============================================================================
// PATIENTS & ACCOUNTS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub role: Role,
}

/// Who an appointment is for, after account lookup.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedPatient {
    pub patient_id: Option<Uuid>,
    pub name: String,
    pub email: String,
}

// ==============================================================================
// REQUEST MODELS
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct BookSlotRequest {
    pub doctor_id: Uuid,
    pub start_at: DateTime<Utc>,
    pub patient_id: Option<Uuid>,
    pub patient_name: Option<String>,
    pub patient_email: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BookIntervalRequest {
    pub doctor_id: Uuid,
    pub start_at: DateTime<Utc>,
    pub duration_minutes: Option<i32>,
    pub patient_id: Option<Uuid>,
    pub patient_name: Option<String>,
    pub patient_email: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CancelAppointmentRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: AppointmentStatus,
    pub notes: Option<String>,
}

// ==============================================================================
// QUERY MODELS
// ==============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum AppointmentScope {
    All,
    Doctor(Uuid),
    Patient { patient_id: Uuid, email: Option<String> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct AppointmentQuery {
    pub scope: AppointmentScope,
    pub window: Option<TimeInterval>,
    pub include_cancelled: bool,
}

impl AppointmentQuery {
    pub fn new(scope: AppointmentScope) -> Self {
        Self { scope, window: None, include_cancelled: true }
    }

    pub fn within(mut self, window: TimeInterval) -> Self {
        self.window = Some(window);
        self
    }

    pub fn active_only(mut self) -> Self {
        self.include_cancelled = false;
        self
    }

    pub fn matches(&self, appointment: &Appointment) -> bool {
        let in_scope = match &self.scope {
            AppointmentScope::All => true,
            AppointmentScope::Doctor(doctor_id) => appointment.doctor_id == *doctor_id,
            AppointmentScope::Patient { patient_id, email } => {
                appointment.belongs_to_patient(*patient_id, email.as_deref())
            }
        };

        in_scope
            && (self.include_cancelled || appointment.status != AppointmentStatus::Cancelled)
            && self.window.map_or(true, |window| window.overlaps(&appointment.interval()))
    }
}

// ==============================================================================
// ERROR TYPES
// ==============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AppointmentError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("No slot exists at the requested time")]
    NoSuchSlot,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Slot no longer available (currently {status})")]
    SlotUnavailable { status: SlotStatus },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Cannot move appointment from {from} to {to}")]
    InvalidTransition {
        from: AppointmentStatus,
        to: AppointmentStatus,
    },

    #[error("Database error: {0}")]
    Database(String),
}

impl From<AvailabilityError> for AppointmentError {
    fn from(error: AvailabilityError) -> Self {
        match error {
            AvailabilityError::Validation(msg) => AppointmentError::Validation(msg),
            AvailabilityError::NotFound(what) => AppointmentError::NotFound(what),
            AvailabilityError::Conflict(msg) => AppointmentError::Conflict(msg),
            AvailabilityError::SlotUnavailable { status } => AppointmentError::SlotUnavailable { status },
            AvailabilityError::Database(msg) => AppointmentError::Database(msg),
        }
    }
}

impl From<DatabaseError> for AppointmentError {
    fn from(error: DatabaseError) -> Self {
        if error.is_write_conflict() {
            return AppointmentError::Conflict(error.to_string());
        }
        match error {
            DatabaseError::NotFound(what) => AppointmentError::NotFound(what),
            other => AppointmentError::Database(other.to_string()),
        }
    }
}

impl From<AppointmentError> for AppError {
    fn from(error: AppointmentError) -> Self {
        match error {
            AppointmentError::Validation(msg) => AppError::ValidationError(msg),
            AppointmentError::NotFound(what) => AppError::NotFound(format!("{} not found", what)),
            AppointmentError::NoSuchSlot => AppError::NotFound("No slot exists at the requested time".to_string()),
            AppointmentError::Conflict(_) | AppointmentError::SlotUnavailable { .. } => {
                AppError::Conflict("Slot no longer available, please refresh".to_string())
            }
            AppointmentError::Forbidden(msg) => AppError::Forbidden(msg),
            e @ AppointmentError::InvalidTransition { .. } => AppError::Conflict(e.to_string()),
            AppointmentError::Database(msg) => AppError::Database(msg),
        }
    }
}
