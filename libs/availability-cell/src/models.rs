use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use shared_config::AppConfig;
use shared_models::error::AppError;

// ==============================================================================
// AVAILABILITY TEMPLATE
// ==============================================================================

/// Recurring open hours for one weekday. Times are interpreted in UTC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyRule {
    pub day_of_week: i32, // 0 = Sunday, 1 = Monday, etc.
    pub open_time: NaiveTime,
    pub close_time: NaiveTime,
}

impl WeeklyRule {
    pub fn new(day_of_week: i32, open_time: NaiveTime, close_time: NaiveTime) -> Self {
        Self { day_of_week, open_time, close_time }
    }
}

/// A closed period that overrides the weekly rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityException {
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub reason: Option<String>,
}

impl AvailabilityException {
    pub fn interval(&self) -> TimeInterval {
        TimeInterval::new(self.start_at, self.end_at)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityTemplate {
    pub doctor_id: Uuid,
    #[serde(default)]
    pub weekly_rules: Vec<WeeklyRule>,
    #[serde(default)]
    pub exceptions: Vec<AvailabilityException>,
    pub slot_duration_minutes: i32,
    pub updated_at: DateTime<Utc>,
}

impl AvailabilityTemplate {
    pub fn new(doctor_id: Uuid, slot_duration_minutes: i32) -> Self {
        Self {
            doctor_id,
            weekly_rules: Vec::new(),
            exceptions: Vec::new(),
            slot_duration_minutes,
            updated_at: Utc::now(),
        }
    }

    pub fn rules_for(&self, day_of_week: i32) -> impl Iterator<Item = &WeeklyRule> {
        self.weekly_rules.iter().filter(move |rule| rule.day_of_week == day_of_week)
    }

    /// True when `interval` lies inside one weekly rule of its day and clear of every exception.
    pub fn covers(&self, interval: &TimeInterval) -> bool {
        let day = interval.start_at.date_naive();
        if interval.end_at > day_start(day) + Duration::days(1) {
            return false;
        }

        let inside_rule = self.rules_for(day_of_week(day)).any(|rule| {
            day.and_time(rule.open_time).and_utc() <= interval.start_at
                && interval.end_at <= day.and_time(rule.close_time).and_utc()
        });

        inside_rule && !self.exceptions.iter().any(|e| e.interval().overlaps(interval))
    }
}

// ==============================================================================
// TIME PRIMITIVES
// ==============================================================================

/// Half-open interval `[start_at, end_at)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeInterval {
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
}

impl TimeInterval {
    pub fn new(start_at: DateTime<Utc>, end_at: DateTime<Utc>) -> Self {
        Self { start_at, end_at }
    }

    pub fn starting_at(start_at: DateTime<Utc>, duration_minutes: i32) -> Self {
        Self::new(start_at, start_at + Duration::minutes(duration_minutes as i64))
    }

    pub fn overlaps(&self, other: &TimeInterval) -> bool {
        self.start_at < other.end_at && other.start_at < self.end_at
    }

    pub fn is_empty(&self) -> bool {
        self.start_at >= self.end_at
    }
}

/// Inclusive range of calendar days (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

impl DateRange {
    pub fn new(from: NaiveDate, to: NaiveDate) -> Self {
        Self { from, to }
    }

    pub fn single(day: NaiveDate) -> Self {
        Self::new(day, day)
    }

    pub fn num_days(&self) -> i64 {
        (self.to - self.from).num_days() + 1
    }

    /// The range as instants: midnight of `from` up to midnight after `to`.
    pub fn to_interval(&self) -> TimeInterval {
        TimeInterval::new(day_start(self.from), day_start(self.to) + Duration::days(1))
    }
}

pub fn day_of_week(day: NaiveDate) -> i32 {
    day.weekday().num_days_from_sunday() as i32
}

pub fn day_start(day: NaiveDate) -> DateTime<Utc> {
    day.and_time(NaiveTime::MIN).and_utc()
}

pub fn is_minute_aligned(instant: &DateTime<Utc>) -> bool {
    instant.second() == 0 && instant.nanosecond() == 0
}

// ==============================================================================
// SLOTS
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotStatus {
    Available,
    Booked,
    Cancelled,
}

impl SlotStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotStatus::Available => "available",
            SlotStatus::Booked => "booked",
            SlotStatus::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Patient details cached on a booked slot for the reception board.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatientSnapshot {
    pub name: String,
    pub email: String,
    pub patient_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    pub id: Uuid,
    pub doctor_id: Uuid,
    pub start_at: DateTime<Utc>,
    pub duration_minutes: i32,
    pub status: SlotStatus,
    pub appointment_id: Option<Uuid>,
    pub patient: Option<PatientSnapshot>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Slot {
    pub fn available(doctor_id: Uuid, start_at: DateTime<Utc>, duration_minutes: i32) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            doctor_id,
            start_at,
            duration_minutes,
            status: SlotStatus::Available,
            appointment_id: None,
            patient: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn end_at(&self) -> DateTime<Utc> {
        self.start_at + Duration::minutes(self.duration_minutes as i64)
    }

    pub fn interval(&self) -> TimeInterval {
        TimeInterval::new(self.start_at, self.end_at())
    }

    pub fn is_available(&self) -> bool {
        self.status == SlotStatus::Available
    }
}

/// Conditional slot mutation. Storage applies it only while the slot still has
/// `expected_status` (and, when set, is still linked to `expected_appointment`).
#[derive(Debug, Clone, PartialEq)]
pub struct SlotUpdate {
    pub expected_status: SlotStatus,
    pub expected_appointment: Option<Uuid>,
    pub status: SlotStatus,
    pub appointment_id: Option<Uuid>,
    pub patient: Option<PatientSnapshot>,
}

impl SlotUpdate {
    pub fn book(appointment_id: Uuid, patient: PatientSnapshot) -> Self {
        Self {
            expected_status: SlotStatus::Available,
            expected_appointment: None,
            status: SlotStatus::Booked,
            appointment_id: Some(appointment_id),
            patient: Some(patient),
        }
    }

    /// Only the appointment holding the slot can give it back.
    pub fn release(appointment_id: Uuid) -> Self {
        Self {
            expected_status: SlotStatus::Booked,
            expected_appointment: Some(appointment_id),
            status: SlotStatus::Available,
            appointment_id: None,
            patient: None,
        }
    }

    pub fn withdraw() -> Self {
        Self {
            expected_status: SlotStatus::Available,
            expected_appointment: None,
            status: SlotStatus::Cancelled,
            appointment_id: None,
            patient: None,
        }
    }

    /// Apply to an in-memory slot if the precondition holds.
    pub fn apply(&self, slot: &mut Slot) -> bool {
        if slot.status != self.expected_status {
            return false;
        }
        if self.expected_appointment.is_some() && slot.appointment_id != self.expected_appointment {
            return false;
        }

        slot.status = self.status;
        slot.appointment_id = self.appointment_id;
        slot.patient = self.patient.clone();
        slot.updated_at = Utc::now();
        true
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlotFilter {
    pub status: Option<SlotStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl SlotFilter {
    pub fn with_status(status: SlotStatus) -> Self {
        Self { status: Some(status), ..Self::default() }
    }

    pub fn matches(&self, slot: &Slot) -> bool {
        self.status.map_or(true, |status| slot.status == status)
            && self.from.map_or(true, |from| slot.start_at >= from)
            && self.to.map_or(true, |to| slot.start_at < to)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterializeReport {
    pub created: usize,
    pub skipped: usize,
}

// ==============================================================================
// REQUESTS
// ==============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct SetWeeklyRulesRequest {
    pub rules: Vec<WeeklyRule>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddExceptionRequest {
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SetSlotDurationRequest {
    pub slot_duration_minutes: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSlotRequest {
    pub start_at: DateTime<Utc>,
    pub duration_minutes: Option<i32>,
}

// ==============================================================================
// VALIDATION RULES
// ==============================================================================

#[derive(Debug, Clone)]
pub struct SchedulingRules {
    pub default_slot_minutes: i32,
    pub min_slot_minutes: i32,
    pub max_slot_minutes: i32,
    pub max_range_days: i64,
}

impl Default for SchedulingRules {
    fn default() -> Self {
        Self {
            default_slot_minutes: 15,
            min_slot_minutes: 5,
            max_slot_minutes: 240,
            max_range_days: 92,
        }
    }
}

impl SchedulingRules {
    pub fn from_config(config: &AppConfig) -> Self {
        let defaults = Self::default();
        let default_slot_minutes = config
            .default_slot_duration_minutes
            .clamp(defaults.min_slot_minutes, defaults.max_slot_minutes);

        Self { default_slot_minutes, ..defaults }
    }

    pub fn validate_duration(&self, minutes: i32) -> Result<(), AvailabilityError> {
        if minutes < self.min_slot_minutes || minutes > self.max_slot_minutes {
            return Err(AvailabilityError::Validation(format!(
                "Slot duration must be between {} and {} minutes",
                self.min_slot_minutes, self.max_slot_minutes
            )));
        }
        Ok(())
    }

    pub fn validate_range(&self, range: &DateRange) -> Result<(), AvailabilityError> {
        if range.to < range.from {
            return Err(AvailabilityError::Validation("Range end is before its start".to_string()));
        }
        if range.num_days() > self.max_range_days {
            return Err(AvailabilityError::Validation(format!(
                "Date range may span at most {} days",
                self.max_range_days
            )));
        }
        Ok(())
    }
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AvailabilityError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Slot is {status}")]
    SlotUnavailable { status: SlotStatus },

    #[error("Database error: {0}")]
    Database(String),
}

impl From<AvailabilityError> for AppError {
    fn from(error: AvailabilityError) -> Self {
        match error {
            AvailabilityError::Validation(msg) => AppError::ValidationError(msg),
            AvailabilityError::NotFound(what) => AppError::NotFound(format!("{} not found", what)),
            AvailabilityError::Conflict(msg) => AppError::Conflict(msg),
            AvailabilityError::SlotUnavailable { status } => {
                AppError::Conflict(format!("Slot is {}", status))
            }
            AvailabilityError::Database(msg) => AppError::Database(msg),
        }
    }
}
