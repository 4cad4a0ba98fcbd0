// libs/appointment-cell/src/handlers.rs
use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use uuid::Uuid;

use availability_cell::{
    AddExceptionRequest, AvailabilityError, CreateSlotRequest, DateRange, SetSlotDurationRequest,
    SetWeeklyRulesRequest, SlotFilter, SlotStatus, TimeInterval,
};
use shared_models::auth::Actor;
use shared_models::error::AppError;

use crate::models::{
    BookIntervalRequest, BookSlotRequest, CancelAppointmentRequest, UpdateStatusRequest,
};
use crate::router::SchedulingState;

// ==============================================================================
// QUERY PARAMETER STRUCTS
// ==============================================================================

#[derive(Debug, Default, Deserialize)]
pub struct RangeQuery {
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl RangeQuery {
    /// `to` defaults to `from`; a lone `to` is rejected.
    pub fn to_range(&self) -> Result<Option<DateRange>, AppError> {
        match (self.from, self.to) {
            (None, None) => Ok(None),
            (Some(from), to) => Ok(Some(DateRange::new(from, to.unwrap_or(from)))),
            (None, Some(_)) => Err(AppError::ValidationError("`to` requires `from`".to_string())),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SlotListQuery {
    pub status: Option<SlotStatus>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Deserialize)]
pub struct DoctorAppointmentsQuery {
    pub date: Option<NaiveDate>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct MaterializeRequest {
    pub from: NaiveDate,
    pub to: NaiveDate,
}

fn require_staff(actor: &Actor) -> Result<(), AppError> {
    if actor.role.is_staff() {
        Ok(())
    } else {
        Err(AppError::Forbidden("Only reception or admin can manage schedules".to_string()))
    }
}

// ==============================================================================
// AVAILABILITY HANDLERS
// ==============================================================================

pub async fn get_template(
    State(state): State<SchedulingState>,
    Path(doctor_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let template = state.availability.get_template(doctor_id).await?;
    Ok(Json(json!({ "template": template })))
}

pub async fn set_weekly_rules(
    State(state): State<SchedulingState>,
    Extension(actor): Extension<Actor>,
    Path(doctor_id): Path<Uuid>,
    Json(request): Json<SetWeeklyRulesRequest>,
) -> Result<Json<Value>, AppError> {
    require_staff(&actor)?;
    let template = state.availability.set_weekly_rules(doctor_id, request.rules).await?;
    Ok(Json(json!({ "template": template })))
}

pub async fn add_exception(
    State(state): State<SchedulingState>,
    Extension(actor): Extension<Actor>,
    Path(doctor_id): Path<Uuid>,
    Json(request): Json<AddExceptionRequest>,
) -> Result<Json<Value>, AppError> {
    require_staff(&actor)?;
    let interval = TimeInterval::new(request.start_at, request.end_at);
    let template = state.availability.add_exception(doctor_id, interval, request.reason).await?;
    Ok(Json(json!({ "template": template })))
}

pub async fn set_slot_duration(
    State(state): State<SchedulingState>,
    Extension(actor): Extension<Actor>,
    Path(doctor_id): Path<Uuid>,
    Json(request): Json<SetSlotDurationRequest>,
) -> Result<Json<Value>, AppError> {
    require_staff(&actor)?;
    let template = state
        .availability
        .set_slot_duration(doctor_id, request.slot_duration_minutes)
        .await?;
    Ok(Json(json!({ "template": template })))
}

pub async fn preview_availability(
    State(state): State<SchedulingState>,
    Path(doctor_id): Path<Uuid>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<Value>, AppError> {
    let range = query
        .to_range()?
        .ok_or_else(|| AppError::ValidationError("`from` is required".to_string()))?;

    let intervals: Vec<TimeInterval> = state.queries.preview_free_intervals(doctor_id, range).await?.collect();
    Ok(Json(json!({
        "doctor_id": doctor_id,
        "from": range.from,
        "to": range.to,
        "intervals": intervals,
    })))
}

// ==============================================================================
// SLOT HANDLERS
// ==============================================================================

pub async fn list_slots(
    State(state): State<SchedulingState>,
    Path(doctor_id): Path<Uuid>,
    Query(query): Query<SlotListQuery>,
) -> Result<Json<Value>, AppError> {
    let filter = SlotFilter {
        status: query.status,
        from: query.from,
        to: query.to,
    };
    let slots = state.slots.list_slots(doctor_id, filter).await?;
    Ok(Json(json!({ "slots": slots, "total": slots.len() })))
}

pub async fn create_slot(
    State(state): State<SchedulingState>,
    Extension(actor): Extension<Actor>,
    Path(doctor_id): Path<Uuid>,
    Json(request): Json<CreateSlotRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    require_staff(&actor)?;

    let duration = match request.duration_minutes {
        Some(minutes) => minutes,
        None => match state.availability.get_template(doctor_id).await {
            Ok(template) => template.slot_duration_minutes,
            Err(AvailabilityError::NotFound(_)) => state.availability.rules().default_slot_minutes,
            Err(e) => return Err(e.into()),
        },
    };

    let slot = state.slots.create_slot(doctor_id, request.start_at, duration).await?;
    Ok((StatusCode::CREATED, Json(json!({ "slot": slot }))))
}

pub async fn materialize_slots(
    State(state): State<SchedulingState>,
    Extension(actor): Extension<Actor>,
    Path(doctor_id): Path<Uuid>,
    Json(request): Json<MaterializeRequest>,
) -> Result<Json<Value>, AppError> {
    require_staff(&actor)?;
    let report = state
        .slots
        .materialize(doctor_id, DateRange::new(request.from, request.to))
        .await?;
    Ok(Json(json!({ "report": report })))
}

pub async fn get_slot(
    State(state): State<SchedulingState>,
    Path(slot_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let slot = state.slots.get_slot(slot_id).await?;
    Ok(Json(json!({ "slot": slot })))
}

pub async fn withdraw_slot(
    State(state): State<SchedulingState>,
    Extension(actor): Extension<Actor>,
    Path(slot_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    require_staff(&actor)?;
    let slot = state.slots.withdraw(slot_id).await?;
    Ok(Json(json!({ "slot": slot })))
}

// ==============================================================================
// BOOKING HANDLERS
// ==============================================================================

pub async fn book_slot(
    State(state): State<SchedulingState>,
    Extension(actor): Extension<Actor>,
    Json(request): Json<BookSlotRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let appointment = state.booking.book_slot(&actor, request).await?;
    Ok((StatusCode::CREATED, Json(json!({ "appointment": appointment }))))
}

pub async fn book_interval(
    State(state): State<SchedulingState>,
    Extension(actor): Extension<Actor>,
    Json(request): Json<BookIntervalRequest>,
) -> Result<(StatusCode, Json<Value>), AppError> {
    let appointment = state.booking.book_interval(&actor, request).await?;
    Ok((StatusCode::CREATED, Json(json!({ "appointment": appointment }))))
}

pub async fn cancel_appointment(
    State(state): State<SchedulingState>,
    Extension(actor): Extension<Actor>,
    Path(appointment_id): Path<Uuid>,
    request: Option<Json<CancelAppointmentRequest>>,
) -> Result<Json<Value>, AppError> {
    let reason = request.and_then(|Json(body)| body.reason);
    let appointment = state.booking.cancel_appointment(appointment_id, &actor, reason).await?;
    Ok(Json(json!({ "appointment": appointment })))
}

pub async fn update_status(
    State(state): State<SchedulingState>,
    Extension(actor): Extension<Actor>,
    Path(appointment_id): Path<Uuid>,
    Json(request): Json<UpdateStatusRequest>,
) -> Result<Json<Value>, AppError> {
    let appointment = state
        .lifecycle
        .set_status(appointment_id, request.status, &actor, request.notes)
        .await?;
    Ok(Json(json!({ "appointment": appointment })))
}

// ==============================================================================
// LISTING HANDLERS
// ==============================================================================

pub async fn get_appointment(
    State(state): State<SchedulingState>,
    Extension(actor): Extension<Actor>,
    Path(appointment_id): Path<Uuid>,
) -> Result<Json<Value>, AppError> {
    let appointment = state.queries.get_appointment(&actor, appointment_id).await?;
    Ok(Json(json!({ "appointment": appointment })))
}

pub async fn list_my_appointments(
    State(state): State<SchedulingState>,
    Extension(actor): Extension<Actor>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<Value>, AppError> {
    let appointments = state.queries.list_for_actor(&actor, query.to_range()?).await?;
    Ok(Json(json!({ "appointments": appointments, "total": appointments.len() })))
}

pub async fn get_doctor_appointments(
    State(state): State<SchedulingState>,
    Extension(actor): Extension<Actor>,
    Path(doctor_id): Path<Uuid>,
    Query(query): Query<DoctorAppointmentsQuery>,
) -> Result<Json<Value>, AppError> {
    let appointments = match query.date {
        Some(day) => state.queries.doctor_schedule(&actor, doctor_id, day).await?,
        None => {
            let range = RangeQuery { from: query.from, to: query.to }.to_range()?;
            state.queries.list_by_doctor(&actor, doctor_id, range).await?
        }
    };
    Ok(Json(json!({ "appointments": appointments, "total": appointments.len() })))
}

pub async fn get_patient_appointments(
    State(state): State<SchedulingState>,
    Extension(actor): Extension<Actor>,
    Path(patient_id): Path<Uuid>,
    Query(query): Query<RangeQuery>,
) -> Result<Json<Value>, AppError> {
    let appointments = state
        .queries
        .list_by_patient(&actor, patient_id, query.to_range()?)
        .await?;
    Ok(Json(json!({ "appointments": appointments, "total": appointments.len() })))
}
