use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::debug;
use uuid::Uuid;

use availability_cell::{
    AvailabilityError, AvailabilityTemplate, ScheduleStore, Slot, SlotFilter, SlotUpdate,
};
use shared_config::AppConfig;
use shared_database::{DatabaseError, SupabaseClient};

use crate::models::{
    Account, Appointment, AppointmentError, AppointmentQuery, AppointmentScope, StatusChange,
};
use crate::store::{AccountDirectory, AppointmentStore};

const PROFILE_COLUMNS: &str = "id,name:full_name,email,role";

/// PostgREST-backed storage. Atomic multi-row writes run as RPC functions and
/// status changes are PATCHes filtered on the expected status.
pub struct SupabaseStore {
    supabase: SupabaseClient,
}

#[derive(Debug, Deserialize)]
struct BookedRow {
    appointment: Appointment,
    slot: Slot,
}

impl SupabaseStore {
    pub fn new(config: &AppConfig) -> Self {
        Self {
            supabase: SupabaseClient::new(config),
        }
    }

    async fn select<T: serde::de::DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, DatabaseError> {
        self.supabase.request(Method::GET, path, None, None).await
    }
}

fn timestamp(instant: &DateTime<Utc>) -> String {
    urlencoding::encode(&instant.to_rfc3339_opts(SecondsFormat::Millis, true)).into_owned()
}

fn schedule_error(error: DatabaseError) -> AvailabilityError {
    match error {
        DatabaseError::UniqueViolation(msg) => AvailabilityError::Conflict(msg),
        DatabaseError::NotFound(what) => AvailabilityError::NotFound(what),
        other => AvailabilityError::Database(other.to_string()),
    }
}

fn slot_update_filter(slot_id: Uuid, update: &SlotUpdate) -> String {
    let mut filter = format!("id=eq.{}&status=eq.{}", slot_id, update.expected_status);
    if let Some(appointment_id) = update.expected_appointment {
        filter.push_str(&format!("&appointment_id=eq.{}", appointment_id));
    }
    filter
}

fn appointment_filter(query: &AppointmentQuery) -> String {
    let mut filters = vec!["select=*".to_string()];

    match &query.scope {
        AppointmentScope::All => {}
        AppointmentScope::Doctor(doctor_id) => filters.push(format!("doctor_id=eq.{}", doctor_id)),
        AppointmentScope::Patient { patient_id, email: Some(email) } => filters.push(format!(
            "or=(patient_id.eq.{},and(patient_id.is.null,patient_email.ilike.{}))",
            patient_id,
            urlencoding::encode(email)
        )),
        AppointmentScope::Patient { patient_id, email: None } => {
            filters.push(format!("patient_id=eq.{}", patient_id))
        }
    }

    if let Some(window) = query.window {
        filters.push(format!("start_at=lt.{}", timestamp(&window.end_at)));
        filters.push(format!("end_at=gt.{}", timestamp(&window.start_at)));
    }
    if !query.include_cancelled {
        filters.push("status=neq.cancelled".to_string());
    }
    filters.push("order=start_at.asc".to_string());

    filters.join("&")
}

#[async_trait]
impl ScheduleStore for SupabaseStore {
    async fn get_template(&self, doctor_id: Uuid) -> Result<Option<AvailabilityTemplate>, AvailabilityError> {
        let path = format!("/rest/v1/availability_templates?doctor_id=eq.{}&select=*", doctor_id);
        let rows: Vec<AvailabilityTemplate> = self.select(&path).await.map_err(schedule_error)?;
        Ok(rows.into_iter().next())
    }

    async fn save_template(&self, template: AvailabilityTemplate) -> Result<AvailabilityTemplate, AvailabilityError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "Prefer",
            HeaderValue::from_static("resolution=merge-duplicates,return=representation"),
        );

        let body = serde_json::to_value(&template)
            .map_err(|e| AvailabilityError::Database(e.to_string()))?;
        let rows: Vec<AvailabilityTemplate> = self
            .supabase
            .request_with_headers(
                Method::POST,
                "/rest/v1/availability_templates?on_conflict=doctor_id",
                None,
                Some(body),
                Some(headers),
            )
            .await
            .map_err(schedule_error)?;

        rows.into_iter()
            .next()
            .ok_or_else(|| AvailabilityError::Database("Template upsert returned no rows".to_string()))
    }

    async fn insert_slot(&self, slot: Slot) -> Result<Slot, AvailabilityError> {
        let body = serde_json::to_value(&slot).map_err(|e| AvailabilityError::Database(e.to_string()))?;
        let rows: Vec<Slot> = self
            .supabase
            .insert_returning("slots", body, None)
            .await
            .map_err(schedule_error)?;

        rows.into_iter()
            .next()
            .ok_or_else(|| AvailabilityError::Database("Slot insert returned no rows".to_string()))
    }

    async fn get_slot(&self, slot_id: Uuid) -> Result<Option<Slot>, AvailabilityError> {
        let path = format!("/rest/v1/slots?id=eq.{}&select=*", slot_id);
        let rows: Vec<Slot> = self.select(&path).await.map_err(schedule_error)?;
        Ok(rows.into_iter().next())
    }

    async fn find_slot(&self, doctor_id: Uuid, start_at: DateTime<Utc>) -> Result<Option<Slot>, AvailabilityError> {
        let path = format!(
            "/rest/v1/slots?doctor_id=eq.{}&start_at=eq.{}&select=*",
            doctor_id,
            timestamp(&start_at)
        );
        let rows: Vec<Slot> = self.select(&path).await.map_err(schedule_error)?;
        Ok(rows.into_iter().next())
    }

    async fn list_slots(&self, doctor_id: Uuid, filter: SlotFilter) -> Result<Vec<Slot>, AvailabilityError> {
        let mut path = format!("/rest/v1/slots?doctor_id=eq.{}&select=*", doctor_id);
        if let Some(status) = filter.status {
            path.push_str(&format!("&status=eq.{}", status));
        }
        if let Some(from) = filter.from {
            path.push_str(&format!("&start_at=gte.{}", timestamp(&from)));
        }
        if let Some(to) = filter.to {
            path.push_str(&format!("&start_at=lt.{}", timestamp(&to)));
        }
        path.push_str("&order=start_at.asc");

        self.select(&path).await.map_err(schedule_error)
    }

    async fn update_slot(&self, slot_id: Uuid, update: SlotUpdate) -> Result<Option<Slot>, AvailabilityError> {
        let body = json!({
            "status": update.status,
            "appointment_id": update.appointment_id,
            "patient": update.patient,
            "updated_at": Utc::now(),
        });

        let rows: Vec<Slot> = self
            .supabase
            .patch_returning("slots", &slot_update_filter(slot_id, &update), body, None)
            .await
            .map_err(schedule_error)?;

        if rows.is_empty() {
            debug!("Slot {} did not match {:?}", slot_id, update.expected_status);
        }
        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl AppointmentStore for SupabaseStore {
    async fn book_slot(&self, slot_id: Uuid, mut appointment: Appointment) -> Result<(Appointment, Slot), AppointmentError> {
        appointment.slot_id = Some(slot_id);
        let args = json!({
            "p_slot_id": slot_id,
            "p_appointment": appointment,
        });

        let row: BookedRow = self.supabase.rpc("book_slot", args, None).await?;
        Ok((row.appointment, row.slot))
    }

    async fn insert_appointment_exclusive(&self, appointment: Appointment) -> Result<Appointment, AppointmentError> {
        let args = json!({ "p_appointment": appointment });
        Ok(self.supabase.rpc("book_interval", args, None).await?)
    }

    async fn get_appointment(&self, appointment_id: Uuid) -> Result<Option<Appointment>, AppointmentError> {
        let path = format!("/rest/v1/appointments?id=eq.{}&select=*", appointment_id);
        let rows: Vec<Appointment> = self.select(&path).await?;
        Ok(rows.into_iter().next())
    }

    async fn update_appointment_status(
        &self,
        appointment_id: Uuid,
        change: StatusChange,
    ) -> Result<Option<Appointment>, AppointmentError> {
        let mut body = Map::new();
        body.insert("status".to_string(), json!(change.status));
        body.insert("updated_at".to_string(), json!(Utc::now()));
        if let Some(notes) = &change.notes {
            body.insert("notes".to_string(), json!(notes));
        }
        if let Some(cancellation) = &change.cancellation {
            body.insert("cancelled_by".to_string(), json!(cancellation.cancelled_by));
            body.insert("cancelled_reason".to_string(), json!(cancellation.cancelled_reason));
            body.insert("cancelled_at".to_string(), json!(cancellation.cancelled_at));
        }

        let filter = format!("id=eq.{}&status=eq.{}", appointment_id, change.expected);
        let rows: Vec<Appointment> = self
            .supabase
            .patch_returning("appointments", &filter, Value::Object(body), None)
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn list_appointments(&self, query: AppointmentQuery) -> Result<Vec<Appointment>, AppointmentError> {
        let path = format!("/rest/v1/appointments?{}", appointment_filter(&query));
        let mut rows: Vec<Appointment> = self.select(&path).await?;

        // ilike treats `_` and `%` as wildcards, so re-check the identity rule exactly.
        rows.retain(|appointment| query.matches(appointment));
        Ok(rows)
    }
}

#[async_trait]
impl AccountDirectory for SupabaseStore {
    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, AppointmentError> {
        let path = format!(
            "/rest/v1/profiles?email=ilike.{}&select={}",
            urlencoding::encode(email.trim()),
            PROFILE_COLUMNS
        );
        let rows: Vec<Account> = self.select(&path).await?;
        Ok(rows
            .into_iter()
            .find(|account| account.email.eq_ignore_ascii_case(email.trim())))
    }

    async fn find_account(&self, account_id: Uuid) -> Result<Option<Account>, AppointmentError> {
        let path = format!("/rest/v1/profiles?id=eq.{}&select={}", account_id, PROFILE_COLUMNS);
        let rows: Vec<Account> = self.select(&path).await?;
        Ok(rows.into_iter().next())
    }
}
