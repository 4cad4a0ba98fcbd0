use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

use availability_cell::{
    AvailabilityError, AvailabilityTemplate, ScheduleStore, Slot, SlotFilter, SlotUpdate,
};

use crate::models::{Account, Appointment, AppointmentError, AppointmentQuery, AppointmentStatus, StatusChange};
use crate::store::{AccountDirectory, AppointmentStore};

#[derive(Default)]
struct MemoryState {
    templates: HashMap<Uuid, AvailabilityTemplate>,
    slots: HashMap<Uuid, Slot>,
    slot_index: HashMap<(Uuid, DateTime<Utc>), Uuid>,
    appointments: HashMap<Uuid, Appointment>,
    accounts: HashMap<Uuid, Account>,
}

impl MemoryState {
    fn overlaps_active(&self, candidate: &Appointment) -> bool {
        let interval = candidate.interval();
        self.appointments.values().any(|existing| {
            existing.doctor_id == candidate.doctor_id
                && existing.status != AppointmentStatus::Cancelled
                && existing.interval().overlaps(&interval)
        })
    }

    fn insert_exclusive(&mut self, appointment: Appointment) -> Result<Appointment, AppointmentError> {
        if self.overlaps_active(&appointment) {
            return Err(AppointmentError::Conflict(
                "Appointment overlaps an existing booking".to_string(),
            ));
        }
        self.appointments.insert(appointment.id, appointment.clone());
        Ok(appointment)
    }
}

/// Process-local storage engine.
///
/// A single write lock serializes every mutation, which gives each operation the
/// isolation a database transaction would.
#[derive(Default)]
pub struct MemoryStore {
    state: RwLock<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register_account(&self, account: Account) {
        let mut state = self.state.write().await;
        state.accounts.insert(account.id, account);
    }

    pub async fn with_accounts(accounts: Vec<Account>) -> Self {
        let store = Self::new();
        for account in accounts {
            store.register_account(account).await;
        }
        store
    }
}

#[async_trait]
impl ScheduleStore for MemoryStore {
    async fn get_template(&self, doctor_id: Uuid) -> Result<Option<AvailabilityTemplate>, AvailabilityError> {
        Ok(self.state.read().await.templates.get(&doctor_id).cloned())
    }

    async fn save_template(&self, template: AvailabilityTemplate) -> Result<AvailabilityTemplate, AvailabilityError> {
        let mut state = self.state.write().await;
        state.templates.insert(template.doctor_id, template.clone());
        Ok(template)
    }

    async fn insert_slot(&self, slot: Slot) -> Result<Slot, AvailabilityError> {
        let mut state = self.state.write().await;
        let key = (slot.doctor_id, slot.start_at);
        if state.slot_index.contains_key(&key) {
            return Err(AvailabilityError::Conflict(format!(
                "Slot already exists for doctor {} at {}",
                slot.doctor_id, slot.start_at
            )));
        }

        state.slot_index.insert(key, slot.id);
        state.slots.insert(slot.id, slot.clone());
        Ok(slot)
    }

    async fn get_slot(&self, slot_id: Uuid) -> Result<Option<Slot>, AvailabilityError> {
        Ok(self.state.read().await.slots.get(&slot_id).cloned())
    }

    async fn find_slot(&self, doctor_id: Uuid, start_at: DateTime<Utc>) -> Result<Option<Slot>, AvailabilityError> {
        let state = self.state.read().await;
        Ok(state
            .slot_index
            .get(&(doctor_id, start_at))
            .and_then(|id| state.slots.get(id))
            .cloned())
    }

    async fn list_slots(&self, doctor_id: Uuid, filter: SlotFilter) -> Result<Vec<Slot>, AvailabilityError> {
        let state = self.state.read().await;
        let mut slots: Vec<Slot> = state
            .slots
            .values()
            .filter(|slot| slot.doctor_id == doctor_id && filter.matches(slot))
            .cloned()
            .collect();
        slots.sort_by_key(|slot| slot.start_at);
        Ok(slots)
    }

    async fn update_slot(&self, slot_id: Uuid, update: SlotUpdate) -> Result<Option<Slot>, AvailabilityError> {
        let mut state = self.state.write().await;
        let Some(slot) = state.slots.get_mut(&slot_id) else {
            return Ok(None);
        };

        if update.apply(slot) {
            Ok(Some(slot.clone()))
        } else {
            Ok(None)
        }
    }
}

#[async_trait]
impl AppointmentStore for MemoryStore {
    async fn book_slot(&self, slot_id: Uuid, mut appointment: Appointment) -> Result<(Appointment, Slot), AppointmentError> {
        let mut state = self.state.write().await;

        let slot = state
            .slots
            .get(&slot_id)
            .cloned()
            .ok_or_else(|| AppointmentError::NotFound("Slot".to_string()))?;
        if !slot.is_available() {
            return Err(AppointmentError::Conflict(format!("Slot is {}", slot.status)));
        }

        appointment.slot_id = Some(slot_id);
        let mut booked = slot;
        let update = SlotUpdate::book(appointment.id, appointment.patient_snapshot());
        if !update.apply(&mut booked) {
            return Err(AppointmentError::Conflict("Slot changed concurrently".to_string()));
        }

        // Both writes happen under the same guard or not at all.
        let appointment = state.insert_exclusive(appointment)?;
        state.slots.insert(slot_id, booked.clone());

        debug!("Booked slot {} for appointment {}", slot_id, appointment.id);
        Ok((appointment, booked))
    }

    async fn insert_appointment_exclusive(&self, appointment: Appointment) -> Result<Appointment, AppointmentError> {
        self.state.write().await.insert_exclusive(appointment)
    }

    async fn get_appointment(&self, appointment_id: Uuid) -> Result<Option<Appointment>, AppointmentError> {
        Ok(self.state.read().await.appointments.get(&appointment_id).cloned())
    }

    async fn update_appointment_status(
        &self,
        appointment_id: Uuid,
        change: StatusChange,
    ) -> Result<Option<Appointment>, AppointmentError> {
        let mut state = self.state.write().await;
        let Some(appointment) = state.appointments.get_mut(&appointment_id) else {
            return Ok(None);
        };

        if change.apply(appointment) {
            Ok(Some(appointment.clone()))
        } else {
            Ok(None)
        }
    }

    async fn list_appointments(&self, query: AppointmentQuery) -> Result<Vec<Appointment>, AppointmentError> {
        let state = self.state.read().await;
        let mut appointments: Vec<Appointment> = state
            .appointments
            .values()
            .filter(|appointment| query.matches(appointment))
            .cloned()
            .collect();
        appointments.sort_by_key(|appointment| appointment.start_at);
        Ok(appointments)
    }
}

#[async_trait]
impl AccountDirectory for MemoryStore {
    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, AppointmentError> {
        let state = self.state.read().await;
        Ok(state
            .accounts
            .values()
            .find(|account| account.email.eq_ignore_ascii_case(email.trim()))
            .cloned())
    }

    async fn find_account(&self, account_id: Uuid) -> Result<Option<Account>, AppointmentError> {
        Ok(self.state.read().await.accounts.get(&account_id).cloned())
    }
}

