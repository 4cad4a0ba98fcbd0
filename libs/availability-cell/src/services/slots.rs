use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use notification_cell::{Channel, NoopPublisher, NotificationPublisher, ScheduleEvent};

use crate::generator::FreeIntervals;
use crate::models::{
    is_minute_aligned, AvailabilityError, DateRange, MaterializeReport, PatientSnapshot,
    SchedulingRules, Slot, SlotFilter, SlotStatus, SlotUpdate,
};
use crate::store::ScheduleStore;

/// Creates materialized slots and moves them between states.
///
/// All mutual exclusion is left to the store: uniqueness on insert and
/// conditional updates on every status change.
pub struct SlotService<S: ?Sized = dyn ScheduleStore> {
    store: Arc<S>,
    rules: SchedulingRules,
    publisher: Arc<dyn NotificationPublisher>,
}

impl<S: ScheduleStore + ?Sized> SlotService<S> {
    pub fn new(store: Arc<S>, rules: SchedulingRules) -> Self {
        Self {
            store,
            rules,
            publisher: Arc::new(NoopPublisher),
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn NotificationPublisher>) -> Self {
        self.publisher = publisher;
        self
    }

    pub async fn create_slot(
        &self,
        doctor_id: Uuid,
        start_at: DateTime<Utc>,
        duration_minutes: i32,
    ) -> Result<Slot, AvailabilityError> {
        if !is_minute_aligned(&start_at) {
            return Err(AvailabilityError::Validation(
                "Slot start must fall on a whole minute".to_string(),
            ));
        }
        self.rules.validate_duration(duration_minutes)?;

        let slot = self
            .store
            .insert_slot(Slot::available(doctor_id, start_at, duration_minutes))
            .await?;

        info!("Created slot {} for doctor {} at {}", slot.id, doctor_id, start_at);
        self.announce(ScheduleEvent::SlotCreated, &slot).await;
        Ok(slot)
    }

    pub async fn list_slots(&self, doctor_id: Uuid, filter: SlotFilter) -> Result<Vec<Slot>, AvailabilityError> {
        let mut slots = self.store.list_slots(doctor_id, filter).await?;
        slots.sort_by_key(|slot| slot.start_at);
        Ok(slots)
    }

    pub async fn get_slot(&self, slot_id: Uuid) -> Result<Slot, AvailabilityError> {
        self.store
            .get_slot(slot_id)
            .await?
            .ok_or_else(|| AvailabilityError::NotFound("Slot".to_string()))
    }

    pub async fn find_slot(
        &self,
        doctor_id: Uuid,
        start_at: DateTime<Utc>,
    ) -> Result<Option<Slot>, AvailabilityError> {
        self.store.find_slot(doctor_id, start_at).await
    }

    /// Claim an available slot for an appointment.
    pub async fn mark_booked(
        &self,
        slot_id: Uuid,
        appointment_id: Uuid,
        patient: PatientSnapshot,
    ) -> Result<Slot, AvailabilityError> {
        match self.store.update_slot(slot_id, SlotUpdate::book(appointment_id, patient)).await? {
            Some(slot) => {
                debug!("Slot {} booked for appointment {}", slot_id, appointment_id);
                self.announce(ScheduleEvent::SlotUpdated, &slot).await;
                Ok(slot)
            }
            None => Err(self.unavailable(slot_id).await),
        }
    }

    /// Return a booked slot to the pool while it is still held by `appointment_id`.
    /// Available and cancelled slots, or slots rebooked by someone else, are left as they are.
    pub async fn release_for(&self, slot_id: Uuid, appointment_id: Uuid) -> Result<Slot, AvailabilityError> {
        let slot = self.get_slot(slot_id).await?;
        match slot.status {
            SlotStatus::Available => return Ok(slot),
            SlotStatus::Cancelled => {
                info!("Slot {} is withdrawn, nothing to release", slot_id);
                return Ok(slot);
            }
            SlotStatus::Booked => {}
        }

        match self.store.update_slot(slot_id, SlotUpdate::release(appointment_id)).await? {
            Some(slot) => {
                debug!("Released slot {} from appointment {}", slot_id, appointment_id);
                self.announce(ScheduleEvent::SlotUpdated, &slot).await;
                Ok(slot)
            }
            None => {
                debug!("Slot {} is no longer held by appointment {}, leaving it as is", slot_id, appointment_id);
                self.get_slot(slot_id).await
            }
        }
    }

    /// Close an available slot so it can never be booked.
    pub async fn withdraw(&self, slot_id: Uuid) -> Result<Slot, AvailabilityError> {
        let slot = self.get_slot(slot_id).await?;
        match slot.status {
            SlotStatus::Cancelled => return Ok(slot),
            SlotStatus::Booked => {
                return Err(AvailabilityError::SlotUnavailable { status: SlotStatus::Booked })
            }
            SlotStatus::Available => {}
        }

        match self.store.update_slot(slot_id, SlotUpdate::withdraw()).await? {
            Some(slot) => {
                info!("Withdrew slot {}", slot_id);
                self.announce(ScheduleEvent::SlotUpdated, &slot).await;
                Ok(slot)
            }
            None => {
                let current = self.get_slot(slot_id).await?;
                match current.status {
                    SlotStatus::Cancelled => Ok(current),
                    status => Err(AvailabilityError::SlotUnavailable { status }),
                }
            }
        }
    }

    /// Create available slots for every free interval of the template in `range`.
    ///
    /// Instants that already hold a slot are skipped, so the operation can be rerun.
    pub async fn materialize(&self, doctor_id: Uuid, range: DateRange) -> Result<MaterializeReport, AvailabilityError> {
        self.rules.validate_range(&range)?;

        let template = self
            .store
            .get_template(doctor_id)
            .await?
            .ok_or_else(|| AvailabilityError::NotFound("Availability template".to_string()))?;

        let mut report = MaterializeReport::default();
        for interval in FreeIntervals::new(&template, range, Vec::new()) {
            let candidate = Slot::available(doctor_id, interval.start_at, template.slot_duration_minutes);
            match self.store.insert_slot(candidate).await {
                Ok(slot) => {
                    report.created += 1;
                    self.announce(ScheduleEvent::SlotCreated, &slot).await;
                }
                Err(AvailabilityError::Conflict(_)) => report.skipped += 1,
                Err(e) => return Err(e),
            }
        }

        info!(
            "Materialized slots for doctor {} from {} to {}: {} created, {} skipped",
            doctor_id, range.from, range.to, report.created, report.skipped
        );
        Ok(report)
    }

    pub async fn announce(&self, event: ScheduleEvent, slot: &Slot) {
        let payload = match serde_json::to_value(slot) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to serialize slot {}: {}", slot.id, e);
                return;
            }
        };

        for channel in [Channel::Doctor(slot.doctor_id), Channel::Reception] {
            let channel = channel.to_string();
            if let Err(e) = self.publisher.publish(&channel, event.as_str(), &payload).await {
                warn!("Failed to publish {} on {}: {}", event, channel, e);
            }
        }
    }

    async fn unavailable(&self, slot_id: Uuid) -> AvailabilityError {
        match self.store.get_slot(slot_id).await {
            Ok(Some(slot)) if slot.status != SlotStatus::Available => {
                AvailabilityError::SlotUnavailable { status: slot.status }
            }
            Ok(Some(_)) => AvailabilityError::Conflict("Slot changed concurrently".to_string()),
            Ok(None) => AvailabilityError::NotFound("Slot".to_string()),
            Err(e) => e,
        }
    }
}
