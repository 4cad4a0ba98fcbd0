use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{AvailabilityError, AvailabilityTemplate, Slot, SlotFilter, SlotUpdate};

/// Storage contract for availability templates and materialized slots.
///
/// Implementations must enforce uniqueness of `(doctor_id, start_at)` on
/// `insert_slot` and apply `update_slot` atomically against its precondition.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScheduleStore: Send + Sync {
    async fn get_template(&self, doctor_id: Uuid) -> Result<Option<AvailabilityTemplate>, AvailabilityError>;

    async fn save_template(&self, template: AvailabilityTemplate) -> Result<AvailabilityTemplate, AvailabilityError>;

    /// Fails with `Conflict` when a slot already exists at the same instant, whatever its status.
    async fn insert_slot(&self, slot: Slot) -> Result<Slot, AvailabilityError>;

    async fn get_slot(&self, slot_id: Uuid) -> Result<Option<Slot>, AvailabilityError>;

    async fn find_slot(&self, doctor_id: Uuid, start_at: DateTime<Utc>) -> Result<Option<Slot>, AvailabilityError>;

    /// Ordered by `start_at` ascending.
    async fn list_slots(&self, doctor_id: Uuid, filter: SlotFilter) -> Result<Vec<Slot>, AvailabilityError>;

    /// Returns `None` when the precondition no longer holds.
    async fn update_slot(&self, slot_id: Uuid, update: SlotUpdate) -> Result<Option<Slot>, AvailabilityError>;
}
