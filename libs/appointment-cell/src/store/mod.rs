use async_trait::async_trait;
use uuid::Uuid;

use availability_cell::{ScheduleStore, Slot};

use crate::models::{Account, Appointment, AppointmentError, AppointmentQuery, StatusChange};

pub mod memory;
pub mod supabase;

pub use memory::MemoryStore;
pub use supabase::SupabaseStore;

/// Appointment persistence on top of the slot store.
///
/// Every appointment insert, whichever method performs it, must reject an
/// interval that overlaps a non-cancelled appointment of the same doctor.
#[async_trait]
pub trait AppointmentStore: ScheduleStore {
    /// Insert `appointment` and move the slot from available to booked as one unit.
    ///
    /// Fails with `Conflict` when the slot is no longer available or the interval overlaps.
    async fn book_slot(&self, slot_id: Uuid, appointment: Appointment) -> Result<(Appointment, Slot), AppointmentError>;

    /// Insert `appointment` unless it overlaps an existing non-cancelled appointment.
    async fn insert_appointment_exclusive(&self, appointment: Appointment) -> Result<Appointment, AppointmentError>;

    async fn get_appointment(&self, appointment_id: Uuid) -> Result<Option<Appointment>, AppointmentError>;

    /// Returns `None` when the appointment no longer has `change.expected`.
    async fn update_appointment_status(
        &self,
        appointment_id: Uuid,
        change: StatusChange,
    ) -> Result<Option<Appointment>, AppointmentError>;

    /// Ordered by `start_at` ascending.
    async fn list_appointments(&self, query: AppointmentQuery) -> Result<Vec<Appointment>, AppointmentError>;
}

/// Lookup into the clinic's account records.
#[async_trait]
pub trait AccountDirectory: Send + Sync {
    async fn find_account_by_email(&self, email: &str) -> Result<Option<Account>, AppointmentError>;

    async fn find_account(&self, account_id: Uuid) -> Result<Option<Account>, AppointmentError>;
}
