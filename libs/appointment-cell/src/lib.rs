pub mod handlers;
pub mod models;
pub mod router;
pub mod services;
pub mod store;

pub use models::*;
pub use router::{scheduling_routes, SchedulingState};
pub use services::*;
pub use store::{AccountDirectory, AppointmentStore, MemoryStore, SupabaseStore};
