pub mod generator;
pub mod models;
pub mod services;
pub mod store;

pub use generator::FreeIntervals;
pub use models::*;
pub use services::*;
pub use store::ScheduleStore;
