pub mod slots;
pub mod template;

pub use slots::SlotService;
pub use template::AvailabilityService;
