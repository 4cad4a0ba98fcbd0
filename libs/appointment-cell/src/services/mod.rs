pub mod booking;
pub mod lifecycle;
pub mod notification;
pub mod query;

pub use booking::BookingService;
pub use lifecycle::AppointmentLifecycleService;
pub use notification::{AppointmentMailer, LogMailer, NoticeKind, NotificationFanout};
pub use query::AppointmentQueryService;
