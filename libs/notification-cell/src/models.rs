use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// A room that clients subscribe to for live schedule updates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Channel {
    Doctor(Uuid),
    Patient(Uuid),
    Reception,
    Admin,
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Channel::Doctor(id) => write!(f, "doctor:{}", id),
            Channel::Patient(id) => write!(f, "patient:{}", id),
            Channel::Reception => write!(f, "reception"),
            Channel::Admin => write!(f, "admin"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleEvent {
    AppointmentCreated,
    AppointmentUpdated,
    AppointmentCancelled,
    SlotCreated,
    SlotUpdated,
}

impl ScheduleEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScheduleEvent::AppointmentCreated => "appointment.created",
            ScheduleEvent::AppointmentUpdated => "appointment.updated",
            ScheduleEvent::AppointmentCancelled => "appointment.cancelled",
            ScheduleEvent::SlotCreated => "slot.created",
            ScheduleEvent::SlotUpdated => "slot.updated",
        }
    }
}

impl fmt::Display for ScheduleEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Envelope delivered to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub channel: String,
    pub event: String,
    pub payload: Value,
    pub published_at: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn new(channel: &str, event: &str, payload: Value) -> Self {
        Self {
            channel: channel.to_string(),
            event: event.to_string(),
            payload,
            published_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_names() {
        let id = Uuid::nil();
        assert_eq!(Channel::Doctor(id).to_string(), format!("doctor:{}", id));
        assert_eq!(Channel::Patient(id).to_string(), format!("patient:{}", id));
        assert_eq!(Channel::Reception.to_string(), "reception");
        assert_eq!(Channel::Admin.to_string(), "admin");
    }
}
