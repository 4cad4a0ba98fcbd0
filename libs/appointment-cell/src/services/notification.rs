use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use notification_cell::{Channel, NotificationError, NotificationPublisher, ScheduleEvent};

use crate::models::Appointment;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Created,
    Cancelled,
    Completed,
}

impl NoticeKind {
    pub fn subject(&self) -> &'static str {
        match self {
            NoticeKind::Created => "Your appointment is booked",
            NoticeKind::Cancelled => "Your appointment was cancelled",
            NoticeKind::Completed => "Thank you for your visit",
        }
    }
}

/// Sends appointment emails. Composition and delivery live outside the scheduling core.
#[async_trait]
pub trait AppointmentMailer: Send + Sync {
    async fn send_appointment_notice(
        &self,
        to_email: &str,
        kind: NoticeKind,
        appointment: &Appointment,
    ) -> Result<(), NotificationError>;
}

/// Records notices in the log instead of sending them.
#[derive(Debug, Default, Clone)]
pub struct LogMailer;

#[async_trait]
impl AppointmentMailer for LogMailer {
    async fn send_appointment_notice(
        &self,
        to_email: &str,
        kind: NoticeKind,
        appointment: &Appointment,
    ) -> Result<(), NotificationError> {
        info!(
            "Mail to {}: {} (appointment {} at {})",
            to_email,
            kind.subject(),
            appointment.id,
            appointment.start_at
        );
        Ok(())
    }
}

/// Publishes appointment changes to every interested room and triggers patient mail.
///
/// Delivery is best effort; nothing here can fail the operation that caused it.
#[derive(Clone)]
pub struct NotificationFanout {
    publisher: Arc<dyn NotificationPublisher>,
    mailer: Arc<dyn AppointmentMailer>,
    notify_admin: bool,
}

impl NotificationFanout {
    pub fn new(
        publisher: Arc<dyn NotificationPublisher>,
        mailer: Arc<dyn AppointmentMailer>,
        notify_admin: bool,
    ) -> Self {
        Self { publisher, mailer, notify_admin }
    }

    pub fn publisher(&self) -> Arc<dyn NotificationPublisher> {
        Arc::clone(&self.publisher)
    }

    pub fn interested_channels(&self, appointment: &Appointment) -> Vec<Channel> {
        let mut channels = vec![Channel::Doctor(appointment.doctor_id)];
        if let Some(patient_id) = appointment.patient_id {
            channels.push(Channel::Patient(patient_id));
        }
        channels.push(Channel::Reception);
        if self.notify_admin {
            channels.push(Channel::Admin);
        }
        channels
    }

    pub async fn appointment_changed(&self, event: ScheduleEvent, appointment: &Appointment) {
        let payload = match serde_json::to_value(appointment) {
            Ok(payload) => payload,
            Err(e) => {
                warn!("Failed to serialize appointment {}: {}", appointment.id, e);
                return;
            }
        };

        for channel in self.interested_channels(appointment) {
            let channel = channel.to_string();
            if let Err(e) = self.publisher.publish(&channel, event.as_str(), &payload).await {
                warn!("Failed to publish {} on {}: {}", event, channel, e);
            }
        }
    }

    /// Hand the notice to the mailer without waiting for it.
    pub fn mail(&self, kind: NoticeKind, appointment: &Appointment) {
        let mailer = Arc::clone(&self.mailer);
        let appointment = appointment.clone();

        tokio::spawn(async move {
            if let Err(e) = mailer
                .send_appointment_notice(&appointment.patient_email, kind, &appointment)
                .await
            {
                warn!("Failed to send {:?} notice for appointment {}: {}", kind, appointment.id, e);
            }
        });
    }
}
