#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use uuid::Uuid;

use appointment_cell::*;
use availability_cell::{Slot, WeeklyRule};
use notification_cell::BroadcastHub;
use shared_models::auth::{Actor, Role};
use shared_utils::test_utils::TestConfig;

pub struct Harness {
    pub store: Arc<MemoryStore>,
    pub hub: BroadcastHub,
    pub state: SchedulingState,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_accounts(Vec::new()).await
    }

    pub async fn with_accounts(accounts: Vec<Account>) -> Self {
        let hub = BroadcastHub::new();
        let fanout = NotificationFanout::new(Arc::new(hub.clone()), Arc::new(LogMailer), false);
        Self::build(accounts, hub, fanout).await
    }

    /// Events go to `fanout` instead of the harness hub.
    pub async fn with_fanout(fanout: NotificationFanout) -> Self {
        Self::build(Vec::new(), BroadcastHub::new(), fanout).await
    }

    async fn build(accounts: Vec<Account>, hub: BroadcastHub, fanout: NotificationFanout) -> Self {
        let store = Arc::new(MemoryStore::with_accounts(accounts).await);
        let state = SchedulingState::new(
            TestConfig::default().to_arc(),
            store.clone() as Arc<dyn AppointmentStore>,
            store.clone() as Arc<dyn AccountDirectory>,
            fanout,
        );

        Self { store, hub, state }
    }

    pub async fn open_slot(&self, doctor_id: Uuid, start_at: DateTime<Utc>) -> Slot {
        self.state.slots.create_slot(doctor_id, start_at, 15).await.unwrap()
    }

    /// Monday 09:00-09:30 in 15 minute steps.
    pub async fn monday_morning(&self, doctor_id: Uuid) {
        self.state
            .availability
            .set_weekly_rules(doctor_id, vec![WeeklyRule::new(1, time(9, 0), time(9, 30))])
            .await
            .unwrap();
    }
}

pub fn time(h: u32, m: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(h, m, 0).unwrap()
}

/// 2024-01-01 is a Monday.
pub fn monday() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
}

pub fn monday_at(h: u32, m: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 1, 1, h, m, 0).unwrap()
}

pub fn reception() -> Actor {
    Actor::new(Uuid::new_v4(), Role::Reception).with_email("desk@clinic.test")
}

pub fn admin() -> Actor {
    Actor::new(Uuid::new_v4(), Role::Admin).with_email("admin@clinic.test")
}

pub fn doctor() -> Actor {
    Actor::new(Uuid::new_v4(), Role::Doctor).with_email("doc@clinic.test")
}

pub fn patient(email: &str) -> Actor {
    Actor::new(Uuid::new_v4(), Role::Patient).with_email(email)
}

pub fn slot_request(doctor_id: Uuid, start_at: DateTime<Utc>, email: &str) -> BookSlotRequest {
    BookSlotRequest {
        doctor_id,
        start_at,
        patient_id: None,
        patient_name: Some("Test Patient".to_string()),
        patient_email: Some(email.to_string()),
        reason: None,
    }
}

pub fn interval_request(doctor_id: Uuid, start_at: DateTime<Utc>, minutes: i32) -> BookIntervalRequest {
    BookIntervalRequest {
        doctor_id,
        start_at,
        duration_minutes: Some(minutes),
        patient_id: None,
        patient_name: Some("Walk In".to_string()),
        patient_email: Some("walkin@example.com".to_string()),
        reason: Some("Reception booking".to_string()),
    }
}
