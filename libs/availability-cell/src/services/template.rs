use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use crate::generator::FreeIntervals;
use crate::models::{
    AvailabilityError, AvailabilityException, AvailabilityTemplate, DateRange, SchedulingRules,
    TimeInterval, WeeklyRule,
};
use crate::store::ScheduleStore;

pub struct AvailabilityService<S: ?Sized = dyn ScheduleStore> {
    store: Arc<S>,
    rules: SchedulingRules,
}

impl<S: ScheduleStore + ?Sized> AvailabilityService<S> {
    pub fn new(store: Arc<S>, rules: SchedulingRules) -> Self {
        Self { store, rules }
    }

    pub fn rules(&self) -> &SchedulingRules {
        &self.rules
    }

    /// Replace the doctor's weekly open hours.
    pub async fn set_weekly_rules(
        &self,
        doctor_id: Uuid,
        mut rules: Vec<WeeklyRule>,
    ) -> Result<AvailabilityTemplate, AvailabilityError> {
        debug!("Setting {} weekly rules for doctor {}", rules.len(), doctor_id);

        for rule in &rules {
            if !(0..=6).contains(&rule.day_of_week) {
                return Err(AvailabilityError::Validation(
                    "Day of week must be between 0 (Sunday) and 6 (Saturday)".to_string(),
                ));
            }
            if rule.open_time >= rule.close_time {
                return Err(AvailabilityError::Validation(
                    "Open time must be before close time".to_string(),
                ));
            }
        }

        rules.sort_by_key(|rule| (rule.day_of_week, rule.open_time));
        let overlapping = rules.windows(2).any(|pair| {
            pair[0].day_of_week == pair[1].day_of_week && pair[1].open_time < pair[0].close_time
        });
        if overlapping {
            return Err(AvailabilityError::Validation(
                "Rules on the same day must not overlap".to_string(),
            ));
        }

        let mut template = self.load_or_create(doctor_id).await?;
        template.weekly_rules = rules;
        template.updated_at = Utc::now();

        let saved = self.store.save_template(template).await?;
        info!("Updated weekly rules for doctor {}", doctor_id);
        Ok(saved)
    }

    /// Close an interval (vacation, sick day, etc.)
    pub async fn add_exception(
        &self,
        doctor_id: Uuid,
        interval: TimeInterval,
        reason: Option<String>,
    ) -> Result<AvailabilityTemplate, AvailabilityError> {
        if interval.is_empty() {
            return Err(AvailabilityError::Validation(
                "Exception start must be before its end".to_string(),
            ));
        }

        let mut template = self.load_or_create(doctor_id).await?;
        template.exceptions.push(AvailabilityException {
            start_at: interval.start_at,
            end_at: interval.end_at,
            reason,
        });
        template.exceptions.sort_by_key(|exception| exception.start_at);
        template.updated_at = Utc::now();

        let saved = self.store.save_template(template).await?;
        info!(
            "Added availability exception for doctor {} from {} to {}",
            doctor_id, interval.start_at, interval.end_at
        );
        Ok(saved)
    }

    pub async fn set_slot_duration(
        &self,
        doctor_id: Uuid,
        minutes: i32,
    ) -> Result<AvailabilityTemplate, AvailabilityError> {
        self.rules.validate_duration(minutes)?;

        let mut template = self.load_or_create(doctor_id).await?;
        template.slot_duration_minutes = minutes;
        template.updated_at = Utc::now();

        self.store.save_template(template).await
    }

    pub async fn get_template(&self, doctor_id: Uuid) -> Result<AvailabilityTemplate, AvailabilityError> {
        self.store
            .get_template(doctor_id)
            .await?
            .ok_or_else(|| AvailabilityError::NotFound("Availability template".to_string()))
    }

    /// Free intervals of the template over `range`, minus `busy`.
    ///
    /// A doctor without a template has no free time.
    pub async fn preview_free_intervals(
        &self,
        doctor_id: Uuid,
        range: DateRange,
        busy: Vec<TimeInterval>,
    ) -> Result<FreeIntervals, AvailabilityError> {
        self.rules.validate_range(&range)?;

        match self.store.get_template(doctor_id).await? {
            Some(template) => Ok(FreeIntervals::new(&template, range, busy)),
            None => {
                debug!("Doctor {} has no availability template", doctor_id);
                Ok(FreeIntervals::empty())
            }
        }
    }

    async fn load_or_create(&self, doctor_id: Uuid) -> Result<AvailabilityTemplate, AvailabilityError> {
        Ok(self
            .store
            .get_template(doctor_id)
            .await?
            .unwrap_or_else(|| AvailabilityTemplate::new(doctor_id, self.rules.default_slot_minutes)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MockScheduleStore;
    use assert_matches::assert_matches;
    use chrono::{NaiveDate, NaiveTime, TimeZone};

    fn time(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn service(store: MockScheduleStore) -> AvailabilityService<MockScheduleStore> {
        AvailabilityService::new(Arc::new(store), SchedulingRules::default())
    }

    #[tokio::test]
    async fn test_set_weekly_rules_creates_template_lazily() {
        let doctor_id = Uuid::new_v4();
        let mut store = MockScheduleStore::new();
        store.expect_get_template().returning(|_| Ok(None));
        store
            .expect_save_template()
            .times(1)
            .returning(|template| Ok(template));

        let template = service(store)
            .set_weekly_rules(
                doctor_id,
                vec![
                    WeeklyRule::new(3, time(9, 0), time(12, 0)),
                    WeeklyRule::new(1, time(14, 0), time(17, 0)),
                    WeeklyRule::new(1, time(9, 0), time(12, 0)),
                ],
            )
            .await
            .unwrap();

        assert_eq!(template.doctor_id, doctor_id);
        assert_eq!(template.slot_duration_minutes, 15);
        let order: Vec<_> = template.weekly_rules.iter().map(|r| (r.day_of_week, r.open_time)).collect();
        assert_eq!(order, vec![(1, time(9, 0)), (1, time(14, 0)), (3, time(9, 0))]);
    }

    #[tokio::test]
    async fn test_invalid_rules_are_rejected_before_storage() {
        let doctor_id = Uuid::new_v4();
        let service = service(MockScheduleStore::new());

        let bad_day = service
            .set_weekly_rules(doctor_id, vec![WeeklyRule::new(7, time(9, 0), time(10, 0))])
            .await;
        assert_matches!(bad_day, Err(AvailabilityError::Validation(_)));

        let inverted = service
            .set_weekly_rules(doctor_id, vec![WeeklyRule::new(1, time(10, 0), time(9, 0))])
            .await;
        assert_matches!(inverted, Err(AvailabilityError::Validation(_)));

        let overlapping = service
            .set_weekly_rules(
                doctor_id,
                vec![
                    WeeklyRule::new(1, time(9, 0), time(11, 0)),
                    WeeklyRule::new(1, time(10, 0), time(12, 0)),
                ],
            )
            .await;
        assert_matches!(overlapping, Err(AvailabilityError::Validation(_)));
    }

    #[tokio::test]
    async fn test_add_exception_validates_interval() {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap();
        let service = service(MockScheduleStore::new());

        let result = service
            .add_exception(Uuid::new_v4(), TimeInterval::new(start, start), None)
            .await;
        assert_matches!(result, Err(AvailabilityError::Validation(_)));
    }

    #[tokio::test]
    async fn test_set_slot_duration_checks_bounds() {
        let mut store = MockScheduleStore::new();
        store.expect_get_template().returning(|id| Ok(Some(AvailabilityTemplate::new(id, 15))));
        store.expect_save_template().returning(|template| Ok(template));
        let service = service(store);

        let updated = service.set_slot_duration(Uuid::new_v4(), 30).await.unwrap();
        assert_eq!(updated.slot_duration_minutes, 30);
        assert_matches!(
            service.set_slot_duration(Uuid::new_v4(), 1).await,
            Err(AvailabilityError::Validation(_))
        );
    }

    #[tokio::test]
    async fn test_preview_without_template_is_empty() {
        let mut store = MockScheduleStore::new();
        store.expect_get_template().returning(|_| Ok(None));

        let day = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        let preview = service(store)
            .preview_free_intervals(Uuid::new_v4(), DateRange::single(day), vec![])
            .await
            .unwrap();
        assert_eq!(preview.count(), 0);
    }

    #[tokio::test]
    async fn test_get_template_not_found() {
        let mut store = MockScheduleStore::new();
        store.expect_get_template().returning(|_| Ok(None));

        assert_matches!(
            service(store).get_template(Uuid::new_v4()).await,
            Err(AvailabilityError::NotFound(_))
        );
    }
}
