use chrono::{DateTime, Duration, NaiveDate, Utc};

use crate::models::{day_of_week, AvailabilityTemplate, DateRange, TimeInterval, WeeklyRule};

/// Lazily walks a template day by day and yields fixed-length free intervals.
///
/// Candidates run from each rule's open time in steps of the slot duration; a
/// trailing partial interval is dropped. A candidate overlapping any blocked
/// interval (exception or busy appointment) is skipped whole, never clipped.
/// Cloning restarts from the clone point, so the sequence can be re-walked.
#[derive(Debug, Clone)]
pub struct FreeIntervals {
    rules: Vec<WeeklyRule>,
    blocked: Vec<TimeInterval>,
    step: Duration,
    day: NaiveDate,
    last_day: NaiveDate,
    rule_index: usize,
    cursor: Option<DateTime<Utc>>,
    exhausted: bool,
}

impl FreeIntervals {
    pub fn new(template: &AvailabilityTemplate, range: DateRange, busy: Vec<TimeInterval>) -> Self {
        let mut rules = template.weekly_rules.clone();
        rules.sort_by_key(|rule| (rule.day_of_week, rule.open_time));

        let mut blocked: Vec<TimeInterval> = template
            .exceptions
            .iter()
            .map(|exception| exception.interval())
            .chain(busy)
            .collect();
        blocked.sort();

        Self {
            rules,
            blocked,
            step: Duration::minutes(template.slot_duration_minutes as i64),
            day: range.from,
            last_day: range.to,
            rule_index: 0,
            cursor: None,
            exhausted: template.slot_duration_minutes <= 0 || range.to < range.from,
        }
    }

    /// A sequence that yields nothing, for doctors without a template.
    pub fn empty() -> Self {
        Self {
            rules: Vec::new(),
            blocked: Vec::new(),
            step: Duration::zero(),
            day: NaiveDate::MIN,
            last_day: NaiveDate::MIN,
            rule_index: 0,
            cursor: None,
            exhausted: true,
        }
    }

    fn advance_day(&mut self) {
        self.rule_index = 0;
        self.cursor = None;
        match self.day.succ_opt() {
            Some(next) if next <= self.last_day => self.day = next,
            _ => self.exhausted = true,
        }
    }

    fn advance_rule(&mut self) {
        self.rule_index += 1;
        self.cursor = None;
    }

    fn is_blocked(&self, candidate: &TimeInterval) -> bool {
        self.blocked
            .iter()
            .take_while(|blocked| blocked.start_at < candidate.end_at)
            .any(|blocked| blocked.overlaps(candidate))
    }
}

impl Iterator for FreeIntervals {
    type Item = TimeInterval;

    fn next(&mut self) -> Option<TimeInterval> {
        while !self.exhausted {
            let Some(rule) = self.rules.get(self.rule_index) else {
                self.advance_day();
                continue;
            };

            if rule.day_of_week != day_of_week(self.day) {
                self.advance_rule();
                continue;
            }

            let close = self.day.and_time(rule.close_time).and_utc();
            let start = self
                .cursor
                .unwrap_or_else(|| self.day.and_time(rule.open_time).and_utc());
            let end = start + self.step;

            if end > close {
                self.advance_rule();
                continue;
            }

            self.cursor = Some(end);
            let candidate = TimeInterval::new(start, end);
            if !self.is_blocked(&candidate) {
                return Some(candidate);
            }
        }

        None
    }
}
