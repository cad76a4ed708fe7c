use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime, Timelike};

/// Canonical slot format. Lexicographic order equals chronological order.
pub const SLOT_FORMAT: &str = "%Y-%m-%d %H:%M";

pub fn format_slot(slot: &NaiveDateTime) -> String {
    slot.format(SLOT_FORMAT).to_string()
}

/// Parses a slot in canonical form, also accepting the ISO `T` separator.
pub fn parse_slot(s: &str) -> Option<NaiveDateTime> {
    let s = s.trim();
    NaiveDateTime::parse_from_str(s, SLOT_FORMAT)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M"))
        .ok()
}

/// Business-hour grid of bookable slots.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotCalendar {
    open: NaiveTime,
    close: NaiveTime,
    step_minutes: u32,
    horizon_days: u32,
}

impl Default for SlotCalendar {
    fn default() -> Self {
        Self {
            open: NaiveTime::from_hms_opt(9, 0, 0).unwrap_or(NaiveTime::MIN),
            close: NaiveTime::from_hms_opt(18, 0, 0).unwrap_or(NaiveTime::MIN),
            step_minutes: 30,
            horizon_days: 7,
        }
    }
}

impl SlotCalendar {
    pub fn new(
        open: NaiveTime,
        close: NaiveTime,
        step_minutes: u32,
        horizon_days: u32,
    ) -> anyhow::Result<Self> {
        anyhow::ensure!(step_minutes > 0, "slot granularity must be positive");
        anyhow::ensure!(open <= close, "business hours close before they open");
        anyhow::ensure!(horizon_days > 0, "booking horizon must be at least one day");
        Ok(Self {
            open,
            close,
            step_minutes,
            horizon_days,
        })
    }

    pub fn step(&self) -> Duration {
        Duration::minutes(self.step_minutes as i64)
    }

    pub fn horizon_days(&self) -> u32 {
        self.horizon_days
    }

    /// Candidate slots on `date` that are strictly after `now`. The returned
    /// iterator is lazy; call again to restart.
    pub fn slots_for(&self, date: NaiveDate, now: NaiveDateTime) -> Slots {
        Slots {
            next: Some(date.and_time(self.open)),
            last: date.and_time(self.close),
            step: self.step(),
            after: Some(now),
        }
    }

    /// Every grid slot on `date`, regardless of the current moment.
    pub fn grid_for(&self, date: NaiveDate) -> Slots {
        Slots {
            next: Some(date.and_time(self.open)),
            last: date.and_time(self.close),
            step: self.step(),
            after: None,
        }
    }

    /// Whether `slot` is a value this calendar could produce for its date.
    pub fn is_on_grid(&self, slot: &NaiveDateTime) -> bool {
        let time = slot.time();
        if time < self.open || time > self.close || time.second() != 0 || time.nanosecond() != 0
        {
            return false;
        }
        let since_open = (time - self.open).num_minutes();
        since_open % self.step_minutes as i64 == 0
    }

    /// Selectable dates: `today` and the following `horizon_days - 1` days.
    pub fn days(&self, today: NaiveDate) -> impl Iterator<Item = NaiveDate> {
        today.iter_days().take(self.horizon_days as usize)
    }

    pub fn is_selectable_day(&self, date: NaiveDate, today: NaiveDate) -> bool {
        date >= today && (date - today).num_days() < self.horizon_days as i64
    }
}

/// Lazy, cloneable walk over one day's grid.
#[derive(Debug, Clone)]
pub struct Slots {
    next: Option<NaiveDateTime>,
    last: NaiveDateTime,
    step: Duration,
    after: Option<NaiveDateTime>,
}

impl Iterator for Slots {
    type Item = NaiveDateTime;

    fn next(&mut self) -> Option<NaiveDateTime> {
        loop {
            let current = self.next?;
            if current > self.last {
                self.next = None;
                return None;
            }
            self.next = Some(current + self.step);
            if self.after.map_or(true, |after| current > after) {
                return Some(current);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, SLOT_FORMAT).unwrap()
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_full_day_grid() {
        let cal = SlotCalendar::default();
        let slots: Vec<_> = cal.slots_for(date("2025-06-10"), dt("2025-06-09 12:00")).collect();
        // 09:00 .. 18:00 inclusive every 30 minutes
        assert_eq!(slots.len(), 19);
        assert_eq!(slots.first(), Some(&dt("2025-06-10 09:00")));
        assert_eq!(slots.last(), Some(&dt("2025-06-10 18:00")));
    }

    #[test]
    fn test_excludes_slots_not_after_now() {
        let cal = SlotCalendar::default();
        let slots: Vec<_> = cal.slots_for(date("2025-06-10"), dt("2025-06-10 17:00")).collect();
        assert_eq!(slots, vec![dt("2025-06-10 17:30"), dt("2025-06-10 18:00")]);
    }

    #[test]
    fn test_past_day_is_empty() {
        let cal = SlotCalendar::default();
        assert_eq!(cal.slots_for(date("2025-06-10"), dt("2025-06-11 08:00")).count(), 0);
    }

    #[test]
    fn test_iterator_is_restartable() {
        let cal = SlotCalendar::default();
        let slots = cal.slots_for(date("2025-06-10"), dt("2025-06-10 16:00"));
        let first: Vec<_> = slots.clone().collect();
        let second: Vec<_> = slots.collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_is_on_grid() {
        let cal = SlotCalendar::default();
        assert!(cal.is_on_grid(&dt("2025-06-10 09:00")));
        assert!(cal.is_on_grid(&dt("2025-06-10 18:00")));
        assert!(cal.is_on_grid(&dt("2025-06-10 13:30")));
        assert!(!cal.is_on_grid(&dt("2025-06-10 08:30")));
        assert!(!cal.is_on_grid(&dt("2025-06-10 18:30")));
        assert!(!cal.is_on_grid(&dt("2025-06-10 10:15")));
    }

    #[test]
    fn test_days_respect_horizon() {
        let cal = SlotCalendar::default();
        let days: Vec<_> = cal.days(date("2025-06-09")).collect();
        assert_eq!(days.len(), 7);
        assert_eq!(days[0], date("2025-06-09"));
        assert_eq!(days[6], date("2025-06-15"));
        assert!(cal.is_selectable_day(date("2025-06-15"), date("2025-06-09")));
        assert!(!cal.is_selectable_day(date("2025-06-16"), date("2025-06-09")));
        assert!(!cal.is_selectable_day(date("2025-06-08"), date("2025-06-09")));
    }

    #[test]
    fn test_custom_granularity() {
        let cal = SlotCalendar::new(
            NaiveTime::from_hms_opt(10, 0, 0).unwrap(),
            NaiveTime::from_hms_opt(12, 0, 0).unwrap(),
            60,
            14,
        )
        .unwrap();
        let slots: Vec<_> = cal.grid_for(date("2025-06-10")).collect();
        assert_eq!(
            slots,
            vec![dt("2025-06-10 10:00"), dt("2025-06-10 11:00"), dt("2025-06-10 12:00")]
        );
        assert!(!cal.is_on_grid(&dt("2025-06-10 10:30")));
    }

    #[test]
    fn test_rejects_invalid_configuration() {
        let nine = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        let six = NaiveTime::from_hms_opt(18, 0, 0).unwrap();
        assert!(SlotCalendar::new(nine, six, 0, 7).is_err());
        assert!(SlotCalendar::new(six, nine, 30, 7).is_err());
        assert!(SlotCalendar::new(nine, six, 30, 0).is_err());
    }

    #[test]
    fn test_parse_and_format_slot() {
        assert_eq!(parse_slot("2025-06-10 10:00"), Some(dt("2025-06-10 10:00")));
        assert_eq!(parse_slot("2025-06-10T10:00"), Some(dt("2025-06-10 10:00")));
        assert_eq!(parse_slot("10:00"), None);
        assert_eq!(format_slot(&dt("2025-06-10 09:30")), "2025-06-10 09:30");
    }
}
