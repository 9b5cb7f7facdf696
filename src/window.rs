//! Pure time-window maths: half-open overlap tests, day boundaries in the
//! venue's local time, and fixed display slots.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, Offset, Timelike, Utc};

use crate::model::{DAY_MS, HOUR_MS, MINUTE_MS, Ms, Span};

/// True iff `[a_start, a_start + a_duration)` and `[b_start, b_start + b_duration)`
/// intersect. Empty intervals never overlap anything, and touching intervals
/// do not overlap because the end instant is excluded.
pub fn overlaps(a_start: Ms, a_duration: Ms, b_start: Ms, b_duration: Ms) -> bool {
    if a_duration <= 0 || b_duration <= 0 {
        return false;
    }
    a_start < b_start + b_duration && b_start < a_start + a_duration
}

/// True iff the inner interval lies entirely within the outer one.
pub fn contains(outer_start: Ms, outer_duration: Ms, inner_start: Ms, inner_duration: Ms) -> bool {
    outer_duration > 0
        && inner_duration >= 0
        && outer_start <= inner_start
        && inner_start + inner_duration <= outer_start + outer_duration
}

/// Maps instants to local calendar days using the venue's fixed UTC offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calendar {
    offset: FixedOffset,
}

impl Default for Calendar {
    fn default() -> Self {
        Self::utc()
    }
}

impl Calendar {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    pub fn utc() -> Self {
        Self { offset: Utc.fix() }
    }

    /// `None` if the offset is outside ±24h.
    pub fn from_offset_minutes(minutes: i32) -> Option<Self> {
        FixedOffset::east_opt(minutes.checked_mul(60)?).map(Self::new)
    }

    fn offset_ms(&self) -> Ms {
        self.offset.local_minus_utc() as Ms * 1000
    }

    /// Local midnight at the start of `day`.
    pub fn day_start(&self, day: NaiveDate) -> Ms {
        day.and_time(NaiveTime::MIN).and_utc().timestamp_millis() - self.offset_ms()
    }

    pub fn day_span(&self, day: NaiveDate) -> Span {
        let start = self.day_start(day);
        Span::new(start, start + DAY_MS)
    }

    /// Local wall-clock time on `day`.
    pub fn at(&self, day: NaiveDate, hour: u32, minute: u32) -> Ms {
        self.day_start(day) + hour as Ms * HOUR_MS + minute as Ms * MINUTE_MS
    }

    fn local(&self, t: Ms) -> DateTime<FixedOffset> {
        DateTime::<Utc>::from_timestamp_millis(t)
            .unwrap_or_default()
            .with_timezone(&self.offset)
    }

    /// The local calendar day containing `t`.
    pub fn day_of(&self, t: Ms) -> NaiveDate {
        self.local(t).date_naive()
    }

    /// Milliseconds elapsed since local midnight.
    pub fn time_of_day(&self, t: Ms) -> Ms {
        t - self.day_start(self.day_of(t))
    }

    /// 12-hour clock label: "10:00 AM", "12:00 PM", "1:30 PM".
    pub fn format_slot_label(&self, t: Ms) -> String {
        let local = self.local(t);
        let hour = local.hour();
        let minute = local.minute();
        let h12 = match hour % 12 {
            0 => 12,
            h => h,
        };
        let suffix = if hour >= 12 { "PM" } else { "AM" };
        format!("{h12}:{minute:02} {suffix}")
    }

    /// Slot start times from `start_hour:00` through `end_hour_inclusive:00`
    /// every `step_minutes`. Hourly 10..=22 yields 13 slots.
    pub fn slots_for_day(
        &self,
        day: NaiveDate,
        start_hour: u32,
        end_hour_inclusive: u32,
        step_minutes: u32,
    ) -> Slots {
        let next = self.at(day, start_hour, 0);
        let last = self.at(day, end_hour_inclusive, 0);
        Slots {
            next,
            last,
            step: step_minutes as Ms * MINUTE_MS,
        }
    }
}

/// Finite iterator over slot start times. Clone it to restart.
#[derive(Debug, Clone)]
pub struct Slots {
    next: Ms,
    last: Ms,
    step: Ms,
}

impl Iterator for Slots {
    type Item = Ms;

    fn next(&mut self) -> Option<Ms> {
        if self.step <= 0 || self.next > self.last {
            return None;
        }
        let slot = self.next;
        self.next += self.step;
        Some(slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()
    }

    #[test]
    fn overlap_basic() {
        assert!(overlaps(0, 100, 50, 100));
        assert!(overlaps(50, 100, 0, 100));
        assert!(overlaps(0, 1000, 100, 10)); // containment
    }

    #[test]
    fn touching_is_not_overlap() {
        assert!(!overlaps(0, 100, 100, 100));
        assert!(!overlaps(100, 100, 0, 100));
    }

    #[test]
    fn zero_duration_never_overlaps() {
        assert!(!overlaps(50, 0, 0, 100));
        assert!(!overlaps(0, 100, 50, 0));
    }

    #[test]
    fn single_ms_overlap() {
        assert!(overlaps(0, 101, 100, 100));
    }

    #[test]
    fn contains_cases() {
        assert!(contains(0, 100, 10, 20));
        assert!(contains(0, 100, 0, 100));
        assert!(!contains(0, 100, 90, 20));
    }

    #[test]
    fn hourly_slots_ten_to_ten() {
        let cal = Calendar::utc();
        let slots: Vec<Ms> = cal.slots_for_day(day(), 10, 22, 60).collect();
        assert_eq!(slots.len(), 13);
        assert_eq!(slots[0], cal.at(day(), 10, 0));
        assert_eq!(slots[12], cal.at(day(), 22, 0));
    }

    #[test]
    fn slots_are_restartable() {
        let cal = Calendar::utc();
        let slots = cal.slots_for_day(day(), 10, 12, 30);
        let a: Vec<Ms> = slots.clone().collect();
        let b: Vec<Ms> = slots.collect();
        assert_eq!(a, b);
        assert_eq!(a.len(), 5);
    }

    #[test]
    fn zero_step_yields_nothing() {
        let cal = Calendar::utc();
        assert_eq!(cal.slots_for_day(day(), 10, 22, 0).count(), 0);
    }

    #[test]
    fn slot_labels() {
        let cal = Calendar::utc();
        assert_eq!(cal.format_slot_label(cal.at(day(), 10, 0)), "10:00 AM");
        assert_eq!(cal.format_slot_label(cal.at(day(), 12, 0)), "12:00 PM");
        assert_eq!(cal.format_slot_label(cal.at(day(), 13, 0)), "1:00 PM");
        assert_eq!(cal.format_slot_label(cal.at(day(), 22, 30)), "10:30 PM");
        assert_eq!(cal.format_slot_label(cal.at(day(), 0, 0)), "12:00 AM");
    }

    #[test]
    fn offset_calendar_day_boundaries() {
        let cal = Calendar::from_offset_minutes(180).unwrap();
        let utc = Calendar::utc();
        // Local midnight in UTC+3 is 21:00 UTC the previous day.
        assert_eq!(cal.day_start(day()), utc.day_start(day()) - 3 * HOUR_MS);
        assert_eq!(cal.day_of(cal.at(day(), 23, 59)), day());
        assert_eq!(cal.day_of(cal.at(day(), 0, 0)), day());
        assert_eq!(cal.format_slot_label(cal.at(day(), 13, 0)), "1:00 PM");
        assert_eq!(cal.time_of_day(cal.at(day(), 12, 30)), 12 * HOUR_MS + 30 * MINUTE_MS);
    }

    #[test]
    fn out_of_range_offset_rejected() {
        assert!(Calendar::from_offset_minutes(25 * 60).is_none());
    }
}
