//! Blackout registry: the venue's prayer-time windows and the question
//! "is this interval blacked out".

use chrono::{Days, NaiveDate};
use ulid::Ulid;

use crate::model::{BlackoutWindow, MINUTE_MS, Ms, Recurrence, Span};
use crate::window::Calendar;

/// Preparation time blocked before a blackout's nominal start.
pub const DEFAULT_LEAD_IN_MINUTES: u32 = 30;

/// A blackout window materialized on a specific day.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    pub window_id: Ulid,
    pub label: String,
    /// `[start, start + duration)` as announced.
    pub nominal: Span,
    /// Nominal span extended backwards by the lead-in. This is what blocks.
    pub blocked: Span,
}

#[derive(Debug, Clone)]
pub struct BlackoutRegistry {
    calendar: Calendar,
    default_lead_in_min: u32,
    windows: Vec<BlackoutWindow>,
}

impl BlackoutRegistry {
    pub fn new(calendar: Calendar, default_lead_in_min: u32) -> Self {
        Self {
            calendar,
            default_lead_in_min,
            windows: Vec::new(),
        }
    }

    pub fn calendar(&self) -> Calendar {
        self.calendar
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    pub fn windows(&self) -> &[BlackoutWindow] {
        &self.windows
    }

    pub fn get(&self, id: &Ulid) -> Option<&BlackoutWindow> {
        self.windows.iter().find(|w| w.id == *id)
    }

    /// Insert or replace by id.
    pub fn upsert(&mut self, window: BlackoutWindow) {
        match self.windows.iter_mut().find(|w| w.id == window.id) {
            Some(existing) => *existing = window,
            None => self.windows.push(window),
        }
    }

    pub fn remove(&mut self, id: &Ulid) -> Option<BlackoutWindow> {
        let pos = self.windows.iter().position(|w| w.id == *id)?;
        Some(self.windows.remove(pos))
    }

    fn lead_in_ms(&self, window: &BlackoutWindow) -> Ms {
        window.lead_in_min.unwrap_or(self.default_lead_in_min) as Ms * MINUTE_MS
    }

    /// Where `window` falls on `day`, if it occurs that day at all.
    pub fn occurrence_on(&self, window: &BlackoutWindow, day: NaiveDate) -> Option<Occurrence> {
        if window.duration_min == 0 {
            return None;
        }
        let first_day = self.calendar.day_of(window.start);
        let start = match window.recurrence {
            Recurrence::Once if first_day == day => window.start,
            Recurrence::Once => return None,
            Recurrence::Daily if day >= first_day => {
                self.calendar.day_start(day) + self.calendar.time_of_day(window.start)
            }
            Recurrence::Daily => return None,
        };
        let nominal = Span::from_minutes(start, window.duration_min);
        let blocked = Span::new(nominal.start - self.lead_in_ms(window), nominal.end);
        Some(Occurrence {
            window_id: window.id,
            label: window.label.clone(),
            nominal,
            blocked,
        })
    }

    /// All occurrences on `day`, ordered by nominal start.
    pub fn windows_for_day(&self, day: NaiveDate) -> Vec<Occurrence> {
        let mut out: Vec<Occurrence> = self
            .windows
            .iter()
            .filter_map(|w| self.occurrence_on(w, day))
            .collect();
        out.sort_by_key(|o| o.nominal.start);
        out
    }

    /// Occurrences on `day` and its neighbours, so intervals and lead-ins
    /// that cross midnight are still caught.
    fn occurrences_around(&self, day: NaiveDate) -> impl Iterator<Item = Occurrence> + '_ {
        let days = [day.checked_sub_days(Days::new(1)), Some(day), day.checked_add_days(Days::new(1))];
        days.into_iter()
            .flatten()
            .flat_map(move |d| self.windows.iter().filter_map(move |w| self.occurrence_on(w, d)))
    }

    /// The first blackout whose blocked span overlaps `span`.
    pub fn conflict(&self, span: &Span, day: NaiveDate) -> Option<Occurrence> {
        self.occurrences_around(day)
            .filter(|o| o.blocked.overlaps(span))
            .min_by_key(|o| o.blocked.start)
    }

    pub fn is_blacked(&self, span: &Span, day: NaiveDate) -> bool {
        self.conflict(span, day).is_some()
    }

    /// The blackout in effect at instant `t`, if any.
    pub fn active_at(&self, t: Ms) -> Option<Occurrence> {
        self.conflict(&Span::new(t, t + 1), self.calendar.day_of(t))
    }

    /// Occurrences whose nominal start falls in `(after, until]`.
    pub fn starting_between(&self, after: Ms, until: Ms) -> Vec<Occurrence> {
        if until <= after {
            return Vec::new();
        }
        let first = self.calendar.day_of(after);
        let last = self.calendar.day_of(until);
        let mut out = Vec::new();
        let mut day = first;
        while day <= last {
            for o in self.windows_for_day(day) {
                if o.nominal.start > after && o.nominal.start <= until {
                    out.push(o);
                }
            }
            match day.checked_add_days(Days::new(1)) {
                Some(next) => day = next,
                None => break,
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()
    }

    fn window(cal: &Calendar, label: &str, hour: u32, minute: u32, dur: u32, recurrence: Recurrence) -> BlackoutWindow {
        BlackoutWindow {
            id: Ulid::new(),
            label: label.into(),
            start: cal.at(day(), hour, minute),
            duration_min: dur,
            lead_in_min: None,
            recurrence,
        }
    }

    fn registry() -> BlackoutRegistry {
        BlackoutRegistry::new(Calendar::utc(), DEFAULT_LEAD_IN_MINUTES)
    }

    #[test]
    fn dhuhr_blocks_lead_in_through_end() {
        let mut reg = registry();
        let cal = reg.calendar();
        reg.upsert(window(&cal, "Dhuhr", 12, 30, 30, Recurrence::Once));

        let occ = &reg.windows_for_day(day())[0];
        assert_eq!(occ.blocked, Span::new(cal.at(day(), 12, 0), cal.at(day(), 13, 0)));

        let request = Span::new(cal.at(day(), 12, 45), cal.at(day(), 13, 15));
        let hit = reg.conflict(&request, day()).unwrap();
        assert_eq!(hit.label, "Dhuhr");

        // Lead-in alone blocks.
        let early = Span::new(cal.at(day(), 11, 30), cal.at(day(), 12, 10));
        assert!(reg.is_blacked(&early, day()));
    }

    #[test]
    fn touching_blocked_span_is_free() {
        let mut reg = registry();
        let cal = reg.calendar();
        reg.upsert(window(&cal, "Dhuhr", 12, 30, 30, Recurrence::Once));
        let before = Span::new(cal.at(day(), 11, 0), cal.at(day(), 12, 0));
        let after = Span::new(cal.at(day(), 13, 0), cal.at(day(), 14, 0));
        assert!(!reg.is_blacked(&before, day()));
        assert!(!reg.is_blacked(&after, day()));
    }

    #[test]
    fn explicit_lead_in_overrides_default() {
        let mut reg = registry();
        let cal = reg.calendar();
        let mut w = window(&cal, "Asr", 15, 0, 20, Recurrence::Once);
        w.lead_in_min = Some(0);
        reg.upsert(w);
        let just_before = Span::new(cal.at(day(), 14, 0), cal.at(day(), 15, 0));
        assert!(!reg.is_blacked(&just_before, day()));
    }

    #[test]
    fn daily_window_recurs() {
        let mut reg = registry();
        let cal = reg.calendar();
        reg.upsert(window(&cal, "Maghrib", 18, 0, 15, Recurrence::Daily));

        let tomorrow = day().checked_add_days(Days::new(1)).unwrap();
        let occ = reg.windows_for_day(tomorrow);
        assert_eq!(occ.len(), 1);
        assert_eq!(occ[0].nominal.start, cal.at(tomorrow, 18, 0));

        let yesterday = day().checked_sub_days(Days::new(1)).unwrap();
        assert!(reg.windows_for_day(yesterday).is_empty());
    }

    #[test]
    fn once_window_only_on_its_day() {
        let mut reg = registry();
        let cal = reg.calendar();
        reg.upsert(window(&cal, "Eid", 9, 0, 60, Recurrence::Once));
        let tomorrow = day().checked_add_days(Days::new(1)).unwrap();
        assert!(reg.windows_for_day(tomorrow).is_empty());
    }

    #[test]
    fn lead_in_crossing_midnight() {
        let mut reg = registry();
        let cal = reg.calendar();
        reg.upsert(window(&cal, "Fajr", 0, 10, 20, Recurrence::Daily));
        let tomorrow = day().checked_add_days(Days::new(1)).unwrap();
        // 23:45 today overlaps tomorrow's lead-in [23:40, 00:30).
        let late = Span::new(cal.at(day(), 23, 45), cal.at(day(), 23, 55));
        assert!(reg.is_blacked(&late, day()));
        assert!(reg.conflict(&late, day()).unwrap().nominal.start == cal.at(tomorrow, 0, 10));
    }

    #[test]
    fn windows_for_day_sorted() {
        let mut reg = registry();
        let cal = reg.calendar();
        reg.upsert(window(&cal, "Isha", 20, 0, 20, Recurrence::Daily));
        reg.upsert(window(&cal, "Dhuhr", 12, 30, 30, Recurrence::Daily));
        let labels: Vec<String> = reg.windows_for_day(day()).into_iter().map(|o| o.label).collect();
        assert_eq!(labels, vec!["Dhuhr", "Isha"]);
    }

    #[test]
    fn active_at_uses_blocked_span() {
        let mut reg = registry();
        let cal = reg.calendar();
        reg.upsert(window(&cal, "Dhuhr", 12, 30, 30, Recurrence::Once));
        assert!(reg.active_at(cal.at(day(), 12, 5)).is_some());
        assert!(reg.active_at(cal.at(day(), 13, 0)).is_none());
    }

    #[test]
    fn starting_between_half_open() {
        let mut reg = registry();
        let cal = reg.calendar();
        reg.upsert(window(&cal, "Dhuhr", 12, 30, 30, Recurrence::Daily));
        let at = cal.at(day(), 12, 30);
        assert_eq!(reg.starting_between(at - 1000, at).len(), 1);
        assert!(reg.starting_between(at, at + 1000).is_empty());
    }

    #[test]
    fn upsert_and_remove() {
        let mut reg = registry();
        let cal = reg.calendar();
        let mut w = window(&cal, "Dhuhr", 12, 30, 30, Recurrence::Once);
        reg.upsert(w.clone());
        w.label = "Zuhr".into();
        reg.upsert(w.clone());
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get(&w.id).unwrap().label, "Zuhr");
        assert!(reg.remove(&w.id).is_some());
        assert!(reg.is_empty());
    }
}
