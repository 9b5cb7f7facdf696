use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Serialize, Serializer};
use ulid::Ulid;

use crate::blackout::BlackoutRegistry;
use crate::model::*;
use crate::table::TableStatus;
use crate::window::Slots;

use super::{Engine, EngineError};

// ── Availability grid ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlotAvailability {
    /// 12-hour label, e.g. "1:00 PM".
    pub label: String,
    pub start: Ms,
    pub available: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableAvailability {
    pub table_number: u32,
    /// Serialized as a label → availability map, in slot order.
    #[serde(serialize_with = "slots_as_map")]
    pub slots: Vec<SlotAvailability>,
}

fn slots_as_map<S: Serializer>(slots: &[SlotAvailability], serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_map(slots.iter().map(|s| (s.label.as_str(), s.available)))
}

impl TableAvailability {
    /// Availability of the slot with this label, if the grid has it.
    pub fn get(&self, label: &str) -> Option<bool> {
        self.slots.iter().find(|s| s.label == label).map(|s| s.available)
    }
}

/// Per-day grid: table id → bookable slots. Derived on demand, never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AvailabilityGrid {
    pub day: NaiveDate,
    pub tables: BTreeMap<Ulid, TableAvailability>,
}

/// Grid row for one table. A slot `[slot, slot + slot_len)` is free iff the
/// table is in service, no active reservation overlaps it and no blackout
/// (including lead-in) overlaps it. Touching intervals do not overlap.
pub fn slot_availability(
    ts: &TableState,
    registry: &BlackoutRegistry,
    day: NaiveDate,
    slots: Slots,
    slot_len: Ms,
) -> TableAvailability {
    let out_of_service = matches!(ts.status, TableStatus::Maintenance | TableStatus::Blackout);
    let calendar = registry.calendar();
    let slots = slots
        .map(|start| {
            let span = Span::new(start, start + slot_len);
            let available = !out_of_service
                && ts.active_overlapping(&span).next().is_none()
                && !registry.is_blacked(&span, day);
            SlotAvailability {
                label: calendar.format_slot_label(start),
                start,
                available,
            }
        })
        .collect();
    TableAvailability {
        table_number: ts.number,
        slots,
    }
}

impl Engine {
    /// Bookable slots on `day` for one table, or for every table.
    pub async fn available_time_slots(
        &self,
        day: NaiveDate,
        table_id: Option<Ulid>,
    ) -> Result<AvailabilityGrid, EngineError> {
        let started = std::time::Instant::now();
        let result = self.available_time_slots_inner(day, table_id).await;
        super::observe("available_time_slots", started, &result);
        result
    }

    async fn available_time_slots_inner(
        &self,
        day: NaiveDate,
        table_id: Option<Ulid>,
    ) -> Result<AvailabilityGrid, EngineError> {
        let targets = match table_id {
            Some(id) => vec![(id, self.get_table(&id).ok_or(EngineError::NotFound(id))?)],
            None => self.state.iter().map(|e| (*e.key(), e.value().clone())).collect(),
        };
        // Snapshot the registry so no table lock is taken while it is held.
        let registry = self.blackouts.read().await.clone();

        let s = &self.schedule;
        if s.slot_length_minutes == 0 {
            return Err(EngineError::Validation("slot length must be positive"));
        }
        let slots = s
            .calendar
            .slots_for_day(day, s.open_hour, s.last_slot_hour, s.slot_step_minutes);
        let slot_len = s.slot_length_minutes as Ms * MINUTE_MS;

        let mut tables = BTreeMap::new();
        for (id, ts) in targets {
            let guard = ts.read().await;
            tables.insert(id, slot_availability(&guard, &registry, day, slots.clone(), slot_len));
        }
        Ok(AvailabilityGrid { day, tables })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blackout::DEFAULT_LEAD_IN_MINUTES;
    use crate::window::Calendar;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()
    }

    fn confirmed(cal: &Calendar, hour: u32, minutes: u32) -> Reservation {
        Reservation {
            id: Ulid::new(),
            table_id: Ulid::nil(),
            requester_id: Ulid::nil(),
            start: cal.at(day(), hour, 0),
            duration_min: minutes,
            status: ReservationStatus::Confirmed,
            contact: Contact {
                name: "Ali".into(),
                phone: "555-0101".into(),
                email: None,
            },
            party_size: 2,
            notes: None,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn grid(ts: &TableState, registry: &BlackoutRegistry) -> TableAvailability {
        let cal = registry.calendar();
        slot_availability(ts, registry, day(), cal.slots_for_day(day(), 10, 22, 60), HOUR_MS)
    }

    #[test]
    fn empty_day_is_all_available() {
        let ts = TableState::new(Ulid::new(), 1, 5.0);
        let reg = BlackoutRegistry::new(Calendar::utc(), DEFAULT_LEAD_IN_MINUTES);
        let row = grid(&ts, &reg);
        assert_eq!(row.slots.len(), 13);
        assert!(row.slots.iter().all(|s| s.available));
        assert_eq!(row.slots[0].label, "10:00 AM");
        assert_eq!(row.slots[12].label, "10:00 PM");
    }

    #[test]
    fn maintenance_blocks_every_slot() {
        let mut ts = TableState::new(Ulid::new(), 1, 5.0);
        ts.status = TableStatus::Maintenance;
        let reg = BlackoutRegistry::new(Calendar::utc(), DEFAULT_LEAD_IN_MINUTES);
        assert!(grid(&ts, &reg).slots.iter().all(|s| !s.available));
    }

    #[test]
    fn in_use_table_still_bookable_later() {
        let mut ts = TableState::new(Ulid::new(), 1, 5.0);
        ts.status = TableStatus::InUse;
        let reg = BlackoutRegistry::new(Calendar::utc(), DEFAULT_LEAD_IN_MINUTES);
        assert!(grid(&ts, &reg).slots.iter().all(|s| s.available));
    }

    #[test]
    fn reservation_blocks_only_its_slots() {
        let cal = Calendar::utc();
        let mut ts = TableState::new(Ulid::new(), 1, 5.0);
        ts.insert_reservation(confirmed(&cal, 14, 90));
        let reg = BlackoutRegistry::new(cal, DEFAULT_LEAD_IN_MINUTES);
        let row = grid(&ts, &reg);
        assert_eq!(row.get("1:00 PM"), Some(true));
        assert_eq!(row.get("2:00 PM"), Some(false));
        assert_eq!(row.get("3:00 PM"), Some(false));
        assert_eq!(row.get("4:00 PM"), Some(true));
    }

    #[test]
    fn cancelled_reservation_frees_slot() {
        let cal = Calendar::utc();
        let mut ts = TableState::new(Ulid::new(), 1, 5.0);
        let mut r = confirmed(&cal, 14, 60);
        r.status = ReservationStatus::Cancelled;
        ts.insert_reservation(r);
        let reg = BlackoutRegistry::new(cal, DEFAULT_LEAD_IN_MINUTES);
        assert_eq!(grid(&ts, &reg).get("2:00 PM"), Some(true));
    }

    #[test]
    fn blackout_with_lead_in_blocks_slots() {
        let cal = Calendar::utc();
        let ts = TableState::new(Ulid::new(), 1, 5.0);
        let mut reg = BlackoutRegistry::new(cal, DEFAULT_LEAD_IN_MINUTES);
        reg.upsert(BlackoutWindow {
            id: Ulid::new(),
            label: "Dhuhr".into(),
            start: cal.at(day(), 12, 30),
            duration_min: 30,
            lead_in_min: None,
            recurrence: Recurrence::Daily,
        });
        let row = grid(&ts, &reg);
        // Blocked [12:00, 13:00).
        assert_eq!(row.get("11:00 AM"), Some(true));
        assert_eq!(row.get("12:00 PM"), Some(false));
        assert_eq!(row.get("1:00 PM"), Some(true));
    }

    #[test]
    fn row_serializes_as_label_map() {
        let cal = Calendar::utc();
        let mut ts = TableState::new(Ulid::new(), 4, 5.0);
        ts.insert_reservation(confirmed(&cal, 12, 60));
        let reg = BlackoutRegistry::new(cal, DEFAULT_LEAD_IN_MINUTES);
        let json = serde_json::to_value(grid(&ts, &reg)).unwrap();

        assert_eq!(json["table_number"], 4);
        let slots = json["slots"].as_object().unwrap();
        assert_eq!(slots.len(), 13);
        assert_eq!(slots["11:00 AM"], true);
        assert_eq!(slots["12:00 PM"], false);

        let text = serde_json::to_string(&grid(&ts, &reg)).unwrap();
        let ten = text.find("\"10:00 AM\"").unwrap();
        let eleven = text.find("\"11:00 AM\"").unwrap();
        assert!(ten < eleven);
    }

    #[test]
    fn unknown_label_is_none() {
        let ts = TableState::new(Ulid::new(), 1, 5.0);
        let reg = BlackoutRegistry::new(Calendar::utc(), DEFAULT_LEAD_IN_MINUTES);
        assert_eq!(grid(&ts, &reg).get("3:30 AM"), None);
    }
}
