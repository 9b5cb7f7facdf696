use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::table::TableStatus;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const HOUR_MS: Ms = 60 * MINUTE_MS;
pub const DAY_MS: Ms = 24 * HOUR_MS;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn from_minutes(start: Ms, minutes: u32) -> Self {
        Self::new(start, start + minutes as Ms * MINUTE_MS)
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

// ── Sessions ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionKind {
    /// Booked for a fixed number of minutes.
    Timed,
    /// Runs until staff close it; billed at least one hour.
    Open,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionStatus {
    Active,
    Completed,
}

/// One physical occupancy of a table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: Ulid,
    pub table_id: Ulid,
    pub occupant_id: Ulid,
    pub kind: SessionKind,
    pub duration_min: Option<u32>,
    pub start: Ms,
    pub end: Option<Ms>,
    pub cost: Option<i64>,
    pub status: SessionStatus,
    pub closed_by: Option<Ulid>,
}

impl Session {
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }
}

// ── Reservations ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationStatus {
    Pending,
    Confirmed,
    Cancelled,
    Completed,
}

impl ReservationStatus {
    /// Pending and confirmed reservations hold their interval.
    pub fn is_active(self) -> bool {
        matches!(self, ReservationStatus::Pending | ReservationStatus::Confirmed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub name: String,
    pub phone: String,
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub table_id: Ulid,
    pub requester_id: Ulid,
    pub start: Ms,
    pub duration_min: u32,
    pub status: ReservationStatus,
    pub contact: Contact,
    pub party_size: u32,
    pub notes: Option<String>,
    pub created_at: Ms,
    pub updated_at: Ms,
}

impl Reservation {
    pub fn span(&self) -> Span {
        Span::from_minutes(self.start, self.duration_min)
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }
}

/// Input for `Engine::create_reservation`.
#[derive(Debug, Clone)]
pub struct NewReservation {
    pub table_id: Ulid,
    pub requester_id: Ulid,
    pub start: Ms,
    pub duration_min: u32,
    pub party_size: u32,
    pub contact: Contact,
    pub notes: Option<String>,
}

/// Field patch for `Engine::update_reservation`. `None` leaves a field alone.
#[derive(Debug, Clone, Default)]
pub struct ReservationPatch {
    pub start: Option<Ms>,
    pub duration_min: Option<u32>,
    pub status: Option<ReservationStatus>,
    pub contact: Option<Contact>,
    pub party_size: Option<u32>,
    pub notes: Option<Option<String>>,
}

impl ReservationPatch {
    pub fn status(status: ReservationStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    pub fn changes_time(&self) -> bool {
        self.start.is_some() || self.duration_min.is_some()
    }
}

// ── Blackouts ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Recurrence {
    Once,
    /// Repeats at the same local wall-clock time every day.
    Daily,
}

/// A blackout ("prayer time") during which tables may not be reserved or opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlackoutWindow {
    pub id: Ulid,
    pub label: String,
    /// Nominal start of the first occurrence.
    pub start: Ms,
    pub duration_min: u32,
    /// Preparation time blocked before the nominal start. Falls back to the
    /// registry default when unset.
    pub lead_in_min: Option<u32>,
    pub recurrence: Recurrence,
}

#[derive(Debug, Clone)]
pub struct NewBlackout {
    pub label: String,
    pub start: Ms,
    pub duration_min: u32,
    pub lead_in_min: Option<u32>,
    pub recurrence: Recurrence,
}

/// Marks a table as blacked out by a specific blackout application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlackoutHold {
    pub id: Ulid,
    pub until: Ms,
}

// ── Tables ───────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct TableState {
    pub id: Ulid,
    pub number: u32,
    pub hourly_rate: f64,
    pub status: TableStatus,
    pub active_session: Option<Ulid>,
    pub blackout: Option<BlackoutHold>,
    /// All reservations of this table, sorted by `start`.
    pub reservations: Vec<Reservation>,
}

impl TableState {
    pub fn new(id: Ulid, number: u32, hourly_rate: f64) -> Self {
        Self {
            id,
            number,
            hourly_rate,
            status: TableStatus::Available,
            active_session: None,
            blackout: None,
            reservations: Vec::new(),
        }
    }

    /// Insert reservation maintaining sort order by start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .binary_search_by_key(&reservation.start, |r| r.start)
            .unwrap_or_else(|e| e);
        self.reservations.insert(pos, reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        if let Some(pos) = self.reservations.iter().position(|r| r.id == id) {
            Some(self.reservations.remove(pos))
        } else {
            None
        }
    }

    /// Replace a reservation in place, re-sorting if its start moved.
    pub fn upsert_reservation(&mut self, reservation: Reservation) {
        self.remove_reservation(reservation.id);
        self.insert_reservation(reservation);
    }

    pub fn reservation(&self, id: &Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == *id)
    }

    /// Return only reservations whose span overlaps the query window.
    /// Uses binary search to skip reservations starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        let right_bound = self
            .reservations
            .partition_point(|r| r.start < query.end);
        self.reservations[..right_bound]
            .iter()
            .filter(move |r| r.span().end > query.start)
    }

    /// Pending/confirmed reservations overlapping `query`.
    pub fn active_overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        self.overlapping(query).filter(|r| r.is_active())
    }

    /// The active reservation in progress at `now`, skipping `except`.
    pub fn active_at(&self, now: Ms, except: Option<Ulid>) -> Option<&Reservation> {
        self.reservations
            .iter()
            .take_while(|r| r.start <= now)
            .find(|r| Some(r.id) != except && r.is_active() && r.span().contains_instant(now))
    }

    pub fn info(&self) -> TableInfo {
        TableInfo {
            id: self.id,
            number: self.number,
            status: self.status,
            light_on: self.status.light_on(),
            hourly_rate: self.hourly_rate,
            active_session: self.active_session,
        }
    }
}

/// The event types, flat with no nesting. This is the WAL record format.
///
/// Each record is one unit of work: a status change always travels in the
/// same record as the domain mutation that caused it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    TableCreated {
        id: Ulid,
        number: u32,
        hourly_rate: f64,
    },
    TableStatusChanged {
        id: Ulid,
        status: TableStatus,
    },
    SessionOpened {
        session: Session,
        status: TableStatus,
    },
    SessionClosed {
        id: Ulid,
        table_id: Ulid,
        end: Ms,
        cost: i64,
        closed_by: Ulid,
        status: Option<TableStatus>,
    },
    ReservationCreated {
        reservation: Reservation,
        status: Option<TableStatus>,
    },
    ReservationUpdated {
        reservation: Reservation,
        status: Option<TableStatus>,
    },
    BlackoutAdded {
        window: BlackoutWindow,
    },
    BlackoutUpdated {
        window: BlackoutWindow,
    },
    BlackoutRemoved {
        id: Ulid,
    },
    BlackoutApplied {
        id: Ulid,
        table_ids: Vec<Ulid>,
        until: Ms,
    },
    BlackoutEnded {
        id: Ulid,
        table_ids: Vec<Ulid>,
    },
    /// Compaction record: full table snapshot without reservations.
    TableRestored {
        id: Ulid,
        number: u32,
        hourly_rate: f64,
        status: TableStatus,
        active_session: Option<Ulid>,
        blackout: Option<BlackoutHold>,
    },
    /// Compaction record for a session in any state.
    SessionRestored {
        session: Session,
    },
}

// ── Query result types ───────────────────────────────────────────

/// Table snapshot carried by `TABLE_UPDATED`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableInfo {
    pub id: Ulid,
    pub number: u32,
    pub status: TableStatus,
    pub light_on: bool,
    pub hourly_rate: f64,
    pub active_session: Option<Ulid>,
}

/// Result of applying a blackout to the venue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlackoutApplication {
    pub id: Ulid,
    pub table_ids: Vec<Ulid>,
    pub duration_min: u32,
    pub until: Ms,
}
