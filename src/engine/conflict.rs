use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::table::{TableStatus, Trigger};

use super::EngineError;

/// Wall clock as Unix milliseconds.
pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as Ms
}

pub(crate) fn validate_timestamp(t: Ms) -> Result<(), EngineError> {
    if !(MIN_VALID_TIMESTAMP_MS..MAX_VALID_TIMESTAMP_MS).contains(&t) {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(())
}

pub(crate) fn validate_duration(minutes: u32) -> Result<(), EngineError> {
    if minutes == 0 {
        return Err(EngineError::Validation("duration must be positive"));
    }
    if minutes > MAX_DURATION_MINUTES {
        return Err(EngineError::LimitExceeded("duration too long"));
    }
    Ok(())
}

fn validate_contact(contact: &Contact) -> Result<(), EngineError> {
    if contact.name.trim().is_empty() {
        return Err(EngineError::Validation("contact name is required"));
    }
    if contact.phone.trim().is_empty() {
        return Err(EngineError::Validation("contact phone is required"));
    }
    let too_long = contact.name.len() > MAX_CONTACT_LEN
        || contact.phone.len() > MAX_CONTACT_LEN
        || contact.email.as_ref().is_some_and(|e| e.len() > MAX_CONTACT_LEN);
    if too_long {
        return Err(EngineError::LimitExceeded("contact field too long"));
    }
    Ok(())
}

/// Field checks shared by create and update.
pub(crate) fn validate_reservation(r: &Reservation) -> Result<(), EngineError> {
    validate_duration(r.duration_min)?;
    if r.party_size == 0 {
        return Err(EngineError::Validation("party size must be at least 1"));
    }
    if r.party_size > MAX_PARTY_SIZE {
        return Err(EngineError::LimitExceeded("party too large"));
    }
    validate_contact(&r.contact)?;
    if r.notes.as_ref().is_some_and(|n| n.len() > MAX_NOTES_LEN) {
        return Err(EngineError::LimitExceeded("notes too long"));
    }
    validate_timestamp(r.start)?;
    validate_timestamp(r.span().end)
}

pub(crate) fn validate_blackout(new: &NewBlackout) -> Result<(), EngineError> {
    if new.label.trim().is_empty() {
        return Err(EngineError::Validation("blackout label is required"));
    }
    if new.label.len() > MAX_LABEL_LEN {
        return Err(EngineError::LimitExceeded("label too long"));
    }
    validate_duration(new.duration_min)?;
    if new.lead_in_min.is_some_and(|m| m > MAX_DURATION_MINUTES) {
        return Err(EngineError::LimitExceeded("lead-in too long"));
    }
    validate_timestamp(new.start)
}

/// Fails with the first active reservation overlapping `span`. `except` is
/// skipped so a reservation can be moved over its own old interval.
pub(crate) fn check_no_conflict(
    ts: &TableState,
    span: &Span,
    except: Option<Ulid>,
) -> Result<(), EngineError> {
    match ts
        .active_overlapping(span)
        .find(|r| Some(r.id) != except)
    {
        Some(r) => Err(EngineError::SlotConflict(r.id)),
        None => Ok(()),
    }
}

/// True if an active reservation other than `except` is in progress at `now`.
pub(crate) fn covered_at(ts: &TableState, now: Ms, except: Option<Ulid>) -> bool {
    ts.active_at(now, except).is_some()
}

/// Reservation-driven status change, if any. A table flips to `RESERVED`
/// only while idle, and back only from `RESERVED`.
pub(crate) fn reservation_trigger(
    status: TableStatus,
    has_session: bool,
    covered: bool,
) -> Option<Trigger> {
    match status {
        TableStatus::Available if covered && !has_session => Some(Trigger::ReservationStarted),
        TableStatus::Reserved if !covered => Some(Trigger::ReservationReleased),
        _ => None,
    }
}
