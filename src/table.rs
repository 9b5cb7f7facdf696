//! Table status state machine.
//!
//! `transition` is pure: it validates a trigger against the current status
//! and returns the resulting status together with the side effects the
//! engine must run once the change is committed.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TableStatus {
    Available,
    InUse,
    Reserved,
    Maintenance,
    Blackout,
}

impl TableStatus {
    /// The table light is on only while someone is playing.
    pub fn light_on(self) -> bool {
        self == TableStatus::InUse
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TableStatus::Available => "AVAILABLE",
            TableStatus::InUse => "IN_USE",
            TableStatus::Reserved => "RESERVED",
            TableStatus::Maintenance => "MAINTENANCE",
            TableStatus::Blackout => "BLACKOUT",
        }
    }
}

impl std::fmt::Display for TableStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    OpenSession,
    CloseSession,
    ReservationStarted,
    ReservationReleased,
    StartMaintenance,
    EndMaintenance,
    BlackoutApplied,
    BlackoutElapsed,
}

impl Trigger {
    pub fn as_str(self) -> &'static str {
        match self {
            Trigger::OpenSession => "open session",
            Trigger::CloseSession => "close session",
            Trigger::ReservationStarted => "reservation started",
            Trigger::ReservationReleased => "reservation released",
            Trigger::StartMaintenance => "start maintenance",
            Trigger::EndMaintenance => "end maintenance",
            Trigger::BlackoutApplied => "blackout applied",
            Trigger::BlackoutElapsed => "blackout elapsed",
        }
    }
}

/// What the transition function needs to know about a table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableFacts {
    pub status: TableStatus,
    pub has_active_session: bool,
}

/// Side effects requested by a transition. Persistence is not listed: the
/// new status always travels inside the WAL record of the causing mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    SetLight(bool),
    BroadcastTable,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub from: TableStatus,
    pub to: TableStatus,
    pub effects: Vec<Effect>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionError {
    /// The trigger is not legal from the current status.
    Illegal { from: TableStatus, trigger: Trigger },
    /// The trigger is legal but its guard failed.
    Guard { from: TableStatus, trigger: Trigger, reason: &'static str },
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransitionError::Illegal { from, trigger } => {
                write!(f, "cannot {} while table is {from}", trigger.as_str())
            }
            TransitionError::Guard { from, trigger, reason } => {
                write!(f, "cannot {} while table is {from}: {reason}", trigger.as_str())
            }
        }
    }
}

impl std::error::Error for TransitionError {}

pub fn transition(facts: TableFacts, trigger: Trigger) -> Result<Transition, TransitionError> {
    use TableStatus::*;

    let from = facts.status;
    let to = match (from, trigger) {
        (Available, Trigger::OpenSession) => {
            if facts.has_active_session {
                return Err(TransitionError::Guard {
                    from,
                    trigger,
                    reason: "an active session already exists",
                });
            }
            InUse
        }
        (InUse, Trigger::CloseSession) => {
            if !facts.has_active_session {
                return Err(TransitionError::Guard {
                    from,
                    trigger,
                    reason: "no active session",
                });
            }
            Available
        }
        (Available, Trigger::ReservationStarted) => Reserved,
        (Reserved, Trigger::ReservationReleased) => Available,
        (InUse, Trigger::BlackoutApplied) => Blackout,
        (Blackout, Trigger::BlackoutElapsed) => Available,
        (Maintenance, Trigger::EndMaintenance) => Available,
        (Maintenance, Trigger::StartMaintenance) => {
            return Err(TransitionError::Guard {
                from,
                trigger,
                reason: "already in maintenance",
            });
        }
        (_, Trigger::StartMaintenance) => Maintenance,
        _ => return Err(TransitionError::Illegal { from, trigger }),
    };

    let mut effects = Vec::with_capacity(2);
    if from.light_on() != to.light_on() {
        effects.push(Effect::SetLight(to.light_on()));
    }
    effects.push(Effect::BroadcastTable);

    Ok(Transition { from, to, effects })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts(status: TableStatus, has_active_session: bool) -> TableFacts {
        TableFacts { status, has_active_session }
    }

    #[test]
    fn open_session_turns_light_on() {
        let t = transition(facts(TableStatus::Available, false), Trigger::OpenSession).unwrap();
        assert_eq!(t.to, TableStatus::InUse);
        assert_eq!(t.effects, vec![Effect::SetLight(true), Effect::BroadcastTable]);
    }

    #[test]
    fn open_session_guard_rejects_existing_session() {
        let err = transition(facts(TableStatus::Available, true), Trigger::OpenSession).unwrap_err();
        assert!(matches!(err, TransitionError::Guard { .. }));
    }

    #[test]
    fn open_session_requires_available() {
        for status in [
            TableStatus::InUse,
            TableStatus::Reserved,
            TableStatus::Maintenance,
            TableStatus::Blackout,
        ] {
            let err = transition(facts(status, false), Trigger::OpenSession).unwrap_err();
            assert_eq!(
                err,
                TransitionError::Illegal { from: status, trigger: Trigger::OpenSession }
            );
        }
    }

    #[test]
    fn close_session_turns_light_off() {
        let t = transition(facts(TableStatus::InUse, true), Trigger::CloseSession).unwrap();
        assert_eq!(t.to, TableStatus::Available);
        assert_eq!(t.effects, vec![Effect::SetLight(false), Effect::BroadcastTable]);
    }

    #[test]
    fn close_session_guard_requires_session() {
        let err = transition(facts(TableStatus::InUse, false), Trigger::CloseSession).unwrap_err();
        assert!(matches!(err, TransitionError::Guard { .. }));
    }

    #[test]
    fn blackout_only_from_in_use() {
        let t = transition(facts(TableStatus::InUse, true), Trigger::BlackoutApplied).unwrap();
        assert_eq!(t.to, TableStatus::Blackout);
        assert!(t.effects.contains(&Effect::SetLight(false)));

        for status in [TableStatus::Available, TableStatus::Reserved, TableStatus::Maintenance] {
            assert!(transition(facts(status, false), Trigger::BlackoutApplied).is_err());
        }
    }

    #[test]
    fn blackout_elapses_to_available_without_light_change() {
        let t = transition(facts(TableStatus::Blackout, true), Trigger::BlackoutElapsed).unwrap();
        assert_eq!(t.to, TableStatus::Available);
        assert_eq!(t.effects, vec![Effect::BroadcastTable]);
    }

    #[test]
    fn reservation_cycle() {
        let t = transition(facts(TableStatus::Available, false), Trigger::ReservationStarted).unwrap();
        assert_eq!(t.to, TableStatus::Reserved);
        let t = transition(facts(t.to, false), Trigger::ReservationReleased).unwrap();
        assert_eq!(t.to, TableStatus::Available);
    }

    #[test]
    fn reservation_cannot_flip_busy_table() {
        assert!(transition(facts(TableStatus::InUse, true), Trigger::ReservationStarted).is_err());
        assert!(transition(facts(TableStatus::Available, false), Trigger::ReservationReleased).is_err());
    }

    #[test]
    fn maintenance_override_from_any_other_state() {
        for status in [
            TableStatus::Available,
            TableStatus::InUse,
            TableStatus::Reserved,
            TableStatus::Blackout,
        ] {
            let t = transition(facts(status, false), Trigger::StartMaintenance).unwrap();
            assert_eq!(t.to, TableStatus::Maintenance);
        }
        let err = transition(facts(TableStatus::Maintenance, false), Trigger::StartMaintenance);
        assert!(err.is_err());
        let t = transition(facts(TableStatus::Maintenance, false), Trigger::EndMaintenance).unwrap();
        assert_eq!(t.to, TableStatus::Available);
    }

    #[test]
    fn every_transition_broadcasts_once() {
        let t = transition(facts(TableStatus::InUse, true), Trigger::StartMaintenance).unwrap();
        let broadcasts = t.effects.iter().filter(|e| **e == Effect::BroadcastTable).count();
        assert_eq!(broadcasts, 1);
    }

    #[test]
    fn status_serializes_screaming_snake() {
        let json = serde_json::to_string(&TableStatus::InUse).unwrap();
        assert_eq!(json, "\"IN_USE\"");
    }
}
