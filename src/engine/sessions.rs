use std::time::Instant;

use tracing::info;
use ulid::Ulid;

use crate::model::*;
use crate::notify::EventKind;
use crate::table::{TableFacts, TableStatus, Trigger, transition};

use super::conflict::{now_ms, validate_duration};
use super::{Engine, EngineError, observe};

/// Bill for a closed session. Minutes are whole (rounded up by the caller);
/// the per-minute rate is `hourly_rate / 60` and the total rounds up.
/// Open sessions are billed at least one hour.
pub fn session_cost(kind: SessionKind, elapsed_min: i64, hourly_rate: f64) -> i64 {
    let metered = (elapsed_min.max(0) as f64 * hourly_rate / 60.0).ceil() as i64;
    match kind {
        SessionKind::Timed => metered,
        SessionKind::Open => metered.max(hourly_rate.ceil() as i64),
    }
}

fn elapsed_minutes(start: Ms, end: Ms) -> i64 {
    let ms = (end - start).max(0);
    (ms + MINUTE_MS - 1) / MINUTE_MS
}

impl Engine {
    pub async fn open_session(
        &self,
        table_id: Ulid,
        occupant_id: Ulid,
        kind: SessionKind,
        duration_min: Option<u32>,
    ) -> Result<Session, EngineError> {
        self.open_session_at(table_id, occupant_id, kind, duration_min, now_ms()).await
    }

    pub async fn open_session_at(
        &self,
        table_id: Ulid,
        occupant_id: Ulid,
        kind: SessionKind,
        duration_min: Option<u32>,
        now: Ms,
    ) -> Result<Session, EngineError> {
        let started = Instant::now();
        let result = self.open_session_inner(table_id, occupant_id, kind, duration_min, now).await;
        observe("open_session", started, &result);
        result
    }

    async fn open_session_inner(
        &self,
        table_id: Ulid,
        occupant_id: Ulid,
        kind: SessionKind,
        duration_min: Option<u32>,
        now: Ms,
    ) -> Result<Session, EngineError> {
        let duration_min = match kind {
            SessionKind::Timed => {
                let d = duration_min.ok_or(EngineError::Validation("timed session needs a duration"))?;
                validate_duration(d)?;
                Some(d)
            }
            SessionKind::Open => None,
        };

        let mut guard = self.table_write(&table_id).await?;
        let t = transition(
            TableFacts {
                status: guard.status,
                has_active_session: guard.active_session.is_some(),
            },
            Trigger::OpenSession,
        )?;
        if let Some(occ) = self.blackouts.read().await.active_at(now) {
            return Err(EngineError::BlackoutConflict { label: occ.label });
        }

        let session = Session {
            id: Ulid::new(),
            table_id,
            occupant_id,
            kind,
            duration_min,
            start: now,
            end: None,
            cost: None,
            status: SessionStatus::Active,
            closed_by: None,
        };
        let event = Event::SessionOpened { session: session.clone(), status: t.to };
        self.persist_and_apply(&mut guard, &event).await?;
        let table = guard.info();
        self.notify.publish(EventKind::SessionUpdated, &session);
        let light = self.dispatch(&t, &table);
        drop(guard);

        if let Some(on) = light {
            self.set_light(table.number, on).await;
        }
        metrics::counter!(crate::observability::SESSIONS_OPENED_TOTAL).increment(1);
        info!("session {} opened on table {}", session.id, table.number);
        self.record_audit(
            occupant_id,
            "open session",
            serde_json::json!({ "table": table.number, "session": session.id.to_string() }),
        );
        Ok(session)
    }

    pub async fn close_session(&self, session_id: Ulid, closed_by: Ulid) -> Result<Session, EngineError> {
        self.close_session_at(session_id, closed_by, now_ms()).await
    }

    pub async fn close_session_at(
        &self,
        session_id: Ulid,
        closed_by: Ulid,
        now: Ms,
    ) -> Result<Session, EngineError> {
        let started = Instant::now();
        let result = self.close_session_inner(session_id, closed_by, now).await;
        observe("close_session", started, &result);
        result
    }

    async fn close_session_inner(
        &self,
        session_id: Ulid,
        closed_by: Ulid,
        now: Ms,
    ) -> Result<Session, EngineError> {
        let table_id = self
            .sessions
            .get(&session_id)
            .map(|s| s.table_id)
            .ok_or(EngineError::NotFound(session_id))?;
        let mut guard = self.table_write(&table_id).await?;

        // Re-read under the table lock: a concurrent close may have won.
        let session = self
            .sessions
            .get(&session_id)
            .map(|s| s.value().clone())
            .filter(|s| s.is_active())
            .ok_or(EngineError::NotFound(session_id))?;

        let cost = session_cost(session.kind, elapsed_minutes(session.start, now), guard.hourly_rate);

        // Only a table that is still in use goes back to AVAILABLE; a table
        // under blackout or maintenance keeps its status.
        let t = if guard.status == TableStatus::InUse {
            Some(transition(
                TableFacts {
                    status: guard.status,
                    has_active_session: guard.active_session == Some(session_id),
                },
                Trigger::CloseSession,
            )?)
        } else {
            None
        };

        let event = Event::SessionClosed {
            id: session_id,
            table_id,
            end: now,
            cost,
            closed_by,
            status: t.as_ref().map(|t| t.to),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let closed = self
            .sessions
            .get(&session_id)
            .map(|s| s.value().clone())
            .ok_or(EngineError::NotFound(session_id))?;
        let table = guard.info();
        self.notify.publish(EventKind::SessionUpdated, &closed);
        let light = t.as_ref().and_then(|t| self.dispatch(t, &table));
        drop(guard);

        if let Some(on) = light {
            self.set_light(table.number, on).await;
        }
        metrics::counter!(crate::observability::SESSIONS_CLOSED_TOTAL).increment(1);
        info!("session {session_id} closed on table {}, cost {cost}", table.number);
        self.record_audit(
            closed_by,
            "close session",
            serde_json::json!({ "table": table.number, "session": session_id.to_string(), "cost": cost }),
        );
        Ok(closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timed_cost_rounds_up() {
        // 90 minutes at 5.0/h is 7.5
        assert_eq!(session_cost(SessionKind::Timed, 90, 5.0), 8);
        assert_eq!(session_cost(SessionKind::Timed, 60, 5.0), 5);
    }

    #[test]
    fn open_cost_has_one_hour_minimum() {
        assert_eq!(session_cost(SessionKind::Open, 10, 30.0), 30);
        assert_eq!(session_cost(SessionKind::Open, 120, 30.0), 60);
    }

    #[test]
    fn negative_elapsed_is_free_for_timed() {
        assert_eq!(session_cost(SessionKind::Timed, -5, 5.0), 0);
    }

    #[test]
    fn elapsed_rounds_partial_minutes_up() {
        assert_eq!(elapsed_minutes(0, 1), 1);
        assert_eq!(elapsed_minutes(0, MINUTE_MS), 1);
        assert_eq!(elapsed_minutes(0, MINUTE_MS + 1), 2);
        assert_eq!(elapsed_minutes(10, 0), 0);
    }
}
