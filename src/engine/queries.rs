use chrono::NaiveDate;
use tokio::sync::oneshot;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::conflict::now_ms;
use super::{Engine, EngineError, WalCommand};

impl Engine {
    // ── Reservations ─────────────────────────────────────────

    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let table_id = self.table_for_reservation(&id).ok_or(EngineError::NotFound(id))?;
        let ts = self.get_table(&table_id).ok_or(EngineError::NotFound(table_id))?;
        let guard = ts.read().await;
        guard.reservation(&id).cloned().ok_or(EngineError::NotFound(id))
    }

    /// Every reservation of a table, in start order.
    pub async fn reservations_for_table(&self, table_id: Ulid) -> Result<Vec<Reservation>, EngineError> {
        let ts = self.get_table(&table_id).ok_or(EngineError::NotFound(table_id))?;
        let guard = ts.read().await;
        Ok(guard.reservations.clone())
    }

    /// Reservations of any status overlapping the local `day`, ordered by start.
    pub async fn reservations_for_day(
        &self,
        day: NaiveDate,
        table_id: Option<Ulid>,
    ) -> Result<Vec<Reservation>, EngineError> {
        let span = self.schedule.calendar.day_span(day);
        let tables = match table_id {
            Some(id) => vec![self.get_table(&id).ok_or(EngineError::NotFound(id))?],
            None => self.state.iter().map(|e| e.value().clone()).collect(),
        };
        let mut out = Vec::new();
        for ts in tables {
            let guard = ts.read().await;
            out.extend(guard.overlapping(&span).cloned());
        }
        out.sort_by_key(|r| (r.start, r.id));
        Ok(out)
    }

    /// The next `limit` active reservations starting at or after `now`.
    pub async fn upcoming_reservations(&self, now: Ms, limit: usize) -> Vec<Reservation> {
        let tables: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::new();
        for ts in tables {
            let guard = ts.read().await;
            let from = guard.reservations.partition_point(|r| r.start < now);
            out.extend(
                guard.reservations[from..]
                    .iter()
                    .filter(|r| r.is_active())
                    .take(limit)
                    .cloned(),
            );
        }
        out.sort_by_key(|r| (r.start, r.id));
        out.truncate(limit);
        out
    }

    // ── Sessions ─────────────────────────────────────────────

    pub fn get_session(&self, id: Ulid) -> Result<Session, EngineError> {
        self.sessions
            .get(&id)
            .map(|s| s.value().clone())
            .ok_or(EngineError::NotFound(id))
    }

    /// Active sessions across all tables, oldest first.
    pub fn active_sessions(&self) -> Vec<Session> {
        let mut out: Vec<Session> = self
            .sessions
            .iter()
            .filter(|e| e.value().is_active())
            .map(|e| e.value().clone())
            .collect();
        out.sort_by_key(|s| (s.start, s.id));
        out
    }

    /// Sessions of one table that are still running or ended in the last day.
    pub fn table_sessions(&self, table_id: Ulid, now: Ms) -> Result<Vec<Session>, EngineError> {
        if !self.state.contains_key(&table_id) {
            return Err(EngineError::NotFound(table_id));
        }
        let since = now - DAY_MS;
        let mut out: Vec<Session> = self
            .sessions
            .iter()
            .filter(|e| {
                let s = e.value();
                s.table_id == table_id && (s.is_active() || s.end.is_some_and(|end| end >= since))
            })
            .map(|e| e.value().clone())
            .collect();
        out.sort_by_key(|s| (s.start, s.id));
        Ok(out)
    }

    // ── WAL maintenance ──────────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        self.compact_wal_at(now_ms()).await
    }

    /// Completed sessions that ended more than the retention period before
    /// `now` are left out of the compacted log, and dropped from memory once
    /// the rewrite is durable.
    pub async fn compact_wal_at(&self, now: Ms) -> Result<(), EngineError> {
        // Every writer is held off until the swap so no commit lands between
        // snapshot and rewrite.
        let _serial = self.create_lock.lock().await;
        let guards = self.lock_all_tables().await;
        let registry = self.blackouts.read().await;

        let cutoff = now - SESSION_RETENTION_MS;
        let retained = |s: &Session| s.is_active() || s.end.is_none_or(|end| end >= cutoff);

        let mut events = Vec::new();
        for ts in &guards {
            events.push(Event::TableRestored {
                id: ts.id,
                number: ts.number,
                hourly_rate: ts.hourly_rate,
                status: ts.status,
                active_session: ts.active_session,
                blackout: ts.blackout,
            });
        }
        let mut sessions: Vec<Session> = self
            .sessions
            .iter()
            .filter(|e| retained(e.value()))
            .map(|e| e.value().clone())
            .collect();
        sessions.sort_by_key(|s| (s.start, s.id));
        events.extend(sessions.into_iter().map(|session| Event::SessionRestored { session }));
        for ts in &guards {
            for r in &ts.reservations {
                events.push(Event::ReservationCreated {
                    reservation: r.clone(),
                    status: None,
                });
            }
        }
        for window in registry.windows() {
            events.push(Event::BlackoutAdded {
                window: window.clone(),
            });
        }
        let count = events.len();

        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        self.sessions.retain(|_, s| retained(&*s));
        tracing::info!("compacted WAL to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
