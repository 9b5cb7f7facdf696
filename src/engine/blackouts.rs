use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::blackout::Occurrence;
use crate::limits::*;
use crate::model::*;
use crate::notify::EventKind;
use crate::table::{TableFacts, TableStatus, Trigger, transition};

use super::conflict::{now_ms, validate_blackout, validate_duration};
use super::{Engine, EngineError, observe};

impl Engine {
    // ── Window CRUD ──────────────────────────────────────────

    pub async fn add_blackout(&self, new: NewBlackout) -> Result<BlackoutWindow, EngineError> {
        validate_blackout(&new)?;
        let window = BlackoutWindow {
            id: Ulid::new(),
            label: new.label,
            start: new.start,
            duration_min: new.duration_min,
            lead_in_min: new.lead_in_min,
            recurrence: new.recurrence,
        };
        {
            let mut registry = self.blackouts.write().await;
            if registry.len() >= MAX_BLACKOUT_WINDOWS {
                return Err(EngineError::LimitExceeded("too many blackout windows"));
            }
            self.wal_append(&Event::BlackoutAdded { window: window.clone() }).await?;
            registry.upsert(window.clone());
        }
        info!("blackout window {} \"{}\" added", window.id, window.label);
        self.warn_overlapped_reservations(&window).await;
        Ok(window)
    }

    pub async fn update_blackout(&self, id: Ulid, new: NewBlackout) -> Result<BlackoutWindow, EngineError> {
        validate_blackout(&new)?;
        let window = BlackoutWindow {
            id,
            label: new.label,
            start: new.start,
            duration_min: new.duration_min,
            lead_in_min: new.lead_in_min,
            recurrence: new.recurrence,
        };
        {
            let mut registry = self.blackouts.write().await;
            if registry.get(&id).is_none() {
                return Err(EngineError::NotFound(id));
            }
            self.wal_append(&Event::BlackoutUpdated { window: window.clone() }).await?;
            registry.upsert(window.clone());
        }
        info!("blackout window {id} \"{}\" updated", window.label);
        self.warn_overlapped_reservations(&window).await;
        Ok(window)
    }

    pub async fn remove_blackout(&self, id: Ulid) -> Result<BlackoutWindow, EngineError> {
        let mut registry = self.blackouts.write().await;
        if registry.get(&id).is_none() {
            return Err(EngineError::NotFound(id));
        }
        self.wal_append(&Event::BlackoutRemoved { id }).await?;
        let window = registry.remove(&id).ok_or(EngineError::NotFound(id))?;
        info!("blackout window {id} \"{}\" removed", window.label);
        Ok(window)
    }

    pub async fn list_blackouts(&self) -> Vec<BlackoutWindow> {
        let mut windows = self.blackouts.read().await.windows().to_vec();
        windows.sort_by_key(|w| w.start);
        windows
    }

    pub async fn blackouts_for_day(&self, day: NaiveDate) -> Vec<Occurrence> {
        self.blackouts.read().await.windows_for_day(day)
    }

    /// Existing reservations stay valid when a window is added or moved over
    /// them. Staff are told through the log.
    async fn warn_overlapped_reservations(&self, window: &BlackoutWindow) {
        let registry = self.blackouts.read().await.clone();
        let tables: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        for ts in tables {
            let guard = ts.read().await;
            for r in guard.reservations.iter().filter(|r| r.is_active()) {
                let span = r.span();
                let hit = registry
                    .conflict(&span, registry.calendar().day_of(span.start))
                    .filter(|o| o.window_id == window.id);
                if hit.is_some() {
                    warn!(
                        "reservation {} on table {} overlaps blackout \"{}\"",
                        r.id, guard.number, window.label
                    );
                }
            }
        }
    }

    // ── Applying a blackout to the floor ─────────────────────

    /// Move every `IN_USE` table to `BLACKOUT` and schedule the reversal.
    /// Tables in any other status are untouched.
    pub async fn apply_blackout(
        self: &Arc<Self>,
        duration_min: u32,
        actor: Ulid,
    ) -> Result<BlackoutApplication, EngineError> {
        self.apply_blackout_at(duration_min, actor, now_ms()).await
    }

    pub async fn apply_blackout_at(
        self: &Arc<Self>,
        duration_min: u32,
        actor: Ulid,
        now: Ms,
    ) -> Result<BlackoutApplication, EngineError> {
        let started = Instant::now();
        let result = self.apply_blackout_inner(duration_min, actor, now).await;
        observe("apply_blackout", started, &result);
        result
    }

    async fn apply_blackout_inner(
        self: &Arc<Self>,
        duration_min: u32,
        actor: Ulid,
        now: Ms,
    ) -> Result<BlackoutApplication, EngineError> {
        validate_duration(duration_min)?;
        let id = Ulid::new();
        let until = now + duration_min as Ms * MINUTE_MS;

        let mut guards = self.lock_all_tables().await;
        let mut moves = Vec::new();
        for (i, guard) in guards.iter().enumerate() {
            if guard.status != TableStatus::InUse {
                continue;
            }
            let t = transition(
                TableFacts {
                    status: guard.status,
                    has_active_session: guard.active_session.is_some(),
                },
                Trigger::BlackoutApplied,
            )?;
            moves.push((i, t));
        }
        let table_ids: Vec<Ulid> = moves.iter().map(|(i, _)| guards[*i].id).collect();

        let mut lights = Vec::new();
        if !table_ids.is_empty() {
            let event = Event::BlackoutApplied {
                id,
                table_ids: table_ids.clone(),
                until,
            };
            self.wal_append(&event).await?;
            for (i, t) in &moves {
                let guard = &mut guards[*i];
                super::apply_to_table(guard, &event, &self.sessions, &self.reservation_index);
                let table = guard.info();
                if let Some(on) = self.dispatch(t, &table) {
                    lights.push((table.number, on));
                }
            }
        }

        let application = BlackoutApplication {
            id,
            table_ids,
            duration_min,
            until,
        };
        self.notify.publish(EventKind::BlackoutStarted, &application);
        drop(guards);

        self.schedule_reversal(id, Duration::from_secs(duration_min as u64 * 60));
        for (number, on) in lights {
            self.set_light(number, on).await;
        }
        metrics::counter!(crate::observability::BLACKOUTS_APPLIED_TOTAL).increment(1);
        info!(
            "blackout {id} applied to {} tables for {duration_min}m",
            application.table_ids.len()
        );
        self.record_audit(
            actor,
            "apply blackout",
            serde_json::json!({ "blackout": id.to_string(), "tables": application.table_ids.len(), "minutes": duration_min }),
        );
        Ok(application)
    }

    /// The timer holds only a weak reference, so a dropped engine cancels it.
    fn schedule_reversal(self: &Arc<Self>, id: Ulid, after: Duration) {
        let engine: Weak<Self> = Arc::downgrade(self);
        let task = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let Some(engine) = engine.upgrade() else { return };
            engine.reversals.remove(&id);
            match engine.finish_blackout(id, true).await {
                Ok(restored) => debug!("blackout {id} elapsed, {} tables restored", restored.len()),
                Err(e) => warn!("blackout {id} reversal failed: {e}"),
            }
        });
        self.reversals.insert(id, task.abort_handle());
    }

    /// End a blackout application before its timer fires.
    pub async fn end_blackout(&self, id: Ulid) -> Result<Vec<Ulid>, EngineError> {
        let timer = self.reversals.remove(&id);
        if let Some((_, handle)) = &timer {
            handle.abort();
        }
        self.finish_blackout(id, timer.is_some()).await
    }

    /// Return tables still held by application `id` to `AVAILABLE`. State is
    /// re-read here: tables moved elsewhere since (e.g. to maintenance) are
    /// left alone. Without a pending timer and with no held table the id is
    /// unknown, and nothing is written or published.
    pub(super) async fn finish_blackout(
        &self,
        id: Ulid,
        timer_pending: bool,
    ) -> Result<Vec<Ulid>, EngineError> {
        let mut guards = self.lock_all_tables().await;
        let mut moves = Vec::new();
        for (i, guard) in guards.iter().enumerate() {
            let held = guard.status == TableStatus::Blackout
                && guard.blackout.is_some_and(|h| h.id == id);
            if !held {
                continue;
            }
            let t = transition(
                TableFacts {
                    status: guard.status,
                    has_active_session: guard.active_session.is_some(),
                },
                Trigger::BlackoutElapsed,
            )?;
            moves.push((i, t));
        }
        let table_ids: Vec<Ulid> = moves.iter().map(|(i, _)| guards[*i].id).collect();
        if table_ids.is_empty() && !timer_pending {
            return Err(EngineError::NotFound(id));
        }

        if !table_ids.is_empty() {
            let event = Event::BlackoutEnded {
                id,
                table_ids: table_ids.clone(),
            };
            self.wal_append(&event).await?;
            for (i, t) in &moves {
                let guard = &mut guards[*i];
                super::apply_to_table(guard, &event, &self.sessions, &self.reservation_index);
                self.dispatch(t, &guard.info());
            }
        }
        self.notify.publish(
            EventKind::BlackoutEnded,
            &serde_json::json!({ "id": id, "tables": table_ids }),
        );
        info!("blackout {id} ended, {} tables available", table_ids.len());
        Ok(table_ids)
    }

    /// Apply every blackout window whose nominal start falls in
    /// `(after, until]`, for the rest of its duration.
    pub async fn apply_due_blackouts(self: &Arc<Self>, after: Ms, until: Ms) -> Vec<BlackoutApplication> {
        let due = self.blackouts.read().await.starting_between(after, until);
        let mut applied = Vec::new();
        for occ in due {
            let remaining = occ.nominal.end - until;
            if remaining <= 0 {
                continue;
            }
            let minutes = ((remaining + MINUTE_MS - 1) / MINUTE_MS) as u32;
            match self.apply_blackout_at(minutes, Ulid::nil(), until).await {
                Ok(app) => {
                    info!("\"{}\" started", occ.label);
                    applied.push(app);
                }
                Err(e) => warn!("could not apply \"{}\": {e}", occ.label),
            }
        }
        applied
    }
}
