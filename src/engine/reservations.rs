use std::time::Instant;

use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::EventKind;
use crate::table::{TableFacts, TableStatus, Transition, Trigger, transition};

use super::conflict::{
    check_no_conflict, covered_at, now_ms, reservation_trigger, validate_reservation,
};
use super::{Engine, EngineError, observe};

fn outcome_label(result: &Result<Reservation, EngineError>) -> &'static str {
    match result {
        Ok(_) => "created",
        Err(e) => e.code(),
    }
}

impl Engine {
    pub async fn create_reservation(&self, req: NewReservation) -> Result<Reservation, EngineError> {
        self.create_reservation_at(req, now_ms()).await
    }

    pub async fn create_reservation_at(
        &self,
        req: NewReservation,
        now: Ms,
    ) -> Result<Reservation, EngineError> {
        let started = Instant::now();
        let result = self.create_reservation_inner(req, now).await;
        observe("create_reservation", started, &result);
        metrics::counter!(crate::observability::RESERVATIONS_TOTAL, "outcome" => outcome_label(&result))
            .increment(1);
        result
    }

    async fn create_reservation_inner(
        &self,
        req: NewReservation,
        now: Ms,
    ) -> Result<Reservation, EngineError> {
        let reservation = Reservation {
            id: Ulid::new(),
            table_id: req.table_id,
            requester_id: req.requester_id,
            start: req.start,
            duration_min: req.duration_min,
            status: ReservationStatus::Confirmed,
            contact: req.contact,
            party_size: req.party_size,
            notes: req.notes,
            created_at: now,
            updated_at: now,
        };
        validate_reservation(&reservation)?;

        let mut guard = self.table_write(&req.table_id).await?;
        if guard.reservations.len() >= MAX_RESERVATIONS_PER_TABLE {
            return Err(EngineError::LimitExceeded("too many reservations on table"));
        }
        let span = reservation.span();
        check_no_conflict(&guard, &span, None)?;
        self.check_blackout(&span).await?;

        let covered = span.contains_instant(now) || covered_at(&guard, now, None);
        let t = self.reservation_transition(&guard, covered)?;

        let event = Event::ReservationCreated {
            reservation: reservation.clone(),
            status: t.as_ref().map(|t| t.to),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let table = guard.info();
        self.notify.publish(EventKind::ReservationCreated, &reservation);
        if let Some(t) = &t {
            self.dispatch(t, &table);
        }
        drop(guard);

        info!(
            "reservation {} on table {} at {} for {}m",
            reservation.id, table.number, reservation.start, reservation.duration_min
        );
        self.record_audit(
            reservation.requester_id,
            "create reservation",
            serde_json::json!({ "table": table.number, "reservation": reservation.id.to_string() }),
        );
        Ok(reservation)
    }

    pub async fn update_reservation(
        &self,
        id: Ulid,
        patch: ReservationPatch,
    ) -> Result<Reservation, EngineError> {
        self.update_reservation_at(id, patch, now_ms()).await
    }

    pub async fn update_reservation_at(
        &self,
        id: Ulid,
        patch: ReservationPatch,
        now: Ms,
    ) -> Result<Reservation, EngineError> {
        let started = Instant::now();
        let result = self.update_reservation_inner(id, patch, now).await;
        observe("update_reservation", started, &result);
        result
    }

    async fn update_reservation_inner(
        &self,
        id: Ulid,
        patch: ReservationPatch,
        now: Ms,
    ) -> Result<Reservation, EngineError> {
        let table_id = self.table_for_reservation(&id).ok_or(EngineError::NotFound(id))?;
        let mut guard = self.table_write(&table_id).await?;
        let current = guard.reservation(&id).cloned().ok_or(EngineError::NotFound(id))?;
        if !current.is_active() {
            return Err(EngineError::StateConflict(format!(
                "reservation {id} is already {:?}",
                current.status
            )));
        }

        let changes_time = patch.changes_time();
        let mut updated = current;
        if let Some(start) = patch.start {
            updated.start = start;
        }
        if let Some(duration_min) = patch.duration_min {
            updated.duration_min = duration_min;
        }
        if let Some(status) = patch.status {
            updated.status = status;
        }
        if let Some(contact) = patch.contact {
            updated.contact = contact;
        }
        if let Some(party_size) = patch.party_size {
            updated.party_size = party_size;
        }
        if let Some(notes) = patch.notes {
            updated.notes = notes;
        }
        updated.updated_at = now;
        validate_reservation(&updated)?;

        if changes_time && updated.is_active() {
            let span = updated.span();
            check_no_conflict(&guard, &span, Some(id))?;
            self.check_blackout(&span).await?;
        }

        let covered = (updated.is_active() && updated.span().contains_instant(now))
            || covered_at(&guard, now, Some(id));
        let t = self.reservation_transition(&guard, covered)?;

        let event = Event::ReservationUpdated {
            reservation: updated.clone(),
            status: t.as_ref().map(|t| t.to),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        let table = guard.info();
        self.notify.publish(EventKind::ReservationUpdated, &updated);
        if let Some(t) = &t {
            self.dispatch(t, &table);
        }
        drop(guard);

        debug!("reservation {id} updated: {:?}", updated.status);
        self.record_audit(
            updated.requester_id,
            "update reservation",
            serde_json::json!({ "reservation": id.to_string(), "status": updated.status }),
        );
        Ok(updated)
    }

    pub async fn cancel_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        self.cancel_reservation_at(id, now_ms()).await
    }

    pub async fn cancel_reservation_at(&self, id: Ulid, now: Ms) -> Result<Reservation, EngineError> {
        self.update_reservation_at(id, ReservationPatch::status(ReservationStatus::Cancelled), now)
            .await
    }

    pub async fn complete_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        self.complete_reservation_at(id, now_ms()).await
    }

    pub async fn complete_reservation_at(&self, id: Ulid, now: Ms) -> Result<Reservation, EngineError> {
        self.update_reservation_at(id, ReservationPatch::status(ReservationStatus::Completed), now)
            .await
    }

    /// Reject with the conflicting blackout's label if `span` is blacked out.
    pub(super) async fn check_blackout(&self, span: &Span) -> Result<(), EngineError> {
        let registry = self.blackouts.read().await;
        let day = registry.calendar().day_of(span.start);
        match registry.conflict(span, day) {
            Some(occ) => Err(EngineError::BlackoutConflict { label: occ.label }),
            None => Ok(()),
        }
    }

    fn reservation_transition(
        &self,
        ts: &TableState,
        covered: bool,
    ) -> Result<Option<Transition>, EngineError> {
        let has_session = ts.active_session.is_some();
        reservation_trigger(ts.status, has_session, covered)
            .map(|trigger| {
                transition(
                    TableFacts {
                        status: ts.status,
                        has_active_session: has_session,
                    },
                    trigger,
                )
            })
            .transpose()
            .map_err(EngineError::from)
    }

    /// Bring every table's status in line with the clock: flip idle tables
    /// whose reservation has started to `RESERVED`, release `RESERVED`
    /// tables whose reservations are over, and end blackouts that have run
    /// past their deadline. Returns the number of tables changed.
    pub async fn reconcile_at(&self, now: Ms) -> usize {
        let mut tables: Vec<_> = self.state.iter().map(|e| (*e.key(), e.value().clone())).collect();
        tables.sort_by_key(|(id, _)| *id);

        let mut changed = 0;
        let mut expired_holds = Vec::new();
        for (id, ts) in tables {
            let mut guard = ts.write().await;
            if guard.status == TableStatus::Blackout {
                if let Some(hold) = guard.blackout.filter(|h| h.until <= now) {
                    if !expired_holds.contains(&hold.id) {
                        expired_holds.push(hold.id);
                    }
                }
                continue;
            }
            let Some(trigger) = reservation_trigger(
                guard.status,
                guard.active_session.is_some(),
                covered_at(&guard, now, None),
            ) else {
                continue;
            };
            let t = match transition(
                TableFacts {
                    status: guard.status,
                    has_active_session: guard.active_session.is_some(),
                },
                trigger,
            ) {
                Ok(t) => t,
                Err(e) => {
                    debug!("reconcile skip table {}: {e}", guard.number);
                    continue;
                }
            };

            let event = Event::TableStatusChanged { id, status: t.to };
            if let Err(e) = self.persist_and_apply(&mut guard, &event).await {
                tracing::warn!("reconcile table {}: {e}", guard.number);
                continue;
            }
            let table = guard.info();
            self.dispatch(&t, &table);
            info!("table {} {} -> {} ({})", table.number, t.from, t.to, trigger.as_str());
            changed += 1;
        }

        // One BLACKOUT_ENDED per application, however many tables it held.
        for hold_id in expired_holds {
            if let Some((_, timer)) = self.reversals.remove(&hold_id) {
                timer.abort();
            }
            match self.finish_blackout(hold_id, false).await {
                Ok(restored) => changed += restored.len(),
                Err(e) => debug!("blackout {hold_id} already ended: {e}"),
            }
        }
        changed
    }

    pub async fn reconcile(&self) -> usize {
        self.reconcile_at(now_ms()).await
    }
}
