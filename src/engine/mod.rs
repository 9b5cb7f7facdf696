mod availability;
mod blackouts;
mod conflict;
mod error;
mod queries;
mod reservations;
mod sessions;
mod tables;

pub use availability::{AvailabilityGrid, SlotAvailability, TableAvailability, slot_availability};
pub use conflict::now_ms;
pub use error::EngineError;
pub use sessions::session_cost;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, OwnedRwLockWriteGuard, RwLock};
use tokio::task::AbortHandle;
use tracing::warn;
use ulid::Ulid;

use crate::audit::{AuditSink, TracingAudit};
use crate::blackout::BlackoutRegistry;
use crate::config::ScheduleConfig;
use crate::model::*;
use crate::notify::{Broadcaster, EventKind};
use crate::signal::{LogSignal, TableSignal, LIGHT_TIMEOUT};
use crate::table::{Effect, TableStatus, Transition};
use crate::wal::Wal;

pub type SharedTableState = Arc<RwLock<TableState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch = vec![(event, response)];
        let mut deferred = None;
        loop {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => {
                    // Commit what we have before compaction or counters see the log.
                    deferred = Some(other);
                    break;
                }
                Err(_) => break,
            }
        }

        metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
        let flush_start = Instant::now();
        let result = flush_batch(&mut wal, &batch);
        metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
            .record(flush_start.elapsed().as_secs_f64());
        respond_batch(batch, &result);

        if let Some(cmd) = deferred {
            handle_non_append(&mut wal, cmd);
        }
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    // Flush even after a failed append so partial bytes never leak into the next batch.
    let flush_err = wal.flush_sync().err();
    match (append_err, flush_err) {
        (Some(e), _) | (None, Some(e)) => Err(e),
        (None, None) => Ok(()),
    }
}

fn respond_batch(batch: Vec<(Event, oneshot::Sender<io::Result<()>>)>, result: &io::Result<()>) {
    for (_, tx) in batch {
        let r = match result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { response, .. } => {
            let _ = response.send(Err(io::Error::other("append routed outside a batch")));
        }
    }
}

/// The venue's scheduling core. Owns every table, session, reservation and
/// blackout window, and is the only writer of the WAL.
///
/// Lock order: table locks (ascending id) before the blackout registry.
pub struct Engine {
    pub state: DashMap<Ulid, SharedTableState>,
    pub(super) numbers: DashMap<u32, Ulid>,
    /// Every known session, active or completed, keyed by id.
    pub(super) sessions: DashMap<Ulid, Session>,
    /// Reservation id → table id.
    pub(super) reservation_index: DashMap<Ulid, Ulid>,
    pub(super) blackouts: RwLock<BlackoutRegistry>,
    /// Pending blackout reversal timers by application id.
    pub(super) reversals: DashMap<Ulid, AbortHandle>,
    /// Serializes table creation and compaction snapshots.
    pub(super) create_lock: Mutex<()>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<Broadcaster>,
    pub(super) signal: Arc<dyn TableSignal>,
    pub(super) audit: Arc<dyn AuditSink>,
    pub(super) schedule: ScheduleConfig,
}

/// Apply an event to a table the caller has locked (or owns during replay).
pub(super) fn apply_to_table(
    ts: &mut TableState,
    event: &Event,
    sessions: &DashMap<Ulid, Session>,
    reservation_index: &DashMap<Ulid, Ulid>,
) {
    match event {
        Event::TableStatusChanged { status, .. } => set_status(ts, *status),
        Event::SessionOpened { session, status } => {
            ts.active_session = Some(session.id);
            set_status(ts, *status);
            sessions.insert(session.id, session.clone());
        }
        Event::SessionClosed {
            id,
            end,
            cost,
            closed_by,
            status,
            ..
        } => {
            if let Some(mut s) = sessions.get_mut(id) {
                s.end = Some(*end);
                s.cost = Some(*cost);
                s.closed_by = Some(*closed_by);
                s.status = SessionStatus::Completed;
            }
            if ts.active_session == Some(*id) {
                ts.active_session = None;
            }
            if let Some(status) = status {
                set_status(ts, *status);
            }
        }
        Event::ReservationCreated { reservation, status } => {
            reservation_index.insert(reservation.id, ts.id);
            ts.insert_reservation(reservation.clone());
            if let Some(status) = status {
                set_status(ts, *status);
            }
        }
        Event::ReservationUpdated { reservation, status } => {
            ts.upsert_reservation(reservation.clone());
            if let Some(status) = status {
                set_status(ts, *status);
            }
        }
        Event::BlackoutApplied { id, until, .. } => {
            ts.status = TableStatus::Blackout;
            ts.blackout = Some(BlackoutHold { id: *id, until: *until });
        }
        Event::BlackoutEnded { .. } => set_status(ts, TableStatus::Available),
        Event::TableRestored {
            number,
            hourly_rate,
            status,
            active_session,
            blackout,
            ..
        } => {
            ts.number = *number;
            ts.hourly_rate = *hourly_rate;
            ts.status = *status;
            ts.active_session = *active_session;
            ts.blackout = *blackout;
        }
        // Table creation and blackout windows live outside a single table.
        Event::TableCreated { .. }
        | Event::SessionRestored { .. }
        | Event::BlackoutAdded { .. }
        | Event::BlackoutUpdated { .. }
        | Event::BlackoutRemoved { .. } => {}
    }
}

fn set_status(ts: &mut TableState, status: TableStatus) {
    ts.status = status;
    if status != TableStatus::Blackout {
        ts.blackout = None;
    }
}

/// Tables touched by a per-table event.
fn event_table_ids(event: &Event) -> Vec<Ulid> {
    match event {
        Event::TableStatusChanged { id, .. } | Event::TableRestored { id, .. } => vec![*id],
        Event::SessionOpened { session, .. } => vec![session.table_id],
        Event::SessionClosed { table_id, .. } => vec![*table_id],
        Event::ReservationCreated { reservation, .. }
        | Event::ReservationUpdated { reservation, .. } => vec![reservation.table_id],
        Event::BlackoutApplied { table_ids, .. } | Event::BlackoutEnded { table_ids, .. } => {
            table_ids.clone()
        }
        Event::TableCreated { .. }
        | Event::SessionRestored { .. }
        | Event::BlackoutAdded { .. }
        | Event::BlackoutUpdated { .. }
        | Event::BlackoutRemoved { .. } => Vec::new(),
    }
}

impl Engine {
    pub fn new(
        wal_path: PathBuf,
        schedule: ScheduleConfig,
        notify: Arc<Broadcaster>,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        // Replay into plain values; locks are only wrapped around the result.
        let mut tables: HashMap<Ulid, TableState> = HashMap::new();
        let sessions = DashMap::new();
        let reservation_index = DashMap::new();
        let mut registry =
            BlackoutRegistry::new(schedule.calendar, schedule.blackout_lead_in_minutes);

        for event in &events {
            match event {
                Event::TableCreated { id, number, hourly_rate } => {
                    tables.insert(*id, TableState::new(*id, *number, *hourly_rate));
                }
                Event::TableRestored { id, number, hourly_rate, .. } => {
                    let ts = tables
                        .entry(*id)
                        .or_insert_with(|| TableState::new(*id, *number, *hourly_rate));
                    apply_to_table(ts, event, &sessions, &reservation_index);
                }
                Event::SessionRestored { session } => {
                    sessions.insert(session.id, session.clone());
                }
                Event::BlackoutAdded { window } | Event::BlackoutUpdated { window } => {
                    registry.upsert(window.clone());
                }
                Event::BlackoutRemoved { id } => {
                    registry.remove(id);
                }
                other => {
                    for table_id in event_table_ids(other) {
                        if let Some(ts) = tables.get_mut(&table_id) {
                            apply_to_table(ts, other, &sessions, &reservation_index);
                        }
                    }
                }
            }
        }

        let in_use = tables
            .values()
            .filter(|ts| ts.status == TableStatus::InUse)
            .count();
        metrics::gauge!(crate::observability::TABLES_IN_USE).set(in_use as f64);

        let numbers = DashMap::new();
        let state = DashMap::new();
        for (id, ts) in tables {
            numbers.insert(ts.number, id);
            state.insert(id, Arc::new(RwLock::new(ts)));
        }
        tracing::debug!(
            "replayed {} events: {} tables, {} sessions, {} blackout windows",
            events.len(),
            state.len(),
            sessions.len(),
            registry.len()
        );

        Ok(Self {
            state,
            numbers,
            sessions,
            reservation_index,
            blackouts: RwLock::new(registry),
            reversals: DashMap::new(),
            create_lock: Mutex::new(()),
            wal_tx,
            notify,
            signal: Arc::new(LogSignal),
            audit: Arc::new(TracingAudit),
            schedule,
        })
    }

    pub fn with_signal(mut self, signal: Arc<dyn TableSignal>) -> Self {
        self.signal = signal;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn schedule(&self) -> &ScheduleConfig {
        &self.schedule
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub fn get_table(&self, id: &Ulid) -> Option<SharedTableState> {
        self.state.get(id).map(|e| e.value().clone())
    }

    pub fn table_for_reservation(&self, reservation_id: &Ulid) -> Option<Ulid> {
        self.reservation_index.get(reservation_id).map(|e| *e.value())
    }

    /// WAL-append then apply. Nothing is applied if the append fails.
    pub(super) async fn persist_and_apply(
        &self,
        ts: &mut TableState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_table(ts, event, &self.sessions, &self.reservation_index);
        Ok(())
    }

    /// Lookup table, acquire write lock.
    pub(super) async fn table_write(
        &self,
        table_id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<TableState>, EngineError> {
        let ts = self
            .get_table(table_id)
            .ok_or(EngineError::NotFound(*table_id))?;
        Ok(ts.write_owned().await)
    }

    /// Write-lock every table in ascending id order.
    pub(super) async fn lock_all_tables(&self) -> Vec<OwnedRwLockWriteGuard<TableState>> {
        let mut tables: Vec<(Ulid, SharedTableState)> = self
            .state
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        tables.sort_by_key(|(id, _)| *id);
        let mut guards = Vec::with_capacity(tables.len());
        for (_, ts) in tables {
            guards.push(ts.write_owned().await);
        }
        guards
    }

    /// Run the immediate effects of a committed transition. Returns the
    /// light command, if any, so the caller can send it after unlocking.
    pub(super) fn dispatch(&self, transition: &Transition, info: &TableInfo) -> Option<bool> {
        let mut light = None;
        for effect in &transition.effects {
            match effect {
                Effect::SetLight(on) => light = Some(*on),
                Effect::BroadcastTable => {
                    self.notify.publish(EventKind::TableUpdated, info);
                }
            }
        }
        if transition.to == TableStatus::InUse {
            metrics::gauge!(crate::observability::TABLES_IN_USE).increment(1.0);
        } else if transition.from == TableStatus::InUse {
            metrics::gauge!(crate::observability::TABLES_IN_USE).decrement(1.0);
        }
        tracing::debug!(
            "table {} {} -> {}",
            info.number,
            transition.from,
            transition.to
        );
        light
    }

    /// Send a light command. Failures are logged, never propagated.
    pub(super) async fn set_light(&self, table_number: u32, on: bool) {
        let outcome = tokio::time::timeout(LIGHT_TIMEOUT, self.signal.set_light(table_number, on)).await;
        let err = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(e)) => e.to_string(),
            Err(_) => "timed out".to_string(),
        };
        metrics::counter!(crate::observability::SIGNAL_FAILURES_TOTAL, "kind" => "light").increment(1);
        warn!("light {} for table {table_number} failed: {err}", if on { "on" } else { "off" });
    }

    /// Record an audit entry in the background.
    pub(super) fn record_audit(&self, actor: Ulid, action: &'static str, details: serde_json::Value) {
        let sink = self.audit.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.record(actor, action, details).await {
                metrics::counter!(crate::observability::AUDIT_FAILURES_TOTAL).increment(1);
                warn!("audit {action} by {actor} not recorded: {e}");
            }
        });
    }
}

/// Count and time an engine call.
pub(super) fn observe<T>(op: &'static str, started: Instant, result: &Result<T, EngineError>) {
    let status = crate::observability::status_label(result);
    metrics::counter!(crate::observability::OPERATIONS_TOTAL, "op" => op, "status" => status)
        .increment(1);
    metrics::histogram!(crate::observability::OPERATION_DURATION_SECONDS, "op" => op)
        .record(started.elapsed().as_secs_f64());
}
