use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{info, warn};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::signal::PING_TIMEOUT;
use crate::table::{TableFacts, Trigger, transition};

use super::{Engine, EngineError};

impl Engine {
    /// Register a new table. Table numbers are unique and never reused for
    /// another id.
    pub async fn create_table(
        &self,
        number: u32,
        hourly_rate: Option<f64>,
    ) -> Result<TableInfo, EngineError> {
        if number == 0 {
            return Err(EngineError::Validation("table number must be positive"));
        }
        let hourly_rate = hourly_rate.unwrap_or(self.schedule.default_hourly_rate);
        if !hourly_rate.is_finite() || hourly_rate < 0.0 {
            return Err(EngineError::Validation("hourly rate must be a non-negative number"));
        }

        let _serial = self.create_lock.lock().await;
        if self.state.len() >= MAX_TABLES {
            return Err(EngineError::LimitExceeded("too many tables"));
        }
        if self.numbers.contains_key(&number) {
            return Err(EngineError::AlreadyExists(number));
        }

        let id = Ulid::new();
        let event = Event::TableCreated { id, number, hourly_rate };
        self.wal_append(&event).await?;
        let ts = TableState::new(id, number, hourly_rate);
        let table = ts.info();
        self.state.insert(id, Arc::new(RwLock::new(ts)));
        self.numbers.insert(number, id);
        info!("created table {number} ({id}) at {hourly_rate}/h");
        Ok(table)
    }

    pub async fn table_info(&self, id: &Ulid) -> Result<TableInfo, EngineError> {
        let ts = self.get_table(id).ok_or(EngineError::NotFound(*id))?;
        let guard = ts.read().await;
        Ok(guard.info())
    }

    pub async fn table_by_number(&self, number: u32) -> Option<TableInfo> {
        let id = *self.numbers.get(&number)?.value();
        self.table_info(&id).await.ok()
    }

    /// All tables ordered by number.
    pub async fn list_tables(&self) -> Vec<TableInfo> {
        let tables: Vec<_> = self.state.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(tables.len());
        for ts in tables {
            out.push(ts.read().await.info());
        }
        out.sort_by_key(|t| t.number);
        out
    }

    /// Staff override: take a table out of service from any other status.
    pub async fn start_maintenance(&self, table_id: Ulid, actor: Ulid) -> Result<TableInfo, EngineError> {
        self.staff_transition(table_id, actor, Trigger::StartMaintenance).await
    }

    pub async fn end_maintenance(&self, table_id: Ulid, actor: Ulid) -> Result<TableInfo, EngineError> {
        self.staff_transition(table_id, actor, Trigger::EndMaintenance).await
    }

    async fn staff_transition(
        &self,
        table_id: Ulid,
        actor: Ulid,
        trigger: Trigger,
    ) -> Result<TableInfo, EngineError> {
        let mut guard = self.table_write(&table_id).await?;
        let t = transition(
            TableFacts {
                status: guard.status,
                has_active_session: guard.active_session.is_some(),
            },
            trigger,
        )?;
        let event = Event::TableStatusChanged { id: table_id, status: t.to };
        self.persist_and_apply(&mut guard, &event).await?;
        let table = guard.info();
        let light = self.dispatch(&t, &table);
        drop(guard);

        if let Some(on) = light {
            self.set_light(table.number, on).await;
        }
        self.record_audit(
            actor,
            trigger.as_str(),
            serde_json::json!({ "table": table.number, "from": t.from, "to": t.to }),
        );
        Ok(table)
    }

    /// Ask the table's controller whether it is reachable.
    pub async fn probe_table(&self, table_id: Ulid) -> Result<bool, EngineError> {
        let number = self.table_info(&table_id).await?.number;
        let reachable = match tokio::time::timeout(PING_TIMEOUT, self.signal.ping(number)).await {
            Ok(Ok(up)) => up,
            Ok(Err(e)) => {
                metrics::counter!(crate::observability::SIGNAL_FAILURES_TOTAL, "kind" => "ping")
                    .increment(1);
                warn!("ping table {number} failed: {e}");
                false
            }
            Err(_) => {
                metrics::counter!(crate::observability::SIGNAL_FAILURES_TOTAL, "kind" => "ping")
                    .increment(1);
                warn!("ping table {number} timed out");
                false
            }
        };
        Ok(reachable)
    }
}
