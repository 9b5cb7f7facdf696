use std::sync::Arc;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::engine::{Engine, now_ms};
use crate::model::Ms;

/// One activator pass over `(last, now]`: start due blackout windows and
/// bring table statuses in line with reservations and blackout holds.
pub async fn activate(engine: &Arc<Engine>, last: Ms, now: Ms) {
    for app in engine.apply_due_blackouts(last, now).await {
        debug!("blackout {} applied until {}", app.id, app.until);
    }
    let changed = engine.reconcile_at(now).await;
    if changed > 0 {
        debug!("activator changed {changed} tables");
    }
}

/// Background task that flips tables as reservations and blackout windows
/// begin and end.
pub async fn run_activator(engine: Arc<Engine>, tick: Duration) {
    let mut interval = tokio::time::interval(tick);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last = now_ms();
    loop {
        interval.tick().await;
        let now = now_ms();
        activate(&engine, last, now).await;
        last = now;
    }
}

/// Compact the WAL once `threshold` appends have accumulated. Returns true
/// if a compaction ran.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            info!("compacted WAL after {appends} appends");
            true
        }
        Err(e) => {
            warn!("WAL compaction failed: {e}");
            false
        }
    }
}

/// Background task that keeps the WAL from growing without bound.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        compact_if_due(&engine, threshold).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScheduleConfig;
    use crate::model::*;
    use crate::notify::Broadcaster;
    use crate::table::TableStatus;
    use crate::window::Calendar;
    use chrono::NaiveDate;
    use std::path::PathBuf;
    use ulid::Ulid;

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("poolhall_test_jobs");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn at(hour: u32, minute: u32) -> Ms {
        let day = NaiveDate::from_ymd_opt(2026, 3, 2).unwrap();
        Calendar::utc().at(day, hour, minute)
    }

    fn engine(name: &str) -> Arc<Engine> {
        let notify = Arc::new(Broadcaster::new());
        Arc::new(Engine::new(test_wal_path(name), ScheduleConfig::default(), notify).unwrap())
    }

    #[tokio::test]
    async fn activator_starts_prayer_and_reservation() {
        let engine = engine("activate.wal");
        let busy = engine.create_table(1, None).await.unwrap();
        let booked = engine.create_table(2, None).await.unwrap();
        engine
            .open_session_at(busy.id, Ulid::new(), SessionKind::Open, None, at(11, 0))
            .await
            .unwrap();
        engine
            .create_reservation_at(
                NewReservation {
                    table_id: booked.id,
                    requester_id: Ulid::new(),
                    start: at(12, 30),
                    duration_min: 60,
                    party_size: 2,
                    contact: Contact {
                        name: "Lina".into(),
                        phone: "555-0101".into(),
                        email: None,
                    },
                    notes: None,
                },
                at(9, 0),
            )
            .await
            .unwrap();
        // Added after the booking, so both overlap without a conflict.
        engine
            .add_blackout(NewBlackout {
                label: "Dhuhr".into(),
                start: at(12, 30),
                duration_min: 30,
                lead_in_min: None,
                recurrence: Recurrence::Daily,
            })
            .await
            .unwrap();

        activate(&engine, at(12, 29), at(12, 30)).await;

        let busy = engine.table_info(&busy.id).await.unwrap();
        let booked = engine.table_info(&booked.id).await.unwrap();
        assert_eq!(busy.status, TableStatus::Blackout);
        assert_eq!(booked.status, TableStatus::Reserved);
    }

    #[tokio::test]
    async fn compactor_waits_for_threshold() {
        let engine = engine("compactor.wal");
        engine.create_table(1, None).await.unwrap();
        engine.create_table(2, None).await.unwrap();

        assert!(!compact_if_due(&engine, 3).await);
        assert_eq!(engine.wal_appends_since_compact().await, 2);

        engine.create_table(3, None).await.unwrap();
        assert!(compact_if_due(&engine, 3).await);
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        assert_eq!(engine.list_tables().await.len(), 3);
    }

    #[test]
    fn activator_clock_is_wall_clock_millis() {
        let before = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_millis() as Ms;
        let now = now_ms();
        assert!(now >= before && now - before < 60_000);
        assert!((crate::limits::MIN_VALID_TIMESTAMP_MS..crate::limits::MAX_VALID_TIMESTAMP_MS).contains(&now));
    }
}
