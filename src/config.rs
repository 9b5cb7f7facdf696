use std::path::PathBuf;
use std::str::FromStr;

use crate::blackout::DEFAULT_LEAD_IN_MINUTES;
use crate::window::Calendar;

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

/// Venue schedule: opening hours, slot grid, blackout lead-in and pricing.
#[derive(Debug, Clone, Copy)]
pub struct ScheduleConfig {
    pub calendar: Calendar,
    /// First slot of the availability grid (local hour).
    pub open_hour: u32,
    /// Last slot of the grid, inclusive.
    pub last_slot_hour: u32,
    pub slot_step_minutes: u32,
    /// Each grid slot is checked as `[slot, slot + slot_length_minutes)`.
    pub slot_length_minutes: u32,
    pub blackout_lead_in_minutes: u32,
    pub default_hourly_rate: f64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            calendar: Calendar::utc(),
            open_hour: 10,
            last_slot_hour: 22,
            slot_step_minutes: 60,
            slot_length_minutes: 60,
            blackout_lead_in_minutes: DEFAULT_LEAD_IN_MINUTES,
            default_hourly_rate: 5.0,
        }
    }
}

impl ScheduleConfig {
    pub fn from_env() -> Self {
        let d = Self::default();
        let offset: i32 = env_or("POOLHALL_UTC_OFFSET_MINUTES", 0);
        let calendar = Calendar::from_offset_minutes(offset).unwrap_or_else(|| {
            tracing::warn!("ignoring out-of-range POOLHALL_UTC_OFFSET_MINUTES={offset}");
            Calendar::utc()
        });
        Self {
            calendar,
            open_hour: env_or("POOLHALL_OPEN_HOUR", d.open_hour).min(23),
            last_slot_hour: env_or("POOLHALL_LAST_SLOT_HOUR", d.last_slot_hour).min(23),
            slot_step_minutes: env_or("POOLHALL_SLOT_STEP_MINUTES", d.slot_step_minutes),
            slot_length_minutes: d.slot_length_minutes,
            blackout_lead_in_minutes: env_or(
                "POOLHALL_BLACKOUT_LEAD_IN_MINUTES",
                d.blackout_lead_in_minutes,
            ),
            default_hourly_rate: env_or("POOLHALL_HOURLY_RATE", d.default_hourly_rate),
        }
    }
}

/// Process-level settings for the `poolhall` binary.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub data_dir: PathBuf,
    pub metrics_port: Option<u16>,
    pub compact_threshold: u64,
    pub tick_secs: u64,
    /// Number of tables created on first start when the log is empty.
    pub seed_tables: u32,
    pub schedule: ScheduleConfig,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            data_dir: PathBuf::from(
                std::env::var("POOLHALL_DATA_DIR").unwrap_or_else(|_| "./data".into()),
            ),
            metrics_port: std::env::var("POOLHALL_METRICS_PORT")
                .ok()
                .and_then(|s| s.parse().ok()),
            compact_threshold: env_or("POOLHALL_COMPACT_THRESHOLD", 1000),
            tick_secs: env_or("POOLHALL_TICK_SECS", 15u64).max(1),
            seed_tables: env_or("POOLHALL_SEED_TABLES", 8),
            schedule: ScheduleConfig::from_env(),
        }
    }

    pub fn wal_path(&self) -> PathBuf {
        self.data_dir.join("poolhall.wal")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_grid_is_ten_to_ten_hourly() {
        let c = ScheduleConfig::default();
        let day = chrono::NaiveDate::from_ymd_opt(2025, 3, 14).unwrap();
        let slots = c
            .calendar
            .slots_for_day(day, c.open_hour, c.last_slot_hour, c.slot_step_minutes)
            .count();
        assert_eq!(slots, 13);
        assert_eq!(c.blackout_lead_in_minutes, 30);
    }

    #[test]
    fn env_or_falls_back_on_garbage() {
        // Keys are unique to this test so parallel tests do not interfere.
        let v: u32 = env_or("POOLHALL_TEST_UNSET_KEY_7F3A", 42);
        assert_eq!(v, 42);
    }

    #[test]
    fn wal_path_inside_data_dir() {
        let cfg = ServerConfig {
            data_dir: PathBuf::from("/tmp/ph"),
            metrics_port: None,
            compact_threshold: 1000,
            tick_secs: 15,
            seed_tables: 0,
            schedule: ScheduleConfig::default(),
        };
        assert_eq!(cfg.wal_path(), PathBuf::from("/tmp/ph/poolhall.wal"));
    }
}
