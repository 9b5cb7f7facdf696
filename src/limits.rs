use crate::model::Ms;

pub const MAX_TABLES: usize = 256;
pub const MAX_RESERVATIONS_PER_TABLE: usize = 50_000;
pub const MAX_BLACKOUT_WINDOWS: usize = 64;

/// A single reservation or timed session may not exceed one day.
pub const MAX_DURATION_MINUTES: u32 = 24 * 60;
pub const MAX_PARTY_SIZE: u32 = 64;

pub const MAX_LABEL_LEN: usize = 128;
pub const MAX_CONTACT_LEN: usize = 256;
pub const MAX_NOTES_LEN: usize = 4096;

/// 2000-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 946_684_800_000;
/// 2100-01-01T00:00:00Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// Completed sessions older than this are dropped at compaction.
pub const SESSION_RETENTION_MS: Ms = 30 * crate::model::DAY_MS;
