//! Hardware signalling for table lights.

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

/// How long a ping may take before the table counts as offline.
pub const PING_TIMEOUT: Duration = Duration::from_secs(5);
/// Upper bound for a light command after a committed transition.
pub const LIGHT_TIMEOUT: Duration = Duration::from_secs(2);

#[derive(Debug)]
pub enum SignalError {
    Timeout,
    Unreachable(String),
}

impl std::fmt::Display for SignalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalError::Timeout => write!(f, "signal timed out"),
            SignalError::Unreachable(e) => write!(f, "controller unreachable: {e}"),
        }
    }
}

impl std::error::Error for SignalError {}

/// Controller for the light above each table, addressed by table number.
#[async_trait]
pub trait TableSignal: Send + Sync + 'static {
    async fn set_light(&self, table_number: u32, on: bool) -> Result<(), SignalError>;

    /// True if the table's controller answered.
    async fn ping(&self, table_number: u32) -> Result<bool, SignalError>;
}

/// Default signal that only logs. Used when no controller is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSignal;

#[async_trait]
impl TableSignal for LogSignal {
    async fn set_light(&self, table_number: u32, on: bool) -> Result<(), SignalError> {
        debug!(table = table_number, on, "light");
        Ok(())
    }

    async fn ping(&self, table_number: u32) -> Result<bool, SignalError> {
        debug!(table = table_number, "ping");
        Ok(true)
    }
}
