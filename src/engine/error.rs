use ulid::Ulid;

use crate::table::TransitionError;

#[derive(Debug)]
pub enum EngineError {
    /// Malformed input: zero duration, empty contact, party of nobody.
    Validation(&'static str),
    /// The interval overlaps the given active reservation.
    SlotConflict(Ulid),
    /// The interval overlaps a blackout window.
    BlackoutConflict { label: String },
    NotFound(Ulid),
    /// The current state forbids the operation.
    StateConflict(String),
    /// A table with this number already exists.
    AlreadyExists(u32),
    LimitExceeded(&'static str),
    WalError(String),
}

impl EngineError {
    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation(_) => "VALIDATION",
            EngineError::SlotConflict(_) => "SLOT_CONFLICT",
            EngineError::BlackoutConflict { .. } => "BLACKOUT_CONFLICT",
            EngineError::NotFound(_) => "NOT_FOUND",
            EngineError::StateConflict(_) => "STATE_CONFLICT",
            EngineError::AlreadyExists(_) => "ALREADY_EXISTS",
            EngineError::LimitExceeded(_) => "LIMIT_EXCEEDED",
            EngineError::WalError(_) => "PERSISTENCE",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Validation(msg) => write!(f, "invalid input: {msg}"),
            EngineError::SlotConflict(id) => {
                write!(f, "time slot taken: conflicts with reservation {id}")
            }
            EngineError::BlackoutConflict { label } => {
                write!(f, "blackout conflict: overlaps {label}")
            }
            EngineError::NotFound(id) => write!(f, "not found: {id}"),
            EngineError::StateConflict(msg) => write!(f, "state conflict: {msg}"),
            EngineError::AlreadyExists(number) => write!(f, "table {number} already exists"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<TransitionError> for EngineError {
    fn from(e: TransitionError) -> Self {
        EngineError::StateConflict(e.to_string())
    }
}
