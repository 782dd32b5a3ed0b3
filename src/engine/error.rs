use thiserror::Error;
use ulid::Ulid;

use crate::model::SlotStatus;

/// Coarse classification callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The slot's state moved on; pick another slot.
    Contention,
    NotFound,
    Configuration,
    InvalidInput,
    /// The durable store failed; the operation may be retried.
    Infrastructure,
}

impl ErrorKind {
    pub fn label(&self) -> &'static str {
        match self {
            ErrorKind::Contention => "contention",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Configuration => "configuration",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Infrastructure => "infrastructure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Unknown slot id, or a slot owned by a different business.
    #[error("slot not found: {0}")]
    NotFound(Ulid),

    #[error("slot {slot_id} was just taken (currently {status})")]
    Contention { slot_id: Ulid, status: SlotStatus },

    #[error("invalid business hours: {0}")]
    InvalidConfig(String),

    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),

    #[error("store unavailable: {0}")]
    Infrastructure(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::NotFound(_) => ErrorKind::NotFound,
            EngineError::Contention { .. } => ErrorKind::Contention,
            EngineError::InvalidConfig(_) => ErrorKind::Configuration,
            EngineError::LimitExceeded(_) => ErrorKind::InvalidInput,
            EngineError::Infrastructure(_) => ErrorKind::Infrastructure,
        }
    }

    pub fn is_contention(&self) -> bool {
        self.kind() == ErrorKind::Contention
    }

    /// Only store outages are worth retrying. Contention never is.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Infrastructure
    }
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Infrastructure(e.to_string())
    }
}
