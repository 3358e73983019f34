use crate::model::SessionStatus;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{message}")]
    Validation {
        message: String,
        details: Option<serde_json::Value>,
    },
    #[error("session {session_id} is {status}, expected {expected}")]
    StateConflict {
        session_id: String,
        status: String,
        expected: &'static str,
    },
    #[error("{0} not found")]
    NotFound(String),
    #[error("storage unavailable: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("stored record is malformed: {0}")]
    Malformed(String),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl EngineError {
    pub fn validation(message: impl Into<String>) -> Self {
        EngineError::Validation {
            message: message.into(),
            details: None,
        }
    }

    pub fn missing_required(missing: usize) -> Self {
        EngineError::Validation {
            message: format!(
                "{} required question(s) missing from the selected question set",
                missing
            ),
            details: Some(json!({ "missingRequired": missing })),
        }
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        EngineError::NotFound(what.into())
    }

    pub fn code(&self) -> &'static str {
        match self {
            EngineError::Validation { .. } => "validation_failed",
            EngineError::StateConflict { .. } => "state_conflict",
            EngineError::NotFound(_) => "not_found",
            EngineError::Storage(_) => "collaborator_unavailable",
            EngineError::Malformed(_) => "corrupt_record",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            EngineError::Validation { details, .. } => details.clone(),
            EngineError::StateConflict {
                session_id,
                status,
                expected,
            } => Some(json!({
                "sessionId": session_id,
                "status": status,
                "expected": expected,
                // Terminal sessions never change state again.
                "terminal": SessionStatus::parse(status).map_or(false, SessionStatus::is_terminal),
            })),
            _ => None,
        }
    }

    pub fn is_state_conflict(&self) -> bool {
        matches!(self, EngineError::StateConflict { .. })
    }
}

impl From<serde_json::Error> for EngineError {
    fn from(e: serde_json::Error) -> Self {
        EngineError::Malformed(e.to_string())
    }
}
