use serde_json::{json, Value as JsonValue};
use thiserror::Error;

use crate::compiler::{CompileError, FsmError};
use crate::session::SessionError;

use super::invoker::InvokeError;

/// Stack discipline and program violations found while stepping
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("State {0} does not exist")]
    MissingState(usize),

    #[error("State {state} ({kind}) expected a {expected} frame but the stack is empty")]
    EmptyStack {
        state: usize,
        kind: &'static str,
        expected: &'static str,
    },

    #[error("State {state} ({kind}) expected a {expected} frame but found a {found} frame")]
    UnexpectedFrame {
        state: usize,
        kind: &'static str,
        expected: &'static str,
        found: &'static str,
    },
}

/// Errors surfaced to whoever invoked the conductor
#[derive(Debug, Error)]
pub enum ConductorError {
    /// Malformed request or session handle
    #[error("{0}")]
    BadRequest(String),

    #[error(transparent)]
    Program(#[from] FsmError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error(transparent)]
    Invoke(#[from] InvokeError),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ConductorError {
    /// HTTP-like status code reported to the caller
    pub fn code(&self) -> u16 {
        match self {
            ConductorError::BadRequest(_)
            | ConductorError::Program(_)
            | ConductorError::Execution(_) => 400,
            ConductorError::Compile(_) => 422,
            ConductorError::Session(e) => e.code(),
            ConductorError::Invoke(_) | ConductorError::Internal(_) => 500,
        }
    }

    /// `{code, error}`
    pub fn to_response(&self) -> JsonValue {
        json!({
            "code": self.code(),
            "error": self.to_string(),
        })
    }
}
