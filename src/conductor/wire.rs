//! Session wire fields carried in invocation parameters
//!
//! `$config`, `$invoke`, `$sessionId`, `$result`, `$activationId` and
//! `$blocking` are stripped before the workflow sees its params.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use super::errors::ConductorError;
use super::invoker::Notify;
use crate::value::{into_params, Params};

pub const CONFIG: &str = "$config";
pub const INVOKE: &str = "$invoke";
pub const SESSION_ID: &str = "$sessionId";
pub const RESULT: &str = "$result";
pub const ACTIVATION_ID: &str = "$activationId";
pub const BLOCKING: &str = "$blocking";

/// Session configuration passed from a caller to the conductors it starts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WireConfig {
    /// Store settings of the caller; the process configuration decides which
    /// store is actually used
    #[serde(rename = "redis", default, skip_serializing_if = "Option::is_none")]
    pub store: Option<JsonValue>,

    /// Caller to notify when this session completes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify: Option<Notify>,

    /// Session expiration in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<u64>,
}

#[derive(Debug, Clone)]
pub enum Command {
    /// Start a new session running this program (or composition)
    Start { program: JsonValue },
    /// Resume a session with the result of the action it called
    Resume { session_id: String, result: JsonValue },
}

/// A parsed conductor invocation
#[derive(Debug, Clone)]
pub struct Request {
    pub command: Command,
    pub config: WireConfig,
    pub activation_id: Option<String>,
    pub blocking: bool,
    /// Workflow params with every wire field removed
    pub params: Params,
}

impl Request {
    pub fn parse(params: JsonValue) -> Result<Self, ConductorError> {
        let mut params = into_params(params);

        let config = match params.remove(CONFIG) {
            None | Some(JsonValue::Null) => WireConfig::default(),
            Some(value) => serde_json::from_value(value)
                .map_err(|e| ConductorError::BadRequest(format!("Invalid {}: {}", CONFIG, e)))?,
        };
        let invoke = params.remove(INVOKE);
        let session_id = params.remove(SESSION_ID);
        let result = params.remove(RESULT);
        let activation_id = match params.remove(ACTIVATION_ID) {
            Some(JsonValue::String(id)) => Some(id),
            _ => None,
        };
        let blocking = matches!(params.remove(BLOCKING), Some(JsonValue::Bool(true)));

        let command = match (invoke, session_id) {
            (Some(_), Some(_)) => {
                return Err(ConductorError::BadRequest(format!(
                    "{} and {} are mutually exclusive",
                    INVOKE, SESSION_ID
                )))
            }
            (Some(program), None) => Command::Start { program },
            (None, Some(JsonValue::String(session_id))) => Command::Resume {
                session_id,
                result: result.unwrap_or_else(|| JsonValue::Object(Map::new())),
            },
            (None, Some(other)) => {
                return Err(ConductorError::BadRequest(format!(
                    "Invalid {}: {}",
                    SESSION_ID, other
                )))
            }
            (None, None) => {
                return Err(ConductorError::BadRequest(format!(
                    "Missing {} or {}",
                    INVOKE, SESSION_ID
                )))
            }
        };

        Ok(Request {
            command,
            config,
            activation_id,
            blocking,
            params,
        })
    }
}
