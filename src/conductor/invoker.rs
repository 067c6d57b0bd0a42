//! Action invoker capability
//!
//! The transport to the platform that runs actions. Calls are normally
//! non-blocking: the platform answers with an activation id and later posts
//! the result to the `notify` recipient.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

/// Recipient of an action result: an action and the session to resume
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notify {
    pub action: String,
    pub session_id: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvokeOptions {
    pub blocking: bool,
    pub notify: Option<Notify>,
    /// Activation that caused this call
    pub cause: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum InvokeResponse {
    /// Running; the result will be delivered to the notify recipient
    Accepted { activation_id: String },
    /// Finished synchronously
    Completed(JsonValue),
}

#[derive(Debug, Error)]
pub enum InvokeError {
    #[error("Action '{0}' not found")]
    NotFound(String),

    #[error("Invocation of '{action}' failed: {message}")]
    Failed { action: String, message: String },

    #[error("Invocation of '{0}' timed out")]
    Timeout(String),
}

#[async_trait]
pub trait ActionInvoker: Send + Sync {
    async fn invoke(
        &self,
        action: &str,
        params: JsonValue,
        options: InvokeOptions,
    ) -> Result<InvokeResponse, InvokeError>;
}
