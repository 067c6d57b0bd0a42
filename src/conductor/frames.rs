//! Execution stack frames
//!
//! Serialized as `{catch: n}`, `{params: {...}}` or `{let: {...} | null}`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

use crate::value::Params;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Frame {
    /// Installed by Try; the handler state to resume at
    #[serde(rename = "catch")]
    Catch(usize),

    /// Snapshot installed by Push
    #[serde(rename = "params")]
    Params(Params),

    /// Bindings installed by Let; `None` is a mask boundary
    #[serde(rename = "let")]
    Let(Option<Map<String, JsonValue>>),
}

impl Frame {
    pub fn name(&self) -> &'static str {
        match self {
            Frame::Catch(_) => "catch",
            Frame::Params(_) => "params",
            Frame::Let(_) => "let",
        }
    }
}
