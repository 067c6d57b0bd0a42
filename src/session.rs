//! Session Store
//!
//! Durable records of workflow runs, kept in a [`KvStore`]:
//!
//! - `session:{id}:live` - one-element list holding the suspended run
//! - `session:{id}:done` - one-element list holding the final result
//! - `session:{id}:trace` - activation ids, in order
//! - `sessions` - sorted set of session ids scored by last update (ms)
//!
//! The live record is only ever overwritten in place, so a persist racing a
//! kill or a completion fails with [`SessionError::Gone`] instead of
//! resurrecting the session.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::compiler::Fsm;
use crate::conductor::{Frame, Notify, WireConfig};
use crate::store::{KvStore, StoreError};

const DIRECTORY: &str = "sessions";

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session '{0}' not found")]
    NotFound(String),

    #[error("Session '{0}' is gone")]
    Gone(String),

    #[error("Corrupt record for session '{id}': {message}")]
    Corrupt { id: String, message: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl SessionError {
    pub fn code(&self) -> u16 {
        match self {
            SessionError::NotFound(_) => 404,
            SessionError::Gone(_) => 410,
            SessionError::Corrupt { .. } | SessionError::Store(_) => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;

/// Continuation of a suspended run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveState {
    pub fsm: Fsm,
    /// State to resume at; `None` when the run is about to complete
    pub state: Option<usize>,
    pub stack: Vec<Frame>,
    /// Caller to notify on completion, when this run is a sub-workflow
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callee: Option<Notify>,
    #[serde(default)]
    pub config: WireConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Running,
    Done,
    /// Listed in the directory but without live or done record
    Dead,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionEntry {
    pub id: String,
    pub status: SessionStatus,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Time to live of every session record
    pub expiration: Duration,
    pub poll_retries: u32,
    pub poll_interval: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            expiration: Duration::from_secs(86_400),
            poll_retries: 10,
            poll_interval: Duration::from_millis(100),
        }
    }
}

fn live_key(id: &str) -> String {
    format!("session:{}:live", id)
}

fn done_key(id: &str) -> String {
    format!("session:{}:done", id)
}

fn trace_key(id: &str) -> String {
    format!("session:{}:trace", id)
}

fn now_ms() -> f64 {
    Utc::now().timestamp_millis() as f64
}

#[derive(Clone)]
pub struct SessionStore {
    kv: Arc<dyn KvStore>,
    settings: SessionSettings,
}

impl SessionStore {
    pub fn new(kv: Arc<dyn KvStore>, settings: SessionSettings) -> Self {
        Self { kv, settings }
    }

    pub fn settings(&self) -> &SessionSettings {
        &self.settings
    }

    fn ttl(&self) -> u64 {
        self.settings.expiration.as_secs().max(1)
    }

    fn encode<T: Serialize>(id: &str, value: &T) -> Result<String> {
        serde_json::to_string(value).map_err(|e| SessionError::Corrupt {
            id: id.to_string(),
            message: e.to_string(),
        })
    }

    fn decode<T: for<'de> Deserialize<'de>>(id: &str, raw: &str) -> Result<T> {
        serde_json::from_str(raw).map_err(|e| SessionError::Corrupt {
            id: id.to_string(),
            message: e.to_string(),
        })
    }

    /* ===================== Lifecycle ===================== */

    /// Create the live record of a new session
    pub async fn register(&self, id: &str, live: &LiveState) -> Result<()> {
        let key = live_key(id);
        self.kv.rpush(&key, &Self::encode(id, live)?).await?;
        self.kv.ltrim(&key, -1, -1).await?;
        self.kv.expire(&key, self.ttl()).await?;
        self.kv.zadd(DIRECTORY, now_ms(), id).await?;
        info!(session_id = id, "Session registered");
        Ok(())
    }

    /// Overwrite the live record; `Gone` once the session was killed or completed
    pub async fn persist(&self, id: &str, live: &LiveState) -> Result<()> {
        let updated = self
            .kv
            .lset_if_exists(&live_key(id), -1, &Self::encode(id, live)?)
            .await?;
        if !updated {
            warn!(session_id = id, "Persist on a session that is gone");
            return Err(SessionError::Gone(id.to_string()));
        }
        self.kv.zadd(DIRECTORY, now_ms(), id).await?;
        debug!(session_id = id, state = ?live.state, "Session persisted");
        Ok(())
    }

    /// Store the final result and drop the live record
    pub async fn record_result(&self, id: &str, result: &JsonValue) -> Result<()> {
        let done = done_key(id);
        let completed = self
            .kv
            .rpush_consume(&done, &Self::encode(id, result)?, &live_key(id))
            .await?;
        if !completed {
            warn!(session_id = id, "Result for a session that is gone");
            return Err(SessionError::Gone(id.to_string()));
        }

        self.kv.ltrim(&done, 0, 0).await?;
        self.kv.expire(&done, self.ttl()).await?;
        self.kv.zadd(DIRECTORY, now_ms(), id).await?;
        info!(session_id = id, "Session completed");
        Ok(())
    }

    pub async fn live(&self, id: &str) -> Result<Option<LiveState>> {
        match self.kv.lindex(&live_key(id), -1).await? {
            Some(raw) => Ok(Some(Self::decode(id, &raw)?)),
            None => Ok(None),
        }
    }

    pub async fn is_done(&self, id: &str) -> Result<bool> {
        Ok(self.kv.exists(&done_key(id)).await?)
    }

    /* ===================== Results ===================== */

    async fn done(&self, id: &str) -> Result<Option<JsonValue>> {
        match self.kv.lindex(&done_key(id), 0).await? {
            Some(raw) => Ok(Some(Self::decode(id, &raw)?)),
            None => Ok(None),
        }
    }

    /// Result of a session whose live record is gone
    ///
    /// Completion swaps the live record for the result in one store step.
    async fn settled(&self, id: &str) -> Result<Option<JsonValue>> {
        match self.done(id).await? {
            Some(result) => Ok(Some(result)),
            None => Err(SessionError::NotFound(id.to_string())),
        }
    }

    /// Wait up to `timeout` for the result
    ///
    /// `Ok(None)` means the session is still running.
    pub async fn result(&self, id: &str, timeout: Duration) -> Result<Option<JsonValue>> {
        if let Some(result) = self.done(id).await? {
            return Ok(Some(result));
        }
        if !self.kv.exists(&live_key(id)).await? {
            return self.settled(id).await;
        }

        let done = done_key(id);
        match self.kv.brpoplpush(&done, &done, timeout).await? {
            Some(raw) => Ok(Some(Self::decode(id, &raw)?)),
            None => Ok(None),
        }
    }

    /// Bounded polling, for callers that cannot block on the store
    pub async fn poll_result(&self, id: &str) -> Result<Option<JsonValue>> {
        for attempt in 0..=self.settings.poll_retries {
            if let Some(result) = self.done(id).await? {
                return Ok(Some(result));
            }
            if !self.kv.exists(&live_key(id)).await? {
                return self.settled(id).await;
            }
            if attempt < self.settings.poll_retries {
                tokio::time::sleep(self.settings.poll_interval).await;
            }
        }
        Ok(None)
    }

    /* ===================== Trace ===================== */

    pub async fn append_trace(&self, id: &str, activation_id: &str) -> Result<()> {
        let key = trace_key(id);
        self.kv.rpush(&key, activation_id).await?;
        self.kv.expire(&key, self.ttl()).await?;
        Ok(())
    }

    pub async fn trace(&self, id: &str) -> Result<Vec<String>> {
        Ok(self.kv.lrange(&trace_key(id), 0, -1).await?)
    }

    /* ===================== Directory ===================== */

    /// Most recently updated sessions first
    ///
    /// Entries older than twice the expiration window, measured from the
    /// newest entry, are dropped from the directory first.
    pub async fn list(&self, limit: usize) -> Result<Vec<SessionEntry>> {
        let all = self
            .kv
            .zrange_by_score(DIRECTORY, f64::NEG_INFINITY, f64::INFINITY)
            .await?;
        let Some(newest) = all.last().map(|(_, score)| *score) else {
            return Ok(vec![]);
        };

        let horizon = newest - 2.0 * self.settings.expiration.as_millis() as f64;
        let dropped = self
            .kv
            .zrem_range_by_score(DIRECTORY, f64::NEG_INFINITY, horizon)
            .await?;
        if dropped > 0 {
            debug!(dropped, "Dropped stale sessions from directory");
        }

        let mut entries = vec![];
        for (id, score) in all.into_iter().rev().filter(|(_, s)| *s > horizon).take(limit) {
            let status = if self.kv.exists(&live_key(&id)).await? {
                SessionStatus::Running
            } else if self.kv.exists(&done_key(&id)).await? {
                SessionStatus::Done
            } else {
                SessionStatus::Dead
            };
            let updated_at = Utc
                .timestamp_millis_opt(score as i64)
                .single()
                .unwrap_or_else(Utc::now);
            entries.push(SessionEntry {
                id,
                status,
                updated_at,
            });
        }
        Ok(entries)
    }

    /// Stop a session; steps still in flight will find it gone
    ///
    /// Returns whether the session was running.
    pub async fn kill(&self, id: &str) -> Result<bool> {
        let live = live_key(id);
        let running = self.kv.exists(&live).await?;
        self.kv.del(&[live.as_str(), trace_key(id).as_str()]).await?;
        self.kv.zrem(DIRECTORY, id).await?;
        info!(session_id = id, running, "Session killed");
        Ok(running)
    }

    /// Delete every record of a session; returns how many keys existed
    pub async fn purge(&self, id: &str) -> Result<usize> {
        let removed = self
            .kv
            .del(&[
                live_key(id).as_str(),
                done_key(id).as_str(),
                trace_key(id).as_str(),
            ])
            .await?;
        self.kv.zrem(DIRECTORY, id).await?;
        info!(session_id = id, removed, "Session purged");
        Ok(removed)
    }
}
