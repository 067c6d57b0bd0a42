//! Test helpers: an in-process action platform
//!
//! `LocalPlatform` runs registered actions inline and queues every result
//! addressed to the conductor. `drain` feeds the queue back into a
//! Conductor until nothing is left, which plays out a whole workflow the
//! way the platform would, one dispatch per delivery.

use async_trait::async_trait;
use serde_json::{json, Value as JsonValue};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::conductor::{
    ActionInvoker, Conductor, ConductorSettings, InvokeError, InvokeOptions, InvokeResponse,
};
use crate::conductor::wire;
use crate::session::{SessionSettings, SessionStore};
use crate::store::MemoryStore;

pub type ActionFn = Arc<dyn Fn(JsonValue) -> JsonValue + Send + Sync>;

/// One recorded invocation
#[derive(Debug, Clone)]
pub struct Call {
    pub action: String,
    pub params: JsonValue,
    pub options: InvokeOptions,
}

pub struct LocalPlatform {
    conductor: String,
    actions: Mutex<HashMap<String, ActionFn>>,
    queue: Mutex<VecDeque<JsonValue>>,
    calls: Mutex<Vec<Call>>,
    synchronous: AtomicBool,
    activations: AtomicUsize,
}

impl LocalPlatform {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            conductor: ConductorSettings::default().action,
            actions: Mutex::new(HashMap::new()),
            queue: Mutex::new(VecDeque::new()),
            calls: Mutex::new(vec![]),
            synchronous: AtomicBool::new(false),
            activations: AtomicUsize::new(0),
        })
    }

    /// Register an action under its fully-qualified name
    pub fn action<F>(&self, name: &str, f: F)
    where
        F: Fn(JsonValue) -> JsonValue + Send + Sync + 'static,
    {
        self.actions
            .lock()
            .unwrap()
            .insert(name.to_string(), Arc::new(f));
    }

    /// Answer action calls inline instead of through notify
    pub fn set_synchronous(&self, synchronous: bool) {
        self.synchronous.store(synchronous, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Calls made to a given action
    pub fn calls_to(&self, action: &str) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| c.action == action)
            .collect()
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().unwrap().len()
    }

    /// Dispatch queued deliveries until the queue is empty
    pub async fn drain(&self, conductor: &Conductor) -> Vec<JsonValue> {
        let mut responses = vec![];
        for _ in 0..10_000 {
            let next = self.queue.lock().unwrap().pop_front();
            let Some(params) = next else {
                return responses;
            };
            responses.push(conductor.dispatch(params).await);
        }
        panic!("platform queue did not drain");
    }

    fn activation(&self) -> String {
        format!("activation-{}", self.activations.fetch_add(1, Ordering::SeqCst))
    }
}

#[async_trait]
impl ActionInvoker for LocalPlatform {
    async fn invoke(
        &self,
        action: &str,
        params: JsonValue,
        options: InvokeOptions,
    ) -> Result<InvokeResponse, InvokeError> {
        self.calls.lock().unwrap().push(Call {
            action: action.to_string(),
            params: params.clone(),
            options: options.clone(),
        });

        if action == self.conductor {
            self.queue.lock().unwrap().push_back(params);
            return Ok(InvokeResponse::Accepted {
                activation_id: self.activation(),
            });
        }

        let f = self
            .actions
            .lock()
            .unwrap()
            .get(action)
            .cloned()
            .ok_or_else(|| InvokeError::NotFound(action.to_string()))?;
        let result = f(params);

        if self.synchronous.load(Ordering::SeqCst) {
            return Ok(InvokeResponse::Completed(result));
        }
        if let Some(notify) = options.notify {
            self.queue.lock().unwrap().push_back(json!({
                (wire::SESSION_ID): notify.session_id,
                (wire::RESULT): result,
            }));
        }
        Ok(InvokeResponse::Accepted {
            activation_id: self.activation(),
        })
    }
}

/// Session Store over a fresh in-memory backend
pub fn memory_sessions() -> SessionStore {
    SessionStore::new(Arc::new(MemoryStore::new()), SessionSettings::default())
}
