//! Conductor dispatch
//!
//! One invocation of the conductor action is one turn: load or create the
//! session, step the program until it needs an action result or ends,
//! persist, call out, and answer the invoker.

use serde_json::{json, Map, Value as JsonValue};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::errors::ConductorError;
use super::exec_loop::{run_until_suspended, Outcome};
use super::executor::TaskExecutor;
use super::invoker::{ActionInvoker, InvokeOptions, InvokeResponse, Notify};
use super::vm::VM;
use super::wire::{self, Command, Request, WireConfig};
use crate::compiler::{compile_with, ConcurrencyExtension, Fsm};
use crate::composer::Node;
use crate::session::{LiveState, SessionError, SessionStore};
use crate::value::Params;

#[derive(Debug, Clone)]
pub struct ConductorSettings {
    /// Fully-qualified name this conductor is deployed under
    pub action: String,
    /// How long a blocking start waits for the session result
    pub blocking_timeout: Duration,
}

impl Default for ConductorSettings {
    fn default() -> Self {
        Self {
            action: "/_/conductor".to_string(),
            blocking_timeout: Duration::from_secs(60),
        }
    }
}

/// How a turn ended
enum Turn {
    Suspended,
    Completed(JsonValue),
}

pub struct Conductor {
    sessions: SessionStore,
    invoker: Arc<dyn ActionInvoker>,
    executor: Arc<dyn TaskExecutor>,
    extension: Option<Arc<dyn ConcurrencyExtension>>,
    settings: ConductorSettings,
}

impl Conductor {
    pub fn new(
        sessions: SessionStore,
        invoker: Arc<dyn ActionInvoker>,
        executor: Arc<dyn TaskExecutor>,
        settings: ConductorSettings,
    ) -> Self {
        Self {
            sessions,
            invoker,
            executor,
            extension: None,
            settings,
        }
    }

    pub fn with_extension(mut self, extension: Arc<dyn ConcurrencyExtension>) -> Self {
        self.extension = Some(extension);
        self
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn settings(&self) -> &ConductorSettings {
        &self.settings
    }

    /// Handle one invocation; failures are rendered as `{code, error}`
    pub async fn dispatch(&self, params: JsonValue) -> JsonValue {
        match self.try_dispatch(params).await {
            Ok(response) => response,
            Err(e) => {
                warn!(code = e.code(), error = %e, "Conductor invocation failed");
                e.to_response()
            }
        }
    }

    pub async fn try_dispatch(&self, params: JsonValue) -> Result<JsonValue, ConductorError> {
        let request = Request::parse(params)?;

        match request.command {
            Command::Start { ref program } => {
                let fsm = self.load_program(program)?;
                self.start(fsm, &request).await
            }
            Command::Resume {
                ref session_id,
                ref result,
            } => self.resume(session_id, result.clone(), &request).await,
        }
    }

    /* ===================== Start / Resume ===================== */

    /// Accept a composition AST, a compiled wrapper, or a bare program
    fn load_program(&self, program: &JsonValue) -> Result<Fsm, ConductorError> {
        let object = program.as_object().ok_or_else(|| {
            ConductorError::BadRequest(format!("{} must be an object", wire::INVOKE))
        })?;

        if object.contains_key("type") {
            let node = Node::from_json(program.clone()).map_err(crate::compiler::CompileError::from)?;
            let compiled = compile_with(&node, self.extension.as_deref())?;
            return Ok(compiled.composition);
        }
        if let Some(composition) = object.get("composition") {
            return Ok(Fsm::from_json(composition.clone())?);
        }
        Ok(Fsm::from_json(program.clone())?)
    }

    async fn start(&self, fsm: Fsm, request: &Request) -> Result<JsonValue, ConductorError> {
        let session_id = Uuid::new_v4().to_string();
        let live = LiveState {
            state: Some(fsm.entry),
            fsm,
            stack: vec![],
            callee: request.config.notify.clone(),
            config: request.config.clone(),
        };

        self.sessions.register(&session_id, &live).await?;
        if let Some(activation_id) = &request.activation_id {
            self.sessions.append_trace(&session_id, activation_id).await?;
        }
        info!(session_id = %session_id, "Session started");

        let vm = VM::new(&live.fsm, JsonValue::Object(request.params.clone()));
        let turn = self.drive(&session_id, live.clone(), vm, request).await?;

        if !request.blocking {
            return Ok(handle(&session_id));
        }
        match turn {
            Turn::Completed(result) => Ok(result),
            Turn::Suspended => {
                let waited = self
                    .sessions
                    .result(&session_id, self.settings.blocking_timeout)
                    .await?;
                Ok(waited.unwrap_or_else(|| handle(&session_id)))
            }
        }
    }

    async fn resume(
        &self,
        session_id: &str,
        result: JsonValue,
        request: &Request,
    ) -> Result<JsonValue, ConductorError> {
        let Some(live) = self.sessions.live(session_id).await? else {
            if self.sessions.is_done(session_id).await? {
                warn!(session_id, "Resume of a completed session");
                return Err(SessionError::Gone(session_id.to_string()).into());
            }
            return Err(SessionError::NotFound(session_id.to_string()).into());
        };

        if let Some(activation_id) = &request.activation_id {
            self.sessions.append_trace(session_id, activation_id).await?;
        }
        debug!(session_id, state = ?live.state, "Session resumed");

        let vm = VM::resume(&live.fsm, live.state, live.stack.clone(), result);
        match self.drive(session_id, live.clone(), vm, request).await? {
            Turn::Completed(result) => Ok(result),
            Turn::Suspended => Ok(handle(session_id)),
        }
    }

    /* ===================== Turn ===================== */

    async fn drive(
        &self,
        session_id: &str,
        mut live: LiveState,
        mut vm: VM<'_>,
        request: &Request,
    ) -> Result<Turn, ConductorError> {
        loop {
            let outcome = match run_until_suspended(&mut vm, self.executor.as_ref()) {
                Ok(outcome) => outcome,
                Err(e) => {
                    let e = ConductorError::from(e);
                    self.complete(session_id, &live, e.to_response()).await?;
                    return Err(e);
                }
            };

            let (action, params) = match outcome {
                Outcome::Complete(result) => {
                    let result = JsonValue::Object(result);
                    self.complete(session_id, &live, result.clone()).await?;
                    return Ok(Turn::Completed(result));
                }
                Outcome::Invoke { action, params } => (action, params),
            };

            live.state = vm.state;
            live.stack = vm.stack.clone();
            self.sessions.persist(session_id, &live).await?;

            let (params, options) = self.call(session_id, &action, params, &live.config, request);
            match self.invoker.invoke(&action, params, options).await {
                Ok(InvokeResponse::Accepted { activation_id }) => {
                    self.sessions.append_trace(session_id, &activation_id).await?;
                    info!(session_id, action = %action, activation_id = %activation_id, "Session suspended");
                    return Ok(Turn::Suspended);
                }
                Ok(InvokeResponse::Completed(result)) => {
                    debug!(session_id, action = %action, "Action completed synchronously");
                    vm.deliver(result);
                }
                Err(e) => {
                    warn!(session_id, action = %action, error = %e, "Action invocation failed");
                    vm.deliver(json!({ "error": e.to_string() }));
                }
            }
        }
    }

    /// Params and options for an outgoing action call
    ///
    /// A call to another conductor carries `$config` so the new session
    /// records this one as its caller. Any other action reports back through
    /// the platform's notify mechanism.
    fn call(
        &self,
        session_id: &str,
        action: &str,
        mut params: Params,
        config: &WireConfig,
        request: &Request,
    ) -> (JsonValue, InvokeOptions) {
        let notify = Notify {
            action: self.settings.action.clone(),
            session_id: session_id.to_string(),
        };
        let mut options = InvokeOptions {
            blocking: false,
            notify: None,
            cause: request.activation_id.clone(),
        };

        if action == self.settings.action {
            let forwarded = WireConfig {
                store: config.store.clone(),
                notify: Some(notify),
                expiration: config.expiration,
            };
            params.insert(
                wire::CONFIG.to_string(),
                serde_json::to_value(forwarded).unwrap_or(JsonValue::Null),
            );
        } else {
            options.notify = Some(notify);
        }

        (JsonValue::Object(params), options)
    }

    /// Record the result and notify the caller of a sub-workflow
    async fn complete(
        &self,
        session_id: &str,
        live: &LiveState,
        result: JsonValue,
    ) -> Result<(), ConductorError> {
        self.sessions.record_result(session_id, &result).await?;

        if let Some(callee) = &live.callee {
            let mut message = Map::new();
            message.insert(wire::SESSION_ID.to_string(), json!(callee.session_id));
            message.insert(wire::RESULT.to_string(), result);
            let options = InvokeOptions {
                blocking: false,
                notify: None,
                cause: Some(session_id.to_string()),
            };
            if let Err(e) = self
                .invoker
                .invoke(&callee.action, JsonValue::Object(message), options)
                .await
            {
                warn!(session_id, caller = %callee.session_id, error = %e, "Failed to notify caller");
            }
        }
        Ok(())
    }
}

/// Response of a turn that left the session running
fn handle(session_id: &str) -> JsonValue {
    let mut response = Map::new();
    response.insert(wire::SESSION_ID.to_string(), json!(session_id));
    JsonValue::Object(response)
}
