//! Task executor capability
//!
//! The interpreter hands user function bodies to a [`TaskExecutor`] together
//! with the current params and the visible bindings. Whatever the executor
//! leaves in the environment is written back to the owning `let` frames.

use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::composer::Exec;
use crate::value::{Env, Params};

#[derive(Debug, Error)]
pub enum TaskError {
    #[error("'{0}' is not defined")]
    Unbound(String),

    #[error("{0}")]
    Type(String),

    #[error("No runtime for function kind '{0}'")]
    UnsupportedKind(String),

    #[error("Unknown native function '{0}'")]
    UnknownFunction(String),

    #[error("{0}")]
    Failed(String),
}

pub trait TaskExecutor: Send + Sync {
    /// Evaluate a function body
    ///
    /// `Ok(None)` leaves params unchanged; `Ok(Some(v))` replaces them.
    fn evaluate(
        &self,
        exec: &Exec,
        params: &Params,
        env: &mut Env,
    ) -> Result<Option<JsonValue>, TaskError>;
}

pub type NativeFn =
    Arc<dyn Fn(&Params, &mut Env) -> Result<Option<JsonValue>, TaskError> + Send + Sync>;

/// Executor for functions written in Rust, addressed as `{kind: "native", code: <name>}`
#[derive(Clone, Default)]
pub struct NativeExecutor {
    functions: HashMap<String, NativeFn>,
}

impl NativeExecutor {
    pub const KIND: &'static str = "native";

    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, f: F) -> &mut Self
    where
        F: Fn(&Params, &mut Env) -> Result<Option<JsonValue>, TaskError> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(f));
        self
    }

    pub fn with<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&Params, &mut Env) -> Result<Option<JsonValue>, TaskError> + Send + Sync + 'static,
    {
        self.register(name, f);
        self
    }
}

impl TaskExecutor for NativeExecutor {
    fn evaluate(
        &self,
        exec: &Exec,
        params: &Params,
        env: &mut Env,
    ) -> Result<Option<JsonValue>, TaskError> {
        if exec.kind != Self::KIND {
            return Err(TaskError::UnsupportedKind(exec.kind.clone()));
        }
        let f = self
            .functions
            .get(&exec.code)
            .ok_or_else(|| TaskError::UnknownFunction(exec.code.clone()))?;
        f(params, env)
    }
}

impl std::fmt::Debug for NativeExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.functions.keys().collect();
        names.sort();
        f.debug_struct("NativeExecutor")
            .field("functions", &names)
            .finish()
    }
}
