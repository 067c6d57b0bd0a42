//! Function bodies carried by `function` nodes and Task states
//!
//! A body is either user code, evaluated by a [`TaskExecutor`], or one of the
//! builtin operations the lowering pass emits for derived combinators.
//!
//! [`TaskExecutor`]: crate::conductor::TaskExecutor

use serde::{Deserialize, Serialize};

/// Executable function body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Function {
    /// User code, handed to the task executor as-is
    Exec(Exec),
    /// Interpreter-native operation produced by lowering
    Builtin(Builtin),
}

/// User code: a runtime kind and the source the runtime understands
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exec {
    pub kind: String,
    pub code: String,
}

impl Function {
    pub fn exec(kind: impl Into<String>, code: impl Into<String>) -> Self {
        Function::Exec(Exec {
            kind: kind.into(),
            code: code.into(),
        })
    }
}

/// Operations over params and the lexical environment
///
/// Each variant documents the equivalent lambda over `params` and the
/// bound symbols.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Builtin {
    /// `args => { symbol = args }`
    Capture { symbol: String },
    /// `() => symbol`
    Get { symbol: String },
    /// `() => symbol-- > 0`
    CountDown { symbol: String },
    /// `({result}) => result !== undefined && result.error !== undefined && symbol-- > 0`
    RetryCheck { symbol: String },
    /// `args => ({ [field]: args })`
    Wrap { field: String },
    /// `(args) => args[field]`
    Field { field: String },
    /// `result => ({ params: symbol, result })`
    Retain { symbol: String },
    /// `({params, result}) => ({ params, result: result.result })`
    UnwrapResult,
    /// `({params, result}) => Object.assign(params, result)`
    Merge,
}

impl From<Builtin> for Function {
    fn from(builtin: Builtin) -> Self {
        Function::Builtin(builtin)
    }
}

impl From<Exec> for Function {
    fn from(exec: Exec) -> Self {
        Function::Exec(exec)
    }
}
