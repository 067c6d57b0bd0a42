//! # Conductor
//!
//! Stateless step interpreter for compiled conductor programs.
//!
//! A turn runs the program from the current state until an action must be
//! called or the program ends. Between turns the state and the execution
//! stack live in the Session Store; the action result arrives with the next
//! invocation and execution resumes where it stopped.
//!
//! - [`vm`] / [`exec_loop`] / [`states`]: the pure interpreter, no I/O
//! - [`dispatch`]: sessions, action calls and the wire protocol around it

pub mod builtins;
pub mod dispatch;
pub mod errors;
pub mod exec_loop;
pub mod executor;
pub mod frames;
pub mod invoker;
pub mod states;
pub mod vm;
pub mod wire;

#[cfg(test)]
mod tests;

pub use dispatch::{Conductor, ConductorSettings};
pub use errors::{ConductorError, ExecutionError};
pub use exec_loop::{run_until_suspended, step, Outcome};
pub use executor::{NativeExecutor, TaskError, TaskExecutor};
pub use frames::Frame;
pub use invoker::{ActionInvoker, InvokeError, InvokeOptions, InvokeResponse, Notify};
pub use vm::{Step, VM};
pub use wire::{Command, Request, WireConfig};
