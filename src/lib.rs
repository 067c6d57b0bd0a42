//! # Conductor core
//!
//! Workflow compositions for a serverless action platform.
//!
//! - [`composer`]: the combinator algebra that builds compositions
//! - [`lowering`]: rewrites derived combinators into primitives
//! - [`compiler`]: flattens a composition into a conductor program
//! - [`conductor`]: the stateless step interpreter and its dispatch protocol
//! - [`session`] / [`store`]: session persistence over a key-value store

pub mod application;
pub mod cli;
pub mod compiler;
pub mod composer;
pub mod conductor;
pub mod config;
pub mod db;
pub mod lowering;
pub mod names;
pub mod session;
pub mod store;
pub mod value;

#[cfg(test)]
mod test_helpers;

pub use application::Application;
pub use compiler::{compile, compile_with, Compiled, Fsm};
pub use composer::{ComposerError, Node};
pub use conductor::{Conductor, ConductorError, ConductorSettings};
pub use config::Config;
pub use session::SessionStore;
