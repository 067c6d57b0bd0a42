//! # Composition Algebra
//!
//! Builds validated composition trees from combinators. Each combinator is a
//! variant of [`Combinator`] bound to a fixed argument [`Schema`]; the typed
//! constructors in [`combinators`] and the generic [`build`] share one
//! validation path.

pub mod combinators;
pub mod errors;
pub mod function;
pub mod node;
pub mod schema;


pub use combinators::*;
pub use errors::ComposerError;
pub use function::{Builtin, Exec, Function};
pub use node::{Kind, Node};
pub use schema::{build, Arg, ArgSpec, ArgType, Combinator, Schema};
