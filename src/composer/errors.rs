use thiserror::Error;

use crate::names::NameError;

/// Errors raised while building a composition
#[derive(Debug, Error)]
pub enum ComposerError {
    /// Wrong shape: arity, missing or out-of-range argument
    #[error("Invalid argument '{arg}' in combinator '{combinator}': {message}")]
    Validation {
        combinator: &'static str,
        arg: String,
        message: String,
    },

    /// An action name that does not canonicalize
    #[error("Invalid name in argument '{arg}' of combinator '{combinator}': {source}")]
    Name {
        combinator: &'static str,
        arg: String,
        #[source]
        source: NameError,
    },

    /// A child slot given something that cannot become a node
    #[error("Invalid type for argument '{arg}' of combinator '{combinator}': {message}")]
    Type {
        combinator: &'static str,
        arg: String,
        message: String,
    },

    /// Composition JSON that does not describe a tree of known nodes
    #[error("Malformed composition: {0}")]
    Malformed(String),
}
