//! Fully-qualified action names
//!
//! Every action reference in a composition is canonicalized to the
//! `/namespace/package/action` form before it is stored in a node.

use thiserror::Error;

const DELIMITER: char = '/';

/// Namespace used when a name does not carry one
pub const DEFAULT_NAMESPACE: &str = "_";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum NameError {
    #[error("Name is not specified")]
    Missing,

    #[error("Name '{0}' is not valid")]
    Invalid(String),
}

/// Canonicalize an action name
///
/// - `a` and `a/b` live in the default namespace: `/_/a`, `/_/a/b`
/// - `a/b/c` is already namespaced: `/a/b/c`
/// - names with a leading slash must have 2 or 3 segments after it
pub fn fqn(name: &str) -> Result<String, NameError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(NameError::Missing);
    }

    let parts: Vec<&str> = name.split(DELIMITER).collect();
    let n = parts.len();
    let leading_slash = name.starts_with(DELIMITER);

    if n > 4 || (leading_slash && n == 2) || (!leading_slash && n == 4) {
        return Err(NameError::Invalid(name.to_string()));
    }

    // The first part is empty for a leading slash; every other part must not be
    if parts.iter().skip(1).any(|part| part.trim().is_empty()) {
        return Err(NameError::Invalid(name.to_string()));
    }

    let joined = parts.join("/");
    if leading_slash {
        Ok(joined)
    } else if n < 3 {
        Ok(format!("{DELIMITER}{DEFAULT_NAMESPACE}{DELIMITER}{joined}"))
    } else {
        Ok(format!("{DELIMITER}{joined}"))
    }
}
