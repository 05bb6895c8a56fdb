use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque correlation id tying one scope's context to its registered
/// interceptor. Compared for equality only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Token(Uuid);

impl Token {
    /// Generates a fresh token.
    ///
    /// Random v4 ids are distinct from every other live token with
    /// overwhelming probability; the registry still refuses duplicates.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Immutable provenance snapshot for one scope.
///
/// Created on scope entry and pushed onto the execution context's slot;
/// popped on scope exit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvenanceContext {
    pub token: Token,
    pub remote_addr: Option<String>,
    pub path: Option<String>,
    pub domain_object_id: Option<String>,
    pub approval_id: Option<String>,
}

impl ProvenanceContext {
    /// Creates an empty context bound to `token`.
    #[must_use]
    pub fn new(token: Token) -> Self {
        Self {
            token,
            remote_addr: None,
            path: None,
            domain_object_id: None,
            approval_id: None,
        }
    }
}
