//! Error types for the authorization engine

use std::fmt;
use thiserror::Error;

/// Result type alias for authorization operations
pub type Result<T> = std::result::Result<T, AuthzError>;

/// Kind of policy entity, used to name the side of a dangling reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    SecurityItem,
    SecurityIdentity,
    AuthorisableItem,
    Authorization,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EntityKind::SecurityItem => "security item",
            EntityKind::SecurityIdentity => "security identity",
            EntityKind::AuthorisableItem => "authorisable item",
            EntityKind::Authorization => "authorization",
        };
        f.write_str(name)
    }
}

/// Authorization engine errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthzError {
    /// A record references a key that the providers never supplied
    #[error("{referenced_by} references unknown {kind} '{key}'")]
    UnknownReference {
        kind: EntityKind,
        key: String,
        referenced_by: String,
    },

    /// Two records of a uniquely keyed kind share a key
    #[error("duplicate {kind} key '{key}'")]
    DuplicateKey { kind: EntityKind, key: String },

    /// The security item hierarchy contains a cycle
    #[error("circular hierarchy detected: {}", path.join(" -> "))]
    CircularHierarchy { path: Vec<String> },

    /// A life cycle could not be evaluated
    #[error("life cycle evaluation failed: {reason}")]
    LifeCycleEvaluation { reason: String },

    /// A payload could not be encoded or decoded
    #[error("payload codec error: {0}")]
    Codec(String),

    /// A provider failed to supply its data
    #[error("provider error: {0}")]
    Provider(String),

    /// Generic internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl AuthzError {
    /// Whether this error describes inconsistent policy data rather than a
    /// runtime fault
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            AuthzError::UnknownReference { .. }
                | AuthzError::DuplicateKey { .. }
                | AuthzError::CircularHierarchy { .. }
        )
    }
}

impl From<anyhow::Error> for AuthzError {
    fn from(err: anyhow::Error) -> Self {
        AuthzError::Provider(format!("{:#}", err))
    }
}
