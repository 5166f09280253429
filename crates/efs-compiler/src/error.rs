//! Error types for name resolution and compilation.

use efs_core::element::ElementId;
use efs_core::error::ModelError;

/// A name that could not be bound to exactly one declaration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("unresolved reference '{name}'")]
    Unresolved { name: String },

    #[error("ambiguous reference '{name}': candidates {}", candidates.join(", "))]
    Ambiguous {
        name: String,
        candidates: Vec<String>,
    },

    #[error("'{owner}' has no member '{name}'")]
    NoMember { owner: String, name: String },
}

/// Errors from compiler entry points.
#[derive(Debug, thiserror::Error)]
pub enum CompileError {
    /// Refactoring needs bindings computed against the current model.
    #[error("bindings are stale: compiled at revision {compiled:?}, model is at {current}")]
    StaleBindings { compiled: Option<u64>, current: u64 },

    #[error("element {0} is not part of the model")]
    UnknownElement(ElementId),

    #[error(transparent)]
    Model(#[from] ModelError),
}

pub type Result<T> = std::result::Result<T, CompileError>;
