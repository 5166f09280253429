//! Runtime error types.

use efs_compiler::CompileError;
use efs_core::element::ElementId;
use efs_core::error::ModelError;
use efs_core::types::RangeViolation;
use thiserror::Error;

/// A failure while evaluating one rule, function or default value.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("division by zero")]
    DivisionByZero,

    #[error("arithmetic overflow in {op}")]
    Overflow { op: &'static str },

    #[error("negative exponent {exponent} in integer power")]
    NegativeExponent { exponent: i64 },

    #[error("argument outside the domain of {function}")]
    Domain { function: String },

    #[error("no case of {function} matches its arguments")]
    NoMatchingCase { function: String },

    #[error("{function} has neither cases nor an interpolation")]
    NoDefinition { function: String },

    #[error("call depth limit of {limit} exceeded")]
    CallDepth { limit: usize },

    #[error("{element} has compile errors")]
    NotCompiled { element: String },

    #[error("collection {collection} is full (max {max})")]
    CollectionFull { collection: String, max: usize },

    #[error("no element of the collection matches")]
    NoSelection,

    #[error("THIS is not available here")]
    NoInstance,

    #[error("'{name}' has no value here")]
    Unbound { name: String },

    #[error("expected {expected}, found {found}")]
    Type { expected: &'static str, found: String },
}

pub type EvalResult<T> = std::result::Result<T, EvalError>;

/// Errors from [`crate::Session`] entry points.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Model(#[from] ModelError),

    #[error("element {0} is not a variable")]
    NotAVariable(ElementId),

    #[error("value {value} does not fit the type of {variable}")]
    TypeMismatch { variable: String, value: String },

    #[error(transparent)]
    Range(#[from] RangeViolation),
}

pub type Result<T> = std::result::Result<T, SessionError>;
