//! Core model for EFS formal specifications.
//!
//! The model is an arena of named elements (namespaces, types, variables,
//! functions, procedures and rules) forming a strict ownership tree with
//! id-based back references. This crate also defines the structural type
//! system, runtime values, and the per-element diagnostic log.

pub mod builder;
pub mod element;
pub mod error;
pub mod log;
pub mod model;
pub mod types;
pub mod value;

pub use builder::ModelBuilder;
pub use element::{Element, ElementId, ElementKind, KindTag, Mode, Precision, RulePriority};
pub use error::ModelError;
pub use log::{ErrorKind, Level, Message, Origin, Span};
pub use model::Model;
pub use types::{Type, TypeEnv, TypeTable};
pub use value::Value;
