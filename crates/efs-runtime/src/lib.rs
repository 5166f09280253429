//! Cyclic evaluation of compiled EFS models.
//!
//! The [`Engine`] runs rule activations phase by phase over a
//! [`VariableStore`]; the [`Session`] ties a model to its compiler, store
//! and engine and is the entry point for hosts.

pub mod config;
pub mod engine;
pub mod error;
pub mod eval;
pub mod functions;
pub mod session;
pub mod store;

pub use config::EngineConfig;
pub use engine::{Activation, CycleReport, Engine};
pub use error::{EvalError, EvalResult, Result, SessionError};
pub use eval::{Evaluator, Frame, RuleOutcome};
pub use functions::FunctionCache;
pub use session::Session;
pub use store::{Location, Snapshot, VariableStore};
