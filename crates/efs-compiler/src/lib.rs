//! Name resolution, semantic analysis and refactoring for EFS models.
//!
//! The [`Compiler`] owns everything derived from slot text: the
//! [`FinderCache`], the [`SlotTable`] of bound trees and the resolved
//! declaration types. Hosts drive it through [`Compiler::compile`],
//! [`Compiler::tick`] and the refactoring entry points.

pub mod analyzer;
pub mod cache;
pub mod compiler;
pub mod error;
pub mod finder;
pub mod refactor;
pub mod slots;

pub use analyzer::{Analysis, Analyzer, Diagnostic};
pub use cache::{CacheStats, FinderCache};
pub use compiler::{CompileOutcome, CompileReport, CompileRequest, Compiler};
pub use error::{CompileError, ResolveError, Result};
pub use finder::Filter;
pub use refactor::RefactorReport;
pub use slots::{Slot, SlotTable, SlotTree};
