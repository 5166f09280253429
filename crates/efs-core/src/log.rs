//! Element log: leveled diagnostics attached to model elements.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Severity of a message. Ordered so that `Error` is the highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Level {
    Info,
    Warning,
    Error,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Level::Error => write!(f, "ERROR"),
            Level::Warning => write!(f, "WARN"),
            Level::Info => write!(f, "INFO"),
        }
    }
}

/// Category of a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Malformed expression or statement text.
    Parse,
    UnresolvedReference,
    AmbiguousReference,
    TypeMismatch,
    /// Assignment to a target whose mode or kind forbids it.
    InvalidAssignment,
    RangeViolation,
    /// Cycle in the namespace or rule hierarchy.
    CyclicDependency,
    RuntimeEvaluation,
    /// Informational or warning messages without an error category.
    Note,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Parse => "parse error",
            ErrorKind::UnresolvedReference => "unresolved reference",
            ErrorKind::AmbiguousReference => "ambiguous reference",
            ErrorKind::TypeMismatch => "type mismatch",
            ErrorKind::InvalidAssignment => "invalid assignment",
            ErrorKind::RangeViolation => "range violation",
            ErrorKind::CyclicDependency => "cyclic dependency",
            ErrorKind::RuntimeEvaluation => "runtime error",
            ErrorKind::Note => "note",
        };
        write!(f, "{s}")
    }
}

/// The pass that produced a message. Each pass clears only its own messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Origin {
    Parse,
    Analysis,
    Runtime,
}

/// A source range inside an expression or statement text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Span {
    /// Start byte offset (inclusive).
    pub start: usize,
    /// End byte offset (exclusive).
    pub end: usize,
    /// 1-based line number.
    pub line: usize,
    /// 1-based column.
    pub column: usize,
}

impl Span {
    /// Smallest span covering both `self` and `other`.
    pub fn merge(&self, other: &Span) -> Span {
        let (first, _) = if self.start <= other.start {
            (self, other)
        } else {
            (other, self)
        };
        Span {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
            line: first.line,
            column: first.column,
        }
    }
}

/// One diagnostic attached to an element.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub level: Level,
    pub kind: ErrorKind,
    pub origin: Origin,
    pub text: String,
    pub span: Option<Span>,
}

impl Message {
    pub fn error(kind: ErrorKind, origin: Origin, text: impl Into<String>) -> Self {
        Self {
            level: Level::Error,
            kind,
            origin,
            text: text.into(),
            span: None,
        }
    }

    pub fn warning(origin: Origin, text: impl Into<String>) -> Self {
        Self {
            level: Level::Warning,
            kind: ErrorKind::Note,
            origin,
            text: text.into(),
            span: None,
        }
    }

    pub fn info(origin: Origin, text: impl Into<String>) -> Self {
        Self {
            level: Level::Info,
            kind: ErrorKind::Note,
            origin,
            text: text.into(),
            span: None,
        }
    }

    pub fn at(mut self, span: Span) -> Self {
        self.span = Some(span);
        self
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.level, self.kind, self.text)?;
        if let Some(span) = self.span {
            write!(f, " (at {}:{})", span.line, span.column)?;
        }
        Ok(())
    }
}
