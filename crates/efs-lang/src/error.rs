//! Parse error types.

use efs_core::log::Span;

use crate::lexer::Token;

/// Category of parse error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Input that no token matches.
    InvalidToken,
    /// Found X, expected Y.
    UnexpectedToken,
    UnexpectedEof,
    /// Well-formed tokens in an illegal arrangement.
    InvalidSyntax,
}

/// Parse error with source location.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message} (at {}:{})", span.line, span.column)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    pub span: Span,
}

impl ParseError {
    pub fn new(kind: ParseErrorKind, message: impl Into<String>, span: Span) -> Self {
        Self {
            kind,
            message: message.into(),
            span,
        }
    }

    /// Create an "expected X, found Y" error.
    pub fn expected(expected: &str, found: Option<&Token>, span: Span) -> Self {
        match found {
            Some(token) => Self::new(
                ParseErrorKind::UnexpectedToken,
                format!("expected {expected}, found '{token}'"),
                span,
            ),
            None => Self::new(
                ParseErrorKind::UnexpectedEof,
                format!("expected {expected}, found end of input"),
                span,
            ),
        }
    }

    pub fn invalid_syntax(message: impl Into<String>, span: Span) -> Self {
        Self::new(ParseErrorKind::InvalidSyntax, message, span)
    }
}
