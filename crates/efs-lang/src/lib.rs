//! The EFS expression and statement language.
//!
//! Text is tokenized with [`lexer::tokenize`], parsed into closed AST unions
//! by [`parse_expression`] / [`parse_statement`] and printed back in
//! normalised form through `Display`.

pub mod ast;
pub mod error;
pub mod lexer;
pub mod parser;
mod unparse;

pub use ast::{
    Argument, Association, BinaryOp, Builtin, Designator, ExprKind, Expression, Literal,
    QuantifierKind, Ref, RemoveKind, Statement, StmtKind, UnaryOp,
};
pub use error::{ParseError, ParseErrorKind};
pub use parser::{parse_expression, parse_statement};
