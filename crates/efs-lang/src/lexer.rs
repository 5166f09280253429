//! Lexical analysis for EFS expressions and statements.
//!
//! Tokens are produced by logos; whitespace and `//` comments are skipped.
//! Keywords are upper case; boolean literals accept `True`/`true` and
//! `False`/`false`.

use std::fmt;

use efs_core::log::Span;
use logos::Logos;

use crate::error::{ParseError, ParseErrorKind};

/// EFS token.
#[derive(Logos, Debug, Clone, PartialEq)]
#[logos(skip r"[ \t\r\n\f]+")]
#[logos(skip r"//[^\n]*")]
pub enum Token {
    // === Keywords ===
    #[token("AND")]
    And,
    #[token("OR")]
    Or,
    #[token("NOT")]
    Not,
    #[token("IN")]
    In,
    #[token("THERE_IS")]
    ThereIs,
    #[token("FORALL")]
    ForAll,
    #[token("FIRST")]
    First,
    #[token("LAST")]
    Last,
    #[token("COUNT")]
    Count,
    #[token("SUM")]
    Sum,
    #[token("MAP")]
    Map,
    #[token("FILTER")]
    Filter,
    #[token("USING")]
    Using,
    #[token("INSERT")]
    Insert,
    #[token("REMOVE")]
    Remove,
    #[token("ALL")]
    All,
    #[token("REPLACE")]
    Replace,
    #[token("BY")]
    By,
    #[token("APPLY")]
    Apply,
    #[token("DO")]
    Do,
    #[token("EMPTY")]
    Empty,
    #[token("THIS")]
    This,

    // === Literals ===
    #[token("True")]
    #[token("true")]
    True,
    #[token("False")]
    #[token("false")]
    False,
    #[regex(r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?", |lex| {
        lex.slice().parse::<f64>().ok().filter(|d| d.is_finite())
    })]
    Double(f64),
    #[regex(r"[0-9]+", |lex| lex.slice().parse::<i64>().ok())]
    Integer(i64),
    #[regex(r"'[^']*'", |lex| {
        let s = lex.slice();
        s[1..s.len() - 1].to_string()
    })]
    Str(String),
    #[regex(r"[A-Za-z_][A-Za-z0-9_]*", |lex| lex.slice().to_string())]
    Ident(String),

    // === Punctuation ===
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token(",")]
    Comma,
    #[token(".")]
    Dot,
    #[token("|")]
    Bar,
    #[token("=>")]
    Arrow,
    #[token("<-")]
    Assign,

    // === Operators ===
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("^")]
    Caret,
    #[token("==")]
    EqEq,
    #[token("!=")]
    NotEq,
    #[token("<")]
    Lt,
    #[token("<=")]
    Le,
    #[token(">")]
    Gt,
    #[token(">=")]
    Ge,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Token::And => "AND",
            Token::Or => "OR",
            Token::Not => "NOT",
            Token::In => "IN",
            Token::ThereIs => "THERE_IS",
            Token::ForAll => "FORALL",
            Token::First => "FIRST",
            Token::Last => "LAST",
            Token::Count => "COUNT",
            Token::Sum => "SUM",
            Token::Map => "MAP",
            Token::Filter => "FILTER",
            Token::Using => "USING",
            Token::Insert => "INSERT",
            Token::Remove => "REMOVE",
            Token::All => "ALL",
            Token::Replace => "REPLACE",
            Token::By => "BY",
            Token::Apply => "APPLY",
            Token::Do => "DO",
            Token::Empty => "EMPTY",
            Token::This => "THIS",
            Token::True => "True",
            Token::False => "False",
            Token::Double(d) => return write!(f, "{d}"),
            Token::Integer(i) => return write!(f, "{i}"),
            Token::Str(s) => return write!(f, "'{s}'"),
            Token::Ident(name) => return write!(f, "{name}"),
            Token::LParen => "(",
            Token::RParen => ")",
            Token::LBracket => "[",
            Token::RBracket => "]",
            Token::LBrace => "{",
            Token::RBrace => "}",
            Token::Comma => ",",
            Token::Dot => ".",
            Token::Bar => "|",
            Token::Arrow => "=>",
            Token::Assign => "<-",
            Token::Plus => "+",
            Token::Minus => "-",
            Token::Star => "*",
            Token::Slash => "/",
            Token::Percent => "%",
            Token::Caret => "^",
            Token::EqEq => "==",
            Token::NotEq => "!=",
            Token::Lt => "<",
            Token::Le => "<=",
            Token::Gt => ">",
            Token::Ge => ">=",
        };
        write!(f, "{s}")
    }
}

/// Maps byte offsets to 1-based line/column positions.
pub(crate) struct LineIndex {
    line_starts: Vec<usize>,
}

impl LineIndex {
    pub(crate) fn new(text: &str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(text.match_indices('\n').map(|(i, _)| i + 1));
        Self { line_starts }
    }

    pub(crate) fn span(&self, text: &str, start: usize, end: usize) -> Span {
        let line = match self.line_starts.binary_search(&start) {
            Ok(i) => i,
            Err(i) => i - 1,
        };
        let line_start = self.line_starts[line];
        let column = text
            .get(line_start..start)
            .map(|s| s.chars().count())
            .unwrap_or(0)
            + 1;
        Span {
            start,
            end,
            line: line + 1,
            column,
        }
    }
}

/// Tokenize `text` into tokens with their spans.
pub fn tokenize(text: &str) -> Result<Vec<(Token, Span)>, ParseError> {
    let index = LineIndex::new(text);
    let mut out = Vec::new();
    let mut lexer = Token::lexer(text);
    while let Some(result) = lexer.next() {
        let range = lexer.span();
        let span = index.span(text, range.start, range.end);
        match result {
            Ok(token) => out.push((token, span)),
            Err(()) => {
                return Err(ParseError::new(
                    ParseErrorKind::InvalidToken,
                    format!("invalid token '{}'", lexer.slice()),
                    span,
                ))
            }
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<Token> {
        tokenize(text).unwrap().into_iter().map(|(t, _)| t).collect()
    }

    #[test]
    fn keywords_beat_identifiers() {
        assert_eq!(
            kinds("FORALL X IN Items"),
            vec![
                Token::ForAll,
                Token::Ident("X".into()),
                Token::In,
                Token::Ident("Items".into())
            ]
        );
        assert_eq!(kinds("INSIDE"), vec![Token::Ident("INSIDE".into())]);
    }

    #[test]
    fn literals() {
        assert_eq!(
            kinds("42 4.5 'abc' True false"),
            vec![
                Token::Integer(42),
                Token::Double(4.5),
                Token::Str("abc".into()),
                Token::True,
                Token::False
            ]
        );
    }

    #[test]
    fn assignment_and_comparisons() {
        assert_eq!(
            kinds("v <- v <= 1"),
            vec![
                Token::Ident("v".into()),
                Token::Assign,
                Token::Ident("v".into()),
                Token::Le,
                Token::Integer(1)
            ]
        );
        assert_eq!(kinds("a=>b"), vec![Token::Ident("a".into()), Token::Arrow, Token::Ident("b".into())]);
    }

    #[test]
    fn comments_and_whitespace_skipped() {
        assert_eq!(kinds("1 // trailing\n+ 2"), vec![Token::Integer(1), Token::Plus, Token::Integer(2)]);
    }

    #[test]
    fn invalid_token_has_position() {
        let err = tokenize("a +\n  $").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::InvalidToken);
        assert_eq!((err.span.line, err.span.column), (2, 3));
    }

    #[test]
    fn integer_overflow_is_an_error() {
        assert!(tokenize("99999999999999999999999").is_err());
        let err = tokenize("1.0e999").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::InvalidToken);
        assert!(tokenize("1.0e308").is_ok());
    }
}
