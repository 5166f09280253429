//! Recursive-descent parser for EFS expressions and statements.
//!
//! Parsing is pure and scope-free: names are left unbound and are resolved
//! later by the compiler.

use efs_core::log::Span;

use crate::ast::{
    Argument, Association, BinaryOp, Designator, ExprKind, Expression, Literal, QuantifierKind,
    RemoveKind, Statement, StmtKind, UnaryOp,
};
use crate::error::ParseError;
use crate::lexer::{tokenize, Token};

type Result<T> = std::result::Result<T, ParseError>;

/// Parse a complete expression.
pub fn parse_expression(text: &str) -> Result<Expression> {
    let tokens = tokenize(text)?;
    let mut stream = TokenStream::new(&tokens, text);
    let expr = stream.expression()?;
    stream.expect_end()?;
    Ok(expr)
}

/// Parse a complete statement.
pub fn parse_statement(text: &str) -> Result<Statement> {
    let tokens = tokenize(text)?;
    let mut stream = TokenStream::new(&tokens, text);
    let stmt = stream.statement()?;
    stream.expect_end()?;
    Ok(stmt)
}

/// Token stream with lookahead and span tracking.
struct TokenStream<'t> {
    tokens: &'t [(Token, Span)],
    pos: usize,
    /// Zero-width span just past the end of the input.
    eof: Span,
}

impl<'t> TokenStream<'t> {
    fn new(tokens: &'t [(Token, Span)], text: &str) -> Self {
        let eof = match tokens.last() {
            Some((_, last)) => Span {
                start: last.end,
                end: last.end,
                line: last.line,
                column: last.column + (last.end - last.start),
            },
            None => Span {
                start: text.len(),
                end: text.len(),
                line: 1,
                column: 1,
            },
        };
        Self {
            tokens,
            pos: 0,
            eof,
        }
    }

    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn peek_nth(&self, n: usize) -> Option<&'t Token> {
        self.tokens.get(self.pos + n).map(|(t, _)| t)
    }

    fn advance(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t);
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn check(&self, expected: &Token) -> bool {
        matches!(self.peek(), Some(t) if std::mem::discriminant(t) == std::mem::discriminant(expected))
    }

    /// Consume the current token if it matches.
    fn eat(&mut self, expected: &Token) -> bool {
        if self.check(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<Span> {
        if self.check(&expected) {
            let span = self.current_span();
            self.pos += 1;
            Ok(span)
        } else {
            Err(self.error_expected(what))
        }
    }

    fn expect_end(&self) -> Result<()> {
        match self.peek() {
            None => Ok(()),
            Some(_) => Err(self.error_expected("end of input")),
        }
    }

    fn current_span(&self) -> Span {
        self.tokens
            .get(self.pos)
            .map(|(_, s)| *s)
            .unwrap_or(self.eof)
    }

    /// Span from `start` to the end of the last consumed token.
    fn span_from(&self, start: Span) -> Span {
        match self.pos.checked_sub(1).and_then(|i| self.tokens.get(i)) {
            Some((_, last)) => start.merge(last),
            None => start,
        }
    }

    fn error_expected(&self, what: &str) -> ParseError {
        ParseError::expected(what, self.peek(), self.current_span())
    }

    fn ident(&mut self, what: &str) -> Result<Designator> {
        match self.peek() {
            Some(Token::Ident(name)) => {
                let span = self.current_span();
                self.pos += 1;
                Ok(Designator::new(name.clone(), span))
            }
            _ => Err(self.error_expected(what)),
        }
    }

    // === Expressions ===

    fn expression(&mut self) -> Result<Expression> {
        match self.peek().and_then(quantifier_kind) {
            Some(kind) => self.quantifier(kind),
            None => self.or(),
        }
    }

    fn quantifier(&mut self, kind: QuantifierKind) -> Result<Expression> {
        let start = self.current_span();
        self.advance();
        let iterator = self.ident("iterator name")?;
        self.expect(Token::In, "'IN'")?;
        let collection = Box::new(self.additive()?);
        let condition = if self.eat(&Token::Bar) {
            Some(Box::new(self.expression()?))
        } else {
            None
        };
        let using = if kind.requires_using() {
            self.expect(Token::Using, "'USING'")?;
            Some(Box::new(self.expression()?))
        } else {
            None
        };
        Ok(Expression::new(
            ExprKind::Quantifier {
                kind,
                iterator,
                collection,
                condition,
                using,
            },
            self.span_from(start),
        ))
    }

    fn binary(&mut self, op: BinaryOp, left: Expression, right: Expression) -> Expression {
        let span = left.span.merge(&right.span);
        Expression::new(
            ExprKind::Binary {
                op,
                left: Box::new(left),
                right: Box::new(right),
            },
            span,
        )
    }

    fn or(&mut self) -> Result<Expression> {
        let mut left = self.and()?;
        while self.eat(&Token::Or) {
            let right = self.and()?;
            left = self.binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn and(&mut self) -> Result<Expression> {
        let mut left = self.comparison()?;
        while self.eat(&Token::And) {
            let right = self.comparison()?;
            left = self.binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn comparison(&mut self) -> Result<Expression> {
        let left = self.additive()?;
        let op = match self.peek() {
            Some(Token::EqEq) => BinaryOp::Eq,
            Some(Token::NotEq) => BinaryOp::Ne,
            Some(Token::Lt) => BinaryOp::Lt,
            Some(Token::Le) => BinaryOp::Le,
            Some(Token::Gt) => BinaryOp::Gt,
            Some(Token::Ge) => BinaryOp::Ge,
            Some(Token::In) => BinaryOp::In,
            Some(Token::Not) if self.peek_nth(1) == Some(&Token::In) => BinaryOp::NotIn,
            _ => return Ok(left),
        };
        self.advance();
        if op == BinaryOp::NotIn {
            self.advance();
        }
        let right = self.additive()?;
        Ok(self.binary(op, left, right))
    }

    fn additive(&mut self) -> Result<Expression> {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.multiplicative()?;
            left = self.binary(op, left, right);
        }
    }

    fn multiplicative(&mut self) -> Result<Expression> {
        let mut left = self.power()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Mod,
                _ => return Ok(left),
            };
            self.advance();
            let right = self.power()?;
            left = self.binary(op, left, right);
        }
    }

    fn power(&mut self) -> Result<Expression> {
        let base = self.unary()?;
        if self.eat(&Token::Caret) {
            let exponent = self.power()?;
            return Ok(self.binary(BinaryOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn unary(&mut self) -> Result<Expression> {
        let op = match self.peek() {
            Some(Token::Not) => UnaryOp::Not,
            Some(Token::Minus) => UnaryOp::Neg,
            _ => return self.postfix(),
        };
        let start = self.current_span();
        self.advance();
        let operand = self.unary()?;
        let span = start.merge(&operand.span);
        Ok(Expression::new(
            ExprKind::Unary {
                op,
                operand: Box::new(operand),
            },
            span,
        ))
    }

    fn postfix(&mut self) -> Result<Expression> {
        let start = self.current_span();
        let mut expr = self.primary()?;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.advance();
                    let member = self.ident("member name")?;
                    expr = Expression::new(
                        ExprKind::Member {
                            target: Box::new(expr),
                            member,
                        },
                        self.span_from(start),
                    );
                }
                Some(Token::LParen) => {
                    self.advance();
                    let args = self.arguments()?;
                    expr = Expression::new(
                        ExprKind::Call {
                            callee: Box::new(expr),
                            args,
                        },
                        self.span_from(start),
                    );
                }
                Some(Token::LBrace) => {
                    if expr.designator_path().is_none() {
                        return Err(ParseError::invalid_syntax(
                            "structure value must start with a type name",
                            self.current_span(),
                        ));
                    }
                    self.advance();
                    let associations = self.associations()?;
                    expr = Expression::new(
                        ExprKind::Struct {
                            ty: Box::new(expr),
                            associations,
                        },
                        self.span_from(start),
                    );
                }
                _ => return Ok(expr),
            }
        }
    }

    /// Call arguments after `(`, through the closing `)`.
    fn arguments(&mut self) -> Result<Vec<Argument>> {
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            let name = match (self.peek(), self.peek_nth(1)) {
                (Some(Token::Ident(_)), Some(Token::Arrow)) => {
                    let name = self.ident("argument name")?;
                    self.advance();
                    Some(name)
                }
                _ => None,
            };
            let value = self.expression()?;
            args.push(Argument { name, value });
            if !self.eat(&Token::Comma) {
                self.expect(Token::RParen, "',' or ')'")?;
                return Ok(args);
            }
        }
    }

    /// Structure associations after `{`, through the closing `}`.
    fn associations(&mut self) -> Result<Vec<Association>> {
        let mut associations = Vec::new();
        if self.eat(&Token::RBrace) {
            return Ok(associations);
        }
        loop {
            let element = self.ident("structure element name")?;
            self.expect(Token::Arrow, "'=>'")?;
            let value = self.expression()?;
            associations.push(Association { element, value });
            if !self.eat(&Token::Comma) {
                self.expect(Token::RBrace, "',' or '}'")?;
                return Ok(associations);
            }
        }
    }

    fn primary(&mut self) -> Result<Expression> {
        let span = self.current_span();
        let Some(token) = self.peek() else {
            return Err(self.error_expected("expression"));
        };
        let kind = match token {
            Token::True => ExprKind::Literal(Literal::Bool(true)),
            Token::False => ExprKind::Literal(Literal::Bool(false)),
            Token::Integer(i) => ExprKind::Literal(Literal::Int(*i)),
            Token::Double(d) => ExprKind::Literal(Literal::Double(*d)),
            Token::Str(s) => ExprKind::Literal(Literal::String(s.clone())),
            Token::Ident(name) => ExprKind::Name(Designator::new(name.clone(), span)),
            Token::This => ExprKind::This,
            Token::Empty => ExprKind::Empty,
            Token::LParen => {
                self.advance();
                let mut inner = self.expression()?;
                self.expect(Token::RParen, "')'")?;
                inner.span = self.span_from(span);
                return Ok(inner);
            }
            Token::LBracket => {
                self.advance();
                let mut items = Vec::new();
                if !self.eat(&Token::RBracket) {
                    loop {
                        items.push(self.expression()?);
                        if !self.eat(&Token::Comma) {
                            self.expect(Token::RBracket, "',' or ']'")?;
                            break;
                        }
                    }
                }
                return Ok(Expression::new(ExprKind::List(items), self.span_from(span)));
            }
            _ => return Err(self.error_expected("expression")),
        };
        self.advance();
        Ok(Expression::new(kind, span))
    }

    // === Statements ===

    fn statement(&mut self) -> Result<Statement> {
        let start = self.current_span();
        let kind = match self.peek() {
            Some(Token::Insert) => {
                self.advance();
                let value = self.additive()?;
                self.expect(Token::In, "'IN'")?;
                let target = self.target()?;
                StmtKind::Insert { value, target }
            }
            Some(Token::Remove) => {
                self.advance();
                let kind = match self.peek() {
                    Some(Token::First) => RemoveKind::First,
                    Some(Token::Last) => RemoveKind::Last,
                    Some(Token::All) => RemoveKind::All,
                    _ => return Err(self.error_expected("'FIRST', 'LAST' or 'ALL'")),
                };
                self.advance();
                let iterator = self.ident("iterator name")?;
                self.expect(Token::In, "'IN'")?;
                let target = self.target()?;
                let condition = self.optional_condition()?;
                StmtKind::Remove {
                    kind,
                    iterator,
                    target,
                    condition,
                }
            }
            Some(Token::Replace) => {
                self.advance();
                let iterator = self.ident("iterator name")?;
                self.expect(Token::In, "'IN'")?;
                let target = self.target()?;
                let condition = self.optional_condition()?;
                self.expect(Token::By, "'BY'")?;
                let value = self.expression()?;
                StmtKind::Replace {
                    iterator,
                    target,
                    condition,
                    value,
                }
            }
            Some(Token::Apply) => {
                self.advance();
                let iterator = self.ident("iterator name")?;
                self.expect(Token::In, "'IN'")?;
                let collection = self.additive()?;
                let condition = self.optional_condition()?;
                self.expect(Token::Do, "'DO'")?;
                let body = Box::new(self.statement()?);
                StmtKind::Apply {
                    iterator,
                    collection,
                    condition,
                    body,
                }
            }
            _ => {
                let expr = self.postfix()?;
                if self.check(&Token::Assign) {
                    if !expr.is_location() {
                        return Err(ParseError::invalid_syntax(
                            "invalid assignment target",
                            expr.span,
                        ));
                    }
                    self.advance();
                    let value = self.expression()?;
                    StmtKind::Update {
                        target: expr,
                        value,
                    }
                } else if matches!(expr.kind, ExprKind::Call { .. }) {
                    StmtKind::Call(expr)
                } else {
                    return Err(self.error_expected("'<-'"));
                }
            }
        };
        Ok(Statement::new(kind, self.span_from(start)))
    }

    fn target(&mut self) -> Result<Expression> {
        let expr = self.postfix()?;
        if expr.is_location() {
            Ok(expr)
        } else {
            Err(ParseError::invalid_syntax("expected a variable path", expr.span))
        }
    }

    fn optional_condition(&mut self) -> Result<Option<Expression>> {
        if self.eat(&Token::Bar) {
            Ok(Some(self.expression()?))
        } else {
            Ok(None)
        }
    }
}

fn quantifier_kind(token: &Token) -> Option<QuantifierKind> {
    Some(match token {
        Token::ForAll => QuantifierKind::ForAll,
        Token::ThereIs => QuantifierKind::ThereIs,
        Token::First => QuantifierKind::First,
        Token::Last => QuantifierKind::Last,
        Token::Count => QuantifierKind::Count,
        Token::Filter => QuantifierKind::Filter,
        Token::Sum => QuantifierKind::Sum,
        Token::Map => QuantifierKind::Map,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParseErrorKind;

    fn binary_parts(e: &Expression) -> (BinaryOp, &Expression, &Expression) {
        match &e.kind {
            ExprKind::Binary { op, left, right } => (*op, left, right),
            other => panic!("expected binary, got {other:?}"),
        }
    }

    #[test]
    fn multiplication_binds_tighter_than_addition() {
        let e = parse_expression("1 + 2 * 3").unwrap();
        let (op, _, right) = binary_parts(&e);
        assert_eq!(op, BinaryOp::Add);
        assert_eq!(binary_parts(right).0, BinaryOp::Mul);
    }

    #[test]
    fn subtraction_is_left_associative() {
        let e = parse_expression("a - b - c").unwrap();
        let (_, left, _) = binary_parts(&e);
        assert_eq!(binary_parts(left).0, BinaryOp::Sub);
    }

    #[test]
    fn power_is_right_associative() {
        let e = parse_expression("2 ^ 3 ^ 2").unwrap();
        let (op, _, right) = binary_parts(&e);
        assert_eq!(op, BinaryOp::Pow);
        assert_eq!(binary_parts(right).0, BinaryOp::Pow);
    }

    #[test]
    fn logical_precedence() {
        let e = parse_expression("a OR b AND NOT c").unwrap();
        let (op, _, right) = binary_parts(&e);
        assert_eq!(op, BinaryOp::Or);
        let (op, _, not) = binary_parts(right);
        assert_eq!(op, BinaryOp::And);
        assert!(matches!(not.kind, ExprKind::Unary { op: UnaryOp::Not, .. }));
    }

    #[test]
    fn not_in() {
        let e = parse_expression("x NOT IN xs").unwrap();
        assert_eq!(binary_parts(&e).0, BinaryOp::NotIn);
    }

    #[test]
    fn member_call_and_structure() {
        let e = parse_expression("N.Point { X => 1, Y => F(2, Z => 3) }").unwrap();
        let ExprKind::Struct { ty, associations } = &e.kind else {
            panic!("expected structure value");
        };
        assert_eq!(ty.designator_path().unwrap().len(), 2);
        assert_eq!(associations.len(), 2);
        let ExprKind::Call { args, .. } = &associations[1].value.kind else {
            panic!("expected call");
        };
        assert!(args[0].name.is_none());
        assert_eq!(args[1].name.as_ref().unwrap().name, "Z");
    }

    #[test]
    fn quantifier_with_using() {
        let e = parse_expression("SUM X IN items | X > 0 USING X * 2").unwrap();
        let ExprKind::Quantifier {
            kind,
            condition,
            using,
            ..
        } = &e.kind
        else {
            panic!("expected quantifier");
        };
        assert_eq!(*kind, QuantifierKind::Sum);
        assert!(condition.is_some());
        assert!(using.is_some());
    }

    #[test]
    fn sum_requires_using() {
        let err = parse_expression("SUM X IN items").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnexpectedEof);
    }

    #[test]
    fn comparisons_do_not_chain() {
        let err = parse_expression("a < b < c").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnexpectedToken);
        assert_eq!(err.span.column, 7);
    }

    #[test]
    fn structure_value_needs_type_name() {
        let err = parse_expression("(a + b) { X => 1 }").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::InvalidSyntax);
    }

    #[test]
    fn empty_input() {
        let err = parse_expression("   ").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnexpectedEof);
    }

    #[test]
    fn spans_cover_source() {
        let text = "alpha + beta";
        let e = parse_expression(text).unwrap();
        assert_eq!(&text[e.span.start..e.span.end], text);
        let (_, _, right) = binary_parts(&e);
        assert_eq!(right.span.column, 9);
    }

    #[test]
    fn update_statement() {
        let s = parse_statement("THIS.count <- THIS.count + 1").unwrap();
        assert!(matches!(s.kind, StmtKind::Update { .. }));
    }

    #[test]
    fn invalid_update_target() {
        let err = parse_statement("F(x) <- 1").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::InvalidSyntax);
    }

    #[test]
    fn collection_statements() {
        assert!(matches!(
            parse_statement("INSERT v + 1 IN xs").unwrap().kind,
            StmtKind::Insert { .. }
        ));
        assert!(matches!(
            parse_statement("REMOVE ALL X IN xs | X > 3").unwrap().kind,
            StmtKind::Remove {
                kind: RemoveKind::All,
                ..
            }
        ));
        assert!(matches!(
            parse_statement("REPLACE X IN xs | X == 0 BY 1").unwrap().kind,
            StmtKind::Replace { .. }
        ));
        let apply = parse_statement("APPLY X IN xs DO Log(X)").unwrap();
        let StmtKind::Apply { body, .. } = apply.kind else {
            panic!("expected apply");
        };
        assert!(matches!(body.kind, StmtKind::Call(_)));
    }

    #[test]
    fn bare_expression_is_not_a_statement() {
        let err = parse_statement("x + 1").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::UnexpectedToken);
    }
}
