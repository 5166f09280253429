//! Normalised text for expressions and statements.
//!
//! Output uses single spaces around binary operators and `<-`, `, `
//! separators and only the parentheses that precedence requires, so
//! `parse(unparse(e)) == e` for every parsed tree.

use std::fmt::{self, Display, Formatter};

use crate::ast::{BinaryOp, ExprKind, Expression, Literal, RemoveKind, Statement, StmtKind, UnaryOp};

const QUANTIFIER: u8 = 0;
const UNARY: u8 = 7;
const POSTFIX: u8 = 8;
const PRIMARY: u8 = 9;

fn binary_precedence(op: BinaryOp) -> u8 {
    match op {
        BinaryOp::Or => 1,
        BinaryOp::And => 2,
        BinaryOp::Eq
        | BinaryOp::Ne
        | BinaryOp::Lt
        | BinaryOp::Le
        | BinaryOp::Gt
        | BinaryOp::Ge
        | BinaryOp::In
        | BinaryOp::NotIn => 3,
        BinaryOp::Add | BinaryOp::Sub => 4,
        BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => 5,
        BinaryOp::Pow => 6,
    }
}

/// Operand level of `IN` collections and `INSERT` values.
const ADDITIVE: u8 = 4;

fn precedence(expr: &Expression) -> u8 {
    match &expr.kind {
        ExprKind::Quantifier { .. } => QUANTIFIER,
        ExprKind::Binary { op, .. } => binary_precedence(*op),
        ExprKind::Unary { .. } => UNARY,
        ExprKind::Member { .. } | ExprKind::Call { .. } | ExprKind::Struct { .. } => POSTFIX,
        _ => PRIMARY,
    }
}

fn write_expr(f: &mut Formatter<'_>, expr: &Expression, min: u8) -> fmt::Result {
    if precedence(expr) < min {
        write!(f, "(")?;
        write_bare(f, expr)?;
        write!(f, ")")
    } else {
        write_bare(f, expr)
    }
}

fn write_list<'a>(
    f: &mut Formatter<'_>,
    items: impl IntoIterator<Item = &'a Expression>,
) -> fmt::Result {
    for (i, item) in items.into_iter().enumerate() {
        if i > 0 {
            write!(f, ", ")?;
        }
        write_expr(f, item, QUANTIFIER)?;
    }
    Ok(())
}

fn write_bare(f: &mut Formatter<'_>, expr: &Expression) -> fmt::Result {
    match &expr.kind {
        ExprKind::Literal(literal) => write_literal(f, literal),
        ExprKind::Name(d) => write!(f, "{}", d.name),
        ExprKind::This => write!(f, "THIS"),
        ExprKind::Empty => write!(f, "EMPTY"),
        ExprKind::Member { target, member } => {
            write_expr(f, target, POSTFIX)?;
            write!(f, ".{}", member.name)
        }
        ExprKind::Unary { op, operand } => {
            match op {
                UnaryOp::Not => write!(f, "NOT ")?,
                UnaryOp::Neg => write!(f, "-")?,
            }
            write_expr(f, operand, UNARY)
        }
        ExprKind::Binary { op, left, right } => {
            let p = binary_precedence(*op);
            let (left_min, right_min) = match op {
                BinaryOp::Pow => (UNARY, p),
                _ if op.is_comparison() => (p + 1, p + 1),
                _ => (p, p + 1),
            };
            write_expr(f, left, left_min)?;
            write!(f, " {} ", op.symbol())?;
            write_expr(f, right, right_min)
        }
        ExprKind::Call { callee, args } => {
            write_expr(f, callee, POSTFIX)?;
            write!(f, "(")?;
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                if let Some(name) = &arg.name {
                    write!(f, "{} => ", name.name)?;
                }
                write_expr(f, &arg.value, QUANTIFIER)?;
            }
            write!(f, ")")
        }
        ExprKind::Struct { ty, associations } => {
            write_expr(f, ty, POSTFIX)?;
            if associations.is_empty() {
                return write!(f, " {{}}");
            }
            write!(f, " {{ ")?;
            for (i, assoc) in associations.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{} => ", assoc.element.name)?;
                write_expr(f, &assoc.value, QUANTIFIER)?;
            }
            write!(f, " }}")
        }
        ExprKind::List(items) => {
            write!(f, "[")?;
            write_list(f, items)?;
            write!(f, "]")
        }
        ExprKind::Quantifier {
            kind,
            iterator,
            collection,
            condition,
            using,
        } => {
            write!(f, "{} {} IN ", kind.keyword(), iterator.name)?;
            write_expr(f, collection, ADDITIVE)?;
            if let Some(condition) = condition {
                write!(f, " | ")?;
                write_expr(f, condition, QUANTIFIER)?;
            }
            if let Some(using) = using {
                write!(f, " USING ")?;
                write_expr(f, using, QUANTIFIER)?;
            }
            Ok(())
        }
    }
}

fn write_literal(f: &mut Formatter<'_>, literal: &Literal) -> fmt::Result {
    match literal {
        Literal::Bool(true) => write!(f, "True"),
        Literal::Bool(false) => write!(f, "False"),
        Literal::Int(i) => write!(f, "{i}"),
        Literal::Double(d) => write!(f, "{}", double_text(*d)),
        Literal::String(s) => write!(f, "'{s}'"),
    }
}

/// Shortest text that lexes back to `d`. Magnitudes outside the plain
/// decimal window use exponent form; the mantissa always carries a `.`.
fn double_text(d: f64) -> String {
    let magnitude = d.abs();
    if magnitude != 0.0 && !(1e-5..1e16).contains(&magnitude) {
        let text = format!("{d:e}");
        match text.split_once('e') {
            Some((mantissa, exponent)) if !mantissa.contains('.') => {
                format!("{mantissa}.0e{exponent}")
            }
            _ => text,
        }
    } else {
        let text = d.to_string();
        if text.contains('.') {
            text
        } else {
            format!("{text}.0")
        }
    }
}

impl Display for Expression {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write_expr(f, self, QUANTIFIER)
    }
}

impl Display for Statement {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.kind {
            StmtKind::Update { target, value } => {
                write_expr(f, target, QUANTIFIER)?;
                write!(f, " <- ")?;
                write_expr(f, value, QUANTIFIER)
            }
            StmtKind::Insert { value, target } => {
                write!(f, "INSERT ")?;
                write_expr(f, value, ADDITIVE)?;
                write!(f, " IN ")?;
                write_expr(f, target, POSTFIX)
            }
            StmtKind::Remove {
                kind,
                iterator,
                target,
                condition,
            } => {
                let which = match kind {
                    RemoveKind::First => "FIRST",
                    RemoveKind::Last => "LAST",
                    RemoveKind::All => "ALL",
                };
                write!(f, "REMOVE {which} {} IN ", iterator.name)?;
                write_expr(f, target, POSTFIX)?;
                write_condition(f, condition.as_ref())
            }
            StmtKind::Replace {
                iterator,
                target,
                condition,
                value,
            } => {
                write!(f, "REPLACE {} IN ", iterator.name)?;
                write_expr(f, target, POSTFIX)?;
                write_condition(f, condition.as_ref())?;
                write!(f, " BY ")?;
                write_expr(f, value, QUANTIFIER)
            }
            StmtKind::Apply {
                iterator,
                collection,
                condition,
                body,
            } => {
                write!(f, "APPLY {} IN ", iterator.name)?;
                write_expr(f, collection, ADDITIVE)?;
                write_condition(f, condition.as_ref())?;
                write!(f, " DO {body}")
            }
            StmtKind::Call(call) => write_expr(f, call, POSTFIX),
        }
    }
}

fn write_condition(f: &mut Formatter<'_>, condition: Option<&Expression>) -> fmt::Result {
    match condition {
        Some(condition) => {
            write!(f, " | ")?;
            write_expr(f, condition, QUANTIFIER)
        }
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use crate::parser::{parse_expression, parse_statement};

    fn normalise(text: &str) -> String {
        parse_expression(text).unwrap().to_string()
    }

    fn normalise_statement(text: &str) -> String {
        parse_statement(text).unwrap().to_string()
    }

    #[test]
    fn spacing_is_normalised() {
        assert_eq!(normalise("a+b*c"), "a + b * c");
        assert_eq!(normalise("F( 1,X=>2 )"), "F(1, X => 2)");
        assert_eq!(normalise("[1,2 ,3]"), "[1, 2, 3]");
        assert_eq!(normalise_statement("v<-v+1"), "v <- v + 1");
    }

    #[test]
    fn redundant_parentheses_are_dropped() {
        assert_eq!(normalise("(a) + ((b * c))"), "a + b * c");
        assert_eq!(normalise("(a + b) * c"), "(a + b) * c");
        assert_eq!(normalise("a - (b - c)"), "a - (b - c)");
        assert_eq!(normalise("(a - b) - c"), "a - b - c");
        assert_eq!(normalise("(2 ^ 3) ^ 2"), "(2 ^ 3) ^ 2");
        assert_eq!(normalise("2 ^ (3 ^ 2)"), "2 ^ 3 ^ 2");
        assert_eq!(normalise("-(a + b)"), "-(a + b)");
        assert_eq!(normalise("(a < b) == c"), "(a < b) == c");
    }

    #[test]
    fn literals() {
        assert_eq!(normalise("true AND false"), "True AND False");
        assert_eq!(normalise("2.50"), "2.5");
        assert_eq!(normalise("3.0"), "3.0");
        assert_eq!(normalise("'hi there'"), "'hi there'");
    }

    #[test]
    fn number_literals_at_their_limits_reparse() {
        assert_eq!(normalise("1.0e300"), "1.0e300");
        assert_eq!(normalise("1.5e-300"), "1.5e-300");
        assert_eq!(normalise("1.0e15"), "1000000000000000.0");
        assert_eq!(normalise("0.00001"), "0.00001");
        assert_eq!(normalise("9223372036854775807"), "9223372036854775807");
        for text in [
            "1.7976931348623157e308",
            "5.0e-324",
            "2.2250738585072014e-308",
            "123456789.123",
            "9223372036854775807",
        ] {
            let once = normalise(text);
            assert_eq!(normalise(&once), once, "{text}");
            assert_eq!(parse_expression(&once).unwrap(), parse_expression(text).unwrap());
        }
        assert!(parse_expression("1.0e999").is_err());
    }

    #[test]
    fn quantifiers_nested_in_operators_are_parenthesised() {
        assert_eq!(
            normalise("(FORALL X IN xs | X > 0) AND ok"),
            "(FORALL X IN xs | X > 0) AND ok"
        );
        assert_eq!(
            normalise("SUM X IN xs USING (COUNT Y IN ys | Y == X)"),
            "SUM X IN xs USING COUNT Y IN ys | Y == X"
        );
    }

    #[test]
    fn structures_and_statements() {
        assert_eq!(normalise("P{X=>1,Y=>2}"), "P { X => 1, Y => 2 }");
        assert_eq!(normalise("P{}"), "P {}");
        assert_eq!(normalise_statement("INSERT (a+1) IN xs"), "INSERT a + 1 IN xs");
        assert_eq!(
            normalise_statement("REPLACE X IN xs|X==0 BY 1"),
            "REPLACE X IN xs | X == 0 BY 1"
        );
        assert_eq!(
            normalise_statement("APPLY X IN xs DO REMOVE FIRST Y IN ys|Y==X"),
            "APPLY X IN xs DO REMOVE FIRST Y IN ys | Y == X"
        );
    }

    #[test]
    fn round_trip_is_stable() {
        let samples = [
            "NOT a OR b AND c",
            "-x ^ 2",
            "-(x ^ 2)",
            "a NOT IN [1, 2] OR b IN xs",
            "FIRST X IN (FILTER Y IN ys | Y > 0) | X.v == 2",
            "MAP X IN xs | X > 0 USING SUM Y IN X.items USING Y * 2",
            "N.Point { X => Min(a, b), Y => THIS.y % 3 }",
            "F(FORALL X IN xs | X)",
            "THERE_IS X IN xs | (COUNT Y IN X.ys) > 1",
        ];
        for text in samples {
            let first = parse_expression(text).unwrap();
            let printed = first.to_string();
            let second = parse_expression(&printed).unwrap();
            assert_eq!(first, second, "{text} -> {printed}");
            assert_eq!(second.to_string(), printed);
        }
    }

    #[test]
    fn statement_round_trip_is_stable() {
        let samples = [
            "THIS.total <- SUM X IN THIS.items USING X.weight",
            "REMOVE LAST X IN queue | X.done",
            "APPLY X IN FILTER_OUT(xs) | X > 1 DO Notify(Who => X)",
            "Reset()",
        ];
        for text in samples {
            let first = parse_statement(text).unwrap();
            let printed = first.to_string();
            let second = parse_statement(&printed).unwrap();
            assert_eq!(first, second, "{text} -> {printed}");
        }
    }
}
