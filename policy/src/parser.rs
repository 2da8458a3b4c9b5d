//! Parser for policy expressions using pest

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::value::Value;
use errors::PolicyError;
use pest::Parser;
use pest::iterators::{Pair, Pairs};
use pest::pratt_parser::{Assoc, Op, PrattParser};
use pest_derive::Parser;
use std::sync::LazyLock;

#[derive(Parser)]
#[grammar = "policy.pest"]
struct PolicyGrammar;

static PRATT: LazyLock<PrattParser<Rule>> = LazyLock::new(|| {
    PrattParser::new()
        .op(Op::infix(Rule::or, Assoc::Left))
        .op(Op::infix(Rule::and, Assoc::Left))
        .op(Op::infix(Rule::eq, Assoc::Left)
            | Op::infix(Rule::ne, Assoc::Left)
            | Op::infix(Rule::lt, Assoc::Left)
            | Op::infix(Rule::le, Assoc::Left)
            | Op::infix(Rule::gt, Assoc::Left)
            | Op::infix(Rule::ge, Assoc::Left)
            | Op::infix(Rule::in_op, Assoc::Left))
        .op(Op::infix(Rule::add, Assoc::Left) | Op::infix(Rule::sub, Assoc::Left))
        .op(Op::infix(Rule::mul, Assoc::Left)
            | Op::infix(Rule::div, Assoc::Left)
            | Op::infix(Rule::rem, Assoc::Left))
        .op(Op::prefix(Rule::not) | Op::prefix(Rule::neg))
        .op(Op::postfix(Rule::index) | Op::postfix(Rule::method) | Op::postfix(Rule::field))
});

fn error_at(pair: &Pair<Rule>, message: impl Into<String>) -> PolicyError {
    let (line, column) = pair.line_col();
    PolicyError::InvalidExpression {
        line,
        column,
        message: message.into(),
    }
}

/// Parse an expression into its syntax tree.
pub fn parse(input: &str) -> Result<Expr, PolicyError> {
    let mut pairs = PolicyGrammar::parse(Rule::policy, input).map_err(|e| {
        let (line, column) = match e.line_col {
            pest::error::LineColLocation::Pos((line, col)) => (line, col),
            pest::error::LineColLocation::Span((line, col), _) => (line, col),
        };
        PolicyError::InvalidExpression {
            line,
            column,
            message: e.variant.message().to_string(),
        }
    })?;

    let policy = pairs.next().ok_or_else(|| PolicyError::InvalidExpression {
        line: 1,
        column: 1,
        message: "empty expression".to_string(),
    })?;

    match policy.into_inner().find(|p| p.as_rule() == Rule::expr) {
        Some(expr) => parse_expr(expr.into_inner()),
        None => Err(PolicyError::InvalidExpression {
            line: 1,
            column: 1,
            message: "empty expression".to_string(),
        }),
    }
}

fn parse_expr(pairs: Pairs<Rule>) -> Result<Expr, PolicyError> {
    PRATT
        .map_primary(parse_primary)
        .map_prefix(|op, rhs| {
            let op = match op.as_rule() {
                Rule::not => UnaryOp::Not,
                Rule::neg => UnaryOp::Neg,
                _ => return Err(error_at(&op, "unexpected prefix operator")),
            };
            Ok(Expr::Unary {
                op,
                expr: Box::new(rhs?),
            })
        })
        .map_postfix(|lhs, op| {
            let target = Box::new(lhs?);
            match op.as_rule() {
                Rule::index => {
                    let inner = single_inner(&op)?;
                    Ok(Expr::Index {
                        target,
                        index: Box::new(parse_expr(inner.into_inner())?),
                    })
                }
                Rule::field => Ok(Expr::Field {
                    target,
                    name: single_inner(&op)?.as_str().to_string(),
                }),
                Rule::method => {
                    let mut inner = op.clone().into_inner();
                    let name = inner
                        .next()
                        .ok_or_else(|| error_at(&op, "missing method name"))?;
                    let args = match inner.next() {
                        Some(args) => parse_args(args)?,
                        None => Vec::new(),
                    };
                    Ok(Expr::Call {
                        function: name.as_str().to_string(),
                        target: Some(target),
                        args,
                    })
                }
                _ => Err(error_at(&op, "unexpected postfix operator")),
            }
        })
        .map_infix(|lhs, op, rhs| {
            let op = match op.as_rule() {
                Rule::or => BinaryOp::Or,
                Rule::and => BinaryOp::And,
                Rule::eq => BinaryOp::Eq,
                Rule::ne => BinaryOp::Ne,
                Rule::lt => BinaryOp::Lt,
                Rule::le => BinaryOp::Le,
                Rule::gt => BinaryOp::Gt,
                Rule::ge => BinaryOp::Ge,
                Rule::in_op => BinaryOp::In,
                Rule::add => BinaryOp::Add,
                Rule::sub => BinaryOp::Sub,
                Rule::mul => BinaryOp::Mul,
                Rule::div => BinaryOp::Div,
                Rule::rem => BinaryOp::Rem,
                _ => return Err(error_at(&op, "unexpected operator")),
            };
            Ok(Expr::Binary {
                op,
                lhs: Box::new(lhs?),
                rhs: Box::new(rhs?),
            })
        })
        .parse(pairs)
}

fn single_inner<'a>(pair: &Pair<'a, Rule>) -> Result<Pair<'a, Rule>, PolicyError> {
    pair.clone()
        .into_inner()
        .next()
        .ok_or_else(|| error_at(pair, "malformed expression"))
}

fn parse_args(pair: Pair<Rule>) -> Result<Vec<Expr>, PolicyError> {
    pair.into_inner()
        .map(|arg| parse_expr(arg.into_inner()))
        .collect()
}

fn parse_primary(pair: Pair<Rule>) -> Result<Expr, PolicyError> {
    match pair.as_rule() {
        Rule::expr => parse_expr(pair.into_inner()),
        Rule::int => pair
            .as_str()
            .parse::<i64>()
            .map(|i| Expr::Literal(Value::Int(i)))
            .map_err(|e| error_at(&pair, format!("invalid integer: {e}"))),
        Rule::double => pair
            .as_str()
            .parse::<f64>()
            .map(|d| Expr::Literal(Value::Double(d)))
            .map_err(|e| error_at(&pair, format!("invalid number: {e}"))),
        Rule::string => {
            let raw = single_inner(&pair)?;
            unescape(raw.as_str())
                .map(|s| Expr::Literal(Value::String(s)))
                .map_err(|e| error_at(&pair, e))
        }
        Rule::boolean => Ok(Expr::Literal(Value::Bool(pair.as_str() == "true"))),
        Rule::null => Ok(Expr::Literal(Value::Null)),
        Rule::ident => Ok(Expr::Ident(pair.as_str().to_string())),
        Rule::call => {
            let mut inner = pair.clone().into_inner();
            let name = inner
                .next()
                .ok_or_else(|| error_at(&pair, "missing function name"))?;
            let args = match inner.next() {
                Some(args) => parse_args(args)?,
                None => Vec::new(),
            };
            Ok(Expr::Call {
                function: name.as_str().to_string(),
                target: None,
                args,
            })
        }
        Rule::list => pair
            .into_inner()
            .map(|item| parse_expr(item.into_inner()))
            .collect::<Result<Vec<_>, _>>()
            .map(Expr::List),
        Rule::map => {
            let mut entries = Vec::new();
            for entry in pair.into_inner() {
                let mut kv = entry.clone().into_inner();
                let (Some(k), Some(v)) = (kv.next(), kv.next()) else {
                    return Err(error_at(&entry, "malformed map entry"));
                };
                entries.push((parse_expr(k.into_inner())?, parse_expr(v.into_inner())?));
            }
            Ok(Expr::Map(entries))
        }
        _ => Err(error_at(&pair, format!("unexpected token {:?}", pair.as_str()))),
    }
}

fn unescape(raw: &str) -> Result<String, String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some('\'') => out.push('\''),
            Some(other) => return Err(format!("invalid escape sequence \\{other}")),
            None => return Err("unterminated escape sequence".to_string()),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ident(name: &str) -> Box<Expr> {
        Box::new(Expr::Ident(name.to_string()))
    }

    #[test]
    fn test_precedence_and_binds_tighter_than_or() {
        let expr = parse("a || b && c").unwrap();
        assert_eq!(
            expr,
            Expr::Binary {
                op: BinaryOp::Or,
                lhs: ident("a"),
                rhs: Box::new(Expr::Binary {
                    op: BinaryOp::And,
                    lhs: ident("b"),
                    rhs: ident("c"),
                }),
            }
        );
    }

    #[test]
    fn test_arithmetic_binds_tighter_than_comparison() {
        let expr = parse("now - duration(\"10m\") < instance_created").unwrap();
        let Expr::Binary { op, lhs, .. } = expr else {
            panic!("expected binary expression");
        };
        assert_eq!(op, BinaryOp::Lt);
        assert!(matches!(*lhs, Expr::Binary { op: BinaryOp::Sub, .. }));
    }

    #[test]
    fn test_method_call_and_index() {
        let expr = parse("instance_labels[\"env\"].startsWith('prod')").unwrap();
        let Expr::Call {
            function,
            target: Some(target),
            args,
        } = expr
        else {
            panic!("expected method call");
        };
        assert_eq!(function, "startsWith");
        assert_eq!(args, vec![Expr::Literal(Value::String("prod".to_string()))]);
        assert!(matches!(*target, Expr::Index { .. }));
    }

    #[test]
    fn test_in_operator_and_identifier_prefix() {
        let expr = parse("instance_id in [\"a\", \"b\"]").unwrap();
        let Expr::Binary { op, lhs, rhs } = expr else {
            panic!("expected binary expression");
        };
        assert_eq!(op, BinaryOp::In);
        assert_eq!(*lhs, Expr::Ident("instance_id".to_string()));
        assert!(matches!(*rhs, Expr::List(ref items) if items.len() == 2));
    }

    #[test]
    fn test_literals() {
        assert_eq!(parse("42").unwrap(), Expr::Literal(Value::Int(42)));
        assert_eq!(parse("1.5").unwrap(), Expr::Literal(Value::Double(1.5)));
        assert_eq!(parse("null").unwrap(), Expr::Literal(Value::Null));
        assert_eq!(
            parse(r#""a\"b\n""#).unwrap(),
            Expr::Literal(Value::String("a\"b\n".to_string()))
        );
        assert!(matches!(parse("{\"k\": 1}").unwrap(), Expr::Map(ref e) if e.len() == 1));
        assert!(matches!(
            parse("!-x").unwrap(),
            Expr::Unary { op: UnaryOp::Not, .. }
        ));
    }

    #[test]
    fn test_syntax_errors_carry_position() {
        let err = parse("client_ip ==").unwrap_err();
        assert!(matches!(err, PolicyError::InvalidExpression { line: 1, .. }));

        let err = parse("a &&\n  (b").unwrap_err();
        assert!(matches!(err, PolicyError::InvalidExpression { line: 2, .. }));

        assert!(parse("").is_err());
        assert!(parse("'unterminated").is_err());
        assert!(parse(r#""bad \q escape""#).is_err());
    }
}
