//! Static type checking of parsed expressions.
//!
//! The checker infers the type of every node against the variable
//! [`Schema`] and rejects expressions whose result is not boolean, so a
//! stored policy can only fail at evaluation time on data-dependent faults
//! (missing map key, index out of range, overflow).

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::duration::{parse_duration, parse_timestamp};
use crate::schema::Schema;
use crate::value::Value;
use errors::PolicyError;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    Null,
    Bool,
    Int,
    Double,
    String,
    Timestamp,
    Duration,
    List(Box<Type>),
    Map(Box<Type>, Box<Type>),
    /// Unknown until evaluation, e.g. elements of a heterogeneous list.
    Dyn,
}

impl Type {
    pub fn list(elem: Type) -> Self {
        Self::List(Box::new(elem))
    }

    pub fn map(key: Type, value: Type) -> Self {
        Self::Map(Box::new(key), Box::new(value))
    }

    fn is_dyn(&self) -> bool {
        matches!(self, Self::Dyn)
    }

    fn is_numeric(&self) -> bool {
        matches!(self, Self::Int | Self::Double)
    }

    /// Whether values of the two types may compare equal.
    fn comparable(&self, other: &Type) -> bool {
        match (self, other) {
            (Self::Dyn, _) | (_, Self::Dyn) | (Self::Null, _) | (_, Self::Null) => true,
            (a, b) if a.is_numeric() && b.is_numeric() => true,
            (Self::List(a), Self::List(b)) => a.comparable(b),
            (Self::Map(ka, va), Self::Map(kb, vb)) => ka.comparable(kb) && va.comparable(vb),
            (a, b) => a == b,
        }
    }

    fn orderable(&self) -> bool {
        matches!(
            self,
            Self::Int | Self::Double | Self::String | Self::Timestamp | Self::Duration | Self::Bool
        )
    }

    fn join(a: Type, b: &Type) -> Type {
        if a == *b { a } else { Type::Dyn }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool => f.write_str("bool"),
            Self::Int => f.write_str("int"),
            Self::Double => f.write_str("double"),
            Self::String => f.write_str("string"),
            Self::Timestamp => f.write_str("timestamp"),
            Self::Duration => f.write_str("duration"),
            Self::List(elem) => write!(f, "list({elem})"),
            Self::Map(k, v) => write!(f, "map({k}, {v})"),
            Self::Dyn => f.write_str("dyn"),
        }
    }
}

fn type_error(reason: impl Into<String>) -> PolicyError {
    PolicyError::TypeError {
        reason: reason.into(),
    }
}

fn no_overload(what: &str, args: &[&Type]) -> PolicyError {
    let list = args
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");
    type_error(format!("found no matching overload for '{what}' applied to ({list})"))
}

pub struct Checker<'a> {
    schema: &'a Schema,
}

impl<'a> Checker<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Self { schema }
    }

    pub fn check(&self, expr: &Expr) -> Result<Type, PolicyError> {
        match expr {
            Expr::Literal(value) => Ok(value.type_of()),
            Expr::Ident(name) => self
                .schema
                .lookup(name)
                .cloned()
                .ok_or_else(|| type_error(format!("undeclared reference to '{name}'"))),
            Expr::List(items) => {
                let mut elem: Option<Type> = None;
                for item in items {
                    let t = self.check(item)?;
                    elem = Some(match elem {
                        None => t,
                        Some(prev) => Type::join(prev, &t),
                    });
                }
                Ok(Type::list(elem.unwrap_or(Type::Dyn)))
            }
            Expr::Map(entries) => {
                let mut key: Option<Type> = None;
                let mut value: Option<Type> = None;
                for (k, v) in entries {
                    let kt = self.check(k)?;
                    if !matches!(kt, Type::String | Type::Int | Type::Bool | Type::Dyn) {
                        return Err(type_error(format!("unsupported map key type {kt}")));
                    }
                    let vt = self.check(v)?;
                    key = Some(match key {
                        None => kt,
                        Some(prev) => Type::join(prev, &kt),
                    });
                    value = Some(match value {
                        None => vt,
                        Some(prev) => Type::join(prev, &vt),
                    });
                }
                Ok(Type::map(
                    key.unwrap_or(Type::Dyn),
                    value.unwrap_or(Type::Dyn),
                ))
            }
            Expr::Unary { op, expr } => {
                let t = self.check(expr)?;
                match (op, &t) {
                    (UnaryOp::Not, Type::Bool | Type::Dyn) => Ok(Type::Bool),
                    (UnaryOp::Neg, Type::Int | Type::Double | Type::Duration | Type::Dyn) => Ok(t.clone()),
                    (UnaryOp::Not, _) => Err(no_overload("!_", &[&t])),
                    (UnaryOp::Neg, _) => Err(no_overload("-_", &[&t])),
                }
            }
            Expr::Binary { op, lhs, rhs } => {
                let l = self.check(lhs)?;
                let r = self.check(rhs)?;
                self.check_binary(*op, &l, &r)
            }
            Expr::Index { target, index } => {
                let t = self.check(target)?;
                let i = self.check(index)?;
                match (&t, &i) {
                    (Type::List(elem), Type::Int | Type::Dyn) => Ok((**elem).clone()),
                    (Type::Map(k, v), _) if k.comparable(&i) => Ok((**v).clone()),
                    (Type::Dyn, _) => Ok(Type::Dyn),
                    _ => Err(no_overload("_[_]", &[&t, &i])),
                }
            }
            Expr::Field { target, name } => {
                let t = self.check(target)?;
                match &t {
                    Type::Map(k, v) if matches!(**k, Type::String | Type::Dyn) => Ok((**v).clone()),
                    Type::Dyn => Ok(Type::Dyn),
                    _ => Err(type_error(format!("type {t} does not support field selection '{name}'"))),
                }
            }
            Expr::Call {
                function,
                target,
                args,
            } => {
                let arg_types = args
                    .iter()
                    .map(|a| self.check(a))
                    .collect::<Result<Vec<_>, _>>()?;
                match target {
                    Some(target) => {
                        let t = self.check(target)?;
                        check_method(function, &t, &arg_types, args)
                    }
                    None => check_function(function, &arg_types, args),
                }
            }
        }
    }

    fn check_binary(&self, op: BinaryOp, l: &Type, r: &Type) -> Result<Type, PolicyError> {
        use BinaryOp::*;

        let name = format!("_{op}_");
        let fail = || no_overload(&name, &[l, r]);

        match op {
            And | Or => match (l, r) {
                (Type::Bool | Type::Dyn, Type::Bool | Type::Dyn) => Ok(Type::Bool),
                _ => Err(fail()),
            },
            Eq | Ne => {
                if l.comparable(r) {
                    Ok(Type::Bool)
                } else {
                    Err(fail())
                }
            }
            Lt | Le | Gt | Ge => {
                let ok = l.is_dyn()
                    || r.is_dyn()
                    || (l.is_numeric() && r.is_numeric())
                    || (l == r && l.orderable());
                if ok { Ok(Type::Bool) } else { Err(fail()) }
            }
            In => match r {
                Type::List(elem) if l.comparable(elem) => Ok(Type::Bool),
                Type::Map(key, _) if l.comparable(key) => Ok(Type::Bool),
                Type::Dyn => Ok(Type::Bool),
                _ => Err(fail()),
            },
            Add => match (l, r) {
                (Type::Dyn, _) | (_, Type::Dyn) => Ok(Type::Dyn),
                (Type::Int, Type::Int) => Ok(Type::Int),
                (a, b) if a.is_numeric() && b.is_numeric() => Ok(Type::Double),
                (Type::String, Type::String) => Ok(Type::String),
                (Type::List(a), Type::List(b)) => Ok(Type::list(Type::join((**a).clone(), b))),
                (Type::Timestamp, Type::Duration) | (Type::Duration, Type::Timestamp) => {
                    Ok(Type::Timestamp)
                }
                (Type::Duration, Type::Duration) => Ok(Type::Duration),
                _ => Err(fail()),
            },
            Sub => match (l, r) {
                (Type::Dyn, _) | (_, Type::Dyn) => Ok(Type::Dyn),
                (Type::Int, Type::Int) => Ok(Type::Int),
                (a, b) if a.is_numeric() && b.is_numeric() => Ok(Type::Double),
                (Type::Timestamp, Type::Timestamp) => Ok(Type::Duration),
                (Type::Timestamp, Type::Duration) => Ok(Type::Timestamp),
                (Type::Duration, Type::Duration) => Ok(Type::Duration),
                _ => Err(fail()),
            },
            Mul | Div => match (l, r) {
                (Type::Dyn, _) | (_, Type::Dyn) => Ok(Type::Dyn),
                (Type::Int, Type::Int) => Ok(Type::Int),
                (a, b) if a.is_numeric() && b.is_numeric() => Ok(Type::Double),
                _ => Err(fail()),
            },
            Rem => match (l, r) {
                (Type::Int | Type::Dyn, Type::Int | Type::Dyn) => Ok(Type::Int),
                _ => Err(fail()),
            },
        }
    }
}

fn string_literal(expr: &Expr) -> Option<&str> {
    match expr {
        Expr::Literal(Value::String(s)) => Some(s),
        _ => None,
    }
}

fn check_function(name: &str, args: &[Type], exprs: &[Expr]) -> Result<Type, PolicyError> {
    let refs: Vec<&Type> = args.iter().collect();
    let fail = || no_overload(name, &refs);

    match (name, args) {
        ("duration", [Type::String | Type::Dyn]) => {
            if let Some(s) = string_literal(&exprs[0]) {
                parse_duration(s).map_err(type_error)?;
            }
            Ok(Type::Duration)
        }
        ("timestamp", [Type::String | Type::Dyn]) => {
            if let Some(s) = string_literal(&exprs[0]) {
                parse_timestamp(s).map_err(type_error)?;
            }
            Ok(Type::Timestamp)
        }
        ("size", [Type::String | Type::List(_) | Type::Map(..) | Type::Dyn]) => Ok(Type::Int),
        ("int", [Type::Int | Type::Double | Type::String | Type::Timestamp | Type::Dyn]) => {
            Ok(Type::Int)
        }
        ("double", [Type::Int | Type::Double | Type::String | Type::Dyn]) => Ok(Type::Double),
        ("string", [t]) if !matches!(t, Type::List(_) | Type::Map(..)) => Ok(Type::String),
        ("in_cidr", [Type::String | Type::Dyn, Type::String | Type::Dyn]) => {
            if let Some(cidr) = string_literal(&exprs[1]) {
                if utils::Cidr::parse(cidr).is_none() {
                    return Err(type_error(format!("invalid CIDR block {cidr:?}")));
                }
            }
            Ok(Type::Bool)
        }
        ("duration" | "timestamp" | "size" | "int" | "double" | "string" | "in_cidr", _) => {
            Err(fail())
        }
        _ => Err(type_error(format!("undeclared reference to function '{name}'"))),
    }
}

fn check_method(
    name: &str,
    target: &Type,
    args: &[Type],
    exprs: &[Expr],
) -> Result<Type, PolicyError> {
    let mut refs: Vec<&Type> = vec![target];
    refs.extend(args.iter());
    let fail = || no_overload(name, &refs);

    match (name, target, args) {
        ("startsWith" | "endsWith" | "contains", Type::String | Type::Dyn, [Type::String | Type::Dyn]) => {
            Ok(Type::Bool)
        }
        ("matches", Type::String | Type::Dyn, [Type::String | Type::Dyn]) => {
            if let Some(pattern) = string_literal(&exprs[0]) {
                regex::Regex::new(pattern)
                    .map_err(|e| type_error(format!("invalid regular expression: {e}")))?;
            }
            Ok(Type::Bool)
        }
        ("size", Type::String | Type::List(_) | Type::Map(..) | Type::Dyn, []) => Ok(Type::Int),
        ("startsWith" | "endsWith" | "contains" | "matches" | "size", _, _) => Err(fail()),
        _ => Err(type_error(format!("undeclared reference to method '{name}'"))),
    }
}
