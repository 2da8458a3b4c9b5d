//! Tree-walking evaluator.
//!
//! Logical operators short-circuit and absorb an error on one side when the
//! other side alone decides the result, so `false && <error>` is `false`
//! and `true || <error>` is `true`.

use crate::ast::{BinaryOp, Expr, UnaryOp};
use crate::context::EvaluationContext;
use crate::duration::{format_duration, parse_duration, parse_timestamp};
use crate::value::{MapKey, Value};
use errors::EvalError;
use std::cmp::Ordering;
use std::collections::BTreeMap;

type EvalResult = Result<Value, EvalError>;

fn no_overload(what: &str, args: &[&Value]) -> EvalError {
    let list = args
        .iter()
        .map(|v| v.type_name())
        .collect::<Vec<_>>()
        .join(", ");
    EvalError::new(format!("no such overload: {what}({list})"))
}

fn overflow(what: &str) -> EvalError {
    EvalError::new(format!("{what} overflow"))
}

pub(crate) struct Evaluator<'a> {
    ctx: &'a EvaluationContext,
}

impl<'a> Evaluator<'a> {
    pub(crate) fn new(ctx: &'a EvaluationContext) -> Self {
        Self { ctx }
    }

    pub(crate) fn eval(&self, expr: &Expr) -> EvalResult {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Ident(name) => self
                .ctx
                .get(name)
                .cloned()
                .ok_or_else(|| EvalError::new(format!("no such attribute: {name}"))),
            Expr::List(items) => items
                .iter()
                .map(|item| self.eval(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            Expr::Map(entries) => {
                let mut map = BTreeMap::new();
                for (k, v) in entries {
                    let key = self.eval(k)?;
                    let key = key
                        .as_map_key()
                        .ok_or_else(|| EvalError::new(format!("unsupported key type {}", key.type_name())))?;
                    if map.insert(key.clone(), self.eval(v)?).is_some() {
                        return Err(EvalError::new(format!("repeated map key {key}")));
                    }
                }
                Ok(Value::Map(map))
            }
            Expr::Unary { op, expr } => {
                let value = self.eval(expr)?;
                match (op, &value) {
                    (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                    (UnaryOp::Neg, Value::Int(i)) => {
                        i.checked_neg().map(Value::Int).ok_or_else(|| overflow("int"))
                    }
                    (UnaryOp::Neg, Value::Double(d)) => Ok(Value::Double(-d)),
                    (UnaryOp::Neg, Value::Duration(d)) => Ok(Value::Duration(-*d)),
                    (UnaryOp::Not, _) => Err(no_overload("!_", &[&value])),
                    (UnaryOp::Neg, _) => Err(no_overload("-_", &[&value])),
                }
            }
            Expr::Binary { op, lhs, rhs } => match op {
                BinaryOp::And => self.logical(lhs, rhs, false),
                BinaryOp::Or => self.logical(lhs, rhs, true),
                _ => {
                    let l = self.eval(lhs)?;
                    let r = self.eval(rhs)?;
                    binary(*op, &l, &r)
                }
            },
            Expr::Index { target, index } => {
                let target = self.eval(target)?;
                let index = self.eval(index)?;
                lookup(&target, &index)
            }
            Expr::Field { target, name } => {
                let target = self.eval(target)?;
                lookup(&target, &Value::String(name.clone()))
            }
            Expr::Call {
                function,
                target,
                args,
            } => {
                let target = target.as_ref().map(|t| self.eval(t)).transpose()?;
                let args = args
                    .iter()
                    .map(|a| self.eval(a))
                    .collect::<Result<Vec<_>, _>>()?;
                match target {
                    Some(target) => call_method(function, &target, &args),
                    None => call_function(function, &args),
                }
            }
        }
    }

    /// `&&` when `short` is false, `||` when it is true. `short` is the value
    /// that decides the result on its own.
    fn logical(&self, lhs: &Expr, rhs: &Expr, short: bool) -> EvalResult {
        let as_bool = |r: EvalResult| -> Result<bool, EvalError> {
            match r? {
                Value::Bool(b) => Ok(b),
                other => Err(no_overload(if short { "_||_" } else { "_&&_" }, &[&other])),
            }
        };

        let left = as_bool(self.eval(lhs));
        if matches!(left, Ok(b) if b == short) {
            return Ok(Value::Bool(short));
        }
        let right = as_bool(self.eval(rhs));
        match (left, right) {
            (_, Ok(b)) if b == short => Ok(Value::Bool(short)),
            (Ok(_), Ok(_)) => Ok(Value::Bool(!short)),
            (Err(e), _) | (_, Err(e)) => Err(e),
        }
    }
}

fn compare(l: &Value, r: &Value) -> Option<Ordering> {
    match (l, r) {
        (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
        (Value::Double(a), Value::Double(b)) => a.partial_cmp(b),
        (Value::Int(a), Value::Double(b)) => (*a as f64).partial_cmp(b),
        (Value::Double(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
        (Value::Duration(a), Value::Duration(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn binary(op: BinaryOp, l: &Value, r: &Value) -> EvalResult {
    let name = format!("_{op}_");
    let fail = || no_overload(&name, &[l, r]);

    match op {
        BinaryOp::Eq => Ok(Value::Bool(l.loose_eq(r))),
        BinaryOp::Ne => Ok(Value::Bool(!l.loose_eq(r))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ord = compare(l, r).ok_or_else(fail)?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ord == Ordering::Less,
                BinaryOp::Le => ord != Ordering::Greater,
                BinaryOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            }))
        }
        BinaryOp::In => match r {
            Value::List(items) => Ok(Value::Bool(items.iter().any(|item| item.loose_eq(l)))),
            Value::Map(map) => Ok(Value::Bool(
                l.as_map_key().is_some_and(|k| map.contains_key(&k)),
            )),
            _ => Err(fail()),
        },
        BinaryOp::Add => match (l, r) {
            (Value::Int(a), Value::Int(b)) => {
                a.checked_add(*b).map(Value::Int).ok_or_else(|| overflow("int"))
            }
            (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
            (Value::List(a), Value::List(b)) => {
                Ok(Value::List(a.iter().chain(b).cloned().collect()))
            }
            (Value::Timestamp(t), Value::Duration(d)) | (Value::Duration(d), Value::Timestamp(t)) => t
                .checked_add_signed(*d)
                .map(Value::Timestamp)
                .ok_or_else(|| overflow("timestamp")),
            (Value::Duration(a), Value::Duration(b)) => a
                .checked_add(b)
                .map(Value::Duration)
                .ok_or_else(|| overflow("duration")),
            _ => float_op(l, r, |a, b| a + b).ok_or_else(fail),
        },
        BinaryOp::Sub => match (l, r) {
            (Value::Int(a), Value::Int(b)) => {
                a.checked_sub(*b).map(Value::Int).ok_or_else(|| overflow("int"))
            }
            (Value::Timestamp(a), Value::Timestamp(b)) => Ok(Value::Duration(a.signed_duration_since(*b))),
            (Value::Timestamp(t), Value::Duration(d)) => t
                .checked_sub_signed(*d)
                .map(Value::Timestamp)
                .ok_or_else(|| overflow("timestamp")),
            (Value::Duration(a), Value::Duration(b)) => a
                .checked_sub(b)
                .map(Value::Duration)
                .ok_or_else(|| overflow("duration")),
            _ => float_op(l, r, |a, b| a - b).ok_or_else(fail),
        },
        BinaryOp::Mul => match (l, r) {
            (Value::Int(a), Value::Int(b)) => {
                a.checked_mul(*b).map(Value::Int).ok_or_else(|| overflow("int"))
            }
            _ => float_op(l, r, |a, b| a * b).ok_or_else(fail),
        },
        BinaryOp::Div => match (l, r) {
            (Value::Int(_), Value::Int(0)) => Err(EvalError::new("division by zero")),
            (Value::Int(a), Value::Int(b)) => {
                a.checked_div(*b).map(Value::Int).ok_or_else(|| overflow("int"))
            }
            _ => float_op(l, r, |a, b| a / b).ok_or_else(fail),
        },
        BinaryOp::Rem => match (l, r) {
            (Value::Int(_), Value::Int(0)) => Err(EvalError::new("modulus by zero")),
            (Value::Int(a), Value::Int(b)) => {
                a.checked_rem(*b).map(Value::Int).ok_or_else(|| overflow("int"))
            }
            _ => Err(fail()),
        },
        BinaryOp::And | BinaryOp::Or => Err(fail()),
    }
}

fn float_op(l: &Value, r: &Value, f: impl Fn(f64, f64) -> f64) -> Option<Value> {
    let as_f64 = |v: &Value| match v {
        Value::Int(i) => Some(*i as f64),
        Value::Double(d) => Some(*d),
        _ => None,
    };
    Some(Value::Double(f(as_f64(l)?, as_f64(r)?)))
}

fn lookup(target: &Value, index: &Value) -> EvalResult {
    match (target, index) {
        (Value::List(items), Value::Int(i)) => usize::try_from(*i)
            .ok()
            .and_then(|i| items.get(i))
            .cloned()
            .ok_or_else(|| EvalError::new(format!("index out of range: {i}"))),
        (Value::Map(map), key) => {
            let key: MapKey = key
                .as_map_key()
                .ok_or_else(|| no_overload("_[_]", &[target, index]))?;
            map.get(&key)
                .cloned()
                .ok_or_else(|| EvalError::new(format!("no such key: {key}")))
        }
        _ => Err(no_overload("_[_]", &[target, index])),
    }
}

fn size(value: &Value) -> Option<i64> {
    let len = match value {
        Value::String(s) => s.chars().count(),
        Value::List(items) => items.len(),
        Value::Map(map) => map.len(),
        _ => return None,
    };
    i64::try_from(len).ok()
}

fn call_function(name: &str, args: &[Value]) -> EvalResult {
    let refs: Vec<&Value> = args.iter().collect();
    let fail = || no_overload(name, &refs);

    match (name, args) {
        ("duration", [Value::String(s)]) => parse_duration(s).map(Value::Duration).map_err(EvalError::new),
        ("duration", [Value::Duration(d)]) => Ok(Value::Duration(*d)),
        ("timestamp", [Value::String(s)]) => {
            parse_timestamp(s).map(Value::Timestamp).map_err(EvalError::new)
        }
        ("timestamp", [Value::Timestamp(t)]) => Ok(Value::Timestamp(*t)),
        ("size", [v]) => size(v).map(Value::Int).ok_or_else(fail),
        ("int", [Value::Int(i)]) => Ok(Value::Int(*i)),
        ("int", [Value::Double(d)]) => {
            if d.is_finite() && *d >= i64::MIN as f64 && *d < i64::MAX as f64 {
                Ok(Value::Int(d.trunc() as i64))
            } else {
                Err(overflow("int"))
            }
        }
        ("int", [Value::String(s)]) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|e| EvalError::new(format!("cannot convert {s:?} to int: {e}"))),
        ("int", [Value::Timestamp(t)]) => Ok(Value::Int(t.timestamp())),
        ("double", [Value::Int(i)]) => Ok(Value::Double(*i as f64)),
        ("double", [Value::Double(d)]) => Ok(Value::Double(*d)),
        ("double", [Value::String(s)]) => s
            .trim()
            .parse::<f64>()
            .map(Value::Double)
            .map_err(|e| EvalError::new(format!("cannot convert {s:?} to double: {e}"))),
        ("string", [v]) => match v {
            Value::String(s) => Ok(Value::String(s.clone())),
            Value::Int(i) => Ok(Value::String(i.to_string())),
            Value::Double(d) => Ok(Value::String(d.to_string())),
            Value::Bool(b) => Ok(Value::String(b.to_string())),
            Value::Null => Ok(Value::String("null".to_string())),
            Value::Timestamp(t) => Ok(Value::String(t.to_rfc3339_opts(chrono::SecondsFormat::AutoSi, true))),
            Value::Duration(d) => Ok(Value::String(format_duration(*d))),
            _ => Err(fail()),
        },
        ("in_cidr", [Value::String(ip), Value::String(cidr)]) => {
            if utils::Cidr::parse(cidr).is_none() {
                return Err(EvalError::new(format!("invalid CIDR block {cidr:?}")));
            }
            Ok(Value::Bool(utils::ip_in_cidr(ip, cidr)))
        }
        _ => Err(fail()),
    }
}

fn call_method(name: &str, target: &Value, args: &[Value]) -> EvalResult {
    let mut refs: Vec<&Value> = vec![target];
    refs.extend(args.iter());
    let fail = || no_overload(name, &refs);

    match (name, target, args) {
        ("startsWith", Value::String(s), [Value::String(p)]) => Ok(Value::Bool(s.starts_with(p.as_str()))),
        ("endsWith", Value::String(s), [Value::String(p)]) => Ok(Value::Bool(s.ends_with(p.as_str()))),
        ("contains", Value::String(s), [Value::String(p)]) => Ok(Value::Bool(s.contains(p.as_str()))),
        ("matches", Value::String(s), [Value::String(p)]) => regex::Regex::new(p)
            .map(|re| Value::Bool(re.is_match(s)))
            .map_err(|e| EvalError::new(format!("invalid regular expression: {e}"))),
        ("size", v, []) => size(v).map(Value::Int).ok_or_else(fail),
        _ => Err(fail()),
    }
}
