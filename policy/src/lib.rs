//! # Role Policy Expressions
//!
//! Compiles boolean expressions over instance attributes and evaluates them
//! per login attempt.
//!
//! An expression is parsed, type-checked against the fixed variable
//! [`Schema`] and rejected unless it produces a boolean. Compiled programs are
//! immutable and can be shared between concurrent logins.
//!
//! ```text
//! client_ip == instance_public_ip && instance_created > now - duration("10m")
//! ```

pub mod ast;
pub mod context;
pub mod duration;
mod eval;
pub mod parser;
pub mod schema;
pub mod types;
pub mod value;

pub use context::EvaluationContext;
pub use schema::Schema;
pub use types::{Checker, Type};
pub use value::{MapKey, Value};

use ast::Expr;
use errors::{EvalError, PolicyError};
use eval::Evaluator;

/// A parsed and type-checked policy.
#[derive(Debug, Clone)]
pub struct CompiledPolicy {
    source: String,
    expr: Expr,
}

/// Compiles an expression against the instance schema.
///
/// # Errors
///
/// Returns [`PolicyError::InvalidExpression`] on syntax errors and
/// [`PolicyError::TypeError`] when the expression references unknown
/// variables, misuses operators or does not produce a boolean.
pub fn compile(source: &str) -> Result<CompiledPolicy, PolicyError> {
    compile_with_schema(source, Schema::instance())
}

pub fn compile_with_schema(source: &str, schema: &Schema) -> Result<CompiledPolicy, PolicyError> {
    let expr = parser::parse(source)?;
    let ty = Checker::new(schema).check(&expr)?;
    match ty {
        Type::Bool => Ok(CompiledPolicy {
            source: source.to_string(),
            expr,
        }),
        other => Err(PolicyError::TypeError {
            reason: format!("result type should be bool, got {other}"),
        }),
    }
}

impl CompiledPolicy {
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Runs the program against one set of bindings.
    ///
    /// # Errors
    ///
    /// Returns [`EvalError`] on data-dependent faults such as a missing map
    /// key, or when the result is not a boolean.
    pub fn evaluate(&self, ctx: EvaluationContext) -> Result<bool, EvalError> {
        match Evaluator::new(&ctx).eval(&self.expr)? {
            Value::Bool(b) => Ok(b),
            other => Err(EvalError::new(format!(
                "result type should be bool, got {}",
                other.type_name()
            ))),
        }
    }
}
