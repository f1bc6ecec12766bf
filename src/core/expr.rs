//! Check predicate engine
//!
//! Providers accept user-supplied CEL predicates ("checks") that are applied
//! to a provider-built evaluation context. The engine is a thin adapter over
//! `cel-interpreter`:
//!
//! - providers declare the variable names their contexts bind
//! - predicates are compiled once, at `setup`, and invalid configuration is
//!   fatal there
//! - evaluation is stateless: a false predicate or a runtime error becomes a
//!   failure message on the probe result, never a panic

use cel_interpreter::{Context, Program, Value};

/// A user-supplied predicate plus an optional override message.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Expression {
    pub check: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl Expression {
    pub fn new(check: impl Into<String>) -> Self {
        Self {
            check: check.into(),
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Message emitted when the predicate evaluates to false: the override
    /// when non-empty, else the predicate source.
    fn failure_message(&self) -> String {
        match &self.message {
            Some(m) if !m.is_empty() => m.clone(),
            _ => self.check.clone(),
        }
    }
}

/// Variable and function names a provider's contexts bind for its checks.
#[derive(Debug, Clone, Default)]
pub struct Declarations {
    variables: Vec<&'static str>,
}

impl Declarations {
    pub fn variables(variables: &[&'static str]) -> Self {
        Self {
            variables: variables.to_vec(),
        }
    }

    fn declares(&self, name: &str) -> bool {
        self.variables.iter().any(|v| *v == name)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CheckError {
    #[error("invalid check {check:?}: {message}")]
    Parse { check: String, message: String },
    #[error("check {check:?} references undeclared variable {variable:?}")]
    UnknownVariable { check: String, variable: String },
}

struct CompiledCheck {
    source: Expression,
    program: Program,
}

/// A provider's predicate set, compiled once during `setup`.
#[derive(Default)]
pub struct CompiledChecks {
    checks: Vec<CompiledCheck>,
}

impl std::fmt::Debug for CompiledChecks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledChecks")
            .field("len", &self.checks.len())
            .finish()
    }
}

impl CompiledChecks {
    pub fn is_empty(&self) -> bool {
        self.checks.is_empty()
    }

    /// Compile every predicate and validate its variable references against
    /// the provider's declarations. Syntax errors and undeclared variables
    /// are configuration errors.
    pub fn compile(expressions: &[Expression], decls: &Declarations) -> Result<Self, CheckError> {
        let mut checks = Vec::with_capacity(expressions.len());
        for expr in expressions {
            let program = Program::compile(&expr.check).map_err(|e| CheckError::Parse {
                check: expr.check.clone(),
                message: e.to_string(),
            })?;

            let bound = macro_bound_identifiers(&expr.check);
            let references = program.references();
            for var in references.variables() {
                let var = var.to_string();
                if !decls.declares(&var) && !bound.contains(&var) {
                    return Err(CheckError::UnknownVariable {
                        check: expr.check.clone(),
                        variable: var,
                    });
                }
            }

            checks.push(CompiledCheck {
                source: expr.clone(),
                program,
            });
        }
        Ok(Self { checks })
    }

    /// Evaluate every predicate, in declaration order, against a context the
    /// caller populates. Returns the failure messages; empty means all checks
    /// passed.
    ///
    /// A non-boolean result or a runtime error counts as a failure with an
    /// error-classified message. The context is built once and never mutated
    /// by evaluation.
    pub fn evaluate<F>(&self, install: F) -> Vec<String>
    where
        F: FnOnce(&mut Context),
    {
        if self.checks.is_empty() {
            return Vec::new();
        }

        let mut context = Context::default();
        install(&mut context);

        let mut failures = Vec::new();
        for check in &self.checks {
            match check.program.execute(&context) {
                Ok(Value::Bool(true)) => {}
                Ok(Value::Bool(false)) => failures.push(check.source.failure_message()),
                Ok(other) => failures.push(format!(
                    "check {:?} evaluated to non-boolean {}",
                    check.source.check,
                    value_type_name(&other)
                )),
                Err(e) => failures.push(format!(
                    "error evaluating check {:?}: {}",
                    check.source.check, e
                )),
            }
        }
        failures
    }
}

fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Int(_) => "int",
        Value::UInt(_) => "uint",
        Value::Float(_) => "double",
        Value::String(_) => "string",
        Value::Bytes(_) => "bytes",
        Value::Bool(_) => "bool",
        Value::List(_) => "list",
        Value::Map(_) => "map",
        Value::Null => "null",
        _ => "value",
    }
}

/// Identifiers bound by CEL comprehension macros in the source text.
///
/// `cel-interpreter` does not expand macros at parse time, so the iteration
/// variable of `items.all(i, ...)` shows up as a plain variable reference.
/// Those names are legitimately unbound at compile time and must not trip the
/// undeclared-variable validation.
fn macro_bound_identifiers(source: &str) -> Vec<String> {
    const MACROS: [&str; 5] = [".all(", ".exists(", ".exists_one(", ".map(", ".filter("];
    let mut bound = Vec::new();
    for needle in MACROS {
        let mut rest = source;
        while let Some(pos) = rest.find(needle) {
            let after = &rest[pos + needle.len()..];
            let ident: String = after
                .trim_start()
                .chars()
                .take_while(|c| c.is_alphanumeric() || *c == '_')
                .collect();
            if !ident.is_empty() {
                bound.push(ident);
            }
            rest = &rest[pos + needle.len()..];
        }
    }
    bound
}
