//! Typed expression language over dynamic objects
//!
//! Group definitions embed `${…}` expressions that reference the composite
//! instance spec and sibling resources. This module owns the language:
//! parsing, compilation against an environment of known identifiers,
//! evaluation over JSON values, and static inspection of what an expression
//! references.
//!
//! Compiled programs are immutable and cheap to share; the engine keeps an
//! LRU cache keyed by source text so each distinct expression is parsed once.

mod ast;
mod eval;
mod stdlib;
mod token;

use std::collections::BTreeSet;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::error::{Error, Issue, IssueList, Result};

pub use ast::{BinaryOp, Expr, UnaryOp};

const PROGRAM_CACHE_SIZE: NonZeroUsize = match NonZeroUsize::new(1024) {
    Some(n) => n,
    None => unreachable!(),
};

/// A compiled expression: AST plus everything inspection discovered.
#[derive(Debug)]
pub struct Program {
    source: String,
    ast: Expr,
    identifiers: BTreeSet<String>,
    functions: BTreeSet<String>,
}

impl Program {
    /// Original source text.
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Free identifiers referenced anywhere in the expression.
    pub fn identifiers(&self) -> &BTreeSet<String> {
        &self.identifiers
    }

    /// Standard library functions referenced anywhere in the expression.
    pub fn functions(&self) -> &BTreeSet<String> {
        &self.functions
    }
}

/// Compiles, caches and evaluates expressions.
pub struct ExpressionEngine {
    cache: Mutex<LruCache<String, Arc<Program>>>,
}

impl ExpressionEngine {
    pub fn new() -> Self {
        Self {
            cache: Mutex::new(LruCache::new(PROGRAM_CACHE_SIZE)),
        }
    }

    /// Parse and statically check `source` without an environment.
    ///
    /// Syntax, unknown functions and non-homogeneous list literals are
    /// reported here; identifier resolution happens in [`Self::compile`].
    pub fn parse(&self, source: &str) -> Result<Arc<Program>> {
        if let Some(program) = self.cache.lock().get(source) {
            return Ok(Arc::clone(program));
        }

        let ast = ast::parse(source).map_err(|issues| Error::ExpressionCompile {
            expression: source.to_string(),
            issues: IssueList(issues),
        })?;

        let mut issues = Vec::new();
        let mut identifiers = BTreeSet::new();
        let mut functions = BTreeSet::new();
        inspect(&ast, &mut identifiers, &mut functions, &mut issues);

        if !issues.is_empty() {
            return Err(Error::ExpressionCompile {
                expression: source.to_string(),
                issues: IssueList(issues),
            });
        }

        let program = Arc::new(Program {
            source: source.to_string(),
            ast,
            identifiers,
            functions,
        });
        self.cache
            .lock()
            .put(source.to_string(), Arc::clone(&program));
        Ok(program)
    }

    /// Compile `source` against an environment of known variable names.
    pub fn compile(&self, source: &str, env: &BTreeSet<String>) -> Result<Arc<Program>> {
        let program = self.parse(source)?;

        let unknown: Vec<&String> = program
            .identifiers
            .iter()
            .filter(|id| !env.contains(*id))
            .collect();
        if !unknown.is_empty() {
            let issues = unknown
                .into_iter()
                .map(|id| Issue {
                    message: format!("unknown identifier {id:?}"),
                    offset: 0,
                })
                .collect();
            return Err(Error::ExpressionCompile {
                expression: source.to_string(),
                issues: IssueList(issues),
            });
        }

        Ok(program)
    }

    /// Evaluate a compiled program with concrete variable bindings.
    pub fn eval(&self, program: &Program, bindings: &Map<String, Value>) -> Result<Value> {
        eval::eval(&program.ast, bindings).map_err(|err| Error::ExpressionEval {
            expression: program.source.clone(),
            message: err.message().to_string(),
            missing: matches!(err, eval::EvalError::Missing(_)),
        })
    }
}

impl Default for ExpressionEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// True when an evaluated value is a boolean.
pub fn is_bool(value: &Value) -> bool {
    value.is_boolean()
}

fn inspect(
    expr: &Expr,
    identifiers: &mut BTreeSet<String>,
    functions: &mut BTreeSet<String>,
    issues: &mut Vec<Issue>,
) {
    match expr {
        Expr::Literal(_) => {}
        Expr::List(items) => {
            check_homogeneous(items, issues);
            for item in items {
                inspect(item, identifiers, functions, issues);
            }
        }
        Expr::Map(entries) => {
            for (key, value) in entries {
                inspect(key, identifiers, functions, issues);
                inspect(value, identifiers, functions, issues);
            }
        }
        Expr::Ident(name) => {
            identifiers.insert(name.clone());
        }
        Expr::Member { object, .. } => inspect(object, identifiers, functions, issues),
        Expr::Index { object, index } => {
            inspect(object, identifiers, functions, issues);
            inspect(index, identifiers, functions, issues);
        }
        Expr::Call {
            function,
            receiver,
            args,
        } => {
            if !stdlib::is_known(function) {
                issues.push(Issue {
                    message: format!("unknown function {function:?}"),
                    offset: 0,
                });
            }
            functions.insert(function.clone());
            if let Some(receiver) = receiver {
                inspect(receiver, identifiers, functions, issues);
            }
            for arg in args {
                inspect(arg, identifiers, functions, issues);
            }
        }
        Expr::Unary { operand, .. } => inspect(operand, identifiers, functions, issues),
        Expr::Binary { lhs, rhs, .. } => {
            inspect(lhs, identifiers, functions, issues);
            inspect(rhs, identifiers, functions, issues);
        }
        Expr::Ternary {
            condition,
            then,
            otherwise,
        } => {
            inspect(condition, identifiers, functions, issues);
            inspect(then, identifiers, functions, issues);
            inspect(otherwise, identifiers, functions, issues);
        }
    }
}

/// Literal lists must hold one value type.
fn check_homogeneous(items: &[Expr], issues: &mut Vec<Issue>) {
    let mut kinds = items.iter().filter_map(|item| match item {
        Expr::Literal(value) => Some(literal_kind(value)),
        _ => None,
    });
    if let Some(first) = kinds.next() {
        if kinds.any(|kind| kind != first) {
            issues.push(Issue {
                message: "list literal mixes value types".to_string(),
                offset: 0,
            });
        }
    }
}

fn literal_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}
