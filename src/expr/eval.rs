//! Expression evaluation

use serde_json::{Map, Number, Value};

use crate::expr::ast::{BinaryOp, Expr, UnaryOp};
use crate::expr::stdlib;

/// Evaluation failure, tagged so special forms can intercept missing fields.
#[derive(Debug)]
pub enum EvalError {
    /// A referenced variable or field is absent from the bindings
    Missing(String),
    /// Any other evaluation failure
    Fault(String),
}

impl EvalError {
    pub fn message(&self) -> &str {
        match self {
            EvalError::Missing(m) | EvalError::Fault(m) => m,
        }
    }
}

fn fault(message: impl Into<String>) -> EvalError {
    EvalError::Fault(message.into())
}

/// Evaluate `expr` against `bindings`.
pub fn eval(expr: &Expr, bindings: &Map<String, Value>) -> Result<Value, EvalError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::List(items) => {
            let values: Result<Vec<Value>, EvalError> =
                items.iter().map(|item| eval(item, bindings)).collect();
            Ok(Value::Array(values?))
        }
        Expr::Map(entries) => {
            let mut map = Map::new();
            for (key, value) in entries {
                let key = match eval(key, bindings)? {
                    Value::String(s) => s,
                    other => return Err(fault(format!("map key must be a string, got {other}"))),
                };
                map.insert(key, eval(value, bindings)?);
            }
            Ok(Value::Object(map))
        }
        Expr::Ident(name) => bindings
            .get(name)
            .cloned()
            .ok_or_else(|| EvalError::Missing(format!("unknown variable {name:?}"))),
        Expr::Member { object, field } => {
            let object = eval(object, bindings)?;
            match object {
                Value::Object(map) => map
                    .get(field)
                    .cloned()
                    .ok_or_else(|| EvalError::Missing(format!("no such field {field:?}"))),
                other => Err(fault(format!(
                    "cannot access field {field:?} on {}",
                    kind_of(&other)
                ))),
            }
        }
        Expr::Index { object, index } => {
            let object = eval(object, bindings)?;
            let index = eval(index, bindings)?;
            match (&object, &index) {
                (Value::Array(items), Value::Number(n)) => {
                    let i = n
                        .as_u64()
                        .ok_or_else(|| fault(format!("invalid list index {n}")))?;
                    items.get(i as usize).cloned().ok_or_else(|| {
                        EvalError::Missing(format!("list index {i} out of bounds"))
                    })
                }
                (Value::Object(map), Value::String(key)) => map
                    .get(key)
                    .cloned()
                    .ok_or_else(|| EvalError::Missing(format!("no such key {key:?}"))),
                (other, index) => Err(fault(format!(
                    "cannot index {} with {index}",
                    kind_of(other)
                ))),
            }
        }
        Expr::Call {
            function,
            receiver,
            args,
        } => eval_call(function, receiver.as_deref(), args, bindings),
        Expr::Unary { op, operand } => {
            let value = eval(operand, bindings)?;
            match op {
                UnaryOp::Not => match value {
                    Value::Bool(b) => Ok(Value::Bool(!b)),
                    other => Err(fault(format!("'!' expects a boolean, got {other}"))),
                },
                UnaryOp::Neg => match value {
                    Value::Number(n) => {
                        if let Some(i) = n.as_i64() {
                            Ok(Value::from(-i))
                        } else if let Some(f) = n.as_f64() {
                            Ok(Value::from(-f))
                        } else {
                            Err(fault(format!("cannot negate {n}")))
                        }
                    }
                    other => Err(fault(format!("'-' expects a number, got {other}"))),
                },
            }
        }
        Expr::Binary { op, lhs, rhs } => eval_binary(*op, lhs, rhs, bindings),
        Expr::Ternary {
            condition,
            then,
            otherwise,
        } => match eval(condition, bindings)? {
            Value::Bool(true) => eval(then, bindings),
            Value::Bool(false) => eval(otherwise, bindings),
            other => Err(fault(format!(
                "conditional expects a boolean, got {other}"
            ))),
        },
    }
}

fn eval_call(
    function: &str,
    receiver: Option<&Expr>,
    args: &[Expr],
    bindings: &Map<String, Value>,
) -> Result<Value, EvalError> {
    // Special forms observe resolution failures instead of propagating them.
    match function {
        "has" => {
            if receiver.is_some() || args.len() != 1 {
                return Err(fault("has() takes exactly one field argument"));
            }
            return match eval(&args[0], bindings) {
                Ok(_) => Ok(Value::Bool(true)),
                Err(EvalError::Missing(_)) => Ok(Value::Bool(false)),
                Err(err) => Err(err),
            };
        }
        "default" => {
            let (first, fallback) = match (receiver, args) {
                (Some(receiver), [fallback]) => (receiver, fallback),
                (None, [first, fallback]) => (first, fallback),
                _ => return Err(fault("default() takes a value and a fallback")),
            };
            return match eval(first, bindings) {
                Ok(value) => Ok(value),
                Err(EvalError::Missing(_)) => eval(fallback, bindings),
                Err(err) => Err(err),
            };
        }
        _ => {}
    }

    let mut values = Vec::with_capacity(args.len() + 1);
    if let Some(receiver) = receiver {
        values.push(eval(receiver, bindings)?);
    }
    for arg in args {
        values.push(eval(arg, bindings)?);
    }
    stdlib::call(function, &values).map_err(fault)
}

fn eval_binary(
    op: BinaryOp,
    lhs: &Expr,
    rhs: &Expr,
    bindings: &Map<String, Value>,
) -> Result<Value, EvalError> {
    // Logical operators short-circuit.
    match op {
        BinaryOp::And | BinaryOp::Or => {
            let left = match eval(lhs, bindings)? {
                Value::Bool(b) => b,
                other => return Err(fault(format!("logical operand must be boolean, got {other}"))),
            };
            if (op == BinaryOp::And && !left) || (op == BinaryOp::Or && left) {
                return Ok(Value::Bool(left));
            }
            return match eval(rhs, bindings)? {
                Value::Bool(b) => Ok(Value::Bool(b)),
                other => Err(fault(format!("logical operand must be boolean, got {other}"))),
            };
        }
        _ => {}
    }

    let left = eval(lhs, bindings)?;
    let right = eval(rhs, bindings)?;

    match op {
        BinaryOp::Eq => Ok(Value::Bool(values_equal(&left, &right))),
        BinaryOp::Ne => Ok(Value::Bool(!values_equal(&left, &right))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare(&left, &right)?;
            let result = match op {
                BinaryOp::Lt => ordering.is_lt(),
                BinaryOp::Le => ordering.is_le(),
                BinaryOp::Gt => ordering.is_gt(),
                _ => ordering.is_ge(),
            };
            Ok(Value::Bool(result))
        }
        BinaryOp::In => match &right {
            Value::Array(items) => Ok(Value::Bool(items.iter().any(|i| values_equal(i, &left)))),
            Value::Object(map) => match &left {
                Value::String(key) => Ok(Value::Bool(map.contains_key(key))),
                other => Err(fault(format!("'in' on a map expects a string key, got {other}"))),
            },
            other => Err(fault(format!("'in' expects a list or map, got {other}"))),
        },
        BinaryOp::Add => add(&left, &right),
        BinaryOp::Sub => arithmetic(&left, &right, "-", |a, b| a - b, |a, b| a.checked_sub(b)),
        BinaryOp::Mul => arithmetic(&left, &right, "*", |a, b| a * b, |a, b| a.checked_mul(b)),
        BinaryOp::Div => {
            if is_zero(&right) {
                return Err(fault("division by zero"));
            }
            arithmetic(&left, &right, "/", |a, b| a / b, |a, b| a.checked_div(b))
        }
        BinaryOp::Mod => {
            if is_zero(&right) {
                return Err(fault("division by zero"));
            }
            arithmetic(&left, &right, "%", |a, b| a % b, |a, b| a.checked_rem(b))
        }
        BinaryOp::And | BinaryOp::Or => unreachable!(),
    }
}

/// Numeric equality crosses the int/float divide; everything else is deep
/// structural equality.
fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => x == y,
            _ => x == y,
        },
        _ => a == b,
    }
}

fn compare(a: &Value, b: &Value) -> Result<std::cmp::Ordering, EvalError> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => {
            let (x, y) = match (x.as_f64(), y.as_f64()) {
                (Some(x), Some(y)) => (x, y),
                _ => return Err(fault(format!("cannot compare {x} and {y}"))),
            };
            x.partial_cmp(&y)
                .ok_or_else(|| fault("cannot order NaN".to_string()))
        }
        (Value::String(x), Value::String(y)) => Ok(x.cmp(y)),
        (a, b) => Err(fault(format!(
            "cannot compare {} and {}",
            kind_of(a),
            kind_of(b)
        ))),
    }
}

fn add(left: &Value, right: &Value) -> Result<Value, EvalError> {
    match (left, right) {
        (Value::String(a), Value::String(b)) => Ok(Value::String(format!("{a}{b}"))),
        (Value::Array(a), Value::Array(b)) => {
            let mut out = a.clone();
            out.extend(b.iter().cloned());
            Ok(Value::Array(out))
        }
        _ => arithmetic(left, right, "+", |a, b| a + b, |a, b| a.checked_add(b)),
    }
}

fn arithmetic(
    left: &Value,
    right: &Value,
    op: &str,
    float_op: impl Fn(f64, f64) -> f64,
    int_op: impl Fn(i64, i64) -> Option<i64>,
) -> Result<Value, EvalError> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => {
            if let (Some(a), Some(b)) = (a.as_i64(), b.as_i64()) {
                return int_op(a, b)
                    .map(Value::from)
                    .ok_or_else(|| fault(format!("integer overflow in '{op}'")));
            }
            let (a, b) = match (a.as_f64(), b.as_f64()) {
                (Some(a), Some(b)) => (a, b),
                _ => return Err(fault(format!("cannot apply '{op}' to {a} and {b}"))),
            };
            let out = float_op(a, b);
            Number::from_f64(out)
                .map(Value::Number)
                .ok_or_else(|| fault(format!("'{op}' produced a non-finite number")))
        }
        (a, b) => Err(fault(format!(
            "cannot apply '{op}' to {} and {}",
            kind_of(a),
            kind_of(b)
        ))),
    }
}

fn is_zero(value: &Value) -> bool {
    match value {
        Value::Number(n) => n.as_f64() == Some(0.0),
        _ => false,
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "map",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::ast::parse;
    use serde_json::json;

    fn run(source: &str, bindings: Value) -> Result<Value, EvalError> {
        let expr = parse(source).unwrap();
        let bindings = match bindings {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        eval(&expr, &bindings)
    }

    #[test]
    fn test_member_access_and_equality() {
        let bindings = json!({ "vpc": { "status": { "state": "available" } } });
        assert_eq!(
            run("vpc.status.state == 'available'", bindings).unwrap(),
            json!(true)
        );
    }

    #[test]
    fn test_missing_field_is_an_error() {
        let bindings = json!({ "vpc": { "status": {} } });
        let err = run("vpc.status.state", bindings).unwrap_err();
        assert!(matches!(err, EvalError::Missing(_)));
    }

    #[test]
    fn test_has_observes_missing_fields() {
        let bindings = json!({ "vpc": { "status": {} } });
        assert_eq!(
            run("has(vpc.status.state)", bindings.clone()).unwrap(),
            json!(false)
        );
        assert_eq!(run("has(vpc.status)", bindings).unwrap(), json!(true));
    }

    #[test]
    fn test_default_falls_back() {
        let bindings = json!({ "spec": {} });
        assert_eq!(
            run("default(spec.region, 'us-east-1')", bindings).unwrap(),
            json!("us-east-1")
        );
    }

    #[test]
    fn test_arithmetic_and_precedence() {
        assert_eq!(run("1 + 2 * 3", json!({})).unwrap(), json!(7));
        assert_eq!(run("10 / 4", json!({})).unwrap(), json!(2));
        assert_eq!(run("10.0 / 4", json!({})).unwrap(), json!(2.5));
        assert!(run("1 / 0", json!({})).is_err());
    }

    #[test]
    fn test_string_concat() {
        let bindings = json!({ "spec": { "name": "net" } });
        assert_eq!(
            run("spec.name + '-vpc'", bindings).unwrap(),
            json!("net-vpc")
        );
    }

    #[test]
    fn test_numeric_equality_crosses_int_float() {
        assert_eq!(run("1 == 1.0", json!({})).unwrap(), json!(true));
    }

    #[test]
    fn test_logical_short_circuit() {
        // The right operand would error if evaluated.
        let bindings = json!({ "spec": {} });
        assert_eq!(
            run("false && spec.missing == 1", bindings.clone()).unwrap(),
            json!(false)
        );
        assert_eq!(
            run("true || spec.missing == 1", bindings).unwrap(),
            json!(true)
        );
    }

    #[test]
    fn test_in_operator() {
        assert_eq!(run("2 in [1, 2, 3]", json!({})).unwrap(), json!(true));
        assert_eq!(
            run("'a' in {'a': 1}", json!({})).unwrap(),
            json!(true)
        );
    }

    #[test]
    fn test_index() {
        let bindings = json!({ "spec": { "zones": ["a", "b"] } });
        assert_eq!(run("spec.zones[1]", bindings.clone()).unwrap(), json!("b"));
        assert!(run("spec.zones[5]", bindings).is_err());
    }

    #[test]
    fn test_ternary() {
        let bindings = json!({ "spec": { "enabled": true } });
        assert_eq!(
            run("spec.enabled ? 'on' : 'off'", bindings).unwrap(),
            json!("on")
        );
    }

    #[test]
    fn test_method_calls() {
        let bindings = json!({ "spec": { "name": "net-main" } });
        assert_eq!(
            run("spec.name.startsWith('net-')", bindings.clone()).unwrap(),
            json!(true)
        );
        assert_eq!(run("size(spec.name)", bindings).unwrap(), json!(8));
    }

    #[test]
    fn test_quantity_comparison() {
        assert_eq!(
            run("quantity('2Gi') > quantity('500Mi')", json!({})).unwrap(),
            json!(true)
        );
    }
}
