//! Expression standard library
//!
//! A closed, enumerated set of functions. Anything not listed here fails at
//! compile time, which keeps expressions portable across engine versions.

use regex::Regex;
use serde_json::{json, Value};
use url::Url;

/// Names the evaluator treats as special forms rather than plain calls:
/// `has` observes field presence without erroring, `default` falls back when
/// its first argument cannot be resolved.
pub const SPECIAL_FORMS: &[&str] = &["has", "default"];

/// Every callable function name, special forms included.
pub const FUNCTIONS: &[&str] = &[
    "has",
    "default",
    "size",
    "contains",
    "startsWith",
    "endsWith",
    "lower",
    "upper",
    "trim",
    "split",
    "join",
    "replace",
    "matches",
    "string",
    "int",
    "float",
    "unique",
    "quantity",
    "isURL",
    "urlHost",
    "urlPath",
];

pub fn is_known(name: &str) -> bool {
    FUNCTIONS.contains(&name)
}

pub fn is_special_form(name: &str) -> bool {
    SPECIAL_FORMS.contains(&name)
}

/// Invoke a stdlib function; method receivers arrive as the first argument.
pub fn call(name: &str, args: &[Value]) -> Result<Value, String> {
    match name {
        "size" => size(args),
        "contains" => contains(args),
        "startsWith" => str_pair(name, args, |s, p| json!(s.starts_with(p))),
        "endsWith" => str_pair(name, args, |s, p| json!(s.ends_with(p))),
        "lower" => str_single(name, args, |s| json!(s.to_lowercase())),
        "upper" => str_single(name, args, |s| json!(s.to_uppercase())),
        "trim" => str_single(name, args, |s| json!(s.trim())),
        "split" => str_pair(name, args, |s, sep| {
            json!(s.split(sep).collect::<Vec<_>>())
        }),
        "join" => join(args),
        "replace" => replace(args),
        "matches" => matches_fn(args),
        "string" => to_string(args),
        "int" => to_int(args),
        "float" => to_float(args),
        "unique" => unique(args),
        "quantity" => quantity(args),
        "isURL" => str_single(name, args, |s| json!(Url::parse(s).is_ok())),
        "urlHost" => url_part(name, args, |u| json!(u.host_str().unwrap_or(""))),
        "urlPath" => url_part(name, args, |u| json!(u.path())),
        other => Err(format!("unknown function {other:?}")),
    }
}

fn arity(name: &str, args: &[Value], expected: usize) -> Result<(), String> {
    if args.len() != expected {
        return Err(format!(
            "{name}() takes {expected} argument(s), got {}",
            args.len()
        ));
    }
    Ok(())
}

fn want_str<'a>(name: &str, value: &'a Value) -> Result<&'a str, String> {
    value
        .as_str()
        .ok_or_else(|| format!("{name}() expects a string, got {value}"))
}

fn str_single(
    name: &str,
    args: &[Value],
    f: impl Fn(&str) -> Value,
) -> Result<Value, String> {
    arity(name, args, 1)?;
    Ok(f(want_str(name, &args[0])?))
}

fn str_pair(
    name: &str,
    args: &[Value],
    f: impl Fn(&str, &str) -> Value,
) -> Result<Value, String> {
    arity(name, args, 2)?;
    Ok(f(want_str(name, &args[0])?, want_str(name, &args[1])?))
}

fn url_part(name: &str, args: &[Value], f: impl Fn(&Url) -> Value) -> Result<Value, String> {
    arity(name, args, 1)?;
    let url = Url::parse(want_str(name, &args[0])?)
        .map_err(|e| format!("{name}(): invalid URL: {e}"))?;
    Ok(f(&url))
}

fn size(args: &[Value]) -> Result<Value, String> {
    arity("size", args, 1)?;
    let len = match &args[0] {
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        other => return Err(format!("size() expects string, list or map, got {other}")),
    };
    Ok(json!(len))
}

fn contains(args: &[Value]) -> Result<Value, String> {
    arity("contains", args, 2)?;
    match (&args[0], &args[1]) {
        (Value::String(haystack), Value::String(needle)) => {
            Ok(json!(haystack.contains(needle.as_str())))
        }
        (Value::Array(items), needle) => Ok(json!(items.contains(needle))),
        (other, _) => Err(format!("contains() expects a string or list, got {other}")),
    }
}

fn join(args: &[Value]) -> Result<Value, String> {
    arity("join", args, 2)?;
    let items = args[0]
        .as_array()
        .ok_or_else(|| format!("join() expects a list, got {}", args[0]))?;
    let sep = want_str("join", &args[1])?;
    let parts: Result<Vec<&str>, String> = items
        .iter()
        .map(|item| {
            item.as_str()
                .ok_or_else(|| format!("join() expects a list of strings, got {item}"))
        })
        .collect();
    Ok(json!(parts?.join(sep)))
}

fn replace(args: &[Value]) -> Result<Value, String> {
    arity("replace", args, 3)?;
    let s = want_str("replace", &args[0])?;
    let from = want_str("replace", &args[1])?;
    let to = want_str("replace", &args[2])?;
    Ok(json!(s.replace(from, to)))
}

fn matches_fn(args: &[Value]) -> Result<Value, String> {
    arity("matches", args, 2)?;
    let s = want_str("matches", &args[0])?;
    let pattern = want_str("matches", &args[1])?;
    let regex = Regex::new(pattern).map_err(|e| format!("matches(): bad pattern: {e}"))?;
    Ok(json!(regex.is_match(s)))
}

fn to_string(args: &[Value]) -> Result<Value, String> {
    arity("string", args, 1)?;
    let out = match &args[0] {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        other => other.to_string(),
    };
    Ok(json!(out))
}

fn to_int(args: &[Value]) -> Result<Value, String> {
    arity("int", args, 1)?;
    match &args[0] {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .map(Value::from)
            .ok_or_else(|| format!("int(): cannot convert {n}")),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| format!("int(): cannot parse {s:?}")),
        Value::Bool(b) => Ok(Value::from(*b as i64)),
        other => Err(format!("int(): cannot convert {other}")),
    }
}

fn to_float(args: &[Value]) -> Result<Value, String> {
    arity("float", args, 1)?;
    match &args[0] {
        Value::Number(n) => n
            .as_f64()
            .map(Value::from)
            .ok_or_else(|| format!("float(): cannot convert {n}")),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::from)
            .map_err(|_| format!("float(): cannot parse {s:?}")),
        other => Err(format!("float(): cannot convert {other}")),
    }
}

fn unique(args: &[Value]) -> Result<Value, String> {
    arity("unique", args, 1)?;
    let items = args[0]
        .as_array()
        .ok_or_else(|| format!("unique() expects a list, got {}", args[0]))?;
    let mut seen = Vec::new();
    for item in items {
        if !seen.contains(item) {
            seen.push(item.clone());
        }
    }
    Ok(Value::Array(seen))
}

/// Parse a quantity such as `500m`, `2Ki` or `1.5Gi` into a comparable number.
fn quantity(args: &[Value]) -> Result<Value, String> {
    arity("quantity", args, 1)?;
    let text = want_str("quantity", &args[0])?.trim();

    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '-' || c == '+'))
        .unwrap_or(text.len());
    let (number, suffix) = text.split_at(split);
    let base: f64 = number
        .parse()
        .map_err(|_| format!("quantity(): cannot parse {text:?}"))?;

    let scale: f64 = match suffix {
        "" => 1.0,
        "m" => 1e-3,
        "k" => 1e3,
        "M" => 1e6,
        "G" => 1e9,
        "T" => 1e12,
        "P" => 1e15,
        "E" => 1e18,
        "Ki" => 1024.0,
        "Mi" => 1024.0 * 1024.0,
        "Gi" => 1024.0 * 1024.0 * 1024.0,
        "Ti" => 1024f64.powi(4),
        "Pi" => 1024f64.powi(5),
        "Ei" => 1024f64.powi(6),
        other => return Err(format!("quantity(): unknown suffix {other:?}")),
    };

    Ok(json!(base * scale))
}
