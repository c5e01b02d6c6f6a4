use std::sync::Arc;

use caserun_value::Value;

use super::VarMap;
use super::error::{Error, Result};
use super::functions::FunctionRegistry;

/// Resolve a raw value against `vars`, recursing through lists and maps
/// (map keys included). Strings are scanned for `$` placeholders; every
/// other scalar passes through unchanged.
pub fn eval_value(raw: &Value, vars: &VarMap, funcs: &FunctionRegistry) -> Result<Value> {
    match raw {
        Value::String(s) => eval_string(s, vars, funcs),
        Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(eval_value(item, vars, funcs)?);
            }
            Ok(Value::Array(out))
        }
        Value::Object(map) => {
            let mut out = VarMap::with_capacity(map.len());
            for (key, item) in map {
                let key = match eval_string(key, vars, funcs)? {
                    Value::String(s) => s,
                    other => Arc::<str>::from(display_string(&other).as_str()),
                };
                out.insert(key, eval_value(item, vars, funcs)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

enum Part {
    Text(String),
    Resolved(Value),
}

fn push_text(parts: &mut Vec<Part>, text: &str) {
    if text.is_empty() {
        return;
    }
    if let Some(Part::Text(tail)) = parts.last_mut() {
        tail.push_str(text);
    } else {
        parts.push(Part::Text(text.to_string()));
    }
}

/// Left-to-right placeholder scan. Notation priority: `$$` literal, then
/// `${name(args)}` call, then `${name}`/`$name` reference. Text that only
/// looks like a placeholder (e.g. `${not closed`) stays literal.
fn eval_string(raw: &str, vars: &VarMap, funcs: &FunctionRegistry) -> Result<Value> {
    let mut parts: Vec<Part> = Vec::new();
    let mut rest = raw;

    while let Some(dollar) = rest.find('$') {
        push_text(&mut parts, &rest[..dollar]);
        let after = &rest[dollar + 1..];

        if let Some(tail) = after.strip_prefix('$') {
            push_text(&mut parts, "$");
            rest = tail;
            continue;
        }

        if let Some(tail) = after.strip_prefix('{') {
            if let Some(close) = matching_close(tail) {
                let inner = &tail[..close];
                let remainder = &tail[close + 1..];
                if let Some((name, args)) = split_call(inner)? {
                    let value = call_function(name, args, vars, funcs)?;
                    parts.push(Part::Resolved(value));
                    rest = remainder;
                    continue;
                }
                if is_identifier(inner) {
                    parts.push(Part::Resolved(lookup(inner, vars, raw)?));
                    rest = remainder;
                    continue;
                }
            }
            push_text(&mut parts, "$");
            rest = after;
            continue;
        }

        let ident = leading_identifier(after);
        if ident.is_empty() {
            push_text(&mut parts, "$");
            rest = after;
            continue;
        }
        parts.push(Part::Resolved(lookup(ident, vars, raw)?));
        rest = &after[ident.len()..];
    }
    push_text(&mut parts, rest);

    // A string that is exactly one placeholder keeps its native type.
    if parts.len() == 1
        && let Part::Resolved(value) = &parts[0]
    {
        return Ok(value.clone());
    }

    let mut out = String::new();
    for part in &parts {
        match part {
            Part::Text(text) => out.push_str(text),
            Part::Resolved(value) => out.push_str(&display_string(value)),
        }
    }
    Ok(Value::from(out))
}

/// Position of the `}` closing the placeholder that `tail` starts inside,
/// skipping over nested `${...}` placeholders.
fn matching_close(tail: &str) -> Option<usize> {
    let bytes = tail.as_bytes();
    let mut depth = 0usize;
    let mut idx = 0;
    while idx < bytes.len() {
        match bytes[idx] {
            b'$' if idx + 1 < bytes.len() && bytes[idx + 1] == b'{' => {
                depth += 1;
                idx += 2;
            }
            b'}' => {
                if depth == 0 {
                    return Some(idx);
                }
                depth -= 1;
                idx += 1;
            }
            _ => idx += 1,
        }
    }
    None
}

fn lookup(name: &str, vars: &VarMap, raw: &str) -> Result<Value> {
    vars.get(name).cloned().ok_or_else(|| Error::VariableNotFound {
        name: name.to_string(),
        raw: raw.to_string(),
    })
}

/// `inner` is the text between `${` and `}`. Returns the function name and
/// the raw argument list when it has call shape.
fn split_call(inner: &str) -> Result<Option<(&str, &str)>> {
    let Some(open) = inner.find('(') else {
        return Ok(None);
    };
    if !inner.ends_with(')') {
        return Ok(None);
    }
    let name = &inner[..open];
    if !is_identifier(name) {
        return Err(Error::ParseFunction {
            raw: inner.to_string(),
            reason: "function name must start with a letter or underscore".to_string(),
        });
    }
    Ok(Some((name, &inner[open + 1..inner.len() - 1])))
}

fn call_function(
    name: &str,
    args_src: &str,
    vars: &VarMap,
    funcs: &FunctionRegistry,
) -> Result<Value> {
    let mut args = Vec::new();
    if !args_src.trim().is_empty() {
        for arg in split_args(args_src) {
            args.push(eval_argument(arg.trim(), vars, funcs)?);
        }
    }

    let func = funcs.resolve(name).ok_or_else(|| Error::FunctionNotFound {
        name: name.to_string(),
    })?;

    func.call(&args).map_err(|source| Error::CallFunction {
        name: name.to_string(),
        source,
    })
}

/// Split an argument list on top-level commas only; commas inside nested
/// parentheses or placeholders belong to the nested call.
fn split_args(args: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut start = 0;
    for (idx, b) in args.bytes().enumerate() {
        match b {
            b'(' | b'{' => depth += 1,
            b')' | b'}' => depth -= 1,
            b',' if depth == 0 => {
                out.push(&args[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    out.push(&args[start..]);
    out
}

/// Arguments that look like number literals become numbers; everything
/// else goes back through the evaluator, so nested variables and calls
/// work as arguments.
fn eval_argument(arg: &str, vars: &VarMap, funcs: &FunctionRegistry) -> Result<Value> {
    if let Some(value) = numeric_literal(arg) {
        return Ok(value);
    }
    eval_string(arg, vars, funcs)
}

fn numeric_literal(s: &str) -> Option<Value> {
    let digits = s.strip_prefix('-').unwrap_or(s);
    if digits.is_empty() || !digits.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    let mut seen_dot = false;
    for ch in digits.chars() {
        match ch {
            '0'..='9' => {}
            '.' if !seen_dot => seen_dot = true,
            _ => return None,
        }
    }
    if let Ok(v) = s.parse::<i64>() {
        return Some(Value::I64(v));
    }
    s.parse::<f64>().ok().map(Value::F64)
}

pub(super) fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub(super) fn leading_identifier(s: &str) -> &str {
    let mut end = 0;
    for (idx, ch) in s.char_indices() {
        let ok = if idx == 0 {
            ch.is_ascii_alphabetic() || ch == '_'
        } else {
            ch.is_ascii_alphanumeric() || ch == '_'
        };
        if !ok {
            break;
        }
        end = idx + ch.len_utf8();
    }
    &s[..end]
}

/// Stringify a resolved value for concatenation into a larger string.
/// Floats never use exponential notation; integral floats print without a
/// fractional part.
pub fn display_string(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(v) => v.to_string(),
        Value::I64(v) => v.to_string(),
        Value::U64(v) => v.to_string(),
        Value::F64(v) => format_f64(*v),
        Value::String(v) => v.to_string(),
        Value::Bytes(v) => String::from_utf8_lossy(v).into_owned(),
        Value::Array(items) => {
            let mut out = String::from("[");
            for (idx, item) in items.iter().enumerate() {
                if idx > 0 {
                    out.push_str(", ");
                }
                out.push_str(&display_string(item));
            }
            out.push(']');
            out
        }
        Value::Object(map) => {
            let mut keys: Vec<&Arc<str>> = map.keys().collect();
            keys.sort();
            let mut out = String::from("{");
            for (idx, key) in keys.iter().enumerate() {
                if idx > 0 {
                    out.push_str(", ");
                }
                out.push_str(key);
                out.push_str(": ");
                if let Some(item) = map.get(*key) {
                    out.push_str(&display_string(item));
                }
            }
            out.push('}');
            out
        }
    }
}

fn format_f64(v: f64) -> String {
    // Below 2^53 every integral f64 is exactly representable as i64.
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 9_007_199_254_740_992.0 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}
