use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use caserun_value::Value;
use rand::Rng as _;
use rand::distributions::Alphanumeric;

/// Outcome of a template function call. Failures are wrapped into
/// `Error::CallFunction` by the evaluator.
pub type FunctionResult = std::result::Result<Value, Box<dyn std::error::Error + Send + Sync>>;

pub trait Function: Send + Sync {
    fn call(&self, args: &[Value]) -> FunctionResult;
}

impl<F> Function for F
where
    F: Fn(&[Value]) -> FunctionResult + Send + Sync,
{
    fn call(&self, args: &[Value]) -> FunctionResult {
        self(args)
    }
}

/// Function table consulted by the evaluator. Lookup order: attached
/// external function by exact name, then by normalized alias
/// (snake_case/PascalCase), then the built-in table.
#[derive(Default, Clone)]
pub struct FunctionRegistry {
    external: HashMap<String, Arc<dyn Function>>,
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.external.keys().collect();
        names.sort();
        f.debug_struct("FunctionRegistry")
            .field("external", &names)
            .finish()
    }
}

impl FunctionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach an external function. Replaces any previous function
    /// registered under the same name.
    pub fn attach(&mut self, name: impl Into<String>, func: Arc<dyn Function>) {
        self.external.insert(name.into(), func);
    }

    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn Function>> {
        if let Some(func) = self.external.get(name) {
            return Some(func.clone());
        }
        for alias in [snake_case(name), pascal_case(name)] {
            if alias != name
                && let Some(func) = self.external.get(&alias)
            {
                return Some(func.clone());
            }
        }

        let snake = snake_case(name);
        builtin(name)
            .or_else(|| builtin(&snake))
            .map(|f| Arc::new(f) as Arc<dyn Function>)
    }
}

fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for (idx, ch) in name.char_indices() {
        if ch.is_ascii_uppercase() {
            if idx > 0 {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
        } else {
            out.push(ch);
        }
    }
    out
}

fn pascal_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for word in name.split('_').filter(|w| !w.is_empty()) {
        let mut chars = word.chars();
        if let Some(first) = chars.next() {
            out.extend(first.to_uppercase());
            out.push_str(chars.as_str());
        }
    }
    out
}

type BuiltinFn = fn(&[Value]) -> FunctionResult;

fn builtin(name: &str) -> Option<BuiltinFn> {
    match name {
        "max" => Some(fn_max),
        "min" => Some(fn_min),
        "gen_random_string" => Some(fn_gen_random_string),
        "get_timestamp" => Some(fn_get_timestamp),
        "environ" => Some(fn_environ),
        _ => None,
    }
}

fn arg_error(message: impl Into<String>) -> Box<dyn std::error::Error + Send + Sync> {
    message.into().into()
}

fn numeric_args(name: &str, args: &[Value]) -> std::result::Result<Vec<f64>, Box<dyn std::error::Error + Send + Sync>> {
    if args.is_empty() {
        return Err(arg_error(format!("{name} expects at least one numeric argument")));
    }
    args.iter()
        .map(|arg| {
            arg.as_f64()
                .ok_or_else(|| arg_error(format!("{name} expects numeric arguments, got {arg:?}")))
        })
        .collect()
}

fn fn_max(args: &[Value]) -> FunctionResult {
    let nums = numeric_args("max", args)?;
    Ok(Value::F64(nums.into_iter().fold(f64::NEG_INFINITY, f64::max)))
}

fn fn_min(args: &[Value]) -> FunctionResult {
    let nums = numeric_args("min", args)?;
    Ok(Value::F64(nums.into_iter().fold(f64::INFINITY, f64::min)))
}

fn fn_gen_random_string(args: &[Value]) -> FunctionResult {
    let len = args
        .first()
        .and_then(|v| v.as_f64())
        .filter(|n| *n >= 0.0)
        .ok_or_else(|| arg_error("gen_random_string expects a non-negative length"))?;

    let out: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len as usize)
        .map(char::from)
        .collect();
    Ok(Value::from(out))
}

fn fn_get_timestamp(_args: &[Value]) -> FunctionResult {
    let since_epoch = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|err| arg_error(err.to_string()))?;
    Ok(Value::I64(since_epoch.as_millis() as i64))
}

fn fn_environ(args: &[Value]) -> FunctionResult {
    let name = args
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| arg_error("environ expects a variable name"))?;
    let value = std::env::var(name).map_err(|err| arg_error(format!("environ `{name}`: {err}")))?;
    Ok(Value::from(value))
}
