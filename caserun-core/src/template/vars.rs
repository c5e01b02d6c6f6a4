use std::sync::Arc;

use ahash::AHashSet;
use caserun_value::Value;

use super::VarMap;
use super::error::{Error, Result};
use super::eval::{eval_value, is_identifier, leading_identifier};
use super::functions::FunctionRegistry;

/// Resolve an entire name→expression mapping to fully resolved values.
///
/// Each pass resolves every entry whose references are already resolved
/// (or that references nothing); entries referencing themselves, or names
/// absent from the mapping, fail immediately. A mapping that cannot make
/// progress within `len` passes is circular.
pub fn resolve_variables(variables: &VarMap, funcs: &FunctionRegistry) -> Result<VarMap> {
    let mut resolved = VarMap::with_capacity(variables.len());
    let mut passes = 0usize;

    while resolved.len() < variables.len() {
        passes += 1;
        if passes > variables.len() {
            return Err(Error::CircularReference);
        }

        for (name, raw) in variables {
            if resolved.contains_key(name) {
                continue;
            }

            let mut refs = AHashSet::new();
            referenced_names(raw, &mut refs);

            if refs.contains(name) {
                return Err(Error::SelfReference {
                    name: name.to_string(),
                });
            }

            let mut missing: Vec<String> = refs
                .iter()
                .filter(|r| !variables.contains_key(*r))
                .map(|r| r.to_string())
                .collect();
            if !missing.is_empty() {
                missing.sort();
                return Err(Error::UndefinedVariable { names: missing });
            }

            if refs.iter().all(|r| resolved.contains_key(r)) {
                let value = eval_value(raw, &resolved, funcs)?;
                resolved.insert(name.clone(), value);
            }
        }
    }

    Ok(resolved)
}

/// Collect every variable name a raw value refers to, recursing through
/// lists, maps (keys included) and function-call arguments.
fn referenced_names(value: &Value, out: &mut AHashSet<Arc<str>>) {
    match value {
        Value::String(s) => names_in_str(s, out),
        Value::Array(items) => {
            for item in items {
                referenced_names(item, out);
            }
        }
        Value::Object(map) => {
            for (key, item) in map {
                names_in_str(key, out);
                referenced_names(item, out);
            }
        }
        _ => {}
    }
}

fn names_in_str(raw: &str, out: &mut AHashSet<Arc<str>>) {
    let mut rest = raw;
    while let Some(dollar) = rest.find('$') {
        let after = &rest[dollar + 1..];

        if let Some(tail) = after.strip_prefix('$') {
            rest = tail;
            continue;
        }

        if let Some(tail) = after.strip_prefix('{') {
            if let Some(close) = tail.find('}') {
                let inner = &tail[..close];
                if let Some(open) = inner.find('(') {
                    if inner.ends_with(')') && is_identifier(&inner[..open]) {
                        names_in_str(&inner[open + 1..inner.len() - 1], out);
                        rest = &tail[close + 1..];
                        continue;
                    }
                } else if is_identifier(inner) {
                    out.insert(Arc::<str>::from(inner));
                    rest = &tail[close + 1..];
                    continue;
                }
            }
            rest = after;
            continue;
        }

        let ident = leading_identifier(after);
        if ident.is_empty() {
            rest = after;
            continue;
        }
        out.insert(Arc::<str>::from(ident));
        rest = &after[ident.len()..];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_vars(entries: &[(&str, &str)]) -> VarMap {
        entries
            .iter()
            .map(|(k, v)| (Arc::<str>::from(*k), Value::from(*v)))
            .collect()
    }

    fn resolve(entries: &[(&str, &str)]) -> Result<VarMap> {
        resolve_variables(&raw_vars(entries), &FunctionRegistry::new())
    }

    #[test]
    fn resolves_chained_references() {
        let out = match resolve(&[("a", "1"), ("b", "$a-2"), ("c", "${b}-3")]) {
            Ok(out) => out,
            Err(err) => panic!("unexpected error: {err}"),
        };
        assert_eq!(out.get("a"), Some(&Value::from("1")));
        assert_eq!(out.get("b"), Some(&Value::from("1-2")));
        assert_eq!(out.get("c"), Some(&Value::from("1-2-3")));
    }

    #[test]
    fn resolving_twice_is_idempotent() {
        let vars = raw_vars(&[("base", "10"), ("derived", "$base/x"), ("plain", "text")]);
        let funcs = FunctionRegistry::new();
        let first = match resolve_variables(&vars, &funcs) {
            Ok(out) => out,
            Err(err) => panic!("unexpected error: {err}"),
        };
        let second = match resolve_variables(&vars, &funcs) {
            Ok(out) => out,
            Err(err) => panic!("unexpected error: {err}"),
        };
        assert_eq!(first, second);
    }

    #[test]
    fn self_reference_fails() {
        match resolve(&[("x", "$x")]) {
            Err(Error::SelfReference { name }) => assert_eq!(name, "x"),
            other => panic!("expected SelfReference, got {other:?}"),
        }
    }

    #[test]
    fn self_reference_inside_function_arguments_fails() {
        match resolve(&[("x", "${max($x, 1)}")]) {
            Err(Error::SelfReference { name }) => assert_eq!(name, "x"),
            other => panic!("expected SelfReference, got {other:?}"),
        }
    }

    #[test]
    fn circular_reference_fails() {
        match resolve(&[("a", "$b"), ("b", "$a")]) {
            Err(Error::CircularReference) => {}
            other => panic!("expected CircularReference, got {other:?}"),
        }
    }

    #[test]
    fn undefined_references_report_all_missing_names() {
        match resolve(&[("a", "$nope and $missing")]) {
            Err(Error::UndefinedVariable { names }) => {
                assert_eq!(names, vec!["missing".to_string(), "nope".to_string()]);
            }
            other => panic!("expected UndefinedVariable, got {other:?}"),
        }
    }

    #[test]
    fn escaped_dollars_are_not_references() {
        let out = match resolve(&[("price", "3$$")]) {
            Ok(out) => out,
            Err(err) => panic!("unexpected error: {err}"),
        };
        assert_eq!(out.get("price"), Some(&Value::from("3$")));
    }

    #[test]
    fn nested_collections_are_scanned() {
        let mut vars = raw_vars(&[("id", "7")]);
        vars.insert(
            Arc::<str>::from("payload"),
            Value::Array(vec![Value::from("$id"), Value::from("$id-suffix")]),
        );
        let out = match resolve_variables(&vars, &FunctionRegistry::new()) {
            Ok(out) => out,
            Err(err) => panic!("unexpected error: {err}"),
        };
        match out.get("payload") {
            Some(Value::Array(items)) => {
                assert_eq!(items[0], Value::from("7"));
                assert_eq!(items[1], Value::from("7-suffix"));
            }
            other => panic!("expected array, got {other:?}"),
        }
    }
}
