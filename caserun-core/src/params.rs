use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use caserun_value::Value;
use rand::seq::SliceRandom as _;

use crate::template::{self, FunctionRegistry, VarMap, eval_value};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("parameters entry `{name}`: {reason}")]
    InvalidParameterFormat { name: String, reason: String },

    #[error(transparent)]
    Template(#[from] template::Error),
}

fn format_error(name: &str, reason: impl Into<String>) -> Error {
    Error::InvalidParameterFormat {
        name: name.to_string(),
        reason: reason.into(),
    }
}

/// How rows of one dimension feed iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, strum::EnumString, strum::Display)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Strategy {
    /// Joins the cartesian product (first-declared dimension outermost).
    #[default]
    Sequential,
    /// One uniform draw per `next()` call, outside the product.
    Random,
    /// Shuffled permutation consumed without replacement; reshuffled once
    /// exhausted.
    Unique,
}

#[derive(Debug, Clone, Default)]
pub struct ParametersSetting {
    pub strategy: Strategy,
    /// Per-dimension overrides keyed by the declared dimension name.
    pub strategies: HashMap<String, Strategy>,
    /// 0 derives the limit from the product size; negative disables it
    /// for continuous load-test iteration.
    pub limit: i64,
}

#[derive(Debug, Clone, Default)]
pub struct ParametersConfig {
    /// Declared order matters: it fixes product nesting and checkpoint-
    /// independent reproducibility of sequential iteration.
    pub parameters: Vec<(String, Value)>,
    pub setting: ParametersSetting,
}

/// One named dimension after loading: a hyphenated name is already
/// decomposed, so every row is a ready-to-merge variable mapping.
#[derive(Debug, Clone)]
pub struct Dimension {
    pub name: String,
    pub strategy: Strategy,
    pub rows: Vec<VarMap>,
}

/// Resolve and validate the configured dimensions. Expressions are
/// resolved against `vars` and must produce a list; rows must match the
/// (possibly hyphen-joined) dimension name. Fails before any run starts.
pub fn load_parameters(
    config: &ParametersConfig,
    vars: &VarMap,
    funcs: &FunctionRegistry,
) -> Result<Vec<Dimension>> {
    let mut dimensions = Vec::with_capacity(config.parameters.len());
    for (name, raw) in &config.parameters {
        let resolved = eval_value(raw, vars, funcs)?;
        let Value::Array(rows) = resolved else {
            return Err(format_error(name, "must resolve to a list"));
        };

        let fields: Vec<Arc<str>> = name.split('-').map(Arc::<str>::from).collect();
        let mut out_rows = Vec::with_capacity(rows.len());
        for row in &rows {
            out_rows.push(decompose_row(name, &fields, row)?);
        }

        let strategy = config
            .setting
            .strategies
            .get(name)
            .copied()
            .unwrap_or(config.setting.strategy);

        dimensions.push(Dimension {
            name: name.clone(),
            strategy,
            rows: out_rows,
        });
    }
    Ok(dimensions)
}

/// Match one row against the dimension's sub-fields: positionally for
/// list rows, by name for map rows, directly for scalars.
fn decompose_row(name: &str, fields: &[Arc<str>], row: &Value) -> Result<VarMap> {
    let mut out = VarMap::with_capacity(fields.len());
    match row {
        Value::Array(items) => {
            if items.len() != fields.len() {
                return Err(format_error(
                    name,
                    format!("row has {} values but the name declares {} fields", items.len(), fields.len()),
                ));
            }
            for (field, item) in fields.iter().zip(items) {
                out.insert(field.clone(), item.clone());
            }
        }
        Value::Object(map) => {
            for field in fields {
                let Some(item) = map.get(field) else {
                    return Err(format_error(name, format!("row is missing field `{field}`")));
                };
                out.insert(field.clone(), item.clone());
            }
        }
        scalar => {
            if fields.len() != 1 {
                return Err(format_error(
                    name,
                    format!("scalar row cannot fill {} fields", fields.len()),
                ));
            }
            out.insert(fields[0].clone(), scalar.clone());
        }
    }
    Ok(out)
}

#[derive(Debug)]
struct UniqueDraw {
    rows: Vec<VarMap>,
    order: Vec<usize>,
    pos: usize,
}

#[derive(Debug)]
struct State {
    product: Vec<VarMap>,
    random: Vec<Dimension>,
    unique: Vec<UniqueDraw>,
    cursor: u64,
    limit: Option<u64>,
    exhausted: bool,
}

/// Hands out one override-variable map per data-driven iteration. Safe to
/// share across virtual users: a single lock serializes `next()` calls and
/// each call advances the cursor exactly once.
#[derive(Debug)]
pub struct ParametersIterator {
    state: Mutex<State>,
}

impl ParametersIterator {
    #[must_use]
    pub fn new(dimensions: Vec<Dimension>, limit: i64) -> Self {
        let mut product: Vec<VarMap> = vec![VarMap::default()];
        let mut random = Vec::new();
        let mut unique = Vec::new();

        for dim in dimensions {
            match dim.strategy {
                Strategy::Sequential => {
                    let mut next = Vec::with_capacity(product.len() * dim.rows.len());
                    for base in &product {
                        for row in &dim.rows {
                            let mut merged = base.clone();
                            merged.extend(row.iter().map(|(k, v)| (k.clone(), v.clone())));
                            next.push(merged);
                        }
                    }
                    product = next;
                }
                Strategy::Random => random.push(dim),
                Strategy::Unique => {
                    let mut order: Vec<usize> = (0..dim.rows.len()).collect();
                    order.shuffle(&mut rand::thread_rng());
                    unique.push(UniqueDraw {
                        rows: dim.rows,
                        order,
                        pos: 0,
                    });
                }
            }
        }

        let limit = match limit {
            0 => Some(product.len() as u64),
            n if n < 0 => None,
            n => Some(n as u64),
        };

        Self {
            state: Mutex::new(State {
                product,
                random,
                unique,
                cursor: 0,
                limit,
                exhausted: false,
            }),
        }
    }

    /// Iteration cap; `None` in unlimited mode.
    #[must_use]
    pub fn limit(&self) -> Option<u64> {
        let st = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        st.limit
    }

    /// Pure query; calling it never advances the cursor.
    #[must_use]
    pub fn has_next(&self) -> bool {
        let st = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        !st.exhausted && !st.product.is_empty() && st.limit.is_none_or(|l| st.cursor < l)
    }

    pub fn next(&self) -> Option<VarMap> {
        let mut st = self
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if st.exhausted || st.product.is_empty() {
            st.exhausted = true;
            return None;
        }
        if let Some(limit) = st.limit
            && st.cursor >= limit
        {
            st.exhausted = true;
            return None;
        }

        let State {
            product,
            random,
            unique,
            cursor,
            ..
        } = &mut *st;

        // In unlimited mode the cursor keeps cycling the product.
        let idx = (*cursor as usize) % product.len();
        let mut row = product[idx].clone();
        *cursor += 1;

        let mut rng = rand::thread_rng();
        for dim in random.iter() {
            if let Some(drawn) = dim.rows.choose(&mut rng) {
                row.extend(drawn.iter().map(|(k, v)| (k.clone(), v.clone())));
            }
        }
        for draw in unique.iter_mut() {
            if draw.rows.is_empty() {
                continue;
            }
            if draw.pos >= draw.order.len() {
                draw.order.shuffle(&mut rng);
                draw.pos = 0;
            }
            let drawn = &draw.rows[draw.order[draw.pos]];
            draw.pos += 1;
            row.extend(drawn.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        if let Some(limit) = st.limit
            && st.cursor >= limit
        {
            st.exhausted = true;
        }
        Some(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(values: &[Value]) -> Value {
        Value::Array(values.to_vec())
    }

    fn config(parameters: Vec<(String, Value)>, setting: ParametersSetting) -> ParametersConfig {
        ParametersConfig {
            parameters,
            setting,
        }
    }

    fn load(config: &ParametersConfig) -> Result<Vec<Dimension>> {
        load_parameters(config, &VarMap::default(), &FunctionRegistry::new())
    }

    fn drain(iter: &ParametersIterator) -> Vec<VarMap> {
        let mut out = Vec::new();
        while let Some(row) = iter.next() {
            out.push(row);
        }
        out
    }

    #[test]
    fn cartesian_product_covers_every_combination_once() {
        let cfg = config(
            vec![
                (
                    "user".to_string(),
                    list(&[Value::from("a"), Value::from("b")]),
                ),
                (
                    "n".to_string(),
                    list(&[Value::I64(1), Value::I64(2), Value::I64(3)]),
                ),
            ],
            ParametersSetting::default(),
        );
        let dims = match load(&cfg) {
            Ok(dims) => dims,
            Err(err) => panic!("unexpected error: {err}"),
        };
        let iter = ParametersIterator::new(dims, cfg.setting.limit);

        let rows = drain(&iter);
        assert_eq!(rows.len(), 6);
        assert!(!iter.has_next());

        let mut seen: Vec<String> = rows
            .iter()
            .map(|row| {
                format!(
                    "{:?}/{:?}",
                    row.get("user").and_then(Value::as_str),
                    row.get("n").and_then(Value::as_i64)
                )
            })
            .collect();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), 6, "combinations must be distinct");
    }

    #[test]
    fn first_declared_dimension_is_outermost() {
        let cfg = config(
            vec![
                (
                    "outer".to_string(),
                    list(&[Value::I64(1), Value::I64(2)]),
                ),
                (
                    "inner".to_string(),
                    list(&[Value::from("x"), Value::from("y")]),
                ),
            ],
            ParametersSetting::default(),
        );
        let dims = match load(&cfg) {
            Ok(dims) => dims,
            Err(err) => panic!("unexpected error: {err}"),
        };
        let iter = ParametersIterator::new(dims, 0);
        let rows = drain(&iter);
        let outer: Vec<Option<i64>> = rows
            .iter()
            .map(|row| row.get("outer").and_then(Value::as_i64))
            .collect();
        assert_eq!(outer, vec![Some(1), Some(1), Some(2), Some(2)]);
    }

    #[test]
    fn hyphenated_name_decomposes_list_rows_positionally() {
        let cfg = config(
            vec![(
                "username-password".to_string(),
                list(&[
                    list(&[Value::from("alice"), Value::from("s3cret")]),
                    list(&[Value::from("bob"), Value::from("hunter2")]),
                ]),
            )],
            ParametersSetting::default(),
        );
        let dims = match load(&cfg) {
            Ok(dims) => dims,
            Err(err) => panic!("unexpected error: {err}"),
        };
        assert_eq!(dims[0].rows.len(), 2);
        assert_eq!(
            dims[0].rows[0].get("username"),
            Some(&Value::from("alice"))
        );
        assert_eq!(
            dims[0].rows[1].get("password"),
            Some(&Value::from("hunter2"))
        );
    }

    #[test]
    fn hyphenated_name_matches_map_rows_by_field() {
        let mut row = VarMap::default();
        row.insert(Arc::<str>::from("username"), Value::from("carol"));
        row.insert(Arc::<str>::from("password"), Value::from("pw"));
        row.insert(Arc::<str>::from("ignored"), Value::from("extra"));

        let cfg = config(
            vec![(
                "username-password".to_string(),
                list(&[Value::Object(row)]),
            )],
            ParametersSetting::default(),
        );
        let dims = match load(&cfg) {
            Ok(dims) => dims,
            Err(err) => panic!("unexpected error: {err}"),
        };
        assert_eq!(dims[0].rows[0].len(), 2);
        assert_eq!(
            dims[0].rows[0].get("username"),
            Some(&Value::from("carol"))
        );
    }

    #[test]
    fn row_width_mismatch_fails_at_load_time() {
        let cfg = config(
            vec![(
                "username-password".to_string(),
                list(&[list(&[Value::from("only-one")])]),
            )],
            ParametersSetting::default(),
        );
        match load(&cfg) {
            Err(Error::InvalidParameterFormat { name, .. }) => {
                assert_eq!(name, "username-password");
            }
            other => panic!("expected InvalidParameterFormat, got {other:?}"),
        }
    }

    #[test]
    fn missing_map_field_fails_at_load_time() {
        let mut row = VarMap::default();
        row.insert(Arc::<str>::from("username"), Value::from("dave"));
        let cfg = config(
            vec![(
                "username-password".to_string(),
                list(&[Value::Object(row)]),
            )],
            ParametersSetting::default(),
        );
        match load(&cfg) {
            Err(Error::InvalidParameterFormat { .. }) => {}
            other => panic!("expected InvalidParameterFormat, got {other:?}"),
        }
    }

    #[test]
    fn expression_dimension_resolves_to_native_list() {
        let mut vars = VarMap::default();
        vars.insert(
            Arc::<str>::from("ids"),
            list(&[Value::I64(10), Value::I64(20)]),
        );
        let cfg = config(
            vec![("id".to_string(), Value::from("$ids"))],
            ParametersSetting::default(),
        );
        let dims = match load_parameters(&cfg, &vars, &FunctionRegistry::new()) {
            Ok(dims) => dims,
            Err(err) => panic!("unexpected error: {err}"),
        };
        assert_eq!(dims[0].rows.len(), 2);
        assert_eq!(dims[0].rows[1].get("id"), Some(&Value::I64(20)));
    }

    #[test]
    fn non_list_dimension_fails() {
        let cfg = config(
            vec![("id".to_string(), Value::I64(3))],
            ParametersSetting::default(),
        );
        match load(&cfg) {
            Err(Error::InvalidParameterFormat { .. }) => {}
            other => panic!("expected InvalidParameterFormat, got {other:?}"),
        }
    }

    #[test]
    fn random_dimensions_stay_out_of_the_product() {
        let mut setting = ParametersSetting::default();
        setting
            .strategies
            .insert("token".to_string(), Strategy::Random);
        let cfg = config(
            vec![
                (
                    "user".to_string(),
                    list(&[Value::from("a"), Value::from("b")]),
                ),
                (
                    "token".to_string(),
                    list(&[Value::I64(1), Value::I64(2), Value::I64(3)]),
                ),
            ],
            setting,
        );
        let dims = match load(&cfg) {
            Ok(dims) => dims,
            Err(err) => panic!("unexpected error: {err}"),
        };
        let iter = ParametersIterator::new(dims, cfg.setting.limit);
        let rows = drain(&iter);

        // Limit derives from the sequential product only.
        assert_eq!(rows.len(), 2);
        for row in &rows {
            let token = match row.get("token").and_then(Value::as_i64) {
                Some(v) => v,
                None => panic!("expected a drawn token"),
            };
            assert!((1..=3).contains(&token));
        }
    }

    #[test]
    fn unique_dimension_never_repeats_until_exhausted() {
        let mut setting = ParametersSetting::default();
        setting.strategy = Strategy::Unique;
        setting.limit = 6;
        let cfg = config(
            vec![(
                "seat".to_string(),
                list(&[Value::I64(1), Value::I64(2), Value::I64(3)]),
            )],
            setting,
        );
        let dims = match load(&cfg) {
            Ok(dims) => dims,
            Err(err) => panic!("unexpected error: {err}"),
        };
        let iter = ParametersIterator::new(dims, cfg.setting.limit);
        let rows = drain(&iter);
        assert_eq!(rows.len(), 6);

        for window in rows.chunks(3) {
            let mut seats: Vec<Option<i64>> = window
                .iter()
                .map(|row| row.get("seat").and_then(Value::as_i64))
                .collect();
            seats.sort();
            assert_eq!(seats, vec![Some(1), Some(2), Some(3)]);
        }
    }

    #[test]
    fn explicit_limit_caps_iteration() {
        let cfg = config(
            vec![(
                "n".to_string(),
                list(&[Value::I64(1), Value::I64(2), Value::I64(3)]),
            )],
            ParametersSetting {
                limit: 2,
                ..ParametersSetting::default()
            },
        );
        let dims = match load(&cfg) {
            Ok(dims) => dims,
            Err(err) => panic!("unexpected error: {err}"),
        };
        let iter = ParametersIterator::new(dims, 2);
        assert_eq!(drain(&iter).len(), 2);
    }

    #[test]
    fn unlimited_mode_cycles_the_product() {
        let cfg = config(
            vec![(
                "n".to_string(),
                list(&[Value::I64(1), Value::I64(2)]),
            )],
            ParametersSetting::default(),
        );
        let dims = match load(&cfg) {
            Ok(dims) => dims,
            Err(err) => panic!("unexpected error: {err}"),
        };
        let iter = ParametersIterator::new(dims, -1);
        for _ in 0..10 {
            assert!(iter.has_next());
            if iter.next().is_none() {
                panic!("unlimited iterator must keep producing rows");
            }
        }
        assert!(iter.has_next());
    }

    #[test]
    fn no_sequential_dimensions_defaults_to_one_row() {
        let mut setting = ParametersSetting::default();
        setting.strategy = Strategy::Random;
        let cfg = config(
            vec![(
                "n".to_string(),
                list(&[Value::I64(1), Value::I64(2)]),
            )],
            setting,
        );
        let dims = match load(&cfg) {
            Ok(dims) => dims,
            Err(err) => panic!("unexpected error: {err}"),
        };
        let iter = ParametersIterator::new(dims, 0);
        let rows = drain(&iter);
        assert_eq!(rows.len(), 1);
        assert!(rows[0].contains_key("n"));
    }

    #[test]
    fn has_next_is_repeatable_and_next_advances_once() {
        let cfg = config(
            vec![("n".to_string(), list(&[Value::I64(1)]))],
            ParametersSetting::default(),
        );
        let dims = match load(&cfg) {
            Ok(dims) => dims,
            Err(err) => panic!("unexpected error: {err}"),
        };
        let iter = ParametersIterator::new(dims, 0);
        for _ in 0..5 {
            assert!(iter.has_next());
        }
        assert!(iter.next().is_some());
        assert!(!iter.has_next());
        assert!(iter.next().is_none());
    }

    #[test]
    fn concurrent_callers_pull_distinct_rows() {
        let cfg = config(
            vec![(
                "n".to_string(),
                list(&[
                    Value::I64(0),
                    Value::I64(1),
                    Value::I64(2),
                    Value::I64(3),
                    Value::I64(4),
                    Value::I64(5),
                    Value::I64(6),
                    Value::I64(7),
                ]),
            )],
            ParametersSetting::default(),
        );
        let dims = match load(&cfg) {
            Ok(dims) => dims,
            Err(err) => panic!("unexpected error: {err}"),
        };
        let iter = std::sync::Arc::new(ParametersIterator::new(dims, 0));
        let collected = Mutex::new(Vec::new());

        std::thread::scope(|scope| {
            for _ in 0..4 {
                scope.spawn(|| {
                    while let Some(row) = iter.next() {
                        let mut rows = collected
                            .lock()
                            .unwrap_or_else(|poisoned| poisoned.into_inner());
                        rows.push(row.get("n").and_then(Value::as_i64));
                    }
                });
            }
        });

        let mut rows = collected
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        rows.sort();
        let expected: Vec<Option<i64>> = (0..8).map(Some).collect();
        assert_eq!(*rows, expected);
    }
}
