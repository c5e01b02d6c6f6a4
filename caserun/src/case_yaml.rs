use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use anyhow::bail;
use serde::Deserialize;

use caserun_core::case::{CaseConfig, DebugStep, RendezvousSpec, Step, StepKind, TestCase};
use caserun_core::params::{ParametersConfig, ParametersSetting, Strategy};
use caserun_core::runner::{CaseOptions, Stage};
use caserun_core::{Value, VarMap};

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct CaseYaml {
    #[serde(default)]
    pub config: ConfigYaml,

    #[serde(default)]
    pub steps: Vec<StepYaml>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ConfigYaml {
    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub variables: serde_yaml::Mapping,

    /// Dimension name -> list or expression string. Document order fixes
    /// the cartesian nesting order.
    #[serde(default)]
    pub parameters: Option<serde_yaml::Mapping>,

    #[serde(default)]
    pub parameters_setting: Option<ParametersSettingYaml>,

    #[serde(default)]
    pub fail_fast: bool,

    // Executor options; CLI flags override these.
    #[serde(default)]
    pub executor: Option<String>,

    #[serde(default)]
    pub vus: Option<u64>,

    #[serde(default)]
    pub iterations: Option<u64>,

    #[serde(default)]
    pub duration: Option<YamlDuration>,

    #[serde(rename = "startVUs", default)]
    pub start_vus: Option<u64>,

    #[serde(default)]
    pub stages: Vec<StageYaml>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ParametersSettingYaml {
    #[serde(default)]
    pub strategy: Option<String>,

    #[serde(default)]
    pub strategies: BTreeMap<String, String>,

    /// 0 = derive from the product size, negative = unlimited.
    #[serde(default)]
    pub limit: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StageYaml {
    pub target: u64,

    #[serde(default)]
    pub duration: YamlDuration,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StepYaml {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub variables: serde_yaml::Mapping,

    /// Pause the virtual user (e.g. `500ms`).
    #[serde(default)]
    pub think: Option<YamlDuration>,

    #[serde(default)]
    pub rendezvous: Option<RendezvousYaml>,

    /// Log a resolved payload; stands in for transport steps.
    #[serde(default)]
    pub debug: Option<serde_yaml::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct RendezvousYaml {
    pub name: String,

    #[serde(default)]
    pub number: Option<i64>,

    #[serde(default)]
    pub percent: Option<f64>,

    /// Milliseconds.
    #[serde(default)]
    pub timeout: Option<i64>,
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct YamlDuration(Duration);

impl YamlDuration {
    pub(crate) fn into_inner(self) -> Duration {
        self.0
    }
}

impl<'de> Deserialize<'de> for YamlDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = YamlDuration;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("duration as string (e.g. 10s), integer seconds, or float seconds")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(YamlDuration(Duration::from_secs(v)))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if v < 0 {
                    return Err(E::custom("duration cannot be negative"));
                }
                Ok(YamlDuration(Duration::from_secs(v as u64)))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if !v.is_finite() || v < 0.0 {
                    return Err(E::custom("duration must be a non-negative number"));
                }
                Ok(YamlDuration(Duration::from_secs_f64(v)))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                humantime::parse_duration(v.trim())
                    .map(YamlDuration)
                    .map_err(E::custom)
            }
        }

        deserializer.deserialize_any(V)
    }
}

/// Convert a parsed document into the core case model plus its embedded
/// executor options.
pub(crate) fn into_test_case(doc: CaseYaml) -> anyhow::Result<(TestCase, CaseOptions)> {
    let config = doc.config;

    let variables = mapping_to_varmap(&config.variables).context("config.variables")?;
    let parameters = match &config.parameters {
        Some(mapping) => Some(build_parameters(
            mapping,
            config.parameters_setting.as_ref(),
        )?),
        None => None,
    };

    let mut steps = Vec::with_capacity(doc.steps.len());
    for (idx, step) in doc.steps.into_iter().enumerate() {
        steps.push(build_step(idx, step)?);
    }

    let options = CaseOptions {
        executor: config.executor,
        vus: config.vus,
        iterations: config.iterations,
        duration: config.duration.map(YamlDuration::into_inner),
        start_vus: config.start_vus,
        stages: config
            .stages
            .iter()
            .map(|s| Stage {
                duration: s.duration.into_inner(),
                target: s.target,
            })
            .collect(),
    };

    let case = TestCase {
        config: CaseConfig {
            name: config.name,
            variables,
            parameters,
            fail_fast: config.fail_fast,
        },
        steps,
    };

    Ok((case, options))
}

fn build_step(idx: usize, step: StepYaml) -> anyhow::Result<Step> {
    let variables = mapping_to_varmap(&step.variables)
        .with_context(|| format!("step #{}: variables", idx + 1))?;

    let kinds = usize::from(step.think.is_some())
        + usize::from(step.rendezvous.is_some())
        + usize::from(step.debug.is_some());
    if kinds != 1 {
        bail!(
            "step #{}: exactly one of `think`, `rendezvous`, `debug` is required",
            idx + 1
        );
    }

    let (default_name, kind) = if let Some(pause) = step.think {
        ("think".to_string(), StepKind::Think(pause.into_inner()))
    } else if let Some(rendezvous) = step.rendezvous {
        (
            rendezvous.name.clone(),
            StepKind::Rendezvous(RendezvousSpec {
                name: rendezvous.name,
                number: rendezvous.number,
                percent: rendezvous.percent,
                timeout_ms: rendezvous.timeout,
            }),
        )
    } else if let Some(message) = step.debug {
        let message = yaml_to_value(&message).with_context(|| format!("step #{}: debug", idx + 1))?;
        (
            "debug".to_string(),
            StepKind::Action(Arc::new(DebugStep { message })),
        )
    } else {
        // Unreachable after the kinds check.
        bail!("step #{}: empty step", idx + 1);
    };

    Ok(Step {
        name: step.name.unwrap_or(default_name),
        variables,
        kind,
    })
}

fn build_parameters(
    mapping: &serde_yaml::Mapping,
    setting: Option<&ParametersSettingYaml>,
) -> anyhow::Result<ParametersConfig> {
    let mut parameters = Vec::with_capacity(mapping.len());
    for (key, value) in mapping {
        let Some(name) = key.as_str() else {
            bail!("parameters: dimension names must be strings");
        };
        parameters.push((name.to_string(), yaml_to_value(value)?));
    }

    let mut out = ParametersSetting::default();
    if let Some(setting) = setting {
        if let Some(strategy) = &setting.strategy {
            out.strategy = parse_strategy(strategy)?;
        }
        for (name, strategy) in &setting.strategies {
            out.strategies
                .insert(name.clone(), parse_strategy(strategy)?);
        }
        out.limit = setting.limit;
    }

    Ok(ParametersConfig {
        parameters,
        setting: out,
    })
}

fn parse_strategy(raw: &str) -> anyhow::Result<Strategy> {
    raw.parse::<Strategy>().map_err(|_| {
        anyhow::anyhow!("invalid strategy `{raw}` (expected sequential, random, or unique)")
    })
}

fn mapping_to_varmap(mapping: &serde_yaml::Mapping) -> anyhow::Result<VarMap> {
    let mut out = VarMap::with_capacity(mapping.len());
    for (key, value) in mapping {
        let Some(name) = key.as_str() else {
            bail!("variable names must be strings");
        };
        out.insert(Arc::<str>::from(name), yaml_to_value(value)?);
    }
    Ok(out)
}

fn yaml_to_value(value: &serde_yaml::Value) -> anyhow::Result<Value> {
    Ok(match value {
        serde_yaml::Value::Null => Value::Null,
        serde_yaml::Value::Bool(v) => Value::Bool(*v),
        serde_yaml::Value::Number(n) => {
            if let Some(v) = n.as_i64() {
                Value::I64(v)
            } else if let Some(v) = n.as_u64() {
                Value::U64(v)
            } else if let Some(v) = n.as_f64() {
                Value::F64(v)
            } else {
                bail!("unsupported number: {n:?}")
            }
        }
        serde_yaml::Value::String(v) => Value::from(v.as_str()),
        serde_yaml::Value::Sequence(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(yaml_to_value(item)?);
            }
            Value::Array(out)
        }
        serde_yaml::Value::Mapping(mapping) => {
            let mut out = caserun_core::ObjectMap::with_capacity(mapping.len());
            for (key, item) in mapping {
                let Some(name) = key.as_str() else {
                    bail!("object keys must be strings");
                };
                out.insert(Arc::<str>::from(name), yaml_to_value(item)?);
            }
            Value::Object(out)
        }
        serde_yaml::Value::Tagged(tagged) => yaml_to_value(&tagged.value)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
config:
  name: checkout rush
  variables:
    base: https://shop.example.com
    endpoint: $base/checkout
  parameters:
    username-password:
      - [alice, s3cret]
      - [bob, hunter2]
    region: "${regions}"
  parametersSetting:
    strategy: sequential
    strategies:
      region: random
    limit: 0
  failFast: true
  vus: 10
  duration: 30s
steps:
  - name: warm up
    think: 250ms
  - rendezvous:
      name: checkout
      percent: 0.5
      timeout: 3000
  - name: report
    debug:
      url: $endpoint
    variables:
      attempt: 1
"#;

    fn parse(doc: &str) -> anyhow::Result<(TestCase, CaseOptions)> {
        let doc: CaseYaml = serde_yaml::from_str(doc)?;
        into_test_case(doc)
    }

    #[test]
    fn parses_a_full_document() {
        let (case, options) = match parse(SAMPLE) {
            Ok(v) => v,
            Err(err) => panic!("unexpected error: {err:#}"),
        };

        assert_eq!(case.config.name, "checkout rush");
        assert!(case.config.fail_fast);
        assert_eq!(
            case.config.variables.get("endpoint"),
            Some(&Value::from("$base/checkout"))
        );

        let params = match &case.config.parameters {
            Some(params) => params,
            None => panic!("expected parameters"),
        };
        assert_eq!(params.parameters.len(), 2);
        assert_eq!(params.parameters[0].0, "username-password");
        assert_eq!(
            params.setting.strategies.get("region"),
            Some(&Strategy::Random)
        );

        assert_eq!(case.steps.len(), 3);
        assert_eq!(case.steps[0].name, "warm up");
        assert!(matches!(case.steps[0].kind, StepKind::Think(d) if d == Duration::from_millis(250)));
        match &case.steps[1].kind {
            StepKind::Rendezvous(spec) => {
                assert_eq!(spec.name, "checkout");
                assert_eq!(spec.percent, Some(0.5));
                assert_eq!(spec.timeout_ms, Some(3000));
            }
            other => panic!("expected rendezvous step, got {other:?}"),
        }
        assert_eq!(case.steps[1].name, "checkout");
        assert_eq!(
            case.steps[2].variables.get("attempt"),
            Some(&Value::I64(1))
        );

        assert_eq!(options.vus, Some(10));
        assert_eq!(options.duration, Some(Duration::from_secs(30)));
    }

    #[test]
    fn step_with_no_kind_is_rejected() {
        let doc = r#"
steps:
  - name: empty
"#;
        match parse(doc) {
            Err(err) => assert!(err.to_string().contains("exactly one of")),
            Ok(_) => panic!("expected error"),
        }
    }

    #[test]
    fn step_with_two_kinds_is_rejected() {
        let doc = r#"
steps:
  - think: 1s
    rendezvous:
      name: x
"#;
        match parse(doc) {
            Err(err) => assert!(err.to_string().contains("exactly one of")),
            Ok(_) => panic!("expected error"),
        }
    }

    #[test]
    fn invalid_strategy_is_rejected() {
        let doc = r#"
config:
  parameters:
    n: [1, 2]
  parametersSetting:
    strategy: shuffled
"#;
        match parse(doc) {
            Err(err) => assert!(err.to_string().contains("invalid strategy")),
            Ok(_) => panic!("expected error"),
        }
    }

    #[test]
    fn durations_accept_integers_and_strings() {
        let doc = r#"
config:
  duration: 15
steps:
  - think: 500ms
"#;
        let (case, options) = match parse(doc) {
            Ok(v) => v,
            Err(err) => panic!("unexpected error: {err:#}"),
        };
        assert_eq!(options.duration, Some(Duration::from_secs(15)));
        assert!(
            matches!(case.steps[0].kind, StepKind::Think(d) if d == Duration::from_millis(500))
        );
    }

    #[test]
    fn nested_payloads_convert_recursively() {
        let doc = r#"
steps:
  - debug:
      user:
        name: $name
        tags: [a, 1, true]
"#;
        match parse(doc) {
            Ok((case, _)) => match &case.steps[0].kind {
                StepKind::Action(_) => {}
                other => panic!("expected action step, got {other:?}"),
            },
            Err(err) => panic!("unexpected error: {err:#}"),
        }
    }
}
