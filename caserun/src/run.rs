use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;

use crate::case_yaml::{self, CaseYaml};
use crate::cli::{CheckArgs, RunArgs};
use crate::exit_codes::ExitCode;
use caserun_core::TestCase;
use caserun_core::params::{self, ParametersIterator, load_parameters};
use caserun_core::runner::{
    self, CaseOptions, RunConfig, RunSummary, plan_from_options, run_case,
};
use caserun_core::template::{self, FunctionRegistry, resolve_variables};

pub async fn run(args: RunArgs) -> anyhow::Result<ExitCode> {
    let (case, options) = load_case(&args.case).await?;

    let cfg = RunConfig {
        vus: args.vus,
        iterations: args.iterations,
        duration: args.duration,
    };
    let plan = plan_from_options(&options, &cfg)?;

    let summary = run_case(Arc::new(case), plan, Arc::new(FunctionRegistry::new())).await?;
    print_summary(&summary);

    if summary.step_failures_total > 0 {
        return Ok(ExitCode::StepsFailed);
    }
    Ok(ExitCode::Success)
}

/// Load + resolve without running: surfaces configuration-time failures
/// (bad variables, malformed parameters, invalid executor) and prints the
/// derived iteration plan.
pub async fn check(args: CheckArgs) -> anyhow::Result<()> {
    let (case, options) = load_case(&args.case).await?;
    let funcs = FunctionRegistry::new();

    let vars = resolve_variables(&case.config.variables, &funcs)?;

    let name = if case.config.name.is_empty() {
        "(unnamed)"
    } else {
        &case.config.name
    };
    println!("case: {name}");
    println!("  steps: {}", case.steps.len());
    println!("  variables: {}", vars.len());

    if let Some(params_cfg) = &case.config.parameters {
        let dimensions = load_parameters(params_cfg, &vars, &funcs)?;
        for dim in &dimensions {
            println!(
                "  parameter `{}`: {} rows ({})",
                dim.name,
                dim.rows.len(),
                dim.strategy
            );
        }
        let iter = ParametersIterator::new(dimensions, params_cfg.setting.limit);
        match iter.limit() {
            Some(limit) => println!("  derived iterations: {limit}"),
            None => println!("  derived iterations: unlimited"),
        }
    }

    let plan = plan_from_options(&options, &RunConfig::default())?;
    println!("  max vus: {}", plan.max_vus());

    Ok(())
}

async fn load_case(path: &Path) -> anyhow::Result<(TestCase, CaseOptions)> {
    let text = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read case file: {}", path.display()))?;
    let doc: CaseYaml = serde_yaml::from_str(&text)
        .with_context(|| format!("invalid case document: {}", path.display()))?;
    case_yaml::into_test_case(doc)
}

fn print_summary(summary: &RunSummary) {
    // Millisecond precision is plenty for a human summary.
    let elapsed = Duration::from_millis(summary.elapsed.as_millis() as u64);
    println!("case complete in {}", humantime::format_duration(elapsed));
    println!(
        "  iterations: {} ({} aborted)",
        summary.iterations_total, summary.aborted_iterations_total
    );
    println!(
        "  steps:      {} ({} failed)",
        summary.steps_total, summary.step_failures_total
    );
    if summary.rendezvous_cycles > 0 {
        println!("  rendezvous cycles: {}", summary.rendezvous_cycles);
    }
}

/// Map failures onto exit codes: configuration problems are the caller's
/// fault, everything else is ours.
pub fn classify(err: &anyhow::Error) -> ExitCode {
    if let Some(err) = err.downcast_ref::<runner::Error>() {
        return match err {
            runner::Error::Join(_) => ExitCode::RuntimeError,
            _ => ExitCode::InvalidInput,
        };
    }
    if err.downcast_ref::<template::Error>().is_some()
        || err.downcast_ref::<params::Error>().is_some()
        || err.downcast_ref::<serde_yaml::Error>().is_some()
    {
        return ExitCode::InvalidInput;
    }
    ExitCode::RuntimeError
}
