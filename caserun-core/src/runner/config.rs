use std::time::Duration;

use super::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct Stage {
    pub duration: Duration,
    pub target: u64,
}

/// Caller-level run overrides; highest priority.
#[derive(Debug, Clone, Default)]
pub struct RunConfig {
    pub vus: Option<u64>,
    pub iterations: Option<u64>,
    pub duration: Option<Duration>,
}

/// Executor options embedded in the case document.
#[derive(Debug, Clone, Default)]
pub struct CaseOptions {
    pub executor: Option<String>,
    pub vus: Option<u64>,
    pub iterations: Option<u64>,
    pub duration: Option<Duration>,
    pub start_vus: Option<u64>,
    pub stages: Vec<Stage>,
}

#[derive(Debug, Clone)]
pub enum Executor {
    ConstantVus {
        vus: u64,
    },

    /// Ramp the number of active virtual users up/down over time.
    RampingVus {
        start_vus: u64,
        stages: Vec<Stage>,
    },
}

/// Executor kind (the string form used in case documents and CLI flags).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::EnumString, strum::Display)]
pub enum ExecutorKind {
    #[strum(serialize = "constant-vus", serialize = "constant")]
    ConstantVus,

    #[strum(serialize = "ramping-vus", serialize = "ramping")]
    RampingVus,
}

#[derive(Debug, Clone)]
pub struct RunPlan {
    pub executor: Executor,
    pub iterations: Option<u64>,
    pub duration: Option<Duration>,
}

impl RunPlan {
    #[must_use]
    pub fn max_vus(&self) -> u64 {
        match &self.executor {
            Executor::ConstantVus { vus } => *vus,
            Executor::RampingVus { start_vus, stages } => {
                let max_stage = stages.iter().map(|s| s.target).max().unwrap_or(0);
                max_stage.max(*start_vus)
            }
        }
    }

    /// Load runs iterate continuously; single-shot API runs do not.
    #[must_use]
    pub fn is_load_test(&self) -> bool {
        self.max_vus() > 1 || self.duration.is_some()
    }
}

/// Merge case options with caller overrides into an executable plan.
/// Caller flags win; an explicitly requested constant shape downgrades a
/// ramping executor rather than erroring.
pub fn plan_from_options(opts: &CaseOptions, cfg: &RunConfig) -> Result<RunPlan> {
    let executor_name = opts.executor.as_deref().unwrap_or("constant-vus");
    let kind: ExecutorKind = executor_name.parse().map_err(|_| Error::InvalidExecutor)?;

    let cli_overrides = cfg.vus.is_some() || cfg.iterations.is_some() || cfg.duration.is_some();

    if kind == ExecutorKind::RampingVus && !cli_overrides {
        if opts.iterations.is_some() {
            return Err(Error::InvalidIterations);
        }
        if opts.stages.is_empty() {
            return Err(Error::InvalidStages);
        }

        let start_vus = opts.start_vus.unwrap_or(0);
        let max_stage = opts.stages.iter().map(|s| s.target).max().unwrap_or(0);
        if max_stage.max(start_vus) == 0 {
            return Err(Error::InvalidVus);
        }

        let total_duration = opts
            .stages
            .iter()
            .fold(Duration::ZERO, |acc, s| acc.saturating_add(s.duration));
        if total_duration.is_zero() {
            return Err(Error::InvalidStages);
        }

        return Ok(RunPlan {
            executor: Executor::RampingVus {
                start_vus,
                stages: opts.stages.clone(),
            },
            iterations: None,
            duration: Some(total_duration),
        });
    }

    let vus = cfg.vus.or(opts.vus).unwrap_or(1);
    if vus == 0 {
        return Err(Error::InvalidVus);
    }

    let iterations = cfg.iterations.or(opts.iterations);
    if iterations == Some(0) {
        return Err(Error::InvalidIterations);
    }

    let duration = cfg.duration.or(opts.duration);

    Ok(RunPlan {
        executor: Executor::ConstantVus { vus },
        iterations,
        duration,
    })
}
