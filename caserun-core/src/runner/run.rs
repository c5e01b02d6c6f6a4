use std::sync::Arc;
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use tokio::sync::Barrier;
use tracing::{debug, warn};

use crate::case::TestCase;
use crate::params::{ParametersIterator, load_parameters};
use crate::template::{FunctionRegistry, resolve_variables};

use super::config::{Executor, RunPlan};
use super::error::Result;
use super::exec::run_case_iteration;
use super::gate::IterationBudget;
use super::rendezvous::RendezvousSet;
use super::schedule::RampSchedule;
use super::stats::{RunStats, RunSummary};
use super::vu::{StartSignal, VuContext, VuWork};

/// Execute one test case under the given plan: resolve configuration,
/// build the data-driven iterator and the rendezvous checkpoints, then
/// spawn and ramp the virtual users.
pub async fn run_case(
    case: Arc<TestCase>,
    plan: RunPlan,
    funcs: Arc<FunctionRegistry>,
) -> Result<RunSummary> {
    // Configuration resolution failures abort before anything spawns.
    let config_vars = Arc::new(resolve_variables(&case.config.variables, &funcs)?);

    let params_cfg = case.config.parameters.clone().unwrap_or_default();
    let dimensions = load_parameters(&params_cfg, &config_vars, &funcs)?;

    let total_vus = plan.max_vus();
    let load_test = plan.is_load_test();

    // Load runs iterate their parameters continuously unless the case
    // caps them explicitly.
    let limit = if params_cfg.setting.limit == 0 && load_test {
        -1
    } else {
        params_cfg.setting.limit
    };
    let params = Arc::new(ParametersIterator::new(dimensions, limit));

    // The default single-shot run consumes the whole parameter product.
    let iterations = match (plan.iterations, plan.duration) {
        (Some(n), _) => Some(n),
        (None, Some(_)) => None,
        (None, None) => params.limit().or(Some(1)),
    };

    let rendezvous = RendezvousSet::from_case(&case, total_vus);
    let stats = Arc::new(RunStats::default());
    let run_started: Arc<OnceLock<Instant>> = Arc::new(OnceLock::new());
    let ready_barrier = Arc::new(Barrier::new(total_vus as usize + 1));
    let start_signal = Arc::new(StartSignal::new());

    let work = match &plan.executor {
        Executor::ConstantVus { .. } => VuWork::Constant {
            budget: Arc::new(IterationBudget::new(iterations, plan.duration)),
        },
        Executor::RampingVus { start_vus, stages } => VuWork::Ramping {
            schedule: Arc::new(RampSchedule::new(*start_vus, stages.clone())),
        },
    };

    let mut handles = Vec::with_capacity(total_vus as usize + 1);
    for vu_id in 1..=total_vus {
        let ctx = VuContext {
            vu_id,
            vus: total_vus,
            case: case.clone(),
            funcs: funcs.clone(),
            config_vars: config_vars.clone(),
            params: params.clone(),
            rendezvous: rendezvous.clone(),
            stats: stats.clone(),
            work: work.clone(),
            run_started: run_started.clone(),
            ready_barrier: ready_barrier.clone(),
            start_signal: start_signal.clone(),
        };
        handles.push(tokio::spawn(run_vu(ctx)));
    }

    // Hold every virtual user at the line, then start them together.
    ready_barrier.wait().await;
    let started = Instant::now();
    let _ = run_started.set(started);
    if let VuWork::Constant { budget } = &work {
        budget.start_at(started);
    }
    start_signal.start();

    match &work {
        VuWork::Constant { .. } => {
            // All users are live immediately; ramp-up is done by
            // definition.
            rendezvous.set_spawn_done();
        }
        VuWork::Ramping { schedule } => {
            handles.push(tokio::spawn(watch_ramp_up(
                rendezvous.clone(),
                schedule.clone(),
                started,
            )));
        }
    }

    for handle in handles {
        handle.await?;
    }

    debug!(case = %case.config.name, "run complete");
    Ok(stats.summarize(started.elapsed(), rendezvous.cycles_completed()))
}

/// Broadcast spawn-complete once the live user count first reaches the
/// initial ramp plateau (or the ramp ends without getting there).
async fn watch_ramp_up(rendezvous: RendezvousSet, schedule: Arc<RampSchedule>, started: Instant) {
    let plateau = schedule.initial_plateau().max(1);
    loop {
        if rendezvous.live_users() >= plateau || schedule.is_done(started.elapsed()) {
            rendezvous.set_spawn_done();
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn run_vu(ctx: VuContext) {
    ctx.ready_barrier.wait().await;
    ctx.start_signal.wait().await;

    match ctx.work.clone() {
        VuWork::Constant { budget } => {
            ctx.rendezvous.user_started();
            while budget.claim() {
                let Some(overrides) = ctx.params.next() else {
                    break;
                };
                ctx.stats.record_iteration();
                if let Err(err) = run_case_iteration(&ctx, &overrides).await {
                    ctx.stats.record_aborted_iteration();
                    warn!(vu = ctx.vu_id, error = %err, "iteration aborted");
                }
            }
            ctx.rendezvous.user_stopped();
        }
        VuWork::Ramping { schedule } => {
            let started = ctx
                .run_started
                .get()
                .copied()
                .unwrap_or_else(Instant::now);
            let mut active = false;

            loop {
                let elapsed = started.elapsed();
                if schedule.is_done(elapsed) {
                    break;
                }

                if ctx.vu_id <= schedule.target_at(elapsed) {
                    if !active {
                        active = true;
                        ctx.rendezvous.user_started();
                    }
                    let Some(overrides) = ctx.params.next() else {
                        break;
                    };
                    ctx.stats.record_iteration();
                    if let Err(err) = run_case_iteration(&ctx, &overrides).await {
                        ctx.stats.record_aborted_iteration();
                        warn!(vu = ctx.vu_id, error = %err, "iteration aborted");
                    }
                } else {
                    if active {
                        active = false;
                        ctx.rendezvous.user_stopped();
                    }
                    tokio::time::sleep(schedule.recheck_in(elapsed)).await;
                }
            }

            if active {
                ctx.rendezvous.user_stopped();
            }
        }
    }
}
