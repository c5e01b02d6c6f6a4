use tracing::warn;

use crate::case::{ActionError, StepContext, StepKind};
use crate::template::eval_value;
use crate::template::VarMap;

use super::vu::VuContext;

/// An iteration aborted mid-case: the failing step plus the cause.
#[derive(Debug, thiserror::Error)]
#[error("step `{step}` failed: {source}")]
pub struct StepFailure {
    pub step: String,
    #[source]
    pub source: ActionError,
}

/// Execute the case's step list once for one virtual user.
///
/// The session scope starts as the resolved configuration variables plus
/// the data-driven `overrides`, and grows with step exports. Step-local
/// variables shadow the session for their own step only. Evaluator
/// failures always abort the iteration; action failures abort it only
/// when the case is fail-fast.
pub async fn run_case_iteration(
    ctx: &VuContext,
    overrides: &VarMap,
) -> Result<(), StepFailure> {
    let case = &ctx.case;

    let mut session: VarMap = ctx.config_vars.as_ref().clone();
    session.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));

    for step in &case.steps {
        ctx.stats.record_step();

        let mut scope = session.clone();
        for (name, raw) in &step.variables {
            match eval_value(raw, &scope, &ctx.funcs) {
                Ok(value) => {
                    scope.insert(name.clone(), value);
                }
                Err(err) => {
                    ctx.stats.record_step_failure();
                    return Err(StepFailure {
                        step: step.name.clone(),
                        source: err.into(),
                    });
                }
            }
        }

        match &step.kind {
            StepKind::Think(pause) => {
                tokio::time::sleep(*pause).await;
            }
            StepKind::Rendezvous(spec) => {
                ctx.rendezvous.arrive(&spec.name).await;
            }
            StepKind::Action(action) => {
                let step_ctx = StepContext {
                    vu_id: ctx.vu_id,
                    step: &step.name,
                    variables: &scope,
                    funcs: &ctx.funcs,
                };
                match action.run(step_ctx).await {
                    Ok(exports) => {
                        session.extend(exports);
                    }
                    Err(source) => {
                        ctx.stats.record_step_failure();
                        if case.config.fail_fast {
                            return Err(StepFailure {
                                step: step.name.clone(),
                                source,
                            });
                        }
                        warn!(
                            vu = ctx.vu_id,
                            step = %step.name,
                            error = %source,
                            "step failed; continuing"
                        );
                    }
                }
            }
        }
    }

    Ok(())
}
