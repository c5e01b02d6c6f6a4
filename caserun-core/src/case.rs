use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use caserun_value::Value;

use crate::params::ParametersConfig;
use crate::template::{FunctionRegistry, VarMap, display_string, eval_value};

/// Declarative test case: configuration plus an ordered step list. One
/// execution of the step list is one iteration of one virtual user.
#[derive(Debug, Clone, Default)]
pub struct TestCase {
    pub config: CaseConfig,
    pub steps: Vec<Step>,
}

#[derive(Debug, Clone, Default)]
pub struct CaseConfig {
    pub name: String,
    /// Raw name→expression mapping, resolved once per run.
    pub variables: VarMap,
    pub parameters: Option<ParametersConfig>,
    /// Abort the remaining steps of the current iteration on the first
    /// step failure. Never affects other virtual users.
    pub fail_fast: bool,
}

#[derive(Clone)]
pub struct Step {
    pub name: String,
    /// Step-local variables; highest merge priority, never persisted.
    pub variables: VarMap,
    pub kind: StepKind,
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

#[derive(Clone)]
pub enum StepKind {
    /// Pause the virtual user for a fixed think time.
    Think(Duration),
    /// Block at a named synchronization checkpoint.
    Rendezvous(RendezvousSpec),
    /// Anything with an external effect; transports plug in here.
    Action(Arc<dyn ActionStep>),
}

impl fmt::Debug for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Think(pause) => f.debug_tuple("Think").field(pause).finish(),
            Self::Rendezvous(spec) => f.debug_tuple("Rendezvous").field(spec).finish(),
            Self::Action(_) => f.write_str("Action(..)"),
        }
    }
}

/// Checkpoint configuration as declared in the case document. Exactly one
/// of `number`/`percent` should be given; the barrier falls back to
/// releasing at 100% of current users otherwise.
#[derive(Debug, Clone, Default)]
pub struct RendezvousSpec {
    pub name: String,
    pub number: Option<i64>,
    /// Fraction of current users in [0, 1].
    pub percent: Option<f64>,
    pub timeout_ms: Option<i64>,
}

/// Resolved execution scope handed to an action step.
pub struct StepContext<'a> {
    pub vu_id: u64,
    pub step: &'a str,
    pub variables: &'a VarMap,
    pub funcs: &'a FunctionRegistry,
}

pub type ActionError = Box<dyn std::error::Error + Send + Sync>;

/// Seam for transport and other effectful steps. Implementations receive
/// the fully resolved step scope; returned variables merge into the
/// session scope for later steps.
#[async_trait]
pub trait ActionStep: Send + Sync {
    async fn run(&self, ctx: StepContext<'_>) -> Result<VarMap, ActionError>;
}

/// Logs its resolved payload. Stands in for transport steps in dry runs.
#[derive(Debug, Clone)]
pub struct DebugStep {
    pub message: Value,
}

#[async_trait]
impl ActionStep for DebugStep {
    async fn run(&self, ctx: StepContext<'_>) -> Result<VarMap, ActionError> {
        let resolved = eval_value(&self.message, ctx.variables, ctx.funcs)?;
        tracing::info!(
            vu = ctx.vu_id,
            step = ctx.step,
            message = %display_string(&resolved),
            "debug step"
        );
        Ok(VarMap::default())
    }
}
