mod config;
mod error;
mod exec;
mod gate;
mod rendezvous;
mod run;
mod schedule;
mod stats;
mod vu;

pub use config::{
    CaseOptions, Executor, ExecutorKind, RunConfig, RunPlan, Stage, plan_from_options,
};
pub use error::{Error, Result};
pub use exec::{StepFailure, run_case_iteration};
pub use gate::IterationBudget;
pub use rendezvous::{
    CheckpointSnapshot, DEFAULT_RENDEZVOUS_TIMEOUT, ReleaseReason, RendezvousSet,
};
pub use run::run_case;
pub use schedule::RampSchedule;
pub use stats::{RunStats, RunSummary};
pub use vu::{StartSignal, VuContext, VuWork};
