use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::Barrier;
use tokio::sync::Notify;

use crate::case::TestCase;
use crate::params::ParametersIterator;
use crate::template::{FunctionRegistry, VarMap};

use super::gate::IterationBudget;
use super::rendezvous::RendezvousSet;
use super::schedule::RampSchedule;
use super::stats::RunStats;

/// Flipped once by the runner after every virtual user is staged, so no
/// iteration starts before the whole fleet is ready.
#[derive(Debug, Default)]
pub struct StartSignal {
    started: AtomicBool,
    notify: Notify,
}

impl StartSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self) {
        self.started.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub async fn wait(&self) {
        while !self.started.load(Ordering::Acquire) {
            self.notify.notified().await;
        }
    }
}

#[derive(Debug, Clone)]
pub enum VuWork {
    Constant {
        budget: Arc<IterationBudget>,
    },
    Ramping {
        schedule: Arc<RampSchedule>,
    },
}

#[derive(Debug, Clone)]
pub struct VuContext {
    pub vu_id: u64,
    /// Total virtual users spawned for the run.
    pub vus: u64,
    pub case: Arc<TestCase>,
    pub funcs: Arc<FunctionRegistry>,
    /// Case configuration variables, resolved once per run.
    pub config_vars: Arc<VarMap>,
    pub params: Arc<ParametersIterator>,
    pub rendezvous: RendezvousSet,
    pub stats: Arc<RunStats>,
    pub work: VuWork,

    pub run_started: Arc<OnceLock<Instant>>,
    pub ready_barrier: Arc<Barrier>,
    pub start_signal: Arc<StartSignal>,
}
