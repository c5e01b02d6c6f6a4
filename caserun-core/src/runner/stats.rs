use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

#[derive(Debug, Default)]
pub struct RunStats {
    iterations_total: AtomicU64,
    steps_total: AtomicU64,
    step_failures_total: AtomicU64,
    aborted_iterations_total: AtomicU64,
}

impl RunStats {
    pub fn record_iteration(&self) {
        self.iterations_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_step(&self) {
        self.steps_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_step_failure(&self) {
        self.step_failures_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_aborted_iteration(&self) {
        self.aborted_iterations_total.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn step_failures_total(&self) -> u64 {
        self.step_failures_total.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn summarize(&self, elapsed: Duration, rendezvous_cycles: u64) -> RunSummary {
        RunSummary {
            iterations_total: self.iterations_total.load(Ordering::Relaxed),
            steps_total: self.steps_total.load(Ordering::Relaxed),
            step_failures_total: self.step_failures_total.load(Ordering::Relaxed),
            aborted_iterations_total: self.aborted_iterations_total.load(Ordering::Relaxed),
            rendezvous_cycles,
            elapsed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub iterations_total: u64,
    pub steps_total: u64,
    pub step_failures_total: u64,
    pub aborted_iterations_total: u64,
    pub rendezvous_cycles: u64,
    pub elapsed: Duration,
}
