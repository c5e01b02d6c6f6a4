use std::fmt;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use ahash::AHashMap;
use tokio::sync::{Notify, watch};
use tracing::{debug, info, warn};

use crate::case::{RendezvousSpec, StepKind, TestCase};

pub const DEFAULT_RENDEZVOUS_TIMEOUT: Duration = Duration::from_millis(5000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseReason {
    /// The arrival count reached the target.
    ConditionSatisfied,
    /// No arrival happened within the (debounced) timeout window.
    TimedOut,
}

impl fmt::Display for ReleaseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConditionSatisfied => f.write_str("condition satisfied"),
            Self::TimedOut => f.write_str("time's up"),
        }
    }
}

/// Per-cycle mutable state. `armed` is the explicit one-shot guard; the
/// cycle reset re-arms it.
#[derive(Debug, Default)]
struct CycleState {
    armed: bool,
    released: bool,
    arrived: u64,
    target: u64,
    reason: Option<ReleaseReason>,
}

#[derive(Debug)]
struct Checkpoint {
    name: Arc<str>,
    /// Fraction of current users required for release; `number` configs
    /// are converted against the initial fleet size.
    percent: f64,
    timeout: Duration,
    state: Mutex<CycleState>,
    /// Wakes the monitor: debounces the timeout and re-checks the count.
    arrivals: Notify,
    /// Release gate. Bumping the generation is a broadcast: every waiter
    /// holding a receiver wakes at once.
    gate: watch::Sender<u64>,
}

impl Checkpoint {
    fn new(spec: &RendezvousSpec, total_users: u64) -> Self {
        let percent = resolve_percent(spec, total_users);
        let timeout = resolve_timeout(spec);
        let (gate, _) = watch::channel(0);
        Self {
            name: Arc::<str>::from(spec.name.as_str()),
            percent,
            timeout,
            state: Mutex::new(CycleState {
                target: checkpoint_target(percent, total_users),
                ..CycleState::default()
            }),
            arrivals: Notify::new(),
            gate,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CycleState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn resolve_percent(spec: &RendezvousSpec, total_users: u64) -> f64 {
    match (spec.number, spec.percent) {
        (Some(number), None) => {
            if number > 0 && number as u64 <= total_users {
                number as f64 / total_users.max(1) as f64
            } else {
                warn!(
                    name = %spec.name,
                    number,
                    total_users,
                    "rendezvous `number` out of range; releasing at 100% of current users"
                );
                1.0
            }
        }
        (None, Some(percent)) if percent > 0.0 && percent <= 1.0 => percent,
        (None, None) => 1.0,
        (number, percent) => {
            warn!(
                name = %spec.name,
                ?number,
                ?percent,
                "rendezvous misconfigured; releasing at 100% of current users"
            );
            1.0
        }
    }
}

fn resolve_timeout(spec: &RendezvousSpec) -> Duration {
    match spec.timeout_ms {
        Some(ms) if ms > 0 => Duration::from_millis(ms as u64),
        Some(ms) => {
            warn!(
                name = %spec.name,
                timeout_ms = ms,
                "non-positive rendezvous timeout; using the default"
            );
            DEFAULT_RENDEZVOUS_TIMEOUT
        }
        None => DEFAULT_RENDEZVOUS_TIMEOUT,
    }
}

fn checkpoint_target(percent: f64, users: u64) -> u64 {
    ((percent * users as f64).round() as u64).min(users)
}

#[derive(Debug)]
struct SetInner {
    /// Declared step order; a checkpoint's index here is its position.
    checkpoints: Vec<Checkpoint>,
    positions: AHashMap<Arc<str>, usize>,
    spawn_done: AtomicBool,
    live_users: AtomicU64,
    cycles: AtomicU64,
}

/// Every rendezvous checkpoint of one test case, in declared order.
/// Cheap to clone; all clones share state.
#[derive(Debug, Clone)]
pub struct RendezvousSet {
    inner: Arc<SetInner>,
}

#[derive(Debug, Clone)]
pub struct CheckpointSnapshot {
    pub name: Arc<str>,
    pub armed: bool,
    pub released: bool,
    pub arrived: u64,
    pub target: u64,
    pub reason: Option<ReleaseReason>,
}

impl RendezvousSet {
    /// Collect the case's rendezvous steps. `total_users` seeds the
    /// first-cycle targets; later cycles recompute from the live count.
    #[must_use]
    pub fn from_case(case: &TestCase, total_users: u64) -> Self {
        let mut checkpoints = Vec::new();
        let mut positions = AHashMap::new();
        for step in &case.steps {
            if let StepKind::Rendezvous(spec) = &step.kind {
                let checkpoint = Checkpoint::new(spec, total_users);
                if positions
                    .insert(checkpoint.name.clone(), checkpoints.len())
                    .is_some()
                {
                    warn!(
                        name = %checkpoint.name,
                        "duplicate rendezvous name; arrivals go to the last declaration"
                    );
                }
                checkpoints.push(checkpoint);
            }
        }

        Self {
            inner: Arc::new(SetInner {
                checkpoints,
                positions,
                spawn_done: AtomicBool::new(false),
                live_users: AtomicU64::new(0),
                cycles: AtomicU64::new(0),
            }),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.checkpoints.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.checkpoints.is_empty()
    }

    /// Ramp-up completion broadcast. Checkpoints start counting arrivals
    /// from here on.
    pub fn set_spawn_done(&self) {
        if !self.inner.spawn_done.swap(true, Ordering::AcqRel) {
            debug!("spawn complete; rendezvous checkpoints are live");
        }
    }

    #[must_use]
    pub fn spawn_complete(&self) -> bool {
        self.inner.spawn_done.load(Ordering::Acquire)
    }

    pub fn user_started(&self) -> u64 {
        self.inner.live_users.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Callers pair this with `user_started`; the counter never goes
    /// negative in a correctly bracketed run.
    pub fn user_stopped(&self) -> u64 {
        self.inner
            .live_users
            .fetch_sub(1, Ordering::AcqRel)
            .saturating_sub(1)
    }

    #[must_use]
    pub fn live_users(&self) -> u64 {
        self.inner.live_users.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn cycles_completed(&self) -> u64 {
        self.inner.cycles.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<CheckpointSnapshot> {
        self.inner
            .checkpoints
            .iter()
            .map(|cp| {
                let st = cp.lock();
                CheckpointSnapshot {
                    name: cp.name.clone(),
                    armed: st.armed,
                    released: st.released,
                    arrived: st.arrived,
                    target: st.target,
                    reason: st.reason,
                }
            })
            .collect()
    }

    /// One virtual user reaching the named checkpoint. Blocks until the
    /// checkpoint releases, or passes straight through when the arrival
    /// cannot be counted (ramp-up incomplete, earlier checkpoint still
    /// counting, or the gate already open this cycle).
    pub async fn arrive(&self, name: &str) {
        let Some(&position) = self.inner.positions.get(name) else {
            warn!(name, "unknown rendezvous checkpoint; passing through");
            return;
        };
        let cp = &self.inner.checkpoints[position];

        if !self.spawn_complete() {
            return;
        }
        if !self.earlier_all_released(position) {
            return;
        }

        let (first_arrival, mut gate) = {
            let mut st = cp.lock();
            if st.released {
                // The gate stays open until the last checkpoint resets
                // the cycle.
                return;
            }
            let first = !st.armed;
            st.armed = true;
            // Check-then-act: the target may have shrunk since the last
            // cycle, so never push the counter past it.
            if st.arrived < st.target {
                st.arrived += 1;
            }
            (first, cp.gate.subscribe())
        };

        if first_arrival {
            debug!(name = %cp.name, "rendezvous armed");
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move { inner.monitor(position).await });
        }
        cp.arrivals.notify_one();

        // Wait for the broadcast; a dropped sender means the run is
        // tearing down, which also unblocks us.
        let _ = gate.changed().await;
    }

    fn earlier_all_released(&self, position: usize) -> bool {
        self.inner.checkpoints[..position]
            .iter()
            .all(|cp| cp.lock().released)
    }
}

impl SetInner {
    /// Per-cycle monitor: races the arrival count against a timeout whose
    /// window restarts on every arrival.
    async fn monitor(&self, position: usize) {
        let cp = &self.checkpoints[position];
        let reason = loop {
            let satisfied = {
                let st = cp.lock();
                st.arrived >= st.target
            };
            if satisfied {
                break ReleaseReason::ConditionSatisfied;
            }

            tokio::select! {
                () = cp.arrivals.notified() => {}
                () = tokio::time::sleep(cp.timeout) => break ReleaseReason::TimedOut,
            }
        };

        self.release(position, reason);

        // Only the last checkpoint closes the cycle; everyone earlier
        // stays in Released until this reset re-arms them, so exactly one
        // cycle is in flight across the whole ordered sequence.
        if position + 1 == self.checkpoints.len() {
            self.reset_cycle();
        }
    }

    fn release(&self, position: usize, reason: ReleaseReason) {
        let cp = &self.checkpoints[position];
        let arrived = {
            let mut st = cp.lock();
            st.released = true;
            st.reason = Some(reason);
            st.arrived
        };
        cp.gate.send_modify(|generation| *generation += 1);
        info!(name = %cp.name, arrived, %reason, "rendezvous released");
    }

    fn reset_cycle(&self) {
        let live = self.live_users.load(Ordering::Acquire);
        for cp in &self.checkpoints {
            let mut st = cp.lock();
            st.armed = false;
            st.released = false;
            st.arrived = 0;
            st.reason = None;
            st.target = checkpoint_target(cp.percent, live);
        }
        let cycle = self.cycles.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(cycle, live, "rendezvous cycle reset");
    }
}
