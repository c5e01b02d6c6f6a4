use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Bounds how many iterations a run may start, by a shared count and/or a
/// wall-clock deadline. Shared across every virtual user of a run, so an
/// iteration cap is a fleet-wide total, not per user.
#[derive(Debug)]
pub struct IterationBudget {
    started: AtomicU64,
    iterations: Option<u64>,
    duration: Option<Duration>,
    deadline: OnceLock<Instant>,
}

impl IterationBudget {
    #[must_use]
    pub fn new(iterations: Option<u64>, duration: Option<Duration>) -> Self {
        Self {
            started: AtomicU64::new(0),
            iterations,
            duration,
            deadline: OnceLock::new(),
        }
    }

    /// Pin the deadline to the actual run start so virtual-user staging
    /// time is not billed against the duration.
    pub fn start_at(&self, started: Instant) {
        if let Some(duration) = self.duration {
            let _ = self.deadline.set(started + duration);
        }
    }

    /// One iteration grant per call; false once the budget is spent.
    pub fn claim(&self) -> bool {
        if let Some(duration) = self.duration {
            let deadline = self.deadline.get_or_init(|| Instant::now() + duration);
            if Instant::now() >= *deadline {
                return false;
            }
        }

        match self.iterations {
            Some(total) => self.started.fetch_add(1, Ordering::Relaxed) < total,
            // Duration alone keeps granting until the deadline; with no
            // bound at all the case runs exactly once.
            None if self.duration.is_some() => true,
            None => self.started.fetch_add(1, Ordering::Relaxed) == 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unbounded_budget_grants_exactly_once() {
        let budget = IterationBudget::new(None, None);
        assert!(budget.claim());
        assert!(!budget.claim());
    }

    #[test]
    fn iteration_cap_is_a_shared_total() {
        let budget = IterationBudget::new(Some(3), None);
        let granted = (0..10).filter(|_| budget.claim()).count();
        assert_eq!(granted, 3);
    }

    #[test]
    fn deadline_stops_grants() {
        let budget = IterationBudget::new(None, Some(Duration::from_millis(20)));
        budget.start_at(Instant::now() - Duration::from_millis(30));
        assert!(!budget.claim());
    }

    #[test]
    fn deadline_lazily_initializes_from_first_claim() {
        let budget = IterationBudget::new(Some(100), Some(Duration::from_secs(60)));
        assert!(budget.claim());
    }
}
