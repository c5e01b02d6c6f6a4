use std::time::Duration;

use super::config::Stage;

/// Piecewise-linear virtual-user target over elapsed run time.
#[derive(Debug, Clone)]
pub struct RampSchedule {
    start: u64,
    stages: Vec<Stage>,
    /// Cumulative stage end offsets, precomputed for lookup.
    ends: Vec<Duration>,
}

impl RampSchedule {
    #[must_use]
    pub fn new(start: u64, stages: Vec<Stage>) -> Self {
        let mut ends = Vec::with_capacity(stages.len());
        let mut acc = Duration::ZERO;
        for stage in &stages {
            acc = acc.saturating_add(stage.duration);
            ends.push(acc);
        }
        Self { start, stages, ends }
    }

    #[must_use]
    pub fn total_duration(&self) -> Duration {
        self.ends.last().copied().unwrap_or(Duration::ZERO)
    }

    #[must_use]
    pub fn is_done(&self, elapsed: Duration) -> bool {
        elapsed >= self.total_duration()
    }

    /// Target the initial ramp is heading for; reaching it counts as
    /// ramp-up completion.
    #[must_use]
    pub fn initial_plateau(&self) -> u64 {
        self.stages.first().map_or(self.start, |s| s.target)
    }

    #[must_use]
    pub fn target_at(&self, elapsed: Duration) -> u64 {
        if self.stages.is_empty() || elapsed.is_zero() {
            return self.start;
        }
        if elapsed >= self.total_duration() {
            return self.stages.last().map_or(self.start, |s| s.target);
        }

        let idx = self.ends.partition_point(|end| *end <= elapsed);
        let stage_start = if idx == 0 {
            Duration::ZERO
        } else {
            self.ends[idx - 1]
        };
        let from = if idx == 0 {
            self.start
        } else {
            self.stages[idx - 1].target
        };
        let to = self.stages[idx].target;
        let span = self.stages[idx].duration;
        if span.is_zero() {
            return to;
        }

        let num = elapsed.saturating_sub(stage_start).as_nanos() as i128;
        let den = span.as_nanos() as i128;
        let cur = from as i128 + ((to as i128 - from as i128).saturating_mul(num) / den.max(1));
        cur.clamp(0, u64::MAX as i128) as u64
    }

    /// How long a parked virtual user should sleep before re-reading the
    /// target. Coarse on purpose; activation latency within ~50ms is fine.
    #[must_use]
    pub fn recheck_in(&self, elapsed: Duration) -> Duration {
        let default_sleep = Duration::from_millis(50);
        let total = self.total_duration();
        if elapsed >= total {
            return Duration::ZERO;
        }
        total.saturating_sub(elapsed).min(default_sleep)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schedule() -> RampSchedule {
        RampSchedule::new(
            0,
            vec![
                Stage {
                    duration: Duration::from_secs(10),
                    target: 100,
                },
                Stage {
                    duration: Duration::from_secs(10),
                    target: 100,
                },
                Stage {
                    duration: Duration::from_secs(10),
                    target: 0,
                },
            ],
        )
    }

    #[test]
    fn interpolates_within_a_stage() {
        let s = schedule();
        assert_eq!(s.target_at(Duration::ZERO), 0);
        assert_eq!(s.target_at(Duration::from_secs(5)), 50);
        assert_eq!(s.target_at(Duration::from_secs(10)), 100);
        assert_eq!(s.target_at(Duration::from_secs(15)), 100);
        assert_eq!(s.target_at(Duration::from_secs(25)), 50);
    }

    #[test]
    fn clamps_past_the_end() {
        let s = schedule();
        assert!(s.is_done(Duration::from_secs(30)));
        assert_eq!(s.target_at(Duration::from_secs(31)), 0);
    }

    #[test]
    fn empty_schedule_holds_the_start_value() {
        let s = RampSchedule::new(7, Vec::new());
        assert_eq!(s.target_at(Duration::from_secs(1)), 7);
        assert_eq!(s.total_duration(), Duration::ZERO);
        assert_eq!(s.initial_plateau(), 7);
    }

    #[test]
    fn plateau_is_the_first_stage_target() {
        assert_eq!(schedule().initial_plateau(), 100);
    }
}
