use bridge_traits::{ResourceStatus, Status};

use crate::config::PollConfig;

/// What the poll loop should do after a status check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStep {
    /// Wait one interval, then check again.
    Continue,
    /// Check again immediately with a build request.
    CheckNow,
    /// Progress stalled: pause, force a rebuild, then resume.
    Refetch,
    Ready,
    Failed,
}

/// Stall and retry bookkeeping for one resource's poll loop.
///
/// The loop calls [`next_check_builds`](Self::next_check_builds) before each
/// check and feeds the result to [`observe`](Self::observe) (or
/// [`record_failure`](Self::record_failure) when the check itself errored).
#[derive(Debug, Clone)]
pub struct PollState {
    budget: i32,
    step: i32,
    retry_attempts: u32,
    build_requested: bool,
    force_build: bool,
    stagnation: i32,
    last_percent: Option<f64>,
    last_status: Option<Status>,
    attempts: u32,
}

impl PollState {
    pub fn new(config: &PollConfig) -> Self {
        Self {
            budget: config.stagnation_budget,
            step: config.stagnation_step,
            retry_attempts: config.retry_attempts,
            build_requested: false,
            force_build: false,
            stagnation: config.stagnation_budget,
            last_percent: None,
            last_status: None,
            attempts: 0,
        }
    }

    /// Whether the upcoming check should carry `build=true`: always the first
    /// one, afterwards only when forced.
    pub fn next_check_builds(&mut self) -> bool {
        if !self.build_requested {
            self.build_requested = true;
            return true;
        }
        std::mem::take(&mut self.force_build)
    }

    pub fn observe(&mut self, status: &ResourceStatus) -> PollStep {
        let previous = self.last_status.replace(status.status);

        match status.status {
            Status::Ready => return PollStep::Ready,
            Status::Downloaded if previous != Some(Status::Downloaded) => {
                self.force_build = true;
                return PollStep::CheckNow;
            }
            _ => {}
        }

        self.attempts += 1;
        if self.attempts > self.retry_attempts {
            return PollStep::Failed;
        }

        let percent = status.percent_loaded;
        if percent > 0.0 {
            if self.last_percent == Some(percent) && percent < 100.0 {
                self.stagnation -= self.step;
            } else {
                self.stagnation = self.budget;
            }
            self.last_percent = Some(percent);

            if self.stagnation < 0 {
                self.stagnation = self.budget;
                self.force_build = true;
                return PollStep::Refetch;
            }
        }
        PollStep::Continue
    }

    /// A check that never produced a status still spends an attempt.
    pub fn record_failure(&mut self) -> PollStep {
        self.attempts += 1;
        if self.attempts > self.retry_attempts {
            PollStep::Failed
        } else {
            PollStep::Continue
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn downloading(percent: f64) -> ResourceStatus {
        ResourceStatus {
            percent_loaded: percent,
            ..ResourceStatus::new(Status::Downloading)
        }
    }

    #[test]
    fn test_build_requested_once_then_only_when_forced() {
        let mut state = PollState::new(&PollConfig::scoped());
        assert!(state.next_check_builds());
        assert!(!state.next_check_builds());

        state.observe(&ResourceStatus::new(Status::Downloaded));
        assert!(state.next_check_builds());
        assert!(!state.next_check_builds());
    }

    #[test]
    fn test_stagnation_triggers_refetch_after_budget() {
        let mut state = PollState::new(&PollConfig::scoped());
        assert!(state.next_check_builds());
        // first sighting resets the counter, then 24 → 19 → 14 → 9 → 4 → -1
        let steps: Vec<PollStep> = (0..6).map(|_| state.observe(&downloading(40.0))).collect();

        assert_eq!(&steps[..5], &[PollStep::Continue; 5]);
        assert_eq!(steps[5], PollStep::Refetch);
        assert!(state.next_check_builds());
    }

    #[test]
    fn test_progress_resets_stagnation() {
        let mut state = PollState::new(&PollConfig::scoped());
        for percent in [10.0, 10.0, 10.0, 10.0, 10.0, 11.0, 11.0, 11.0, 11.0, 11.0] {
            assert_eq!(state.observe(&downloading(percent)), PollStep::Continue);
        }
    }

    #[test]
    fn test_full_progress_never_stalls() {
        let mut state = PollState::new(&PollConfig::scoped());
        for _ in 0..20 {
            assert_eq!(state.observe(&downloading(100.0)), PollStep::Continue);
        }
    }

    #[test]
    fn test_zero_progress_is_not_stagnation() {
        let mut state = PollState::new(&PollConfig::scoped());
        for _ in 0..20 {
            assert_eq!(
                state.observe(&ResourceStatus::new(Status::Searching)),
                PollStep::Continue
            );
        }
    }

    #[test]
    fn test_retry_budget_exhaustion_fails() {
        let mut state = PollState::new(&PollConfig::scoped().with_retry_attempts(3));
        assert_eq!(state.record_failure(), PollStep::Continue);
        assert_eq!(state.observe(&ResourceStatus::new(Status::Searching)), PollStep::Continue);
        assert_eq!(state.record_failure(), PollStep::Continue);
        assert_eq!(state.record_failure(), PollStep::Failed);
        assert_eq!(state.attempts(), 4);
    }

    #[test]
    fn test_ready_stops_regardless_of_budget() {
        let mut state = PollState::new(&PollConfig::scoped().with_retry_attempts(1));
        state.record_failure();
        assert_eq!(state.observe(&ResourceStatus::new(Status::Ready)), PollStep::Ready);
    }

    #[test]
    fn test_repeated_downloaded_does_not_spin() {
        let mut state = PollState::new(&PollConfig::scoped());
        let downloaded = ResourceStatus::new(Status::Downloaded);
        assert_eq!(state.observe(&downloaded), PollStep::CheckNow);
        assert_eq!(state.observe(&downloaded), PollStep::Continue);
    }
}
