//! Refresh scheduler state machine
//!
//! Pure state machine: receives events, returns (new_state, action).
//! The scheduler task executes the timer and token I/O implied by each action.
//!
//! ```text
//! Idle --Start--> Scheduled --Timer--> Firing --ok--> Scheduled
//!                                        |
//!                                        +--err--> RetryScheduled --Timer--> Firing
//!                                        +--err, budget spent--> Idle (last_error)
//! ```

use std::time::Duration;

use crate::policy::RetryPolicy;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshState {
    /// Not armed. Carries the error that ended the last cycle, if any.
    Idle { last_error: Option<String> },
    /// Waiting `delay` before the next firing.
    Scheduled { delay: Duration },
    /// Fetching a token. `attempt` is 1 for the first firing of a cycle.
    Firing { attempt: u32 },
    /// A firing failed; `next_attempt` fires after `delay`.
    RetryScheduled { next_attempt: u32, delay: Duration },
}

impl Default for RefreshState {
    fn default() -> Self {
        RefreshState::Idle { last_error: None }
    }
}

impl RefreshState {
    /// Short name for health output.
    pub fn label(&self) -> &'static str {
        match self {
            RefreshState::Idle { last_error: None } => "idle",
            RefreshState::Idle { last_error: Some(_) } => "failed",
            RefreshState::Scheduled { .. } => "scheduled",
            RefreshState::Firing { .. } => "firing",
            RefreshState::RetryScheduled { .. } => "retry_scheduled",
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, RefreshState::Idle { last_error: Some(_) })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshEvent {
    /// Scheduler started with the persisted (or default) delay.
    Start { delay: Duration },
    /// The armed delay elapsed.
    Timer,
    /// Token fetched and persisted; re-arm after `next_delay`.
    FireSucceeded { next_delay: Duration },
    FireFailed { error: String },
    Stop,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshAction {
    /// Sleep `delay`, then deliver `Timer`.
    Arm { delay: Duration },
    /// Fetch a token, then deliver `FireSucceeded` or `FireFailed`.
    Fire,
    /// End the scheduler task.
    Halt,
    None,
}

/// Handle a state transition. Pure function: no I/O.
pub fn handle_event(
    state: RefreshState,
    event: RefreshEvent,
    policy: &RetryPolicy,
) -> (RefreshState, RefreshAction) {
    match (state, event) {
        (_, RefreshEvent::Stop) => (RefreshState::default(), RefreshAction::Halt),

        (RefreshState::Idle { .. }, RefreshEvent::Start { delay }) => {
            (RefreshState::Scheduled { delay }, RefreshAction::Arm { delay })
        }

        (RefreshState::Scheduled { .. }, RefreshEvent::Timer) => {
            (RefreshState::Firing { attempt: 1 }, RefreshAction::Fire)
        }

        (RefreshState::RetryScheduled { next_attempt, .. }, RefreshEvent::Timer) => (
            RefreshState::Firing {
                attempt: next_attempt,
            },
            RefreshAction::Fire,
        ),

        (RefreshState::Firing { .. }, RefreshEvent::FireSucceeded { next_delay }) => (
            RefreshState::Scheduled { delay: next_delay },
            RefreshAction::Arm { delay: next_delay },
        ),

        (RefreshState::Firing { attempt }, RefreshEvent::FireFailed { .. })
            if policy.allows_retry(attempt) =>
        {
            let delay = policy.delay_for(attempt);
            (
                RefreshState::RetryScheduled {
                    next_attempt: attempt + 1,
                    delay,
                },
                RefreshAction::Arm { delay },
            )
        }

        (RefreshState::Firing { .. }, RefreshEvent::FireFailed { error }) => (
            RefreshState::Idle {
                last_error: Some(error),
            },
            RefreshAction::Halt,
        ),

        (state, _) => (state, RefreshAction::None),
    }
}
