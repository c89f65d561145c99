//! Background token refresh
//!
//! Keeps the shared access token warm so request paths rarely fetch one
//! themselves. Each firing force-fetches a token, persists it with
//! TTL = `expires_in`, and re-arms `expires_in - 10s` later (never less than
//! one second). The next delay is persisted too, so a restarted worker picks
//! up the existing schedule instead of refreshing immediately.

use std::sync::Arc;
use std::time::Duration;

use bc_auth::{NEXT_REFRESH_DELAY_KEY, OAuth2Client, TokenStore};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::metrics;
use crate::policy::RetryPolicy;
use crate::state::{RefreshAction, RefreshEvent, RefreshState, handle_event};

/// Name of the recurring refresh job, used in logs.
pub const JOB_NAME: &str = "oauth2-access-token-generation";

/// Refresh this long before the token expires.
pub const SAFETY_MARGIN: Duration = Duration::from_secs(10);

/// Lower bound for any re-arm delay; also the delay when nothing is persisted.
pub const MIN_DELAY: Duration = Duration::from_secs(1);

/// Delay until the refresh following a token valid for `expires_in` seconds.
pub fn next_delay(expires_in: u64) -> Duration {
    Duration::from_secs(expires_in.saturating_sub(SAFETY_MARGIN.as_secs())).max(MIN_DELAY)
}

/// Delay before the first firing of a (re)started scheduler.
///
/// The persisted entry is written with TTL equal to the delay it holds, so
/// its remaining lifetime is the time left until the refresh that was due.
/// That is used first, rounded up to whole seconds. The stored number is
/// only read when the store cannot report a remaining lifetime. Absent or
/// unreadable entries fall back to [`MIN_DELAY`].
pub async fn initial_delay(store: &dyn TokenStore) -> Result<Duration> {
    let Some(cached) = store.get(NEXT_REFRESH_DELAY_KEY).await? else {
        return Ok(MIN_DELAY);
    };
    if let Some(remaining) = cached.expires_in {
        let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
        return Ok(Duration::from_secs(secs).max(MIN_DELAY));
    }
    match cached.value.trim().parse::<u64>() {
        Ok(secs) => Ok(Duration::from_secs(secs).max(MIN_DELAY)),
        Err(_) => {
            warn!(value = %cached.value, "ignoring unreadable refresh delay");
            Ok(MIN_DELAY)
        }
    }
}

pub struct TokenRefreshScheduler {
    client: Arc<OAuth2Client>,
    policy: RetryPolicy,
}

impl TokenRefreshScheduler {
    pub fn new(client: Arc<OAuth2Client>) -> Self {
        Self {
            client,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Read the persisted delay and spawn the refresh task. The returned
    /// handle already reports the armed first firing.
    pub async fn start(self) -> Result<RefreshHandle> {
        let delay = initial_delay(self.client.store().as_ref()).await?;
        let (state, action) = handle_event(
            RefreshState::default(),
            RefreshEvent::Start { delay },
            &self.policy,
        );
        let (state_tx, state_rx) = watch::channel(state.clone());
        let (stop_tx, stop_rx) = watch::channel(false);

        info!(
            job = JOB_NAME,
            delay_secs = delay.as_secs(),
            max_attempts = self.policy.max_attempts,
            "starting token refresh scheduler"
        );
        let task = tokio::spawn(run(
            self.client,
            self.policy,
            (state, action),
            state_tx,
            stop_rx,
        ));

        Ok(RefreshHandle {
            state: state_rx,
            stop: stop_tx,
            task,
        })
    }
}

/// Control handle for a running scheduler. Dropping it stops the scheduler.
pub struct RefreshHandle {
    state: watch::Receiver<RefreshState>,
    stop: watch::Sender<bool>,
    task: JoinHandle<Result<()>>,
}

impl RefreshHandle {
    /// Current scheduler state.
    pub fn state(&self) -> RefreshState {
        self.state.borrow().clone()
    }

    /// Receiver for state changes.
    pub fn subscribe(&self) -> watch::Receiver<RefreshState> {
        self.state.clone()
    }

    /// Ask the task to halt. A refresh already in flight completes and is
    /// persisted first.
    pub fn stop(&self) {
        let _ = self.stop.send(true);
    }

    /// Wait for the task to end. Errors if the retry budget was exhausted.
    pub async fn join(self) -> Result<()> {
        let RefreshHandle { task, stop, .. } = self;
        let result = task.await.map_err(|e| Error::Task(e.to_string()))?;
        drop(stop);
        result
    }
}

async fn run(
    client: Arc<OAuth2Client>,
    policy: RetryPolicy,
    (mut state, mut action): (RefreshState, RefreshAction),
    state_tx: watch::Sender<RefreshState>,
    mut stop_rx: watch::Receiver<bool>,
) -> Result<()> {
    loop {
        let event = match action {
            RefreshAction::Arm { delay } => {
                debug!(job = JOB_NAME, delay_secs = delay.as_secs(), "armed");
                tokio::select! {
                    _ = tokio::time::sleep(delay) => RefreshEvent::Timer,
                    _ = stop_rx.changed() => RefreshEvent::Stop,
                }
            }
            RefreshAction::Fire => {
                let attempt = match state {
                    RefreshState::Firing { attempt } => attempt,
                    _ => 1,
                };
                // Runs to completion since the token write is delete-then-set.
                // A pending stop is picked up by the next Arm.
                match fire(&client).await {
                    Ok(next_delay) => {
                        metrics::record_refresh("success");
                        info!(job = JOB_NAME, attempt, next_delay_secs = next_delay.as_secs(), "access token refreshed");
                        RefreshEvent::FireSucceeded { next_delay }
                    }
                    Err(e) => {
                        metrics::record_refresh("failure");
                        warn!(job = JOB_NAME, attempt, error = %e, "token refresh failed");
                        RefreshEvent::FireFailed { error: e.to_string() }
                    }
                }
            }
            RefreshAction::Halt | RefreshAction::None => break,
        };

        (state, action) = handle_event(state, event, &policy);
        state_tx.send_replace(state.clone());
    }

    match state {
        RefreshState::Idle {
            last_error: Some(last_error),
        } => {
            metrics::record_refresh("exhausted");
            error!(job = JOB_NAME, attempts = policy.max_attempts, error = %last_error, "token refresh retries exhausted");
            Err(Error::RetriesExhausted {
                attempts: policy.max_attempts,
                last_error,
            })
        }
        _ => {
            info!(job = JOB_NAME, "token refresh scheduler stopped");
            Ok(())
        }
    }
}

/// One firing: fetch, persist the next delay, report it.
async fn fire(client: &OAuth2Client) -> Result<Duration> {
    let token = client.fetch_token().await?;
    let delay = next_delay(token.expires_in);
    client
        .store()
        .set(NEXT_REFRESH_DELAY_KEY, delay.as_secs().to_string(), delay)
        .await?;
    Ok(delay)
}
