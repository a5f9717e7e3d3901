//! Waiting for in-progress stacks to settle (exponential backoff)
//!
//! Polling is modelled as a small state machine: every observation of the
//! remote status moves the waiter to `Pending`, `Settled` or `TimedOut`.

use crate::error::{BackendError, Result};
use crate::provider::{PollConfig, StackBackend};
use crate::status::RemoteStatus;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::debug;

/// State of a poll loop after one observation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollState {
    /// Still transitioning; poll again after the backoff for `attempt`
    Pending { attempt: u32 },
    /// Reached a terminal status
    Settled(RemoteStatus),
    /// The overall bound elapsed while still in progress
    TimedOut,
}

/// Compute the next poll state from an observed status
pub fn next_state(
    observed: RemoteStatus,
    attempt: u32,
    elapsed: Duration,
    config: &PollConfig,
) -> PollState {
    if !observed.is_in_progress() {
        PollState::Settled(observed)
    } else if elapsed >= config.timeout {
        PollState::TimedOut
    } else {
        PollState::Pending {
            attempt: attempt + 1,
        }
    }
}

/// Poll a stack until it leaves the in-progress state
///
/// # Returns
/// * `Ok(RemoteStatus)` - the terminal status the stack settled in
/// * `Err(BackendError::Timeout)` - still in progress when `config.timeout` elapsed
pub async fn wait_for_settled(
    backend: &dyn StackBackend,
    stack_name: &str,
    config: &PollConfig,
) -> Result<RemoteStatus> {
    let started = Instant::now();
    let mut attempt = 0;

    loop {
        let observed = backend.describe_status(stack_name).await?;
        match next_state(observed, attempt, started.elapsed(), config) {
            PollState::Settled(status) => {
                debug!(stack = stack_name, status = %status, attempts = attempt + 1, "Stack settled");
                return Ok(status);
            }
            PollState::TimedOut => {
                return Err(BackendError::Timeout {
                    stack: stack_name.to_string(),
                    waited_secs: started.elapsed().as_secs(),
                });
            }
            PollState::Pending { attempt: next } => {
                let remaining = config.timeout.saturating_sub(started.elapsed());
                let delay = config.delay_for_attempt(attempt).min(remaining);
                debug!(
                    stack = stack_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Stack still in progress"
                );
                sleep(delay).await;
                attempt = next;
            }
        }
    }
}
