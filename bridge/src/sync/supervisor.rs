//! Long-running per-user polling loop

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use super::{notify_best_effort, pause, PollCycle, RETRY_NOTICE};
use crate::backend::Notifier;
use crate::types::error::{BridgeError, Result};
use crate::types::{CycleOutcome, UserSession};

/// Delay before retrying after a failed cycle
pub const FALLBACK_DELAY: Duration = Duration::from_secs(30);

pub struct PollSupervisor {
    cycle: Arc<PollCycle>,
    notifier: Arc<dyn Notifier>,
    fallback_delay: Duration,
}

impl PollSupervisor {
    pub fn new(cycle: Arc<PollCycle>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            cycle,
            notifier,
            fallback_delay: FALLBACK_DELAY,
        }
    }

    pub fn with_fallback_delay(mut self, delay: Duration) -> Self {
        self.fallback_delay = delay;
        self
    }

    /// Poll `session` until `cancel` fires.
    ///
    /// A flagged session is not polled at all; the loop just keeps sleeping
    /// until someone clears the flag.
    pub async fn run(&self, session: UserSession, poll_interval: Duration, cancel: CancellationToken) {
        let chat_id = session.chat_id();
        info!(chat_id = %chat_id, interval_secs = poll_interval.as_secs(), "Polling started");

        loop {
            let delay = if session.auth_failed() {
                debug!(chat_id = %chat_id, "Authentication pending, skipping cycle");
                poll_interval
            } else {
                match self.run_cycle(&session, &cancel).await {
                    Ok(_) => poll_interval,
                    Err(BridgeError::Cancelled) => break,
                    Err(e) => {
                        error!(chat_id = %chat_id, "Poll cycle failed: {}", e);
                        notify_best_effort(self.notifier.as_ref(), chat_id, RETRY_NOTICE).await;
                        self.fallback_delay
                    }
                }
            };

            if pause(&cancel, delay).await.is_err() {
                break;
            }
        }

        info!(chat_id = %chat_id, "Polling stopped");
    }

    /// Run one cycle on its own task so a panic inside a collaborator is
    /// reported like any other failed cycle instead of ending the loop.
    async fn run_cycle(&self, session: &UserSession, cancel: &CancellationToken) -> Result<CycleOutcome> {
        let cycle = self.cycle.clone();
        let session = session.clone();
        let cancel = cancel.clone();

        match tokio::spawn(async move { cycle.execute(&session, &cancel).await }).await {
            Ok(result) => result,
            Err(e) if e.is_panic() => Err(BridgeError::Other(format!("poll cycle panicked: {}", e))),
            Err(_) => Err(BridgeError::Cancelled),
        }
    }

    /// Resume polling for a session that was flagged. Returns true if the
    /// flag was set.
    pub fn clear_auth_failure(&self, session: &UserSession) -> bool {
        let cleared = session.clear_auth_failed();
        if cleared {
            info!(chat_id = %session.chat_id(), "Authentication failure cleared");
        }
        cleared
    }
}
