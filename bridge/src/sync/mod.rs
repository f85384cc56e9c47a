//! Polling and reconciliation core
//!
//! - `supervisor`: one long-running loop per user, restart-on-error
//! - `poll_cycle`: authenticate, reconcile, fetch-and-deliver with backoff
//! - `reconcile`: retract notifications for messages gone from the inbox
//!
//! The core only sees the traits in `crate::backend`, so it is exercised in
//! tests against in-memory fakes.

mod pacing;
pub mod poll_cycle;
pub mod reconcile;
pub mod supervisor;

use std::time::Duration;

use tracing::debug;

use crate::backend::Notifier;
use crate::types::ChatId;

pub use pacing::{backoff_delay, pause};
pub use poll_cycle::PollCycle;
pub use reconcile::{ReconcileReport, SyncEngine};
pub use supervisor::PollSupervisor;

/// Sent when stored tokens are rejected
pub const REAUTH_NOTICE: &str =
    "⚠️ Gmail access was revoked or expired. Send /connect to re-authorize the bridge.";

/// Sent when a cycle fails unexpectedly
pub const RETRY_NOTICE: &str =
    "⚠️ Could not check your inbox right now, will retry shortly.";

/// Tunables for a poll cycle
#[derive(Debug, Clone)]
pub struct CycleSettings {
    /// Number of recent inbox messages fetched per cycle
    pub fetch_window: usize,
    /// Total fetch attempts before giving up on a cycle
    pub fetch_attempts: u32,
    /// Number of most recent tracked messages verified per cycle
    pub reconcile_window: usize,
    /// Delay between two deliveries of one batch
    pub delivery_gap: Duration,
    /// Delay after each confirmed retraction
    pub retraction_gap: Duration,
}

impl Default for CycleSettings {
    fn default() -> Self {
        Self {
            fetch_window: 10,
            fetch_attempts: 3,
            reconcile_window: 20,
            delivery_gap: Duration::from_millis(500),
            retraction_gap: Duration::from_millis(200),
        }
    }
}

/// Send a text notification and swallow any failure
pub(crate) async fn notify_best_effort(notifier: &dyn Notifier, chat_id: ChatId, text: &str) {
    if let Err(e) = notifier.notify_text(chat_id, text).await {
        debug!(chat_id = %chat_id, "Best-effort notification failed: {}", e);
    }
}
