//! crates/quiz_core/src/rate_limiter.rs
//!
//! Rolling-window usage ledger for anonymous users.
//!
//! The ledger is a JSON array of epoch-millisecond timestamps stored in a single
//! named slot per anonymous client. Every read prunes entries older than the
//! window. Storage failures never block the user: reads fall back to an empty
//! ledger and writes are logged and dropped.

use crate::domain::Identity;
use crate::ports::KeyValueStore;
use std::sync::Arc;
use tracing::{debug, warn};

/// Slot prefix for the anonymous usage ledger.
pub const LEDGER_KEY: &str = "quiz_generation_usage";

/// Generations allowed per rolling window for anonymous identities.
pub const ANONYMOUS_DAILY_LIMIT: u32 = 5;

pub const WINDOW_MS: i64 = 24 * 60 * 60 * 1000;

/// Current wall-clock time in epoch milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn KeyValueStore>,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    fn ledger_slot(client_id: &str) -> String {
        format!("{}:{}", LEDGER_KEY, client_id)
    }

    /// Reads and prunes the ledger. Any read or parse failure yields an empty ledger.
    async fn load_ledger(&self, client_id: &str, now: i64) -> Vec<i64> {
        let slot = Self::ledger_slot(client_id);
        let raw = match self.store.read(&slot).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!("Could not read usage ledger '{}': {}", slot, e);
                return Vec::new();
            }
        };

        let entries: Vec<i64> = match serde_json::from_str(&raw) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Discarding malformed usage ledger '{}': {}", slot, e);
                return Vec::new();
            }
        };

        let cutoff = now - WINDOW_MS;
        entries.into_iter().filter(|&t| t > cutoff).collect()
    }

    /// Returns whether `identity` may start another generation.
    ///
    /// Never mutates the ledger; a successful generation must be followed by
    /// [`RateLimiter::record_usage`].
    pub async fn check_and_consume(&self, identity: &Identity, limit: u32, now: i64) -> bool {
        match identity {
            Identity::Authenticated { .. } => true,
            Identity::Anonymous { client_id } => {
                let used = self.load_ledger(client_id, now).await.len();
                let allowed = used < limit as usize;
                debug!(
                    "Quota check for '{}': {}/{} used, allowed={}",
                    client_id, used, limit, allowed
                );
                allowed
            }
        }
    }

    /// Appends `now` to the pruned ledger. Best effort: failures are only logged.
    pub async fn record_usage(&self, identity: &Identity, now: i64) {
        let Identity::Anonymous { client_id } = identity else {
            return;
        };

        let mut ledger = self.load_ledger(client_id, now).await;
        ledger.push(now);

        let slot = Self::ledger_slot(client_id);
        let serialized = match serde_json::to_string(&ledger) {
            Ok(serialized) => serialized,
            Err(e) => {
                warn!("Could not serialize usage ledger '{}': {}", slot, e);
                return;
            }
        };
        if let Err(e) = self.store.write(&slot, &serialized).await {
            warn!("Could not persist usage ledger '{}': {}", slot, e);
        }
    }

    /// Generations left in the current window, or `None` when unlimited.
    pub async fn remaining(&self, identity: &Identity, limit: u32, now: i64) -> Option<u32> {
        match identity {
            Identity::Authenticated { .. } => None,
            Identity::Anonymous { client_id } => {
                let used = self.load_ledger(client_id, now).await.len() as u32;
                Some(limit.saturating_sub(used))
            }
        }
    }
}
