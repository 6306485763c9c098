//! Pending Discord connect attempts.
//!
//! `/start` issues an opaque state value bound to the dashboard user; the
//! callback redeems it exactly once. A state past its deadline redeems to
//! nothing, and the purge task drops unredeemed ones.

use crate::rate_limit::MAX_WINDOW_SECONDS;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use uuid::Uuid;

/// A connect attempt waiting for Discord's callback.
#[derive(Clone, Debug)]
pub struct PendingConnect {
    pub user_id: String,
    pub expires_at: DateTime<Utc>,
}

impl PendingConnect {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        now <= self.expires_at
    }
}

/// Single-use state values for the connect flow, keyed by the state string.
#[derive(Clone)]
pub struct ConnectStates {
    pending: Arc<DashMap<String, PendingConnect>>,
    ttl: Duration,
}

impl ConnectStates {
    pub fn new(ttl_seconds: i64) -> Self {
        Self {
            pending: Arc::new(DashMap::new()),
            ttl: Duration::seconds(ttl_seconds.clamp(1, MAX_WINDOW_SECONDS)),
        }
    }

    /// Binds a fresh state value to `user_id`.
    pub fn issue(&self, user_id: &str) -> String {
        let state = Uuid::new_v4().simple().to_string();
        self.pending.insert(
            state.clone(),
            PendingConnect {
                user_id: user_id.to_string(),
                expires_at: Utc::now() + self.ttl,
            },
        );
        state
    }

    /// Takes the attempt out; a second redeem of the same state gets `None`.
    pub fn redeem(&self, state: &str) -> Option<PendingConnect> {
        self.pending
            .remove(state)
            .map(|(_, pending)| pending)
            .filter(|pending| pending.is_live(Utc::now()))
    }

    /// Drops attempts past their deadline, returning how many went.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.pending.len();
        self.pending.retain(|_, pending| pending.is_live(now));
        before.saturating_sub(self.pending.len())
    }

    pub fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Purges abandoned connect attempts every `interval_seconds`.
pub async fn run_state_purge(states: ConnectStates, interval_seconds: u64) {
    let period = tokio::time::Duration::from_secs(interval_seconds.max(1));
    let mut ticker = tokio::time::interval(period);

    loop {
        ticker.tick().await;
        let purged = states.purge_expired();
        if purged > 0 {
            tracing::debug!(purged, pending = states.pending(), "Expired connect states purged");
        }
    }
}
