//! Window storage for the request throttle.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

/// Request count for one client within the current window.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateWindow {
    pub client_key: String,
    pub count: u32,
    pub window_reset_at: DateTime<Utc>,
}

impl RateWindow {
    fn start(client_key: &str, now: DateTime<Utc>, window: Duration) -> Self {
        Self {
            client_key: client_key.to_string(),
            count: 1,
            window_reset_at: now + window,
        }
    }

    /// A window is over once the clock has passed its reset time.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.window_reset_at
    }
}

/// Backend holding rate windows.
///
/// `hit` must be atomic per key: concurrent hits on one key may not lose
/// increments or both start a new window.
#[async_trait]
pub trait RateLimiterStore: Send + Sync {
    /// Records one request and returns the window as it stands afterwards.
    /// Starts a fresh window (count 1) if none exists or the old one expired.
    async fn hit(&self, client_key: &str, now: DateTime<Utc>, window: Duration) -> RateWindow;

    /// Removes expired windows, returning how many were dropped.
    async fn sweep(&self, now: DateTime<Utc>) -> usize;

    async fn get(&self, client_key: &str) -> Option<RateWindow>;

    async fn len(&self) -> usize;
}

/// Process-local window store. Not shared between instances.
#[derive(Default)]
pub struct InMemoryRateLimiterStore {
    windows: DashMap<String, RateWindow>,
}

impl InMemoryRateLimiterStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RateLimiterStore for InMemoryRateLimiterStore {
    async fn hit(&self, client_key: &str, now: DateTime<Utc>, window: Duration) -> RateWindow {
        // The entry holds the shard lock, making check-and-increment atomic
        match self.windows.entry(client_key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get_mut();
                if current.is_expired(now) {
                    *current = RateWindow::start(client_key, now, window);
                } else {
                    current.count = current.count.saturating_add(1);
                }
                current.clone()
            }
            Entry::Vacant(vacant) => vacant
                .insert(RateWindow::start(client_key, now, window))
                .value()
                .clone(),
        }
    }

    async fn sweep(&self, now: DateTime<Utc>) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, window| !window.is_expired(now));
        before.saturating_sub(self.windows.len())
    }

    async fn get(&self, client_key: &str) -> Option<RateWindow> {
        self.windows.get(client_key).map(|w| w.value().clone())
    }

    async fn len(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_hit_starts_window() {
        let store = InMemoryRateLimiterStore::new();
        let now = Utc::now();

        let window = store.hit("k", now, Duration::seconds(60)).await;
        assert_eq!(window.count, 1);
        assert_eq!(window.window_reset_at, now + Duration::seconds(60));
        assert_eq!(window.client_key, "k");
    }

    #[tokio::test]
    async fn test_hits_increment_within_window() {
        let store = InMemoryRateLimiterStore::new();
        let now = Utc::now();

        store.hit("k", now, Duration::seconds(60)).await;
        store.hit("k", now, Duration::seconds(60)).await;
        let window = store.hit("k", now + Duration::seconds(59), Duration::seconds(60)).await;

        assert_eq!(window.count, 3);
        // Reset time is fixed by the first hit
        assert_eq!(window.window_reset_at, now + Duration::seconds(60));
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let store = InMemoryRateLimiterStore::new();
        let now = Utc::now();

        store.hit("old", now - Duration::seconds(120), Duration::seconds(60)).await;
        store.hit("older", now - Duration::seconds(600), Duration::seconds(60)).await;
        store.hit("fresh", now, Duration::seconds(60)).await;
        assert_eq!(store.len().await, 3);

        let removed = store.sweep(now).await;
        assert_eq!(removed, 2);
        assert_eq!(store.len().await, 1);
        assert!(store.get("old").await.is_none());
        assert!(store.get("older").await.is_none());
        assert!(store.get("fresh").await.is_some());
    }

    #[tokio::test]
    async fn test_concurrent_hits_are_not_lost() {
        let store = std::sync::Arc::new(InMemoryRateLimiterStore::new());
        let now = Utc::now();

        let tasks: Vec<_> = (0..50)
            .map(|_| {
                let store = std::sync::Arc::clone(&store);
                tokio::spawn(async move { store.hit("shared", now, Duration::seconds(60)).await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(store.get("shared").await.unwrap().count, 50);
    }
}
