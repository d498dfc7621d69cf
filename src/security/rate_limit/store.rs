//! Window storage for the fixed-window rate limiter.
//!
//! The limiter never owns its state: it is handed a [`RateLimitStore`] so the
//! table can be shared across config reloads and replaced in tests.

use dashmap::{mapref::entry::Entry, DashMap};
use std::time::{Duration, Instant};

use super::EndpointClass;

/// Identity of one window: a client within one endpoint class.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowKey {
    pub client: String,
    pub class: EndpointClass,
}

impl WindowKey {
    pub fn new(client: impl Into<String>, class: EndpointClass) -> Self {
        Self {
            client: client.into(),
            class,
        }
    }
}

/// Counter state for one `(client, class)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateWindow {
    pub key: String,
    pub window_start: Instant,
    pub count: u32,
    pub limit: u32,
    pub window_size: Duration,
    pub last_seen: Instant,
}

impl RateWindow {
    fn start(key: &WindowKey, limit: u32, window_size: Duration, now: Instant) -> Self {
        Self {
            key: key.client.clone(),
            window_start: now,
            count: 1,
            limit,
            window_size,
            last_seen: now,
        }
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.window_start) >= self.window_size
    }

    /// Time left until this window resets.
    pub fn remaining(&self, now: Instant) -> Duration {
        (self.window_start + self.window_size).saturating_duration_since(now)
    }
}

/// Outcome of one atomic check-and-increment.
#[derive(Debug, Clone)]
pub struct Increment {
    pub accepted: bool,
    /// Window state right after the decision.
    pub window: RateWindow,
}

/// Storage for rate windows.
///
/// `increment` must read and update a window as one atomic step: two callers
/// racing for the last slot can never both be accepted.
pub trait RateLimitStore: Send + Sync {
    fn get(&self, key: &WindowKey) -> Option<RateWindow>;

    /// Start a new window if none exists or the current one expired,
    /// otherwise count the request if it is below `limit`.
    fn increment(&self, key: &WindowKey, limit: u32, window: Duration, now: Instant) -> Increment;

    /// Give back one slot of the window that started at `window_start`.
    /// No-op when that window has since been replaced.
    fn decrement(&self, key: &WindowKey, window_start: Instant);

    fn reset(&self, key: &WindowKey);

    /// Drop windows that have expired and were not touched for `idle`.
    /// A live window is never evicted. Returns how many were removed.
    fn evict_idle(&self, now: Instant, idle: Duration) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// In-process store. Each entry update runs under its shard's write lock.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    windows: DashMap<WindowKey, RateWindow>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RateLimitStore for InMemoryStore {
    fn get(&self, key: &WindowKey) -> Option<RateWindow> {
        self.windows.get(key).map(|r| r.value().clone())
    }

    fn increment(&self, key: &WindowKey, limit: u32, window: Duration, now: Instant) -> Increment {
        let mut entry = match self.windows.entry(key.clone()) {
            Entry::Vacant(vacant) => {
                let fresh = RateWindow::start(key, limit, window, now);
                vacant.insert(fresh.clone());
                return Increment {
                    accepted: true,
                    window: fresh,
                };
            }
            Entry::Occupied(occupied) => occupied,
        };
        let current = entry.get_mut();

        if current.is_expired(now) {
            *current = RateWindow::start(key, limit, window, now);
            return Increment {
                accepted: true,
                window: current.clone(),
            };
        }

        current.last_seen = now;
        current.limit = limit;
        let accepted = current.count < limit;
        if accepted {
            current.count += 1;
        }
        Increment {
            accepted,
            window: current.clone(),
        }
    }

    fn decrement(&self, key: &WindowKey, window_start: Instant) {
        if let Some(mut window) = self.windows.get_mut(key) {
            if window.window_start == window_start && window.count > 0 {
                window.count -= 1;
            }
        }
    }

    fn reset(&self, key: &WindowKey) {
        self.windows.remove(key);
    }

    fn evict_idle(&self, now: Instant, idle: Duration) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, window| {
            !(window.is_expired(now) && now.saturating_duration_since(window.last_seen) >= idle)
        });
        before.saturating_sub(self.windows.len())
    }

    fn len(&self) -> usize {
        self.windows.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINUTE: Duration = Duration::from_secs(60);

    #[test]
    fn test_first_request_opens_window() {
        let store = InMemoryStore::new();
        let key = WindowKey::new("10.0.0.1", EndpointClass::General);
        let now = Instant::now();

        let result = store.increment(&key, 3, MINUTE, now);
        assert!(result.accepted);
        assert_eq!(result.window.count, 1);
        assert_eq!(result.window.window_start, now);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_limit_reached() {
        let store = InMemoryStore::new();
        let key = WindowKey::new("10.0.0.1", EndpointClass::General);
        let now = Instant::now();

        let accepted: Vec<bool> = (0..4)
            .map(|_| store.increment(&key, 3, MINUTE, now).accepted)
            .collect();
        assert_eq!(accepted, vec![true, true, true, false]);
        assert_eq!(store.get(&key).unwrap().count, 3);
    }

    #[test]
    fn test_expired_window_restarts() {
        let store = InMemoryStore::new();
        let key = WindowKey::new("10.0.0.1", EndpointClass::Auth);
        let start = Instant::now();

        store.increment(&key, 1, MINUTE, start);
        assert!(!store.increment(&key, 1, MINUTE, start + Duration::from_secs(59)).accepted);

        let later = start + MINUTE;
        let result = store.increment(&key, 1, MINUTE, later);
        assert!(result.accepted);
        assert_eq!(result.window.window_start, later);
        assert_eq!(result.window.count, 1);
    }

    #[test]
    fn test_decrement_only_touches_same_window() {
        let store = InMemoryStore::new();
        let key = WindowKey::new("c", EndpointClass::Auth);
        let start = Instant::now();

        let first = store.increment(&key, 5, MINUTE, start);
        store.increment(&key, 5, MINUTE, start);
        store.decrement(&key, first.window.window_start);
        assert_eq!(store.get(&key).unwrap().count, 1);

        // a stale window start leaves the counter alone
        store.decrement(&key, start + Duration::from_secs(1));
        assert_eq!(store.get(&key).unwrap().count, 1);
    }

    #[test]
    fn test_reset_and_evict() {
        let store = InMemoryStore::new();
        let now = Instant::now();
        let a = WindowKey::new("a", EndpointClass::General);
        let b = WindowKey::new("b", EndpointClass::General);

        store.increment(&a, 5, MINUTE, now);
        store.increment(&b, 5, MINUTE, now + Duration::from_secs(100));
        store.reset(&a);
        assert!(store.get(&a).is_none());

        store.increment(&a, 5, MINUTE, now);
        let removed = store.evict_idle(now + Duration::from_secs(150), Duration::from_secs(120));
        assert_eq!(removed, 1);
        assert!(store.get(&a).is_none());
        assert!(store.get(&b).is_some());
    }

    #[test]
    fn test_idle_live_window_is_kept() {
        let store = InMemoryStore::new();
        let key = WindowKey::new("c", EndpointClass::Auth);
        let start = Instant::now();
        let window = Duration::from_secs(900);

        for _ in 0..5 {
            store.increment(&key, 5, window, start);
        }
        let removed = store.evict_idle(start + Duration::from_secs(61), MINUTE);
        assert_eq!(removed, 0);
        assert_eq!(store.get(&key).unwrap().count, 5);

        assert_eq!(store.evict_idle(start + window, MINUTE), 1);
        assert!(store.is_empty());
    }

    #[test]
    fn test_remaining_time() {
        let now = Instant::now();
        let key = WindowKey::new("c", EndpointClass::General);
        let window = RateWindow::start(&key, 1, MINUTE, now);
        assert_eq!(window.remaining(now + Duration::from_secs(15)), Duration::from_secs(45));
        assert_eq!(window.remaining(now + Duration::from_secs(90)), Duration::ZERO);
    }
}
