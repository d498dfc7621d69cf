//! Fixed-window rate limiting per client and endpoint class.
//!
//! Every endpoint belongs to one [`EndpointClass`]; each class carries its own
//! limit and window length. Windows are keyed by `(client, class)` so a
//! client exhausting one class can still use the others.

mod store;

pub use store::{InMemoryStore, Increment, RateLimitStore, RateWindow, WindowKey};

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

use crate::config::{ClassLimit, RateLimitConfig};
use crate::observability::metrics;
use crate::security::audit::{AuditSink, EventSeverity, RequestOrigin, SecurityEvent};
use crate::security::error::{DefenseError, DefenseResult, ErrorSeverity};

/// Endpoint class used to pick a rate limit policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointClass {
    /// Calls proxied to the generative-text backend.
    Generative,
    /// Calls proxied to the geospatial backend.
    Geospatial,
    /// Authentication attempts.
    Auth,
    /// Everything else.
    General,
}

impl EndpointClass {
    pub const ALL: [EndpointClass; 4] = [
        EndpointClass::Generative,
        EndpointClass::Geospatial,
        EndpointClass::Auth,
        EndpointClass::General,
    ];

    /// Suffix of the `RATE_LIMIT_*` error code.
    pub const fn code_suffix(self) -> &'static str {
        match self {
            Self::Generative => "GENERATIVE",
            Self::Geospatial => "GEOSPATIAL",
            Self::Auth => "AUTH",
            Self::General => "GENERAL",
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Generative => "generative",
            Self::Geospatial => "geospatial",
            Self::Auth => "auth",
            Self::General => "general",
        }
    }
}

impl fmt::Display for EndpointClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Time source for window arithmetic.
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    base: Instant,
    offset: Mutex<Duration>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut offset) = self.offset.lock() {
            *offset += by;
        }
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = self.offset.lock().map(|o| *o).unwrap_or_default();
        self.base + offset
    }
}

/// Result of admitting one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub accepted: bool,
    /// Time until the window resets. Zero when accepted.
    pub retry_after: Duration,
    /// Start of the window the request was counted in.
    pub window_start: Instant,
}

/// Fixed-window limiter over an injectable store and clock.
pub struct RateLimiter {
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
    config: RateLimitConfig,
    sink: Arc<dyn AuditSink>,
}

impl RateLimiter {
    pub fn new(
        config: RateLimitConfig,
        store: Arc<dyn RateLimitStore>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            store,
            clock,
            config,
            sink,
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn policy(&self, class: EndpointClass) -> ClassLimit {
        self.config.policy(class)
    }

    pub fn store(&self) -> &Arc<dyn RateLimitStore> {
        &self.store
    }

    /// Count one request against `key` and decide whether it may proceed.
    pub fn admit(&self, key: &WindowKey) -> Admission {
        let policy = self.policy(key.class);
        let now = self.clock.now();
        let result = self.store.increment(key, policy.limit, policy.window(), now);
        let retry_after = if result.accepted {
            Duration::ZERO
        } else {
            result.window.remaining(now)
        };
        Admission {
            accepted: result.accepted,
            retry_after,
            window_start: result.window.window_start,
        }
    }

    /// Admit a request from `origin`, producing a rate limit error on rejection.
    ///
    /// Disabled limiting always admits without touching the store.
    pub fn enforce(&self, origin: &RequestOrigin, class: EndpointClass) -> DefenseResult<Admission> {
        if !self.config.enabled {
            return Ok(Admission {
                accepted: true,
                retry_after: Duration::ZERO,
                window_start: self.clock.now(),
            });
        }

        let key = WindowKey::new(origin.client.clone(), class);
        let admission = self.admit(&key);
        if admission.accepted {
            return Ok(admission);
        }

        let severity = match class {
            EndpointClass::Auth => ErrorSeverity::High,
            _ => ErrorSeverity::Low,
        };
        let policy = self.policy(class);
        tracing::debug!(
            client = %origin.client,
            class = %class,
            retry_after_ms = admission.retry_after.as_millis() as u64,
            "Rate limit exceeded"
        );
        metrics::record_rate_limited(class);
        self.sink.record(SecurityEvent::new(
            "rate_limit_exceeded",
            EventSeverity::from(severity),
            origin,
            json!({
                "class": class.as_str(),
                "limit": policy.limit,
                "windowSecs": policy.window_secs,
                "retryAfterMs": admission.retry_after.as_millis() as u64,
            }),
        ));

        Err(DefenseError::rate_limited(class.code_suffix(), admission.retry_after)
            .with_severity(severity))
    }

    /// Return the slot taken by a successful request when its class
    /// skips successful requests.
    pub fn refund(&self, origin: &RequestOrigin, class: EndpointClass, admission: &Admission) {
        if !self.config.enabled || !self.policy(class).skip_successful {
            return;
        }
        let key = WindowKey::new(origin.client.clone(), class);
        self.store.decrement(&key, admission.window_start);
    }

    /// Evict idle windows now. Returns the number removed.
    pub fn sweep(&self) -> usize {
        sweep_store(
            self.store.as_ref(),
            self.clock.as_ref(),
            Duration::from_secs(self.config.idle_eviction_secs),
        )
    }
}

fn sweep_store(store: &dyn RateLimitStore, clock: &dyn Clock, idle: Duration) -> usize {
    let removed = store.evict_idle(clock.now(), idle);
    metrics::record_window_count(store.len());
    if removed > 0 {
        tracing::debug!(removed, remaining = store.len(), "Evicted idle rate windows");
    }
    removed
}

/// Sweeper timing taken from [`RateLimitConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepSettings {
    pub interval: Duration,
    pub idle: Duration,
}

impl SweepSettings {
    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.sweep_interval_secs),
            idle: Duration::from_secs(config.idle_eviction_secs),
        }
    }
}

/// Periodically evict idle windows until shutdown is signalled.
///
/// New values on `settings` take effect immediately; the ticker restarts
/// with the new interval.
pub fn spawn_sweeper(
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
    mut settings: watch::Receiver<SweepSettings>,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut current = *settings.borrow_and_update();
        let mut watching = true;
        let mut ticker = tokio::time::interval(current.interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    sweep_store(store.as_ref(), clock.as_ref(), current.idle);
                }
                changed = settings.changed(), if watching => {
                    if changed.is_err() {
                        // sender gone, keep the last settings
                        watching = false;
                        continue;
                    }
                    let next = *settings.borrow_and_update();
                    if next.interval != current.interval {
                        ticker = tokio::time::interval(next.interval);
                        ticker.tick().await;
                    }
                    tracing::debug!(
                        interval_secs = next.interval.as_secs(),
                        idle_secs = next.idle.as_secs(),
                        "Rate window sweeper settings updated"
                    );
                    current = next;
                }
                _ = shutdown.recv() => {
                    tracing::debug!("Rate window sweeper stopping");
                    break;
                }
            }
        }
    })
}
