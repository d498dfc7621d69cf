//! Concurrent admission checks must never accept more than the limit.

use axum::http::StatusCode;
use serde_json::json;
use std::sync::Arc;
use tower::ServiceExt;

use field_guard::config::{ClassLimit, GuardConfig, RateLimitConfig};
use field_guard::security::audit::{MemoryAuditSink, RequestOrigin};
use field_guard::security::rate_limit::{
    EndpointClass, InMemoryStore, RateLimiter, SystemClock, WindowKey,
};

mod common;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_limiter_race_accepts_exactly_limit() {
    const LIMIT: u32 = 25;
    const REQUESTS: usize = 400;

    let config = RateLimitConfig {
        generative: ClassLimit {
            limit: LIMIT,
            window_secs: 3600,
            skip_successful: false,
        },
        ..RateLimitConfig::default()
    };
    let limiter = Arc::new(RateLimiter::new(
        config,
        Arc::new(InMemoryStore::new()),
        Arc::new(SystemClock),
        Arc::new(MemoryAuditSink::new()),
    ));

    let barrier = Arc::new(tokio::sync::Barrier::new(REQUESTS));
    let handles: Vec<_> = (0..REQUESTS)
        .map(|_| {
            let limiter = limiter.clone();
            let barrier = barrier.clone();
            tokio::spawn(async move {
                barrier.wait().await;
                let origin = RequestOrigin::new("192.0.2.10", "/api/chat");
                limiter.enforce(&origin, EndpointClass::Generative).is_ok()
            })
        })
        .collect();

    let mut accepted = 0;
    for handle in handles {
        if handle.await.unwrap() {
            accepted += 1;
        }
    }

    assert_eq!(accepted, LIMIT as usize);
    let window = limiter
        .store()
        .get(&WindowKey::new("192.0.2.10", EndpointClass::Generative))
        .unwrap();
    assert_eq!(window.count, LIMIT);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn test_router_race_on_auth_class() {
    const REQUESTS: usize = 60;

    let mut config = GuardConfig::default();
    config.auth.api_keys = vec!["field-key-0001".to_string()];
    config.rate_limit.auth = ClassLimit {
        limit: 5,
        window_secs: 900,
        skip_successful: true,
    };
    let t = common::test_server(config);
    let router = t.server.router();

    let handles: Vec<_> = (0..REQUESTS)
        .map(|_| {
            let router = router.clone();
            tokio::spawn(async move {
                let request = common::post_json(
                    "/api/auth/verify",
                    "192.0.2.20",
                    &json!({ "apiKey": "wrong" }),
                );
                router.oneshot(request).await.unwrap().status()
            })
        })
        .collect();

    let mut unauthorized = 0;
    let mut limited = 0;
    for handle in handles {
        match handle.await.unwrap() {
            StatusCode::UNAUTHORIZED => unauthorized += 1,
            StatusCode::TOO_MANY_REQUESTS => limited += 1,
            other => panic!("unexpected status {other}"),
        }
    }

    assert_eq!(unauthorized, 5);
    assert_eq!(limited, REQUESTS - 5);
}
