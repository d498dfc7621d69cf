//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with all handlers
//! - Wire up middleware (request ID, tracing, error reporting, timeout,
//!   body guard, per class rate limits)
//! - Bind server to listener
//! - Swap in reloaded configuration without dropping rate windows

use arc_swap::ArcSwap;
use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderName, HeaderValue},
    middleware,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, watch};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};

use crate::config::GuardConfig;
use crate::http::handlers;
use crate::http::middleware::{
    body_guard, enforce_rate_limit, report_errors, require_admin, request_timeout, ClassState,
};
use crate::http::request::X_REQUEST_ID;
use crate::security::audit::{AuditSink, TracingAuditSink};
use crate::security::pipeline::DefensePipeline;
use crate::security::rate_limit::{
    spawn_sweeper, Clock, EndpointClass, InMemoryStore, RateLimitStore, SweepSettings,
    SystemClock,
};
use crate::upstream::{UpstreamClient, UpstreamError};

/// Everything built from one configuration snapshot.
pub struct AppInner {
    pub config: GuardConfig,
    pub pipeline: DefensePipeline,
    pub upstream: UpstreamClient,
}

/// Application state injected into handlers and middleware.
///
/// The window store, clock and audit sink live outside the swapped snapshot so
/// rate windows survive config reloads.
#[derive(Clone)]
pub struct AppState {
    pub inner: Arc<ArcSwap<AppInner>>,
    store: Arc<dyn RateLimitStore>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn AuditSink>,
}

impl AppState {
    pub fn new(
        config: GuardConfig,
        store: Arc<dyn RateLimitStore>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn AuditSink>,
    ) -> Result<Self, UpstreamError> {
        let inner = build_inner(config, &store, &clock, &sink)?;
        Ok(Self {
            inner: Arc::new(ArcSwap::from_pointee(inner)),
            store,
            clock,
            sink,
        })
    }

    /// Current configuration snapshot.
    pub fn current(&self) -> Arc<AppInner> {
        self.inner.load_full()
    }

    pub fn store(&self) -> &Arc<dyn RateLimitStore> {
        &self.store
    }

    /// Rebuild the pipeline and upstream client from `config` and swap them in.
    pub fn reload(&self, config: GuardConfig) -> Result<(), UpstreamError> {
        let inner = build_inner(config, &self.store, &self.clock, &self.sink)?;
        self.inner.store(Arc::new(inner));
        Ok(())
    }
}

fn build_inner(
    config: GuardConfig,
    store: &Arc<dyn RateLimitStore>,
    clock: &Arc<dyn Clock>,
    sink: &Arc<dyn AuditSink>,
) -> Result<AppInner, UpstreamError> {
    let pipeline = DefensePipeline::from_config(&config, store.clone(), clock.clone(), sink.clone());
    let upstream = UpstreamClient::new(&config.upstream)?;
    Ok(AppInner {
        config,
        pipeline,
        upstream,
    })
}

/// HTTP server for the request guard.
pub struct GuardServer {
    state: AppState,
    router: Router,
}

impl GuardServer {
    /// Create a server with the in-memory window store, the system clock and
    /// the tracing audit sink.
    pub fn new(config: GuardConfig) -> Result<Self, UpstreamError> {
        let sink = Arc::new(TracingAuditSink::new(config.observability.audit_min_severity));
        Self::with_components(config, Arc::new(InMemoryStore::new()), Arc::new(SystemClock), sink)
    }

    pub fn with_components(
        config: GuardConfig,
        store: Arc<dyn RateLimitStore>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn AuditSink>,
    ) -> Result<Self, UpstreamError> {
        let max_body_bytes = config.limits.max_body_bytes;
        let state = AppState::new(config, store, clock, sink)?;
        let router = build_router(state.clone(), max_body_bytes);
        Ok(Self { state, router })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// The fully layered router, for driving with `oneshot` in tests.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Run the server, accepting connections on the given listener.
    ///
    /// Validated configs arriving on `config_updates` are swapped in live.
    pub async fn run(
        self,
        listener: TcpListener,
        mut config_updates: mpsc::UnboundedReceiver<GuardConfig>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let (sweep_tx, sweep_rx) = watch::channel(SweepSettings::from_config(
            &self.state.current().config.rate_limit,
        ));
        let sweeper = spawn_sweeper(
            self.state.store.clone(),
            self.state.clock.clone(),
            sweep_rx,
            shutdown.resubscribe(),
        );

        let state = self.state.clone();
        tokio::spawn(async move {
            while let Some(config) = config_updates.recv().await {
                let sweep = SweepSettings::from_config(&config.rate_limit);
                match state.reload(config) {
                    Ok(()) => {
                        sweep_tx.send_replace(sweep);
                        tracing::info!("Configuration reloaded");
                    }
                    Err(e) => tracing::error!(error = %e, "Failed to apply reloaded configuration"),
                }
            }
        });

        let app = self
            .router
            .into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("Shutdown signal received");
            })
            .await?;

        sweeper.abort();
        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Build the Axum router with all middleware layers.
///
/// Layers run outside in: request id, trace, error reporting, timeout, body
/// guard, then the per class rate limit on each route.
pub fn build_router(state: AppState, max_body_bytes: usize) -> Router {
    let limited = |class: EndpointClass| {
        middleware::from_fn_with_state(
            ClassState {
                app: state.clone(),
                class,
            },
            enforce_rate_limit,
        )
    };

    let chat = Router::new()
        .route("/api/chat", post(handlers::chat))
        .route_layer(limited(EndpointClass::Generative));

    let analysis = Router::new()
        .route("/api/analysis", post(handlers::analysis))
        .route_layer(limited(EndpointClass::Geospatial));

    let auth = Router::new()
        .route("/api/auth/verify", post(handlers::auth_verify))
        .route_layer(limited(EndpointClass::Auth));

    let admin = Router::new()
        .route("/admin/stats", get(handlers::admin_stats))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_admin))
        .route_layer(limited(EndpointClass::General));

    let x_request_id = HeaderName::from_static(X_REQUEST_ID);

    Router::new()
        .route("/health", get(handlers::health))
        .merge(chat)
        .merge(analysis)
        .merge(auth)
        .merge(admin)
        .with_state(state.clone())
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(middleware::from_fn_with_state(state.clone(), body_guard))
        .layer(middleware::from_fn_with_state(state.clone(), request_timeout))
        .layer(middleware::from_fn_with_state(state, report_errors))
        .layer(SetResponseHeaderLayer::overriding(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(PropagateRequestIdLayer::new(x_request_id.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(x_request_id, MakeRequestUuid))
}
