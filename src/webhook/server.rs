//! Admission Webhook Server
//!
//! HTTP shell around the [`Dispatcher`]. Health, readiness and metrics live
//! on fixed routes; every other path is an admission endpoint and is handed
//! to the dispatcher as is.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Uri};
use axum::{
    extract::{DefaultBodyLimit, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use axum_server::tls_rustls::RustlsConfig;
use axum_server::Handle;
use opentelemetry::{global, propagation::Extractor};
use serde::Serialize;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_opentelemetry::OpenTelemetrySpanExt;

use super::dispatch::Dispatcher;
use super::types::JSON_MIME;
use crate::error::{Error, Result};

/// Largest admission body accepted
pub const MAX_BODY_BYTES: usize = 8 * 1024 * 1024;

/// Paths the server answers itself; no webhook may be mounted on them
pub const RESERVED_PATHS: &[&str] = &["/healthz", "/readyz", "/metrics"];

/// Time in-flight requests get to finish after a shutdown signal
const SHUTDOWN_GRACE_PERIOD: Duration = Duration::from_secs(10);

struct HeaderExtractor<'a>(&'a HeaderMap);

impl<'a> Extractor for HeaderExtractor<'a> {
    fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v: &HeaderValue| v.to_str().ok())
    }
    fn keys(&self) -> Vec<&str> {
        self.0.keys().map(|k: &HeaderName| k.as_str()).collect()
    }
}

async fn extract_trace_context(request: Request, next: Next) -> Response {
    let parent_cx = global::get_text_map_propagator(|propagator| {
        propagator.extract(&HeaderExtractor(request.headers()))
    });
    tracing::Span::current().set_parent(parent_cx);
    next.run(request).await
}

/// Webhook server state
pub struct WebhookServer {
    dispatcher: Arc<Dispatcher>,

    /// TLS configuration
    tls_config: Option<TlsConfig>,
}

/// TLS configuration for the webhook server
#[derive(Clone, Debug)]
pub struct TlsConfig {
    pub cert_path: String,
    pub key_path: String,
}

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub webhooks: usize,
}

impl WebhookServer {
    /// Create a new webhook server
    ///
    /// Fails if a webhook is mounted on one of [`RESERVED_PATHS`], where the
    /// router would never hand it a request.
    pub fn new(dispatcher: Dispatcher) -> Result<Self> {
        if let Some(webhook) = dispatcher
            .registry()
            .iter()
            .find(|w| RESERVED_PATHS.contains(&w.path()))
        {
            return Err(Error::InvalidWebhookPath {
                path: webhook.path().to_string(),
                reason: "path is served by the webhook server itself",
            });
        }

        Ok(Self {
            dispatcher: Arc::new(dispatcher),
            tls_config: None,
        })
    }

    /// Configure TLS
    pub fn with_tls(mut self, cert_path: String, key_path: String) -> Self {
        self.tls_config = Some(TlsConfig {
            cert_path,
            key_path,
        });
        self
    }

    /// Build the HTTP router
    pub fn router(&self) -> Router {
        let router = Router::new()
            .route("/healthz", get(health_handler))
            .route("/readyz", get(ready_handler));

        #[cfg(feature = "metrics")]
        let router = router.route("/metrics", get(metrics_handler));

        router
            .fallback(admission_handler)
            .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
            .layer(middleware::from_fn(extract_trace_context))
            .layer(tower_http::trace::TraceLayer::new_for_http())
            .with_state(self.dispatcher.clone())
    }

    /// Serve until Ctrl-C or SIGTERM
    pub async fn start(self, addr: SocketAddr) -> Result<()> {
        let app = self.router();
        let handle = Handle::new();
        tokio::spawn(shutdown_on_signal(handle.clone()));

        match self.tls_config {
            Some(tls) => {
                let config = RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
                    .await
                    .map_err(|e| {
                        Error::ConfigError(format!(
                            "Failed to load TLS certificate {} / key {}: {e}",
                            tls.cert_path, tls.key_path
                        ))
                    })?;

                info!("Starting webhook server on {} with TLS", addr);
                axum_server::bind_rustls(addr, config)
                    .handle(handle)
                    .serve(app.into_make_service())
                    .await
                    .map_err(|e| Error::TransportFailed(format!("Server error on {addr}: {e}")))?;
            }
            None => {
                warn!(
                    "Starting webhook server on {} without TLS; the API server requires HTTPS",
                    addr
                );
                axum_server::bind(addr)
                    .handle(handle)
                    .serve(app.into_make_service())
                    .await
                    .map_err(|e| Error::TransportFailed(format!("Server error on {addr}: {e}")))?;
            }
        }

        info!("Webhook server stopped");
        Ok(())
    }
}

/// Wait for SIGINT or SIGTERM, then drain the server
async fn shutdown_on_signal(handle: Handle) {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!(
        "Received shutdown signal, draining for up to {}s",
        SHUTDOWN_GRACE_PERIOD.as_secs()
    );
    handle.graceful_shutdown(Some(SHUTDOWN_GRACE_PERIOD));
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, self.to_string()).into_response()
    }
}

// HTTP Handlers

async fn health_handler(State(dispatcher): State<Arc<Dispatcher>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy".to_string(),
        webhooks: dispatcher.registry().len(),
    })
}

async fn ready_handler(State(dispatcher): State<Arc<Dispatcher>>) -> impl IntoResponse {
    let webhooks = dispatcher.registry().len();
    if webhooks == 0 {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(HealthResponse {
                status: "no webhooks registered".to_string(),
                webhooks,
            }),
        )
    } else {
        (
            StatusCode::OK,
            Json(HealthResponse {
                status: "ready".to_string(),
                webhooks,
            }),
        )
    }
}

#[cfg(feature = "metrics")]
async fn metrics_handler() -> Response {
    match super::metrics::encode_text() {
        Ok(body) => (
            [(
                header::CONTENT_TYPE,
                "application/openmetrics-text; version=1.0.0; charset=utf-8",
            )],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn admission_handler(
    State(dispatcher): State<Arc<Dispatcher>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let started = Instant::now();

    match dispatcher.dispatch(uri.path(), content_type, &body) {
        Ok(dispatched) => {
            info!(
                webhook = %dispatched.webhook,
                action = %dispatched.action,
                schema = %dispatched.schema,
                outcome = dispatched.outcome(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Admission review answered"
            );
            #[cfg(feature = "metrics")]
            super::metrics::record_decision(&dispatched, started.elapsed());

            ([(header::CONTENT_TYPE, JSON_MIME)], dispatched.payload).into_response()
        }
        Err(e) => {
            warn!(path = %uri.path(), reason = e.reason(), "Rejected admission request: {}", e);
            #[cfg(feature = "metrics")]
            super::metrics::record_rejection(&e);

            e.into_response()
        }
    }
}
