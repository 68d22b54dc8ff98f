//! dirauth checks credentials against a directory server (LDAP) or an HTTP
//! endpoint protected by Basic authentication.

#![forbid(unsafe_code)]
pub mod config;
pub mod error;
pub mod ldap;
pub mod relay;
mod router;
pub mod telemetry;

use std::path::PathBuf;
use std::time::Duration;

use axum::body::Bytes;
#[cfg(test)]
use axum::http::Method;
use axum::http::{StatusCode, header};
use axum::routing::{get, post};
use axum::{Router, middleware as AxumMiddleware};
use metrics_exporter_prometheus::PrometheusHandle;
use tower::ServiceBuilder;
use tower_http::LatencyUnit;
use tower_http::sensitive_headers::SetSensitiveHeadersLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::{
    DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer,
};

/// Deadline of a whole inbound request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// MUST NEVER be used in production.
#[cfg(test)]
pub async fn make_request(
    app: Router,
    method: Method,
    path: &str,
    body: String,
) -> axum::http::Response<axum::body::Body> {
    use axum::extract::Request;
    use tower::util::ServiceExt;

    app.oneshot(
        Request::builder()
            .method(method)
            .uri(path)
            .header(header::CONTENT_TYPE, "application/json")
            .body(axum::body::Body::from(body))
            .unwrap(),
    )
    .await
    .unwrap()
}

/// State sharing between routes.
#[derive(Clone)]
pub struct AppState {
    pub directory: ldap::Directory,
    pub relay: relay::BasicRelay,
    pub metrics: Option<PrometheusHandle>,
}

/// Create router.
pub fn app(state: AppState) -> Router {
    let middleware = ServiceBuilder::new()
        // Add high level tracing/logging to all requests.
        .layer(
            TraceLayer::new_for_http()
                .on_body_chunk(|chunk: &Bytes, latency: Duration, _span: &tracing::Span| {
                    tracing::trace!(size_bytes = chunk.len(), latency = ?latency, "sending body chunk")
                })
                .make_span_with(DefaultMakeSpan::new().include_headers(true).level(tracing::Level::INFO))
                .on_request(DefaultOnRequest::new())
                .on_response(DefaultOnResponse::new().include_headers(true).latency_unit(LatencyUnit::Micros)),
        )
        // Set a timeout.
        .layer(TimeoutLayer::with_status_code(StatusCode::REQUEST_TIMEOUT, REQUEST_TIMEOUT))
        // Remove senstive headers from trace.
        .layer(SetSensitiveHeadersLayer::new([header::AUTHORIZATION, header::COOKIE]));

    Router::new()
        // `POST /auth` goes to `auth`.
        .route(
            "/auth",
            post(router::auth::handler).fallback(router::method_not_allowed),
        )
        // `POST /basic` goes to `basic`.
        .route(
            "/basic",
            post(router::basic::handler).fallback(router::method_not_allowed),
        )
        .route("/metrics", get(router::metrics::handler))
        .with_state(state)
        .route_layer(AxumMiddleware::from_fn(telemetry::track))
        .layer(middleware)
}

/// Initialize the application state.
pub fn initialize_state(
    path: Option<PathBuf>,
    metrics: Option<PrometheusHandle>,
) -> Result<AppState, Box<dyn std::error::Error>> {
    // read configuration file. let it in memory.
    let config = config::Configuration::read(path)?;

    let directory = ldap::Directory::ldap3(&config);
    let relay = relay::BasicRelay::new(config.relay_url()?, config.timeout())?;

    tracing::info!(
        directory = %config.ldap_url(),
        base_dn = %config.basedn,
        "configuration loaded"
    );

    Ok(AppState {
        directory,
        relay,
        metrics,
    })
}
