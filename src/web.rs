//! Purpose: Aggregation gateway process composing the remote read service into views.
//! Exports: `WebConfig`, `serve_web`, `web_router`.
//! Role: Presentation-tier JSON views (`/books`, `/authors`, `/years`) over `UpstreamClient`.
//! Invariants: View routes always answer 200; upstream trouble shows up as `"status":"degraded"`.
//! Invariants: No store access here; the read service is the only data source.

use axum::extract::State;
use axum::http::{HeaderValue, Method, StatusCode};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use serde::Serialize;
use std::net::SocketAddr;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;

use bookstack::api::{Error, ErrorKind, Fetched, UpstreamClient};

use crate::serve::{healthz, init_tracing, json_response, run_blocking, run_until_shutdown};

#[derive(Clone, Debug)]
pub struct WebConfig {
    pub bind: SocketAddr,
    pub upstream: String,
    pub upstream_timeout: Option<Duration>,
    pub cors_origins: Vec<String>,
}

pub async fn serve_web(config: WebConfig) -> Result<(), Error> {
    let client = client_from_config(&config)?;
    let cors = cors_layer(&config.cors_origins)?;

    init_tracing();

    let app = web_router(client.clone())
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    tracing::info!(
        bind = %config.bind,
        upstream = %client.base_url(),
        "starting web gateway"
    );
    run_until_shutdown(config.bind, app).await
}

fn client_from_config(config: &WebConfig) -> Result<UpstreamClient, Error> {
    let client = UpstreamClient::new(config.upstream.clone())?;
    match config.upstream_timeout {
        Some(timeout) if timeout.is_zero() => Err(Error::new(ErrorKind::Usage)
            .with_message("--upstream-timeout-ms must be greater than zero")
            .with_hint("Omit the flag to disable the per-request deadline.")),
        Some(timeout) => Ok(client.with_timeout(timeout)),
        None => Ok(client),
    }
}

/// No configured origins means any origin may read the views.
fn cors_layer(origins: &[String]) -> Result<CorsLayer, Error> {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET])
        .allow_headers(Any);
    if origins.is_empty() {
        return Ok(layer.allow_origin(Any));
    }
    let mut values = Vec::with_capacity(origins.len());
    for origin in origins {
        let value = HeaderValue::from_str(origin).map_err(|err| {
            Error::new(ErrorKind::Usage)
                .with_message(format!("invalid --cors-origin {origin:?}"))
                .with_source(err)
        })?;
        values.push(value);
    }
    Ok(layer.allow_origin(AllowOrigin::list(values)))
}

pub fn web_router(client: UpstreamClient) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/books", get(books_view))
        .route("/authors", get(authors_view))
        .route("/years", get(years_view))
        .with_state(client)
}

async fn books_view(State(client): State<UpstreamClient>) -> Response {
    view(move || client.books()).await
}

async fn authors_view(State(client): State<UpstreamClient>) -> Response {
    view(move || client.authors()).await
}

async fn years_view(State(client): State<UpstreamClient>) -> Response {
    view(move || client.years()).await
}

async fn view<T, F>(fetch: F) -> Response
where
    F: FnOnce() -> Fetched<T> + Send + 'static,
    T: Serialize + Send + 'static,
{
    let fetched = run_blocking(move || Ok(fetch()))
        .await
        .unwrap_or_else(|err| Fetched::Degraded {
            reason: err.message().unwrap_or("gateway error").to_string(),
            items: Vec::new(),
        });
    json_response(StatusCode::OK, &fetched)
}
