//! Purpose: HTTP/JSON servers for the read and write services.
//! Exports: `ServeConfig`, `StoreConfig`, `Role`, `serve`, plus shared server plumbing.
//! Role: Axum front ends over `ReadService` / `WriteService`; one process per role.
//! Invariants: The store handle is connected once at startup and shared by every request.
//! Invariants: Store work runs on blocking threads; handlers never block the executor.
//! Invariants: Error bodies are `{"error":{"kind","message"}}`; status classes are fixed in `error_response`.

use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use serde::Serialize;
use serde_json::json;
use std::future::IntoFuture;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::time::Duration;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use bookstack::api::{
    Error, ErrorKind, ReadService, RecordStore, StoreUri, WriteService, connect,
};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Role {
    Read,
    Write,
}

#[derive(Clone, Debug)]
pub struct StoreConfig {
    pub uri: StoreUri,
    pub database: String,
    pub collection: String,
    pub connect_timeout: Duration,
}

#[derive(Clone, Debug)]
pub struct ServeConfig {
    pub role: Role,
    pub bind: SocketAddr,
    pub store: StoreConfig,
    pub max_body_bytes: u64,
}

pub async fn serve(config: ServeConfig) -> Result<(), Error> {
    validate_config(&config)?;

    init_tracing();

    let max_body_bytes: usize = config
        .max_body_bytes
        .try_into()
        .map_err(|_| Error::new(ErrorKind::Usage).with_message("--max-body-bytes is too large"))?;

    let records = open_records(&config.store).await?;
    let collection = {
        let records = records.clone();
        let store = config.store.clone();
        let role = config.role;
        run_blocking(move || match role {
            Role::Read => records.ensure_collection(&store.database, &store.collection),
            Role::Write => records.provision(&store.database, &store.collection),
        })
        .await?
    };

    let app = match config.role {
        Role::Read => read_router(ReadService::new(records, collection)),
        Role::Write => write_router(WriteService::new(records, collection)),
    }
    .layer(DefaultBodyLimit::max(max_body_bytes))
    .layer(TraceLayer::new_for_http());

    tracing::info!(
        role = ?config.role,
        bind = %config.bind,
        store = %config.store.uri,
        database = %config.store.database,
        collection = %config.store.collection,
        "starting books service"
    );
    run_until_shutdown(config.bind, app).await?;
    tracing::info!(role = ?config.role, "books service stopped; store handle released");
    Ok(())
}

pub async fn open_records(store: &StoreConfig) -> Result<RecordStore, Error> {
    let handle = connect(&store.uri, store.connect_timeout).await?;
    tracing::info!(store = %handle.describe(), "connected to document store");
    Ok(RecordStore::new(handle))
}

pub fn read_router(service: ReadService) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/books", get(list_books))
        .route("/api/authors", get(list_authors))
        .route("/api/years", get(list_years))
        .with_state(Arc::new(service))
}

pub fn write_router(service: WriteService) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/books", axum::routing::post(create_book))
        .with_state(Arc::new(service))
}

fn validate_config(config: &ServeConfig) -> Result<(), Error> {
    if config.max_body_bytes == 0 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--max-body-bytes must be greater than zero")
            .with_hint("Use a positive value like 1048576."));
    }

    if config.max_body_bytes > usize::MAX as u64 {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--max-body-bytes exceeds platform limits")
            .with_hint("Use a smaller value that fits in memory."));
    }

    if config.store.connect_timeout.is_zero() {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("--connect-timeout-ms must be greater than zero")
            .with_hint("Use a positive value like 10000."));
    }

    Ok(())
}

pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .try_init();
}

/// Serves `app` on `bind` until ctrl-c/SIGTERM, then drains for up to ten seconds.
pub async fn run_until_shutdown(bind: SocketAddr, app: Router) -> Result<(), Error> {
    let listener = tokio::net::TcpListener::bind(bind).await.map_err(|err| {
        Error::new(ErrorKind::Io)
            .with_message(format!("failed to bind {bind}"))
            .with_source(err)
    })?;

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let server = axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => {
            result.map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("server failed")
                    .with_source(err)
            })?;
        }
        _ = shutdown_signal() => {
            tracing::info!("shutdown requested; draining in-flight requests");
            let _ = shutdown_tx.send(());
            match tokio::time::timeout(Duration::from_secs(10), &mut server).await {
                Ok(result) => result.map_err(|err| {
                    Error::new(ErrorKind::Io)
                        .with_message("server failed")
                        .with_source(err)
                })?,
                Err(_) => {
                    return Err(Error::new(ErrorKind::Io).with_message("server shutdown timed out"));
                }
            }
        }
    };
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(unix)]
    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    #[cfg(not(unix))]
    ctrl_c.await;
}

pub async fn run_blocking<T, F>(work: F) -> Result<T, Error>
where
    F: FnOnce() -> Result<T, Error> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(|err| {
        Error::new(ErrorKind::Internal)
            .with_message("blocking task failed")
            .with_source(err)
    })?
}

pub async fn healthz() -> Response {
    json_response(StatusCode::OK, &json!({ "ok": true }))
}

async fn list_books(State(service): State<Arc<ReadService>>) -> Response {
    let service = Arc::clone(&service);
    match run_blocking(move || service.list_books()).await {
        Ok(books) => json_response(StatusCode::OK, &books),
        Err(err) => error_response(err),
    }
}

async fn list_authors(State(service): State<Arc<ReadService>>) -> Response {
    let service = Arc::clone(&service);
    match run_blocking(move || service.list_authors()).await {
        Ok(authors) => json_response(StatusCode::OK, &authors),
        Err(err) => error_response(err),
    }
}

async fn list_years(State(service): State<Arc<ReadService>>) -> Response {
    let service = Arc::clone(&service);
    match run_blocking(move || service.list_years()).await {
        Ok(years) => json_response(StatusCode::OK, &years),
        Err(err) => error_response(err),
    }
}

async fn create_book(
    State(service): State<Arc<WriteService>>,
    body: Result<Bytes, BytesRejection>,
) -> Response {
    let body = match body {
        Ok(body) => body,
        Err(rejection) => {
            let status = rejection.status();
            let err = Error::new(ErrorKind::Validation)
                .with_message(format!("request body rejected: {}", rejection.body_text()))
                .with_hint("Request bodies are limited by --max-body-bytes.");
            return error_response_with_status(err, status);
        }
    };
    let service = Arc::clone(&service);
    match run_blocking(move || service.create_book(&body)).await {
        Ok(_) => json_response(StatusCode::CREATED, &json!({ "message": "Book added" })),
        Err(err) => error_response(err),
    }
}

#[derive(Debug, Serialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    kind: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    hint: Option<String>,
}

pub fn json_response<T: Serialize>(status: StatusCode, payload: &T) -> Response {
    (status, Json(payload)).into_response()
}

pub fn error_response(err: Error) -> Response {
    let status = match err.kind() {
        ErrorKind::Validation | ErrorKind::Usage => StatusCode::BAD_REQUEST,
        ErrorKind::DuplicateId
        | ErrorKind::StoreUnavailable
        | ErrorKind::ProvisioningFailed
        | ErrorKind::UpstreamUnavailable
        | ErrorKind::Conflict
        | ErrorKind::Permission
        | ErrorKind::Corrupt
        | ErrorKind::Io
        | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    };
    error_response_with_status(err, status)
}

fn error_response_with_status(err: Error, status: StatusCode) -> Response {
    if status.is_server_error() {
        tracing::error!(kind = ?err.kind(), error = %err, "request failed");
    } else {
        tracing::warn!(kind = ?err.kind(), error = %err, "request rejected");
    }
    let body = ErrorEnvelope {
        error: ErrorBody {
            kind: format!("{:?}", err.kind()),
            message: err.message().unwrap_or("error").to_string(),
            hint: err.hint().map(str::to_string),
        },
    };
    (status, Json(body)).into_response()
}

#[cfg(test)]
mod tests {
    use super::{
        Role, ServeConfig, StoreConfig, error_response, read_router, serve, validate_config,
        write_router,
    };
    use axum::extract::DefaultBodyLimit;
    use axum::http::StatusCode;
    use bookstack::api::{
        Error, ErrorKind, MemoryStore, ReadService, RecordStore, StoreHandle, StoreUri,
        WriteService,
    };
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::time::Duration;

    fn config(max_body_bytes: u64, connect_timeout: Duration) -> ServeConfig {
        ServeConfig {
            role: Role::Write,
            bind: "127.0.0.1:0".parse().expect("bind"),
            store: StoreConfig {
                uri: StoreUri::Memory,
                database: "catalog".to_string(),
                collection: "books".to_string(),
                connect_timeout,
            },
            max_body_bytes,
        }
    }

    #[test]
    fn safety_limits_require_positive_values() {
        let err = validate_config(&config(0, Duration::from_secs(1))).expect_err("usage");
        assert_eq!(err.kind(), ErrorKind::Usage);
        let err = validate_config(&config(1024, Duration::ZERO)).expect_err("usage");
        assert_eq!(err.kind(), ErrorKind::Usage);
        validate_config(&config(1024, Duration::from_secs(1))).expect("config ok");
    }

    #[tokio::test]
    async fn serve_rejects_zero_body_limit() {
        let err = serve(config(0, Duration::from_secs(1)))
            .await
            .expect_err("expected usage error");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn error_statuses_follow_api_table() {
        let cases = [
            (ErrorKind::Validation, StatusCode::BAD_REQUEST),
            (ErrorKind::DuplicateId, StatusCode::INTERNAL_SERVER_ERROR),
            (ErrorKind::StoreUnavailable, StatusCode::INTERNAL_SERVER_ERROR),
            (ErrorKind::Corrupt, StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (kind, status) in cases {
            assert_eq!(error_response(Error::new(kind)).status(), status);
        }
    }

    /// Binds both routers on loopback and returns their base URLs.
    async fn spawn_services() -> (String, String) {
        let store: StoreHandle = Arc::new(MemoryStore::new().expect("store"));
        let records = RecordStore::new(store);
        let collection = records.provision("catalog", "books").expect("collection");
        let read = read_router(ReadService::new(records.clone(), collection.clone()));
        let write = write_router(WriteService::new(records, collection));

        let mut urls = Vec::new();
        for app in [read, write] {
            let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
                .await
                .expect("bind");
            urls.push(format!("http://{}", listener.local_addr().expect("addr")));
            tokio::spawn(async move {
                let _ = axum::serve(listener, app).await;
            });
        }
        let write = urls.pop().expect("write url");
        let read = urls.pop().expect("read url");
        (read, write)
    }

    fn post(url: String, body: &'static str) -> (u16, Value) {
        let response = match ureq::post(&url)
            .set("Content-Type", "application/json")
            .send_string(body)
        {
            Ok(response) => response,
            Err(ureq::Error::Status(_, response)) => response,
            Err(err) => panic!("transport error: {err}"),
        };
        let status = response.status();
        let body = response.into_string().expect("body");
        (status, serde_json::from_str(&body).expect("json body"))
    }

    fn get(url: String) -> (u16, Value) {
        let response = ureq::get(&url).call().expect("get");
        let status = response.status();
        let body = response.into_string().expect("body");
        (status, serde_json::from_str(&body).expect("json body"))
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn write_then_read_over_http() {
        let (read, write) = spawn_services().await;

        let (status, body) = tokio::task::spawn_blocking({
            let write = write.clone();
            move || {
                post(
                    format!("{write}/api/books"),
                    r#"{"id":"b1","name":"Dune","author":"Herbert","edition":"1st","pageCount":"412","year":"1965"}"#,
                )
            }
        })
        .await
        .expect("join");
        assert_eq!(status, 201);
        assert_eq!(body, json!({"message": "Book added"}));

        let (status, body) = tokio::task::spawn_blocking({
            let write = write.clone();
            move || post(format!("{write}/api/books"), r#"{"id":"b1","name":"Emma"}"#)
        })
        .await
        .expect("join");
        assert_eq!(status, 500);
        assert_eq!(body["error"]["kind"], json!("DuplicateId"));

        let (status, body) = tokio::task::spawn_blocking({
            let write = write.clone();
            move || post(format!("{write}/api/books"), "{not json")
        })
        .await
        .expect("join");
        assert_eq!(status, 400);
        assert_eq!(body["error"]["kind"], json!("Validation"));

        let (books, authors, years) = tokio::task::spawn_blocking(move || {
            (
                get(format!("{read}/api/books")),
                get(format!("{read}/api/authors")),
                get(format!("{read}/api/years")),
            )
        })
        .await
        .expect("join");
        assert_eq!(books.0, 200);
        assert_eq!(
            books.1,
            json!([{"id":"b1","name":"Dune","author":"Herbert","edition":"1st","pageCount":"412"}])
        );
        assert_eq!(authors.1, json!(["Herbert"]));
        assert_eq!(years.1, json!(["1965"]));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn oversized_body_gets_error_envelope() {
        let store: StoreHandle = Arc::new(MemoryStore::new().expect("store"));
        let records = RecordStore::new(store);
        let collection = records.provision("catalog", "books").expect("collection");
        let app = write_router(WriteService::new(records, collection))
            .layer(DefaultBodyLimit::max(16));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let write = format!("http://{}", listener.local_addr().expect("addr"));
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });

        let (status, body) = tokio::task::spawn_blocking(move || {
            post(
                format!("{write}/api/books"),
                r#"{"id":"b1","name":"Dune","author":"Herbert","edition":"1st","pageCount":"412","year":"1965"}"#,
            )
        })
        .await
        .expect("join");
        assert_eq!(status, 413);
        assert_eq!(body["error"]["kind"], json!("Validation"));
        assert!(body["error"]["message"].as_str().is_some());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn empty_store_reads_as_empty_arrays() {
        let (read, _) = spawn_services().await;
        let results = tokio::task::spawn_blocking(move || {
            ["books", "authors", "years"]
                .iter()
                .map(|path| get(format!("{read}/api/{path}")))
                .collect::<Vec<_>>()
        })
        .await
        .expect("join");
        for (status, body) in results {
            assert_eq!(status, 200);
            assert_eq!(body, json!([]));
        }
    }
}
