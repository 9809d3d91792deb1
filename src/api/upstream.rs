//! Purpose: HTTP client the aggregation gateway uses to reach the read service.
//! Exports: `UpstreamClient`, `Fetched`.
//! Role: Turns remote read results into values a presentation layer can render as-is.
//! Invariants: Fetches never return an error; failures become `Fetched::Degraded`.
//! Invariants: Only a 200 with a JSON array (or `null`) body counts as success.
//! Notes: Blocking (`ureq`); async callers should run fetches on a blocking thread.
//! Notes: Bodies are decoded from the response stream, so list size is unbounded.

use super::book::BookSummary;
use crate::core::error::{Error, ErrorKind};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

pub const DEFAULT_UPSTREAM: &str = "http://books-get:8081";

/// Outcome of one upstream read. `Degraded` carries why the data is missing.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum Fetched<T> {
    Ok { items: Vec<T> },
    Degraded { reason: String, items: Vec<T> },
}

impl<T> Fetched<T> {
    fn degraded(reason: impl Into<String>) -> Self {
        Fetched::Degraded {
            reason: reason.into(),
            items: Vec::new(),
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Fetched::Degraded { .. })
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Fetched::Ok { .. } => None,
            Fetched::Degraded { reason, .. } => Some(reason),
        }
    }

    pub fn items(&self) -> &[T] {
        match self {
            Fetched::Ok { items } | Fetched::Degraded { items, .. } => items,
        }
    }

    pub fn into_items(self) -> Vec<T> {
        match self {
            Fetched::Ok { items } | Fetched::Degraded { items, .. } => items,
        }
    }
}

#[derive(Clone, Debug)]
pub struct UpstreamClient {
    inner: Arc<UpstreamInner>,
}

#[derive(Debug)]
struct UpstreamInner {
    base_url: Url,
    agent: ureq::Agent,
}

impl UpstreamClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, Error> {
        let base_url = normalize_base_url(base_url.into())?;
        Ok(Self {
            inner: Arc::new(UpstreamInner {
                base_url,
                agent: ureq::AgentBuilder::new().build(),
            }),
        })
    }

    /// Bounds each request end to end. Without it a hung upstream hangs the caller.
    pub fn with_timeout(self, timeout: Duration) -> Self {
        Self {
            inner: Arc::new(UpstreamInner {
                base_url: self.inner.base_url.clone(),
                agent: ureq::AgentBuilder::new().timeout(timeout).build(),
            }),
        }
    }

    pub fn base_url(&self) -> &Url {
        &self.inner.base_url
    }

    pub fn books(&self) -> Fetched<BookSummary> {
        self.fetch(&["api", "books"])
    }

    pub fn authors(&self) -> Fetched<String> {
        self.fetch(&["api", "authors"])
    }

    pub fn years(&self) -> Fetched<String> {
        self.fetch(&["api", "years"])
    }

    pub fn fetch_books(&self) -> Vec<BookSummary> {
        self.books().into_items()
    }

    pub fn fetch_authors(&self) -> Vec<String> {
        self.authors().into_items()
    }

    pub fn fetch_years(&self) -> Vec<String> {
        self.years().into_items()
    }

    fn fetch<T>(&self, segments: &[&str]) -> Fetched<T>
    where
        T: DeserializeOwned,
    {
        match self.get_list(segments) {
            Ok(items) => Fetched::Ok { items },
            Err(err) => {
                tracing::warn!(
                    upstream = %self.inner.base_url,
                    path = %segments.join("/"),
                    error = %err,
                    "upstream read degraded to empty result"
                );
                Fetched::degraded(err.message().unwrap_or("upstream unavailable"))
            }
        }
    }

    fn get_list<T>(&self, segments: &[&str]) -> Result<Vec<T>, Error>
    where
        T: DeserializeOwned,
    {
        let url = build_url(&self.inner.base_url, segments)?;
        let response = match self
            .inner
            .agent
            .get(url.as_str())
            .set("Accept", "application/json")
            .call()
        {
            Ok(response) => response,
            Err(ureq::Error::Status(code, _)) => {
                return Err(Error::new(ErrorKind::UpstreamUnavailable)
                    .with_message(format!("upstream returned status {code}")));
            }
            Err(ureq::Error::Transport(err)) => {
                return Err(Error::new(ErrorKind::UpstreamUnavailable)
                    .with_message(format!("upstream request failed: {err}"))
                    .with_source(err));
            }
        };
        if response.status() != 200 {
            return Err(Error::new(ErrorKind::UpstreamUnavailable)
                .with_message(format!("upstream returned status {}", response.status())));
        }
        // Streamed: no cap on body size.
        // The legacy read service encodes an empty list as `null`.
        let items: Option<Vec<T>> =
            serde_json::from_reader(response.into_reader()).map_err(|err| {
                Error::new(ErrorKind::UpstreamUnavailable)
                    .with_message(format!("malformed upstream body: {err}"))
                    .with_source(err)
            })?;
        Ok(items.unwrap_or_default())
    }
}

fn normalize_base_url(raw: String) -> Result<Url, Error> {
    let mut url = Url::parse(&raw).map_err(|err| {
        Error::new(ErrorKind::Usage)
            .with_message("invalid upstream base url")
            .with_source(err)
    })?;
    let scheme = url.scheme();
    if scheme != "http" && scheme != "https" {
        return Err(Error::new(ErrorKind::Usage)
            .with_message("upstream base url must use http or https scheme"));
    }
    if url.path() != "/" && !url.path().is_empty() {
        return Err(
            Error::new(ErrorKind::Usage).with_message("upstream base url must not include a path")
        );
    }
    url.set_path("/");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

fn build_url(base_url: &Url, segments: &[&str]) -> Result<Url, Error> {
    let mut url = base_url.clone();
    {
        let mut path = url.path_segments_mut().map_err(|_| {
            Error::new(ErrorKind::Usage).with_message("upstream base url cannot be a base")
        })?;
        path.clear();
        for segment in segments {
            path.push(segment);
        }
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::{Fetched, UpstreamClient, build_url, normalize_base_url};
    use crate::core::error::ErrorKind;
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread::JoinHandle;
    use std::time::Duration;

    /// Answers a single request with a canned HTTP response.
    fn one_shot(status_line: &str, body: &str) -> (String, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let response = format!(
            "HTTP/1.1 {status_line}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
            body.len()
        );
        let handle = std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 2048];
                let _ = stream.read(&mut buf);
                let _ = stream.write_all(response.as_bytes());
            }
        });
        (format!("http://{addr}"), handle)
    }

    fn closed_port_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        format!("http://{addr}")
    }

    #[test]
    fn normalize_base_url_strips_trailing_slash_only() {
        let url = normalize_base_url("http://books-get:8081".to_string()).expect("url");
        assert_eq!(url.as_str(), "http://books-get:8081/");
        let err = normalize_base_url("http://books-get:8081/api".to_string()).expect_err("err");
        assert_eq!(err.kind(), ErrorKind::Usage);
        let err = normalize_base_url("ftp://books-get".to_string()).expect_err("err");
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[test]
    fn build_url_joins_segments() {
        let base = normalize_base_url("http://localhost:8081".to_string()).expect("url");
        let url = build_url(&base, &["api", "years"]).expect("url");
        assert_eq!(url.as_str(), "http://localhost:8081/api/years");
    }

    #[test]
    fn unreachable_upstream_yields_empty() {
        let client = UpstreamClient::new(closed_port_url())
            .expect("client")
            .with_timeout(Duration::from_secs(2));
        assert!(client.fetch_books().is_empty());
        assert!(client.fetch_authors().is_empty());
        assert!(client.fetch_years().is_empty());
        assert!(client.books().is_degraded());
    }

    #[test]
    fn non_success_status_is_degraded() {
        let (url, server) = one_shot("503 Service Unavailable", r#"{"error":"down"}"#);
        let client = UpstreamClient::new(url).expect("client");
        let fetched = client.authors();
        server.join().expect("server");
        assert!(fetched.is_degraded());
        assert_eq!(fetched.reason(), Some("upstream returned status 503"));
        assert!(fetched.items().is_empty());
    }

    #[test]
    fn malformed_body_is_degraded() {
        let (url, server) = one_shot("200 OK", r#"{"not":"a list"}"#);
        let client = UpstreamClient::new(url).expect("client");
        let fetched = client.years();
        server.join().expect("server");
        assert!(fetched.is_degraded());
    }

    #[test]
    fn null_body_is_an_empty_success() {
        let (url, server) = one_shot("200 OK", "null");
        let client = UpstreamClient::new(url).expect("client");
        let fetched = client.books();
        server.join().expect("server");
        assert_eq!(fetched, Fetched::Ok { items: Vec::new() });
    }

    #[test]
    fn books_parse_into_summaries() {
        let (url, server) = one_shot(
            "200 OK",
            r#"[{"id":"b1","name":"Dune","author":"Herbert","edition":"1st","pageCount":"412"}]"#,
        );
        let client = UpstreamClient::new(url).expect("client");
        let books = client.fetch_books();
        server.join().expect("server");
        assert_eq!(books.len(), 1);
        assert_eq!(books[0].page_count, "412");
    }

    #[test]
    fn books_with_canonical_and_legacy_names_are_not_degraded() {
        let (url, server) = one_shot(
            "200 OK",
            r#"[{"id":"b1","ID":"65a1b2c3d4e5f60718293a4b","name":"Dune","BookAuthor":"Herbert"}]"#,
        );
        let client = UpstreamClient::new(url).expect("client");
        let fetched = client.books();
        server.join().expect("server");
        assert!(!fetched.is_degraded(), "reason: {:?}", fetched.reason());
        let books = fetched.into_items();
        assert_eq!(books[0].id, "b1");
        assert_eq!(books[0].name, "Dune");
        assert_eq!(books[0].author, "Herbert");
    }

    #[test]
    fn large_book_list_is_read_in_full() {
        let row = r#"{"id":"b","name":"Dune","author":"Herbert","edition":"1st","pageCount":"412"}"#;
        let count = 11 * 1024 * 1024 / row.len() + 1;
        let body = format!("[{}]", vec![row; count].join(","));
        let (url, server) = one_shot("200 OK", &body);
        let client = UpstreamClient::new(url).expect("client");
        let fetched = client.books();
        server.join().expect("server");
        assert!(!fetched.is_degraded(), "reason: {:?}", fetched.reason());
        assert_eq!(fetched.items().len(), count);
    }

    #[test]
    fn view_envelope_is_tagged() {
        let ok: Fetched<String> = Fetched::Ok {
            items: vec!["Herbert".to_string()],
        };
        assert_eq!(
            serde_json::to_value(&ok).expect("json"),
            serde_json::json!({"status": "ok", "items": ["Herbert"]})
        );
        let degraded: Fetched<String> = Fetched::degraded("upstream returned status 500");
        assert_eq!(
            serde_json::to_value(&degraded).expect("json"),
            serde_json::json!({
                "status": "degraded",
                "reason": "upstream returned status 500",
                "items": []
            })
        );
    }
}
