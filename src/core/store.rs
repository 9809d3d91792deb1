// Document store capability: namespaces, scans, keyed inserts, and unique indexes.
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::core::document::{Document, Documents, Filter};
use crate::core::error::{Error, ErrorKind};
use crate::core::file_store::FileStore;
use crate::core::key::DocumentKey;
use crate::core::memory_store::MemoryStore;

pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Backends are shared across request handlers; every method must tolerate concurrent callers.
pub trait DocumentStore: Send + Sync + fmt::Debug {
    fn describe(&self) -> String;

    /// Collection names in `database`, sorted. A database with no collections yields an empty list.
    fn list_collections(&self, database: &str) -> Result<Vec<String>, Error>;

    /// Fails with `ErrorKind::Conflict` if the collection already exists.
    fn create_collection(&self, database: &str, collection: &str) -> Result<(), Error>;

    /// Idempotent. Fails with `ErrorKind::Conflict` if stored documents already share a value.
    fn create_unique_index(&self, database: &str, collection: &str, field: &str)
    -> Result<(), Error>;

    /// Scans in insertion order. A missing collection scans as empty.
    fn find(&self, database: &str, collection: &str, filter: Filter) -> Result<Documents, Error>;

    /// Assigns a fresh key. Fails with `ErrorKind::DuplicateId` when a unique index would be violated.
    fn insert_one(
        &self,
        database: &str,
        collection: &str,
        body: Map<String, Value>,
    ) -> Result<DocumentKey, Error>;
}

pub type StoreHandle = Arc<dyn DocumentStore>;

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StoreUri {
    Memory,
    File(PathBuf),
}

impl StoreUri {
    /// Accepts `memory:`, `file:<path>`, `file:///abs/path`, or a bare filesystem path.
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::new(ErrorKind::Usage)
                .with_message("store uri must not be empty")
                .with_hint("Use memory: or file:/path/to/data."));
        }
        if raw == "memory:" || raw == "memory" {
            return Ok(StoreUri::Memory);
        }
        if raw.starts_with("file://") {
            let url = url::Url::parse(raw).map_err(|err| {
                Error::new(ErrorKind::Usage)
                    .with_message("invalid file store uri")
                    .with_source(err)
            })?;
            let path = url.to_file_path().map_err(|_| {
                Error::new(ErrorKind::Usage)
                    .with_message("file store uri must name a local absolute path")
            })?;
            return Ok(StoreUri::File(path));
        }
        if let Some(path) = raw.strip_prefix("file:") {
            if path.is_empty() {
                return Err(Error::new(ErrorKind::Usage).with_message("file store uri has no path"));
            }
            return Ok(StoreUri::File(PathBuf::from(path)));
        }
        if let Some((scheme, _)) = raw.split_once("://") {
            return Err(Error::new(ErrorKind::Usage)
                .with_message(format!("unsupported store scheme {scheme:?}"))
                .with_hint("Supported stores: memory:, file:<path>."));
        }
        Ok(StoreUri::File(PathBuf::from(raw)))
    }
}

impl fmt::Display for StoreUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreUri::Memory => f.write_str("memory:"),
            StoreUri::File(path) => write!(f, "file:{}", path.display()),
        }
    }
}

/// Opens a backend synchronously. Failures surface as `StoreUnavailable`.
pub fn open(uri: &StoreUri) -> Result<StoreHandle, Error> {
    let store: StoreHandle = match uri {
        StoreUri::Memory => Arc::new(MemoryStore::new()?),
        StoreUri::File(root) => Arc::new(FileStore::open(root)?),
    };
    Ok(store)
}

/// Opens a backend under a setup deadline, off the async executor.
pub async fn connect(uri: &StoreUri, deadline: Duration) -> Result<StoreHandle, Error> {
    let target = uri.clone();
    let task = tokio::task::spawn_blocking(move || open(&target));
    match tokio::time::timeout(deadline, task).await {
        Ok(Ok(Ok(store))) => Ok(store),
        Ok(Ok(Err(err))) => Err(err
            .with_kind(ErrorKind::StoreUnavailable)
            .with_hint(format!("Check that {uri} exists and is accessible."))),
        Ok(Err(join_err)) => Err(Error::new(ErrorKind::Internal)
            .with_message("store setup task failed")
            .with_source(join_err)),
        Err(_) => Err(Error::new(ErrorKind::StoreUnavailable).with_message(format!(
            "store {uri} did not become ready within {}ms",
            deadline.as_millis()
        ))),
    }
}

/// Database and collection names map onto file names, so keep them to a safe alphabet.
pub(crate) fn validate_name(kind: &str, name: &str) -> Result<(), Error> {
    let valid = !name.is_empty()
        && name.len() <= 120
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
    if valid {
        Ok(())
    } else {
        Err(Error::new(ErrorKind::Usage)
            .with_message(format!("invalid {kind} name {name:?}"))
            .with_hint("Use letters, digits, '-' or '_'."))
    }
}

/// First unique field on which `body` collides with `existing`. Absent fields compare as null.
pub(crate) fn unique_conflict<'a>(
    unique: &'a [String],
    existing: &Document,
    body: &Map<String, Value>,
) -> Option<&'a str> {
    unique
        .iter()
        .find(|field| {
            let ours = body.get(field.as_str()).unwrap_or(&Value::Null);
            let theirs = existing.get(field).unwrap_or(&Value::Null);
            ours == theirs
        })
        .map(String::as_str)
}

pub(crate) fn duplicate_error(field: &str, body: &Map<String, Value>) -> Error {
    let value = body.get(field).unwrap_or(&Value::Null);
    Error::new(ErrorKind::DuplicateId)
        .with_message(format!("duplicate value {value} for unique field {field:?}"))
}
