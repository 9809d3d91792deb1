//! Purpose: Define the public Rust API boundary for the catalog.
//! Exports: Book model, record store gateway, read/write services, upstream client, store handles.
//! Role: Shared by the `bookstack` binary and tests; hides storage internals behind `DocumentStore`.
//! Invariants: Services take their store as an injected `StoreHandle`, never a global.

mod book;
mod read;
mod records;
mod upstream;
mod validation;
mod write;

#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::document::{Document, Documents, Filter};
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::file_store::FileStore;
pub use crate::core::key::DocumentKey;
pub use crate::core::memory_store::MemoryStore;
pub use crate::core::store::{
    DEFAULT_CONNECT_TIMEOUT, DocumentStore, StoreHandle, StoreUri, connect, open,
};
pub use book::{Book, BookSummary};
pub use read::ReadService;
pub use records::{Collection, ID_FIELD, RecordStore};
pub use upstream::{DEFAULT_UPSTREAM, Fetched, UpstreamClient};
pub use validation::parse_book_payload;
pub use write::WriteService;
