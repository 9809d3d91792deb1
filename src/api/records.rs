//! Purpose: Record store gateway between Book values and the document store.
//! Exports: `RecordStore`, `Collection`, `ID_FIELD`.
//! Role: Provisions the backing collection and owns the insert-if-absent rule for `id`.
//! Invariants: Nothing is cached; every read re-queries the store.
//! Invariants: A unique index on `id` backs the lookup, so store conflicts are authoritative.
//! Notes: All calls block; async callers should run them on a blocking thread.

use super::book::Book;
use crate::core::document::Filter;
use crate::core::error::{Error, ErrorKind};
use crate::core::key::DocumentKey;
use crate::core::store::StoreHandle;

pub const ID_FIELD: &str = "id";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Collection {
    database: String,
    name: String,
}

impl Collection {
    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Clone, Debug)]
pub struct RecordStore {
    store: StoreHandle,
}

impl RecordStore {
    pub fn new(store: StoreHandle) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    /// Lists the database and creates `collection` when absent. Safe to call on every start.
    pub fn ensure_collection(&self, database: &str, collection: &str) -> Result<Collection, Error> {
        let names = self
            .store
            .list_collections(database)
            .map_err(|err| unavailable(err, "failed to list collections"))?;

        if !names.iter().any(|name| name == collection) {
            match self.store.create_collection(database, collection) {
                Ok(()) => {
                    tracing::info!(database, collection, "created collection");
                }
                Err(err) if err.kind() == ErrorKind::Conflict => {
                    tracing::debug!(database, collection, "collection created concurrently");
                }
                Err(err) if err.kind() == ErrorKind::Usage => return Err(err),
                Err(err) => {
                    return Err(err
                        .with_kind(ErrorKind::ProvisioningFailed)
                        .with_hint("Check store permissions; the process will not retry."));
                }
            }
        }

        Ok(Collection {
            database: database.to_string(),
            name: collection.to_string(),
        })
    }

    /// Builds the unique index on `id`. Pre-existing duplicates make this fail.
    pub fn ensure_id_index(&self, collection: &Collection) -> Result<(), Error> {
        self.store
            .create_unique_index(&collection.database, &collection.name, ID_FIELD)
            .map_err(|err| {
                err.with_kind(ErrorKind::ProvisioningFailed)
                    .with_hint("Remove duplicate ids from the collection before starting.")
            })
    }

    /// Collection plus its `id` index, as every writer needs it.
    pub fn provision(&self, database: &str, collection: &str) -> Result<Collection, Error> {
        let collection = self.ensure_collection(database, collection)?;
        self.ensure_id_index(&collection)?;
        Ok(collection)
    }

    pub fn find_all(&self, collection: &Collection) -> Result<Vec<Book>, Error> {
        self.store
            .find(&collection.database, &collection.name, Filter::all())?
            .map(|document| document.and_then(Book::from_document))
            .collect()
    }

    /// Check-then-insert on `id`. No document is written on any error path.
    pub fn insert_unique(&self, collection: &Collection, candidate: &Book) -> Result<DocumentKey, Error> {
        let mut existing = self
            .store
            .find(
                &collection.database,
                &collection.name,
                Filter::eq(ID_FIELD, candidate.id.as_str()),
            )
            .map_err(|err| unavailable(err, "failed to look up book id"))?;
        if let Some(found) = existing.next() {
            found.map_err(|err| unavailable(err, "failed to look up book id"))?;
            return Err(duplicate(&candidate.id));
        }
        drop(existing);

        match self
            .store
            .insert_one(&collection.database, &collection.name, candidate.to_body())
        {
            Ok(key) => Ok(key),
            Err(err) if err.kind() == ErrorKind::DuplicateId => Err(duplicate(&candidate.id)),
            Err(err) => Err(unavailable(err, "failed to insert book")),
        }
    }
}

fn duplicate(id: &str) -> Error {
    Error::new(ErrorKind::DuplicateId).with_message(format!("book with ID {id} already exists"))
}

fn unavailable(err: Error, context: &str) -> Error {
    if err.kind() == ErrorKind::Usage {
        return err;
    }
    let detail = err.to_string();
    err.with_kind(ErrorKind::StoreUnavailable)
        .with_message(format!("{context}: {detail}"))
}
