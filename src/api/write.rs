//! Purpose: Accept candidate books and persist them under the `id` uniqueness rule.
//! Exports: `WriteService`.
//! Role: Backs `POST /api/books`.
//! Invariants: Exactly one document is written on success and none on any failure.
//! Invariants: Payload fields are stored verbatim; empty strings are accepted.

use super::records::{Collection, RecordStore};
use super::validation::parse_book_payload;
use crate::core::error::Error;
use crate::core::key::DocumentKey;

#[derive(Clone, Debug)]
pub struct WriteService {
    records: RecordStore,
    collection: Collection,
}

impl WriteService {
    pub fn new(records: RecordStore, collection: Collection) -> Self {
        Self {
            records,
            collection,
        }
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    /// Fails with `Validation`, `DuplicateId`, or `StoreUnavailable`.
    pub fn create_book(&self, payload: &[u8]) -> Result<DocumentKey, Error> {
        let candidate = parse_book_payload(payload)?;
        let key = self.records.insert_unique(&self.collection, &candidate)?;
        tracing::info!(id = %candidate.id, key = %key, "book added");
        Ok(key)
    }
}

#[cfg(test)]
mod tests {
    use super::WriteService;
    use crate::api::read::ReadService;
    use crate::api::records::RecordStore;
    use crate::core::error::ErrorKind;
    use crate::core::memory_store::MemoryStore;
    use crate::core::store::StoreHandle;
    use std::sync::Arc;

    fn services() -> (WriteService, ReadService) {
        let store: StoreHandle = Arc::new(MemoryStore::new().expect("store"));
        let records = RecordStore::new(store);
        let collection = records.provision("catalog", "books").expect("collection");
        (
            WriteService::new(records.clone(), collection.clone()),
            ReadService::new(records, collection),
        )
    }

    const DUNE: &[u8] = br#"{"id":"b1","name":"Dune","author":"Herbert","edition":"1st","pageCount":"412","year":"1965"}"#;

    #[test]
    fn dune_scenario() {
        let (writer, reader) = services();
        writer.create_book(DUNE).expect("create");

        let books = reader.list_books().expect("books");
        assert_eq!(books.len(), 1);
        assert_eq!(books[0].id, "b1");
        assert_eq!(books[0].name, "Dune");
        assert_eq!(books[0].author, "Herbert");
        assert_eq!(books[0].edition, "1st");
        assert_eq!(books[0].page_count, "412");
        assert_eq!(reader.list_authors().expect("authors"), vec!["Herbert"]);
        assert_eq!(reader.list_years().expect("years"), vec!["1965"]);
    }

    #[test]
    fn second_insert_with_same_id_keeps_first_record() {
        let (writer, reader) = services();
        writer.create_book(DUNE).expect("create");
        let err = writer
            .create_book(br#"{"id":"b1","name":"Emma","author":"Austen","edition":"2nd","pageCount":"474","year":"1815"}"#)
            .expect_err("duplicate");
        assert_eq!(err.kind(), ErrorKind::DuplicateId);

        let books = reader.list_books().expect("books");
        assert_eq!(books.len(), 1);
        assert_eq!(books[0].name, "Dune");
        assert_eq!(reader.list_years().expect("years"), vec!["1965"]);
    }

    #[test]
    fn malformed_payload_writes_nothing() {
        let (writer, reader) = services();
        let err = writer.create_book(b"{\"id\":").expect_err("invalid");
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(reader.list_books().expect("books").is_empty());
    }

    #[test]
    fn empty_strings_are_accepted() {
        let (writer, reader) = services();
        writer
            .create_book(br#"{"id":"","name":"","author":"","edition":"","pageCount":"","year":""}"#)
            .expect("create");
        assert_eq!(reader.list_authors().expect("authors"), vec![""]);
    }

    #[test]
    fn distinct_ids_each_insert_once() {
        let (writer, reader) = services();
        for id in ["a", "b", "c"] {
            let payload = format!(r#"{{"id":"{id}","name":"n-{id}"}}"#);
            writer.create_book(payload.as_bytes()).expect("create");
        }
        let ids: Vec<_> = reader
            .list_books()
            .expect("books")
            .into_iter()
            .map(|book| book.id)
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }
}
