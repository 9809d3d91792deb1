//! Purpose: Read-only projections over the record store.
//! Exports: `ReadService`.
//! Role: Backs `GET /api/books`, `/api/authors`, and `/api/years`.
//! Invariants: Fails closed; a scan error yields no partial result.
//! Invariants: Authors and years keep one entry per record, in store order, duplicates included.

use super::book::{Book, BookSummary};
use super::records::{Collection, RecordStore};
use crate::core::error::Error;

#[derive(Clone, Debug)]
pub struct ReadService {
    records: RecordStore,
    collection: Collection,
}

impl ReadService {
    pub fn new(records: RecordStore, collection: Collection) -> Self {
        Self {
            records,
            collection,
        }
    }

    pub fn collection(&self) -> &Collection {
        &self.collection
    }

    pub fn list_books(&self) -> Result<Vec<BookSummary>, Error> {
        Ok(self.scan()?.iter().map(Book::summary).collect())
    }

    pub fn list_authors(&self) -> Result<Vec<String>, Error> {
        Ok(self.scan()?.into_iter().map(|book| book.author).collect())
    }

    pub fn list_years(&self) -> Result<Vec<String>, Error> {
        Ok(self.scan()?.into_iter().map(|book| book.year).collect())
    }

    fn scan(&self) -> Result<Vec<Book>, Error> {
        self.records.find_all(&self.collection)
    }
}
