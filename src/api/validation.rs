//! Purpose: Turn raw write payloads into candidate `Book` values.
//! Exports: `parse_book_payload`.
//! Role: The only place request bodies are interpreted; the write path trusts its output.
//! Invariants: Failures are always `ErrorKind::Validation`; nothing is normalized or trimmed.
//! Invariants: Legacy field names (`BookName`, ...) are accepted; canonical names win on overlap.

use super::book::{BOOK_FIELDS, Book, wire_field};
use crate::core::error::{Error, ErrorKind};
use serde_json::{Map, Value};

pub fn parse_book_payload(payload: &[u8]) -> Result<Book, Error> {
    let value: Value = serde_json::from_slice(payload).map_err(|err| {
        Error::new(ErrorKind::Validation)
            .with_message(format!("request body is not valid JSON: {err}"))
            .with_source(err)
    })?;
    let Value::Object(object) = value else {
        return Err(Error::new(ErrorKind::Validation)
            .with_message("request body must be a JSON object")
            .with_hint("Send {\"id\": \"...\", \"name\": \"...\", ...}."));
    };

    let mut book = Book::default();
    for field in BOOK_FIELDS {
        if let Some(value) = lookup(&object, field)? {
            book.set_field(field, value);
        }
    }
    Ok(book)
}

fn lookup(object: &Map<String, Value>, field: &str) -> Result<Option<String>, Error> {
    match wire_field(object, field) {
        None | Some((_, Value::Null)) => Ok(None),
        Some((_, Value::String(value))) => Ok(Some(value.clone())),
        Some((name, other)) => Err(Error::new(ErrorKind::Validation)
            .with_message(format!("field {name:?} must be a string, got {other}"))
            .with_hint("Book fields are stored as text; quote numbers like \"412\".")),
    }
}
