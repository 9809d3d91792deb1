//! Purpose: Define the Book entity, its read projection, and its persisted document form.
//! Exports: `Book`, `BookSummary`, `BOOK_FIELDS`.
//! Role: Single mapping point between wire JSON, domain values, and store documents.
//! Invariants: `internal_key` is only ever populated from the store, never from callers.
//! Invariants: All descriptive fields are opaque strings; nothing is parsed or normalized.

use crate::core::document::Document;
use crate::core::error::{Error, ErrorKind};
use crate::core::key::DocumentKey;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Persisted field names, in the order documents are written.
pub const BOOK_FIELDS: [&str; 6] = ["id", "name", "author", "edition", "pageCount", "year"];

#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Book {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub internal_key: Option<DocumentKey>,
    pub id: String,
    pub name: String,
    pub author: String,
    pub edition: String,
    pub page_count: String,
    pub year: String,
}

/// `GET /api/books` projection. `year` is deliberately not part of it.
///
/// Deserialization also accepts the legacy read service's field names; a canonical
/// name wins when both are present.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookSummary {
    pub id: String,
    pub name: String,
    pub author: String,
    pub edition: String,
    pub page_count: String,
}

/// Canonical wire name paired with the name the legacy Go services used.
pub(crate) const LEGACY_FIELDS: [(&str, &str); 6] = [
    ("id", "ID"),
    ("name", "BookName"),
    ("author", "BookAuthor"),
    ("edition", "BookEdition"),
    ("pageCount", "BookPages"),
    ("year", "BookYear"),
];

/// Finds `field` in a wire object, falling back to its legacy name.
/// Returns the name that matched alongside the value.
pub(crate) fn wire_field<'a>(
    object: &'a Map<String, Value>,
    field: &'a str,
) -> Option<(&'a str, &'a Value)> {
    if let Some(value) = object.get(field) {
        return Some((field, value));
    }
    let (_, legacy) = LEGACY_FIELDS
        .iter()
        .find(|(canonical, _)| *canonical == field)?;
    object.get(*legacy).map(|value| (*legacy, value))
}

impl<'de> Deserialize<'de> for BookSummary {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let object = Map::<String, Value>::deserialize(deserializer)?;
        let text = |field: &'static str| -> Result<String, D::Error> {
            match wire_field(&object, field) {
                None | Some((_, Value::Null)) => Ok(String::new()),
                Some((_, Value::String(value))) => Ok(value.clone()),
                Some((name, other)) => Err(de::Error::custom(format!(
                    "field {name:?} must be a string, got {other}"
                ))),
            }
        };
        Ok(BookSummary {
            id: text("id")?,
            name: text("name")?,
            author: text("author")?,
            edition: text("edition")?,
            page_count: text("pageCount")?,
        })
    }
}

impl Book {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        author: impl Into<String>,
        edition: impl Into<String>,
        page_count: impl Into<String>,
        year: impl Into<String>,
    ) -> Self {
        Self {
            internal_key: None,
            id: id.into(),
            name: name.into(),
            author: author.into(),
            edition: edition.into(),
            page_count: page_count.into(),
            year: year.into(),
        }
    }

    pub fn summary(&self) -> BookSummary {
        BookSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            author: self.author.clone(),
            edition: self.edition.clone(),
            page_count: self.page_count.clone(),
        }
    }

    pub(crate) fn field(&self, name: &str) -> &str {
        match name {
            "id" => &self.id,
            "name" => &self.name,
            "author" => &self.author,
            "edition" => &self.edition,
            "pageCount" => &self.page_count,
            "year" => &self.year,
            _ => "",
        }
    }

    fn field_mut(&mut self, name: &str) -> Option<&mut String> {
        match name {
            "id" => Some(&mut self.id),
            "name" => Some(&mut self.name),
            "author" => Some(&mut self.author),
            "edition" => Some(&mut self.edition),
            "pageCount" => Some(&mut self.page_count),
            "year" => Some(&mut self.year),
            _ => None,
        }
    }

    /// Document body without the store key.
    pub(crate) fn to_body(&self) -> Map<String, Value> {
        BOOK_FIELDS
            .iter()
            .map(|field| (field.to_string(), Value::String(self.field(field).to_string())))
            .collect()
    }

    /// Missing fields read as empty strings; a non-string value means the record was not written by us.
    pub(crate) fn from_document(document: Document) -> Result<Self, Error> {
        let mut book = Book {
            internal_key: Some(document.key.clone()),
            ..Book::default()
        };
        for field in BOOK_FIELDS {
            let value = match document.get(field) {
                None | Some(Value::Null) => continue,
                Some(Value::String(value)) => value.clone(),
                Some(other) => {
                    return Err(Error::new(ErrorKind::Corrupt).with_message(format!(
                        "document {} has non-string {field}: {other}",
                        document.key
                    )));
                }
            };
            if let Some(slot) = book.field_mut(field) {
                *slot = value;
            }
        }
        Ok(book)
    }

    pub(crate) fn set_field(&mut self, name: &str, value: String) -> bool {
        match self.field_mut(name) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }
}
