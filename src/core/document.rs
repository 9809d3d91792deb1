// Document shape shared by the store backends: a store-assigned key plus a JSON object body.
use serde_json::{Map, Value};

use crate::core::error::{Error, ErrorKind};
use crate::core::key::DocumentKey;

/// Reserved body field carrying the store-assigned key in persisted form.
pub const KEY_FIELD: &str = "_key";

#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    pub key: DocumentKey,
    pub body: Map<String, Value>,
}

impl Document {
    pub fn new(key: DocumentKey, mut body: Map<String, Value>) -> Self {
        body.remove(KEY_FIELD);
        Self { key, body }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.body.get(field)
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.body.get(field).and_then(Value::as_str)
    }

    pub(crate) fn to_json(&self) -> Value {
        let mut out = Map::with_capacity(self.body.len() + 1);
        out.insert(KEY_FIELD.to_string(), Value::String(self.key.to_string()));
        for (field, value) in &self.body {
            out.insert(field.clone(), value.clone());
        }
        Value::Object(out)
    }

    pub(crate) fn from_json(value: Value) -> Result<Self, Error> {
        let Value::Object(mut body) = value else {
            return Err(Error::new(ErrorKind::Corrupt).with_message("document is not an object"));
        };
        let key = match body.remove(KEY_FIELD) {
            Some(Value::String(raw)) => DocumentKey::parse(&raw)?,
            _ => {
                return Err(Error::new(ErrorKind::Corrupt)
                    .with_message(format!("document is missing {KEY_FIELD}")));
            }
        };
        Ok(Self { key, body })
    }
}

/// Conjunction of field-equality clauses. An empty filter matches every document.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<(String, Value)>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::all().and_eq(field, value)
    }

    pub fn and_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.push((field.into(), value.into()));
        self
    }

    pub fn is_all(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn matches(&self, document: &Document) -> bool {
        self.clauses.iter().all(|(field, expected)| {
            if field == KEY_FIELD {
                return expected.as_str() == Some(document.key.as_str());
            }
            document.get(field) == Some(expected)
        })
    }
}

/// Lazy result of a scan. Dropping it releases whatever the backend holds open.
pub struct Documents {
    inner: Box<dyn Iterator<Item = Result<Document, Error>> + Send>,
}

impl Documents {
    pub fn new<I>(iter: I) -> Self
    where
        I: Iterator<Item = Result<Document, Error>> + Send + 'static,
    {
        Self {
            inner: Box::new(iter),
        }
    }

    pub fn from_vec(documents: Vec<Document>) -> Self {
        Self::new(documents.into_iter().map(Ok))
    }

    pub fn filtered(self, filter: Filter) -> Self {
        if filter.is_all() {
            return self;
        }
        Self::new(self.inner.filter(move |item| match item {
            Ok(document) => filter.matches(document),
            Err(_) => true,
        }))
    }

    /// Drains the scan, failing on the first backend error.
    pub fn collect_all(self) -> Result<Vec<Document>, Error> {
        self.collect()
    }
}

impl Iterator for Documents {
    type Item = Result<Document, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}
