// In-process document store. Scans return snapshots; all mutation happens under one mutex.
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use serde_json::{Map, Value};

use crate::core::document::{Document, Documents, Filter};
use crate::core::error::{Error, ErrorKind};
use crate::core::key::{DocumentKey, KeyGenerator};
use crate::core::store::{DocumentStore, duplicate_error, unique_conflict, validate_name};

type Databases = BTreeMap<String, BTreeMap<String, MemoryCollection>>;

#[derive(Debug)]
pub struct MemoryStore {
    databases: Mutex<Databases>,
    keys: KeyGenerator,
}

#[derive(Debug, Default)]
struct MemoryCollection {
    documents: Vec<Document>,
    unique: Vec<String>,
}

impl MemoryStore {
    pub fn new() -> Result<Self, Error> {
        Ok(Self {
            databases: Mutex::new(BTreeMap::new()),
            keys: KeyGenerator::new()?,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Databases>, Error> {
        self.databases
            .lock()
            .map_err(|_| Error::new(ErrorKind::Internal).with_message("memory store lock poisoned"))
    }
}

impl DocumentStore for MemoryStore {
    fn describe(&self) -> String {
        "memory:".to_string()
    }

    fn list_collections(&self, database: &str) -> Result<Vec<String>, Error> {
        validate_name("database", database)?;
        let databases = self.lock()?;
        Ok(databases
            .get(database)
            .map(|collections| collections.keys().cloned().collect())
            .unwrap_or_default())
    }

    fn create_collection(&self, database: &str, collection: &str) -> Result<(), Error> {
        validate_name("database", database)?;
        validate_name("collection", collection)?;
        let mut databases = self.lock()?;
        let collections = databases.entry(database.to_string()).or_default();
        if collections.contains_key(collection) {
            return Err(Error::new(ErrorKind::Conflict)
                .with_message(format!("collection {database}.{collection} already exists")));
        }
        collections.insert(collection.to_string(), MemoryCollection::default());
        Ok(())
    }

    fn create_unique_index(
        &self,
        database: &str,
        collection: &str,
        field: &str,
    ) -> Result<(), Error> {
        validate_name("database", database)?;
        validate_name("collection", collection)?;
        let mut databases = self.lock()?;
        let target = databases
            .entry(database.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default();
        if target.unique.iter().any(|existing| existing == field) {
            return Ok(());
        }
        let wanted = vec![field.to_string()];
        for (pos, document) in target.documents.iter().enumerate() {
            let clash = target.documents[..pos]
                .iter()
                .any(|earlier| unique_conflict(&wanted, earlier, &document.body).is_some());
            if clash {
                return Err(Error::new(ErrorKind::Conflict).with_message(format!(
                    "existing documents share a value for {field:?}; cannot build unique index"
                )));
            }
        }
        target.unique.push(field.to_string());
        Ok(())
    }

    fn find(&self, database: &str, collection: &str, filter: Filter) -> Result<Documents, Error> {
        validate_name("database", database)?;
        validate_name("collection", collection)?;
        let databases = self.lock()?;
        let snapshot = databases
            .get(database)
            .and_then(|collections| collections.get(collection))
            .map(|target| {
                target
                    .documents
                    .iter()
                    .filter(|document| filter.matches(document))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(Documents::from_vec(snapshot))
    }

    fn insert_one(
        &self,
        database: &str,
        collection: &str,
        body: Map<String, Value>,
    ) -> Result<DocumentKey, Error> {
        validate_name("database", database)?;
        validate_name("collection", collection)?;
        let mut databases = self.lock()?;
        let target = databases
            .entry(database.to_string())
            .or_default()
            .entry(collection.to_string())
            .or_default();
        for existing in &target.documents {
            if let Some(field) = unique_conflict(&target.unique, existing, &body) {
                return Err(duplicate_error(field, &body));
            }
        }
        let document = Document::new(self.keys.next_key(), body);
        let key = document.key.clone();
        target.documents.push(document);
        Ok(key)
    }
}
