//! Document store contract and its backends
//!
//! Everything the application persists goes through [`DocumentStore`]: keyed
//! documents grouped in collections (`users`, `projects`,
//! `projects/{id}/items`), filtered snapshot queries, live query subscriptions
//! and all-or-nothing write batches. Two backends ship with the crate:
//!
//! - [`MemoryStore`], an in-process store used by tests and demos
//! - [`RestStore`], a PostgREST-backed store reached over HTTP

mod error;
mod memory;
mod query;
mod rest;
mod subscription;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use error::StoreError;
pub use memory::MemoryStore;
pub use query::{Filter, OrderBy, Query, SortOrder};
pub use rest::RestStore;
pub use subscription::{CancelHandle, Snapshot, Subscription};

/// Field map of a document, without its key and server timestamp
pub type Fields = serde_json::Map<String, Value>;

/// A stored document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Key of the document inside its collection
    pub id: String,

    /// Server-assigned creation time
    pub created_at: DateTime<Utc>,

    /// User fields
    pub fields: Fields,
}

impl Document {
    /// Look up a field, including the `id` and `created_at` pseudo-fields
    pub fn value(&self, field: &str) -> Option<Value> {
        match field {
            "id" => Some(Value::String(self.id.clone())),
            "created_at" => Some(Value::String(self.created_at.to_rfc3339())),
            other => self.fields.get(other).cloned(),
        }
    }

    /// Deserialize the document into a typed record
    ///
    /// `id` and `created_at` are injected next to the user fields so records
    /// can carry them as ordinary struct fields.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        let mut object = self.fields.clone();
        object.insert("id".to_string(), Value::String(self.id.clone()));
        object.insert(
            "created_at".to_string(),
            serde_json::to_value(self.created_at)?,
        );
        serde_json::from_value(Value::Object(object))
            .map_err(|e| StoreError::malformed(&self.id, e))
    }
}

/// Serialize a record into a field map
pub fn to_fields<T: Serialize>(value: &T) -> Result<Fields, StoreError> {
    match serde_json::to_value(value)? {
        Value::Object(map) => Ok(map),
        other => Err(StoreError::malformed(
            "<new>",
            format!("expected an object, got {}", other),
        )),
    }
}

/// A single write inside a [`WriteBatch`]
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Write {
    /// Create or overwrite a document; with `merge` only the given fields are replaced
    Set {
        collection: String,
        id: String,
        fields: Fields,
        merge: bool,
    },

    /// Partially update an existing document; fails the batch when it is absent
    Update {
        collection: String,
        id: String,
        fields: Fields,
    },

    /// Remove a document; absent documents are not an error
    Delete {
        collection: String,
        id: String,
    },
}

impl Write {
    pub fn collection(&self) -> &str {
        match self {
            Write::Set { collection, .. }
            | Write::Update { collection, .. }
            | Write::Delete { collection, .. } => collection,
        }
    }
}

/// Writes applied together, all or nothing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    writes: Vec<Write>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a full overwrite of `collection/id`
    pub fn set(&mut self, collection: &str, id: &str, fields: Fields) -> &mut Self {
        self.writes.push(Write::Set {
            collection: collection.to_string(),
            id: id.to_string(),
            fields,
            merge: false,
        });
        self
    }

    /// Queue an upsert of `collection/id` that preserves fields not supplied
    pub fn merge(&mut self, collection: &str, id: &str, fields: Fields) -> &mut Self {
        self.writes.push(Write::Set {
            collection: collection.to_string(),
            id: id.to_string(),
            fields,
            merge: true,
        });
        self
    }

    /// Queue a partial update of an existing document
    pub fn update(&mut self, collection: &str, id: &str, fields: Fields) -> &mut Self {
        self.writes.push(Write::Update {
            collection: collection.to_string(),
            id: id.to_string(),
            fields,
        });
        self
    }

    /// Queue a delete
    pub fn delete(&mut self, collection: &str, id: &str) -> &mut Self {
        self.writes.push(Write::Delete {
            collection: collection.to_string(),
            id: id.to_string(),
        });
        self
    }

    pub fn len(&self) -> usize {
        self.writes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.writes.is_empty()
    }

    pub fn writes(&self) -> &[Write] {
        &self.writes
    }
}

/// Contract every document store backend fulfils
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Read one document; `StoreError::NotFound` when it is absent
    async fn get(&self, collection: &str, id: &str) -> Result<Document, StoreError>;

    /// Run a filtered, ordered snapshot query
    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError>;

    /// Start a live query; the first snapshot is delivered right away
    async fn subscribe(&self, query: &Query) -> Result<Subscription, StoreError>;

    /// Create a document with a generated id and a server timestamp
    async fn add(&self, collection: &str, fields: Fields) -> Result<Document, StoreError>;

    /// Partially update a document; `StoreError::NotFound` when it is absent
    async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<(), StoreError>;

    /// Remove a document
    async fn delete(&self, collection: &str, id: &str) -> Result<(), StoreError>;

    /// Apply every write of the batch or none of them
    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError>;
}
