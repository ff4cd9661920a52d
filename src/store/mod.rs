//! Document persistence.
//!
//! Records are schema-less JSON objects grouped into named collections. The
//! [`DocumentStore`] trait is the only seam between the HTTP layer and a
//! backend; typed access goes through [`crate::repository::Repository`].

pub mod memory;
pub mod postgres;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

pub use memory::MemoryStore;
pub use postgres::PostgresStore;

/// Field set of a stored document, without its identity or timestamps.
pub type Document = Map<String, Value>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document store unavailable: {0}")]
    Unavailable(String),
    #[error("document is not a JSON object: {0}")]
    Serialization(String),
    #[error("stored document {id} in `{collection}` cannot be decoded: {reason}")]
    Corrupt {
        collection: String,
        id: DocumentId,
        reason: String,
    },
}

impl From<sqlx::Error> for StoreError {
    fn from(value: sqlx::Error) -> Self {
        StoreError::Unavailable(value.to_string())
    }
}

/// Store-assigned identity, exposed as an opaque string at the API boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
#[schema(value_type = String, example = "0b6f3c1e-2f57-4a5e-9a0e-4d4c1f0e8a11")]
pub struct DocumentId(Uuid);

impl DocumentId {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl From<Uuid> for DocumentId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

#[derive(Debug, Error)]
#[error("`{0}` is not a valid document id")]
pub struct InvalidDocumentId(String);

impl FromStr for DocumentId {
    type Err = InvalidDocumentId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::try_parse(s.trim())
            .map(Self)
            .map_err(|_| InvalidDocumentId(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: DocumentId,
    pub body: Document,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Conjunction of top-level field equalities. An empty filter matches everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    fields: Vec<(String, Value)>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::all().and_eq(field, value)
    }

    pub fn and_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.push((field.into(), value.into()));
        self
    }

    pub fn matches(&self, body: &Document) -> bool {
        self.fields
            .iter()
            .all(|(field, expected)| body.get(field) == Some(expected))
    }

    /// JSON object usable as a containment (`@>`) pattern.
    pub fn as_document(&self) -> Document {
        self.fields.iter().cloned().collect()
    }
}

/// Describes an insert that is only allowed while the number of child
/// documents referencing a parent stays below the parent's capacity field.
#[derive(Debug, Clone, Copy)]
pub struct CapacityGuard<'a> {
    pub parent_collection: &'a str,
    pub parent_id: DocumentId,
    pub capacity_field: &'a str,
    pub child_collection: &'a str,
    pub reference_field: &'a str,
}

impl CapacityGuard<'_> {
    pub fn child_filter(&self) -> Filter {
        Filter::eq(self.reference_field, self.parent_id.to_string())
    }

    /// Capacity as recorded on the parent; absent or malformed means zero seats.
    pub fn capacity_of(&self, parent: &Document) -> u64 {
        parent
            .get(self.capacity_field)
            .and_then(Value::as_u64)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardedInsert {
    Inserted(DocumentId),
    ParentMissing,
    Full { capacity: u64 },
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Short backend name reported by the diagnostic endpoint.
    fn backend(&self) -> &'static str;

    async fn ping(&self) -> Result<(), StoreError>;

    async fn list_collections(&self) -> Result<Vec<String>, StoreError>;

    async fn insert(&self, collection: &str, body: Document) -> Result<DocumentId, StoreError>;

    /// Returns at most `limit` matches in insertion order; `None` means unbounded.
    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        limit: Option<usize>,
    ) -> Result<Vec<StoredDocument>, StoreError>;

    async fn find_by_id(
        &self,
        collection: &str,
        id: DocumentId,
    ) -> Result<Option<StoredDocument>, StoreError>;

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError>;

    /// Replaces the fields of the document whose `field` equals `value`, or
    /// inserts `body` when none exists. Concurrent calls for the same key are
    /// serialized, so a key never ends up with two documents.
    async fn upsert_by(
        &self,
        collection: &str,
        field: &str,
        value: &str,
        body: Document,
    ) -> Result<DocumentId, StoreError>;

    /// Reads the parent, counts its children and inserts `body` as one atomic step.
    async fn insert_within_capacity(
        &self,
        guard: &CapacityGuard<'_>,
        body: Document,
    ) -> Result<GuardedInsert, StoreError>;
}
