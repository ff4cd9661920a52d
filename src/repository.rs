use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::models::Record;
use crate::store::{
    CapacityGuard, Document, DocumentId, DocumentStore, Filter, GuardedInsert, StoreError,
    StoredDocument,
};

/// A type persisted as one document per value in a fixed collection.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync {
    const COLLECTION: &'static str;
}

/// Typed view over a [`DocumentStore`] collection.
pub struct Repository<T> {
    store: Arc<dyn DocumentStore>,
    _entity: PhantomData<fn() -> T>,
}

impl<T> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            _entity: PhantomData,
        }
    }
}

impl<T: Entity> Repository<T> {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self {
            store,
            _entity: PhantomData,
        }
    }

    pub async fn insert(&self, entity: &T) -> Result<DocumentId, StoreError> {
        self.store.insert(T::COLLECTION, to_document(entity)?).await
    }

    pub async fn list(
        &self,
        filter: &Filter,
        limit: Option<usize>,
    ) -> Result<Vec<Record<T>>, StoreError> {
        self.store
            .find(T::COLLECTION, filter, limit)
            .await?
            .into_iter()
            .map(from_stored)
            .collect()
    }

    pub async fn upsert_by(
        &self,
        field: &str,
        value: &str,
        entity: &T,
    ) -> Result<DocumentId, StoreError> {
        self.store
            .upsert_by(T::COLLECTION, field, value, to_document(entity)?)
            .await
    }

    /// Inserts `entity` only while fewer than `capacity_field` documents of
    /// this collection reference `parent_id` through `reference_field`.
    pub async fn insert_within_capacity<P: Entity>(
        &self,
        parent_id: DocumentId,
        capacity_field: &str,
        reference_field: &str,
        entity: &T,
    ) -> Result<GuardedInsert, StoreError> {
        let guard = CapacityGuard {
            parent_collection: P::COLLECTION,
            parent_id,
            capacity_field,
            child_collection: T::COLLECTION,
            reference_field,
        };
        self.store
            .insert_within_capacity(&guard, to_document(entity)?)
            .await
    }
}

fn to_document<T: Serialize>(entity: &T) -> Result<Document, StoreError> {
    match serde_json::to_value(entity) {
        Ok(Value::Object(body)) => Ok(body),
        Ok(other) => Err(StoreError::Serialization(format!(
            "expected an object, got {other}"
        ))),
        Err(e) => Err(StoreError::Serialization(e.to_string())),
    }
}

fn from_stored<T: Entity>(doc: StoredDocument) -> Result<Record<T>, StoreError> {
    let data = serde_json::from_value(Value::Object(doc.body)).map_err(|e| {
        StoreError::Corrupt {
            collection: T::COLLECTION.to_string(),
            id: doc.id,
            reason: e.to_string(),
        }
    })?;
    Ok(Record {
        id: doc.id,
        data,
        created_at: doc.created_at,
        updated_at: doc.updated_at,
    })
}
