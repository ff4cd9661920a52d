use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{
    CapacityGuard, Document, DocumentId, DocumentStore, Filter, GuardedInsert, StoreError,
    StoredDocument,
};

/// In-process store. Collections keep insertion order and appear on first insert.
#[derive(Default)]
pub struct MemoryStore {
    collections: RwLock<BTreeMap<String, Vec<StoredDocument>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn push(
    collections: &mut BTreeMap<String, Vec<StoredDocument>>,
    collection: &str,
    body: Document,
) -> DocumentId {
    let now = Utc::now();
    let id = DocumentId::new();
    collections
        .entry(collection.to_string())
        .or_default()
        .push(StoredDocument {
            id,
            body,
            created_at: now,
            updated_at: now,
        });
    id
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn backend(&self) -> &'static str {
        "memory"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.collections.read().await.keys().cloned().collect())
    }

    async fn insert(&self, collection: &str, body: Document) -> Result<DocumentId, StoreError> {
        let mut collections = self.collections.write().await;
        Ok(push(&mut collections, collection, body))
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        limit: Option<usize>,
    ) -> Result<Vec<StoredDocument>, StoreError> {
        let collections = self.collections.read().await;
        let Some(docs) = collections.get(collection) else {
            return Ok(Vec::new());
        };
        Ok(docs
            .iter()
            .filter(|doc| filter.matches(&doc.body))
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    async fn find_by_id(
        &self,
        collection: &str,
        id: DocumentId,
    ) -> Result<Option<StoredDocument>, StoreError> {
        let collections = self.collections.read().await;
        Ok(collections
            .get(collection)
            .and_then(|docs| docs.iter().find(|doc| doc.id == id))
            .cloned())
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        let collections = self.collections.read().await;
        let count = collections
            .get(collection)
            .map(|docs| docs.iter().filter(|doc| filter.matches(&doc.body)).count())
            .unwrap_or(0);
        Ok(count as u64)
    }

    async fn upsert_by(
        &self,
        collection: &str,
        field: &str,
        value: &str,
        body: Document,
    ) -> Result<DocumentId, StoreError> {
        let mut collections = self.collections.write().await;
        let key = Filter::eq(field, value);
        let existing = collections
            .get_mut(collection)
            .and_then(|docs| docs.iter_mut().find(|doc| key.matches(&doc.body)));

        match existing {
            Some(doc) => {
                doc.body.extend(body);
                doc.updated_at = Utc::now();
                Ok(doc.id)
            }
            None => Ok(push(&mut collections, collection, body)),
        }
    }

    async fn insert_within_capacity(
        &self,
        guard: &CapacityGuard<'_>,
        body: Document,
    ) -> Result<GuardedInsert, StoreError> {
        let mut collections = self.collections.write().await;

        let parent = collections
            .get(guard.parent_collection)
            .and_then(|docs| docs.iter().find(|doc| doc.id == guard.parent_id));
        let Some(parent) = parent else {
            return Ok(GuardedInsert::ParentMissing);
        };
        let capacity = guard.capacity_of(&parent.body);

        let filter = guard.child_filter();
        let booked = collections
            .get(guard.child_collection)
            .map(|docs| docs.iter().filter(|doc| filter.matches(&doc.body)).count())
            .unwrap_or(0) as u64;
        if booked >= capacity {
            return Ok(GuardedInsert::Full { capacity });
        }

        Ok(GuardedInsert::Inserted(push(
            &mut collections,
            guard.child_collection,
            body,
        )))
    }
}
