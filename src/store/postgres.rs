//! `PostgreSQL` backend.
//!
//! All collections share a single `documents` table; the field set lives in a
//! `JSONB` column and filters are evaluated with the containment operator.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::info;
use uuid::Uuid;

use super::{
    CapacityGuard, Document, DocumentId, DocumentStore, Filter, GuardedInsert, StoreError,
    StoredDocument,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS documents (
    seq         BIGSERIAL,
    id          UUID PRIMARY KEY,
    collection  TEXT NOT NULL,
    body        JSONB NOT NULL,
    created_at  TIMESTAMPTZ NOT NULL DEFAULT NOW(),
    updated_at  TIMESTAMPTZ NOT NULL DEFAULT NOW()
);
CREATE INDEX IF NOT EXISTS documents_collection_seq_idx ON documents (collection, seq);
"#;

#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connects and makes sure the `documents` table exists.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        let store = Self::new(pool);
        store.bootstrap().await?;
        info!("Connected to PostgreSQL document store");
        Ok(store)
    }

    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn bootstrap(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    async fn insert_in(
        tx: &mut Transaction<'_, Postgres>,
        collection: &str,
        body: &Document,
    ) -> Result<DocumentId, StoreError> {
        let id = DocumentId::new();
        sqlx::query("INSERT INTO documents (id, collection, body) VALUES ($1, $2, $3)")
            .bind(id.as_uuid())
            .bind(collection)
            .bind(Json(body))
            .execute(&mut **tx)
            .await?;
        Ok(id)
    }
}

fn decode_row(collection: &str, row: PgRow) -> Result<StoredDocument, StoreError> {
    let id: Uuid = row.try_get("id")?;
    let id = DocumentId::from(id);
    let Json(body): Json<Document> = row.try_get("body").map_err(|e| StoreError::Corrupt {
        collection: collection.to_string(),
        id,
        reason: e.to_string(),
    })?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;
    let updated_at: DateTime<Utc> = row.try_get("updated_at")?;
    Ok(StoredDocument {
        id,
        body,
        created_at,
        updated_at,
    })
}

#[async_trait]
impl DocumentStore for PostgresStore {
    fn backend(&self) -> &'static str {
        "postgres"
    }

    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn list_collections(&self) -> Result<Vec<String>, StoreError> {
        let names: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT collection FROM documents ORDER BY collection")
                .fetch_all(&self.pool)
                .await?;
        Ok(names.into_iter().map(|(name,)| name).collect())
    }

    async fn insert(&self, collection: &str, body: Document) -> Result<DocumentId, StoreError> {
        let mut tx = self.pool.begin().await?;
        let id = Self::insert_in(&mut tx, collection, &body).await?;
        tx.commit().await?;
        Ok(id)
    }

    async fn find(
        &self,
        collection: &str,
        filter: &Filter,
        limit: Option<usize>,
    ) -> Result<Vec<StoredDocument>, StoreError> {
        // LIMIT NULL is unbounded in PostgreSQL
        let limit = limit.map(|l| i64::try_from(l).unwrap_or(i64::MAX));
        let rows = sqlx::query(
            "SELECT id, body, created_at, updated_at FROM documents
             WHERE collection = $1 AND body @> $2
             ORDER BY seq
             LIMIT $3",
        )
        .bind(collection)
        .bind(Json(filter.as_document()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| decode_row(collection, row))
            .collect()
    }

    async fn find_by_id(
        &self,
        collection: &str,
        id: DocumentId,
    ) -> Result<Option<StoredDocument>, StoreError> {
        let row = sqlx::query(
            "SELECT id, body, created_at, updated_at FROM documents
             WHERE collection = $1 AND id = $2",
        )
        .bind(collection)
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| decode_row(collection, row)).transpose()
    }

    async fn count(&self, collection: &str, filter: &Filter) -> Result<u64, StoreError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM documents WHERE collection = $1 AND body @> $2")
                .bind(collection)
                .bind(Json(filter.as_document()))
                .fetch_one(&self.pool)
                .await?;
        Ok(count.max(0) as u64)
    }

    async fn upsert_by(
        &self,
        collection: &str,
        field: &str,
        value: &str,
        body: Document,
    ) -> Result<DocumentId, StoreError> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(format!("{collection}:{field}:{value}"))
            .execute(&mut *tx)
            .await?;

        let existing: Option<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM documents
             WHERE collection = $1 AND body ->> $2 = $3
             ORDER BY seq
             LIMIT 1",
        )
        .bind(collection)
        .bind(field)
        .bind(value)
        .fetch_optional(&mut *tx)
        .await?;

        let id = match existing {
            Some((id,)) => {
                sqlx::query(
                    "UPDATE documents SET body = body || $2, updated_at = NOW() WHERE id = $1",
                )
                .bind(id)
                .bind(Json(&body))
                .execute(&mut *tx)
                .await?;
                DocumentId::from(id)
            }
            None => Self::insert_in(&mut tx, collection, &body).await?,
        };

        tx.commit().await?;
        Ok(id)
    }

    async fn insert_within_capacity(
        &self,
        guard: &CapacityGuard<'_>,
        body: Document,
    ) -> Result<GuardedInsert, StoreError> {
        let mut tx = self.pool.begin().await?;

        // Row lock on the parent serializes every insert against it.
        let parent: Option<(Json<Document>,)> = sqlx::query_as(
            "SELECT body FROM documents WHERE collection = $1 AND id = $2 FOR UPDATE",
        )
        .bind(guard.parent_collection)
        .bind(guard.parent_id.as_uuid())
        .fetch_optional(&mut *tx)
        .await?;
        let Some((Json(parent),)) = parent else {
            return Ok(GuardedInsert::ParentMissing);
        };
        let capacity = guard.capacity_of(&parent);

        let (booked,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM documents WHERE collection = $1 AND body @> $2")
                .bind(guard.child_collection)
                .bind(Json(guard.child_filter().as_document()))
                .fetch_one(&mut *tx)
                .await?;
        if booked.max(0) as u64 >= capacity {
            return Ok(GuardedInsert::Full { capacity });
        }

        let id = Self::insert_in(&mut tx, guard.child_collection, &body).await?;
        tx.commit().await?;
        Ok(GuardedInsert::Inserted(id))
    }
}
