//! Flow records and the storage seam behind the gateway.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sqlx::PgPool;
use uuid::Uuid;

use crate::flow::model::FlowDocument;
use crate::models::flow::FlowRow;

/// A stored flow: the document plus the columns the product keeps beside it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowRecord {
    pub id: String,
    pub name: String,
    pub description: String,
    pub data: FlowDocument,
    pub is_live: bool,
    pub mapping_config: Option<Value>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl FlowRecord {
    /// A not-yet-stored record mirroring the document's identity and timestamps.
    pub fn from_document(data: FlowDocument, created_by: Option<Uuid>) -> Self {
        Self {
            id: data.id.clone(),
            name: data.name.clone(),
            description: data.description.clone(),
            is_live: false,
            mapping_config: None,
            created_by,
            created_at: data.created_at,
            updated_at: data.updated_at,
            data,
        }
    }
}

impl TryFrom<FlowRow> for FlowRecord {
    type Error = anyhow::Error;

    fn try_from(row: FlowRow) -> Result<Self> {
        let data = serde_json::from_value(row.data)
            .with_context(|| format!("Stored flow '{}' has an unreadable document", row.id))?;
        Ok(Self {
            id: row.id,
            name: row.name,
            description: row.description,
            data,
            is_live: row.is_live,
            mapping_config: row.mapping_config,
            created_by: row.created_by,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[async_trait]
pub trait FlowRepository: Send + Sync {
    async fn fetch(&self, id: &str) -> Result<Option<FlowRecord>>;

    /// Every stored flow, most recently updated first.
    async fn list(&self) -> Result<Vec<FlowRecord>>;

    async fn insert(&self, record: &FlowRecord) -> Result<()>;

    /// Overwrites an existing row. Returns `false` when there was no row to overwrite.
    async fn replace(&self, record: &FlowRecord) -> Result<bool>;

    /// Returns `false` when the id was not stored.
    async fn remove(&self, id: &str) -> Result<bool>;
}

// ────────────────────────────────────────────────────────────────────────────
// PostgreSQL
// ────────────────────────────────────────────────────────────────────────────

pub struct PgFlowRepository {
    pool: PgPool,
}

impl PgFlowRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FlowRepository for PgFlowRepository {
    async fn fetch(&self, id: &str) -> Result<Option<FlowRecord>> {
        let row = sqlx::query_as::<_, FlowRow>("SELECT * FROM flows WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(FlowRecord::try_from).transpose()
    }

    async fn list(&self) -> Result<Vec<FlowRecord>> {
        sqlx::query_as::<_, FlowRow>("SELECT * FROM flows ORDER BY updated_at DESC")
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(FlowRecord::try_from)
            .collect()
    }

    async fn insert(&self, record: &FlowRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO flows
                (id, name, description, data, is_live, mapping_config, created_by,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&record.id)
        .bind(&record.name)
        .bind(&record.description)
        .bind(serde_json::to_value(&record.data)?)
        .bind(record.is_live)
        .bind(&record.mapping_config)
        .bind(record.created_by)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn replace(&self, record: &FlowRecord) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE flows
            SET name = $2, description = $3, data = $4, is_live = $5,
                mapping_config = $6, updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(&record.id)
        .bind(&record.name)
        .bind(&record.description)
        .bind(serde_json::to_value(&record.data)?)
        .bind(record.is_live)
        .bind(&record.mapping_config)
        .bind(record.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn remove(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM flows WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// In-memory (tests)
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub use memory::InMemoryFlowRepository;
