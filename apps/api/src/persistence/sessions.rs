//! Conversation state: where a session is in its flow and what it has collected.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;

use crate::flow::model::NodeType;
use crate::flow::value::Bindings;
use crate::models::flow::ConversationStateRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Waiting for the user to answer the current question.
    AwaitingAnswer,
    /// Held by a wait node until `pending.resumeAt`.
    Waiting,
    Completed,
    /// A condition branch had no edge to follow.
    Stalled,
    Failed,
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Completed | SessionStatus::Stalled | SessionStatus::Failed
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingWait {
    pub node_id: String,
    pub resume_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub node_id: String,
    pub node_type: NodeType,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationState {
    pub flow_id: String,
    pub current_node_id: Option<String>,
    #[serde(default)]
    pub bindings: Bindings,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pending: Option<PendingWait>,
    pub status: SessionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub history: Vec<HistoryEntry>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ConversationState {
    /// A session positioned on the flow's start node, seeded with declared defaults.
    pub fn new(flow_id: impl Into<String>, start_node_id: impl Into<String>, bindings: Bindings) -> Self {
        let now = Utc::now();
        Self {
            flow_id: flow_id.into(),
            current_node_id: Some(start_node_id.into()),
            bindings,
            pending: None,
            status: SessionStatus::AwaitingAnswer,
            error: None,
            history: Vec::new(),
            started_at: now,
            updated_at: now,
        }
    }
}

#[async_trait]
pub trait ConversationStateStore: Send + Sync {
    async fn load(&self, session_id: &str) -> Result<Option<ConversationState>>;
    async fn save(&self, session_id: &str, state: &ConversationState) -> Result<()>;
}

pub struct PgConversationStateStore {
    pool: PgPool,
}

impl PgConversationStateStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConversationStateStore for PgConversationStateStore {
    async fn load(&self, session_id: &str) -> Result<Option<ConversationState>> {
        let row = sqlx::query_as::<_, ConversationStateRow>(
            "SELECT * FROM conversation_states WHERE session_id = $1",
        )
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            serde_json::from_value(row.state)
                .with_context(|| format!("Session '{}' has unreadable state", row.session_id))
        })
        .transpose()
    }

    async fn save(&self, session_id: &str, state: &ConversationState) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO conversation_states (session_id, flow_id, state, updated_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (session_id) DO UPDATE
            SET flow_id = EXCLUDED.flow_id, state = EXCLUDED.state, updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(session_id)
        .bind(&state.flow_id)
        .bind(serde_json::to_value(state)?)
        .bind(state.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[cfg(test)]
pub use memory::InMemoryConversationStateStore;
