use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FlowRow {
    pub id: String,
    pub name: String,
    pub description: String,
    pub data: Value,
    pub is_live: bool,
    pub mapping_config: Option<Value>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ConversationStateRow {
    pub session_id: String,
    pub flow_id: String,
    pub state: Value,
    pub updated_at: DateTime<Utc>,
}
