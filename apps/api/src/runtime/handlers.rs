use axum::{
    extract::{Path, State},
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::AppError;
use crate::flow::value::Scalar;
use crate::persistence::gateway::authorize;
use crate::persistence::sessions::ConversationState;
use crate::routes::principal::Principal;
use crate::runtime::runner::Prompt;
use crate::state::AppState;

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvanceRequest {
    pub flow_id: String,
    #[serde(default)]
    pub answer: Option<Scalar>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvanceResponse {
    pub session_id: String,
    pub session: ConversationState,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<Prompt>,
}

/// POST /api/v1/sessions/:session_id/advance
pub async fn handle_advance(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Principal(principal): Principal,
    Json(req): Json<AdvanceRequest>,
) -> Result<Json<AdvanceResponse>, AppError> {
    let doc = state.flows.get(&req.flow_id, principal).await?.data;

    let (mut session, answer) = match state.sessions.load(&session_id).await? {
        Some(session) => (session, req.answer),
        None => {
            if req.answer.is_some() {
                return Err(AppError::Validation(
                    "A new session has no question to answer yet".to_string(),
                ));
            }
            info!("Starting session {session_id} on flow {}", doc.id);
            (state.runner.start(&doc)?, None)
        }
    };

    let prompt = state
        .runner
        .advance(&doc, &mut session, answer, Utc::now())
        .await?;
    state.sessions.save(&session_id, &session).await?;

    Ok(Json(AdvanceResponse {
        session_id,
        session,
        prompt,
    }))
}

/// GET /api/v1/sessions/:session_id
pub async fn handle_get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Principal(principal): Principal,
) -> Result<Json<ConversationState>, AppError> {
    let session = state
        .sessions
        .load(&session_id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("Session '{session_id}' not found")))?;
    authorize(&session.flow_id, principal)?;
    Ok(Json(session))
}
