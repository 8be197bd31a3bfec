use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::errors::AppError;
use crate::flow::model::FlowDocument;
use crate::flow::store::{FlowEdit, FlowStore};
use crate::flow::validation::{validate, ValidationIssue, ValidationReport};
use crate::persistence::flows::FlowRecord;
use crate::persistence::gateway::{FlowUpdate, NewFlow};
use crate::routes::principal::Principal;
use crate::state::AppState;

#[derive(Deserialize)]
pub struct FlowIdQuery {
    pub id: Option<String>,
}

impl FlowIdQuery {
    fn require(self) -> Result<String, AppError> {
        self.id
            .filter(|id| !id.trim().is_empty())
            .ok_or_else(|| AppError::Validation("Query parameter 'id' is required".to_string()))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateFlowRequest {
    pub id: String,
    #[serde(flatten)]
    pub update: FlowUpdate,
}

#[derive(Deserialize)]
pub struct EditFlowRequest {
    pub id: String,
    pub edits: Vec<FlowEdit>,
}

#[derive(Serialize)]
pub struct EditFlowResponse {
    pub flow: FlowRecord,
    pub warnings: Vec<ValidationIssue>,
}

/// GET /api/v1/flows
///
/// One flow with `?id=`, otherwise every stored flow.
pub async fn handle_get_flows(
    State(state): State<AppState>,
    Principal(principal): Principal,
    Query(params): Query<FlowIdQuery>,
) -> Result<Response, AppError> {
    match params.id {
        Some(id) => Ok(Json(state.flows.get(&id, principal).await?).into_response()),
        None => Ok(Json(state.flows.list(principal).await?).into_response()),
    }
}

/// POST /api/v1/flows
pub async fn handle_create_flow(
    State(state): State<AppState>,
    Principal(principal): Principal,
    Json(req): Json<NewFlow>,
) -> Result<(StatusCode, Json<FlowRecord>), AppError> {
    let record = state.flows.create(principal, req).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// PUT /api/v1/flows
pub async fn handle_update_flow(
    State(state): State<AppState>,
    Principal(principal): Principal,
    Json(req): Json<UpdateFlowRequest>,
) -> Result<Json<FlowRecord>, AppError> {
    let record = state.flows.update(&req.id, principal, req.update).await?;
    Ok(Json(record))
}

/// DELETE /api/v1/flows?id=
pub async fn handle_delete_flow(
    State(state): State<AppState>,
    Principal(principal): Principal,
    Query(params): Query<FlowIdQuery>,
) -> Result<StatusCode, AppError> {
    let id = params.require()?;
    state.flows.delete(&id, principal).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/flows/validate
pub async fn handle_validate_flow(Json(doc): Json<FlowDocument>) -> Json<ValidationReport> {
    Json(validate(&doc))
}

/// POST /api/v1/flows/import
///
/// Stores a copy of an exported document under a new id.
pub async fn handle_import_flow(
    State(state): State<AppState>,
    Principal(principal): Principal,
    body: String,
) -> Result<(StatusCode, Json<FlowRecord>), AppError> {
    let mut store = FlowStore::blank("Imported flow");
    store.import_flow(&body)?;
    let doc = store.into_document();

    let record = state
        .flows
        .create(
            principal,
            NewFlow {
                name: doc.name.clone(),
                description: doc.description.clone(),
                data: Some(doc),
                template: None,
            },
        )
        .await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /api/v1/flows/export?id=
pub async fn handle_export_flow(
    State(state): State<AppState>,
    Principal(principal): Principal,
    Query(params): Query<FlowIdQuery>,
) -> Result<Response, AppError> {
    let id = params.require()?;
    let record = state.flows.get(&id, principal).await?;
    let body = FlowStore::new(record.data)
        .export_flow()
        .map_err(|e| AppError::Internal(e.into()))?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/json".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{id}.json\""),
            ),
        ],
        body,
    )
        .into_response())
}

/// POST /api/v1/flows/edits
///
/// Applies a batch of structural edits, all or nothing.
pub async fn handle_edit_flow(
    State(state): State<AppState>,
    Principal(principal): Principal,
    Json(req): Json<EditFlowRequest>,
) -> Result<Json<EditFlowResponse>, AppError> {
    let record = state.flows.get(&req.id, principal).await?;
    let mut store = FlowStore::new(record.data);
    for edit in req.edits {
        store.apply(edit)?;
    }
    let report = store.validate().into_result().map_err(|e| AppError::InvalidFlow(e.report))?;

    let flow = state
        .flows
        .update(
            &req.id,
            principal,
            FlowUpdate {
                data: Some(store.into_document()),
                ..Default::default()
            },
        )
        .await?;
    Ok(Json(EditFlowResponse {
        flow,
        warnings: report.warnings,
    }))
}
