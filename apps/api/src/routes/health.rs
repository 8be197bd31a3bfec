use axum::Json;
use serde_json::{json, Value};

use crate::flow::templates::SYSTEM_FLOW_IDS;

/// GET /health
pub async fn health_handler() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": env!("CARGO_PKG_NAME"),
        "systemFlows": SYSTEM_FLOW_IDS,
    }))
}
