pub mod health;
pub mod principal;

use axum::{
    routing::{get, post},
    Router,
};

use crate::flow::handlers as flows;
use crate::runtime::handlers as sessions;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Flow authoring
        .route(
            "/api/v1/flows",
            get(flows::handle_get_flows)
                .post(flows::handle_create_flow)
                .put(flows::handle_update_flow)
                .delete(flows::handle_delete_flow),
        )
        .route("/api/v1/flows/validate", post(flows::handle_validate_flow))
        .route("/api/v1/flows/import", post(flows::handle_import_flow))
        .route("/api/v1/flows/export", get(flows::handle_export_flow))
        .route("/api/v1/flows/edits", post(flows::handle_edit_flow))
        // Conversation sessions
        .route(
            "/api/v1/sessions/:session_id",
            get(sessions::handle_get_session),
        )
        .route(
            "/api/v1/sessions/:session_id/advance",
            post(sessions::handle_advance),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::{
        body::Body,
        http::{Request, StatusCode},
        response::Response,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;
    use uuid::Uuid;

    use super::*;
    use crate::flow::templates::TemplateLibrary;
    use crate::persistence::flows::InMemoryFlowRepository;
    use crate::persistence::gateway::FlowGateway;
    use crate::persistence::sessions::InMemoryConversationStateStore;
    use crate::routes::principal::USER_ID_HEADER;
    use crate::runtime::executor::HttpEffectExecutor;
    use crate::runtime::runner::Runner;

    fn app() -> Router {
        let executor = HttpEffectExecutor::new(Duration::from_secs(1), None).unwrap();
        build_router(AppState {
            flows: FlowGateway::new(
                Arc::new(InMemoryFlowRepository::default()),
                TemplateLibrary::default(),
            ),
            sessions: Arc::new(InMemoryConversationStateStore::default()),
            runner: Runner::new(Arc::new(executor), 64),
        })
    }

    fn request(method: &str, uri: &str, user: Option<Uuid>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(user) = user {
            builder = builder.header(USER_ID_HEADER, user.to_string());
        }
        match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn json_body(response: Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let response = app()
            .oneshot(request("GET", "/health", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["systemFlows"], json!(["basic_cv_flow", "advanced_cv_flow"]));
    }

    #[tokio::test]
    async fn test_system_flow_is_public() {
        let response = app()
            .oneshot(request("GET", "/api/v1/flows?id=basic_cv_flow", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["data"]["id"], "basic_cv_flow");
    }

    #[tokio::test]
    async fn test_custom_flows_need_a_principal() {
        let app = app();
        let response = app
            .clone()
            .oneshot(request("GET", "/api/v1/flows", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let mut bad = request("GET", "/api/v1/flows", None, None);
        bad.headers_mut()
            .insert(USER_ID_HEADER, "not-a-uuid".parse().unwrap());
        let response = app.oneshot(bad).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_create_edit_export_flow() {
        let app = app();
        let user = Some(Uuid::new_v4());

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/v1/flows",
                user,
                Some(json!({"name": "Designers", "description": "Portfolio intake"})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CREATED);
        let created = json_body(response).await;
        let id = created["id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/v1/flows/edits",
                user,
                Some(json!({
                    "id": id,
                    "edits": [
                        {"op": "addNode", "id": "q_portfolio", "type": "question",
                         "data": {"text": "Portfolio link?", "variableName": "portfolio"}},
                        {"op": "updateEdge", "id": "e-start-end", "patch": {"target": "q_portfolio"}},
                        {"op": "addEdge", "id": "e2", "source": "q_portfolio", "target": "end"}
                    ]
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let edited = json_body(response).await;
        assert_eq!(edited["flow"]["data"]["version"], 2);

        let response = app
            .oneshot(request(
                "GET",
                &format!("/api/v1/flows/export?id={id}"),
                user,
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let exported = json_body(response).await;
        assert_eq!(exported["id"], id.as_str());
        assert_eq!(exported["nodes"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_invalid_flow_is_unprocessable() {
        let response = app()
            .oneshot(request(
                "POST",
                "/api/v1/flows",
                Some(Uuid::new_v4()),
                Some(json!({
                    "name": "Broken",
                    "data": {"id": "x", "name": "Broken", "nodes": [], "edges": []}
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = json_body(response).await;
        assert_eq!(body["error"]["details"]["errors"][0]["code"], "missing_start");
    }

    #[tokio::test]
    async fn test_validate_route_reports_warnings() {
        let response = app()
            .oneshot(request(
                "POST",
                "/api/v1/flows/validate",
                None,
                Some(json!({
                    "id": "f", "name": "f",
                    "nodes": [
                        {"id": "s", "type": "start", "data": {}},
                        {"id": "c", "type": "condition",
                         "data": {"rules": [{"field": "x", "operator": "equals", "value": "1"}]}},
                        {"id": "e", "type": "end", "data": {}}
                    ],
                    "edges": [
                        {"id": "e1", "source": "s", "target": "c"},
                        {"id": "e2", "source": "c", "target": "e", "sourceHandle": "true"}
                    ]
                })),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let report = json_body(response).await;
        assert_eq!(report["ok"], true);
        let codes: Vec<&str> = report["warnings"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|w| w["code"].as_str())
            .collect();
        assert!(codes.contains(&"condition_missing_false_branch"));
        assert!(codes.contains(&"undeclared_variable"));
    }

    #[tokio::test]
    async fn test_session_advances_through_basic_flow() {
        let app = app();
        let advance = |answer: Option<&str>| {
            let mut body = json!({"flowId": "basic_cv_flow"});
            if let Some(answer) = answer {
                body["answer"] = json!(answer);
            }
            request("POST", "/api/v1/sessions/s-1/advance", None, Some(body))
        };

        let response = app.clone().oneshot(advance(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["prompt"]["nodeId"], "q_full_name");
        assert_eq!(body["session"]["status"], "awaiting_answer");

        let response = app.clone().oneshot(advance(Some("Ada"))).await.unwrap();
        let body = json_body(response).await;
        assert_eq!(body["prompt"]["nodeId"], "q_email");

        let response = app.clone().oneshot(advance(Some("not an email"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(request("GET", "/api/v1/sessions/s-1", None, None))
            .await
            .unwrap();
        let session = json_body(response).await;
        assert_eq!(session["currentNodeId"], "q_email");
        assert_eq!(session["bindings"]["full_name"], "Ada");
    }

    #[tokio::test]
    async fn test_sessions_on_custom_flows_are_private() {
        let app = app();
        let user = Some(Uuid::new_v4());

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/v1/flows",
                user,
                Some(json!({"name": "Private intake", "template": "basic_cv_flow"})),
            ))
            .await
            .unwrap();
        let flow_id = json_body(response).await["id"].as_str().unwrap().to_string();

        let response = app
            .clone()
            .oneshot(request(
                "POST",
                "/api/v1/sessions/s-private/advance",
                user,
                Some(json!({"flowId": flow_id})),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(request("GET", "/api/v1/sessions/s-private", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response = app
            .oneshot(request("GET", "/api/v1/sessions/s-private", user, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(json_body(response).await["flowId"], flow_id.as_str());
    }

    #[tokio::test]
    async fn test_unknown_session_is_not_found() {
        let response = app()
            .oneshot(request("GET", "/api/v1/sessions/nope", None, None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }
}
