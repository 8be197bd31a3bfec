//! Effect executor: performs the I/O the engine describes.
//!
//! Failures are reported back as `EffectOutcome::Failed`; nothing here retries.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::{Client, Method};
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::flow::engine::{Effect, EffectOutcome, HttpRequest};
use crate::flow::model::{ActionKind, HttpMethod};

#[derive(Debug, Error)]
pub enum EffectError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Upstream returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Action '{0}' is missing a url param")]
    MissingUrl(&'static str),

    #[error("{0} effects are scheduled by the runner, not executed")]
    NotExecutable(&'static str),
}

#[async_trait]
pub trait EffectExecutor: Send + Sync {
    async fn execute(&self, effect: &Effect) -> EffectOutcome;
}

/// Body posted to the notification webhook for e-mail and SMS actions.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Notification<'a> {
    node_id: &'a str,
    kind: &'a str,
    params: &'a Map<String, Value>,
}

#[derive(Clone)]
pub struct HttpEffectExecutor {
    client: Client,
    notify_webhook: Option<String>,
}

impl HttpEffectExecutor {
    pub fn new(timeout: Duration, notify_webhook: Option<String>) -> Result<Self> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            notify_webhook,
        })
    }

    async fn run(&self, effect: &Effect) -> Result<Option<Value>, EffectError> {
        match effect {
            Effect::HttpRequest { request, .. } => self.send(request).await.map(Some),
            Effect::Action {
                node_id,
                kind,
                params,
            } => self.act(node_id, *kind, params).await,
            Effect::Wait { .. } => Err(EffectError::NotExecutable("wait")),
            Effect::Stalled { .. } => Err(EffectError::NotExecutable("stalled")),
        }
    }

    async fn send(&self, request: &HttpRequest) -> Result<Value, EffectError> {
        let mut builder = self
            .client
            .request(to_method(request.method), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name, value);
        }
        if let Some(body) = &request.body {
            let is_json = serde_json::from_str::<Value>(body).is_ok();
            if is_json && !has_header(request, "content-type") {
                builder = builder.header("content-type", "application/json");
            }
            builder = builder.body(body.clone());
        }

        debug!("{} {}", to_method(request.method), request.url);
        let response = builder.send().await?;
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(EffectError::Status {
                status: status.as_u16(),
                message: body,
            });
        }

        // Non-JSON bodies are exposed to response mappings as a plain string.
        Ok(serde_json::from_str(&body).unwrap_or(Value::String(body)))
    }

    async fn act(
        &self,
        node_id: &str,
        kind: ActionKind,
        params: &Map<String, Value>,
    ) -> Result<Option<Value>, EffectError> {
        if kind == ActionKind::CallApiSideEffect {
            let url = params
                .get("url")
                .and_then(Value::as_str)
                .ok_or(EffectError::MissingUrl(kind.as_str()))?;
            let method = params
                .get("method")
                .cloned()
                .and_then(|m| serde_json::from_value::<HttpMethod>(m).ok())
                .unwrap_or(HttpMethod::Post);
            let request = HttpRequest {
                method,
                url: url.to_string(),
                headers: Default::default(),
                body: params.get("body").map(|b| match b {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                }),
            };
            self.send(&request).await?;
            return Ok(None);
        }

        let Some(webhook) = &self.notify_webhook else {
            info!(
                "No notification webhook configured; acknowledging {} for node {node_id}",
                kind.as_str()
            );
            return Ok(None);
        };

        let response = self
            .client
            .post(webhook)
            .json(&Notification {
                node_id,
                kind: kind.as_str(),
                params,
            })
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(EffectError::Status {
                status: status.as_u16(),
                message,
            });
        }
        info!("Forwarded {} for node {node_id}", kind.as_str());
        Ok(None)
    }
}

#[async_trait]
impl EffectExecutor for HttpEffectExecutor {
    async fn execute(&self, effect: &Effect) -> EffectOutcome {
        match self.run(effect).await {
            Ok(response) => EffectOutcome::Completed { response },
            Err(e) => {
                warn!("Effect for node {} failed: {e}", effect.node_id());
                EffectOutcome::Failed {
                    reason: e.to_string(),
                }
            }
        }
    }
}

fn to_method(method: HttpMethod) -> Method {
    match method {
        HttpMethod::Get => Method::GET,
        HttpMethod::Post => Method::POST,
        HttpMethod::Put => Method::PUT,
        HttpMethod::Patch => Method::PATCH,
        HttpMethod::Delete => Method::DELETE,
    }
}

fn has_header(request: &HttpRequest, name: &str) -> bool {
    request.headers.keys().any(|k| k.eq_ignore_ascii_case(name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::engine::WaitDelay;

    fn executor() -> HttpEffectExecutor {
        HttpEffectExecutor::new(Duration::from_secs(1), None).unwrap()
    }

    #[tokio::test]
    async fn test_notifications_without_webhook_are_acknowledged() {
        let outcome = executor()
            .execute(&Effect::Action {
                node_id: "mail".into(),
                kind: ActionKind::SendEmail,
                params: Map::new(),
            })
            .await;
        assert_eq!(outcome, EffectOutcome::completed());
    }

    #[tokio::test]
    async fn test_side_effect_call_without_url_fails() {
        let outcome = executor()
            .execute(&Effect::Action {
                node_id: "hook".into(),
                kind: ActionKind::CallApiSideEffect,
                params: Map::new(),
            })
            .await;
        assert!(matches!(outcome, EffectOutcome::Failed { reason } if reason.contains("url")));
    }

    #[tokio::test]
    async fn test_wait_is_not_executable() {
        let outcome = executor()
            .execute(&Effect::Wait {
                node_id: "w".into(),
                delay: WaitDelay::Fixed { ms: 10 },
            })
            .await;
        assert!(matches!(outcome, EffectOutcome::Failed { .. }));
    }

    #[test]
    fn test_method_mapping() {
        assert_eq!(to_method(HttpMethod::Patch), Method::PATCH);
        assert_eq!(to_method(HttpMethod::Get), Method::GET);
    }
}
