use std::sync::Arc;

use crate::persistence::gateway::FlowGateway;
use crate::persistence::sessions::ConversationStateStore;
use crate::runtime::runner::Runner;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    pub flows: FlowGateway,
    pub sessions: Arc<dyn ConversationStateStore>,
    /// Drives sessions; owns the effect executor.
    pub runner: Runner,
}
