//! Session runner: the bundled driver around `flow::engine::step`.
//!
//! One `advance` call moves a session as far as it can go without the user: it stops at
//! the next question, a pending wait, completion, a stall or a failure. Waits never
//! block; they are stored as a `resumeAt` instant and honoured by later calls.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::flow::engine::{
    start_node, step, Effect, EffectOutcome, StepInput, StepStatus, TraversalError, WaitDelay,
};
use crate::flow::model::{FlowDocument, NodeData, NodeType, QuestionOption, QuestionType};
use crate::flow::template::render;
use crate::flow::value::{Bindings, Scalar};
use crate::persistence::sessions::{ConversationState, HistoryEntry, PendingWait, SessionStatus};
use crate::runtime::executor::EffectExecutor;

#[derive(Debug, Error)]
pub enum RunError {
    #[error("Session runs flow '{session}', not '{requested}'")]
    FlowMismatch { session: String, requested: String },

    #[error("Session has already finished ({0:?})")]
    Finished(SessionStatus),

    /// An answer arrived while the session was not showing a question.
    #[error("Session is not waiting for an answer ({0:?})")]
    NotAwaitingAnswer(SessionStatus),

    /// The answer was rejected; the session stays on its question.
    #[error(transparent)]
    Answer(TraversalError),

    #[error(transparent)]
    Traversal(#[from] TraversalError),
}

/// The question a session is waiting on, ready to show to the user.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Prompt {
    pub node_id: String,
    pub text: String,
    pub question_type: QuestionType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<QuestionOption>>,
    pub required: bool,
    pub variable_name: String,
}

#[derive(Clone)]
pub struct Runner {
    executor: Arc<dyn EffectExecutor>,
    max_auto_steps: usize,
}

impl Runner {
    pub fn new(executor: Arc<dyn EffectExecutor>, max_auto_steps: usize) -> Self {
        Self {
            executor,
            max_auto_steps,
        }
    }

    /// A new session on the flow's start node with declared variable defaults bound.
    pub fn start(&self, doc: &FlowDocument) -> Result<ConversationState, RunError> {
        let start = start_node(doc)?;
        let bindings: Bindings = doc
            .variables
            .iter()
            .filter_map(|v| v.default_value.clone().map(|d| (v.name.clone(), d)))
            .collect();
        Ok(ConversationState::new(doc.id.clone(), start, bindings))
    }

    /// Advances `state` as far as possible. Session-level outcomes (completion, stalls,
    /// failures) are recorded in `state`; `Err` means the call itself was rejected.
    pub async fn advance(
        &self,
        doc: &FlowDocument,
        state: &mut ConversationState,
        answer: Option<Scalar>,
        now: DateTime<Utc>,
    ) -> Result<Option<Prompt>, RunError> {
        if state.flow_id != doc.id {
            return Err(RunError::FlowMismatch {
                session: state.flow_id.clone(),
                requested: doc.id.clone(),
            });
        }
        if state.status.is_terminal() {
            return Err(RunError::Finished(state.status));
        }
        if answer.is_some() && !awaits_answer(doc, state) {
            return Err(RunError::NotAwaitingAnswer(state.status));
        }

        let mut answer = answer;
        let mut input = None;

        if let Some(pending) = &state.pending {
            if now < pending.resume_at {
                debug!("Session still waiting on {} until {}", pending.node_id, pending.resume_at);
                state.status = SessionStatus::Waiting;
                return Ok(None);
            }
            input = Some(StepInput::Effect(EffectOutcome::completed()));
            state.pending = None;
        }

        for _ in 0..self.max_auto_steps {
            let Some(node_id) = state.current_node_id.clone() else {
                state.status = SessionStatus::Completed;
                return Ok(None);
            };

            if let Some(NodeData::Question(question)) = doc.node(&node_id).map(|n| &n.data) {
                if input.is_none() {
                    match answer.take() {
                        Some(value) => input = Some(StepInput::Answer(value)),
                        None => {
                            state.status = SessionStatus::AwaitingAnswer;
                            state.updated_at = now;
                            return Ok(Some(Prompt {
                                node_id,
                                text: render(&question.text, &state.bindings),
                                question_type: question.question_type,
                                options: question.options.clone(),
                                required: question.required,
                                variable_name: question.variable_name.clone(),
                            }));
                        }
                    }
                }
            }

            let result = match step(doc, &node_id, &state.bindings, input.take()) {
                Ok(result) => result,
                Err(
                    e @ (TraversalError::AnswerRequired { .. }
                    | TraversalError::InvalidAnswer { .. }),
                ) => return Err(RunError::Answer(e)),
                Err(e) => {
                    fail(state, e.to_string(), now);
                    return Ok(None);
                }
            };
            state.bindings = result.bindings;

            if result.status != StepStatus::Suspended {
                if let Some(node) = doc.node(&node_id) {
                    state.history.push(HistoryEntry {
                        node_id: node_id.clone(),
                        node_type: node.node_type(),
                        at: now,
                    });
                }
            }

            match result.status {
                StepStatus::Advanced => state.current_node_id = result.next_node_id,
                StepStatus::Completed => {
                    info!("Session on flow {} completed", doc.id);
                    state.current_node_id = None;
                    state.status = SessionStatus::Completed;
                    state.updated_at = now;
                    return Ok(None);
                }
                StepStatus::Stalled => {
                    warn!("Session on flow {} stalled at condition {node_id}", doc.id);
                    state.status = SessionStatus::Stalled;
                    state.updated_at = now;
                    return Ok(None);
                }
                StepStatus::Suspended => {
                    for effect in result.effects {
                        match effect {
                            Effect::Wait { node_id, delay } => {
                                let resume_at = resolve_delay(&delay, now);
                                if resume_at <= now {
                                    input = Some(StepInput::Effect(EffectOutcome::completed()));
                                } else {
                                    state.pending = Some(PendingWait { node_id, resume_at });
                                    state.status = SessionStatus::Waiting;
                                    state.updated_at = now;
                                    return Ok(None);
                                }
                            }
                            other => {
                                let outcome = self.executor.execute(&other).await;
                                input = Some(StepInput::Effect(outcome));
                            }
                        }
                    }
                }
            }
        }

        fail(
            state,
            format!(
                "Stopped after {} automatic steps without reaching a question",
                self.max_auto_steps
            ),
            now,
        );
        Ok(None)
    }
}

/// True when the last call left the session showing the question it is positioned on.
fn awaits_answer(doc: &FlowDocument, state: &ConversationState) -> bool {
    state.pending.is_none()
        && state.status == SessionStatus::AwaitingAnswer
        && matches!(
            state.current_node_id.as_deref().and_then(|id| doc.node(id)),
            Some(node) if node.node_type() == NodeType::Question
        )
}

fn fail(state: &mut ConversationState, reason: String, now: DateTime<Utc>) {
    warn!("Session on flow {} failed: {reason}", state.flow_id);
    state.status = SessionStatus::Failed;
    state.error = Some(reason);
    state.updated_at = now;
}

/// Longest relative wait honoured; longer ones are clamped.
const MAX_WAIT_MS: i64 = 366 * 24 * 60 * 60 * 1000;

/// Turns a wait descriptor into a concrete instant. Random delays are drawn here.
fn resolve_delay(delay: &WaitDelay, now: DateTime<Utc>) -> DateTime<Utc> {
    let ms = match delay {
        WaitDelay::Fixed { ms } => *ms,
        WaitDelay::Random { min_ms, max_ms } => rand::thread_rng().gen_range(*min_ms..=*max_ms),
        WaitDelay::Until { at } => return *at,
    };
    let ms = i64::try_from(ms).unwrap_or(MAX_WAIT_MS).min(MAX_WAIT_MS);
    now + Duration::milliseconds(ms)
}
