//! Traversal engine: interprets one node of a flow per call.
//!
//! `step` is pure: it never performs I/O, sleeps or draws random numbers. Nodes that need
//! the outside world (`wait`, `api-call`, notification actions) emit an [`Effect`] and
//! suspend; the driver fulfils the effect and calls `step` again on the same node with
//! the [`EffectOutcome`]. All mutable state lives in the caller's [`Bindings`].

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::flow::condition::{evaluate, evaluate_rule};
use crate::flow::model::{
    ActionData, ActionKind, ApiCallData, FlowDocument, HttpMethod, Node, NodeData, QuestionData,
    QuestionOption, QuestionType, WaitData, WaitMode, FALSE_HANDLE, TRUE_HANDLE,
};
use crate::flow::template::{render, render_map};
use crate::flow::value::{string_to_js_number, Bindings, Scalar};

// ────────────────────────────────────────────────────────────────────────────
// Step inputs and results
// ────────────────────────────────────────────────────────────────────────────

/// External input for the node being stepped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum StepInput {
    /// The user's answer to a question node.
    Answer(Scalar),
    /// The executor's report for the effect a node emitted.
    Effect(EffectOutcome),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EffectOutcome {
    Completed {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        response: Option<Value>,
    },
    Failed {
        reason: String,
    },
}

impl EffectOutcome {
    pub fn completed() -> Self {
        EffectOutcome::Completed { response: None }
    }
}

/// Work the driver must carry out on the engine's behalf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Effect {
    #[serde(rename_all = "camelCase")]
    Action {
        node_id: String,
        kind: ActionKind,
        params: Map<String, Value>,
    },
    #[serde(rename_all = "camelCase")]
    HttpRequest {
        node_id: String,
        request: HttpRequest,
    },
    #[serde(rename_all = "camelCase")]
    Wait { node_id: String, delay: WaitDelay },
    /// A condition evaluated to a branch that has no edge.
    #[serde(rename_all = "camelCase")]
    Stalled { node_id: String, handle: String },
}

impl Effect {
    pub fn node_id(&self) -> &str {
        match self {
            Effect::Action { node_id, .. }
            | Effect::HttpRequest { node_id, .. }
            | Effect::Wait { node_id, .. }
            | Effect::Stalled { node_id, .. } => node_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// How long a wait node holds the session. Random delays are drawn by the executor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WaitDelay {
    Fixed { ms: u64 },
    #[serde(rename_all = "camelCase")]
    Random { min_ms: u64, max_ms: u64 },
    Until { at: DateTime<Utc> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Moved to `next_node_id`.
    Advanced,
    /// Waiting for the effect in `effects`; step the same node again with its outcome.
    Suspended,
    /// Reached an end node.
    Completed,
    /// A condition branch had no edge.
    Stalled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub next_node_id: Option<String>,
    pub bindings: Bindings,
    pub effects: Vec<Effect>,
    pub status: StepStatus,
}

impl Step {
    fn advanced(target: &str, bindings: Bindings) -> Self {
        Self {
            next_node_id: Some(target.to_string()),
            bindings,
            effects: Vec::new(),
            status: StepStatus::Advanced,
        }
    }

    fn suspended(node_id: &str, bindings: Bindings, effect: Effect) -> Self {
        Self {
            next_node_id: Some(node_id.to_string()),
            bindings,
            effects: vec![effect],
            status: StepStatus::Suspended,
        }
    }

    fn completed(bindings: Bindings) -> Self {
        Self {
            next_node_id: None,
            bindings,
            effects: Vec::new(),
            status: StepStatus::Completed,
        }
    }

    fn stalled(node_id: &str, handle: &str, bindings: Bindings) -> Self {
        Self {
            next_node_id: None,
            bindings,
            effects: vec![Effect::Stalled {
                node_id: node_id.to_string(),
                handle: handle.to_string(),
            }],
            status: StepStatus::Stalled,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TraversalError {
    #[error("Node '{node_id}' does not exist in this flow")]
    UnknownNode { node_id: String },

    #[error("Flow has no start node")]
    NoStartNode,

    #[error("Node '{node_id}' has no outgoing edge")]
    DeadEnd { node_id: String },

    #[error("Question '{node_id}' needs an answer")]
    MissingInput { node_id: String },

    #[error("Node '{node_id}' ({node_type}) cannot accept this input")]
    UnexpectedInput { node_id: String, node_type: String },

    #[error("Question '{node_id}' requires a non-empty answer")]
    AnswerRequired { node_id: String },

    #[error("Invalid answer for question '{node_id}': {reason}")]
    InvalidAnswer { node_id: String, reason: String },

    #[error("Node '{node_id}' is misconfigured: {reason}")]
    Misconfigured { node_id: String, reason: String },

    #[error("Effect for node '{node_id}' failed: {reason}")]
    EffectFailed { node_id: String, reason: String },
}

// ────────────────────────────────────────────────────────────────────────────
// Traversal
// ────────────────────────────────────────────────────────────────────────────

/// Id of the flow's entry node (the first start node in declaration order).
pub fn start_node(doc: &FlowDocument) -> Result<&str, TraversalError> {
    doc.start_nodes()
        .next()
        .map(|n| n.id.as_str())
        .ok_or(TraversalError::NoStartNode)
}

/// Interprets `current_node_id` against a snapshot of `bindings`.
pub fn step(
    doc: &FlowDocument,
    current_node_id: &str,
    bindings: &Bindings,
    input: Option<StepInput>,
) -> Result<Step, TraversalError> {
    let node = doc
        .node(current_node_id)
        .ok_or_else(|| TraversalError::UnknownNode {
            node_id: current_node_id.to_string(),
        })?;
    let mut bindings = bindings.clone();

    match &node.data {
        NodeData::Start(_) => follow(doc, node, bindings),
        NodeData::End(_) => Ok(Step::completed(bindings)),
        NodeData::Question(question) => match input {
            Some(StepInput::Answer(answer)) => {
                let value = normalize_answer(&node.id, question, answer)?;
                bindings.insert(question.variable_name.clone(), value);
                follow(doc, node, bindings)
            }
            Some(StepInput::Effect(_)) => Err(unexpected(node)),
            None => Err(TraversalError::MissingInput {
                node_id: node.id.clone(),
            }),
        },
        NodeData::Condition(condition) => {
            for rule in &condition.rules {
                debug!(
                    "Condition {}: {} {} '{}' => {}",
                    node.id,
                    rule.field,
                    rule.operator.as_str(),
                    rule.value,
                    evaluate_rule(rule, &bindings)
                );
            }
            let passed = evaluate(&condition.combinator, &condition.rules, &bindings);
            let handle = if passed { TRUE_HANDLE } else { FALSE_HANDLE };
            let edge = doc
                .outgoing(&node.id)
                .find(|e| e.source_handle.as_deref() == Some(handle));
            Ok(match edge {
                Some(edge) => Step::advanced(&edge.target, bindings),
                None => Step::stalled(&node.id, handle, bindings),
            })
        }
        NodeData::Action(action) if action.kind == ActionKind::SetVariable => {
            let (name, value) = set_variable(&node.id, action, &bindings)?;
            bindings.insert(name, value);
            follow(doc, node, bindings)
        }
        NodeData::Action(action) => run_effect_node(doc, node, bindings, input, |b| {
            Ok(Effect::Action {
                node_id: node.id.clone(),
                kind: action.kind,
                params: render_map(&action.params, b),
            })
        }),
        NodeData::Wait(wait) => run_effect_node(doc, node, bindings, input, |_| {
            Ok(Effect::Wait {
                node_id: node.id.clone(),
                delay: wait_delay(&node.id, wait)?,
            })
        }),
        NodeData::ApiCall(call) => match input {
            Some(StepInput::Effect(EffectOutcome::Completed { response })) => {
                if let Some(response) = &response {
                    apply_response_mapping(call, response, &mut bindings);
                }
                follow(doc, node, bindings)
            }
            other => run_effect_node(doc, node, bindings, other, |b| {
                Ok(Effect::HttpRequest {
                    node_id: node.id.clone(),
                    request: http_request(call, b),
                })
            }),
        },
    }
}

/// Edge selection for every node kind except conditions: the first outgoing edge in
/// declaration order.
fn follow(doc: &FlowDocument, node: &Node, bindings: Bindings) -> Result<Step, TraversalError> {
    match doc.outgoing(&node.id).next() {
        Some(edge) => Ok(Step::advanced(&edge.target, bindings)),
        None => Err(TraversalError::DeadEnd {
            node_id: node.id.clone(),
        }),
    }
}

/// Suspends with the emitted effect, or resumes once the driver reports an outcome.
fn run_effect_node<F>(
    doc: &FlowDocument,
    node: &Node,
    bindings: Bindings,
    input: Option<StepInput>,
    emit: F,
) -> Result<Step, TraversalError>
where
    F: FnOnce(&Bindings) -> Result<Effect, TraversalError>,
{
    match input {
        None => {
            let effect = emit(&bindings)?;
            Ok(Step::suspended(&node.id, bindings, effect))
        }
        Some(StepInput::Effect(EffectOutcome::Completed { .. })) => follow(doc, node, bindings),
        Some(StepInput::Effect(EffectOutcome::Failed { reason })) => {
            Err(TraversalError::EffectFailed {
                node_id: node.id.clone(),
                reason,
            })
        }
        Some(StepInput::Answer(_)) => Err(unexpected(node)),
    }
}

fn unexpected(node: &Node) -> TraversalError {
    TraversalError::UnexpectedInput {
        node_id: node.id.clone(),
        node_type: node.node_type().as_str().to_string(),
    }
}

fn set_variable(
    node_id: &str,
    action: &ActionData,
    bindings: &Bindings,
) -> Result<(String, Scalar), TraversalError> {
    let misconfigured = |reason: &str| TraversalError::Misconfigured {
        node_id: node_id.to_string(),
        reason: reason.to_string(),
    };

    let name = action
        .params
        .get("variableName")
        .and_then(|v| v.as_str())
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| misconfigured("set_variable needs a variableName param"))?;

    let value = match action.params.get("value") {
        Some(Value::String(s)) => Scalar::String(render(s, bindings)),
        Some(other) => Scalar::from_json(other).ok_or_else(|| misconfigured("value is null"))?,
        None => return Err(misconfigured("set_variable needs a value param")),
    };

    Ok((name.to_string(), value))
}

fn wait_delay(node_id: &str, wait: &WaitData) -> Result<WaitDelay, TraversalError> {
    let misconfigured = |reason: &str| TraversalError::Misconfigured {
        node_id: node_id.to_string(),
        reason: reason.to_string(),
    };
    match wait.mode {
        WaitMode::Fixed => wait
            .duration_ms
            .map(|ms| WaitDelay::Fixed { ms })
            .ok_or_else(|| misconfigured("fixed wait needs durationMs")),
        WaitMode::Random => match wait.range_ms {
            Some([min_ms, max_ms]) if min_ms <= max_ms => Ok(WaitDelay::Random { min_ms, max_ms }),
            Some(_) => Err(misconfigured("random wait range has min > max")),
            None => Err(misconfigured("random wait needs rangeMs")),
        },
        WaitMode::Until => wait
            .until_timestamp
            .map(|at| WaitDelay::Until { at })
            .ok_or_else(|| misconfigured("until wait needs untilTimestamp")),
    }
}

fn http_request(call: &ApiCallData, bindings: &Bindings) -> HttpRequest {
    HttpRequest {
        method: call.method,
        url: render(&call.url, bindings),
        headers: call
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), render(v, bindings)))
            .collect(),
        body: call.body.as_deref().map(|b| render(b, bindings)),
    }
}

fn apply_response_mapping(call: &ApiCallData, response: &Value, bindings: &mut Bindings) {
    for (path, variable) in &call.response_mapping {
        if let Some(value) = resolve_path(response, path).and_then(Scalar::from_json) {
            bindings.insert(variable.clone(), value);
        }
    }
}

/// Resolves `$.a.b[0].c`, `a.b.0.c` or `a['b']` against a JSON value.
pub fn resolve_path<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim();
    let path = path.strip_prefix('$').unwrap_or(path);

    path.split(|c: char| matches!(c, '.' | '[' | ']'))
        .map(|segment| segment.trim_matches(|c: char| c == '\'' || c == '"'))
        .filter(|segment| !segment.is_empty())
        .try_fold(value, child)
}

fn child<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    match value {
        Value::Object(map) => map.get(key),
        Value::Array(items) => key.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Answer normalization
// ────────────────────────────────────────────────────────────────────────────

fn normalize_answer(
    node_id: &str,
    question: &QuestionData,
    answer: Scalar,
) -> Result<Scalar, TraversalError> {
    let text = answer.to_js_string();
    if text.trim().is_empty() {
        if question.required {
            return Err(TraversalError::AnswerRequired {
                node_id: node_id.to_string(),
            });
        }
        return Ok(answer);
    }

    let invalid = |reason: String| TraversalError::InvalidAnswer {
        node_id: node_id.to_string(),
        reason,
    };

    match question.question_type {
        QuestionType::Number => {
            let n = match &answer {
                Scalar::Number(n) => *n,
                _ => string_to_js_number(&text),
            };
            if n.is_nan() {
                return Err(invalid(format!("'{text}' is not a number")));
            }
            Ok(Scalar::Number(n))
        }
        QuestionType::YesNo => match &answer {
            Scalar::Bool(b) => Ok(Scalar::Bool(*b)),
            _ => match text.trim().to_lowercase().as_str() {
                "yes" | "y" | "true" | "1" => Ok(Scalar::Bool(true)),
                "no" | "n" | "false" | "0" => Ok(Scalar::Bool(false)),
                _ => Err(invalid(format!("'{text}' is not yes or no"))),
            },
        },
        QuestionType::Email => {
            let trimmed = text.trim();
            match trimmed.split_once('@') {
                Some((local, domain))
                    if !local.is_empty() && !domain.is_empty() && !domain.contains('@') =>
                {
                    Ok(Scalar::String(trimmed.to_string()))
                }
                _ => Err(invalid(format!("'{text}' is not an e-mail address"))),
            }
        }
        QuestionType::Select => match question.options.as_deref() {
            Some(options) if !options.is_empty() => match_option(options, &text)
                .map(Scalar::String)
                .ok_or_else(|| invalid(format!("'{text}' is not one of the options"))),
            _ => Ok(answer),
        },
        QuestionType::MultiSelect => match question.options.as_deref() {
            Some(options) if !options.is_empty() => {
                let mut picked = Vec::new();
                for part in text.split(',').filter(|p| !p.trim().is_empty()) {
                    let value = match_option(options, part)
                        .ok_or_else(|| invalid(format!("'{}' is not one of the options", part.trim())))?;
                    picked.push(value);
                }
                if picked.is_empty() && question.required {
                    return Err(TraversalError::AnswerRequired {
                        node_id: node_id.to_string(),
                    });
                }
                Ok(Scalar::String(picked.join(", ")))
            }
            _ => Ok(answer),
        },
        _ => Ok(answer),
    }
}

fn match_option(options: &[QuestionOption], answer: &str) -> Option<String> {
    let wanted = answer.trim().to_lowercase();
    options
        .iter()
        .find(|o| o.value.trim().to_lowercase() == wanted || o.label.trim().to_lowercase() == wanted)
        .map(|o| o.value.clone())
}
