//! Structural validation of flow documents.
//!
//! Runs on import and before every save. Errors reject the document; warnings are
//! returned to the editor but the document is accepted.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::flow::model::{
    ActionKind, FlowDocument, NodeData, NodeType, Operator, WaitMode, FALSE_HANDLE, TRUE_HANDLE,
};
use crate::flow::template::referenced_names;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCode {
    DuplicateNodeId,
    DuplicateEdgeId,
    DanglingEdge,
    MissingStart,
    MultipleStart,
    ConditionMissingTrueBranch,
    ConditionMissingFalseBranch,
    MultipleOutgoingEdges,
    EndHasOutgoingEdges,
    StartHasIncomingEdges,
    MissingVariableName,
    InvalidActionParams,
    InvalidWaitConfig,
    InvalidApiCall,
    UnknownOperator,
    UndeclaredVariable,
    UnreachableNode,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    pub code: IssueCode,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub edge_id: Option<String>,
}

impl ValidationIssue {
    fn node(code: IssueCode, node_id: &str, message: String) -> Self {
        Self {
            code,
            message,
            node_id: Some(node_id.to_string()),
            edge_id: None,
        }
    }

    fn edge(code: IssueCode, edge_id: &str, message: String) -> Self {
        Self {
            code,
            message,
            node_id: None,
            edge_id: Some(edge_id.to_string()),
        }
    }

    fn flow(code: IssueCode, message: String) -> Self {
        Self {
            code,
            message,
            node_id: None,
            edge_id: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub ok: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
}

impl ValidationReport {
    #[cfg(test)]
    pub fn has_code(&self, code: IssueCode) -> bool {
        self.errors
            .iter()
            .chain(self.warnings.iter())
            .any(|i| i.code == code)
    }

    /// `Ok(self)` when the document is acceptable, otherwise the failing report as an error.
    pub fn into_result(self) -> Result<Self, ValidationError> {
        if self.ok {
            Ok(self)
        } else {
            Err(ValidationError { report: self })
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("flow failed validation: {}", summarize(&self.report))]
pub struct ValidationError {
    pub report: ValidationReport,
}

fn summarize(report: &ValidationReport) -> String {
    report
        .errors
        .iter()
        .map(|i| i.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Checks a document without modifying it.
pub fn validate(doc: &FlowDocument) -> ValidationReport {
    let mut errors = Vec::new();
    let mut warnings = Vec::new();

    let mut node_ids = HashSet::new();
    for node in &doc.nodes {
        if !node_ids.insert(node.id.as_str()) {
            errors.push(ValidationIssue::node(
                IssueCode::DuplicateNodeId,
                &node.id,
                format!("Duplicate node id '{}'", node.id),
            ));
        }
    }

    let mut edge_ids = HashSet::new();
    for edge in &doc.edges {
        if !edge_ids.insert(edge.id.as_str()) {
            errors.push(ValidationIssue::edge(
                IssueCode::DuplicateEdgeId,
                &edge.id,
                format!("Duplicate edge id '{}'", edge.id),
            ));
        }
        for (end, node_id) in [("source", &edge.source), ("target", &edge.target)] {
            if !node_ids.contains(node_id.as_str()) {
                errors.push(ValidationIssue::edge(
                    IssueCode::DanglingEdge,
                    &edge.id,
                    format!(
                        "Edge '{}' {end} references unknown node '{node_id}'",
                        edge.id
                    ),
                ));
            }
        }
    }

    let starts: Vec<&str> = doc.start_nodes().map(|n| n.id.as_str()).collect();
    match starts.len() {
        0 => errors.push(ValidationIssue::flow(
            IssueCode::MissingStart,
            "Flow has no start node".to_string(),
        )),
        1 => {}
        n => errors.push(ValidationIssue::flow(
            IssueCode::MultipleStart,
            format!("Flow has {n} start nodes ({})", starts.join(", ")),
        )),
    }

    let known_variables = collect_written_variables(doc);

    for node in &doc.nodes {
        let outgoing: Vec<_> = doc.outgoing(&node.id).collect();

        match &node.data {
            NodeData::Condition(cond) => {
                let has_handle = |h: &str| outgoing.iter().any(|e| e.source_handle.as_deref() == Some(h));
                if !has_handle(TRUE_HANDLE) {
                    errors.push(ValidationIssue::node(
                        IssueCode::ConditionMissingTrueBranch,
                        &node.id,
                        format!("Condition '{}' has no \"true\" edge", node.id),
                    ));
                }
                if !has_handle(FALSE_HANDLE) {
                    warnings.push(ValidationIssue::node(
                        IssueCode::ConditionMissingFalseBranch,
                        &node.id,
                        format!(
                            "Condition '{}' has no \"false\" edge; traversal stalls when its rules fail",
                            node.id
                        ),
                    ));
                }
                for rule in &cond.rules {
                    if let Operator::Unknown(raw) = &rule.operator {
                        warnings.push(ValidationIssue::node(
                            IssueCode::UnknownOperator,
                            &node.id,
                            format!(
                                "Condition '{}' uses unsupported operator '{raw}' on '{}'; the rule never matches",
                                node.id, rule.field
                            ),
                        ));
                    }
                    if !known_variables.contains(rule.field.as_str()) {
                        warnings.push(ValidationIssue::node(
                            IssueCode::UndeclaredVariable,
                            &node.id,
                            format!(
                                "Condition '{}' reads '{}', which is never declared or assigned",
                                node.id, rule.field
                            ),
                        ));
                    }
                }
            }
            NodeData::Question(q) if q.variable_name.trim().is_empty() => {
                errors.push(ValidationIssue::node(
                    IssueCode::MissingVariableName,
                    &node.id,
                    format!("Question '{}' has no variableName", node.id),
                ));
            }
            NodeData::Action(action) if action.kind == ActionKind::SetVariable => {
                let named = action
                    .params
                    .get("variableName")
                    .and_then(|v| v.as_str())
                    .is_some_and(|s| !s.trim().is_empty());
                if !named {
                    errors.push(ValidationIssue::node(
                        IssueCode::InvalidActionParams,
                        &node.id,
                        format!("set_variable action '{}' needs a variableName param", node.id),
                    ));
                }
            }
            NodeData::Wait(wait) => {
                let problem = match wait.mode {
                    WaitMode::Fixed if wait.duration_ms.is_none() => Some("fixed wait needs durationMs"),
                    WaitMode::Random => match wait.range_ms {
                        None => Some("random wait needs rangeMs"),
                        Some([min, max]) if min > max => Some("random wait range has min > max"),
                        _ => None,
                    },
                    WaitMode::Until if wait.until_timestamp.is_none() => {
                        Some("until wait needs untilTimestamp")
                    }
                    _ => None,
                };
                if let Some(problem) = problem {
                    errors.push(ValidationIssue::node(
                        IssueCode::InvalidWaitConfig,
                        &node.id,
                        format!("Wait '{}': {problem}", node.id),
                    ));
                }
            }
            NodeData::ApiCall(call) if call.url.trim().is_empty() => {
                errors.push(ValidationIssue::node(
                    IssueCode::InvalidApiCall,
                    &node.id,
                    format!("API call '{}' has no url", node.id),
                ));
            }
            _ => {}
        }

        let mut reported = HashSet::new();
        for text in templated_texts(&node.data) {
            for name in referenced_names(text) {
                if !known_variables.contains(name.as_str()) && reported.insert(name.clone()) {
                    warnings.push(ValidationIssue::node(
                        IssueCode::UndeclaredVariable,
                        &node.id,
                        format!(
                            "Node '{}' renders {{{{{name}}}}}, which is never declared or assigned",
                            node.id
                        ),
                    ));
                }
            }
        }

        match node.node_type() {
            NodeType::Condition => {}
            NodeType::End if !outgoing.is_empty() => warnings.push(ValidationIssue::node(
                IssueCode::EndHasOutgoingEdges,
                &node.id,
                format!("End node '{}' has outgoing edges that are never followed", node.id),
            )),
            _ if outgoing.len() > 1 => warnings.push(ValidationIssue::node(
                IssueCode::MultipleOutgoingEdges,
                &node.id,
                format!(
                    "Node '{}' has {} outgoing edges; only the first ('{}') is followed",
                    node.id,
                    outgoing.len(),
                    outgoing[0].id
                ),
            )),
            _ => {}
        }

        if node.node_type() == NodeType::Start && doc.incoming(&node.id).next().is_some() {
            warnings.push(ValidationIssue::node(
                IssueCode::StartHasIncomingEdges,
                &node.id,
                format!("Start node '{}' has incoming edges", node.id),
            ));
        }
    }

    if let [start] = starts.as_slice() {
        let reachable = reachable_from(doc, start);
        for node in &doc.nodes {
            if !reachable.contains(node.id.as_str()) {
                warnings.push(ValidationIssue::node(
                    IssueCode::UnreachableNode,
                    &node.id,
                    format!("Node '{}' is not reachable from the start node", node.id),
                ));
            }
        }
    }

    ValidationReport {
        ok: errors.is_empty(),
        errors,
        warnings,
    }
}

/// Variables that are declared or assigned somewhere in the flow.
fn collect_written_variables(doc: &FlowDocument) -> HashSet<&str> {
    let mut names: HashSet<&str> = doc.variables.iter().map(|v| v.name.as_str()).collect();
    for node in &doc.nodes {
        match &node.data {
            NodeData::Question(q) => {
                names.insert(q.variable_name.as_str());
            }
            NodeData::Action(a) if a.kind == ActionKind::SetVariable => {
                if let Some(name) = a.params.get("variableName").and_then(|v| v.as_str()) {
                    names.insert(name);
                }
            }
            NodeData::ApiCall(call) => {
                names.extend(call.response_mapping.values().map(String::as_str));
            }
            _ => {}
        }
    }
    names
}

/// Strings of a node that go through placeholder rendering at traversal time.
fn templated_texts(data: &NodeData) -> Vec<&str> {
    match data {
        NodeData::Question(q) => vec![q.text.as_str()],
        NodeData::Action(a) => a.params.values().filter_map(|v| v.as_str()).collect(),
        NodeData::ApiCall(call) => std::iter::once(call.url.as_str())
            .chain(call.headers.values().map(String::as_str))
            .chain(call.body.as_deref())
            .collect(),
        _ => Vec::new(),
    }
}

fn reachable_from<'a>(doc: &'a FlowDocument, start: &'a str) -> HashSet<&'a str> {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in &doc.edges {
        adjacency
            .entry(edge.source.as_str())
            .or_default()
            .push(edge.target.as_str());
    }

    let mut seen = HashSet::from([start]);
    let mut queue = VecDeque::from([start]);
    while let Some(id) = queue.pop_front() {
        for &next in adjacency.get(id).into_iter().flatten() {
            if seen.insert(next) {
                queue.push_back(next);
            }
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::model::{
        ConditionData, Edge, EndData, Node, QuestionData, Rule, StartData, WaitData,
    };
    use serde_json::Map;

    fn linear_doc() -> FlowDocument {
        let mut doc = FlowDocument::empty("test");
        doc.nodes = vec![
            Node::new("start", NodeData::Start(StartData::default())),
            Node::new(
                "q1",
                NodeData::Question(QuestionData {
                    text: "A or B?".into(),
                    variable_name: "ab".into(),
                    ..Default::default()
                }),
            ),
            Node::new("end", NodeData::End(EndData::default())),
        ];
        doc.edges = vec![Edge::new("e1", "start", "q1"), Edge::new("e2", "q1", "end")];
        doc
    }

    fn condition(rules: Vec<Rule>) -> NodeData {
        NodeData::Condition(ConditionData {
            rules,
            ..Default::default()
        })
    }

    #[test]
    fn test_valid_linear_flow() {
        let report = validate(&linear_doc());
        assert!(report.ok, "{report:?}");
        assert!(report.warnings.is_empty(), "{report:?}");
    }

    #[test]
    fn test_duplicate_ids_are_errors() {
        let mut doc = linear_doc();
        doc.nodes.push(Node::new("q1", NodeData::End(EndData::default())));
        doc.edges.push(Edge::new("e1", "q1", "end"));
        let report = validate(&doc);
        assert!(!report.ok);
        assert!(report.has_code(IssueCode::DuplicateNodeId));
        assert!(report.has_code(IssueCode::DuplicateEdgeId));
    }

    #[test]
    fn test_dangling_edge_is_error() {
        let mut doc = linear_doc();
        doc.edges.push(Edge::new("e3", "q1", "ghost"));
        let report = validate(&doc);
        assert!(!report.ok);
        let issue = report
            .errors
            .iter()
            .find(|i| i.code == IssueCode::DanglingEdge)
            .unwrap();
        assert_eq!(issue.edge_id.as_deref(), Some("e3"));
    }

    #[test]
    fn test_start_count_is_checked() {
        let mut doc = linear_doc();
        doc.nodes.retain(|n| n.id != "start");
        doc.edges.retain(|e| e.source != "start");
        assert!(validate(&doc).has_code(IssueCode::MissingStart));

        let mut doc = linear_doc();
        doc.nodes.push(Node::new("start2", NodeData::Start(StartData::default())));
        assert!(validate(&doc).has_code(IssueCode::MultipleStart));
    }

    #[test]
    fn test_condition_needs_true_edge_and_warns_without_false() {
        let mut doc = linear_doc();
        doc.nodes.push(Node::new(
            "cond",
            condition(vec![Rule::new("ab", Operator::Equals, "A")]),
        ));
        doc.edges[1] = Edge::new("e2", "q1", "cond");
        let report = validate(&doc);
        assert!(!report.ok);
        assert!(report.has_code(IssueCode::ConditionMissingTrueBranch));

        doc.edges.push(Edge::new("e3", "cond", "end").with_handle("true"));
        let report = validate(&doc);
        assert!(report.ok, "{report:?}");
        assert!(report
            .warnings
            .iter()
            .any(|w| w.code == IssueCode::ConditionMissingFalseBranch));
    }

    #[test]
    fn test_multiple_outgoing_edges_warn() {
        let mut doc = linear_doc();
        doc.edges.push(Edge::new("e3", "q1", "start"));
        let report = validate(&doc);
        assert!(report.ok);
        assert!(report.has_code(IssueCode::MultipleOutgoingEdges));
        assert!(report.has_code(IssueCode::StartHasIncomingEdges));
    }

    #[test]
    fn test_undeclared_rule_variable_warns() {
        let mut doc = linear_doc();
        doc.nodes.push(Node::new(
            "cond",
            condition(vec![Rule::new("salary", Operator::GreaterThan, "10")]),
        ));
        doc.edges[1] = Edge::new("e2", "q1", "cond");
        doc.edges.push(Edge::new("e3", "cond", "end").with_handle("true"));
        doc.edges.push(Edge::new("e4", "cond", "end").with_handle("false"));
        let report = validate(&doc);
        assert!(report.ok);
        assert!(report.has_code(IssueCode::UndeclaredVariable));
    }

    #[test]
    fn test_unbound_placeholder_warns() {
        let mut doc = linear_doc();
        if let NodeData::Question(q) = &mut doc.nodes[1].data {
            q.text = "Thanks {{ab}}, and {{nickname}}? {{nickname}}".into();
        }
        let report = validate(&doc);
        assert!(report.ok);
        let unbound: Vec<_> = report
            .warnings
            .iter()
            .filter(|w| w.code == IssueCode::UndeclaredVariable)
            .collect();
        assert_eq!(unbound.len(), 1);
        assert!(unbound[0].message.contains("nickname"));
    }

    #[test]
    fn test_unreachable_node_warns() {
        let mut doc = linear_doc();
        doc.nodes.push(Node::new("orphan", NodeData::End(EndData::default())));
        let report = validate(&doc);
        assert!(report.ok);
        let issue = report
            .warnings
            .iter()
            .find(|w| w.code == IssueCode::UnreachableNode)
            .unwrap();
        assert_eq!(issue.node_id.as_deref(), Some("orphan"));
    }

    #[test]
    fn test_wait_configuration_is_checked() {
        let mut doc = linear_doc();
        doc.nodes.push(Node::new(
            "w",
            NodeData::Wait(WaitData {
                mode: WaitMode::Random,
                duration_ms: None,
                range_ms: Some([500, 100]),
                until_timestamp: None,
                extra: Map::new(),
            }),
        ));
        let report = validate(&doc);
        assert!(report.has_code(IssueCode::InvalidWaitConfig));
    }

    #[test]
    fn test_validation_never_mutates() {
        let mut doc = linear_doc();
        doc.edges.push(Edge::new("bad", "nowhere", "end"));
        let before = doc.clone();
        let _ = validate(&doc);
        assert_eq!(doc, before);
    }

    #[test]
    fn test_into_result_carries_report() {
        let mut doc = linear_doc();
        doc.nodes.clear();
        let err = validate(&doc).into_result().unwrap_err();
        assert!(!err.report.ok);
        assert!(err.to_string().contains("no start node"));
    }
}
