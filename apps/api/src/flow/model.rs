//! Flow document data model: the wire format shared by storage, the editor and the
//! import/export surface.
//!
//! Editors attach presentation keys (sizes, colours, selection flags) to nodes and edges.
//! Those keys are not interpreted here but are kept in the `extra` maps so a document
//! survives a load/save cycle unchanged.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::flow::value::Scalar;

/// The handle tag a condition node uses for its "rules passed" edge.
pub const TRUE_HANDLE: &str = "true";
/// The handle tag a condition node uses for its "rules failed" edge.
pub const FALSE_HANDLE: &str = "false";

// ────────────────────────────────────────────────────────────────────────────
// Document
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowDocument {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub edges: Vec<Edge>,
    #[serde(default)]
    pub variables: Vec<VariableDecl>,
    #[serde(default)]
    pub settings: FlowSettings,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_version() -> u32 {
    1
}

impl FlowDocument {
    /// An empty document with a fresh id. Callers add the start node themselves.
    pub fn empty(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: String::new(),
            version: 1,
            nodes: Vec::new(),
            edges: Vec::new(),
            variables: Vec::new(),
            settings: FlowSettings::default(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn node(&self, id: &str) -> Option<&Node> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut Node> {
        self.nodes.iter_mut().find(|n| n.id == id)
    }

    pub fn edge(&self, id: &str) -> Option<&Edge> {
        self.edges.iter().find(|e| e.id == id)
    }

    pub fn edge_mut(&mut self, id: &str) -> Option<&mut Edge> {
        self.edges.iter_mut().find(|e| e.id == id)
    }

    /// Outgoing edges of `node_id`, in declaration order.
    pub fn outgoing<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.source == node_id)
    }

    pub fn incoming<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a Edge> + 'a {
        self.edges.iter().filter(move |e| e.target == node_id)
    }

    /// All start nodes. A valid document has exactly one.
    pub fn start_nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes
            .iter()
            .filter(|n| n.node_type() == NodeType::Start)
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowSettings {
    #[serde(default)]
    pub mode: FlowMode,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// What the flow drives: the chat CV intake or an application workflow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowMode {
    #[default]
    CvIntake,
    ApplicationWorkflow,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VariableDecl {
    pub name: String,
    #[serde(rename = "type", default)]
    pub var_type: VariableType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Scalar>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VariableType {
    #[default]
    String,
    Number,
    Boolean,
}

// ────────────────────────────────────────────────────────────────────────────
// Nodes
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    Start,
    Question,
    Condition,
    Action,
    Wait,
    #[serde(rename = "api-call")]
    ApiCall,
    End,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeType::Start => "start",
            NodeType::Question => "question",
            NodeType::Condition => "condition",
            NodeType::Action => "action",
            NodeType::Wait => "wait",
            NodeType::ApiCall => "api-call",
            NodeType::End => "end",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

/// One step of the flow. Serialized as `{ id, type, position, data, ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(default)]
    pub position: Position,
    #[serde(flatten)]
    pub data: NodeData,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Node {
    pub fn new(id: impl Into<String>, data: NodeData) -> Self {
        Self {
            id: id.into(),
            position: Position::default(),
            data,
            extra: Map::new(),
        }
    }

    pub fn node_type(&self) -> NodeType {
        self.data.node_type()
    }
}

/// Typed payload of a node, selected by the `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum NodeData {
    Start(StartData),
    Question(QuestionData),
    Condition(ConditionData),
    Action(ActionData),
    Wait(WaitData),
    #[serde(rename = "api-call")]
    ApiCall(ApiCallData),
    End(EndData),
}

impl NodeData {
    pub fn node_type(&self) -> NodeType {
        match self {
            NodeData::Start(_) => NodeType::Start,
            NodeData::Question(_) => NodeType::Question,
            NodeData::Condition(_) => NodeType::Condition,
            NodeData::Action(_) => NodeType::Action,
            NodeData::Wait(_) => NodeType::Wait,
            NodeData::ApiCall(_) => NodeType::ApiCall,
            NodeData::End(_) => NodeType::End,
        }
    }

    /// Parses the `data` object of a node of the given type.
    pub fn from_parts(node_type: NodeType, data: Map<String, Value>) -> serde_json::Result<Self> {
        serde_json::from_value(json!({ "type": node_type, "data": data }))
    }

    /// The `data` object as it appears on the wire.
    pub fn to_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(mut wire)) => match wire.remove("data") {
                Some(Value::Object(data)) => data,
                _ => Map::new(),
            },
            _ => Map::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartData {
    #[serde(default)]
    pub label: String,
    #[serde(default)]
    pub description: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionData {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub question_type: QuestionType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<QuestionOption>>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub variable_name: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionType {
    #[default]
    Text,
    Textarea,
    Email,
    Phone,
    Number,
    Date,
    Select,
    MultiSelect,
    YesNo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub id: String,
    pub label: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConditionData {
    #[serde(default)]
    pub combinator: Combinator,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// How a condition's rules combine. Anything other than `"or"` evaluates as `and`; the
/// text an editor wrote is kept as written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<String>", into = "String")]
pub enum Combinator {
    #[default]
    And,
    Or,
    Other(String),
}

impl Combinator {
    pub fn is_or(&self) -> bool {
        match self {
            Combinator::And => false,
            Combinator::Or => true,
            Combinator::Other(raw) => raw.trim().eq_ignore_ascii_case("or"),
        }
    }
}

impl From<Option<String>> for Combinator {
    fn from(raw: Option<String>) -> Self {
        match raw.as_deref() {
            None | Some("and") => Combinator::And,
            Some("or") => Combinator::Or,
            Some(_) => Combinator::Other(raw.unwrap_or_default()),
        }
    }
}

impl From<Combinator> for String {
    fn from(combinator: Combinator) -> Self {
        match combinator {
            Combinator::And => "and".to_string(),
            Combinator::Or => "or".to_string(),
            Combinator::Other(raw) => raw,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub field: String,
    pub operator: Operator,
    #[serde(default, deserialize_with = "lenient_string")]
    pub value: String,
}

impl Rule {
    pub fn new(field: impl Into<String>, operator: Operator, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    GreaterThan,
    LessThan,
    StartsWith,
    EndsWith,
    IsEmpty,
    IsNotEmpty,
    InList,
    NotInList,
    /// Operator written by a newer editor, kept verbatim; never matches.
    Unknown(String),
}

impl Operator {
    pub fn as_str(&self) -> &str {
        match self {
            Operator::Equals => "equals",
            Operator::NotEquals => "not_equals",
            Operator::Contains => "contains",
            Operator::GreaterThan => "greater_than",
            Operator::LessThan => "less_than",
            Operator::StartsWith => "starts_with",
            Operator::EndsWith => "ends_with",
            Operator::IsEmpty => "is_empty",
            Operator::IsNotEmpty => "is_not_empty",
            Operator::InList => "in_list",
            Operator::NotInList => "not_in_list",
            Operator::Unknown(raw) => raw,
        }
    }
}

impl From<String> for Operator {
    fn from(raw: String) -> Self {
        match raw.as_str() {
            "equals" => Operator::Equals,
            "not_equals" => Operator::NotEquals,
            "contains" => Operator::Contains,
            "greater_than" => Operator::GreaterThan,
            "less_than" => Operator::LessThan,
            "starts_with" => Operator::StartsWith,
            "ends_with" => Operator::EndsWith,
            "is_empty" => Operator::IsEmpty,
            "is_not_empty" => Operator::IsNotEmpty,
            "in_list" => Operator::InList,
            "not_in_list" => Operator::NotInList,
            _ => Operator::Unknown(raw),
        }
    }
}

impl From<Operator> for String {
    fn from(operator: Operator) -> Self {
        match operator {
            Operator::Unknown(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

/// Accepts a string, number, boolean or null rule value and keeps its `String()` form.
fn lenient_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Scalar>::deserialize(deserializer)?;
    Ok(value.map(|v| v.to_js_string()).unwrap_or_default())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionData {
    pub kind: ActionKind,
    #[serde(default)]
    pub params: Map<String, Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    SetVariable,
    SendEmail,
    SendSms,
    CallApiSideEffect,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::SetVariable => "set_variable",
            ActionKind::SendEmail => "send_email",
            ActionKind::SendSms => "send_sms",
            ActionKind::CallApiSideEffect => "call_api_side_effect",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitData {
    pub mode: WaitMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range_ms: Option<[u64; 2]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until_timestamp: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WaitMode {
    Fixed,
    Random,
    Until,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiCallData {
    #[serde(default)]
    pub method: HttpMethod,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
    /// JSON path in the response → binding name.
    #[serde(default)]
    pub response_mapping: BTreeMap<String, String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    #[default]
    #[serde(alias = "get")]
    Get,
    #[serde(alias = "post")]
    Post,
    #[serde(alias = "put")]
    Put,
    #[serde(alias = "patch")]
    Patch,
    #[serde(alias = "delete")]
    Delete,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndData {
    #[serde(default)]
    pub label: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

// ────────────────────────────────────────────────────────────────────────────
// Edges
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Edge {
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Edge {
    pub fn new(id: impl Into<String>, source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            source_handle: None,
            target_handle: None,
            label: None,
            extra: Map::new(),
        }
    }

    pub fn with_handle(mut self, handle: impl Into<String>) -> Self {
        self.source_handle = Some(handle.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_node_wire_shape_uses_type_tag_and_data() {
        let node: Node = serde_json::from_value(json!({
            "id": "q1",
            "type": "question",
            "position": {"x": 10.0, "y": 20.0},
            "data": {
                "text": "What is your name?",
                "questionType": "text",
                "required": true,
                "variableName": "full_name"
            }
        }))
        .unwrap();

        assert_eq!(node.node_type(), NodeType::Question);
        match &node.data {
            NodeData::Question(q) => {
                assert_eq!(q.variable_name, "full_name");
                assert!(q.required);
            }
            other => panic!("unexpected data {other:?}"),
        }

        let back = serde_json::to_value(&node).unwrap();
        assert_eq!(back["type"], "question");
        assert_eq!(back["data"]["variableName"], "full_name");
    }

    #[test]
    fn test_api_call_type_tag_is_hyphenated() {
        let node: Node = serde_json::from_value(json!({
            "id": "a1",
            "type": "api-call",
            "data": {"method": "post", "url": "https://example.test/hook"}
        }))
        .unwrap();
        assert_eq!(node.node_type(), NodeType::ApiCall);
        assert_eq!(serde_json::to_value(&node).unwrap()["type"], "api-call");
    }

    #[test]
    fn test_unknown_keys_survive_round_trip() {
        let raw = json!({
            "id": "s",
            "type": "start",
            "position": {"x": 0.0, "y": 0.0},
            "width": 150,
            "data": {"label": "Start", "description": "", "color": "#fff"}
        });
        let node: Node = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(serde_json::to_value(&node).unwrap(), raw);
    }

    #[test]
    fn test_invalid_data_is_rejected() {
        assert!(serde_json::from_value::<Node>(json!({
            "id": "w1",
            "type": "wait",
            "data": {"mode": "sometimes"}
        }))
        .is_err());
    }

    #[test]
    fn test_combinator_defaults_to_and() {
        let c: ConditionData = serde_json::from_value(json!({"rules": []})).unwrap();
        assert_eq!(c.combinator, Combinator::And);
        let c: ConditionData =
            serde_json::from_value(json!({"combinator": "or", "rules": []})).unwrap();
        assert_eq!(c.combinator, Combinator::Or);
        let c: ConditionData =
            serde_json::from_value(json!({"combinator": "xor", "rules": []})).unwrap();
        assert!(!c.combinator.is_or());
    }

    #[test]
    fn test_rule_value_accepts_numbers() {
        let rule: Rule =
            serde_json::from_value(json!({"field": "age", "operator": "greater_than", "value": 18}))
                .unwrap();
        assert_eq!(rule.value, "18");
    }

    #[test]
    fn test_unrecognized_operator_is_kept_as_unknown() {
        let rule: Rule =
            serde_json::from_value(json!({"field": "x", "operator": "matches_regex", "value": "a"}))
                .unwrap();
        assert_eq!(rule.operator, Operator::Unknown("matches_regex".into()));
    }

    #[test]
    fn test_unrecognized_condition_text_survives_round_trip() {
        let raw = json!({
            "id": "c1",
            "type": "condition",
            "position": {"x": 0.0, "y": 0.0},
            "data": {
                "combinator": "xor",
                "rules": [{"field": "a", "operator": "matches_regex", "value": "^x"}]
            }
        });
        let node: Node = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(serde_json::to_value(&node).unwrap(), raw);
    }
}
