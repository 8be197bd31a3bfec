//! Authoring store: owns one flow document while it is being edited.
//!
//! Every structural edit goes through a `&mut self` method and bumps `updatedAt`.
//! The selection follows the document: deleting the selected node or edge clears it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use uuid::Uuid;

use crate::flow::model::{
    Edge, EndData, FlowDocument, Node, NodeData, NodeType, Position, StartData,
};
use crate::flow::validation::{validate, ValidationError, ValidationReport};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Node '{0}' not found")]
    NodeNotFound(String),

    #[error("Edge '{0}' not found")]
    EdgeNotFound(String),

    #[error("Id '{0}' is already in use")]
    DuplicateId(String),

    #[error("Invalid data for node '{node_id}': {reason}")]
    InvalidNodeData { node_id: String, reason: String },

    #[error("Malformed flow JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

/// What the editor currently has highlighted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum Selection {
    #[default]
    None,
    Node(String),
    Edge(String),
}

// ────────────────────────────────────────────────────────────────────────────
// Edit payloads
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewNode {
    /// Generated when absent.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    #[serde(default)]
    pub position: Position,
    #[serde(default)]
    pub data: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodePatch {
    #[serde(default)]
    pub position: Option<Position>,
    /// Merged key by key into the existing data.
    #[serde(default)]
    pub data: Option<Map<String, Value>>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewEdge {
    #[serde(default)]
    pub id: Option<String>,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub source_handle: Option<String>,
    #[serde(default)]
    pub target_handle: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EdgePatch {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub source_handle: Option<String>,
    #[serde(default)]
    pub target_handle: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

/// A single structural edit, as sent by the batch-edit route.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum FlowEdit {
    AddNode(NewNode),
    UpdateNode { id: String, patch: NodePatch },
    DeleteNode { id: String },
    AddEdge(NewEdge),
    UpdateEdge { id: String, patch: EdgePatch },
    DeleteEdge { id: String },
}

// ────────────────────────────────────────────────────────────────────────────
// Store
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct FlowStore {
    doc: FlowDocument,
    selection: Selection,
}

impl FlowStore {
    pub fn new(doc: FlowDocument) -> Self {
        Self {
            doc,
            selection: Selection::None,
        }
    }

    /// A fresh document containing a start node wired to an end node.
    pub fn blank(name: impl Into<String>) -> Self {
        let mut doc = FlowDocument::empty(name);
        let start = Node {
            position: Position { x: 250.0, y: 50.0 },
            ..Node::new(
                "start",
                NodeData::Start(StartData {
                    label: "Start".into(),
                    ..Default::default()
                }),
            )
        };
        let end = Node {
            position: Position { x: 250.0, y: 300.0 },
            ..Node::new(
                "end",
                NodeData::End(EndData {
                    label: "End".into(),
                    ..Default::default()
                }),
            )
        };
        doc.nodes = vec![start, end];
        doc.edges = vec![Edge::new("e-start-end", "start", "end")];
        Self::new(doc)
    }

    /// A copy of `template` under a new id and name, with version and timestamps reset.
    pub fn from_template(template: &FlowDocument, name: impl Into<String>) -> Self {
        let fresh = FlowDocument::empty(name);
        let doc = FlowDocument {
            id: fresh.id,
            name: fresh.name,
            version: 1,
            created_at: fresh.created_at,
            updated_at: fresh.updated_at,
            ..template.clone()
        };
        Self::new(doc)
    }

    pub fn into_document(self) -> FlowDocument {
        self.doc
    }

    pub fn validate(&self) -> ValidationReport {
        validate(&self.doc)
    }

    // ── nodes ───────────────────────────────────────────────────────────────

    pub fn add_node(&mut self, new: NewNode) -> Result<String, StoreError> {
        let id = new
            .id
            .unwrap_or_else(|| format!("{}-{}", new.node_type.as_str(), short_id()));
        if self.doc.node(&id).is_some() {
            return Err(StoreError::DuplicateId(id));
        }
        let data = NodeData::from_parts(new.node_type, new.data).map_err(|e| {
            StoreError::InvalidNodeData {
                node_id: id.clone(),
                reason: e.to_string(),
            }
        })?;
        self.doc.nodes.push(Node {
            position: new.position,
            ..Node::new(id.clone(), data)
        });
        self.doc.touch();
        Ok(id)
    }

    pub fn update_node(&mut self, id: &str, patch: NodePatch) -> Result<(), StoreError> {
        let node = self
            .doc
            .node_mut(id)
            .ok_or_else(|| StoreError::NodeNotFound(id.to_string()))?;

        if let Some(changes) = patch.data {
            let mut data = node.data.to_map();
            data.extend(changes);
            node.data = NodeData::from_parts(node.node_type(), data).map_err(|e| {
                StoreError::InvalidNodeData {
                    node_id: id.to_string(),
                    reason: e.to_string(),
                }
            })?;
        }
        if let Some(position) = patch.position {
            node.position = position;
        }
        self.doc.touch();
        Ok(())
    }

    /// Removes the node and every edge touching it.
    pub fn delete_node(&mut self, id: &str) -> Result<(), StoreError> {
        let before = self.doc.nodes.len();
        self.doc.nodes.retain(|n| n.id != id);
        if self.doc.nodes.len() == before {
            return Err(StoreError::NodeNotFound(id.to_string()));
        }

        let removed_edges: Vec<String> = self
            .doc
            .edges
            .iter()
            .filter(|e| e.source == id || e.target == id)
            .map(|e| e.id.clone())
            .collect();
        self.doc.edges.retain(|e| e.source != id && e.target != id);

        match &self.selection {
            Selection::Node(selected) if selected == id => self.selection = Selection::None,
            Selection::Edge(selected) if removed_edges.contains(selected) => {
                self.selection = Selection::None
            }
            _ => {}
        }
        self.doc.touch();
        Ok(())
    }

    // ── edges ───────────────────────────────────────────────────────────────

    pub fn add_edge(&mut self, new: NewEdge) -> Result<String, StoreError> {
        self.require_node(&new.source)?;
        self.require_node(&new.target)?;
        let id = new.id.unwrap_or_else(|| format!("e-{}", short_id()));
        if self.doc.edge(&id).is_some() {
            return Err(StoreError::DuplicateId(id));
        }
        self.doc.edges.push(Edge {
            id: id.clone(),
            source: new.source,
            target: new.target,
            source_handle: new.source_handle,
            target_handle: new.target_handle,
            label: new.label,
            extra: Map::new(),
        });
        self.doc.touch();
        Ok(id)
    }

    pub fn update_edge(&mut self, id: &str, patch: EdgePatch) -> Result<(), StoreError> {
        if let Some(source) = &patch.source {
            self.require_node(source)?;
        }
        if let Some(target) = &patch.target {
            self.require_node(target)?;
        }
        let edge = self
            .doc
            .edge_mut(id)
            .ok_or_else(|| StoreError::EdgeNotFound(id.to_string()))?;

        if let Some(source) = patch.source {
            edge.source = source;
        }
        if let Some(target) = patch.target {
            edge.target = target;
        }
        if patch.source_handle.is_some() {
            edge.source_handle = patch.source_handle;
        }
        if patch.target_handle.is_some() {
            edge.target_handle = patch.target_handle;
        }
        if patch.label.is_some() {
            edge.label = patch.label;
        }
        self.doc.touch();
        Ok(())
    }

    pub fn delete_edge(&mut self, id: &str) -> Result<(), StoreError> {
        let before = self.doc.edges.len();
        self.doc.edges.retain(|e| e.id != id);
        if self.doc.edges.len() == before {
            return Err(StoreError::EdgeNotFound(id.to_string()));
        }
        if self.selection == Selection::Edge(id.to_string()) {
            self.selection = Selection::None;
        }
        self.doc.touch();
        Ok(())
    }

    pub fn apply(&mut self, edit: FlowEdit) -> Result<(), StoreError> {
        match edit {
            FlowEdit::AddNode(new) => self.add_node(new).map(|_| ()),
            FlowEdit::UpdateNode { id, patch } => self.update_node(&id, patch),
            FlowEdit::DeleteNode { id } => self.delete_node(&id),
            FlowEdit::AddEdge(new) => self.add_edge(new).map(|_| ()),
            FlowEdit::UpdateEdge { id, patch } => self.update_edge(&id, patch),
            FlowEdit::DeleteEdge { id } => self.delete_edge(&id),
        }
    }

    // ── import / export ─────────────────────────────────────────────────────

    pub fn export_flow(&self) -> Result<String, StoreError> {
        Ok(serde_json::to_string_pretty(&self.doc)?)
    }

    /// Replaces the document only when the incoming one validates. The current document
    /// is untouched on any failure.
    pub fn import_flow(&mut self, json: &str) -> Result<ValidationReport, StoreError> {
        let doc: FlowDocument = serde_json::from_str(json)?;
        let report = validate(&doc).into_result()?;
        self.doc = doc;
        self.selection = Selection::None;
        Ok(report)
    }

    fn require_node(&self, id: &str) -> Result<(), StoreError> {
        match self.doc.node(id) {
            Some(_) => Ok(()),
            None => Err(StoreError::NodeNotFound(id.to_string())),
        }
    }
}

#[allow(dead_code)]
impl FlowStore {
    pub fn document(&self) -> &FlowDocument {
        &self.doc
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn select_node(&mut self, id: &str) -> Result<(), StoreError> {
        self.require_node(id)?;
        self.selection = Selection::Node(id.to_string());
        Ok(())
    }

    pub fn select_edge(&mut self, id: &str) -> Result<(), StoreError> {
        if self.doc.edge(id).is_none() {
            return Err(StoreError::EdgeNotFound(id.to_string()));
        }
        self.selection = Selection::Edge(id.to_string());
        Ok(())
    }

    pub fn clear_selection(&mut self) {
        self.selection = Selection::None;
    }
}

fn short_id() -> String {
    Uuid::new_v4().simple().to_string()[..8].to_string()
}
