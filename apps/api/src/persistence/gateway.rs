//! Persistence gateway: the only path between client-authored documents and storage.
//!
//! System flows are readable without a principal and exist only as templates until the
//! first write. Every other id needs a principal. Updates are last-write-wins.

use std::sync::Arc;

use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::flow::model::FlowDocument;
use crate::flow::store::FlowStore;
use crate::flow::templates::{is_system_flow, TemplateLibrary};
use crate::flow::validation::{validate, ValidationError};
use crate::persistence::flows::{FlowRecord, FlowRepository};

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Flow '{0}' not found")]
    NotFound(String),

    #[error("Authentication required")]
    Unauthorized,

    #[error(transparent)]
    Invalid(#[from] ValidationError),

    #[error("Storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFlow {
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Initial document. Takes precedence over `template`.
    #[serde(default)]
    pub data: Option<FlowDocument>,
    /// System flow id to copy when no `data` is given.
    #[serde(default)]
    pub template: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowUpdate {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub data: Option<FlowDocument>,
    #[serde(default)]
    pub is_live: Option<bool>,
    #[serde(default)]
    pub mapping_config: Option<Value>,
}

#[derive(Clone)]
pub struct FlowGateway {
    repo: Arc<dyn FlowRepository>,
    templates: TemplateLibrary,
}

impl FlowGateway {
    pub fn new(repo: Arc<dyn FlowRepository>, templates: TemplateLibrary) -> Self {
        Self { repo, templates }
    }

    pub async fn get(&self, id: &str, principal: Option<Uuid>) -> Result<FlowRecord, GatewayError> {
        authorize(id, principal)?;

        if let Some(record) = self.repo.fetch(id).await? {
            return Ok(record);
        }

        if let Some(doc) = self.templates.load(id).await? {
            warn!("System flow '{id}' is not stored yet; serving the bundled template");
            return Ok(FlowRecord::from_document(doc, None));
        }

        Err(GatewayError::NotFound(id.to_string()))
    }

    pub async fn list(&self, principal: Option<Uuid>) -> Result<Vec<FlowRecord>, GatewayError> {
        principal.ok_or(GatewayError::Unauthorized)?;
        Ok(self.repo.list().await?)
    }

    pub async fn create(
        &self,
        principal: Option<Uuid>,
        new: NewFlow,
    ) -> Result<FlowRecord, GatewayError> {
        let principal = principal.ok_or(GatewayError::Unauthorized)?;

        let mut doc = match (new.data, new.template) {
            (Some(doc), _) => doc,
            (None, Some(template_id)) => {
                let template = self
                    .templates
                    .load(&template_id)
                    .await?
                    .ok_or(GatewayError::NotFound(template_id))?;
                FlowStore::from_template(&template, new.name.clone()).into_document()
            }
            (None, None) => FlowStore::blank(new.name.clone()).into_document(),
        };

        let now = Utc::now();
        doc.id = Uuid::new_v4().to_string();
        doc.name = new.name;
        doc.description = new.description;
        doc.version = 1;
        doc.created_at = now;
        doc.updated_at = now;
        validate(&doc).into_result()?;

        let record = FlowRecord::from_document(doc, Some(principal));
        self.repo.insert(&record).await?;
        info!("Created flow {} for user {principal}", record.id);
        Ok(record)
    }

    /// Applies the update, creating the record when it does not exist yet.
    pub async fn update(
        &self,
        id: &str,
        principal: Option<Uuid>,
        update: FlowUpdate,
    ) -> Result<FlowRecord, GatewayError> {
        authorize(id, principal)?;
        if let Some(doc) = &update.data {
            validate(doc).into_result()?;
        }

        match self.repo.fetch(id).await? {
            Some(mut record) => {
                apply_update(&mut record, update);
                if !self.repo.replace(&record).await? {
                    // Deleted between fetch and replace.
                    warn!("Flow '{id}' vanished during update; re-inserting");
                    self.repo.insert(&record).await?;
                }
                info!("Updated flow {id} (version {})", record.data.version);
                Ok(record)
            }
            None => {
                warn!("Flow '{id}' not stored; upserting");
                let base = match self.templates.load(id).await? {
                    Some(template) => template,
                    None => {
                        let name = update.name.clone().unwrap_or_else(|| id.to_string());
                        FlowStore::blank(name).into_document()
                    }
                };
                let mut record = FlowRecord::from_document(base, principal);
                record.id = id.to_string();
                record.data.version = 0;
                apply_update(&mut record, update);
                record.created_at = record.updated_at;
                record.data.created_at = record.updated_at;
                self.repo.insert(&record).await?;
                info!("Inserted flow {id} via upsert");
                Ok(record)
            }
        }
    }

    pub async fn delete(&self, id: &str, principal: Option<Uuid>) -> Result<(), GatewayError> {
        authorize(id, principal)?;
        if !self.repo.remove(id).await? {
            return Err(GatewayError::NotFound(id.to_string()));
        }
        info!("Deleted flow {id}");
        Ok(())
    }
}

/// System flows are open to everyone; any other flow needs a principal.
pub fn authorize(id: &str, principal: Option<Uuid>) -> Result<(), GatewayError> {
    if principal.is_none() && !is_system_flow(id) {
        return Err(GatewayError::Unauthorized);
    }
    Ok(())
}

/// Merges an update into a record. The record id always wins over the document's id;
/// explicit `name`/`description` win over the document's own.
fn apply_update(record: &mut FlowRecord, update: FlowUpdate) {
    let now = Utc::now();
    let previous_version = record.data.version;

    if let Some(doc) = update.data {
        record.data = doc;
        record.name = record.data.name.clone();
        record.description = record.data.description.clone();
    }
    if let Some(name) = update.name {
        record.name = name;
    }
    if let Some(description) = update.description {
        record.description = description;
    }
    if let Some(is_live) = update.is_live {
        record.is_live = is_live;
    }
    if update.mapping_config.is_some() {
        record.mapping_config = update.mapping_config;
    }

    record.data.id = record.id.clone();
    record.data.name = record.name.clone();
    record.data.description = record.description.clone();
    record.data.version = previous_version + 1;
    record.data.updated_at = now;
    record.updated_at = now;
}
