//! System flows: reserved ids whose content ships with the service.
//!
//! A system flow lives only as a template until someone saves it; after that the stored
//! record wins. Templates can be overridden per deployment by dropping `<id>.json` into
//! `FLOW_TEMPLATES_DIR`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::debug;

use crate::flow::model::FlowDocument;
use crate::flow::validation::validate;

pub const BASIC_CV_FLOW: &str = "basic_cv_flow";
pub const ADVANCED_CV_FLOW: &str = "advanced_cv_flow";

pub const SYSTEM_FLOW_IDS: [&str; 2] = [BASIC_CV_FLOW, ADVANCED_CV_FLOW];

pub fn is_system_flow(id: &str) -> bool {
    SYSTEM_FLOW_IDS.contains(&id)
}

fn bundled(id: &str) -> Option<&'static str> {
    match id {
        BASIC_CV_FLOW => Some(include_str!("../../templates/basic_cv_flow.json")),
        ADVANCED_CV_FLOW => Some(include_str!("../../templates/advanced_cv_flow.json")),
        _ => None,
    }
}

#[derive(Debug, Clone, Default)]
pub struct TemplateLibrary {
    dir: Option<PathBuf>,
}

impl TemplateLibrary {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self { dir }
    }

    /// Loads the template for a system id. Returns `None` for any other id.
    pub async fn load(&self, id: &str) -> Result<Option<FlowDocument>> {
        let Some(bundled) = bundled(id) else {
            return Ok(None);
        };

        let raw = match self.override_path(id) {
            Some(path) if tokio::fs::try_exists(&path).await.unwrap_or(false) => {
                debug!("Loading template '{id}' from {}", path.display());
                tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("Failed to read template {}", path.display()))?
            }
            _ => bundled.to_string(),
        };

        let mut doc: FlowDocument = serde_json::from_str(&raw)
            .with_context(|| format!("Template '{id}' is not a valid flow document"))?;
        doc.id = id.to_string();
        validate(&doc)
            .into_result()
            .with_context(|| format!("Template '{id}' failed validation"))?;

        Ok(Some(doc))
    }

    fn override_path(&self, id: &str) -> Option<PathBuf> {
        self.dir.as_ref().map(|dir| dir.join(format!("{id}.json")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::model::NodeType;

    #[test]
    fn test_system_ids() {
        assert!(is_system_flow("basic_cv_flow"));
        assert!(is_system_flow("advanced_cv_flow"));
        assert!(!is_system_flow("my_flow"));
    }

    #[tokio::test]
    async fn test_bundled_templates_load_and_validate() {
        let library = TemplateLibrary::default();
        for id in SYSTEM_FLOW_IDS {
            let doc = library.load(id).await.unwrap().unwrap();
            assert_eq!(doc.id, id);
            let report = validate(&doc);
            assert!(report.ok, "{id}: {:?}", report.errors);
            assert!(report.warnings.is_empty(), "{id}: {:?}", report.warnings);
        }
    }

    #[tokio::test]
    async fn test_advanced_template_branches() {
        let doc = TemplateLibrary::default()
            .load(ADVANCED_CV_FLOW)
            .await
            .unwrap()
            .unwrap();
        let kinds: Vec<NodeType> = doc.nodes.iter().map(|n| n.node_type()).collect();
        assert!(kinds.contains(&NodeType::Condition));
        assert!(kinds.contains(&NodeType::Action));
        assert!(kinds.contains(&NodeType::Wait));
    }

    #[tokio::test]
    async fn test_unknown_id_has_no_template() {
        assert!(TemplateLibrary::default().load("custom").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_override_directory_wins() {
        let dir = tempfile::tempdir().unwrap();
        let mut doc = TemplateLibrary::default()
            .load(BASIC_CV_FLOW)
            .await
            .unwrap()
            .unwrap();
        doc.name = "Overridden".into();
        std::fs::write(
            dir.path().join("basic_cv_flow.json"),
            serde_json::to_string(&doc).unwrap(),
        )
        .unwrap();

        let library = TemplateLibrary::new(Some(dir.path().to_path_buf()));
        let loaded = library.load(BASIC_CV_FLOW).await.unwrap().unwrap();
        assert_eq!(loaded.name, "Overridden");
        // No override file for this one, so the bundled copy is used.
        let advanced = library.load(ADVANCED_CV_FLOW).await.unwrap().unwrap();
        assert_eq!(advanced.name, "Advanced CV intake");
    }

    #[tokio::test]
    async fn test_invalid_override_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("basic_cv_flow.json"), r#"{"id":"x","name":"x"}"#).unwrap();
        let library = TemplateLibrary::new(Some(dir.path().to_path_buf()));
        assert!(library.load(BASIC_CV_FLOW).await.is_err());
    }
}
