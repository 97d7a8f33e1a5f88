use crate::config::SemanticModelJSONConfig;
use crate::semantic_model::{SemanticModel, SemanticModelStore, SemanticModelStoreError};
use async_trait::async_trait;
use log::{debug, error};
use std::path::PathBuf;

/// Reads the semantic model from a JSON file on disk.
pub struct JsonSemanticModelStore {
    path: PathBuf,
}

impl JsonSemanticModelStore {
    pub fn new(config: SemanticModelJSONConfig) -> Self {
        JsonSemanticModelStore {
            path: PathBuf::from(config.json_path),
        }
    }
}

#[async_trait]
impl SemanticModelStore for JsonSemanticModelStore {
    async fn load_semantic_model(&self) -> Result<SemanticModel, SemanticModelStoreError> {
        debug!("Reading semantic model from {}", self.path.display());
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            error!("Failed to read {}: {}", self.path.display(), e);
            SemanticModelStoreError::FileNotFound(self.path.display().to_string())
        })?;
        Ok(serde_json::from_str(&content)?)
    }
}
