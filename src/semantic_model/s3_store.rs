use crate::config::S3Config;
use crate::semantic_model::{SemanticModel, SemanticModelStore, SemanticModelStoreError};
use async_trait::async_trait;
use aws_sdk_s3::{config::BehaviorVersion, Client};
use log::{debug, error};

const SEMANTIC_MODEL_KEY: &str = "semantic_model.json";

/// Reads `{tenant}/semantic_model.json` from an S3 bucket.
pub struct S3SemanticModelStore {
    tenant: String,
    s3_client: Client,
    bucket_name: String,
}

impl S3SemanticModelStore {
    pub async fn new(config: S3Config) -> Self {
        let shared_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
        let s3_client = Client::new(&shared_config);
        S3SemanticModelStore {
            tenant: config.tenant,
            s3_client,
            bucket_name: config.bucket_name,
        }
    }

    fn object_key(&self) -> String {
        format!("{}/{}", self.tenant, SEMANTIC_MODEL_KEY)
    }

    async fn get_object_content(&self, key: &str) -> Result<String, SemanticModelStoreError> {
        let result = self
            .s3_client
            .get_object()
            .bucket(self.bucket_name.clone())
            .key(key)
            .send()
            .await
            .map_err(|e| {
                error!("Failed to fetch s3://{}/{}: {}", self.bucket_name, key, e);
                SemanticModelStoreError::ObjectStore(e.to_string())
            })?;

        let body = result
            .body
            .collect()
            .await
            .map_err(|e| SemanticModelStoreError::ObjectStore(e.to_string()))?;

        String::from_utf8(body.to_vec())
            .map_err(|e| SemanticModelStoreError::ObjectStore(e.to_string()))
    }
}

#[async_trait]
impl SemanticModelStore for S3SemanticModelStore {
    async fn load_semantic_model(&self) -> Result<SemanticModel, SemanticModelStoreError> {
        let key = self.object_key();
        debug!("Reading semantic model from s3://{}/{}", self.bucket_name, key);
        let content = self.get_object_content(&key).await?;
        Ok(serde_json::from_str(&content)?)
    }
}
