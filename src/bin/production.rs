use log::error;
use std::process;

use eqtble_metrics::{
    config::{Config, LlmConfig, PostgresConfig, S3Config, SpineConfig},
    data_store::PostgresDataStore,
    semantic_model::{load_catalog, s3_store::S3SemanticModelStore},
    MetricsService, ProxyServer,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let config = Config::new().map_err(|e| {
        error!("Failed to initialize config: {}", e);
        e
    })?;

    let postgres_config = PostgresConfig::new().map_err(|e| {
        error!("Failed to initialize Postgres config: {}", e);
        e
    })?;

    let s3_config = S3Config::new().map_err(|e| {
        error!("Failed to initialize S3 config: {}", e);
        e
    })?;

    let spine_config = SpineConfig::new().map_err(|e| {
        error!("Failed to initialize date spine config: {}", e);
        e
    })?;

    let llm_config = LlmConfig::new().map_err(|e| {
        error!("Failed to initialize LLM config: {}", e);
        e
    })?;

    let semantic_model_store = S3SemanticModelStore::new(s3_config).await;
    let catalog = load_catalog(&semantic_model_store).await.map_err(|e| {
        error!("Failed to load semantic model: {}", e);
        e
    })?;

    let data_store = PostgresDataStore::new(postgres_config).await.map_err(|e| {
        error!("Failed to create PostgresDataStore: {}", e);
        e
    })?;

    let service = MetricsService::from_config(catalog, &spine_config, &llm_config, data_store)
        .map_err(|e| {
            error!("Failed to build metrics service: {}", e);
            e
        })?;

    let server = ProxyServer::new(config, service);

    if let Err(e) = server.run().await {
        error!("Server encountered an error: {}", e);
        process::exit(1);
    }

    Ok(())
}
