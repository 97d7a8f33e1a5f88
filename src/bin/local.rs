use log::{error, info};
use std::process;

use eqtble_metrics::{
    config::{Config, LlmConfig, PostgresConfig, SemanticModelJSONConfig, SemanticModelSource, SpineConfig},
    data_store::PostgresDataStore,
    semantic_model::{
        json_store::JsonSemanticModelStore, load_catalog, local_store::LocalSemanticModelStore,
    },
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

    let spine_config = SpineConfig::new().map_err(|e| {
        error!("Failed to initialize date spine config: {}", e);
        e
    })?;

    let llm_config = LlmConfig::new().map_err(|e| {
        error!("Failed to initialize LLM config: {}", e);
        e
    })?;

    let catalog = match config.semantic_model_store {
        SemanticModelSource::Local => {
            info!("Using LocalSemanticModelStore");
            load_catalog(&LocalSemanticModelStore::new()).await
        }
        SemanticModelSource::Json => {
            let json_config = SemanticModelJSONConfig::new().map_err(|e| {
                error!("Failed to initialize JSON store config: {}", e);
                e
            })?;
            info!("Using JsonSemanticModelStore at {}", json_config.json_path);
            load_catalog(&JsonSemanticModelStore::new(json_config)).await
        }
    }
    .map_err(|e| {
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
