use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveDate;
use envconfig::Envconfig;
use log::debug;

/// Where the `local` binary reads its semantic model from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemanticModelSource {
    Local,
    Json,
}

impl FromStr for SemanticModelSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "local" => Ok(SemanticModelSource::Local),
            "json" => Ok(SemanticModelSource::Json),
            other => Err(format!("unknown semantic model store: {}", other)),
        }
    }
}

#[derive(Envconfig)]
pub struct Config {
    #[envconfig(from = "SERVER_HOST", default = "127.0.0.1")]
    pub server_host: String,

    #[envconfig(from = "SERVER_PORT", default = "8090")]
    pub server_port: u16,

    #[envconfig(from = "SEMANTIC_MODEL_STORE", default = "local")]
    pub semantic_model_store: SemanticModelSource,
}

impl Config {
    pub fn new() -> Result<Self, envconfig::Error> {
        let config = Self::init_from_env()?;
        debug!(
            "Config loaded: server_host={}, server_port={}, semantic_model_store={:?}",
            config.server_host, config.server_port, config.semantic_model_store
        );
        Ok(config)
    }
}

#[derive(Envconfig, Clone)]
pub struct PostgresConfig {
    #[envconfig(from = "POSTGRES_USER", default = "postgres")]
    pub user: String,
    #[envconfig(from = "POSTGRES_PASSWORD", default = "postgres")]
    pub password: String,
    #[envconfig(from = "POSTGRES_HOST", default = "localhost:5432")]
    pub host: String,
    #[envconfig(from = "POSTGRES_DB", default = "toll")]
    pub dbname: String,
}

impl PostgresConfig {
    pub fn new() -> Result<Self, envconfig::Error> {
        let config = Self::init_from_env()?;
        debug!(
            "PostgresConfig loaded: user={}, host={}, dbname={}",
            config.user, config.host, config.dbname
        );
        Ok(config)
    }
}

#[derive(Envconfig, Clone)]
pub struct S3Config {
    #[envconfig(from = "TENANT")]
    pub tenant: String,

    #[envconfig(from = "S3_BUCKET_NAME")]
    pub bucket_name: String,
}

impl S3Config {
    pub fn new() -> Result<Self, envconfig::Error> {
        let config = Self::init_from_env()?;
        debug!(
            "S3Config loaded: tenant={}, bucket_name={}",
            config.tenant, config.bucket_name
        );
        Ok(config)
    }
}

#[derive(Envconfig, Clone)]
pub struct SemanticModelJSONConfig {
    #[envconfig(from = "JSON_PATH", default = "semantic_model.json")]
    pub json_path: String,
}

impl SemanticModelJSONConfig {
    pub fn new() -> Result<Self, envconfig::Error> {
        let config = Self::init_from_env()?;
        debug!(
            "SemanticModelJSONConfig loaded: json_path={}",
            config.json_path
        );
        Ok(config)
    }
}

#[derive(Envconfig, Clone)]
pub struct SpineConfig {
    #[envconfig(from = "DATE_SPINE_START", default = "2020-01-01")]
    pub start: NaiveDate,

    #[envconfig(from = "DATE_SPINE_END", default = "2030-12-31")]
    pub end: NaiveDate,

    /// Materialized spine table; the spine is inlined as VALUES when unset.
    #[envconfig(from = "DATE_SPINE_TABLE")]
    pub table: Option<String>,
}

impl SpineConfig {
    pub fn new() -> Result<Self, envconfig::Error> {
        let config = Self::init_from_env()?;
        debug!(
            "SpineConfig loaded: start={}, end={}, table={:?}",
            config.start, config.end, config.table
        );
        Ok(config)
    }
}

#[derive(Envconfig, Clone)]
pub struct LlmConfig {
    #[envconfig(from = "LLM_PROVIDER", default = "rules")]
    pub default_provider: String,

    #[envconfig(from = "LLM_BASE_URL", default = "http://localhost:1234/v1")]
    pub local_base_url: String,

    #[envconfig(from = "LLM_MODEL", default = "local-model")]
    pub local_model: String,

    #[envconfig(from = "LLM_API_KEY")]
    pub local_api_key: Option<String>,

    #[envconfig(from = "OPENAI_BASE_URL", default = "https://api.openai.com/v1")]
    pub openai_base_url: String,

    #[envconfig(from = "OPENAI_MODEL", default = "gpt-3.5-turbo")]
    pub openai_model: String,

    #[envconfig(from = "OPENAI_API_KEY")]
    pub openai_api_key: Option<String>,

    #[envconfig(from = "LLM_TIMEOUT_SECS", default = "30")]
    pub timeout_secs: u64,
}

impl LlmConfig {
    pub fn new() -> Result<Self, envconfig::Error> {
        let config = Self::init_from_env()?;
        debug!(
            "LlmConfig loaded: default_provider={}, local_base_url={}, local_model={}, openai_base_url={}, openai_model={}, openai_key_set={}, timeout_secs={}",
            config.default_provider,
            config.local_base_url,
            config.local_model,
            config.openai_base_url,
            config.openai_model,
            config.openai_api_key.is_some(),
            config.timeout_secs
        );
        Ok(config)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
