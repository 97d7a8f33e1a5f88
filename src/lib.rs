pub mod config;
pub mod data_store;
pub mod date_spine;
pub mod processor;
pub mod query;
pub mod semantic_model;
pub mod server;
pub mod sql_compiler;
pub mod translator;

pub use processor::MetricsService;
pub use server::ProxyServer;
