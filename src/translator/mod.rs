//! Natural-language questions to validated metric queries.
//!
//! A provider reads the question into a [`ParsedCandidate`]. Nothing in the
//! candidate is trusted: names go through catalog synonym resolution, dates
//! are computed here from the request date, and the result passes the same
//! validator as form requests.

pub mod dates;
pub mod openai;
pub mod provider;
pub mod rules;

pub use openai::{
    ChatCompletionsProvider, LOCAL_PROVIDER_ALIASES, LOCAL_PROVIDER_ID, OPENAI_PROVIDER_ID,
};
pub use provider::{CatalogHint, HintEntry, ParseProvider, ParsedCandidate, ProviderError};
pub use rules::{RulesProvider, RULES_PROVIDER_ID};

use crate::config::LlmConfig;
use crate::date_spine::DateSpine;
use crate::query::{
    FilterValues, QueryValidator, StructuredQuery, ValidatedQuery, ValidationError,
};
use crate::semantic_model::{Catalog, CatalogError};
use chrono::NaiveDate;
use log::{debug, info, warn};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TranslationError {
    #[error("Ambiguous date range: {0}")]
    AmbiguousDateRange(String),

    #[error("Term {term:?} matches several catalog entries: {}", candidates.join(", "))]
    AmbiguousSynonym {
        term: String,
        candidates: Vec<String>,
    },

    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("Provider did not answer within {0:?}")]
    ProviderTimeout(Duration),

    #[error("Malformed provider response: {0}")]
    MalformedResponse(String),

    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("No metric found in the question")]
    MissingMetric,

    #[error(transparent)]
    Invalid(#[from] ValidationError),
}

impl TranslationError {
    pub fn kind(&self) -> &'static str {
        match self {
            TranslationError::AmbiguousDateRange(_) => "AmbiguousDateRange",
            TranslationError::AmbiguousSynonym { .. } => "AmbiguousSynonym",
            TranslationError::ProviderUnavailable(_) => "ProviderUnavailable",
            TranslationError::ProviderTimeout(_) => "ProviderTimeout",
            TranslationError::MalformedResponse(_) => "MalformedResponse",
            TranslationError::UnknownProvider(_) => "UnknownProvider",
            TranslationError::MissingMetric => "MissingMetric",
            TranslationError::Invalid(err) => err.kind(),
        }
    }
}

impl From<ProviderError> for TranslationError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Unavailable(reason) => TranslationError::ProviderUnavailable(reason),
            ProviderError::Malformed(reason) => TranslationError::MalformedResponse(reason),
            ProviderError::Ambiguous { term, candidates } => {
                TranslationError::AmbiguousSynonym { term, candidates }
            }
        }
    }
}

impl From<CatalogError> for TranslationError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::AmbiguousSynonym { term, candidates } => {
                TranslationError::AmbiguousSynonym { term, candidates }
            }
            CatalogError::UnknownMetric(name) => {
                TranslationError::Invalid(ValidationError::UnknownMetric(name))
            }
            other => TranslationError::MalformedResponse(other.to_string()),
        }
    }
}

pub struct Translator {
    catalog: Arc<Catalog>,
    spine: Arc<DateSpine>,
    hint: CatalogHint,
    providers: HashMap<String, Arc<dyn ParseProvider>>,
    default_provider: String,
    timeout: Duration,
}

impl Translator {
    pub fn new(catalog: Arc<Catalog>, spine: Arc<DateSpine>, timeout: Duration) -> Self {
        let hint = CatalogHint::from_catalog(&catalog);
        Translator {
            catalog,
            spine,
            hint,
            providers: HashMap::new(),
            default_provider: RULES_PROVIDER_ID.to_string(),
            timeout,
        }
        .with_provider(Arc::new(RulesProvider::new()))
    }

    /// Registers `rules`, `local` (also reachable as `lmstudio` and
    /// `deepseek`), and `openai` when an API key is configured.
    pub fn from_config(catalog: Arc<Catalog>, spine: Arc<DateSpine>, config: &LlmConfig) -> Self {
        let mut translator = Translator::new(catalog, spine, config.timeout())
            .with_provider(Arc::new(ChatCompletionsProvider::new(
                LOCAL_PROVIDER_ID,
                config.local_base_url.clone(),
                config.local_model.clone(),
                config.local_api_key.clone(),
            )))
            .with_default_provider(&config.default_provider);
        for alias in LOCAL_PROVIDER_ALIASES {
            translator = translator.with_alias(alias, LOCAL_PROVIDER_ID);
        }
        if let Some(key) = &config.openai_api_key {
            translator = translator.with_provider(Arc::new(ChatCompletionsProvider::new(
                OPENAI_PROVIDER_ID,
                config.openai_base_url.clone(),
                config.openai_model.clone(),
                Some(key.clone()),
            )));
        }
        translator
    }

    pub fn with_provider(mut self, provider: Arc<dyn ParseProvider>) -> Self {
        self.providers.insert(provider.id().to_string(), provider);
        self
    }

    /// Makes an already registered provider reachable under another id.
    pub fn with_alias(mut self, alias: &str, id: &str) -> Self {
        if let Some(provider) = self.providers.get(id).cloned() {
            self.providers.insert(alias.to_string(), provider);
        } else {
            warn!("Cannot alias {} to unregistered provider {}", alias, id);
        }
        self
    }

    pub fn with_default_provider(mut self, id: &str) -> Self {
        self.default_provider = id.to_string();
        self
    }

    pub fn provider_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        ids.sort();
        ids
    }

    pub async fn translate(
        &self,
        text: &str,
        provider_id: Option<&str>,
        today: NaiveDate,
    ) -> Result<ValidatedQuery, TranslationError> {
        let id = provider_id.unwrap_or(&self.default_provider);
        let provider = self
            .providers
            .get(id)
            .ok_or_else(|| TranslationError::UnknownProvider(id.to_string()))?;

        info!("Translating question with provider {}", id);
        let candidate = match tokio::time::timeout(self.timeout, provider.parse(text, &self.hint)).await {
            Ok(result) => result?,
            Err(_) => {
                warn!("Provider {} timed out after {:?}", id, self.timeout);
                return Err(TranslationError::ProviderTimeout(self.timeout));
            }
        };
        debug!("Provider {} candidate: {:?}", id, candidate);

        let query = self.resolve(text, candidate, today)?;
        Ok(QueryValidator::new(&self.catalog, &self.spine).validate(query)?)
    }

    fn resolve(
        &self,
        text: &str,
        candidate: ParsedCandidate,
        today: NaiveDate,
    ) -> Result<StructuredQuery, TranslationError> {
        let metric_term = candidate
            .metric_name
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .ok_or(TranslationError::MissingMetric)?;
        let metric_name = self.catalog.resolve_metric_term(metric_term)?;

        let dimensions = candidate
            .dimensions
            .iter()
            .map(|d| self.catalog.resolve_dimension_term(d))
            .collect::<Result<Vec<_>, _>>()?;

        let mut filters: BTreeMap<String, FilterValues> = BTreeMap::new();
        for (key, values) in &candidate.filters {
            let dimension = self.catalog.resolve_dimension_term(key)?;
            filters
                .entry(dimension)
                .or_insert_with(|| FilterValues(vec![]))
                .0
                .extend(values.0.iter().cloned());
        }

        let (start_date, end_date) = resolve_dates(text, &candidate, today)?;

        Ok(StructuredQuery {
            metric_name,
            dimensions,
            filters,
            granularity: candidate.granularity.unwrap_or_default(),
            start_date,
            end_date,
        })
    }
}

/// The question itself wins over the provider's phrase, which wins over
/// provider-computed dates.
fn resolve_dates(
    text: &str,
    candidate: &ParsedCandidate,
    today: NaiveDate,
) -> Result<(NaiveDate, NaiveDate), TranslationError> {
    if let Some(range) = dates::resolve_date_range(text, today)? {
        return Ok(range);
    }

    if let Some(phrase) = non_empty(&candidate.time_phrase) {
        return dates::resolve_date_range(phrase, today)?
            .ok_or_else(|| TranslationError::AmbiguousDateRange(phrase.to_string()));
    }

    let parse = |value: &str| {
        NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d")
            .map_err(|_| TranslationError::AmbiguousDateRange(value.to_string()))
    };
    match (non_empty(&candidate.start_date), non_empty(&candidate.end_date)) {
        (Some(start), Some(end)) => Ok((parse(start)?, parse(end)?)),
        (None, None) => Err(TranslationError::AmbiguousDateRange(format!(
            "no time range in {:?}",
            text
        ))),
        _ => Err(TranslationError::AmbiguousDateRange(
            "only one end of the range was given".to_string(),
        )),
    }
}

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}
