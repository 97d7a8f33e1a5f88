use crate::query::{FilterValues, TimeGrain};
use crate::translator::provider::{
    CatalogHint, HintEntry, ParseProvider, ParsedCandidate, ProviderError,
};
use async_trait::async_trait;
use log::debug;
use std::collections::BTreeMap;

pub const RULES_PROVIDER_ID: &str = "rules";

const GRAIN_KEYWORDS: &[(&[&str], TimeGrain)] = &[
    (&["按周", "每周", "weekly", "by week"], TimeGrain::Week),
    (&["按月", "每月", "monthly", "by month"], TimeGrain::Month),
    (&["按季度", "每季度", "quarterly", "by quarter"], TimeGrain::Quarter),
    (&["按年", "每年", "yearly", "by year"], TimeGrain::Year),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    Metric,
    Dimension,
    /// One of a dimension's closed values.
    Value,
}

#[derive(Debug, Clone)]
struct Match<'a> {
    start: usize,
    end: usize,
    target: Target,
    /// Catalog name of the metric or dimension.
    name: &'a str,
    /// Catalog value for [`Target::Value`] matches.
    value: &'a str,
}

impl Match<'_> {
    fn len(&self) -> usize {
        self.end - self.start
    }

    fn overlaps(&self, other: &Match) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// Keyword matcher over catalog names, labels, synonyms and closed values.
///
/// Overlapping matches resolve to the longest one. Two different metrics
/// named in separate places are reported as ambiguous rather than guessed.
#[derive(Debug, Default, Clone)]
pub struct RulesProvider;

impl RulesProvider {
    pub fn new() -> Self {
        RulesProvider
    }

    fn parse_text(&self, text: &str, hint: &CatalogHint) -> Result<ParsedCandidate, ProviderError> {
        let haystack = text.to_lowercase();

        let mut found: Vec<Match> = Vec::new();
        for metric in &hint.metrics {
            for term in terms(metric) {
                push_matches(&mut found, &haystack, term, Target::Metric, &metric.name, "");
            }
        }
        for dimension in &hint.dimensions {
            for term in terms(dimension) {
                push_matches(&mut found, &haystack, term, Target::Dimension, &dimension.name, "");
            }
            for value in &dimension.values {
                push_matches(&mut found, &haystack, value, Target::Value, &dimension.name, value);
            }
        }

        // Longest first; ties keep the earlier position.
        found.sort_by(|a, b| b.len().cmp(&a.len()).then(a.start.cmp(&b.start)));
        let mut kept: Vec<Match> = Vec::new();
        for candidate in found {
            if !kept.iter().any(|k| k.overlaps(&candidate)) {
                kept.push(candidate);
            }
        }
        kept.sort_by_key(|m| m.start);

        let mut metrics: Vec<&str> = Vec::new();
        let mut terms_seen: Vec<&str> = Vec::new();
        let mut dimensions: Vec<String> = Vec::new();
        let mut filters: BTreeMap<String, FilterValues> = BTreeMap::new();
        for m in &kept {
            match m.target {
                Target::Metric => {
                    if !metrics.contains(&m.name) {
                        metrics.push(m.name);
                    }
                    terms_seen.push(text_slice(text, &haystack, m));
                }
                Target::Dimension => {
                    if !dimensions.iter().any(|d| d == m.name) {
                        dimensions.push(m.name.to_string());
                    }
                }
                Target::Value => {
                    let values = filters
                        .entry(m.name.to_string())
                        .or_insert_with(|| FilterValues(vec![]));
                    if !values.0.iter().any(|v| v == m.value) {
                        values.0.push(m.value.to_string());
                    }
                }
            }
        }

        let metric_name = match metrics.as_slice() {
            [] => None,
            [single] => Some(single.to_string()),
            many => {
                return Err(ProviderError::Ambiguous {
                    term: terms_seen.join(", "),
                    candidates: many.iter().map(|m| m.to_string()).collect(),
                })
            }
        };

        let granularity = GRAIN_KEYWORDS
            .iter()
            .find(|(keywords, _)| keywords.iter().any(|k| haystack.contains(k)))
            .map(|(_, grain)| *grain);

        let candidate = ParsedCandidate {
            metric_name,
            dimensions,
            filters,
            time_phrase: None,
            start_date: None,
            end_date: None,
            granularity,
        };
        debug!("Rules parsed {:?} into {:?}", text, candidate);
        Ok(candidate)
    }
}

#[async_trait]
impl ParseProvider for RulesProvider {
    fn id(&self) -> &str {
        RULES_PROVIDER_ID
    }

    async fn parse(&self, text: &str, hint: &CatalogHint) -> Result<ParsedCandidate, ProviderError> {
        self.parse_text(text, hint)
    }
}

fn terms(entry: &HintEntry) -> impl Iterator<Item = &str> {
    std::iter::once(entry.name.as_str())
        .chain(std::iter::once(entry.label.as_str()))
        .chain(entry.synonyms.iter().map(String::as_str))
        .filter(|t| !t.trim().is_empty())
}

fn push_matches<'a>(
    found: &mut Vec<Match<'a>>,
    haystack: &str,
    term: &'a str,
    target: Target,
    name: &'a str,
    value: &'a str,
) {
    let needle = term.to_lowercase();
    if needle.is_empty() {
        return;
    }
    for (start, _) in haystack.match_indices(&needle) {
        let end = start + needle.len();
        if needle.is_ascii() && !on_word_boundary(haystack, start, end) {
            continue;
        }
        found.push(Match {
            start,
            end,
            target,
            name,
            value,
        });
    }
}

/// ASCII terms must not sit inside a longer ASCII word (`city` in `velocity`).
fn on_word_boundary(haystack: &str, start: usize, end: usize) -> bool {
    let before = haystack[..start].chars().next_back();
    let after = haystack[end..].chars().next();
    let is_word = |c: Option<char>| c.map_or(false, |c| c.is_ascii_alphanumeric() || c == '_');
    !is_word(before) && !is_word(after)
}

fn text_slice<'t>(text: &'t str, haystack: &str, m: &Match) -> &'t str {
    // Lowercasing keeps byte offsets for the text this matcher is used on;
    // fall back to the whole question when it does not.
    if text.len() == haystack.len() {
        text.get(m.start..m.end).unwrap_or(text)
    } else {
        text
    }
}
