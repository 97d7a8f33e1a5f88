//! Relative and explicit date phrases, resolved against the request date.

use crate::translator::TranslationError;
use chrono::{Datelike, Duration, NaiveDate};
use regex::Regex;
use std::sync::OnceLock;

type Range = (NaiveDate, NaiveDate);

fn explicit_date_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d{4})[-/](\d{1,2})[-/](\d{1,2})").unwrap())
}

fn last_n_days_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?:最近|近|过去|\blast|\bpast)\s*(\d+)\s*(?:天|日|days?\b)").unwrap()
    })
}

fn vague_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)最近|近期|\brecent(?:ly)?\b").unwrap())
}

#[derive(Debug, Clone, Copy)]
enum Period {
    Today,
    Yesterday,
    ThisWeek,
    LastWeek,
    ThisMonth,
    LastMonth,
    ThisYear,
    LastYear,
}

const KEYWORDS: &[(&[&str], Period)] = &[
    (&["today", "今天", "今日"], Period::Today),
    (&["yesterday", "昨天", "昨日"], Period::Yesterday),
    (&["this week", "本周", "这周"], Period::ThisWeek),
    (&["last week", "上周"], Period::LastWeek),
    (&["this month", "本月", "这个月"], Period::ThisMonth),
    (&["last month", "上月", "上个月"], Period::LastMonth),
    (&["this year", "今年"], Period::ThisYear),
    (&["last year", "去年"], Period::LastYear),
];

impl Period {
    fn range(self, today: NaiveDate) -> Range {
        match self {
            Period::Today => (today, today),
            Period::Yesterday => {
                let day = today - Duration::days(1);
                (day, day)
            }
            Period::ThisWeek => (monday(today), today),
            Period::LastWeek => {
                let this_monday = monday(today);
                (this_monday - Duration::days(7), this_monday - Duration::days(1))
            }
            Period::ThisMonth => (first_of_month(today), today),
            Period::LastMonth => {
                let end = first_of_month(today) - Duration::days(1);
                (first_of_month(end), end)
            }
            Period::ThisYear => (first_of_year(today.year()), today),
            Period::LastYear => (
                first_of_year(today.year() - 1),
                first_of_year(today.year()) - Duration::days(1),
            ),
        }
    }
}

fn monday(day: NaiveDate) -> NaiveDate {
    day - Duration::days(day.weekday().num_days_from_monday() as i64)
}

fn first_of_month(day: NaiveDate) -> NaiveDate {
    day.with_day(1).unwrap_or(day)
}

fn first_of_year(year: i32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, 1, 1).unwrap_or(NaiveDate::MIN)
}

/// Finds the date range `text` talks about.
///
/// Returns `Ok(None)` when the text has no date phrase at all. Phrases that
/// cannot be pinned to a single range are errors, never defaults.
pub fn resolve_date_range(text: &str, today: NaiveDate) -> Result<Option<Range>, TranslationError> {
    let ambiguous = |phrase: &str| TranslationError::AmbiguousDateRange(phrase.to_string());
    let mut ranges: Vec<Range> = Vec::new();

    let mut explicit = Vec::new();
    for caps in explicit_date_re().captures_iter(text) {
        let parsed = match (caps[1].parse(), caps[2].parse(), caps[3].parse()) {
            (Ok(y), Ok(m), Ok(d)) => NaiveDate::from_ymd_opt(y, m, d),
            _ => None,
        };
        explicit.push(parsed.ok_or_else(|| ambiguous(&caps[0]))?);
    }
    match explicit.as_slice() {
        [] => (),
        [day] => ranges.push((*day, *day)),
        [start, end] => ranges.push((*start, *end)),
        _ => return Err(ambiguous(text)),
    }
    let rest = explicit_date_re().replace_all(text, " ");

    for caps in last_n_days_re().captures_iter(&rest) {
        let days: i64 = caps[1].parse().map_err(|_| ambiguous(&caps[0]))?;
        if days == 0 {
            return Err(ambiguous(&caps[0]));
        }
        let start = Duration::try_days(days - 1)
            .and_then(|span| today.checked_sub_signed(span))
            .ok_or_else(|| ambiguous(&caps[0]))?;
        ranges.push((start, today));
    }
    let rest = last_n_days_re().replace_all(&rest, " ");

    if let Some(vague) = vague_re().find(&rest) {
        return Err(ambiguous(vague.as_str()));
    }

    let lowered = rest.to_lowercase();
    for (phrases, period) in KEYWORDS {
        if phrases.iter().any(|p| lowered.contains(p)) {
            ranges.push(period.range(today));
        }
    }

    ranges.sort();
    ranges.dedup();
    match ranges.as_slice() {
        [] => Ok(None),
        [range] => Ok(Some(*range)),
        _ => Err(ambiguous(text)),
    }
}
