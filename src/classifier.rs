//! Query Classifier
//!
//! Maps a free-text question onto one analysis intent and pulls out the
//! companies, periods and metrics it refers to:
//! - Single company performance: "How did Chevron do in Q3 2024?"
//! - Multi company comparison: "Compare Shell and BP revenue"
//! - Trend analysis: "ExxonMobil production over the last 4 quarters"
//! - Unsupported: nothing we hold data for ("What's the weather today?")
//!
//! When markers overlap the priority is: comparison keyword, then trend
//! marker, then two or more companies, then a single company.

use crate::models::{ClassifiedQuery, Company, Entities, Intent, MetricType, Period, PeriodRef};

/// Static keyword lists, zero allocation
const COMPARISON_KEYWORDS: &[&str] = &["compare", "compared", "comparing", "comparison", "versus", "vs"];

const TREND_KEYWORDS: &[&str] = &[
    "trend", "trends", "trending", "historical", "history", "growth", "trajectory", "qoq", "yoy",
];

const TREND_PHRASES: &[&[&str]] = &[
    &["over", "time"],
    &["quarter", "over", "quarter"],
    &["year", "over", "year"],
];

const WINDOW_LEADS: &[&str] = &["last", "past", "previous", "recent"];

const NUMBER_WORDS: &[(&str, usize)] = &[
    ("two", 2), ("three", 3), ("four", 4), ("five", 5), ("six", 6),
    ("seven", 7), ("eight", 8), ("nine", 9), ("ten", 10), ("twelve", 12),
];

const ORDINAL_QUARTERS: &[(&str, u8)] = &[("first", 1), ("second", 2), ("third", 3), ("fourth", 4)];

/// Single-token metric keywords. "income" and "cash" need context and are handled separately.
const METRIC_KEYWORDS: &[(&str, MetricType)] = &[
    ("revenue", MetricType::Revenue),
    ("revenues", MetricType::Revenue),
    ("sales", MetricType::Revenue),
    ("turnover", MetricType::Revenue),
    ("profit", MetricType::NetIncome),
    ("profits", MetricType::NetIncome),
    ("earnings", MetricType::NetIncome),
    ("profitability", MetricType::NetIncome),
    ("fcf", MetricType::FreeCashFlow),
    ("debt", MetricType::TotalDebt),
    ("leverage", MetricType::TotalDebt),
    ("borrowings", MetricType::TotalDebt),
    ("liquidity", MetricType::CashAndEquivalents),
    ("production", MetricType::ProductionVolume),
    ("output", MetricType::ProductionVolume),
    ("barrels", MetricType::ProductionVolume),
    ("boe", MetricType::ProductionVolume),
    ("volumes", MetricType::ProductionVolume),
];

/// Query classifier
pub struct QueryClassifier;

impl QueryClassifier {
    /// Classify a query against the companies the store knows about
    pub fn classify(query: &str, known_companies: &[Company]) -> ClassifiedQuery {
        let tokens = tokenize(query);

        let entities = Entities {
            companies: find_companies(&tokens, known_companies),
            periods: find_periods(&tokens),
            metrics: find_metrics(&tokens),
            trend_window: find_trend_window(&tokens),
        };

        let has_comparison = tokens.iter().any(|t| COMPARISON_KEYWORDS.contains(&t.as_str()));
        let has_trend = entities.trend_window.is_some() || contains_trend_marker(&tokens);

        let intent = if entities.companies.is_empty() {
            Intent::Unsupported
        } else if has_comparison {
            Intent::MultiCompanyComparison
        } else if has_trend {
            Intent::TrendAnalysis
        } else if entities.companies.len() >= 2 {
            Intent::MultiCompanyComparison
        } else {
            Intent::SingleCompanyPerformance
        };

        ClassifiedQuery { intent, entities }
    }
}

/// Lowercased alphanumeric runs; everything else separates words
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Longest ticker-like term that is skipped after a number ("50 bp")
const MAX_UNIT_LIKE_LEN: usize = 3;

/// Token index of the first mention of `phrase`. A short single-token term
/// right after a number reads as a unit, not a company.
fn find_mention(tokens: &[String], phrase: &[String]) -> Option<usize> {
    if phrase.is_empty() || phrase.len() > tokens.len() {
        return None;
    }
    let unit_like = phrase.len() == 1 && phrase[0].chars().count() <= MAX_UNIT_LIKE_LEN;

    tokens
        .windows(phrase.len())
        .enumerate()
        .filter(|(_, window)| *window == phrase)
        .map(|(pos, _)| pos)
        .find(|&pos| !(unit_like && pos > 0 && is_number(&tokens[pos - 1])))
}

fn is_number(token: &str) -> bool {
    token.chars().all(|c| c.is_ascii_digit())
}

fn contains_words(tokens: &[String], words: &[&str]) -> bool {
    tokens
        .windows(words.len())
        .any(|window| window.iter().zip(words).all(|(t, w)| t == w))
}

fn find_companies(tokens: &[String], known_companies: &[Company]) -> Vec<String> {
    let mut hits: Vec<(usize, &str)> = known_companies
        .iter()
        .filter_map(|company| {
            company
                .match_terms()
                .filter_map(|term| find_mention(tokens, &tokenize(term)))
                .min()
                .map(|pos| (pos, company.id.as_str()))
        })
        .collect();

    hits.sort_by_key(|(pos, _)| *pos);

    let mut companies: Vec<String> = Vec::with_capacity(hits.len());
    for (_, id) in hits {
        if !companies.iter().any(|c| c == id) {
            companies.push(id.to_string());
        }
    }
    companies
}

fn parse_year(token: &str) -> Option<i32> {
    if token.len() != 4 || !token.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    token.parse().ok().filter(|y| (1990..=2100).contains(y))
}

fn parse_quarter(token: &str) -> Option<u8> {
    let digit = token.strip_prefix('q')?;
    digit.parse().ok().filter(|q| (1..=4).contains(q))
}

fn find_periods(tokens: &[String]) -> Vec<PeriodRef> {
    let mut consumed = vec![false; tokens.len()];
    let mut found: Vec<(usize, PeriodRef)> = Vec::new();

    let mut push_quarter = |pos: usize, year_idx: usize, quarter: u8, consumed: &mut Vec<bool>| {
        if let Some(year) = parse_year(&tokens[year_idx]) {
            if let Some(period) = Period::new(year, quarter) {
                consumed[year_idx] = true;
                found.push((pos, PeriodRef::Quarter { period }));
                return true;
            }
        }
        false
    };

    for i in 0..tokens.len() {
        // "Q1 2024", "2024 Q1", "Q1-2024"
        if let Some(quarter) = parse_quarter(&tokens[i]) {
            let after = i + 1 < tokens.len() && !consumed[i + 1] && push_quarter(i, i + 1, quarter, &mut consumed);
            if !after && i > 0 && !consumed[i - 1] {
                push_quarter(i - 1, i - 1, quarter, &mut consumed);
            }
            continue;
        }

        // "first quarter 2024", "third quarter of 2024"
        if let Some((_, quarter)) = ORDINAL_QUARTERS.iter().find(|(w, _)| *w == tokens[i]) {
            if tokens.get(i + 1).map(String::as_str) == Some("quarter") {
                let year_idx = if tokens.get(i + 2).map(String::as_str) == Some("of") { i + 3 } else { i + 2 };
                if year_idx < tokens.len() && !consumed[year_idx] {
                    push_quarter(i, year_idx, *quarter, &mut consumed);
                }
            }
        }
    }

    for (i, token) in tokens.iter().enumerate() {
        if consumed[i] {
            continue;
        }
        if let Some(year) = parse_year(token) {
            found.push((i, PeriodRef::Year { year }));
        }
    }

    found.sort_by_key(|(pos, _)| *pos);

    let mut periods = Vec::with_capacity(found.len());
    for (_, period) in found {
        if !periods.contains(&period) {
            periods.push(period);
        }
    }
    periods
}

fn find_metrics(tokens: &[String]) -> Vec<MetricType> {
    let mut found: Vec<(usize, MetricType)> = Vec::new();

    for (i, token) in tokens.iter().enumerate() {
        let prev = i.checked_sub(1).map(|p| tokens[p].as_str());
        let next = tokens.get(i + 1).map(String::as_str);

        let metric = match token.as_str() {
            "income" if prev == Some("operating") => Some(MetricType::OperatingIncome),
            "income" => Some(MetricType::NetIncome),
            "cash" if next == Some("flow") || next == Some("flows") => Some(MetricType::FreeCashFlow),
            "cash" => Some(MetricType::CashAndEquivalents),
            other => METRIC_KEYWORDS
                .iter()
                .find(|(kw, _)| *kw == other)
                .map(|(_, metric)| *metric),
        };

        if let Some(metric) = metric {
            found.push((i, metric));
        }
    }

    let mut metrics = Vec::with_capacity(found.len());
    for (_, metric) in found {
        if !metrics.contains(&metric) {
            metrics.push(metric);
        }
    }
    metrics
}

fn parse_count(token: &str) -> Option<usize> {
    token
        .parse::<usize>()
        .ok()
        .filter(|n| (1..=40).contains(n))
        .or_else(|| NUMBER_WORDS.iter().find(|(w, _)| *w == token).map(|(_, n)| *n))
}

/// "last 4 quarters" → 4, "past two years" → 8
fn find_trend_window(tokens: &[String]) -> Option<usize> {
    tokens.windows(3).find_map(|w| {
        if !WINDOW_LEADS.contains(&w[0].as_str()) {
            return None;
        }
        let count = parse_count(&w[1])?;
        match w[2].as_str() {
            "quarters" | "quarter" => Some(count),
            "years" | "year" => Some(count * 4),
            _ => None,
        }
    })
}

/// Fast path trend marker detection
fn contains_trend_marker(tokens: &[String]) -> bool {
    tokens.iter().any(|t| TREND_KEYWORDS.contains(&t.as_str()))
        || TREND_PHRASES.iter().any(|phrase| contains_words(tokens, phrase))
        || tokens.windows(2).any(|w| {
            WINDOW_LEADS.contains(&w[0].as_str()) && matches!(w[1].as_str(), "quarters" | "years")
        })
}
