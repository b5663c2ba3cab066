//! Core data models for the financial analyst

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

//
// ================= Reference Data =================
//

/// An oil & gas company known to the record store
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Company {
    pub id: String,
    pub name: String,
    pub ticker: String,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default)]
    pub sector_tags: Vec<String>,
}

impl Company {
    /// Every spelling that identifies this company in free text
    pub fn match_terms(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.name.as_str())
            .chain(std::iter::once(self.ticker.as_str()))
            .chain(self.aliases.iter().map(String::as_str))
            .filter(|term| !term.trim().is_empty())
    }
}

//
// ================= Periods & Metrics =================
//

/// A fiscal quarter. Orders by year, then quarter.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Period {
    pub year: i32,
    pub quarter: u8,
}

impl Period {
    pub fn new(year: i32, quarter: u8) -> Option<Self> {
        (1..=4).contains(&quarter).then_some(Self { year, quarter })
    }

    /// Monotonic index used for range filters in SQL
    pub fn ordinal(&self) -> i32 {
        self.year * 4 + i32::from(self.quarter) - 1
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Q{} {}", self.quarter, self.year)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    Revenue,
    NetIncome,
    OperatingIncome,
    FreeCashFlow,
    TotalDebt,
    CashAndEquivalents,
    ProductionVolume,
}

impl MetricType {
    pub const ALL: [MetricType; 7] = [
        MetricType::Revenue,
        MetricType::NetIncome,
        MetricType::OperatingIncome,
        MetricType::FreeCashFlow,
        MetricType::TotalDebt,
        MetricType::CashAndEquivalents,
        MetricType::ProductionVolume,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::Revenue => "revenue",
            MetricType::NetIncome => "net_income",
            MetricType::OperatingIncome => "operating_income",
            MetricType::FreeCashFlow => "free_cash_flow",
            MetricType::TotalDebt => "total_debt",
            MetricType::CashAndEquivalents => "cash_and_equivalents",
            MetricType::ProductionVolume => "production_volume",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            MetricType::Revenue => "Revenue",
            MetricType::NetIncome => "Net Income",
            MetricType::OperatingIncome => "Operating Income",
            MetricType::FreeCashFlow => "Free Cash Flow",
            MetricType::TotalDebt => "Total Debt",
            MetricType::CashAndEquivalents => "Cash & Equivalents",
            MetricType::ProductionVolume => "Production Volume",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|m| m.as_str() == value)
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

//
// ================= Financial Records =================
//

/// One reported figure. Unique per (company, period, metric).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinancialRecord {
    pub company_id: String,
    pub period: Period,
    pub metric_type: MetricType,
    pub value: f64,
    pub unit: String,
    pub currency: Option<String>,
}

impl FinancialRecord {
    /// `86,960.00 million USD` or `3,150.0 thousand BOE/day`
    pub fn display_value(&self) -> String {
        match &self.currency {
            Some(currency) => format!("{} {} {}", group_thousands(self.value, 2), self.unit, currency),
            None => format!("{} {}", group_thousands(self.value, 1), self.unit),
        }
    }
}

/// Fixed-precision rendering with comma thousands separators.
pub fn group_thousands(value: f64, decimals: usize) -> String {
    let rendered = format!("{:.*}", decimals, value.abs());
    let (int_part, frac_part) = match rendered.split_once('.') {
        Some((i, f)) => (i, Some(f)),
        None => (rendered.as_str(), None),
    };

    let mut grouped = String::with_capacity(int_part.len() + int_part.len() / 3);
    for (i, ch) in int_part.chars().enumerate() {
        if i > 0 && (int_part.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }

    let mut out = String::new();
    if value < 0.0 && rendered.chars().any(|c| c != '0' && c != '.') {
        out.push('-');
    }
    out.push_str(&grouped);
    if let Some(frac) = frac_part {
        out.push('.');
        out.push_str(frac);
    }
    out
}

//
// ================= Classification =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Intent {
    SingleCompanyPerformance,
    MultiCompanyComparison,
    TrendAnalysis,
    Unsupported,
}

/// An explicit time reference found in a query
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PeriodRef {
    Quarter { period: Period },
    Year { year: i32 },
}

impl PeriodRef {
    pub fn contains(&self, period: &Period) -> bool {
        match self {
            PeriodRef::Quarter { period: p } => p == period,
            PeriodRef::Year { year } => period.year == *year,
        }
    }

    /// First and last quarter covered
    pub fn bounds(&self) -> (Period, Period) {
        match *self {
            PeriodRef::Quarter { period } => (period, period),
            PeriodRef::Year { year } => (Period { year, quarter: 1 }, Period { year, quarter: 4 }),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Entities {
    /// Company ids, first mention first, no duplicates
    pub companies: Vec<String>,
    pub periods: Vec<PeriodRef>,
    pub metrics: Vec<MetricType>,
    /// "last N quarters" window, in quarters
    pub trend_window: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClassifiedQuery {
    pub intent: Intent,
    pub entities: Entities,
}

//
// ================= Context & Prompt =================
//

/// Records selected to answer one query, plus what selected them
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContextBundle {
    pub intent: Intent,
    pub entities: Entities,
    pub records: Vec<FinancialRecord>,
    /// Display names keyed by company id, in first-mention order
    pub company_names: Vec<(String, String)>,
    #[serde(default)]
    pub notes: Vec<String>,
}

impl ContextBundle {
    pub fn empty(classified: ClassifiedQuery) -> Self {
        Self {
            intent: classified.intent,
            entities: classified.entities,
            records: Vec::new(),
            company_names: Vec::new(),
            notes: Vec::new(),
        }
    }

    pub fn company_name<'a>(&'a self, company_id: &'a str) -> &'a str {
        self.company_names
            .iter()
            .find(|(id, _)| id == company_id)
            .map(|(_, name)| name.as_str())
            .unwrap_or(company_id)
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub query: String,
    pub response: String,
    pub at: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn new(query: impl Into<String>, response: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            response: response.into(),
            at: Utc::now(),
        }
    }
}

//
// ================= Generation & Response =================
//

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum GenerationResult {
    Success { text: String },
    ProviderError { reason: String },
    Degraded { text: String, reason: String },
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    Generated,
    /// Template answer produced while every backend was down
    Limited,
    Clarification,
    Apology,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserResponse {
    pub text: String,
    pub mode: ResponseMode,
}

impl UserResponse {
    pub fn is_degraded(&self) -> bool {
        self.mode == ResponseMode::Limited
    }

    pub fn is_error(&self) -> bool {
        self.mode == ResponseMode::Apology
    }
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Intent::SingleCompanyPerformance => "single-company-performance",
            Intent::MultiCompanyComparison => "multi-company-comparison",
            Intent::TrendAnalysis => "trend-analysis",
            Intent::Unsupported => "unsupported",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for ResponseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResponseMode::Generated => "generated",
            ResponseMode::Limited => "limited",
            ResponseMode::Clarification => "clarification",
            ResponseMode::Apology => "apology",
        };
        write!(f, "{}", s)
    }
}
