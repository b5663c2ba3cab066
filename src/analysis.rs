//! Derived financial ratios
//!
//! Profitability, cash conversion, leverage and unit revenue computed from
//! the records already in a context bundle, graded against fixed industry
//! benchmarks. A ratio whose inputs are missing, or whose denominator is
//! zero or negative, is left out.

use crate::models::{group_thousands, ContextBundle, FinancialRecord, Intent, MetricType, Period};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

const MONEY_UNIT: &str = "million";
const PRODUCTION_UNIT: &str = "thousand BOE/day";
const DAYS_PER_QUARTER: f64 = 91.25;

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum Grade {
    Excellent,
    Good,
    Fair,
    Weak,
}

impl Grade {
    /// Higher is better. `bands` are the excellent, good and fair floors.
    fn at_least(value: f64, bands: [f64; 3]) -> Self {
        if value > bands[0] {
            Grade::Excellent
        } else if value > bands[1] {
            Grade::Good
        } else if value > bands[2] {
            Grade::Fair
        } else {
            Grade::Weak
        }
    }

    /// Lower is better. `bands` are the excellent, good and fair ceilings.
    fn at_most(value: f64, bands: [f64; 3]) -> Self {
        if value < bands[0] {
            Grade::Excellent
        } else if value < bands[1] {
            Grade::Good
        } else if value < bands[2] {
            Grade::Fair
        } else {
            Grade::Weak
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Grade::Excellent => "excellent",
            Grade::Good => "good",
            Grade::Fair => "fair",
            Grade::Weak => "weak",
        };
        f.write_str(s)
    }
}

/// Ratios for one company in one period
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CompanyRatios {
    pub company_id: String,
    pub period: Period,
    /// Net income over revenue, percent
    pub profit_margin: Option<f64>,
    /// Free cash flow over net income
    pub cash_conversion: Option<f64>,
    /// Total debt over cash and equivalents
    pub debt_to_cash: Option<f64>,
    /// Quarterly revenue over quarterly barrels of oil equivalent
    pub revenue_per_boe: Option<f64>,
    #[serde(skip)]
    currency: Option<String>,
}

impl CompanyRatios {
    /// `records` must all belong to `company_id` and `period`
    pub fn from_records(company_id: &str, period: Period, records: &[&FinancialRecord]) -> Self {
        let find = |metric: MetricType| records.iter().copied().find(|r| r.metric_type == metric);

        let revenue = find(MetricType::Revenue);
        let net_income = find(MetricType::NetIncome);
        let free_cash_flow = find(MetricType::FreeCashFlow);
        let total_debt = find(MetricType::TotalDebt);
        let cash = find(MetricType::CashAndEquivalents);
        let production = find(MetricType::ProductionVolume);

        let revenue_per_boe = match (revenue, production) {
            (Some(revenue), Some(production))
                if revenue.unit == MONEY_UNIT && production.unit == PRODUCTION_UNIT =>
            {
                let barrels = production.value * 1_000.0 * DAYS_PER_QUARTER;
                safe_ratio(revenue.value * 1_000_000.0, barrels)
            }
            _ => None,
        };

        Self {
            company_id: company_id.to_string(),
            period,
            profit_margin: money_ratio(net_income, revenue).map(|r| r * 100.0),
            cash_conversion: money_ratio(free_cash_flow, net_income),
            debt_to_cash: money_ratio(total_debt, cash),
            revenue_per_boe,
            currency: revenue.and_then(|r| r.currency.clone()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.profit_margin.is_none()
            && self.cash_conversion.is_none()
            && self.debt_to_cash.is_none()
            && self.revenue_per_boe.is_none()
    }

    pub fn profitability(&self) -> Option<Grade> {
        self.profit_margin.map(|m| Grade::at_least(m, [20.0, 15.0, 10.0]))
    }

    pub fn cash_generation(&self) -> Option<Grade> {
        self.cash_conversion.map(|c| Grade::at_least(c, [0.8, 0.6, 0.4]))
    }

    pub fn financial_strength(&self) -> Option<Grade> {
        self.debt_to_cash.map(|d| Grade::at_most(d, [1.0, 1.5, 2.5]))
    }

    /// Composite out of 100: margin up to 40, cash conversion up to 30,
    /// leverage up to 30. Missing ratios score zero.
    pub fn score(&self) -> f64 {
        let profitability = self.profit_margin.map_or(0.0, |m| (m * 2.0).clamp(0.0, 40.0));
        let cash = self.cash_conversion.map_or(0.0, |c| (c.abs() * 30.0).min(30.0));
        let leverage = self.debt_to_cash.map_or(0.0, |d| (30.0 - d * 10.0).max(0.0));
        profitability + cash + leverage
    }

    /// `profit margin 10.15% (fair)`, one entry per available ratio
    pub fn describe(&self) -> Vec<String> {
        let mut parts = Vec::with_capacity(4);
        if let (Some(margin), Some(grade)) = (self.profit_margin, self.profitability()) {
            parts.push(format!("profit margin {:.2}% ({})", margin, grade));
        }
        if let (Some(conversion), Some(grade)) = (self.cash_conversion, self.cash_generation()) {
            parts.push(format!(
                "cash conversion {:.2}x free cash flow to net income ({})",
                conversion, grade
            ));
        }
        if let (Some(ratio), Some(grade)) = (self.debt_to_cash, self.financial_strength()) {
            parts.push(format!("debt to cash {:.2}x ({})", ratio, grade));
        }
        if let Some(per_boe) = self.revenue_per_boe {
            let currency = self.currency.as_deref().unwrap_or("USD");
            parts.push(format!("revenue per BOE {} {}", group_thousands(per_boe, 2), currency));
        }
        parts
    }
}

/// Ratios only accompany performance and comparison answers
pub fn applies_to(intent: Intent) -> bool {
    matches!(intent, Intent::SingleCompanyPerformance | Intent::MultiCompanyComparison)
}

/// Ratios for each company's most recent period that yields any, in
/// bundle company order. Companies with no computable ratio are skipped.
pub fn ratios_for(bundle: &ContextBundle) -> Vec<CompanyRatios> {
    bundle
        .company_names
        .iter()
        .filter_map(|(company_id, _)| {
            let records: Vec<&FinancialRecord> =
                bundle.records.iter().filter(|r| &r.company_id == company_id).collect();
            let periods: BTreeSet<Period> = records.iter().map(|r| r.period).collect();

            periods.into_iter().rev().find_map(|period| {
                let in_period: Vec<&FinancialRecord> =
                    records.iter().copied().filter(|r| r.period == period).collect();
                let ratios = CompanyRatios::from_records(company_id, period, &in_period);
                (!ratios.is_empty()).then_some(ratios)
            })
        })
        .collect()
}

/// Highest composite score first; ties keep input order
pub fn rank(ratios: &[CompanyRatios]) -> Vec<(&CompanyRatios, f64)> {
    let mut ranked: Vec<(&CompanyRatios, f64)> = ratios.iter().map(|r| (r, r.score())).collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    ranked
}

/// `1. Shell (61.2/100), 2. BP (39.0/100)`
pub fn ranking_line(bundle: &ContextBundle, ratios: &[CompanyRatios]) -> Option<String> {
    if ratios.len() < 2 {
        return None;
    }

    let entries: Vec<String> = rank(ratios)
        .into_iter()
        .enumerate()
        .map(|(i, (r, score))| format!("{}. {} ({:.1}/100)", i + 1, bundle.company_name(&r.company_id), score))
        .collect();
    Some(entries.join(", "))
}

fn money_ratio(numerator: Option<&FinancialRecord>, denominator: Option<&FinancialRecord>) -> Option<f64> {
    let (n, d) = (numerator?, denominator?);
    if n.unit != d.unit || n.currency != d.currency {
        return None;
    }
    safe_ratio(n.value, d.value)
}

fn safe_ratio(numerator: f64, denominator: f64) -> Option<f64> {
    (denominator > 0.0 && numerator.is_finite()).then(|| numerator / denominator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClassifiedQuery, Entities};
    use crate::store::tests::usd;

    fn production(company_id: &str, year: i32, quarter: u8, value: f64) -> FinancialRecord {
        FinancialRecord {
            unit: PRODUCTION_UNIT.to_string(),
            currency: None,
            ..usd(company_id, year, quarter, MetricType::ProductionVolume, value)
        }
    }

    fn shell_q1() -> Vec<FinancialRecord> {
        vec![
            usd("shell", 2024, 1, MetricType::Revenue, 72_478.0),
            usd("shell", 2024, 1, MetricType::NetIncome, 7_358.0),
            usd("shell", 2024, 1, MetricType::FreeCashFlow, 9_765.0),
            usd("shell", 2024, 1, MetricType::TotalDebt, 77_130.0),
            usd("shell", 2024, 1, MetricType::CashAndEquivalents, 40_306.0),
            production("shell", 2024, 1, 2_910.0),
        ]
    }

    fn bundle(records: Vec<FinancialRecord>, companies: &[(&str, &str)]) -> ContextBundle {
        let mut bundle = ContextBundle::empty(ClassifiedQuery {
            intent: Intent::MultiCompanyComparison,
            entities: Entities::default(),
        });
        bundle.records = records;
        bundle.company_names = companies.iter().map(|(id, name)| (id.to_string(), name.to_string())).collect();
        bundle
    }

    #[test]
    fn test_ratios_and_grades() {
        let records = shell_q1();
        let refs: Vec<&FinancialRecord> = records.iter().collect();
        let ratios = CompanyRatios::from_records("shell", Period::new(2024, 1).unwrap(), &refs);

        assert!((ratios.profit_margin.unwrap() - 10.152).abs() < 0.001);
        assert!((ratios.cash_conversion.unwrap() - 1.3271).abs() < 0.001);
        assert!((ratios.debt_to_cash.unwrap() - 1.9136).abs() < 0.001);
        assert!((ratios.revenue_per_boe.unwrap() - 272.95).abs() < 0.01);

        assert_eq!(ratios.profitability(), Some(Grade::Fair));
        assert_eq!(ratios.cash_generation(), Some(Grade::Excellent));
        assert_eq!(ratios.financial_strength(), Some(Grade::Fair));

        let described = ratios.describe();
        assert_eq!(described[0], "profit margin 10.15% (fair)");
        assert_eq!(described[2], "debt to cash 1.91x (fair)");
        assert_eq!(described[3], "revenue per BOE 272.95 USD");
    }

    #[test]
    fn test_zero_denominators_are_skipped() {
        let records = vec![
            usd("bp", 2024, 4, MetricType::Revenue, 0.0),
            usd("bp", 2024, 4, MetricType::NetIncome, -1_963.0),
            usd("bp", 2024, 4, MetricType::FreeCashFlow, 3_976.0),
            usd("bp", 2024, 4, MetricType::TotalDebt, 43_042.0),
            usd("bp", 2024, 4, MetricType::CashAndEquivalents, 0.0),
            production("bp", 2024, 4, 0.0),
        ];
        let refs: Vec<&FinancialRecord> = records.iter().collect();
        let ratios = CompanyRatios::from_records("bp", Period::new(2024, 4).unwrap(), &refs);

        assert!(ratios.is_empty());
        assert!(ratios.describe().is_empty());
        assert_eq!(ratios.score(), 0.0);
        assert!(ratios_for(&bundle(records, &[("bp", "BP")])).is_empty());
    }

    #[test]
    fn test_loss_making_quarter_keeps_margin() {
        let records = vec![
            usd("bp", 2024, 4, MetricType::Revenue, 46_117.0),
            usd("bp", 2024, 4, MetricType::NetIncome, -1_963.0),
            usd("bp", 2024, 4, MetricType::FreeCashFlow, 3_976.0),
        ];
        let refs: Vec<&FinancialRecord> = records.iter().collect();
        let ratios = CompanyRatios::from_records("bp", Period::new(2024, 4).unwrap(), &refs);

        assert!(ratios.profit_margin.unwrap() < 0.0);
        assert_eq!(ratios.profitability(), Some(Grade::Weak));
        assert!(ratios.cash_conversion.is_none());
    }

    #[test]
    fn test_latest_period_per_company_and_ranking() {
        let mut records = vec![
            usd("shell", 2023, 4, MetricType::Revenue, 80_000.0),
            usd("shell", 2023, 4, MetricType::NetIncome, 400.0),
        ];
        records.extend(shell_q1());
        records.extend([
            usd("bp", 2024, 1, MetricType::Revenue, 50_000.0),
            usd("bp", 2024, 1, MetricType::NetIncome, 1_000.0),
            usd("bp", 2024, 1, MetricType::FreeCashFlow, 500.0),
            usd("bp", 2024, 1, MetricType::TotalDebt, 10_000.0),
            usd("bp", 2024, 1, MetricType::CashAndEquivalents, 10_000.0),
        ]);
        let bundle = bundle(records, &[("bp", "BP"), ("shell", "Shell")]);

        let ratios = ratios_for(&bundle);
        assert_eq!(ratios.len(), 2);
        assert_eq!(ratios[0].company_id, "bp");
        assert_eq!(ratios[1].period, Period::new(2024, 1).unwrap());

        let ranked = rank(&ratios);
        assert_eq!(ranked[0].0.company_id, "shell");
        assert!(ranked[0].1 > ranked[1].1);
        assert!((ranked[1].1 - 39.0).abs() < 0.001);

        let line = ranking_line(&bundle, &ratios).unwrap();
        assert!(line.starts_with("1. Shell ("));
        assert!(line.ends_with("2. BP (39.0/100)"));
        assert!(ranking_line(&bundle, &ratios[..1]).is_none());
    }
}
