//! Deterministic answer used when no backend could respond

use crate::analysis;
use crate::models::ContextBundle;

const LIMITED_HEADER: &str = "Live analysis is unavailable right now, so here are the stored figures:";
const LIMITED_EMPTY: &str =
    "Live analysis is unavailable right now and no stored figures match this question. Please try again shortly.";

/// One sentence per record, in bundle order, then the derived ratios for
/// performance and comparison questions. Same bundle, same text.
pub fn degraded_answer(bundle: &ContextBundle) -> String {
    if bundle.records.is_empty() {
        return LIMITED_EMPTY.to_string();
    }

    let mut lines = Vec::with_capacity(bundle.records.len() + bundle.notes.len() + 1);
    lines.push(LIMITED_HEADER.to_string());

    for record in &bundle.records {
        lines.push(format!(
            "{} for {} in {} was {}.",
            record.metric_type.label(),
            bundle.company_name(&record.company_id),
            record.period,
            record.display_value()
        ));
    }

    if analysis::applies_to(bundle.intent) {
        let ratios = analysis::ratios_for(bundle);
        for company in &ratios {
            lines.push(format!(
                "Derived for {} in {}: {}.",
                bundle.company_name(&company.company_id),
                company.period,
                company.describe().join(", ")
            ));
        }
        if let Some(ranking) = analysis::ranking_line(bundle, &ratios) {
            lines.push(format!("Composite ranking: {}.", ranking));
        }
    }

    lines.extend(bundle.notes.iter().map(|note| format!("Note: {}", note)));
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ClassifiedQuery, Entities, Intent, MetricType};
    use crate::store::tests::usd;

    #[test]
    fn test_one_sentence_per_record() {
        let mut bundle = ContextBundle::empty(ClassifiedQuery {
            intent: Intent::SingleCompanyPerformance,
            entities: Entities::default(),
        });
        bundle.company_names = vec![("shell".into(), "Shell".into())];
        bundle.records = vec![
            usd("shell", 2024, 1, MetricType::Revenue, 72_478.0),
            usd("shell", 2024, 1, MetricType::NetIncome, 7_358.0),
        ];

        let text = degraded_answer(&bundle);
        assert!(text.starts_with(LIMITED_HEADER));
        assert!(text.contains("Revenue for Shell in Q1 2024 was 72,478.00 million USD."));
        assert!(text.contains("Net Income for Shell in Q1 2024 was 7,358.00 million USD."));
        assert!(text.ends_with("Derived for Shell in Q1 2024: profit margin 10.15% (fair)."));
        assert_eq!(text, degraded_answer(&bundle));
    }

    #[test]
    fn test_comparison_ranks_companies() {
        let mut bundle = ContextBundle::empty(ClassifiedQuery {
            intent: Intent::MultiCompanyComparison,
            entities: Entities::default(),
        });
        bundle.company_names = vec![("shell".into(), "Shell".into()), ("bp".into(), "BP".into())];
        bundle.records = vec![
            usd("shell", 2024, 1, MetricType::Revenue, 72_478.0),
            usd("shell", 2024, 1, MetricType::NetIncome, 7_358.0),
            usd("bp", 2024, 1, MetricType::Revenue, 49_883.0),
            usd("bp", 2024, 1, MetricType::NetIncome, 0.0),
        ];

        let text = degraded_answer(&bundle);
        assert!(text.contains("Derived for BP in Q1 2024: profit margin 0.00% (weak)."));
        assert!(text.contains("Composite ranking: 1. Shell (20.3/100), 2. BP (0.0/100)."));
    }

    #[test]
    fn test_trend_has_no_ratios() {
        let mut bundle = ContextBundle::empty(ClassifiedQuery {
            intent: Intent::TrendAnalysis,
            entities: Entities::default(),
        });
        bundle.company_names = vec![("shell".into(), "Shell".into())];
        bundle.records = vec![
            usd("shell", 2024, 1, MetricType::Revenue, 72_478.0),
            usd("shell", 2024, 1, MetricType::NetIncome, 7_358.0),
        ];
        assert!(!degraded_answer(&bundle).contains("Derived"));
    }

    #[test]
    fn test_empty_bundle() {
        let bundle = ContextBundle::empty(ClassifiedQuery {
            intent: Intent::TrendAnalysis,
            entities: Entities::default(),
        });
        assert_eq!(degraded_answer(&bundle), LIMITED_EMPTY);
    }
}
