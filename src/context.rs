//! Context assembly
//!
//! Picks the smallest record set that answers a classified query.
//! Output order is company (first mention), then period, then metric.

use crate::error::AssemblyError;
use crate::models::{ClassifiedQuery, Company, ContextBundle, FinancialRecord, Intent, MetricType, Period};
use crate::store::{FinancialRecordStore, PeriodRange, RecordQuery};
use std::collections::BTreeSet;
use tracing::debug;

/// Metrics charted when a trend question names none
const DEFAULT_TREND_METRICS: &[MetricType] = &[MetricType::Revenue, MetricType::NetIncome];

pub struct ContextAssembler {
    context_periods: usize,
}

impl ContextAssembler {
    pub fn new(context_periods: usize) -> Self {
        Self {
            context_periods: context_periods.max(1),
        }
    }

    pub async fn assemble(
        &self,
        classified: &ClassifiedQuery,
        store: &dyn FinancialRecordStore,
    ) -> Result<ContextBundle, AssemblyError> {
        if classified.intent == Intent::Unsupported {
            return Ok(ContextBundle::empty(classified.clone()));
        }

        let companies = resolve_companies(classified, store).await?;
        let mut per_company = self.fetch(classified, &companies, store).await?;

        // Trend questions keep the full series unless a window was asked for
        let window = match classified.intent {
            Intent::TrendAnalysis => classified.entities.trend_window,
            _ => Some(classified.entities.trend_window.unwrap_or(self.context_periods)),
        };

        if classified.intent == Intent::MultiCompanyComparison {
            let mut shared: Option<BTreeSet<Period>> = None;
            for records in &per_company {
                let periods: BTreeSet<Period> = records.iter().map(|r| r.period).collect();
                shared = Some(match shared {
                    Some(acc) => acc.intersection(&periods).copied().collect(),
                    None => periods,
                });
            }

            let shared = shared.unwrap_or_default();
            if shared.is_empty() {
                return Err(AssemblyError::NoOverlappingPeriods(
                    companies.iter().map(|c| c.name.clone()).collect(),
                ));
            }

            let keep: BTreeSet<Period> = shared.into_iter().rev().take(window.unwrap_or(self.context_periods)).collect();
            for records in per_company.iter_mut() {
                records.retain(|r| keep.contains(&r.period));
            }
        } else if let Some(window) = window {
            for records in per_company.iter_mut() {
                let keep = latest_periods(records, window);
                records.retain(|r| keep.contains(&r.period));
            }
        }

        let bundle = bundle_from(classified, &companies, per_company);
        debug!(
            intent = %bundle.intent,
            records = bundle.records.len(),
            "Context assembled"
        );
        Ok(bundle)
    }

    /// Each company's most recent reported period, aligned or not.
    /// Used when a comparison has no period in common.
    pub async fn assemble_latest_per_company(
        &self,
        classified: &ClassifiedQuery,
        store: &dyn FinancialRecordStore,
    ) -> Result<ContextBundle, AssemblyError> {
        let companies = resolve_companies(classified, store).await?;
        let mut per_company = self.fetch(classified, &companies, store).await?;

        for records in per_company.iter_mut() {
            let keep = latest_periods(records, 1);
            records.retain(|r| keep.contains(&r.period));
        }

        let mut bundle = bundle_from(classified, &companies, per_company);
        bundle.notes.push(
            "These companies have no reporting period in common; each company's most recent available period is shown instead.".to_string(),
        );
        Ok(bundle)
    }

    async fn fetch(
        &self,
        classified: &ClassifiedQuery,
        companies: &[Company],
        store: &dyn FinancialRecordStore,
    ) -> Result<Vec<Vec<FinancialRecord>>, AssemblyError> {
        let entities = &classified.entities;
        let metrics: &[MetricType] = if entities.metrics.is_empty() && classified.intent == Intent::TrendAnalysis {
            DEFAULT_TREND_METRICS
        } else {
            &entities.metrics
        };
        let query = RecordQuery {
            period_range: PeriodRange::spanning(&entities.periods),
            ..RecordQuery::metrics(metrics)
        };

        let mut per_company = Vec::with_capacity(companies.len());
        for company in companies {
            let mut records = store.list_records(&company.id, &query).await?;
            // The range may span quarters that were not asked for
            if !entities.periods.is_empty() {
                records.retain(|r| entities.periods.iter().any(|p| p.contains(&r.period)));
            }
            per_company.push(records);
        }
        Ok(per_company)
    }
}

impl Default for ContextAssembler {
    fn default() -> Self {
        Self::new(4)
    }
}

async fn resolve_companies(
    classified: &ClassifiedQuery,
    store: &dyn FinancialRecordStore,
) -> Result<Vec<Company>, AssemblyError> {
    let known = store.list_known_companies().await?;

    classified
        .entities
        .companies
        .iter()
        .map(|id| {
            known
                .iter()
                .find(|c| &c.id == id)
                .cloned()
                .ok_or_else(|| AssemblyError::UnknownCompany(id.clone()))
        })
        .collect()
}

fn latest_periods(records: &[FinancialRecord], n: usize) -> BTreeSet<Period> {
    let all: BTreeSet<Period> = records.iter().map(|r| r.period).collect();
    all.into_iter().rev().take(n).collect()
}

fn bundle_from(
    classified: &ClassifiedQuery,
    companies: &[Company],
    per_company: Vec<Vec<FinancialRecord>>,
) -> ContextBundle {
    ContextBundle {
        intent: classified.intent,
        entities: classified.entities.clone(),
        records: per_company.into_iter().flatten().collect(),
        company_names: companies.iter().map(|c| (c.id.clone(), c.name.clone())).collect(),
        notes: Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::QueryClassifier;
    use crate::models::Entities;
    use crate::error::StoreError;
    use crate::store::tests::{company, usd};
    use crate::store::InMemoryRecordStore;
    use std::sync::Mutex;

    /// Remembers every record query it serves
    struct RecordingStore {
        inner: InMemoryRecordStore,
        queries: Mutex<Vec<RecordQuery>>,
    }

    #[async_trait::async_trait]
    impl FinancialRecordStore for RecordingStore {
        async fn list_known_companies(&self) -> Result<Vec<Company>, StoreError> {
            self.inner.list_known_companies().await
        }

        async fn list_records(&self, company_id: &str, query: &RecordQuery) -> Result<Vec<FinancialRecord>, StoreError> {
            self.queries.lock().unwrap().push(query.clone());
            self.inner.list_records(company_id, query).await
        }
    }

    fn store() -> InMemoryRecordStore {
        let mut builder = InMemoryRecordStore::builder()
            .company(company("shell", "Shell", "SHEL", &[]))
            .company(company("bp", "BP", "BP", &[]))
            .company(company("chevron", "Chevron", "CVX", &[]));

        // Shell: 2023 Q3 .. 2024 Q4, BP: 2024 Q1 .. Q2, Chevron: 2022 only
        for (year, quarter) in [(2023, 3), (2023, 4), (2024, 1), (2024, 2), (2024, 3), (2024, 4)] {
            builder = builder
                .record(usd("shell", year, quarter, MetricType::Revenue, 70_000.0 + quarter as f64))
                .record(usd("shell", year, quarter, MetricType::NetIncome, 5_000.0 + quarter as f64));
        }
        for quarter in [1, 2] {
            builder = builder
                .record(usd("bp", 2024, quarter, MetricType::Revenue, 48_000.0 + quarter as f64))
                .record(usd("bp", 2024, quarter, MetricType::NetIncome, 1_000.0 + quarter as f64));
        }
        builder = builder.record(usd("chevron", 2022, 4, MetricType::Revenue, 60_000.0));

        builder.build().unwrap()
    }

    fn known() -> Vec<Company> {
        vec![
            company("shell", "Shell", "SHEL", &[]),
            company("bp", "BP", "BP", &[]),
            company("chevron", "Chevron", "CVX", &[]),
        ]
    }

    #[tokio::test]
    async fn test_single_company_takes_recent_periods() {
        let classified = QueryClassifier::classify("How is Shell doing?", &known());
        let bundle = ContextAssembler::new(4).assemble(&classified, &store()).await.unwrap();

        let periods: BTreeSet<Period> = bundle.records.iter().map(|r| r.period).collect();
        assert_eq!(periods.len(), 4);
        assert_eq!(periods.iter().next(), Period::new(2024, 1).as_ref());
        assert_eq!(bundle.records.len(), 8);
    }

    #[tokio::test]
    async fn test_single_company_returns_what_exists() {
        let classified = QueryClassifier::classify("How is BP doing?", &known());
        let bundle = ContextAssembler::new(4).assemble(&classified, &store()).await.unwrap();
        assert_eq!(bundle.records.len(), 4);
    }

    #[tokio::test]
    async fn test_comparison_stays_within_intersection() {
        let classified = QueryClassifier::classify("Compare Shell and BP", &known());
        let bundle = ContextAssembler::new(4).assemble(&classified, &store()).await.unwrap();

        let allowed = [Period::new(2024, 1).unwrap(), Period::new(2024, 2).unwrap()];
        assert!(!bundle.records.is_empty());
        assert!(bundle.records.iter().all(|r| allowed.contains(&r.period)));

        // company order follows first mention
        assert_eq!(bundle.records.first().unwrap().company_id, "shell");
        assert_eq!(bundle.records.last().unwrap().company_id, "bp");
    }

    #[tokio::test]
    async fn test_comparison_without_overlap_fails() {
        let classified = QueryClassifier::classify("Compare Shell and Chevron", &known());
        let result = ContextAssembler::new(4).assemble(&classified, &store()).await;
        assert!(matches!(result, Err(AssemblyError::NoOverlappingPeriods(_))));

        let partial = ContextAssembler::new(4)
            .assemble_latest_per_company(&classified, &store())
            .await
            .unwrap();
        assert_eq!(partial.notes.len(), 1);
        assert!(partial.records.iter().any(|r| r.company_id == "chevron"));
        assert!(partial
            .records
            .iter()
            .filter(|r| r.company_id == "shell")
            .all(|r| r.period == Period::new(2024, 4).unwrap()));
    }

    #[tokio::test]
    async fn test_trend_returns_full_series_of_metric() {
        let classified = QueryClassifier::classify("Shell revenue trend", &known());
        let bundle = ContextAssembler::new(4).assemble(&classified, &store()).await.unwrap();

        assert_eq!(bundle.records.len(), 6);
        assert!(bundle.records.iter().all(|r| r.metric_type == MetricType::Revenue));
        assert!(bundle.records.windows(2).all(|w| w[0].period < w[1].period));

        let windowed = QueryClassifier::classify("Shell revenue over the last 2 quarters", &known());
        let bundle = ContextAssembler::new(4).assemble(&windowed, &store()).await.unwrap();
        assert_eq!(bundle.records.len(), 2);
    }

    #[tokio::test]
    async fn test_unknown_company_is_reported() {
        let classified = ClassifiedQuery {
            intent: Intent::SingleCompanyPerformance,
            entities: Entities {
                companies: vec!["totalenergies".to_string()],
                ..Entities::default()
            },
        };
        let result = ContextAssembler::new(4).assemble(&classified, &store()).await;
        assert!(matches!(result, Err(AssemblyError::UnknownCompany(id)) if id == "totalenergies"));
    }

    #[tokio::test]
    async fn test_unsupported_yields_empty_bundle() {
        let classified = QueryClassifier::classify("What's the weather today?", &known());
        let bundle = ContextAssembler::new(4).assemble(&classified, &store()).await.unwrap();
        assert!(bundle.is_empty());
    }

    #[tokio::test]
    async fn test_single_quarter_comparison_is_exact() {
        let sample = InMemoryRecordStore::sample().unwrap();
        let known = sample.list_known_companies().await.unwrap();
        let classified = QueryClassifier::classify("Compare Shell and BP revenue for Q1 2024", &known);
        let bundle = ContextAssembler::default().assemble(&classified, &sample).await.unwrap();

        let q1 = Period::new(2024, 1).unwrap();
        let ids: Vec<&str> = bundle.records.iter().map(|r| r.company_id.as_str()).collect();
        assert_eq!(ids, vec!["shell", "bp"]);
        assert!(bundle
            .records
            .iter()
            .all(|r| r.metric_type == MetricType::Revenue && r.period == q1));
        assert_eq!(bundle.records[0].value, 72_478.0);
        assert_eq!(bundle.records[1].value, 49_883.0);
    }

    #[tokio::test]
    async fn test_named_periods_narrow_the_store_query() {
        let recording = RecordingStore {
            inner: store(),
            queries: Mutex::new(Vec::new()),
        };

        let classified = QueryClassifier::classify("How did Shell do in Q3 2023 and Q2 2024?", &known());
        let bundle = ContextAssembler::new(4).assemble(&classified, &recording).await.unwrap();

        let queries = recording.queries.lock().unwrap().clone();
        assert_eq!(queries.len(), 1);
        assert_eq!(
            queries[0].period_range,
            Some(PeriodRange {
                from: Period::new(2023, 3),
                to: Period::new(2024, 2),
            })
        );

        // quarters inside the range but not named are still dropped
        let periods: BTreeSet<Period> = bundle.records.iter().map(|r| r.period).collect();
        assert_eq!(
            periods.into_iter().collect::<Vec<_>>(),
            vec![Period::new(2023, 3).unwrap(), Period::new(2024, 2).unwrap()]
        );

        recording.queries.lock().unwrap().clear();
        let open = QueryClassifier::classify("How is Shell doing?", &known());
        ContextAssembler::new(4).assemble(&open, &recording).await.unwrap();
        assert!(recording.queries.lock().unwrap()[0].period_range.is_none());
    }
}
