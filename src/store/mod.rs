//! Read-only financial record store
//!
//! The core only ever reads from here. Records are written by the
//! data-management side (database loaders, fixtures).

use crate::error::StoreError;
use crate::models::{Company, FinancialRecord, MetricType, Period, PeriodRef};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

pub mod postgres;
pub mod sample;

pub use postgres::PgRecordStore;

/// Inclusive period bounds; either side may be open
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PeriodRange {
    pub from: Option<Period>,
    pub to: Option<Period>,
}

impl PeriodRange {
    pub fn contains(&self, period: &Period) -> bool {
        self.from.map_or(true, |from| *period >= from) && self.to.map_or(true, |to| *period <= to)
    }

    /// Smallest closed range covering every reference; `None` when there are none
    pub fn spanning(refs: &[PeriodRef]) -> Option<Self> {
        let from = refs.iter().map(|r| r.bounds().0).min()?;
        let to = refs.iter().map(|r| r.bounds().1).max()?;
        Some(Self {
            from: Some(from),
            to: Some(to),
        })
    }
}

/// Optional filters for `list_records`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordQuery {
    pub period_range: Option<PeriodRange>,
    pub metric_types: Option<Vec<MetricType>>,
}

impl RecordQuery {
    pub fn metrics(metric_types: &[MetricType]) -> Self {
        Self {
            period_range: None,
            metric_types: (!metric_types.is_empty()).then(|| metric_types.to_vec()),
        }
    }

    fn matches(&self, record: &FinancialRecord) -> bool {
        self.period_range
            .as_ref()
            .map_or(true, |range| range.contains(&record.period))
            && self
                .metric_types
                .as_ref()
                .map_or(true, |metrics| metrics.contains(&record.metric_type))
    }
}

/// Read contract between the pipeline and whatever holds the figures
#[async_trait::async_trait]
pub trait FinancialRecordStore: Send + Sync {
    async fn list_known_companies(&self) -> Result<Vec<Company>, StoreError>;

    /// Records for one company ordered by period, then metric.
    /// Unknown company ids yield an empty list.
    async fn list_records(
        &self,
        company_id: &str,
        query: &RecordQuery,
    ) -> Result<Vec<FinancialRecord>, StoreError>;
}

type RecordKey = (String, Period, MetricType);

/// In-memory store for development, tests and the bundled demo data
#[derive(Debug, Clone, Default)]
pub struct InMemoryRecordStore {
    companies: Vec<Company>,
    records: BTreeMap<RecordKey, FinancialRecord>,
}

impl InMemoryRecordStore {
    pub fn builder() -> InMemoryRecordStoreBuilder {
        InMemoryRecordStoreBuilder::default()
    }

    /// The four oil majors with four quarters of 2024 figures
    pub fn sample() -> Result<Self, StoreError> {
        sample::build()
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}

#[derive(Debug, Default)]
pub struct InMemoryRecordStoreBuilder {
    companies: Vec<Company>,
    records: Vec<FinancialRecord>,
}

impl InMemoryRecordStoreBuilder {
    pub fn company(mut self, company: Company) -> Self {
        self.companies.push(company);
        self
    }

    pub fn record(mut self, record: FinancialRecord) -> Self {
        self.records.push(record);
        self
    }

    pub fn records(mut self, records: impl IntoIterator<Item = FinancialRecord>) -> Self {
        self.records.extend(records);
        self
    }

    /// Fails on a second record for the same (company, period, metric)
    /// or on a record whose company was never registered.
    pub fn build(self) -> Result<InMemoryRecordStore, StoreError> {
        let mut records = BTreeMap::new();

        for record in self.records {
            if !self.companies.iter().any(|c| c.id == record.company_id) {
                return Err(StoreError::InvalidData(format!(
                    "record references unregistered company '{}'",
                    record.company_id
                )));
            }

            let key = (record.company_id.clone(), record.period, record.metric_type);
            if records.contains_key(&key) {
                return Err(StoreError::DuplicateRecord {
                    company_id: record.company_id,
                    period: record.period.to_string(),
                    metric: record.metric_type.as_str().to_string(),
                });
            }
            records.insert(key, record);
        }

        Ok(InMemoryRecordStore {
            companies: self.companies,
            records,
        })
    }
}

#[async_trait::async_trait]
impl FinancialRecordStore for InMemoryRecordStore {
    async fn list_known_companies(&self) -> Result<Vec<Company>, StoreError> {
        Ok(self.companies.clone())
    }

    async fn list_records(
        &self,
        company_id: &str,
        query: &RecordQuery,
    ) -> Result<Vec<FinancialRecord>, StoreError> {
        // BTreeMap key order is (company, period, metric)
        Ok(self
            .records
            .iter()
            .filter(|((id, _, _), record)| id == company_id && query.matches(record))
            .map(|(_, record)| record.clone())
            .collect())
    }
}

/// Postgres when a database URL is configured, the bundled sample data otherwise
pub fn open_store(database_url: Option<&str>) -> Result<Arc<dyn FinancialRecordStore>, StoreError> {
    match database_url {
        Some(url) => Ok(Arc::new(PgRecordStore::connect_lazy(url)?)),
        None => {
            info!("Financial record store backend: in-memory sample data");
            Ok(Arc::new(InMemoryRecordStore::sample()?))
        }
    }
}
