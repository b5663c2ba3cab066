//! Postgres-backed record store
//!
//! Read-only. Expects the tables below to exist; creating and loading
//! them is done by the data pipeline, never from here.
//!
//! ```sql
//! companies(id TEXT PRIMARY KEY, name TEXT, ticker TEXT, aliases TEXT[], sector_tags TEXT[])
//! financial_records(company_id TEXT, year INT, quarter INT, metric_type TEXT,
//!                   value DOUBLE PRECISION, unit TEXT, currency TEXT NULL,
//!                   PRIMARY KEY (company_id, year, quarter, metric_type))
//! ```

use super::{FinancialRecordStore, RecordQuery};
use crate::error::StoreError;
use crate::models::{Company, FinancialRecord, MetricType, Period};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{info, warn};

pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Builds a lazily-connected pool; nothing touches the network until the first read.
    pub fn connect_lazy(url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new().max_connections(5).connect_lazy(url)?;
        info!("Financial record store backend: postgres");
        Ok(Self { pool })
    }

    fn record_from_row(row: &PgRow) -> Result<FinancialRecord, StoreError> {
        let year: i32 = row.try_get("year")?;
        let quarter: i32 = row.try_get("quarter")?;
        let metric: String = row.try_get("metric_type")?;

        let period = u8::try_from(quarter)
            .ok()
            .and_then(|q| Period::new(year, q))
            .ok_or_else(|| StoreError::InvalidData(format!("invalid quarter {} for {}", quarter, year)))?;

        let metric_type = MetricType::parse(&metric)
            .ok_or_else(|| StoreError::InvalidData(format!("unknown metric type '{}'", metric)))?;

        Ok(FinancialRecord {
            company_id: row.try_get("company_id")?,
            period,
            metric_type,
            value: row.try_get("value")?,
            unit: row.try_get("unit")?,
            currency: row.try_get("currency")?,
        })
    }
}

#[async_trait::async_trait]
impl FinancialRecordStore for PgRecordStore {
    async fn list_known_companies(&self) -> Result<Vec<Company>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, name, ticker, aliases, sector_tags
            FROM companies
            ORDER BY name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| -> Result<Company, StoreError> {
                Ok(Company {
                    id: row.try_get("id")?,
                    name: row.try_get("name")?,
                    ticker: row.try_get::<Option<String>, _>("ticker")?.unwrap_or_default(),
                    aliases: row.try_get::<Option<Vec<String>>, _>("aliases")?.unwrap_or_default(),
                    sector_tags: row
                        .try_get::<Option<Vec<String>>, _>("sector_tags")?
                        .unwrap_or_default(),
                })
            })
            .collect()
    }

    async fn list_records(
        &self,
        company_id: &str,
        query: &RecordQuery,
    ) -> Result<Vec<FinancialRecord>, StoreError> {
        let range = query.period_range.unwrap_or_default();
        let metrics: Option<Vec<String>> = query
            .metric_types
            .as_ref()
            .map(|m| m.iter().map(|metric| metric.as_str().to_string()).collect());

        let rows = sqlx::query(
            r#"
            SELECT company_id, year, quarter, metric_type, value, unit, currency
            FROM financial_records
            WHERE company_id = $1
              AND ($2::INT IS NULL OR year * 4 + quarter - 1 >= $2)
              AND ($3::INT IS NULL OR year * 4 + quarter - 1 <= $3)
              AND ($4::TEXT[] IS NULL OR metric_type = ANY($4))
            ORDER BY year ASC, quarter ASC
            "#,
        )
        .bind(company_id)
        .bind(range.from.map(|p| p.ordinal()))
        .bind(range.to.map(|p| p.ordinal()))
        .bind(metrics)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            match Self::record_from_row(row) {
                Ok(record) => records.push(record),
                Err(e) => warn!(company_id, "Skipping malformed financial record: {}", e),
            }
        }

        // Metric order follows the enum, not the text column
        records.sort_by(|a, b| (a.period, a.metric_type).cmp(&(b.period, b.metric_type)));
        Ok(records)
    }
}
