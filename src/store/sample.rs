//! Fixed demo dataset for running without a database.
//!
//! Figures are illustrative quarterly values in the range the majors
//! report, not an authoritative source.

use super::InMemoryRecordStore;
use crate::error::StoreError;
use crate::models::{Company, FinancialRecord, MetricType, Period};

const YEAR: i32 = 2024;

/// (id, name, ticker, aliases)
const COMPANIES: &[(&str, &str, &str, &[&str])] = &[
    ("shell", "Shell", "SHEL", &["royal dutch shell", "shell plc"]),
    ("bp", "BP", "BP", &["british petroleum", "bp plc"]),
    ("exxonmobil", "ExxonMobil", "XOM", &["exxon", "exxon mobil"]),
    ("chevron", "Chevron", "CVX", &[]),
];

/// Per quarter: revenue, net income, operating income, free cash flow,
/// total debt, cash (all USD million), production (thousand BOE/day)
const FIGURES: &[(&str, [[f64; 7]; 4])] = &[
    (
        "shell",
        [
            [72_478.0, 7_358.0, 10_105.0, 9_765.0, 77_130.0, 40_306.0, 2_910.0],
            [74_463.0, 3_517.0, 8_411.0, 8_561.0, 76_183.0, 38_272.0, 2_860.0],
            [71_089.0, 4_291.0, 8_975.0, 10_180.0, 75_177.0, 42_291.0, 2_799.0],
            [66_236.0, 957.0, 5_713.0, 8_663.0, 72_896.0, 39_110.0, 2_836.0],
        ],
    ),
    (
        "bp",
        [
            [49_883.0, 2_263.0, 4_988.0, 2_031.0, 44_589.0, 28_282.0, 2_367.0],
            [48_255.0, 31.0, 2_279.0, 2_946.0, 45_340.0, 32_294.0, 2_335.0],
            [48_228.0, 206.0, 2_101.0, 2_624.0, 44_317.0, 33_307.0, 2_385.0],
            [46_117.0, -1_963.0, 639.0, 3_976.0, 43_042.0, 36_649.0, 2_353.0],
        ],
    ),
    (
        "exxonmobil",
        [
            [83_083.0, 8_220.0, 11_132.0, 10_049.0, 42_019.0, 33_313.0, 3_784.0],
            [93_059.0, 9_240.0, 12_451.0, 10_600.0, 43_290.0, 26_460.0, 4_363.0],
            [90_016.0, 8_610.0, 11_870.0, 11_281.0, 41_718.0, 27_176.0, 4_578.0],
            [83_432.0, 7_610.0, 10_019.0, 3_670.0, 41_710.0, 23_187.0, 4_614.0],
        ],
    ),
    (
        "chevron",
        [
            [48_720.0, 5_501.0, 7_313.0, 2_761.0, 21_822.0, 6_278.0, 3_346.0],
            [51_178.0, 4_434.0, 6_266.0, 4_958.0, 22_435.0, 4_016.0, 3_296.0],
            [50_668.0, 4_487.0, 6_179.0, 5_567.0, 25_284.0, 4_651.0, 3_364.0],
            [52_228.0, 3_239.0, 4_550.0, 4_434.0, 24_541.0, 6_781.0, 3_352.0],
        ],
    ),
];

pub(super) fn build() -> Result<InMemoryRecordStore, StoreError> {
    let mut builder = InMemoryRecordStore::builder();

    for (id, name, ticker, aliases) in COMPANIES {
        builder = builder.company(Company {
            id: id.to_string(),
            name: name.to_string(),
            ticker: ticker.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
            sector_tags: vec!["oil & gas".to_string(), "integrated".to_string()],
        });
    }

    for (company_id, quarters) in FIGURES {
        for (q_index, values) in quarters.iter().enumerate() {
            let period = Period {
                year: YEAR,
                quarter: q_index as u8 + 1,
            };
            for (metric, value) in MetricType::ALL.iter().zip(values.iter()) {
                builder = builder.record(sample_record(company_id, period, *metric, *value));
            }
        }
    }

    builder.build()
}

fn sample_record(company_id: &str, period: Period, metric: MetricType, value: f64) -> FinancialRecord {
    let (unit, currency) = match metric {
        MetricType::ProductionVolume => ("thousand BOE/day", None),
        _ => ("million", Some("USD".to_string())),
    };

    FinancialRecord {
        company_id: company_id.to_string(),
        period,
        metric_type: metric,
        value,
        unit: unit.to_string(),
        currency,
    }
}
