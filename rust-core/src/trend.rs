//! Cost trend: summed measure per start date and its least-squares slope.

use crate::models::{Measure, Record};
use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrendPoint {
    pub date: NaiveDate,
    pub value: f64,
}

/// Series ordered oldest to newest, plus the per-period change.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Trend {
    pub measure: Measure,
    pub points: Vec<TrendPoint>,
    /// Change in the measure per period; `None` below two points.
    pub slope: Option<f64>,
}

/// Sum `measure` per distinct `start_date`. Records without a date are left
/// out, as are missing values.
pub fn cost_trend(records: &[Record], measure: Measure) -> Trend {
    let mut by_date: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for record in records {
        let Some(date) = record.start_date else {
            continue;
        };
        *by_date.entry(date).or_insert(0.0) += measure.value(record).unwrap_or(0.0);
    }

    let points: Vec<TrendPoint> = by_date
        .into_iter()
        .map(|(date, value)| TrendPoint { date, value })
        .collect();
    let values: Vec<f64> = points.iter().map(|p| p.value).collect();
    Trend {
        measure,
        slope: (values.len() >= 2).then(|| linear_slope(&values)),
        points,
    }
}

/// Simple linear regression slope (Ordinary Least Squares) over evenly spaced points.
fn linear_slope(y: &[f64]) -> f64 {
    let n = y.len() as f64;
    if n < 2.0 {
        return 0.0;
    }
    let x_mean = (n - 1.0) / 2.0;
    let y_mean: f64 = y.iter().sum::<f64>() / n;
    let mut num = 0.0;
    let mut den = 0.0;
    for (i, &yi) in y.iter().enumerate() {
        let xi = i as f64;
        num += (xi - x_mean) * (yi - y_mean);
        den += (xi - x_mean) * (xi - x_mean);
    }
    if den.abs() < 1e-12 {
        return 0.0;
    }
    num / den
}
