//! Z-score anomaly detection against each group's own history.

use crate::models::{GroupBy, Measure, Record};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Serialize)]
pub struct Anomaly {
    pub group: String,
    pub value: f64,
    pub group_mean: f64,
    pub group_std: f64,
    pub group_size: usize,
    pub z_score: f64,
    pub record: Record,
}

/// Result of one detector run. An empty `anomalies` list means the run
/// happened and nothing qualified.
#[derive(Debug, Clone, Serialize)]
pub struct AnomalyReport {
    pub group_by: GroupBy,
    pub measure: Measure,
    /// Groups with at least two values and non-zero spread.
    pub groups_scored: usize,
    pub anomalies: Vec<Anomaly>,
}

impl AnomalyReport {
    pub fn is_empty(&self) -> bool {
        self.anomalies.is_empty()
    }
}

#[derive(Debug, Clone, Copy)]
struct GroupStats {
    mean: f64,
    std: f64,
    len: usize,
}

/// Score every record by `(value - group mean) / group std` and return the
/// `n` highest, largest first (ties keep record order).
///
/// Groups with fewer than two values are skipped, as are groups whose sample
/// standard deviation is exactly zero. Non-finite scores are dropped.
pub fn detect_anomalies(
    records: &[Record],
    group_by: GroupBy,
    measure: Measure,
    n: usize,
) -> AnomalyReport {
    let mut values: HashMap<&str, Vec<f64>> = HashMap::new();
    for record in records {
        if let (Some(key), Some(v)) = (group_by.key(record), measure.value(record)) {
            values.entry(key).or_default().push(v);
        }
    }

    let total_groups = values.len();
    let stats: HashMap<&str, GroupStats> = values
        .into_iter()
        .filter(|(_, vals)| vals.len() >= 2)
        .map(|(key, vals)| {
            let (mean, std) = mean_std(&vals);
            (key, GroupStats { mean, std, len: vals.len() })
        })
        .collect();
    let sized_groups = stats.len();
    let groups_scored = stats.values().filter(|s| s.std != 0.0).count();

    let mut anomalies: Vec<Anomaly> = records
        .iter()
        .filter_map(|record| {
            let key = group_by.key(record)?;
            let value = measure.value(record)?;
            let s = stats.get(key)?;
            if s.std == 0.0 {
                return None;
            }
            let z_score = (value - s.mean) / s.std;
            z_score.is_finite().then(|| Anomaly {
                group: key.to_string(),
                value,
                group_mean: s.mean,
                group_std: s.std,
                group_size: s.len,
                z_score,
                record: record.clone(),
            })
        })
        .collect();

    anomalies.sort_by(|a, b| b.z_score.partial_cmp(&a.z_score).unwrap_or(Ordering::Equal));
    anomalies.truncate(n);

    debug!(
        ?group_by,
        ?measure,
        groups = total_groups,
        too_small = total_groups - sized_groups,
        constant = sized_groups - groups_scored,
        returned = anomalies.len(),
        "scored anomalies"
    );

    AnomalyReport {
        group_by,
        measure,
        groups_scored,
        anomalies,
    }
}

/// Mean and sample (n - 1) standard deviation. Callers guarantee `vals.len() >= 2`.
fn mean_std(vals: &[f64]) -> (f64, f64) {
    let n = vals.len() as f64;
    let mean = vals.iter().sum::<f64>() / n;
    let sq_diff: f64 = vals.iter().map(|v| (v - mean).powi(2)).sum();
    (mean, (sq_diff / (n - 1.0)).sqrt())
}
