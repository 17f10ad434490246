//! Quota consumption series from the first sheet of the export.

use crate::ingest::parse_date_text;
use crate::models::{QuotaRow, QuotaSample};
use serde::Serialize;
use tracing::debug;

/// Usage percentage at which a period counts as over quota.
pub const QUOTA_LIMIT_PERCENT: f64 = 100.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct QuotaAnalysis {
    /// Parseable rows, oldest first.
    pub series: Vec<QuotaSample>,
    pub over_quota: Vec<QuotaSample>,
    pub any_over_quota: bool,
}

pub fn is_over_quota(usage_percent: f64) -> bool {
    usage_percent >= QUOTA_LIMIT_PERCENT
}

/// Parse raw quota rows. Rows whose date or percentage do not parse are
/// dropped; rows on the same date keep their sheet order.
pub fn analyze_quota(rows: &[QuotaRow]) -> QuotaAnalysis {
    let mut series: Vec<QuotaSample> = rows
        .iter()
        .filter_map(|row| {
            let date = parse_date_text(&row.date)?;
            let usage_percent = row
                .percent
                .trim()
                .parse::<f64>()
                .ok()
                .filter(|p| !p.is_nan())?;
            Some(QuotaSample {
                date,
                usage_percent,
                quota_type: row.quota_type.clone(),
                over_quota: is_over_quota(usage_percent),
            })
        })
        .collect();
    series.sort_by_key(|s| s.date);

    let over_quota: Vec<QuotaSample> = series.iter().filter(|s| s.over_quota).cloned().collect();
    debug!(
        rows = rows.len(),
        parsed = series.len(),
        over = over_quota.len(),
        "analyzed quota"
    );
    QuotaAnalysis {
        any_over_quota: !over_quota.is_empty(),
        series,
        over_quota,
    }
}
