//! Every derived table for one filter selection, recomputed from scratch.

use crate::aggregate::{
    aggregate, breakdown, top_n, top_n_with_other, Breakdown, GroupAggregate, Metrics, Statistic,
};
use crate::anomaly::{detect_anomalies, AnomalyReport};
use crate::filter::{filter_records, DateRange, FilterConfig, FilterOptions};
use crate::models::{GroupBy, Measure, Record, RecordStore, Schema};
use crate::quota::{analyze_quota, QuotaAnalysis};
use crate::settings::AnalysisSettings;
use crate::trend::{cost_trend, Trend};
use serde::Serialize;
use tracing::info;

/// Cost and usage per label.
#[derive(Debug, Clone, Serialize)]
pub struct LabelAnalysis {
    /// Every label by summed cost, largest first.
    pub cost_by_label: Vec<GroupAggregate>,
    pub top_labels: Vec<GroupAggregate>,
    /// Top labels plus an "Other" share.
    pub label_shares: Vec<GroupAggregate>,
    /// Absent when the export has no usage column.
    pub usage_by_label: Option<Vec<GroupAggregate>>,
}

impl LabelAnalysis {
    pub fn compute(records: &[Record], schema: &Schema, analysis: &AnalysisSettings) -> Self {
        let cost_by_label = aggregate(records, GroupBy::Label, Measure::Cost, Statistic::Sum);
        Self {
            top_labels: top_n(cost_by_label.clone(), analysis.top_groups),
            label_shares: top_n_with_other(cost_by_label.clone(), analysis.label_slices),
            usage_by_label: schema
                .usage
                .then(|| aggregate(records, GroupBy::Label, Measure::Usage, Statistic::Sum)),
            cost_by_label,
        }
    }
}

/// Run the detector when the grouping and measure columns exist in this
/// export; `None` means it was not run.
pub fn anomaly_report(
    records: &[Record],
    schema: &Schema,
    group_by: GroupBy,
    measure: Measure,
    n: usize,
) -> Option<AnomalyReport> {
    (schema.has_group(group_by) && schema.has_measure(measure))
        .then(|| detect_anomalies(records, group_by, measure, n))
}

#[derive(Debug, Clone, Serialize)]
pub struct Dashboard {
    /// Resolved date bounds; `None` when the export has no usable dates.
    pub period: Option<DateRange>,
    pub schema: Schema,
    pub options: FilterOptions,
    pub metrics: Metrics,
    pub top_subaccounts: Vec<GroupAggregate>,
    pub top_services: Vec<GroupAggregate>,
    pub anomalies: Option<AnomalyReport>,
    pub trend: Trend,
    pub subaccount_services: Vec<Breakdown>,
    /// Computed over the whole export, not the filtered view.
    pub labels: Option<LabelAnalysis>,
    pub quota: Option<QuotaAnalysis>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub records: Option<Vec<Record>>,
}

impl Dashboard {
    pub fn build(
        store: &RecordStore,
        filter: &FilterConfig,
        analysis: &AnalysisSettings,
        include_records: bool,
    ) -> Self {
        let schema = store.schema();
        let view = filter_records(store, filter);
        let sum_by = |group_by: GroupBy| {
            top_n(
                aggregate(&view, group_by, Measure::Cost, Statistic::Sum),
                analysis.top_groups,
            )
        };

        let dashboard = Self {
            period: filter.period.resolve(store.max_start_date()),
            schema: schema.clone(),
            options: FilterOptions::build(store, filter),
            metrics: Metrics::compute(&view, schema),
            top_subaccounts: sum_by(GroupBy::SubaccountName),
            top_services: sum_by(GroupBy::ServiceName),
            anomalies: anomaly_report(
                &view,
                schema,
                GroupBy::ServiceName,
                Measure::Cost,
                analysis.anomaly_count,
            ),
            trend: cost_trend(&view, Measure::Cost),
            subaccount_services: breakdown(
                &view,
                GroupBy::SubaccountName,
                GroupBy::ServiceName,
                Measure::Cost,
                analysis.breakdown_groups,
            ),
            labels: schema
                .labels
                .then(|| LabelAnalysis::compute(store.records(), schema, analysis)),
            quota: (!store.quota().is_empty()).then(|| analyze_quota(store.quota())),
            records: include_records.then(|| view.clone()),
        };

        info!(
            records = dashboard.metrics.record_count,
            total_cost = dashboard.metrics.total_cost,
            anomalies = dashboard.anomalies.as_ref().map_or(0, |a| a.anomalies.len()),
            "built dashboard"
        );
        dashboard
    }
}
