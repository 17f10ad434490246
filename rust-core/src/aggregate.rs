//! Grouped aggregates over a filtered view.

use crate::models::{GroupBy, Measure, Record, Schema};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Name of the synthetic group holding everything past the top N.
pub const OTHER: &str = "Other";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Statistic {
    #[default]
    Sum,
    Mean,
    Median,
}

impl Statistic {
    pub fn apply(&self, values: &[f64]) -> f64 {
        match self {
            Statistic::Sum => values.iter().sum(),
            Statistic::Mean => mean(values),
            Statistic::Median => median(values),
        }
    }
}

/// Arithmetic mean; 0 for no values.
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Median, averaging the two middle values for even lengths; 0 for no values.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupAggregate {
    pub group: String,
    pub value: f64,
    /// Records in the group with a value for the measure.
    pub count: usize,
}

/// One row per distinct group value, largest aggregate first. Equal
/// aggregates keep ascending group-name order. Records without a group value
/// are left out; records without a measure value count toward nothing but
/// still make their group appear.
pub fn aggregate(
    records: &[Record],
    group_by: GroupBy,
    measure: Measure,
    statistic: Statistic,
) -> Vec<GroupAggregate> {
    let mut groups: BTreeMap<&str, Vec<f64>> = BTreeMap::new();
    for record in records {
        let Some(key) = group_by.key(record) else {
            continue;
        };
        let values = groups.entry(key).or_default();
        if let Some(v) = measure.value(record) {
            values.push(v);
        }
    }

    let mut rows: Vec<GroupAggregate> = groups
        .into_iter()
        .map(|(group, values)| GroupAggregate {
            group: group.to_string(),
            value: statistic.apply(&values),
            count: values.len(),
        })
        .collect();
    sort_descending(&mut rows);
    rows
}

fn sort_descending(rows: &mut [GroupAggregate]) {
    rows.sort_by(|a, b| b.value.partial_cmp(&a.value).unwrap_or(Ordering::Equal));
}

/// First `n` rows of an already sorted aggregation.
pub fn top_n(mut rows: Vec<GroupAggregate>, n: usize) -> Vec<GroupAggregate> {
    rows.truncate(n);
    rows
}

/// First `n` rows of a sorted sum aggregation, plus an [`OTHER`] row summing
/// the rest. With `n` or fewer rows nothing is added.
pub fn top_n_with_other(mut rows: Vec<GroupAggregate>, n: usize) -> Vec<GroupAggregate> {
    if rows.len() <= n {
        return rows;
    }
    let rest = rows.split_off(n);
    rows.push(GroupAggregate {
        group: OTHER.to_string(),
        value: rest.iter().map(|r| r.value).sum(),
        count: rest.iter().map(|r| r.count).sum(),
    });
    rows
}

/// Headline numbers for a filtered view.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metrics {
    pub record_count: usize,
    pub total_cost: f64,
    /// Mean over records with a positive cost.
    pub avg_cost_nonzero: f64,
    pub median_cost: f64,
    /// Absent when the export has no usage column.
    pub total_usage: Option<f64>,
}

impl Metrics {
    pub fn compute(records: &[Record], schema: &Schema) -> Self {
        let costs: Vec<f64> = records.iter().filter_map(|r| r.cost).collect();
        let nonzero: Vec<f64> = costs.iter().copied().filter(|c| *c > 0.0).collect();
        Self {
            record_count: records.len(),
            total_cost: costs.iter().sum(),
            avg_cost_nonzero: mean(&nonzero),
            median_cost: median(&costs),
            total_usage: schema
                .usage
                .then(|| records.iter().filter_map(|r| r.usage).sum()),
        }
    }
}

/// An outer group with its inner-group split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Breakdown {
    pub group: String,
    pub total: f64,
    pub children: Vec<GroupAggregate>,
}

/// Top `n` `outer` groups by summed `measure`, each split by `inner`.
pub fn breakdown(
    records: &[Record],
    outer: GroupBy,
    inner: GroupBy,
    measure: Measure,
    n: usize,
) -> Vec<Breakdown> {
    top_n(aggregate(records, outer, measure, Statistic::Sum), n)
        .into_iter()
        .map(|top| {
            let members: Vec<Record> = records
                .iter()
                .filter(|r| outer.key(r) == Some(top.group.as_str()))
                .cloned()
                .collect();
            Breakdown {
                children: aggregate(&members, inner, measure, Statistic::Sum),
                group: top.group,
                total: top.value,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn record(name: &str, service: &str, cost: Option<f64>) -> Record {
        Record {
            start_date: None,
            end_date: None,
            subaccount_id: None,
            subaccount_name: name.to_string(),
            service_name: service.to_string(),
            directory: None,
            cost,
            usage: cost.map(|c| c / 10.0),
            label: None,
        }
    }

    #[test]
    fn test_sum_sorted_descending_with_stable_ties() {
        let records = vec![
            record("c", "x", Some(5.0)),
            record("a", "x", Some(3.0)),
            record("b", "x", Some(2.0)),
            record("a", "x", Some(2.0)),
            record("d", "x", Some(1.0)),
            record("d", "x", Some(1.0)),
        ];
        let rows = aggregate(&records, GroupBy::SubaccountName, Measure::Cost, Statistic::Sum);
        let order: Vec<(&str, f64)> = rows.iter().map(|r| (r.group.as_str(), r.value)).collect();
        assert_eq!(order, vec![("a", 5.0), ("c", 5.0), ("b", 2.0), ("d", 2.0)]);
        assert_eq!(rows[0].count, 2);
    }

    #[test]
    fn test_mean_and_median_per_group() {
        let records = vec![
            record("a", "x", Some(1.0)),
            record("a", "x", Some(2.0)),
            record("a", "x", Some(10.0)),
            record("a", "x", Some(4.0)),
            record("b", "x", None),
        ];
        let means = aggregate(&records, GroupBy::SubaccountName, Measure::Cost, Statistic::Mean);
        assert_eq!(means[0].value, 4.25);
        assert_eq!(means[1].group, "b");
        assert_eq!(means[1].value, 0.0);
        assert_eq!(means[1].count, 0);

        let medians = aggregate(&records, GroupBy::SubaccountName, Measure::Cost, Statistic::Median);
        assert_eq!(medians[0].value, 3.0);
    }

    #[test]
    fn test_group_without_key_is_skipped() {
        let records = vec![record("a", "x", Some(1.0))];
        assert!(aggregate(&records, GroupBy::Label, Measure::Cost, Statistic::Sum).is_empty());
    }

    #[test]
    fn test_top_n_with_other() {
        let rows: Vec<GroupAggregate> = (0..5)
            .map(|i| GroupAggregate {
                group: format!("g{i}"),
                value: (10 - i) as f64,
                count: 1,
            })
            .collect();

        let pie = top_n_with_other(rows.clone(), 2);
        assert_eq!(pie.len(), 3);
        assert_eq!(pie[2].group, OTHER);
        assert_eq!(pie[2].value, 8.0 + 7.0 + 6.0);
        assert_eq!(pie[2].count, 3);

        assert_eq!(top_n_with_other(rows.clone(), 5), rows);
        assert_eq!(top_n_with_other(rows.clone(), 0).len(), 1);
        assert_eq!(top_n(rows, 2).len(), 2);
    }

    #[test]
    fn test_metrics() {
        let records = vec![
            record("a", "x", Some(0.0)),
            record("a", "x", Some(4.0)),
            record("a", "x", Some(8.0)),
            record("a", "x", None),
        ];
        let schema = Schema { usage: true, ..Schema::default() };
        let m = Metrics::compute(&records, &schema);
        assert_eq!(m.record_count, 4);
        assert_eq!(m.total_cost, 12.0);
        assert_eq!(m.avg_cost_nonzero, 6.0);
        assert_eq!(m.median_cost, 4.0);
        assert!((m.total_usage.unwrap() - 1.2).abs() < 1e-9);

        let no_usage = Metrics::compute(&records, &Schema::default());
        assert_eq!(no_usage.total_usage, None);
    }

    #[test]
    fn test_metrics_on_empty_view() {
        let m = Metrics::compute(&[], &Schema::default());
        assert_eq!(m.total_cost, 0.0);
        assert_eq!(m.avg_cost_nonzero, 0.0);
        assert_eq!(m.median_cost, 0.0);
        assert!(aggregate(&[], GroupBy::ServiceName, Measure::Cost, Statistic::Sum).is_empty());
    }

    #[test]
    fn test_breakdown() {
        let records = vec![
            record("a", "hana", Some(5.0)),
            record("a", "kyma", Some(1.0)),
            record("b", "hana", Some(10.0)),
            record("c", "kyma", Some(0.5)),
        ];
        let rows = breakdown(&records, GroupBy::SubaccountName, GroupBy::ServiceName, Measure::Cost, 2);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].group, "b");
        assert_eq!(rows[1].group, "a");
        assert_eq!(rows[1].total, 6.0);
        assert_eq!(rows[1].children[0].group, "hana");
        assert_eq!(rows[1].children[1].value, 1.0);
    }

    fn arb_records() -> impl Strategy<Value = Vec<Record>> {
        let names = prop::sample::select(vec!["a", "b", "c", "d", "e"]);
        let costs = prop::option::of(0u32..10_000);
        prop::collection::vec((names, costs), 1..60).prop_map(|rows| {
            rows.into_iter()
                .map(|(n, c)| record(n, "svc", c.map(f64::from)))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn property_groups_partition_the_total(records in arb_records()) {
            let total: f64 = records.iter().filter_map(|r| r.cost).sum();
            let rows = aggregate(&records, GroupBy::SubaccountName, Measure::Cost, Statistic::Sum);
            let grouped: f64 = rows.iter().map(|r| r.value).sum();
            prop_assert_eq!(grouped, total);
        }

        #[test]
        fn property_other_row_conserves_the_total(records in arb_records(), n in 0usize..8) {
            let rows = aggregate(&records, GroupBy::SubaccountName, Measure::Cost, Statistic::Sum);
            let total: f64 = rows.iter().map(|r| r.value).sum();
            let pie = top_n_with_other(rows.clone(), n);
            prop_assert_eq!(pie.iter().map(|r| r.value).sum::<f64>(), total);
            prop_assert!(pie.len() <= n + 1);
            prop_assert_eq!(pie.iter().any(|r| r.group == OTHER), rows.len() > n);
        }
    }
}
