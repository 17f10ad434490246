//! Record filtering: date period, exclusion lists and "All"-or-one selects.
//!
//! A [`FilterConfig`] is plain serde data so a caller can keep the current
//! selection wherever it likes and pass it into every recomputation.

use crate::models::{Record, RecordStore};
use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::debug;

/// Select value that disables an equality filter.
pub const ALL: &str = "All";

/// Which dates to keep, relative to the store's latest `start_date` unless
/// `Custom`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Period {
    #[default]
    LastMonth,
    #[serde(rename = "last_3_months")]
    Last3Months,
    #[serde(rename = "last_6_months")]
    Last6Months,
    LastYear,
    /// Only the most recent `start_date`.
    Latest,
    Custom { start: NaiveDate, end: NaiveDate },
}

/// Inclusive date bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }
}

impl Period {
    /// Resolve to concrete bounds. Presets need a latest date to anchor on;
    /// with none (no parseable dates) there is no range.
    pub fn resolve(&self, latest: Option<NaiveDate>) -> Option<DateRange> {
        let back = |months: u32| -> Option<DateRange> {
            let end = latest?;
            let start = end.checked_sub_months(Months::new(months))?;
            Some(DateRange { start, end })
        };
        match *self {
            Period::Custom { start, end } => Some(DateRange { start, end }),
            Period::Latest => latest.map(|end| DateRange { start: end, end }),
            Period::LastMonth => back(1),
            Period::Last3Months => back(3),
            Period::Last6Months => back(6),
            Period::LastYear => back(12),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    pub period: Period,
    pub excluded_subaccounts: BTreeSet<String>,
    pub excluded_directories: BTreeSet<String>,
    /// Subaccount name to keep; `None` or `"All"` keeps every subaccount.
    pub subaccount: Option<String>,
    pub service: Option<String>,
}

impl FilterConfig {
    pub fn with_period(mut self, period: Period) -> Self {
        self.period = period;
        self
    }

    pub fn exclude_subaccount(mut self, name: impl Into<String>) -> Self {
        self.excluded_subaccounts.insert(name.into());
        self
    }

    pub fn exclude_directory(mut self, name: impl Into<String>) -> Self {
        self.excluded_directories.insert(name.into());
        self
    }

    pub fn with_subaccount(mut self, name: impl Into<String>) -> Self {
        self.subaccount = Some(name.into());
        self
    }

    pub fn with_service(mut self, name: impl Into<String>) -> Self {
        self.service = Some(name.into());
        self
    }

    fn subaccount_select(&self) -> Option<&str> {
        selected(&self.subaccount)
    }

    fn service_select(&self) -> Option<&str> {
        selected(&self.service)
    }
}

fn selected(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|v| *v != ALL)
}

/// One filter criterion. Criteria are independent, so any order of
/// application gives the same rows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate<'a> {
    /// `None` keeps nothing: there was no range to resolve.
    DateRange(Option<DateRange>),
    ExcludeSubaccounts(&'a BTreeSet<String>),
    ExcludeDirectories(&'a BTreeSet<String>),
    SubaccountEquals(&'a str),
    ServiceEquals(&'a str),
}

impl Predicate<'_> {
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Predicate::DateRange(range) => match (range, record.start_date) {
                (Some(range), Some(date)) => range.contains(date),
                _ => false,
            },
            Predicate::ExcludeSubaccounts(set) => !set.contains(&record.subaccount_name),
            Predicate::ExcludeDirectories(set) => record
                .directory
                .as_ref()
                .map_or(true, |dir| !set.contains(dir)),
            Predicate::SubaccountEquals(name) => record.subaccount_name == *name,
            Predicate::ServiceEquals(name) => record.service_name == *name,
        }
    }
}

/// Keep the records matching every predicate. Does not copy the records.
pub fn apply<'r>(records: &'r [Record], predicates: &[Predicate<'_>]) -> Vec<&'r Record> {
    records
        .iter()
        .filter(|r| predicates.iter().all(|p| p.matches(r)))
        .collect()
}

/// Every predicate `config` implies against `store`, in the order the
/// selection UI applies them.
pub fn predicates<'a>(store: &RecordStore, config: &'a FilterConfig) -> Vec<Predicate<'a>> {
    let mut preds = vec![Predicate::DateRange(
        config.period.resolve(store.max_start_date()),
    )];
    if !config.excluded_subaccounts.is_empty() {
        preds.push(Predicate::ExcludeSubaccounts(&config.excluded_subaccounts));
    }
    if store.schema().has_directory() && !config.excluded_directories.is_empty() {
        preds.push(Predicate::ExcludeDirectories(&config.excluded_directories));
    }
    if let Some(name) = config.subaccount_select() {
        preds.push(Predicate::SubaccountEquals(name));
    }
    if let Some(name) = config.service_select() {
        preds.push(Predicate::ServiceEquals(name));
    }
    preds
}

/// The filtered view of `store` under `config`.
pub fn filter_records(store: &RecordStore, config: &FilterConfig) -> Vec<Record> {
    let preds = predicates(store, config);
    let kept: Vec<Record> = apply(store.records(), &preds).into_iter().cloned().collect();
    debug!(
        total = store.len(),
        kept = kept.len(),
        range = ?config.period.resolve(store.max_start_date()),
        "filtered records"
    );
    kept
}

/// Choices to offer for each filter widget.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterOptions {
    /// Every subaccount name, for the exclusion list.
    pub subaccounts: Vec<String>,
    /// Every directory, empty when the export has no directory column.
    pub directories: Vec<String>,
    /// `"All"` followed by subaccounts that are not excluded.
    pub subaccount_select: Vec<String>,
    /// `"All"` followed by services left after the date, exclusion and
    /// subaccount filters.
    pub service_select: Vec<String>,
}

impl FilterOptions {
    pub fn build(store: &RecordStore, config: &FilterConfig) -> Self {
        let subaccounts = distinct(store.records().iter().map(|r| r.subaccount_name.as_str()));
        let directories = if store.schema().has_directory() {
            distinct(store.records().iter().filter_map(|r| r.directory.as_deref()))
        } else {
            Vec::new()
        };

        let subaccount_select = std::iter::once(ALL.to_string())
            .chain(
                subaccounts
                    .iter()
                    .filter(|s| !config.excluded_subaccounts.contains(*s))
                    .cloned(),
            )
            .collect();

        let before_service: Vec<Predicate<'_>> = predicates(store, config)
            .into_iter()
            .filter(|p| !matches!(p, Predicate::ServiceEquals(_)))
            .collect();
        let services = distinct(
            apply(store.records(), &before_service)
                .into_iter()
                .map(|r| r.service_name.as_str()),
        );
        let service_select = std::iter::once(ALL.to_string()).chain(services).collect();

        Self {
            subaccounts,
            directories,
            subaccount_select,
            service_select,
        }
    }
}

fn distinct<'a>(values: impl Iterator<Item = &'a str>) -> Vec<String> {
    let set: BTreeSet<&str> = values.collect();
    set.into_iter().map(str::to_string).collect()
}
