//! Costlens core: cost and usage analysis over spreadsheet exports.
//! Loads the export once, then every query filters and aggregates the
//! immutable record store from scratch.

pub mod aggregate;
pub mod anomaly;
pub mod error;
pub mod filter;
pub mod ingest;
pub mod models;
pub mod quota;
pub mod report;
pub mod settings;
pub mod trend;

pub use aggregate::{aggregate, top_n, top_n_with_other, GroupAggregate, Metrics, Statistic};
pub use anomaly::{detect_anomalies, Anomaly, AnomalyReport};
pub use error::{Error, Result};
pub use filter::{filter_records, DateRange, FilterConfig, FilterOptions, Period};
pub use ingest::{load_csv, load_path, load_workbook, Workbook};
pub use models::{GroupBy, Measure, QuotaSample, Record, RecordStore, Schema};
pub use quota::{analyze_quota, QuotaAnalysis};
pub use report::Dashboard;
pub use settings::Settings;
pub use trend::{cost_trend, Trend};
