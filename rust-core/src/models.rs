use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};

/// Group name substituted for records whose subaccount or service cell is blank.
pub const UNKNOWN: &str = "Unknown";

fn deserialize_opt_naive_date<'de, D>(d: D) -> Result<Option<NaiveDate>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(d)?;
    Ok(opt.and_then(|s| {
        let head = s.get(..10).unwrap_or(&s);
        NaiveDate::parse_from_str(head, "%Y-%m-%d").ok()
    }))
}

/// One row of the cost and usage table.
///
/// Records are not unique: the same subaccount/service pair shows up once per
/// billing period, so every aggregate groups explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(default, deserialize_with = "deserialize_opt_naive_date")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, deserialize_with = "deserialize_opt_naive_date")]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub subaccount_id: Option<String>,
    pub subaccount_name: String,
    pub service_name: String,
    #[serde(default)]
    pub directory: Option<String>,
    #[serde(default)]
    pub cost: Option<f64>,
    #[serde(default)]
    pub usage: Option<f64>,
    #[serde(default)]
    pub label: Option<String>,
}

/// Categorical column a table can be grouped by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum GroupBy {
    SubaccountId,
    SubaccountName,
    ServiceName,
    Directory,
    Label,
}

impl GroupBy {
    /// Group key of `record`, or `None` when the record has no value for the column.
    pub fn key<'a>(&self, record: &'a Record) -> Option<&'a str> {
        match self {
            GroupBy::SubaccountId => record.subaccount_id.as_deref(),
            GroupBy::SubaccountName => Some(record.subaccount_name.as_str()),
            GroupBy::ServiceName => Some(record.service_name.as_str()),
            GroupBy::Directory => record.directory.as_deref(),
            GroupBy::Label => record.label.as_deref(),
        }
    }
}

/// Numeric column an aggregate or z-score is computed over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Measure {
    Cost,
    Usage,
}

impl Measure {
    pub fn value(&self, record: &Record) -> Option<f64> {
        match self {
            Measure::Cost => record.cost,
            Measure::Usage => record.usage,
        }
    }
}

/// Optional columns found when the table was loaded. A missing column turns
/// the features that need it off for the run instead of failing the load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    pub subaccount_id: bool,
    pub end_date: bool,
    pub usage: bool,
    /// Header of the directory column, when the sheet has one.
    pub directory_column: Option<String>,
    pub labels: bool,
}

impl Schema {
    /// Derive the schema from records that did not come from a spreadsheet
    /// (JSON pipeline input): a field counts as present if any record has it.
    pub fn infer(records: &[Record]) -> Self {
        Self {
            subaccount_id: records.iter().any(|r| r.subaccount_id.is_some()),
            end_date: records.iter().any(|r| r.end_date.is_some()),
            usage: records.iter().any(|r| r.usage.is_some()),
            directory_column: records
                .iter()
                .any(|r| r.directory.is_some())
                .then(|| "directory".to_string()),
            labels: records.iter().any(|r| r.label.is_some()),
        }
    }

    pub fn has_directory(&self) -> bool {
        self.directory_column.is_some()
    }

    pub fn has_group(&self, group_by: GroupBy) -> bool {
        match group_by {
            GroupBy::SubaccountId => self.subaccount_id,
            GroupBy::SubaccountName | GroupBy::ServiceName => true,
            GroupBy::Directory => self.has_directory(),
            GroupBy::Label => self.labels,
        }
    }

    pub fn has_measure(&self, measure: Measure) -> bool {
        match measure {
            Measure::Cost => true,
            Measure::Usage => self.usage,
        }
    }
}

/// Quota sheet row as read, before any parsing: three positional columns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaRow {
    pub date: String,
    pub percent: String,
    pub quota_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuotaSample {
    pub date: NaiveDate,
    pub usage_percent: f64,
    pub quota_type: String,
    pub over_quota: bool,
}

/// The loaded input file. Built once and never modified; every analysis
/// borrows it and returns new tables.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecordStore {
    records: Vec<Record>,
    schema: Schema,
    quota: Vec<QuotaRow>,
}

impl RecordStore {
    pub fn new(records: Vec<Record>, schema: Schema, quota: Vec<QuotaRow>) -> Self {
        Self {
            records,
            schema,
            quota,
        }
    }

    pub fn from_records(records: Vec<Record>) -> Self {
        let schema = Schema::infer(&records);
        Self::new(records, schema, Vec::new())
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn quota(&self) -> &[QuotaRow] {
        &self.quota
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Latest parseable `start_date`; period presets are anchored here.
    pub fn max_start_date(&self) -> Option<NaiveDate> {
        self.records.iter().filter_map(|r| r.start_date).max()
    }
}
