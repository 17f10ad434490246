//! Reading cost exports into a [`RecordStore`].
//!
//! Workbooks follow a fixed sheet layout (see [`INPUT_CONTRACT_VERSION`]):
//!
//! | sheet          | content                                                    |
//! |----------------|------------------------------------------------------------|
//! | index 0        | quota sheet: metadata rows, then date / percent / type     |
//! | index 2        | main cost and usage table, header in the first row         |
//! | last sheet     | label table: `Subaccount ID`, key, value                   |
//!
//! The spreadsheet is first copied into a neutral [`Workbook`] of [`Cell`]s so
//! the table parsing below never touches the reader library directly.

use crate::error::{Error, Result};
use crate::models::{QuotaRow, Record, RecordStore, Schema, UNKNOWN};
use crate::settings::InputSettings;
use calamine::Reader;
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;
use tracing::{debug, info};

/// Version of the sheet layout this module understands.
pub const INPUT_CONTRACT_VERSION: u32 = 1;

pub const COL_SUBACCOUNT_ID: &str = "Subaccount ID";
pub const COL_SUBACCOUNT_NAME: &str = "Subaccount Name";
pub const COL_SERVICE_NAME: &str = "Service Name";
pub const COL_START_DATE: &str = "Start Date";
pub const COL_END_DATE: &str = "End Date";
pub const COL_COST: &str = "Cost";
pub const COL_USAGE: &str = "Usage";

const WORKBOOK_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xls", "ods"];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%d.%m.%Y"];
const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
];

#[derive(Debug, Clone, PartialEq)]
pub enum Cell {
    Empty,
    Bool(bool),
    Number(f64),
    Text(String),
    Date(NaiveDate),
}

impl Cell {
    /// Display text of the cell; `None` for blanks.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Cell::Empty => None,
            Cell::Bool(b) => Some(b.to_string()),
            Cell::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => Some(format!("{}", *n as i64)),
            Cell::Number(n) => Some(n.to_string()),
            Cell::Text(s) => {
                let s = s.trim();
                (!s.is_empty()).then(|| s.to_string())
            }
            Cell::Date(d) => Some(d.format("%Y-%m-%d").to_string()),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Number(n) => Some(*n).filter(|n| n.is_finite()),
            Cell::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            _ => None,
        }
    }

    pub fn as_date(&self) -> Option<NaiveDate> {
        match self {
            Cell::Date(d) => Some(*d),
            Cell::Text(s) => parse_date_text(s),
            _ => None,
        }
    }

    fn is_empty(&self) -> bool {
        self.as_text().is_none()
    }
}

impl From<&calamine::Data> for Cell {
    fn from(data: &calamine::Data) -> Self {
        use calamine::Data;
        match data {
            Data::Int(i) => Cell::Number(*i as f64),
            Data::Float(f) => Cell::Number(*f),
            Data::String(s) => Cell::Text(s.clone()),
            Data::Bool(b) => Cell::Bool(*b),
            Data::DateTime(dt) => dt
                .as_datetime()
                .map_or(Cell::Empty, |dt| Cell::Date(dt.date())),
            Data::DateTimeIso(s) => parse_date_text(s).map_or(Cell::Empty, Cell::Date),
            Data::DurationIso(s) => Cell::Text(s.clone()),
            Data::Error(_) | Data::Empty => Cell::Empty,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sheet {
    pub name: String,
    pub rows: Vec<Vec<Cell>>,
}

impl Sheet {
    pub fn new(name: impl Into<String>, rows: Vec<Vec<Cell>>) -> Self {
        Self {
            name: name.into(),
            rows,
        }
    }

    fn header(&self) -> Result<Vec<String>> {
        let first = self
            .rows
            .first()
            .ok_or_else(|| Error::EmptySheet(self.name.clone()))?;
        Ok(first
            .iter()
            .map(|c| c.as_text().unwrap_or_default())
            .collect())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Workbook {
    pub sheets: Vec<Sheet>,
}

impl Workbook {
    /// Read every sheet of a spreadsheet file.
    pub fn open(path: &Path) -> Result<Self> {
        let ext = extension(path);
        if !WORKBOOK_EXTENSIONS.contains(&ext.as_str()) {
            return Err(Error::UnsupportedFileType(path.display().to_string()));
        }

        let mut reader = calamine::open_workbook_auto(path)?;
        let names = reader.sheet_names();
        let mut sheets = Vec::with_capacity(names.len());
        for name in names {
            let range = reader.worksheet_range(&name)?;
            // Ranges begin at the first used cell; pad back to A1 so row
            // offsets match what a user sees in the sheet.
            let (row_offset, col_offset) = range
                .start()
                .map(|(r, c)| (r as usize, c as usize))
                .unwrap_or((0, 0));
            let mut rows: Vec<Vec<Cell>> = vec![Vec::new(); row_offset];
            rows.extend(range.rows().map(|row| {
                std::iter::repeat(Cell::Empty)
                    .take(col_offset)
                    .chain(row.iter().map(Cell::from))
                    .collect()
            }));
            sheets.push(Sheet::new(name, rows));
        }
        debug!(path = %path.display(), sheets = sheets.len(), "opened workbook");
        Ok(Self { sheets })
    }
}

/// Load a cost export from disk. `.csv` files hold only the main table; every
/// other accepted extension is read as a workbook.
pub fn load_path(path: &Path, input: &InputSettings) -> Result<RecordStore> {
    if extension(path) == "csv" {
        let file = File::open(path)?;
        return load_csv(file);
    }
    let workbook = Workbook::open(path)?;
    load_workbook(&workbook, input)
}

/// Build the store from a workbook laid out per [`INPUT_CONTRACT_VERSION`].
pub fn load_workbook(workbook: &Workbook, input: &InputSettings) -> Result<RecordStore> {
    let found = workbook.sheets.len();
    let required = input.min_sheets.max(input.main_sheet_index + 1);
    if found < required {
        return Err(Error::SheetCount { found, required });
    }

    // Indices are in bounds after the count check.
    let quota_sheet = &workbook.sheets[0];
    let main_sheet = &workbook.sheets[input.main_sheet_index];
    let label_index = found - 1;
    let label_sheet = &workbook.sheets[label_index];

    let quota = parse_quota_rows(quota_sheet, input.quota_header_rows);
    let (mut records, mut schema) = parse_main_table(main_sheet)?;

    // When the main table is also the last sheet there is no label table.
    let labels = if label_index == input.main_sheet_index {
        debug!(sheet = %label_sheet.name, "last sheet is the main table; label analysis disabled");
        None
    } else {
        label_table(label_sheet)
    };

    match (schema.subaccount_id, labels) {
        (true, Some(labels)) => {
            for record in &mut records {
                record.label = record
                    .subaccount_id
                    .as_ref()
                    .and_then(|id| labels.get(id))
                    .cloned();
            }
            schema.labels = true;
            debug!(labels = labels.len(), sheet = %label_sheet.name, "joined label table");
        }
        _ => debug!(sheet = %label_sheet.name, "no label table; label analysis disabled"),
    }

    info!(
        contract = INPUT_CONTRACT_VERSION,
        records = records.len(),
        quota_rows = quota.len(),
        directory = schema.has_directory(),
        usage = schema.usage,
        labels = schema.labels,
        "loaded cost export"
    );
    Ok(RecordStore::new(records, schema, quota))
}

/// Load the main table from a CSV export. There is no quota or label data.
pub fn load_csv<R: Read>(reader: R) -> Result<RecordStore> {
    let mut csv_reader = csv::ReaderBuilder::new().flexible(true).from_reader(reader);
    let mut rows = vec![csv_reader
        .headers()?
        .iter()
        .map(|h| Cell::Text(h.to_string()))
        .collect::<Vec<_>>()];
    for row in csv_reader.records() {
        let row = row?;
        rows.push(
            row.iter()
                .map(|field| {
                    if field.trim().is_empty() {
                        Cell::Empty
                    } else {
                        Cell::Text(field.to_string())
                    }
                })
                .collect(),
        );
    }

    let (records, schema) = parse_main_table(&Sheet::new("csv", rows))?;
    info!(records = records.len(), usage = schema.usage, "loaded CSV cost export");
    Ok(RecordStore::new(records, schema, Vec::new()))
}

/// Write records as CSV under the main-table headers, so an export can be
/// loaded again with [`load_csv`].
pub fn write_csv<W: Write>(records: &[Record], writer: W) -> Result<()> {
    let mut csv_writer = csv::Writer::from_writer(writer);
    csv_writer.write_record([
        COL_SUBACCOUNT_ID,
        COL_SUBACCOUNT_NAME,
        "Directory",
        COL_SERVICE_NAME,
        COL_START_DATE,
        COL_END_DATE,
        COL_COST,
        COL_USAGE,
        "Label",
    ])?;
    let date = |d: Option<NaiveDate>| d.map(|d| d.to_string()).unwrap_or_default();
    let number = |n: Option<f64>| n.map(|n| n.to_string()).unwrap_or_default();
    for r in records {
        csv_writer.write_record([
            r.subaccount_id.clone().unwrap_or_default(),
            r.subaccount_name.clone(),
            r.directory.clone().unwrap_or_default(),
            r.service_name.clone(),
            date(r.start_date),
            date(r.end_date),
            number(r.cost),
            number(r.usage),
            r.label.clone().unwrap_or_default(),
        ])?;
    }
    csv_writer.flush()?;
    Ok(())
}

/// Column positions of the main table, resolved once from the header.
#[derive(Debug)]
struct MainColumns {
    subaccount_id: Option<usize>,
    subaccount_name: usize,
    service_name: usize,
    start_date: usize,
    end_date: Option<usize>,
    cost: usize,
    usage: Option<usize>,
    directory: Option<(usize, String)>,
}

impl MainColumns {
    fn resolve(sheet: &Sheet) -> Result<Self> {
        let header = sheet.header()?;
        let find = |name: &str| header.iter().position(|h| h == name);
        let require = |name: &str| {
            find(name).ok_or_else(|| Error::MissingColumn {
                sheet: sheet.name.clone(),
                column: name.to_string(),
            })
        };

        Ok(Self {
            subaccount_id: find(COL_SUBACCOUNT_ID),
            subaccount_name: require(COL_SUBACCOUNT_NAME)?,
            service_name: require(COL_SERVICE_NAME)?,
            start_date: require(COL_START_DATE)?,
            end_date: find(COL_END_DATE),
            cost: require(COL_COST)?,
            usage: find(COL_USAGE),
            directory: header
                .iter()
                .position(|h| h.to_lowercase().contains("directory"))
                .map(|i| (i, header[i].clone())),
        })
    }

    fn schema(&self) -> Schema {
        Schema {
            subaccount_id: self.subaccount_id.is_some(),
            end_date: self.end_date.is_some(),
            usage: self.usage.is_some(),
            directory_column: self.directory.as_ref().map(|(_, name)| name.clone()),
            labels: false,
        }
    }
}

fn parse_main_table(sheet: &Sheet) -> Result<(Vec<Record>, Schema)> {
    let cols = MainColumns::resolve(sheet)?;
    let empty = Cell::Empty;

    let mut blank = 0usize;
    let mut records = Vec::with_capacity(sheet.rows.len().saturating_sub(1));
    for row in sheet.rows.iter().skip(1) {
        if row.iter().all(Cell::is_empty) {
            blank += 1;
            continue;
        }
        let cell = |i: usize| row.get(i).unwrap_or(&empty);
        let opt_cell = |i: Option<usize>| i.map_or(&empty, |i| cell(i));

        records.push(Record {
            start_date: cell(cols.start_date).as_date(),
            end_date: opt_cell(cols.end_date).as_date(),
            subaccount_id: opt_cell(cols.subaccount_id).as_text(),
            subaccount_name: cell(cols.subaccount_name)
                .as_text()
                .unwrap_or_else(|| UNKNOWN.to_string()),
            service_name: cell(cols.service_name)
                .as_text()
                .unwrap_or_else(|| UNKNOWN.to_string()),
            directory: opt_cell(cols.directory.as_ref().map(|(i, _)| *i)).as_text(),
            cost: cell(cols.cost).as_number(),
            usage: opt_cell(cols.usage).as_number(),
            label: None,
        });
    }

    let undated = records.iter().filter(|r| r.start_date.is_none()).count();
    debug!(
        sheet = %sheet.name,
        rows = records.len(),
        blank_rows = blank,
        undated,
        "parsed main table"
    );
    Ok((records, cols.schema()))
}

/// Subaccount ID → `"<key>: <value>"`. `None` when the sheet is not a label
/// table. The first row for a subaccount wins so joined records are never
/// duplicated.
fn label_table(sheet: &Sheet) -> Option<HashMap<String, String>> {
    let header = sheet.header().ok()?;
    if header.len() < 3 {
        return None;
    }
    let id_col = header.iter().position(|h| h == COL_SUBACCOUNT_ID)?;

    let mut labels = HashMap::new();
    for row in sheet.rows.iter().skip(1) {
        let text = |i: usize| row.get(i).and_then(Cell::as_text);
        let Some(id) = text(id_col) else { continue };
        let label = format!(
            "{}: {}",
            text(1).unwrap_or_default(),
            text(2).unwrap_or_default()
        );
        labels.entry(id).or_insert(label);
    }
    Some(labels)
}

/// Rows below the quota sheet's metadata block, first three columns as text.
/// Rows with a blank first column are dropped.
fn parse_quota_rows(sheet: &Sheet, header_rows: usize) -> Vec<QuotaRow> {
    sheet
        .rows
        .iter()
        .skip(header_rows)
        .filter_map(|row| {
            let text = |i: usize| row.get(i).and_then(Cell::as_text);
            Some(QuotaRow {
                date: text(0)?,
                percent: text(1).unwrap_or_default(),
                quota_type: text(2).unwrap_or_default(),
            })
        })
        .collect()
}

pub(crate) fn parse_date_text(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
                .map(|dt| dt.date())
        })
}

fn extension(path: &Path) -> String {
    path.extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Cell {
        Cell::Text(s.to_string())
    }

    fn main_header() -> Vec<Cell> {
        [
            "Subaccount ID",
            "Subaccount Name",
            "Directory Name",
            "Service Name",
            "Start Date",
            "End Date",
            "Cost",
            "Usage",
        ]
        .iter()
        .map(|h| text(h))
        .collect()
    }

    fn main_row(id: &str, name: &str, service: &str, date: &str, cost: f64) -> Vec<Cell> {
        vec![
            text(id),
            text(name),
            text("dir-1"),
            text(service),
            text(date),
            text(date),
            Cell::Number(cost),
            Cell::Number(cost * 2.0),
        ]
    }

    fn quota_sheet() -> Sheet {
        let mut rows = vec![vec![text("metadata")]; 16];
        rows.push(vec![Cell::Date(NaiveDate::from_ymd_opt(2024, 2, 1).unwrap()), Cell::Number(120.0), text("CPEA")]);
        rows.push(vec![Cell::Empty, Cell::Number(10.0), text("ignored")]);
        rows.push(vec![text("2024-01-01"), text("80.5"), text("CPEA")]);
        Sheet::new("Quota", rows)
    }

    fn workbook() -> Workbook {
        let main = Sheet::new(
            "Costs",
            vec![
                main_header(),
                main_row("id-a", "alpha", "HANA", "2024-01-01", 10.0),
                main_row("id-a", "alpha", "Kyma", "2024-02-01", 20.0),
                vec![Cell::Empty; 8],
                main_row("id-b", "", "HANA", "garbage", 5.0),
                main_row("id-c", "gamma", "Kyma", "2024-02-01", 7.0),
            ],
        );
        let labels = Sheet::new(
            "Labels",
            vec![
                vec![text("Subaccount ID"), text("Key"), text("Value")],
                vec![text("id-a"), text("team"), text("core")],
                vec![text("id-a"), text("team"), text("other")],
                vec![text("id-b"), text("env"), text("dev")],
            ],
        );
        Workbook {
            sheets: vec![quota_sheet(), Sheet::new("Summary", vec![]), main, labels],
        }
    }

    #[test]
    fn test_load_workbook() {
        let store = load_workbook(&workbook(), &InputSettings::default()).unwrap();
        let records = store.records();
        assert_eq!(records.len(), 4);

        assert_eq!(records[0].label.as_deref(), Some("team: core"));
        assert_eq!(records[1].label.as_deref(), Some("team: core"));
        assert_eq!(records[2].label.as_deref(), Some("env: dev"));
        assert_eq!(records[3].label, None);

        assert_eq!(records[2].subaccount_name, UNKNOWN);
        assert_eq!(records[2].start_date, None);
        assert_eq!(records[0].usage, Some(20.0));
        assert_eq!(records[0].directory.as_deref(), Some("dir-1"));

        let schema = store.schema();
        assert_eq!(schema.directory_column.as_deref(), Some("Directory Name"));
        assert!(schema.usage && schema.labels && schema.subaccount_id);

        assert_eq!(store.quota().len(), 2);
        assert_eq!(store.quota()[0].date, "2024-02-01");
        assert_eq!(store.quota()[0].percent, "120");
    }

    #[test]
    fn test_too_few_sheets() {
        let mut wb = workbook();
        wb.sheets.truncate(2);
        let err = load_workbook(&wb, &InputSettings::default()).unwrap_err();
        assert!(matches!(err, Error::SheetCount { found: 2, required: 3 }));
    }

    #[test]
    fn test_missing_required_column() {
        let mut wb = workbook();
        wb.sheets[2].rows[0][6] = text("Amount");
        let err = load_workbook(&wb, &InputSettings::default()).unwrap_err();
        match err {
            Error::MissingColumn { column, .. } => assert_eq!(column, "Cost"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_optional_columns_disable_features() {
        let mut wb = workbook();
        let main = &mut wb.sheets[2];
        for row in &mut main.rows {
            row.truncate(7);
            if !row.is_empty() {
                row.remove(2);
            }
        }
        let store = load_workbook(&wb, &InputSettings::default()).unwrap();
        assert!(!store.schema().usage);
        assert!(!store.schema().has_directory());
        assert!(store.records().iter().all(|r| r.usage.is_none() && r.directory.is_none()));
    }

    #[test]
    fn test_label_sheet_without_subaccount_id() {
        let mut wb = workbook();
        wb.sheets[3].rows[0][0] = text("Account");
        let store = load_workbook(&wb, &InputSettings::default()).unwrap();
        assert!(!store.schema().labels);
        assert!(store.records().iter().all(|r| r.label.is_none()));
    }

    #[test]
    fn test_load_csv() {
        let data = "\
Subaccount Name,Service Name,Start Date,End Date,Cost
alpha,HANA,2024-01-01,2024-01-31,10.5
beta,Kyma,01/15/2024,,n/a
";
        let store = load_csv(data.as_bytes()).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.records()[0].cost, Some(10.5));
        assert_eq!(store.records()[1].cost, None);
        assert_eq!(store.records()[1].start_date, NaiveDate::from_ymd_opt(2024, 1, 15));
        assert!(!store.schema().usage);
        assert!(store.quota().is_empty());
    }

    #[test]
    fn test_write_csv_reloads() {
        let store = load_workbook(&workbook(), &InputSettings::default()).unwrap();
        let mut buf = Vec::new();
        write_csv(store.records(), &mut buf).unwrap();

        let reloaded = load_csv(buf.as_slice()).unwrap();
        assert_eq!(reloaded.len(), store.len());
        assert!(reloaded.schema().has_directory());
        let first = &reloaded.records()[0];
        assert_eq!(first.subaccount_id.as_deref(), Some("id-a"));
        assert_eq!(first.cost, Some(10.0));
        assert_eq!(first.start_date, store.records()[0].start_date);
        assert_eq!(reloaded.records()[2].start_date, None);
    }

    #[test]
    fn test_unsupported_extension() {
        let err = Workbook::open(Path::new("costs.pdf")).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFileType(_)));
    }

    #[test]
    fn test_parse_date_text() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 5);
        assert_eq!(parse_date_text("2024-03-05"), expected);
        assert_eq!(parse_date_text("2024-03-05 00:00:00"), expected);
        assert_eq!(parse_date_text("2024-03-05T12:30:00"), expected);
        assert_eq!(parse_date_text("05.03.2024"), expected);
        assert_eq!(parse_date_text("March"), None);
        assert_eq!(parse_date_text(""), None);
    }

    fn serial(value: f64) -> Cell {
        let dt = calamine::ExcelDateTime::new(value, calamine::ExcelDateTimeType::DateTime, false);
        Cell::from(&calamine::Data::DateTime(dt))
    }

    #[test]
    fn test_spreadsheet_date_cells() {
        assert_eq!(serial(45292.0), Cell::Date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()));
        assert_eq!(serial(45292.75), Cell::Date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()));
        // Serials before the fictitious 1900-02-29 are not shifted by it.
        assert_eq!(serial(1.0), Cell::Date(NaiveDate::from_ymd_opt(1900, 1, 1).unwrap()));
        assert_eq!(serial(59.0), Cell::Date(NaiveDate::from_ymd_opt(1900, 2, 28).unwrap()));
        assert_eq!(serial(61.0), Cell::Date(NaiveDate::from_ymd_opt(1900, 3, 1).unwrap()));
    }

    #[test]
    fn test_three_sheet_workbook_has_no_labels() {
        let mut wb = workbook();
        wb.sheets.pop();
        assert_eq!(wb.sheets.len(), 3);
        let store = load_workbook(&wb, &InputSettings::default()).unwrap();
        assert!(!store.schema().labels);
        assert!(store.records().iter().all(|r| r.label.is_none()));
        assert_eq!(store.len(), 4);
    }

    #[test]
    fn test_xlsb_is_not_accepted() {
        let err = Workbook::open(Path::new("costs.xlsb")).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFileType(_)));
    }

    #[test]
    fn test_cell_text_and_number() {
        assert_eq!(Cell::Number(42.0).as_text().as_deref(), Some("42"));
        assert_eq!(Cell::Number(4.5).as_text().as_deref(), Some("4.5"));
        assert_eq!(text("  ").as_text(), None);
        assert_eq!(text(" 3.25 ").as_number(), Some(3.25));
        assert_eq!(text("NaN").as_number(), None);
        assert_eq!(Cell::Bool(true).as_number(), None);
    }
}
