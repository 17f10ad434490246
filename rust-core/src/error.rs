//! Error types for loading and analysing cost exports.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("unsupported file type: {0} (expected .xlsx, .xlsm, .xls, .ods or .csv)")]
    UnsupportedFileType(String),

    #[error("unreadable spreadsheet: {0}")]
    Workbook(#[from] calamine::Error),

    #[error("expected at least {required} sheets, found {found}")]
    SheetCount { found: usize, required: usize },

    #[error("sheet '{sheet}' has no column '{column}'")]
    MissingColumn { sheet: String, column: String },

    #[error("sheet '{0}' has no header row")]
    EmptySheet(String),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl Error {
    /// The single message shown to a user when the input cannot be used.
    pub fn user_message(&self) -> String {
        match self {
            Error::Config(e) => format!("Could not load the configuration. Error: {e}"),
            Error::Json(e) => format!("Could not parse the JSON input. Error: {e}"),
            other => format!(
                "Could not read the spreadsheet. Please check the file format. Error: {other}"
            ),
        }
    }
}
