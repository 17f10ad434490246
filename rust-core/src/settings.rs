//! Application settings and configuration
//!
//! Settings are layered with the `config` crate: built-in defaults, then an
//! optional TOML file, then `COSTLENS__*` environment variables
//! (e.g. `COSTLENS__ANALYSIS__TOP_GROUPS=15`).

use crate::error::Result;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Default config file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "costlens.toml";

pub const ENV_PREFIX: &str = "COSTLENS";

/// Log output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Pretty,
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogFormat::Json => write!(f, "json"),
            LogFormat::Pretty => write!(f, "pretty"),
        }
    }
}

/// Where the sheets of an input workbook live.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct InputSettings {
    /// Metadata rows above the quota data on the first sheet.
    pub quota_header_rows: usize,
    pub main_sheet_index: usize,
    pub min_sheets: usize,
}

impl Default for InputSettings {
    fn default() -> Self {
        Self {
            quota_header_rows: 16,
            main_sheet_index: 2,
            min_sheets: 3,
        }
    }
}

/// Sizes of the derived tables.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct AnalysisSettings {
    /// Rows in the "top subaccounts/services/labels" tables.
    pub top_groups: usize,
    pub anomaly_count: usize,
    /// Individual slices in the label share table before "Other".
    pub label_slices: usize,
    /// Subaccounts broken down by service.
    pub breakdown_groups: usize,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            top_groups: 10,
            anomaly_count: 5,
            label_slices: 8,
            breakdown_groups: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    pub log_level: String,
    pub log_format: LogFormat,
    pub input: InputSettings,
    pub analysis: AnalysisSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
            input: InputSettings::default(),
            analysis: AnalysisSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings. An explicit `path` must exist; otherwise
    /// [`DEFAULT_CONFIG_FILE`] is used when present.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let file = match path {
            Some(p) => config::File::from(p).required(true),
            None => config::File::with_name(DEFAULT_CONFIG_FILE).required(false),
        };
        let settings = config::Config::builder()
            .add_source(file)
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }
}
