//! CLI: cost export in, JSON (or CSV) out.
//!
//! Usage:
//!   costlens report "GA export.xlsx" --period last-3-months --exclude-subaccount sandbox
//!   costlens anomalies "GA export.xlsx" --group-by service-name -n 5
//!   costlens aggregate "GA export.xlsx" --group-by label --statistic median
//!   costlens quota "GA export.xlsx"
//!   costlens export "GA export.xlsx" --output filtered.csv
//!   echo '{"records":[...], "filter":{...}}' | costlens pipeline
use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use costlens_core::{
    aggregate::{self, top_n, top_n_with_other, GroupAggregate, Statistic},
    filter::{filter_records, FilterConfig, Period},
    ingest::{load_path, write_csv},
    models::{GroupBy, Measure, QuotaRow, Record, RecordStore},
    quota::{analyze_quota, QuotaAnalysis},
    report::{anomaly_report, Dashboard},
    settings::{LogFormat, Settings},
    AnomalyReport,
};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Cost and usage analysis for cloud account exports
#[derive(Parser, Debug)]
#[command(name = "costlens")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (default: ./costlens.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Log level: trace, debug, info, warn, error (overrides config)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Log format (overrides config)
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,

    /// Pretty-print JSON output
    #[arg(long, global = true)]
    pretty: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Every derived table for the selected filters
    Report {
        file: PathBuf,
        #[command(flatten)]
        filter: FilterArgs,
        /// Include the filtered records in the output
        #[arg(long)]
        include_records: bool,
    },
    /// Records with the highest z-score within their group
    Anomalies {
        file: PathBuf,
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long, value_enum, default_value_t = GroupBy::ServiceName)]
        group_by: GroupBy,
        #[arg(long, value_enum, default_value_t = Measure::Cost)]
        measure: Measure,
        /// Number of records to return (default: analysis.anomaly_count)
        #[arg(short)]
        n: Option<usize>,
    },
    /// One grouped aggregate of the filtered records
    Aggregate {
        file: PathBuf,
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(long, value_enum, default_value_t = GroupBy::SubaccountName)]
        group_by: GroupBy,
        #[arg(long, value_enum, default_value_t = Measure::Cost)]
        measure: Measure,
        #[arg(long, value_enum, default_value_t = Statistic::Sum)]
        statistic: Statistic,
        /// Keep only the first N groups
        #[arg(long)]
        top: Option<usize>,
        /// Collapse groups past --top into an "Other" row
        #[arg(long, requires = "top")]
        other: bool,
    },
    /// Quota consumption series and over-quota periods
    Quota { file: PathBuf },
    /// Write the filtered records as CSV
    Export {
        file: PathBuf,
        #[command(flatten)]
        filter: FilterArgs,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Read {"records": [...], "filter": {...}} JSON on stdin, write the dashboard to stdout
    Pipeline,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum PeriodArg {
    LastMonth,
    #[value(name = "last-3-months")]
    Last3Months,
    #[value(name = "last-6-months")]
    Last6Months,
    LastYear,
    Latest,
}

impl From<PeriodArg> for Period {
    fn from(arg: PeriodArg) -> Self {
        match arg {
            PeriodArg::LastMonth => Period::LastMonth,
            PeriodArg::Last3Months => Period::Last3Months,
            PeriodArg::Last6Months => Period::Last6Months,
            PeriodArg::LastYear => Period::LastYear,
            PeriodArg::Latest => Period::Latest,
        }
    }
}

#[derive(clap::Args, Debug)]
struct FilterArgs {
    /// JSON filter configuration; the flags below override it
    #[arg(long = "filter")]
    filter_file: Option<PathBuf>,

    #[arg(long, value_enum, conflicts_with = "start")]
    period: Option<PeriodArg>,

    /// Custom range start (YYYY-MM-DD, inclusive)
    #[arg(long, requires = "end")]
    start: Option<NaiveDate>,

    /// Custom range end (YYYY-MM-DD, inclusive)
    #[arg(long, requires = "start")]
    end: Option<NaiveDate>,

    #[arg(long = "exclude-subaccount")]
    exclude_subaccounts: Vec<String>,

    #[arg(long = "exclude-directory")]
    exclude_directories: Vec<String>,

    /// Subaccount name to keep ("All" for every subaccount)
    #[arg(long)]
    subaccount: Option<String>,

    /// Service name to keep ("All" for every service)
    #[arg(long)]
    service: Option<String>,
}

impl FilterArgs {
    fn into_config(self) -> Result<FilterConfig> {
        let mut config: FilterConfig = match &self.filter_file {
            Some(path) => {
                let file = std::fs::File::open(path)
                    .with_context(|| format!("opening filter file {}", path.display()))?;
                serde_json::from_reader(file)
                    .with_context(|| format!("parsing filter file {}", path.display()))?
            }
            None => FilterConfig::default(),
        };

        if let Some(period) = self.period {
            config.period = period.into();
        }
        if let (Some(start), Some(end)) = (self.start, self.end) {
            config.period = Period::Custom { start, end };
        }
        config.excluded_subaccounts.extend(self.exclude_subaccounts);
        config.excluded_directories.extend(self.exclude_directories);
        if self.subaccount.is_some() {
            config.subaccount = self.subaccount;
        }
        if self.service.is_some() {
            config.service = self.service;
        }
        Ok(config)
    }
}

#[derive(Debug, Deserialize)]
struct PipelineInput {
    records: Vec<Record>,
    #[serde(default)]
    filter: FilterConfig,
    #[serde(default)]
    include_records: bool,
}

#[derive(Debug, Serialize)]
struct AnomalyOutput {
    anomalies: Option<AnomalyReport>,
}

#[derive(Debug, Serialize)]
struct AggregateOutput {
    group_by: GroupBy,
    measure: Measure,
    statistic: Statistic,
    rows: Vec<GroupAggregate>,
}

#[derive(Debug, Serialize)]
struct QuotaOutput<'a> {
    quota: Option<QuotaAnalysis>,
    raw: &'a [QuotaRow],
}

fn main() {
    let args = Args::parse();
    if let Err(err) = run(args) {
        match err.downcast_ref::<costlens_core::Error>() {
            Some(e) => eprintln!("{}", e.user_message()),
            None => eprintln!("Error: {err:#}"),
        }
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    dotenvy::dotenv().ok();

    let mut settings = Settings::load(args.config.as_deref())?;
    if let Some(level) = args.log_level {
        settings.log_level = level;
    }
    if let Some(format) = args.log_format {
        settings.log_format = format;
    }
    init_tracing(&settings.log_level, settings.log_format);

    let pretty = args.pretty;
    match args.command {
        Command::Report {
            file,
            filter,
            include_records,
        } => {
            let store = load(&file, &settings)?;
            let filter = filter.into_config()?;
            let dashboard = Dashboard::build(&store, &filter, &settings.analysis, include_records);
            write_json(&dashboard, pretty)
        }
        Command::Anomalies {
            file,
            filter,
            group_by,
            measure,
            n,
        } => {
            let store = load(&file, &settings)?;
            let view = filter_records(&store, &filter.into_config()?);
            let n = n.unwrap_or(settings.analysis.anomaly_count);
            let anomalies = anomaly_report(&view, store.schema(), group_by, measure, n);
            if anomalies.is_none() {
                tracing::warn!(?group_by, ?measure, "column not present in this export; detector not run");
            }
            write_json(&AnomalyOutput { anomalies }, pretty)
        }
        Command::Aggregate {
            file,
            filter,
            group_by,
            measure,
            statistic,
            top,
            other,
        } => {
            let store = load(&file, &settings)?;
            let view = filter_records(&store, &filter.into_config()?);
            let mut rows = aggregate::aggregate(&view, group_by, measure, statistic);
            if let Some(n) = top {
                rows = if other {
                    top_n_with_other(rows, n)
                } else {
                    top_n(rows, n)
                };
            }
            write_json(
                &AggregateOutput {
                    group_by,
                    measure,
                    statistic,
                    rows,
                },
                pretty,
            )
        }
        Command::Quota { file } => {
            let store = load(&file, &settings)?;
            let raw = store.quota();
            let quota = (!raw.is_empty()).then(|| analyze_quota(raw));
            write_json(&QuotaOutput { quota, raw }, pretty)
        }
        Command::Export {
            file,
            filter,
            output,
        } => {
            let store = load(&file, &settings)?;
            let view = filter_records(&store, &filter.into_config()?);
            let file = std::fs::File::create(&output)
                .with_context(|| format!("creating {}", output.display()))?;
            write_csv(&view, io::BufWriter::new(file))?;
            tracing::info!(records = view.len(), output = %output.display(), "exported records");
            Ok(())
        }
        Command::Pipeline => {
            let input: PipelineInput =
                serde_json::from_reader(io::stdin()).context("reading pipeline input from stdin")?;
            let store = RecordStore::from_records(input.records);
            let dashboard = Dashboard::build(
                &store,
                &input.filter,
                &settings.analysis,
                input.include_records,
            );
            write_json(&dashboard, pretty)
        }
    }
}

fn load(path: &Path, settings: &Settings) -> Result<RecordStore> {
    Ok(load_path(path, &settings.input)?)
}

fn write_json<T: Serialize>(value: &T, pretty: bool) -> Result<()> {
    let stdout = io::stdout().lock();
    if pretty {
        serde_json::to_writer_pretty(stdout, value)?;
    } else {
        serde_json::to_writer(stdout, value)?;
    }
    println!();
    Ok(())
}

/// Logs go to stderr; stdout carries the result.
fn init_tracing(log_level: &str, format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(io::stderr))
            .init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().with_writer(io::stderr))
            .init(),
    }
}
