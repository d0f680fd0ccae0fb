use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(ValueEnum, Debug, Clone, Copy)]
pub enum ReportFormat {
    Jsonl,
    Csv,
}

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct CliOptions {
    /// Data source directory to analyze
    #[arg(short, long)]
    pub input: PathBuf,

    /// Output directory for the run report
    #[arg(short, long, default_value = "./output")]
    pub output: PathBuf,

    /// Optional path to config file (YAML)
    #[arg(long)]
    pub config_path: Option<PathBuf>,

    /// Number of file worker threads (overrides config)
    #[arg(long)]
    pub workers: Option<usize>,

    /// Run report format
    #[arg(long, value_enum, default_value_t = ReportFormat::Jsonl)]
    pub report_format: ReportFormat,

    /// Disable modules by display name (comma-separated list)
    #[arg(long, value_delimiter = ',')]
    pub disable: Option<Vec<String>>,

    /// Skip unallocated-space items
    #[arg(long)]
    pub skip_unallocated: bool,

    /// Progress reporting interval, in seconds (overrides config)
    #[arg(long)]
    pub progress_interval_secs: Option<u64>,
}

pub fn parse() -> CliOptions {
    CliOptions::parse()
}
