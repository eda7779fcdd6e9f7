//! Output formatting for CLI

use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

use hubtest_common::{JobEntry, Outcome, RunReport, TestUnit};

/// Output format
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// Plain text format
    Plain,
}

/// Trait for items that can be displayed in a table
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
}

impl TableDisplay for Outcome {
    fn headers() -> Vec<&'static str> {
        vec!["UNIT", "STAGE", "PHASE", "ERROR", "DURATION"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.unit.clone(),
            self.stage.clone().unwrap_or_else(|| "-".to_string()),
            if self.extended { "extended" } else { "local" }.to_string(),
            self.error.clone().unwrap_or_default(),
            format_duration(self.duration_ms),
        ]
    }
}

/// Row shape for `hubtest list`
#[derive(Debug, Serialize)]
pub struct UnitRow {
    unit: String,
    hub_ref: String,
    port: u16,
    setup_compose: bool,
    cloud: bool,
}

impl From<&TestUnit> for UnitRow {
    fn from(unit: &TestUnit) -> Self {
        Self {
            unit: unit.id(),
            hub_ref: unit.hub_ref(),
            port: unit.config.port,
            setup_compose: unit.config.setup_compose_file_path.is_some(),
            cloud: unit.config.run_cloud_tests,
        }
    }
}

impl TableDisplay for UnitRow {
    fn headers() -> Vec<&'static str> {
        vec!["UNIT", "HUB REF", "PORT", "SETUP", "CLOUD"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.unit.clone(),
            self.hub_ref.clone(),
            self.port.to_string(),
            self.setup_compose.to_string(),
            self.cloud.to_string(),
        ]
    }
}

/// Print a list of items
pub fn print_list<T: Serialize + TableDisplay>(items: &[T], format: OutputFormat) {
    if items.is_empty() {
        println!("No items found.");
        return;
    }

    match format {
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic);

            table.set_header(T::headers());
            for item in items {
                table.add_row(item.row());
            }

            println!("{table}");
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(items).unwrap_or_default());
        }
        OutputFormat::Plain => {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    println!("---");
                }
                let row = item.row();
                for (header, value) in T::headers().iter().zip(row.iter()) {
                    println!("{}: {}", header, value);
                }
            }
        }
    }
}

/// Print the units a discovery pass resolved, without running them.
///
/// JSON output is the job-list shape, so it can be fed straight back in
/// through `hubtest jobs`.
pub fn print_units(units: &[TestUnit], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let entries: Vec<JobEntry> = units.iter().map(JobEntry::from_unit).collect();
            println!("{}", serde_json::to_string_pretty(&entries).unwrap_or_default());
        }
        _ => {
            let rows: Vec<UnitRow> = units.iter().map(UnitRow::from).collect();
            print_list(&rows, format);
        }
    }
}

/// Print the final run report
pub fn print_report(report: &RunReport, format: OutputFormat) {
    if matches!(format, OutputFormat::Json) {
        println!("{}", serde_json::to_string_pretty(report).unwrap_or_default());
        return;
    }

    println!();
    for unit in &report.passed {
        println!("{} {}", "PASS".green().bold(), unit);
    }
    for unit in &report.skipped {
        println!("{} {}", "SKIP".yellow().bold(), unit);
    }
    for outcome in &report.failed {
        println!("{} {}", "FAIL".red().bold(), outcome.unit);
    }

    if !report.failed.is_empty() {
        println!();
        print_list(&report.failed, format);
    }

    println!();
    let summary = format!(
        "{} of {} unit(s) passed, {} failed, {} skipped in {}",
        report.passed.len(),
        report.total,
        report.failed.len(),
        report.skipped.len(),
        format_duration(report.duration_ms),
    );
    if report.is_success() {
        print_success(&summary);
    } else {
        print_error(&summary);
    }
}

/// Print success message
pub fn print_success(message: &str) {
    println!("✅ {}", message);
}

/// Print error message
pub fn print_error(message: &str) {
    eprintln!("❌ {}", message);
}

/// Print warning message
pub fn print_warning(message: &str) {
    println!("⚠️  {}", message);
}

/// Print info message
pub fn print_info(message: &str) {
    println!("ℹ️  {}", message);
}

fn format_duration(ms: u64) -> String {
    if ms >= 60_000 {
        format!("{}m{:02}s", ms / 60_000, (ms % 60_000) / 1000)
    } else if ms >= 1000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else {
        format!("{}ms", ms)
    }
}
