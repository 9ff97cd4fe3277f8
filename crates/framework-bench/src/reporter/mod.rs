//! Batch reporting
//!
//! Formats a [`BatchReport`] for the terminal or as JSON.
//!
//! # Example
//!
//! ```no_run
//! use framework_bench::orchestrator::BatchReport;
//! use framework_bench::reporter::{OutputFormat, Reporter};
//!
//! # fn example(report: BatchReport) -> anyhow::Result<()> {
//! Reporter::new(OutputFormat::Console).report(&report)?;
//! # Ok(())
//! # }
//! ```

mod console;
mod json;

use anyhow::Result;
use std::fs;
use std::io::{self, Write};
use std::path::Path;

use crate::orchestrator::BatchReport;

pub use console::ConsoleReporter;
pub use json::JsonReporter;

/// Output format for batch reports
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OutputFormat {
    Json,
    JsonPretty,
    /// Warnings and failures as plain text
    #[default]
    Console,
}

pub struct Reporter {
    format: OutputFormat,
}

impl Reporter {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Print the report to stdout
    pub fn report(&self, report: &BatchReport) -> Result<()> {
        let output = self.format_report(report)?;
        print!("{}", output);
        io::stdout().flush()?;
        Ok(())
    }

    pub fn write_to_file<P: AsRef<Path>>(&self, report: &BatchReport, path: P) -> Result<()> {
        fs::write(path, self.format_report(report)?)?;
        Ok(())
    }

    pub fn format_report(&self, report: &BatchReport) -> Result<String> {
        match self.format {
            OutputFormat::Json => JsonReporter::format(report, false),
            OutputFormat::JsonPretty => JsonReporter::format(report, true),
            OutputFormat::Console => ConsoleReporter::format(report),
        }
    }
}

impl Default for Reporter {
    fn default() -> Self {
        Self::new(OutputFormat::default())
    }
}
