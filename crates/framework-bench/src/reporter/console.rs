//! Plain-text batch reports

use anyhow::Result;
use std::fmt::Write;

use crate::orchestrator::BatchReport;

const RULE: &str = "================================";

pub struct ConsoleReporter;

impl ConsoleReporter {
    /// Warnings first, then failures, then the overall status
    pub fn format(report: &BatchReport) -> Result<String> {
        let mut output = String::new();

        let warnings: Vec<&str> = report.warnings().collect();
        if !warnings.is_empty() {
            Self::section(&mut output, "The following warnings were logged:", &warnings)?;
        }

        let errors: Vec<&str> = report.errors().collect();
        if !errors.is_empty() {
            Self::section(&mut output, "The following benchmarks failed:", &errors)?;
        }

        let retried = report.outcomes.iter().filter(|o| o.attempts > 1).count();
        writeln!(
            output,
            "Ran {} benchmark(s) started at {} ({} retried)",
            report.outcomes.len(),
            report.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
            retried
        )?;
        if report.is_success() {
            writeln!(output, "successful run")?;
        } else {
            writeln!(output, "run was not completely successful")?;
        }
        Ok(output)
    }

    fn section(output: &mut String, title: &str, lines: &[&str]) -> Result<()> {
        writeln!(output, "{}", RULE)?;
        writeln!(output, "{}", title)?;
        writeln!(output, "{}", RULE)?;
        for line in lines {
            writeln!(output, "{}", line)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reporter::tests::create_test_report;

    #[test]
    fn test_warnings_come_before_failures() {
        let output = ConsoleReporter::format(&create_test_report()).unwrap();
        let warnings = output.find("The following warnings were logged:").unwrap();
        let failures = output.find("The following benchmarks failed:").unwrap();
        assert!(warnings < failures);
        assert!(output.contains("swap failed"));
        assert!(output.contains("1 retried"));
        assert!(output.ends_with("run was not completely successful\n"));
    }

    #[test]
    fn test_clean_report() {
        let mut report = create_test_report();
        report.outcomes.truncate(1);
        report.outcomes[0].warnings.clear();

        let output = ConsoleReporter::format(&report).unwrap();
        assert!(!output.contains(RULE));
        assert!(output.ends_with("successful run\n"));
    }
}
