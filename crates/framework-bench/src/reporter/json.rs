//! JSON batch reports

use anyhow::Result;

use crate::orchestrator::BatchReport;

pub struct JsonReporter;

impl JsonReporter {
    pub fn format(report: &BatchReport, pretty: bool) -> Result<String> {
        let output = if pretty {
            serde_json::to_string_pretty(report)?
        } else {
            serde_json::to_string(report)?
        };
        Ok(output)
    }
}
