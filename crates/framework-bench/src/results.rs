//! Result files
//!
//! Every completed run writes one JSON file per result kind into the
//! results directory, named `{full_name}_{result_kind_id}.json`.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::catalog::{BenchmarkBehavior, ImplementationDescriptor, ResultKind, RunSamples};
use crate::config::RunOptions;
use crate::error::{Result, SoundnessError};
use crate::stats::Summary;

/// Contents of one result file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultRecord {
    /// Full name of the implementation, including version and keyed flag
    pub framework: String,
    pub keyed: bool,
    /// Result kind id
    pub benchmark: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub median: f64,
    pub geometric_mean: f64,
    pub standard_deviation: f64,
    pub values: Vec<f64>,
}

impl ResultRecord {
    /// `None` when there are no values to summarize
    pub fn new(
        framework: &ImplementationDescriptor,
        kind: &ResultKind,
        values: Vec<f64>,
    ) -> Option<Self> {
        let summary = Summary::from_samples(&values)?;
        Some(Self {
            framework: framework.full_name(),
            keyed: framework.keyed,
            benchmark: kind.id.clone(),
            kind: kind.kind.result_type().to_string(),
            min: summary.min,
            max: summary.max,
            mean: summary.mean,
            median: summary.median,
            geometric_mean: summary.geometric_mean,
            standard_deviation: summary.std_dev,
            values,
        })
    }
}

pub fn result_file_name(full_name: &str, result_kind_id: &str) -> String {
    format!("{}_{}.json", full_name, result_kind_id)
}

/// Writes result files for completed runs
#[derive(Debug, Clone)]
pub struct ResultWriter {
    directory: PathBuf,
    enabled: bool,
}

impl ResultWriter {
    pub fn new(options: &RunOptions) -> Self {
        Self {
            directory: options.results_directory.clone(),
            enabled: options.write_results,
        }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Persist every result kind of a run
    ///
    /// A result kind is only written when it holds exactly `expected`
    /// values. Complete kinds are written even when another kind of the
    /// same run is incomplete; the first incomplete kind is then reported
    /// as the error. Returns the paths written.
    pub fn persist(
        &self,
        framework: &ImplementationDescriptor,
        benchmark: &dyn BenchmarkBehavior,
        samples: &RunSamples,
        expected: usize,
    ) -> Result<Vec<PathBuf>> {
        let mut written = Vec::new();
        let mut incomplete = None;

        if self.enabled {
            fs::create_dir_all(&self.directory)?;
        }

        for kind in benchmark.result_kinds() {
            let extracted = benchmark.extract_result(samples, &kind);
            let values: Vec<f64> = extracted.iter().flatten().copied().collect();

            if extracted.len() != expected || values.len() != expected {
                warn!(
                    "Result {} has {} of {} values, not persisted",
                    kind.id,
                    values.len(),
                    expected
                );
                incomplete.get_or_insert(SoundnessError::SampleCount {
                    result_kind: kind.id.clone(),
                    expected,
                    actual: values.len(),
                });
                continue;
            }

            let Some(record) = ResultRecord::new(framework, &kind, values) else {
                continue;
            };
            info!(
                "result {} min {} max {} mean {} median {} stddev {}",
                result_file_name(&record.framework, &kind.id),
                record.min,
                record.max,
                record.mean,
                record.median,
                record.standard_deviation
            );

            if self.enabled {
                let path = self
                    .directory
                    .join(result_file_name(&record.framework, &kind.id));
                let json = serde_json::to_string(&record).map_err(anyhow::Error::from)?;
                fs::write(&path, json)?;
                written.push(path);
            }
        }

        match incomplete {
            Some(error) => Err(error.into()),
            None => Ok(written),
        }
    }
}
