//! Retrying orchestrator
//!
//! Walks every (implementation, benchmark) pair strictly one after the
//! other, hands each attempt to a [`WorkerTransport`] and applies the retry
//! and abort policy to the response.

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::catalog::{Benchmark, ImplementationDescriptor};
use crate::config::{OrchestratorOptions, RunOptions};
use crate::transport::{WorkerRequest, WorkerResponse, WorkerTransport};

/// How an attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptClass {
    Success,
    /// Failed with a known flaky signature; worth another attempt
    Flaky,
    /// The worker could not run
    TechnicalFailure,
    /// The run completed with an error
    RunFailed,
}

/// Classify a worker response against the known flaky signatures
pub fn classify(response: &WorkerResponse, flaky_signatures: &[String]) -> AttemptClass {
    let is_flaky = |message: &str| flaky_signatures.iter().any(|s| message.contains(s.as_str()));
    match response {
        WorkerResponse::Failure { failure } if is_flaky(failure) => AttemptClass::Flaky,
        WorkerResponse::Failure { .. } => AttemptClass::TechnicalFailure,
        WorkerResponse::Completed {
            error: Some(error), ..
        } if is_flaky(error) => AttemptClass::Flaky,
        WorkerResponse::Completed { error: Some(_), .. } => AttemptClass::RunFailed,
        WorkerResponse::Completed { error: None, .. } => AttemptClass::Success,
    }
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Exiting because of an error and exit on error is set: {0}")]
    Aborted(String),
}

/// Final state of one (implementation, benchmark) pair
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PairOutcome {
    pub framework: String,
    pub benchmark: String,
    pub attempts: u32,
    /// Errors and warnings of the last attempt
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub started_at: DateTime<Utc>,
    pub outcomes: Vec<PairOutcome>,
}

impl BatchReport {
    pub fn warnings(&self) -> impl Iterator<Item = &str> {
        self.outcomes
            .iter()
            .flat_map(|o| o.warnings.iter().map(String::as_str))
    }

    pub fn errors(&self) -> impl Iterator<Item = &str> {
        self.outcomes
            .iter()
            .flat_map(|o| o.errors.iter().map(String::as_str))
    }

    pub fn is_success(&self) -> bool {
        self.errors().next().is_none()
    }
}

/// Implementations whose full name contains any filter; all when no filter
/// is given
pub fn select_frameworks<'a>(
    all: &'a [ImplementationDescriptor],
    filters: &[String],
) -> Vec<&'a ImplementationDescriptor> {
    all.iter()
        .filter(|f| {
            filters.is_empty() || {
                let name = f.full_name();
                filters.iter().any(|filter| name.contains(filter.as_str()))
            }
        })
        .collect()
}

pub struct Orchestrator<T> {
    transport: T,
    options: OrchestratorOptions,
    run_options: RunOptions,
}

impl<T: WorkerTransport> Orchestrator<T> {
    pub fn new(transport: T, options: OrchestratorOptions, run_options: RunOptions) -> Self {
        Self {
            transport,
            options,
            run_options,
        }
    }

    /// Run the Cartesian product of `frameworks` and `benchmarks`
    ///
    /// # Errors
    ///
    /// Only when `exit_on_error` is set and a pair ends with an error. Flaky
    /// attempts are retried first and abort only once attempts run out.
    pub async fn run_batch(
        &self,
        frameworks: &[&ImplementationDescriptor],
        benchmarks: &[&Benchmark],
    ) -> Result<BatchReport, OrchestratorError> {
        let started_at = Utc::now();
        info!(
            "Frameworks that will be benchmarked: {:?}",
            frameworks.iter().map(|f| f.full_name()).collect::<Vec<_>>()
        );
        info!(
            "Benchmarks that will be run: {:?}",
            benchmarks.iter().map(|b| b.id()).collect::<Vec<_>>()
        );

        let mut outcomes = Vec::with_capacity(frameworks.len() * benchmarks.len());
        for framework in frameworks {
            for benchmark in benchmarks {
                outcomes.push(self.run_pair(framework, benchmark).await?);
            }
        }

        Ok(BatchReport {
            started_at,
            outcomes,
        })
    }

    #[instrument(skip_all, fields(framework = %framework.full_name(), benchmark = %benchmark.id()))]
    async fn run_pair(
        &self,
        framework: &ImplementationDescriptor,
        benchmark: &Benchmark,
    ) -> Result<PairOutcome, OrchestratorError> {
        let request = WorkerRequest {
            framework: framework.clone(),
            benchmark_id: benchmark.id().to_string(),
            options: self.run_options.clone(),
        };
        let mut outcome = PairOutcome {
            framework: framework.full_name(),
            benchmark: benchmark.id().to_string(),
            attempts: 0,
            errors: Vec::new(),
            warnings: Vec::new(),
        };

        while outcome.attempts < self.options.max_attempts {
            outcome.attempts += 1;
            outcome.errors.clear();
            outcome.warnings.clear();
            info!(
                "Executing benchmark {} and benchmark {} attempt #{}",
                framework.name,
                benchmark.id(),
                outcome.attempts
            );

            let response = self.transport.dispatch(&request).await;
            let class = classify(&response, &self.options.flaky_signatures);

            match response {
                WorkerResponse::Failure { failure } => {
                    let message = format!(
                        "Executing {} and benchmark {} failed with a technical error: {}",
                        framework.uri,
                        benchmark.id(),
                        failure
                    );
                    error!("{}", message);
                    outcome.errors.push(message);
                }
                WorkerResponse::Completed { error, warnings } => {
                    outcome.warnings = warnings;
                    if let Some(error) = error {
                        let message = format!(
                            "Executing {} and benchmark {} failed: {}",
                            framework.uri,
                            benchmark.id(),
                            error
                        );
                        error!("{}", message);
                        outcome.errors.push(message);
                    }
                }
            }

            let exhausted = outcome.attempts >= self.options.max_attempts;
            let fatal = match class {
                AttemptClass::Success => false,
                AttemptClass::Flaky => exhausted,
                AttemptClass::TechnicalFailure | AttemptClass::RunFailed => true,
            };
            if fatal && self.options.exit_on_error {
                let message = outcome.errors.first().cloned().unwrap_or_default();
                return Err(OrchestratorError::Aborted(message));
            }
            if class != AttemptClass::Flaky {
                break;
            }
            warn!("Known flaky error, retrying");
        }

        Ok(outcome)
    }
}
