//! Retry and abort policy of the orchestrator
//!
//! Run with: cargo test -p framework-bench --test orchestrator_retry

use async_trait::async_trait;
use framework_bench::catalog::{Catalog, ImplementationDescriptor};
use framework_bench::config::OrchestratorOptions;
use framework_bench::orchestrator::{Orchestrator, OrchestratorError};
use framework_bench::transport::{WorkerRequest, WorkerResponse, WorkerTransport};
use framework_bench::RunOptions;
use pretty_assertions::assert_eq;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

const FLAKY: &str = "Server terminated early with status 1";

/// Plays back scripted responses; repeats the last one when the script runs out
#[derive(Clone)]
struct ScriptedTransport {
    responses: Arc<Mutex<VecDeque<WorkerResponse>>>,
    requests: Arc<Mutex<Vec<String>>>,
}

impl ScriptedTransport {
    fn new(responses: Vec<WorkerResponse>) -> Self {
        Self {
            responses: Arc::new(Mutex::new(responses.into())),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkerTransport for ScriptedTransport {
    async fn dispatch(&self, request: &WorkerRequest) -> WorkerResponse {
        self.requests.lock().unwrap().push(format!(
            "{}/{}",
            request.framework.full_name(),
            request.benchmark_id
        ));
        let mut responses = self.responses.lock().unwrap();
        if responses.len() > 1 {
            responses.pop_front().unwrap()
        } else {
            responses.front().cloned().unwrap()
        }
    }
}

fn frameworks() -> Vec<ImplementationDescriptor> {
    vec![
        ImplementationDescriptor::new("vanillajs", "frameworks/keyed/vanillajs", true),
        ImplementationDescriptor::new("react", "frameworks/keyed/react", true),
    ]
}

fn catalog() -> Catalog {
    Catalog::with_custom(&RunOptions::default(), &[]).unwrap()
}

fn orchestrator(
    transport: ScriptedTransport,
    exit_on_error: bool,
) -> Orchestrator<ScriptedTransport> {
    let options = OrchestratorOptions {
        exit_on_error,
        fork_worker: false,
        ..OrchestratorOptions::default()
    };
    Orchestrator::new(transport, options, RunOptions::default())
}

#[tokio::test]
async fn test_persistent_flaky_failure_exhausts_attempts() {
    let transport = ScriptedTransport::new(vec![WorkerResponse::failure(FLAKY)]);
    let frameworks = frameworks();
    let catalog = catalog();
    let benchmark = catalog.get("01_run1k").unwrap();

    let report = orchestrator(transport.clone(), false)
        .run_batch(&[&frameworks[0]], &[benchmark])
        .await
        .unwrap();

    assert_eq!(transport.requests().len(), 5);
    let outcome = &report.outcomes[0];
    assert_eq!(outcome.attempts, 5);
    // Only the last attempt's error survives
    assert_eq!(
        outcome.errors,
        vec![format!(
            "Executing frameworks/keyed/vanillajs and benchmark 01_run1k failed with a technical error: {}",
            FLAKY
        )]
    );
    assert!(!report.is_success());
}

#[tokio::test]
async fn test_flaky_then_success_keeps_no_error() {
    let transport = ScriptedTransport::new(vec![
        WorkerResponse::failure(FLAKY),
        WorkerResponse::failure(FLAKY),
        WorkerResponse::failure(FLAKY),
        WorkerResponse::success(vec!["slow paint".to_string()]),
    ]);
    let frameworks = frameworks();
    let catalog = catalog();
    let benchmark = catalog.get("01_run1k").unwrap();

    let report = orchestrator(transport.clone(), false)
        .run_batch(&[&frameworks[0]], &[benchmark])
        .await
        .unwrap();

    let outcome = &report.outcomes[0];
    assert_eq!(outcome.attempts, 4);
    assert!(outcome.errors.is_empty());
    assert_eq!(outcome.warnings, vec!["slow paint"]);
    assert!(report.is_success());
}

#[tokio::test]
async fn test_other_failures_are_not_retried() {
    let transport = ScriptedTransport::new(vec![
        WorkerResponse::Completed {
            error: Some("exactly 1 click event(s) expected in run window 0, found 0".to_string()),
            warnings: Vec::new(),
        },
        WorkerResponse::success(Vec::new()),
    ]);
    let frameworks = frameworks();
    let catalog = catalog();
    let benchmarks = [catalog.get("01_run1k").unwrap(), catalog.get("02_replace1k").unwrap()];

    let report = orchestrator(transport.clone(), false)
        .run_batch(&[&frameworks[0]], &benchmarks)
        .await
        .unwrap();

    assert_eq!(
        transport.requests(),
        vec!["vanillajs-keyed/01_run1k", "vanillajs-keyed/02_replace1k"]
    );
    assert_eq!(report.outcomes[0].attempts, 1);
    assert_eq!(
        report.outcomes[0].errors,
        vec!["Executing frameworks/keyed/vanillajs and benchmark 01_run1k failed: \
              exactly 1 click event(s) expected in run window 0, found 0"]
    );
    assert!(report.outcomes[1].errors.is_empty());
    assert_eq!(report.errors().count(), 1);
}

#[tokio::test]
async fn test_pairs_run_framework_major() {
    let transport = ScriptedTransport::new(vec![WorkerResponse::success(Vec::new())]);
    let frameworks = frameworks();
    let catalog = catalog();
    let benchmarks = [catalog.get("01_run1k").unwrap(), catalog.get("07_create10k").unwrap()];

    let report = orchestrator(transport.clone(), false)
        .run_batch(&[&frameworks[0], &frameworks[1]], &benchmarks)
        .await
        .unwrap();

    assert_eq!(
        transport.requests(),
        vec![
            "vanillajs-keyed/01_run1k",
            "vanillajs-keyed/07_create10k",
            "react-keyed/01_run1k",
            "react-keyed/07_create10k",
        ]
    );
    assert_eq!(report.outcomes.len(), 4);
    assert!(report.is_success());
}

#[tokio::test]
async fn test_exit_on_error_aborts_the_batch() {
    let transport = ScriptedTransport::new(vec![
        WorkerResponse::success(Vec::new()),
        WorkerResponse::Completed {
            error: Some("Timed out after 60s waiting for element #run".to_string()),
            warnings: Vec::new(),
        },
        WorkerResponse::success(Vec::new()),
    ]);
    let frameworks = frameworks();
    let catalog = catalog();
    let benchmarks = [catalog.get("01_run1k").unwrap(), catalog.get("02_replace1k").unwrap()];

    let err = orchestrator(transport.clone(), true)
        .run_batch(&[&frameworks[0], &frameworks[1]], &benchmarks)
        .await
        .unwrap_err();

    let OrchestratorError::Aborted(message) = err;
    assert!(message.contains("waiting for element #run"), "{}", message);
    // Nothing runs after the failing pair
    assert_eq!(transport.requests().len(), 2);
}

#[tokio::test]
async fn test_exit_on_error_still_retries_flaky_failures() {
    let transport = ScriptedTransport::new(vec![
        WorkerResponse::failure(FLAKY),
        WorkerResponse::failure(FLAKY),
        WorkerResponse::success(Vec::new()),
    ]);
    let frameworks = frameworks();
    let catalog = catalog();
    let benchmark = catalog.get("01_run1k").unwrap();

    let report = orchestrator(transport.clone(), true)
        .run_batch(&[&frameworks[0]], &[benchmark])
        .await
        .unwrap();

    assert_eq!(transport.requests().len(), 3);
    assert_eq!(report.outcomes[0].attempts, 3);
    assert!(report.is_success());
}

#[tokio::test]
async fn test_exit_on_error_aborts_when_flaky_failures_persist() {
    let transport = ScriptedTransport::new(vec![WorkerResponse::failure(FLAKY)]);
    let frameworks = frameworks();
    let catalog = catalog();
    let benchmarks = [catalog.get("01_run1k").unwrap(), catalog.get("02_replace1k").unwrap()];

    let err = orchestrator(transport.clone(), true)
        .run_batch(&[&frameworks[0]], &benchmarks)
        .await
        .unwrap_err();

    let OrchestratorError::Aborted(message) = err;
    assert!(message.contains(FLAKY), "{}", message);
    // All attempts of the first pair, nothing of the second
    assert_eq!(transport.requests().len(), 5);
}
