//! Worker invocation
//!
//! The orchestrator hands each attempt to a [`WorkerTransport`]. The
//! in-process transport calls the worker directly; the process transport
//! re-executes the runner binary in worker mode so that a browser crash
//! cannot take the orchestrator down with it.
//!
//! The process protocol is one JSON request line on the child's stdin and
//! one JSON response line on its stdout. All logging goes to stderr.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tracing::{debug, error, info, instrument, warn};

use crate::audit::AuditTool;
use crate::catalog::ImplementationDescriptor;
use crate::config::RunOptions;
use crate::session::SessionFactory;
use crate::worker::Worker;

/// One attempt of one (implementation, benchmark) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerRequest {
    pub framework: ImplementationDescriptor,
    pub benchmark_id: String,
    pub options: RunOptions,
}

/// Outcome of one attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WorkerResponse {
    /// The worker could not run at all
    Failure { failure: String },
    /// The run happened; `error` is set when it did not succeed
    ///
    /// `warnings` is always on the wire, so an object that is neither shape
    /// fails to decode instead of passing for a clean run.
    Completed {
        error: Option<String>,
        warnings: Vec<String>,
    },
}

impl WorkerResponse {
    pub fn failure(message: impl Into<String>) -> Self {
        WorkerResponse::Failure {
            failure: message.into(),
        }
    }

    pub fn success(warnings: Vec<String>) -> Self {
        WorkerResponse::Completed {
            error: None,
            warnings,
        }
    }
}

/// How the orchestrator reaches a worker
#[async_trait]
pub trait WorkerTransport: Send + Sync {
    async fn dispatch(&self, request: &WorkerRequest) -> WorkerResponse;
}

/// Runs the worker on the orchestrator's runtime
///
/// Each attempt runs in its own task so a panic is reported as a failure.
pub struct InProcessTransport<F, A> {
    worker: Arc<Worker<F, A>>,
}

impl<F, A> InProcessTransport<F, A> {
    pub fn new(worker: Worker<F, A>) -> Self {
        Self {
            worker: Arc::new(worker),
        }
    }
}

#[async_trait]
impl<F, A> WorkerTransport for InProcessTransport<F, A>
where
    F: SessionFactory + 'static,
    A: AuditTool + 'static,
{
    async fn dispatch(&self, request: &WorkerRequest) -> WorkerResponse {
        let worker = Arc::clone(&self.worker);
        let request = request.clone();
        match tokio::spawn(async move { worker.execute(&request).await }).await {
            Ok(response) => response,
            Err(e) => WorkerResponse::failure(format!("worker task failed: {}", e)),
        }
    }
}

/// Runs each attempt in a child process
#[derive(Debug, Clone)]
pub struct ProcessTransport {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl ProcessTransport {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
        }
    }

    async fn run_child(&self, request: &WorkerRequest) -> Result<WorkerResponse, String> {
        let line = serde_json::to_string(request).map_err(|e| e.to_string())?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| format!("failed to spawn worker {}: {}", self.program.display(), e))?;
        debug!("Spawned worker process {:?}", child.id());

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(format!("{}\n", line).as_bytes())
                .await
                .map_err(|e| format!("failed to send request to worker: {}", e))?;
        }

        // Dropping the future on timeout drops the child, which kills it
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| format!("worker killed after {:?} timeout", self.timeout))?
            .map_err(|e| format!("failed to wait for worker: {}", e))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        match stdout.lines().rev().find(|l| !l.trim().is_empty()) {
            Some(last) => serde_json::from_str(last)
                .map_err(|e| format!("unreadable worker response: {}", e)),
            None => Err(format!(
                "worker exited with {} without a response",
                output.status
            )),
        }
    }
}

#[async_trait]
impl WorkerTransport for ProcessTransport {
    #[instrument(skip(self, request), fields(benchmark = %request.benchmark_id))]
    async fn dispatch(&self, request: &WorkerRequest) -> WorkerResponse {
        match self.run_child(request).await {
            Ok(response) => response,
            Err(message) => {
                warn!("Worker process failed: {}", message);
                WorkerResponse::failure(message)
            }
        }
    }
}

/// Read one request line; `None` at end of input
pub async fn read_request<R: AsyncBufRead + Unpin>(
    reader: &mut R,
) -> anyhow::Result<Option<WorkerRequest>> {
    let mut line = String::new();
    if reader.read_line(&mut line).await? == 0 || line.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(serde_json::from_str(line.trim())?))
}

pub fn write_response<W: Write>(writer: &mut W, response: &WorkerResponse) -> anyhow::Result<()> {
    let body = serde_json::to_string(response)?;
    writeln!(writer, "{}", body)?;
    writer.flush()?;
    Ok(())
}

/// Child side of the process transport: answer one request from stdin
pub async fn serve_stdio<F, A>(worker: Worker<F, A>) -> anyhow::Result<()>
where
    F: SessionFactory + 'static,
    A: AuditTool + 'static,
{
    let mut stdin = BufReader::new(tokio::io::stdin());
    let request = read_request(&mut stdin).await?;

    let response = match request {
        Some(request) => {
            info!(
                "Worker started for {} and benchmark {}",
                request.framework.full_name(),
                request.benchmark_id
            );
            InProcessTransport::new(worker).dispatch(&request).await
        }
        None => {
            error!("No request received on stdin");
            WorkerResponse::failure("no request received")
        }
    };

    let stdout = std::io::stdout();
    let mut lock = stdout.lock();
    write_response(&mut lock, &response)
}
