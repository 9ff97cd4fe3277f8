//! Page audits for the startup benchmark

use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, instrument};

use crate::config::RunOptions;
use crate::error::{Result, RunError};

/// Chrome flags for the audited browser
const AUDIT_CHROME_FLAGS: &[&str] = &[
    "--headless",
    "--no-sandbox",
    "--no-first-run",
    "--enable-automation",
    "--disable-infobars",
    "--disable-background-networking",
    "--disable-background-timer-throttling",
    "--disable-cache",
    "--disable-translate",
    "--disable-sync",
    "--disable-extensions",
    "--disable-default-apps",
    "--window-size=1200,800",
];

/// External tool that loads a page and reports on it
#[async_trait]
pub trait AuditTool: Send + Sync {
    /// Audit `url` and return the tool's structured report
    async fn audit(&self, url: &str, options: &RunOptions) -> Result<Value>;
}

/// Runs the `lighthouse` command line tool
#[derive(Debug, Clone)]
pub struct LighthouseCli {
    program: PathBuf,
}

impl Default for LighthouseCli {
    fn default() -> Self {
        Self::new("lighthouse")
    }
}

impl LighthouseCli {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn args(url: &str, options: &RunOptions) -> Vec<String> {
        let mut chrome_flags: Vec<String> = AUDIT_CHROME_FLAGS.iter().map(|f| f.to_string()).collect();
        chrome_flags.push(format!(
            "--remote-debugging-port={}",
            options.remote_debugging_port
        ));

        vec![
            url.to_string(),
            "--output=json".to_string(),
            "--output-path=stdout".to_string(),
            "--quiet".to_string(),
            "--only-categories=performance".to_string(),
            format!("--port={}", options.remote_debugging_port),
            format!("--chrome-flags={}", chrome_flags.join(" ")),
        ]
    }
}

#[async_trait]
impl AuditTool for LighthouseCli {
    #[instrument(skip(self, options))]
    async fn audit(&self, url: &str, options: &RunOptions) -> Result<Value> {
        let mut command = Command::new(&self.program);
        command
            .args(Self::args(url, options))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(chrome) = &options.chrome_binary {
            command.env("CHROME_PATH", chrome);
        }

        let output = tokio::time::timeout(options.timeout, command.output())
            .await
            .map_err(|_| RunError::Timeout {
                description: format!("audit of {}", url),
                timeout: options.timeout,
            })?
            .map_err(|e| {
                RunError::Audit(format!("failed to run {}: {}", self.program.display(), e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RunError::Audit(format!(
                "{} exited with {}: {}",
                self.program.display(),
                output.status,
                stderr.trim()
            )));
        }

        debug!("Audit report is {} bytes", output.stdout.len());
        serde_json::from_slice(&output.stdout)
            .map_err(|e| RunError::Audit(format!("unreadable report: {}", e)))
    }
}
