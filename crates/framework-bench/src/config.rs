//! Configuration for benchmark batches
//!
//! A batch is described by a TOML file with a `[run]` table (options handed
//! to every worker invocation), an `[orchestrator]` table (retry and
//! isolation policy), the implementations to drive and optional custom
//! benchmarks expressed in the step language.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::catalog::{BenchmarkKind, ImplementationDescriptor, TimedBenchmark};

/// Main configuration structure loaded from TOML files
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Options passed to every worker invocation
    #[serde(default)]
    pub run: RunOptions,
    /// Retry and isolation policy
    #[serde(default)]
    pub orchestrator: OrchestratorOptions,
    /// Implementations to benchmark
    #[serde(default)]
    pub frameworks: Vec<ImplementationDescriptor>,
    /// Custom timed benchmarks, appended to (or replacing) the standard suite
    #[serde(default)]
    pub benchmarks: Vec<TimedBenchmark>,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The file cannot be read
    /// - The TOML is malformed
    /// - A custom benchmark declares the startup kind
    ///
    /// # Example
    ///
    /// ```no_run
    /// use framework_bench::config::Config;
    ///
    /// # fn example() -> anyhow::Result<()> {
    /// let config = Config::from_file("bench.toml")?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_str(&content)
    }

    /// Parse configuration from a TOML string
    ///
    /// # Example
    ///
    /// ```
    /// use framework_bench::config::Config;
    ///
    /// # fn example() -> anyhow::Result<()> {
    /// let toml = r#"
    ///     [run]
    ///     repeat_run = 3
    ///
    ///     [[frameworks]]
    ///     name = "vanillajs"
    ///     uri = "frameworks/keyed/vanillajs"
    ///     keyed = true
    /// "#;
    /// let config = Config::from_str(toml)?;
    /// assert_eq!(config.run.repeat_run, 3);
    /// # Ok(())
    /// # }
    /// ```
    pub fn from_str(s: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(s).context("Failed to parse TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        for benchmark in &self.benchmarks {
            if benchmark.info.kind == BenchmarkKind::Startup {
                anyhow::bail!(
                    "Custom benchmark '{}' cannot use the startup kind",
                    benchmark.info.id
                );
            }
        }
        if self.orchestrator.max_attempts == 0 {
            anyhow::bail!("orchestrator.max_attempts must be at least 1");
        }
        Ok(())
    }
}

/// Options handed to every worker invocation
///
/// Constructed once per batch and copied into each request; a worker never
/// mutates the options it receives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunOptions {
    /// Iterations for CPU benchmarks (default: 10)
    #[serde(default = "default_repeat_run")]
    pub repeat_run: u32,
    /// Iterations for memory benchmarks (default: 5)
    #[serde(default = "default_repeat_run_mem")]
    pub repeat_run_mem: u32,
    /// Iterations for startup benchmarks (default: 4)
    #[serde(default = "default_repeat_run_startup")]
    pub repeat_run_startup: u32,
    /// Warm-up interactions performed by init hooks (default: 5)
    #[serde(default = "default_warmup_count")]
    pub warmup_count: u32,
    /// Port of the local HTTP server serving the implementations
    #[serde(default = "default_port")]
    pub port: u16,
    /// Remote debugging port used by the audit tool's browser
    #[serde(default = "default_remote_debugging_port")]
    pub remote_debugging_port: u16,
    /// Run the browser without a window
    #[serde(default)]
    pub headless: bool,
    /// Explicit browser executable, auto-detected when absent
    #[serde(default)]
    pub chrome_binary: Option<PathBuf>,
    /// Timeout for waits inside run hooks
    #[serde(default = "default_timeout", with = "duration_ms")]
    pub timeout: Duration,
    /// Timeout for the first element an init hook waits for
    #[serde(default = "default_short_timeout", with = "duration_ms")]
    pub short_timeout: Duration,
    /// Interval between predicate polls
    #[serde(default = "default_poll_interval", with = "duration_ms")]
    pub poll_interval: Duration,
    /// Return the CPU throttle to 1x after each run hook
    #[serde(default = "default_true")]
    pub reset_throttle: bool,
    /// Persist result files
    #[serde(default = "default_true")]
    pub write_results: bool,
    /// Directory receiving result files
    #[serde(default = "default_results_directory")]
    pub results_directory: PathBuf,
    /// Event-count thresholds for timing extraction
    #[serde(default)]
    pub extraction: ExtractionLimits,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            repeat_run: default_repeat_run(),
            repeat_run_mem: default_repeat_run_mem(),
            repeat_run_startup: default_repeat_run_startup(),
            warmup_count: default_warmup_count(),
            port: default_port(),
            remote_debugging_port: default_remote_debugging_port(),
            headless: false,
            chrome_binary: None,
            timeout: default_timeout(),
            short_timeout: default_short_timeout(),
            poll_interval: default_poll_interval(),
            reset_throttle: true,
            write_results: true,
            results_directory: default_results_directory(),
            extraction: ExtractionLimits::default(),
        }
    }
}

impl RunOptions {
    /// Override the iteration count.
    ///
    /// CPU benchmarks take `count` as is; memory and startup benchmarks never
    /// exceed their configured counts since each of their iterations is far
    /// more expensive.
    pub fn with_count(mut self, count: u32) -> Self {
        self.repeat_run = count;
        self.repeat_run_mem = count.min(self.repeat_run_mem);
        self.repeat_run_startup = count.min(self.repeat_run_startup);
        self
    }

    /// Number of measured iterations for a benchmark kind
    pub fn iterations_for(&self, kind: BenchmarkKind) -> u32 {
        match kind {
            BenchmarkKind::Cpu => self.repeat_run,
            BenchmarkKind::Memory => self.repeat_run_mem,
            BenchmarkKind::Startup => self.repeat_run_startup,
        }
    }

    /// URL of an implementation on the local server
    pub fn url_for(&self, framework: &ImplementationDescriptor) -> String {
        format!(
            "http://localhost:{}/{}/index.html",
            self.port,
            framework.uri.trim_matches('/')
        )
    }
}

fn default_repeat_run() -> u32 {
    10
}

fn default_repeat_run_mem() -> u32 {
    5
}

fn default_repeat_run_startup() -> u32 {
    4
}

fn default_warmup_count() -> u32 {
    5
}

fn default_port() -> u16 {
    8080
}

fn default_remote_debugging_port() -> u16 {
    9999
}

fn default_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_short_timeout() -> Duration {
    Duration::from_secs(20)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(100)
}

fn default_true() -> bool {
    true
}

fn default_results_directory() -> PathBuf {
    PathBuf::from("results")
}

/// Event-count thresholds applied to each CPU run window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionLimits {
    /// Click events required in a window (default: 1)
    #[serde(default = "default_expected_clicks")]
    pub expected_clicks: usize,
    /// Paints after the click above which a warning is raised (default: 2)
    #[serde(default = "default_max_expected_paints")]
    pub max_expected_paints: usize,
}

impl Default for ExtractionLimits {
    fn default() -> Self {
        Self {
            expected_clicks: default_expected_clicks(),
            max_expected_paints: default_max_expected_paints(),
        }
    }
}

fn default_expected_clicks() -> usize {
    1
}

fn default_max_expected_paints() -> usize {
    2
}

/// Retry and isolation policy of the orchestrator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestratorOptions {
    /// Attempts per (implementation, benchmark) pair (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Abort the whole batch on the first recorded error
    #[serde(default)]
    pub exit_on_error: bool,
    /// Run every attempt in a freshly spawned worker process
    #[serde(default = "default_true")]
    pub fork_worker: bool,
    /// Hard limit for one isolated worker process
    #[serde(default = "default_worker_timeout", with = "duration_ms")]
    pub worker_timeout: Duration,
    /// Failure messages that mark an attempt as flaky and retryable
    #[serde(default = "default_flaky_signatures")]
    pub flaky_signatures: Vec<String>,
}

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            exit_on_error: false,
            fork_worker: true,
            worker_timeout: default_worker_timeout(),
            flaky_signatures: default_flaky_signatures(),
        }
    }
}

fn default_max_attempts() -> u32 {
    5
}

fn default_worker_timeout() -> Duration {
    Duration::from_secs(600)
}

fn default_flaky_signatures() -> Vec<String> {
    vec!["Server terminated early with status 1".to_string()]
}

/// Serde module for serializing/deserializing Duration as milliseconds
pub(crate) mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

/// Same as [`duration_ms`] for optional fields
pub(crate) mod option_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = Option::<u64>::deserialize(deserializer)?;
        Ok(ms.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let config = Config::from_str("").unwrap();
        assert_eq!(config.run, RunOptions::default());
        assert_eq!(config.orchestrator, OrchestratorOptions::default());
        assert!(config.frameworks.is_empty());
        assert!(config.benchmarks.is_empty());
    }

    #[test]
    fn test_default_values() {
        let run = RunOptions::default();
        assert_eq!(run.repeat_run, 10);
        assert_eq!(run.repeat_run_mem, 5);
        assert_eq!(run.repeat_run_startup, 4);
        assert_eq!(run.warmup_count, 5);
        assert_eq!(run.port, 8080);
        assert_eq!(run.remote_debugging_port, 9999);
        assert_eq!(run.timeout, Duration::from_secs(60));
        assert_eq!(run.short_timeout, Duration::from_secs(20));
        assert!(run.write_results);
        assert_eq!(run.results_directory, PathBuf::from("results"));
        assert_eq!(run.extraction.expected_clicks, 1);
        assert_eq!(run.extraction.max_expected_paints, 2);

        let orchestrator = OrchestratorOptions::default();
        assert_eq!(orchestrator.max_attempts, 5);
        assert!(!orchestrator.exit_on_error);
        assert!(orchestrator.fork_worker);
        assert_eq!(
            orchestrator.flaky_signatures,
            vec!["Server terminated early with status 1".to_string()]
        );
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r##"
            [run]
            repeat_run = 3
            headless = true
            timeout = 5000
            results_directory = "/tmp/results"

            [run.extraction]
            max_expected_paints = 3

            [orchestrator]
            max_attempts = 2
            exit_on_error = true
            fork_worker = false

            [[frameworks]]
            name = "vanillajs"
            uri = "frameworks/keyed/vanillajs"
            keyed = true

            [[frameworks]]
            name = "lit"
            uri = "frameworks/non-keyed/lit"
            keyed = false
            version = "2.0.0"
            use_shadow_root = true

            [[benchmarks]]
            id = "50_add-one"
            label = "add one"
            kind = "cpu"
            throttle = 2.0
            init = [{ type = "wait_for_id", id = "add" }]
            run = [
                { type = "click_id", id = "add" },
                { type = "wait_for_path", path = "//tbody/tr[1]" },
            ]
        "##;

        let config = Config::from_str(toml).unwrap();
        assert_eq!(config.run.repeat_run, 3);
        assert!(config.run.headless);
        assert_eq!(config.run.timeout, Duration::from_millis(5000));
        assert_eq!(config.run.extraction.max_expected_paints, 3);
        assert_eq!(config.run.extraction.expected_clicks, 1);
        assert_eq!(config.orchestrator.max_attempts, 2);
        assert!(config.orchestrator.exit_on_error);
        assert!(!config.orchestrator.fork_worker);
        assert_eq!(config.frameworks.len(), 2);
        assert!(config.frameworks[1].use_shadow_root);
        assert_eq!(config.benchmarks.len(), 1);
        assert_eq!(config.benchmarks[0].info.throttle, Some(2.0));
        assert_eq!(config.benchmarks[0].run.len(), 2);
    }

    #[test]
    fn test_rejects_custom_startup_benchmark() {
        let toml = r#"
            [[benchmarks]]
            id = "99_startup"
            label = "startup"
            kind = "startup"
        "#;

        let err = Config::from_str(toml).unwrap_err();
        assert!(err.to_string().contains("startup kind"));
    }

    #[test]
    fn test_rejects_zero_attempts() {
        let toml = r#"
            [orchestrator]
            max_attempts = 0
        "#;

        assert!(Config::from_str(toml).is_err());
    }

    #[test]
    fn test_with_count_caps_expensive_kinds() {
        let run = RunOptions::default().with_count(2);
        assert_eq!(run.iterations_for(BenchmarkKind::Cpu), 2);
        assert_eq!(run.iterations_for(BenchmarkKind::Memory), 2);
        assert_eq!(run.iterations_for(BenchmarkKind::Startup), 2);

        let run = RunOptions::default().with_count(25);
        assert_eq!(run.iterations_for(BenchmarkKind::Cpu), 25);
        assert_eq!(run.iterations_for(BenchmarkKind::Memory), 5);
        assert_eq!(run.iterations_for(BenchmarkKind::Startup), 4);
    }

    #[test]
    fn test_with_count_respects_configured_caps() {
        let toml = r#"
[run]
repeat_run_mem = 10
repeat_run_startup = 10
"#;
        let config = Config::from_str(toml).unwrap();

        let run = config.run.clone().with_count(8);
        assert_eq!(run.iterations_for(BenchmarkKind::Cpu), 8);
        assert_eq!(run.iterations_for(BenchmarkKind::Memory), 8);
        assert_eq!(run.iterations_for(BenchmarkKind::Startup), 8);

        let run = config.run.with_count(12);
        assert_eq!(run.iterations_for(BenchmarkKind::Memory), 10);
        assert_eq!(run.iterations_for(BenchmarkKind::Startup), 10);
    }

    #[test]
    fn test_url_for_framework() {
        let framework = ImplementationDescriptor::new("vanillajs", "/frameworks/keyed/vanillajs/", true);
        let run = RunOptions::default();
        assert_eq!(
            run.url_for(&framework),
            "http://localhost:8080/frameworks/keyed/vanillajs/index.html"
        );
    }

    #[test]
    fn test_run_options_json_roundtrip_keeps_millis() {
        let run = RunOptions {
            poll_interval: Duration::from_millis(25),
            ..RunOptions::default()
        };
        let json = serde_json::to_string(&run).unwrap();
        assert!(json.contains("\"poll_interval\":25"));
        let back: RunOptions = serde_json::from_str(&json).unwrap();
        assert_eq!(back, run);
    }
}
