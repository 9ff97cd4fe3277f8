//! Benchmark and implementation descriptors
//!
//! Benchmarks come in two shapes: timed interactions, whose hooks are
//! sequences of [`Step`]s executed against the page, and the startup audit,
//! which hands the page to an external auditing tool. Both expose the same
//! [`BenchmarkBehavior`] capability to the worker.

mod steps;
mod suite;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::RunOptions;
use crate::dom::Dom;
use crate::error::Result;
use crate::extract::{StartupMetric, StartupMetrics};

pub use steps::{execute_steps, Step, StepContext};
pub use suite::standard_suite;

/// What a benchmark measures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BenchmarkKind {
    /// Duration from click to last paint, in ms
    Cpu,
    /// JS heap after the run, in MB
    Memory,
    /// Metrics from a page audit
    Startup,
}

impl BenchmarkKind {
    /// Value of the `type` field in result files
    pub fn result_type(&self) -> &'static str {
        match self {
            BenchmarkKind::Cpu => "cpu",
            BenchmarkKind::Memory => "memory",
            BenchmarkKind::Startup => "startup",
        }
    }
}

impl fmt::Display for BenchmarkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.result_type())
    }
}

/// Identity of a benchmark
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkInfo {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub description: String,
    pub kind: BenchmarkKind,
    /// CPU slowdown applied during the run hook
    #[serde(default)]
    pub throttle: Option<f64>,
}

/// One result file produced by a benchmark
#[derive(Debug, Clone, PartialEq)]
pub struct ResultKind {
    pub id: String,
    pub label: String,
    pub description: String,
    pub kind: BenchmarkKind,
}

impl From<&BenchmarkInfo> for ResultKind {
    fn from(info: &BenchmarkInfo) -> Self {
        Self {
            id: info.id.clone(),
            label: info.label.clone(),
            description: info.description.clone(),
            kind: info.kind,
        }
    }
}

/// A web-UI implementation served by the local HTTP server
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImplementationDescriptor {
    pub name: String,
    /// Directory below the server root holding `index.html`
    pub uri: String,
    pub keyed: bool,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub use_shadow_root: bool,
    /// Element whose shadow root holds the app when `use_shadow_root` is set
    #[serde(default = "default_shadow_root_host")]
    pub shadow_root_host: String,
}

fn default_shadow_root_host() -> String {
    "main-element".to_string()
}

impl ImplementationDescriptor {
    pub fn new(name: impl Into<String>, uri: impl Into<String>, keyed: bool) -> Self {
        Self {
            name: name.into(),
            uri: uri.into(),
            keyed,
            version: None,
            use_shadow_root: false,
            shadow_root_host: default_shadow_root_host(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_shadow_root(mut self) -> Self {
        self.use_shadow_root = true;
        self
    }

    /// Unique name used for result files, e.g. `vanillajs-v1.0.0-keyed`
    pub fn full_name(&self) -> String {
        let version = self
            .version
            .as_deref()
            .map(|v| format!("-v{}", v))
            .unwrap_or_default();
        let keyed = if self.keyed { "keyed" } else { "non-keyed" };
        format!("{}{}-{}", self.name, version, keyed)
    }
}

/// Raw per-iteration output of a run, before it is split into result kinds
#[derive(Debug, Clone, PartialEq)]
pub enum RunSamples {
    Timed(Vec<f64>),
    Startup(Vec<StartupMetrics>),
}

/// Capability shared by every benchmark shape
#[async_trait]
pub trait BenchmarkBehavior: Send + Sync {
    fn info(&self) -> &BenchmarkInfo;

    /// Prepare the page; not measured
    async fn init(&self, dom: &Dom<'_>, ctx: &mut StepContext) -> Result<()>;

    /// The measured interaction
    async fn run(&self, dom: &Dom<'_>, ctx: &mut StepContext) -> Result<()>;

    /// Runs after the finished marker; not measured
    async fn after(&self, dom: &Dom<'_>, ctx: &mut StepContext) -> Result<()>;

    fn result_kinds(&self) -> Vec<ResultKind>;

    /// Values for one result kind, one per iteration; `None` marks a value
    /// the run could not provide
    fn extract_result(&self, samples: &RunSamples, kind: &ResultKind) -> Vec<Option<f64>>;
}

/// A benchmark driven by DOM interactions and measured from the trace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimedBenchmark {
    #[serde(flatten)]
    pub info: BenchmarkInfo,
    #[serde(default)]
    pub init: Vec<Step>,
    #[serde(default)]
    pub run: Vec<Step>,
    #[serde(default)]
    pub after: Vec<Step>,
}

#[async_trait]
impl BenchmarkBehavior for TimedBenchmark {
    fn info(&self) -> &BenchmarkInfo {
        &self.info
    }

    async fn init(&self, dom: &Dom<'_>, ctx: &mut StepContext) -> Result<()> {
        execute_steps(&self.init, dom, ctx).await
    }

    async fn run(&self, dom: &Dom<'_>, ctx: &mut StepContext) -> Result<()> {
        execute_steps(&self.run, dom, ctx).await
    }

    async fn after(&self, dom: &Dom<'_>, ctx: &mut StepContext) -> Result<()> {
        execute_steps(&self.after, dom, ctx).await
    }

    fn result_kinds(&self) -> Vec<ResultKind> {
        vec![ResultKind::from(&self.info)]
    }

    fn extract_result(&self, samples: &RunSamples, _kind: &ResultKind) -> Vec<Option<f64>> {
        match samples {
            RunSamples::Timed(values) => values.iter().copied().map(Some).collect(),
            RunSamples::Startup(_) => Vec::new(),
        }
    }
}

/// Result kinds of the startup audit
const STARTUP_RESULTS: &[(&str, &str, &str, StartupMetric)] = &[
    (
        "31_startup-ci",
        "consistently interactive",
        "a pessimistic TTI - when the CPU and network are both definitely very idle. (no more CPU tasks over 50ms)",
        StartupMetric::Interactive,
    ),
    (
        "32_startup-bt",
        "script bootup time",
        "the total ms required to parse/compile/evaluate all the page's scripts",
        StartupMetric::BootupTime,
    ),
    (
        "34_startup-totalbytes",
        "total kilobyte weight",
        "network transfer cost (post-compression) of all the resources loaded into the page.",
        StartupMetric::TotalKiloByteWeight,
    ),
];

/// Page load measured by an external audit tool
#[derive(Debug, Clone, PartialEq)]
pub struct StartupBenchmark {
    pub info: BenchmarkInfo,
}

impl StartupBenchmark {
    fn metric_for(kind: &ResultKind) -> Option<StartupMetric> {
        STARTUP_RESULTS
            .iter()
            .find(|(id, ..)| *id == kind.id)
            .map(|(.., metric)| *metric)
    }
}

#[async_trait]
impl BenchmarkBehavior for StartupBenchmark {
    fn info(&self) -> &BenchmarkInfo {
        &self.info
    }

    async fn init(&self, _dom: &Dom<'_>, _ctx: &mut StepContext) -> Result<()> {
        Ok(())
    }

    async fn run(&self, _dom: &Dom<'_>, _ctx: &mut StepContext) -> Result<()> {
        Ok(())
    }

    async fn after(&self, _dom: &Dom<'_>, _ctx: &mut StepContext) -> Result<()> {
        Ok(())
    }

    fn result_kinds(&self) -> Vec<ResultKind> {
        STARTUP_RESULTS
            .iter()
            .map(|(id, label, description, _)| ResultKind {
                id: id.to_string(),
                label: label.to_string(),
                description: description.to_string(),
                kind: BenchmarkKind::Startup,
            })
            .collect()
    }

    fn extract_result(&self, samples: &RunSamples, kind: &ResultKind) -> Vec<Option<f64>> {
        let (RunSamples::Startup(reports), Some(metric)) = (samples, Self::metric_for(kind)) else {
            return Vec::new();
        };
        reports.iter().map(|report| report.get(metric)).collect()
    }
}

/// The closed set of benchmark shapes
#[derive(Debug, Clone, PartialEq)]
pub enum Benchmark {
    Timed(TimedBenchmark),
    Startup(StartupBenchmark),
}

impl Benchmark {
    pub fn behavior(&self) -> &dyn BenchmarkBehavior {
        match self {
            Benchmark::Timed(b) => b,
            Benchmark::Startup(b) => b,
        }
    }

    pub fn info(&self) -> &BenchmarkInfo {
        self.behavior().info()
    }

    pub fn id(&self) -> &str {
        &self.info().id
    }

    pub fn kind(&self) -> BenchmarkKind {
        self.info().kind
    }
}

/// Ordered set of benchmarks known to a worker or orchestrator
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    benchmarks: Vec<Benchmark>,
}

impl Catalog {
    pub fn new(benchmarks: Vec<Benchmark>) -> Self {
        Self { benchmarks }
    }

    /// The standard suite followed by custom benchmarks; a custom benchmark
    /// replaces a standard one with the same id
    pub fn with_custom(options: &RunOptions, custom: &[TimedBenchmark]) -> Result<Self> {
        let mut benchmarks = standard_suite(options)?;
        for extra in custom {
            let replacement = Benchmark::Timed(extra.clone());
            match benchmarks.iter_mut().find(|b| b.id() == extra.info.id) {
                Some(existing) => *existing = replacement,
                None => benchmarks.push(replacement),
            }
        }
        Ok(Self { benchmarks })
    }

    pub fn get(&self, id: &str) -> Option<&Benchmark> {
        self.benchmarks.iter().find(|b| b.id() == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Benchmark> {
        self.benchmarks.iter()
    }

    pub fn len(&self) -> usize {
        self.benchmarks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.benchmarks.is_empty()
    }

    /// Benchmarks whose id contains any of the filters; all when no filter is given
    pub fn select(&self, filters: &[String]) -> Vec<&Benchmark> {
        self.benchmarks
            .iter()
            .filter(|b| {
                filters.is_empty() || {
                    let id = b.id().to_lowercase();
                    filters.iter().any(|f| id.contains(&f.to_lowercase()))
                }
            })
            .collect()
    }
}
