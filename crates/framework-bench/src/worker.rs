//! Worker: runs one benchmark for one implementation
//!
//! Timed benchmarks follow the same phase sequence in every iteration:
//!
//! ```text
//! navigate -> mark init -> init hook -> [gc] -> [throttle] -> mark run
//!   -> run hook -> [unthrottle] -> [gc] -> mark finished -> after hook -> mark after
//! ```
//!
//! CPU benchmarks reuse one browser session for all iterations and extract
//! every duration from a single trace at the end. Memory benchmarks open a
//! fresh session per iteration so heap left over from one iteration cannot
//! leak into the next. The startup benchmark hands the page to the audit
//! tool instead of driving it.

use tracing::{debug, info, instrument, warn};

use crate::audit::AuditTool;
use crate::catalog::{
    Benchmark, BenchmarkBehavior, BenchmarkKind, Catalog, ImplementationDescriptor, RunSamples,
    StepContext, TimedBenchmark,
};
use crate::config::RunOptions;
use crate::dom::Dom;
use crate::error::{Result, RunError, SoundnessError};
use crate::events::{collect_events, Phase};
use crate::extract::{cpu_durations, memory_samples, PaintWarning, StartupMetrics};
use crate::results::ResultWriter;
use crate::session::{Session, SessionFactory};
use crate::transport::{WorkerRequest, WorkerResponse};

/// Executes worker requests against sessions from `F` and audits from `A`
pub struct Worker<F, A> {
    factory: F,
    audit: A,
    custom: Vec<TimedBenchmark>,
}

impl<F, A> Worker<F, A>
where
    F: SessionFactory,
    A: AuditTool,
{
    pub fn new(factory: F, audit: A) -> Self {
        Self {
            factory,
            audit,
            custom: Vec::new(),
        }
    }

    /// Benchmarks added to (or replacing entries of) the standard suite
    pub fn with_benchmarks(mut self, custom: Vec<TimedBenchmark>) -> Self {
        self.custom = custom;
        self
    }

    /// Run the requested benchmark and report its outcome
    ///
    /// Errors during the run are reported in `error`; only a request the
    /// worker cannot act on is a `failure`.
    #[instrument(skip(self, request), fields(framework = %request.framework.name, benchmark = %request.benchmark_id))]
    pub async fn execute(&self, request: &WorkerRequest) -> WorkerResponse {
        let catalog = match Catalog::with_custom(&request.options, &self.custom) {
            Ok(catalog) => catalog,
            Err(e) => return WorkerResponse::failure(e.to_string()),
        };
        let Some(benchmark) = catalog.get(&request.benchmark_id) else {
            let unknown = RunError::UnknownBenchmark(request.benchmark_id.clone());
            return WorkerResponse::failure(unknown.to_string());
        };

        info!(
            "Benchmarking {} with {}",
            request.framework.full_name(),
            benchmark.id()
        );

        let mut warnings = Vec::new();
        let outcome = match benchmark.kind() {
            BenchmarkKind::Cpu => {
                self.run_cpu(&request.framework, benchmark, &request.options, &mut warnings)
                    .await
            }
            BenchmarkKind::Memory => {
                self.run_memory(&request.framework, benchmark, &request.options)
                    .await
            }
            BenchmarkKind::Startup => {
                self.run_startup(&request.framework, benchmark, &request.options)
                    .await
            }
        };

        match outcome {
            Ok(()) => {
                info!("Benchmark {} completed", benchmark.id());
                WorkerResponse::success(warnings)
            }
            Err(e) => {
                if e.is_technical() {
                    warn!("Benchmark {} aborted: {}", benchmark.id(), e);
                } else {
                    warn!("Benchmark {} produced unsound data: {}", benchmark.id(), e);
                }
                WorkerResponse::Completed {
                    error: Some(e.to_string()),
                    warnings,
                }
            }
        }
    }

    async fn run_cpu(
        &self,
        framework: &ImplementationDescriptor,
        benchmark: &Benchmark,
        options: &RunOptions,
        warnings: &mut Vec<String>,
    ) -> Result<()> {
        let iterations = options.iterations_for(BenchmarkKind::Cpu) as usize;
        let session = self.factory.open(options).await?;

        let measured = async {
            for i in 0..iterations {
                debug!("Iteration {}/{}", i + 1, iterations);
                drive_iteration(session.as_ref(), framework, benchmark.behavior(), options, false)
                    .await?;
            }
            let events = collect_events(session.as_ref()).await?;
            Ok::<_, RunError>(cpu_durations(
                &events,
                iterations,
                &options.extraction,
            )?)
        }
        .await;
        release(session.as_ref()).await;

        let extraction = measured?;
        warnings.extend(
            extraction
                .warnings
                .iter()
                .map(|w| paint_warning(framework, benchmark.id(), w)),
        );
        ResultWriter::new(options).persist(
            framework,
            benchmark.behavior(),
            &RunSamples::Timed(extraction.durations),
            iterations,
        )?;
        Ok(())
    }

    async fn run_memory(
        &self,
        framework: &ImplementationDescriptor,
        benchmark: &Benchmark,
        options: &RunOptions,
    ) -> Result<()> {
        let iterations = options.iterations_for(BenchmarkKind::Memory) as usize;
        let mut samples = Vec::with_capacity(iterations);

        for i in 0..iterations {
            debug!("Iteration {}/{}", i + 1, iterations);
            let session = self.factory.open(options).await?;

            let measured = async {
                drive_iteration(session.as_ref(), framework, benchmark.behavior(), options, true)
                    .await?;
                let events = collect_events(session.as_ref()).await?;
                Ok::<_, RunError>(memory_samples(&events)?)
            }
            .await;
            release(session.as_ref()).await;

            let values = measured?;
            match values.as_slice() {
                [value] => samples.push(*value),
                _ => {
                    return Err(SoundnessError::SampleCount {
                        result_kind: benchmark.id().to_string(),
                        expected: 1,
                        actual: values.len(),
                    }
                    .into())
                }
            }
        }

        ResultWriter::new(options).persist(
            framework,
            benchmark.behavior(),
            &RunSamples::Timed(samples),
            iterations,
        )?;
        Ok(())
    }

    async fn run_startup(
        &self,
        framework: &ImplementationDescriptor,
        benchmark: &Benchmark,
        options: &RunOptions,
    ) -> Result<()> {
        let iterations = options.iterations_for(BenchmarkKind::Startup) as usize;
        let url = options.url_for(framework);
        let mut reports = Vec::with_capacity(iterations);

        for i in 0..iterations {
            debug!("Audit {}/{} of {}", i + 1, iterations, url);
            let report = self.audit.audit(&url, options).await?;
            reports.push(StartupMetrics::from_report(&report));
        }

        ResultWriter::new(options).persist(
            framework,
            benchmark.behavior(),
            &RunSamples::Startup(reports),
            iterations,
        )?;
        Ok(())
    }
}

/// Drive one iteration through all phases; `force_gc` collects garbage
/// after the init hook and after the run hook
async fn drive_iteration(
    session: &dyn Session,
    framework: &ImplementationDescriptor,
    behavior: &dyn BenchmarkBehavior,
    options: &RunOptions,
    force_gc: bool,
) -> Result<()> {
    session.navigate(&options.url_for(framework)).await?;
    let dom = Dom::new(session, framework, options);
    let mut ctx = StepContext::default();

    session.mark(Phase::Init).await?;
    behavior.init(&dom, &mut ctx).await?;
    if force_gc {
        session.collect_garbage().await?;
    }

    let throttle = behavior.info().throttle;
    if let Some(rate) = throttle {
        debug!("CPU slowdown {}", rate);
        session.set_cpu_throttling(rate).await?;
    }
    session.mark(Phase::Run).await?;
    behavior.run(&dom, &mut ctx).await?;
    if throttle.is_some() && options.reset_throttle {
        debug!("Resetting CPU slowdown");
        session.set_cpu_throttling(1.0).await?;
    }

    if force_gc {
        session.collect_garbage().await?;
        let heap = session.used_heap_mb().await?;
        debug!("Used JS heap after run: {:.2}MB", heap);
    }

    session.mark(Phase::Finished).await?;
    behavior.after(&dom, &mut ctx).await?;
    session.mark(Phase::After).await?;
    Ok(())
}

/// Close a session, logging rather than propagating a failure to close
async fn release(session: &dyn Session) {
    if let Err(e) = session.close().await {
        warn!("Failed to close browser session: {}", e);
    }
}

fn paint_warning(
    framework: &ImplementationDescriptor,
    benchmark_id: &str,
    warning: &PaintWarning,
) -> String {
    format!(
        "For framework {} and benchmark {} the number of paint calls is higher than expected. \
         There were {} paints though at most {} are expected. Please consider re-running and check the results",
        framework.name, benchmark_id, warning.paints, warning.max_expected
    )
}
