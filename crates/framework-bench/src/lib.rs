//! Benchmark harness for web UI frameworks
//!
//! Drives a real Chromium through the same table app implemented by many
//! frameworks and measures how long each interaction takes from the click
//! to the last paint, how much JS heap is left after it, and how fast the
//! page starts up.
//!
//! # Pipeline
//!
//! ```text
//! Orchestrator ──► WorkerTransport ──► Worker ──► Session + Dom (hooks)
//!      ▲                                  │
//!      │                                  ▼
//!  BatchReport ◄── WorkerResponse ◄── events ─► extract ─► stats ─► result files
//! ```
//!
//! # Example
//!
//! ```no_run
//! use framework_bench::audit::LighthouseCli;
//! use framework_bench::catalog::Catalog;
//! use framework_bench::orchestrator::{select_frameworks, Orchestrator};
//! use framework_bench::session::ChromiumFactory;
//! use framework_bench::transport::InProcessTransport;
//! use framework_bench::{Config, OutputFormat, Reporter, Worker};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::from_file("bench.toml")?;
//! let catalog = Catalog::with_custom(&config.run, &config.benchmarks)?;
//!
//! let worker = Worker::new(ChromiumFactory, LighthouseCli::default())
//!     .with_benchmarks(config.benchmarks.clone());
//! let orchestrator = Orchestrator::new(
//!     InProcessTransport::new(worker),
//!     config.orchestrator.clone(),
//!     config.run.clone(),
//! );
//!
//! let frameworks = select_frameworks(&config.frameworks, &[]);
//! let benchmarks = catalog.select(&["01_".to_string()]);
//! let report = orchestrator.run_batch(&frameworks, &benchmarks).await?;
//! Reporter::new(OutputFormat::Console).report(&report)?;
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod catalog;
pub mod config;
pub mod dom;
pub mod error;
pub mod events;
pub mod extract;
pub mod orchestrator;
pub mod reporter;
pub mod results;
pub mod session;
pub mod stats;
pub mod throttling;
pub mod transport;
pub mod worker;

pub use config::{Config, RunOptions};
pub use error::{RunError, SessionError, SoundnessError};
pub use orchestrator::{BatchReport, Orchestrator};
pub use reporter::{OutputFormat, Reporter};
pub use worker::Worker;
