//! CPU throttling via Chrome DevTools Protocol
//!
//! Some benchmarks are measured on an artificially slowed CPU so that fast
//! operations (selecting a row, swapping two rows) produce durations large
//! enough to compare. The slowdown is set with
//! `Emulation.setCPUThrottlingRate` right before the run marker and removed
//! right after the run hook.

use anyhow::Result;
use chromiumoxide::cdp::browser_protocol::emulation::SetCpuThrottlingRateParams;
use chromiumoxide::Page;
use tracing::{debug, instrument};

/// CPU throttling controller
pub struct CpuThrottler;

impl CpuThrottler {
    /// Slow the page's CPU down by `rate` (2.0 = twice as slow)
    ///
    /// # Errors
    ///
    /// Fails for rates below 1.0 and when the protocol command is rejected.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use framework_bench::throttling::CpuThrottler;
    /// # use chromiumoxide::Page;
    ///
    /// # async fn example(page: &Page) -> anyhow::Result<()> {
    /// CpuThrottler::apply(page, 16.0).await?;
    /// # Ok(())
    /// # }
    /// ```
    #[instrument(skip(page), fields(rate = %rate))]
    pub async fn apply(page: &Page, rate: f64) -> Result<()> {
        Self::validate(rate)?;
        debug!("Applying {}x CPU slowdown", rate);
        Self::set_rate(page, rate).await
    }

    /// Run at full speed again
    #[instrument(skip(page))]
    pub async fn clear(page: &Page) -> Result<()> {
        debug!("Clearing CPU throttling");
        Self::set_rate(page, 1.0).await
    }

    /// Reject rates that would speed the CPU up
    pub fn validate(rate: f64) -> Result<()> {
        if rate.is_nan() || rate < 1.0 {
            anyhow::bail!("CPU throttling rate must be >= 1.0 (got {})", rate);
        }
        Ok(())
    }

    async fn set_rate(page: &Page, rate: f64) -> Result<()> {
        let params = SetCpuThrottlingRateParams::builder()
            .rate(rate)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to build CPU params: {}", e))?;

        page.execute(params).await?;
        Ok(())
    }
}
