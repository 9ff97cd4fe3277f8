//! Run window extraction
//!
//! A benchmark run leaves one flat, time-ordered stream of timing events
//! covering every iteration. Each iteration is bracketed by phase markers;
//! the part between `runBenchmark` and `finishedBenchmark` is its run
//! window and yields exactly one sample.
//!
//! CPU samples are the time from the click to the end of the last paint.
//! Memory samples are the heap size reported by the last major GC.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::ExtractionLimits;
use crate::error::SoundnessError;
use crate::events::{Phase, TimingEvent};

/// Split an event stream into run windows
///
/// Events before the first init marker belong to page load and are
/// ignored. A window is only produced when a finished marker closes it and
/// it holds something besides run markers. Each window starts at its run
/// marker.
pub fn run_windows(events: &[TimingEvent]) -> Vec<&[TimingEvent]> {
    let start = events
        .iter()
        .position(|e| e.is_marker(Phase::Init))
        .unwrap_or(events.len());
    let mut remaining = &events[start..];
    let mut windows = Vec::new();

    while !remaining.is_empty() {
        let Some(end) = remaining.iter().position(|e| e.is_marker(Phase::Finished)) else {
            break;
        };
        let candidate = &remaining[..end];
        if candidate.iter().any(|e| !e.is_marker(Phase::Run)) {
            let run_start = candidate
                .iter()
                .position(|e| e.is_marker(Phase::Run))
                .unwrap_or(candidate.len());
            windows.push(&candidate[run_start..]);
        }
        remaining = &remaining[end + 1..];
    }

    windows
}

/// More paints than expected were recorded in a run window
#[derive(Debug, Clone, PartialEq)]
pub struct PaintWarning {
    pub window: usize,
    pub paints: usize,
    pub max_expected: usize,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CpuExtraction {
    /// One duration per iteration, in ms
    pub durations: Vec<f64>,
    pub warnings: Vec<PaintWarning>,
}

/// Duration of one run window in ms, plus the number of paints it saw
fn window_duration(
    window: usize,
    events: &[TimingEvent],
    limits: &ExtractionLimits,
) -> Result<(f64, usize), SoundnessError> {
    let clicks: Vec<&TimingEvent> = events
        .iter()
        .filter(|e| matches!(e, TimingEvent::Click { .. }))
        .collect();
    if clicks.len() != limits.expected_clicks || clicks.is_empty() {
        return Err(SoundnessError::ClickCount {
            window,
            expected: limits.expected_clicks,
            found: clicks.len(),
        });
    }
    let click = clicks[0];

    let after_click = events
        .iter()
        .skip_while(|e| !matches!(e, TimingEvent::Click { .. }));
    let last_paint_end = after_click
        .filter(|e| matches!(e, TimingEvent::Paint { .. }))
        .fold(None, |max: Option<(f64, usize)>, paint| match max {
            Some((end, count)) => Some((end.max(paint.end()), count + 1)),
            None => Some((paint.end(), 1)),
        });
    let Some((paint_end, paints)) = last_paint_end else {
        return Err(SoundnessError::NoPaint { window });
    };

    let window_start = events.first().map(TimingEvent::ts).unwrap_or(click.ts());
    let window_end = events
        .iter()
        .map(TimingEvent::end)
        .fold(f64::NEG_INFINITY, f64::max);
    let span = (window_end - window_start) / 1000.0;
    let duration = (paint_end - click.ts()) / 1000.0;

    debug!(
        "Run window {}: duration {}ms, span {}ms, {} paint(s)",
        window, duration, span, paints
    );

    if duration < 0.0 {
        return Err(SoundnessError::NegativeDuration { window, duration });
    }
    if duration > span {
        return Err(SoundnessError::ExceedsWindow {
            window,
            duration,
            span,
        });
    }

    Ok((duration, paints))
}

/// Compute one click-to-paint duration per run window
///
/// Fails on the first window that violates a soundness check, and when the
/// number of windows differs from `expected`.
pub fn cpu_durations(
    events: &[TimingEvent],
    expected: usize,
    limits: &ExtractionLimits,
) -> Result<CpuExtraction, SoundnessError> {
    let mut extraction = CpuExtraction::default();

    for (window, window_events) in run_windows(events).into_iter().enumerate() {
        let (duration, paints) = window_duration(window, window_events, limits)?;
        if paints > limits.max_expected_paints {
            warn!(
                "Run window {} recorded {} paints, at most {} expected",
                window, paints, limits.max_expected_paints
            );
            extraction.warnings.push(PaintWarning {
                window,
                paints,
                max_expected: limits.max_expected_paints,
            });
        }
        extraction.durations.push(duration);
    }

    if extraction.durations.len() != expected {
        return Err(SoundnessError::SampleCount {
            result_kind: "cpu".to_string(),
            expected,
            actual: extraction.durations.len(),
        });
    }

    Ok(extraction)
}

/// Heap size in MB after the last major GC of each run window
pub fn memory_samples(events: &[TimingEvent]) -> Result<Vec<f64>, SoundnessError> {
    run_windows(events)
        .into_iter()
        .enumerate()
        .map(|(window, window_events)| {
            window_events
                .iter()
                .rev()
                .find_map(|e| match e {
                    TimingEvent::Gc { used_heap_mb, .. } => Some(*used_heap_mb),
                    _ => None,
                })
                .ok_or(SoundnessError::MissingGc { window })
        })
        .collect()
}

/// Metrics read from a page audit report
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StartupMetric {
    Interactive,
    BootupTime,
    MainThreadWorkCost,
    TotalKiloByteWeight,
}

/// Startup metrics of one audit; a metric the report lacks is `None`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StartupMetrics {
    /// Time to consistently interactive, ms
    pub interactive: Option<f64>,
    /// Script parse, compile and evaluation time, ms, at least 16
    pub bootup_time: Option<f64>,
    pub main_thread_work_cost: Option<f64>,
    /// Transferred bytes after compression, KB
    pub total_kilobyte_weight: Option<f64>,
}

const MIN_BOOTUP_TIME: f64 = 16.0;

fn audit_value(report: &Value, id: &str) -> Option<f64> {
    // Lighthouse nests the report under `lhr` when used as a library
    let audits = report
        .get("audits")
        .or_else(|| report.pointer("/lhr/audits"))?;
    audits.get(id)?.get("numericValue")?.as_f64()
}

impl StartupMetrics {
    pub fn from_report(report: &Value) -> Self {
        Self {
            interactive: audit_value(report, "interactive"),
            bootup_time: audit_value(report, "bootup-time").map(|v| v.max(MIN_BOOTUP_TIME)),
            main_thread_work_cost: audit_value(report, "mainthread-work-breakdown"),
            total_kilobyte_weight: audit_value(report, "total-byte-weight").map(|v| v / 1024.0),
        }
    }

    pub fn get(&self, metric: StartupMetric) -> Option<f64> {
        match metric {
            StartupMetric::Interactive => self.interactive,
            StartupMetric::BootupTime => self.bootup_time,
            StartupMetric::MainThreadWorkCost => self.main_thread_work_cost,
            StartupMetric::TotalKiloByteWeight => self.total_kilobyte_weight,
        }
    }
}
