//! Classification of raw performance-log entries into timing events
//!
//! The browser's performance log is a stream of protocol records. Only a
//! handful of trace events matter for measurement: click dispatch, paint,
//! major GC, navigation start, and the `console.timeStamp` markers the
//! driven page emits around each phase. Everything else is dropped.
//!
//! Trace timestamps and durations are in microseconds.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::SessionError;
use crate::session::Session;

/// One entry of the performance log
///
/// `message` holds a protocol record, either bare
/// (`{"method": ..., "params": ...}`) or wrapped the way chromedriver logs
/// it (`{"message": {"method": ..., "params": ...}, "webview": ...}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEntry {
    pub message: String,
}

impl RawEntry {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Benchmark phase announced by a timestamp marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    Init,
    Run,
    Finished,
    After,
}

impl Phase {
    /// Message passed to `console.timeStamp` for this phase
    pub fn marker(&self) -> &'static str {
        match self {
            Phase::Init => "initBenchmark",
            Phase::Run => "runBenchmark",
            Phase::Finished => "finishedBenchmark",
            Phase::After => "afterBenchmark",
        }
    }

    pub fn from_marker(message: &str) -> Option<Self> {
        match message {
            "initBenchmark" => Some(Phase::Init),
            "runBenchmark" => Some(Phase::Run),
            "finishedBenchmark" => Some(Phase::Finished),
            "afterBenchmark" => Some(Phase::After),
            _ => None,
        }
    }
}

/// A classified trace event
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TimingEvent {
    Click { ts: f64, dur: f64 },
    Paint { ts: f64, dur: f64 },
    Gc { ts: f64, used_heap_mb: f64 },
    NavigationStart { ts: f64 },
    Marker { phase: Phase, ts: f64 },
}

impl TimingEvent {
    pub fn ts(&self) -> f64 {
        match *self {
            TimingEvent::Click { ts, .. }
            | TimingEvent::Paint { ts, .. }
            | TimingEvent::Gc { ts, .. }
            | TimingEvent::NavigationStart { ts }
            | TimingEvent::Marker { ts, .. } => ts,
        }
    }

    /// Timestamp plus duration; point events end where they start
    pub fn end(&self) -> f64 {
        match *self {
            TimingEvent::Click { ts, dur } | TimingEvent::Paint { ts, dur } => ts + dur,
            _ => self.ts(),
        }
    }

    pub fn is_marker(&self, phase: Phase) -> bool {
        matches!(self, TimingEvent::Marker { phase: p, .. } if *p == phase)
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum LogRecord {
    Wrapped { message: ProtocolMessage },
    Bare(ProtocolMessage),
}

impl LogRecord {
    fn into_message(self) -> ProtocolMessage {
        match self {
            LogRecord::Wrapped { message } => message,
            LogRecord::Bare(message) => message,
        }
    }
}

#[derive(Deserialize)]
struct ProtocolMessage {
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Deserialize)]
struct TraceRecord {
    name: String,
    ts: Option<f64>,
    #[serde(default)]
    dur: f64,
    #[serde(default)]
    args: Value,
}

/// Map one raw entry to zero or one timing event
pub fn classify(entry: &RawEntry) -> Option<TimingEvent> {
    let record: LogRecord = match serde_json::from_str(&entry.message) {
        Ok(record) => record,
        Err(e) => {
            trace!("Skipping malformed log entry: {}", e);
            return None;
        }
    };
    let message = record.into_message();

    if message.method.starts_with("Page") || message.method.starts_with("Network") {
        return None;
    }

    let trace: TraceRecord = serde_json::from_value(message.params).ok()?;
    let ts = match trace.ts {
        Some(ts) => ts,
        None => {
            trace!("Skipping trace record '{}' without timestamp", trace.name);
            return None;
        }
    };

    match trace.name.as_str() {
        "EventDispatch" => {
            let kind = trace.args.pointer("/data/type").and_then(Value::as_str);
            (kind == Some("click")).then_some(TimingEvent::Click { ts, dur: trace.dur })
        }
        "TimeStamp" => trace
            .args
            .pointer("/data/message")
            .and_then(Value::as_str)
            .and_then(Phase::from_marker)
            .map(|phase| TimingEvent::Marker { phase, ts }),
        "navigationStart" => Some(TimingEvent::NavigationStart { ts }),
        "Paint" => Some(TimingEvent::Paint { ts, dur: trace.dur }),
        "MajorGC" => trace
            .args
            .get("usedHeapSizeAfter")
            .and_then(Value::as_f64)
            .map(|bytes| TimingEvent::Gc {
                ts,
                used_heap_mb: bytes / 1024.0 / 1024.0,
            }),
        _ => None,
    }
}

/// Drain a session's performance log and classify every entry
///
/// Entries can keep arriving after a drain returns, so the log is polled
/// until a drain comes back empty. The result is ordered by timestamp; ties
/// keep arrival order.
pub async fn collect_events(session: &dyn Session) -> Result<Vec<TimingEvent>, SessionError> {
    let mut events = Vec::new();
    let mut total = 0usize;

    loop {
        let batch = session.drain_performance_log().await?;
        if batch.is_empty() {
            break;
        }
        total += batch.len();
        events.extend(batch.iter().filter_map(classify));
    }

    events.sort_by(|a, b| {
        a.ts()
            .partial_cmp(&b.ts())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    debug!(
        "Classified {} timing events from {} log entries",
        events.len(),
        total
    );
    Ok(events)
}
