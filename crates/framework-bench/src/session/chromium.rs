//! Chromium session over the DevTools protocol
//!
//! Each session launches its own browser with a throwaway profile, opens a
//! single page and records a performance trace from the moment the page
//! exists until the first drain of the performance log.
//!
//! DOM nodes are addressed through a page-side registry of weak references.
//! A handle therefore never pins a node in memory (which would distort
//! memory benchmarks), and a node that was re-rendered away reports stale.
//! Repeated lookups of the same node share one handle, so polling does not
//! grow the page heap.

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchMouseEventParams, DispatchMouseEventType, MouseButton,
};
use chromiumoxide::cdp::browser_protocol::tracing::{
    EndParams, EventDataCollected, EventTracingComplete, StartParams, TraceConfig,
};
use chromiumoxide::cdp::js_protocol::runtime::EvaluateParams;
use chromiumoxide::Page;
use futures::StreamExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use super::{NodeRef, Session, SessionFactory};
use crate::config::RunOptions;
use crate::error::SessionError;
use crate::events::{Phase, RawEntry};
use crate::throttling::CpuThrottler;

const LAUNCH_ARGS: &[&str] = &[
    "--js-flags=--expose-gc",
    "--enable-precise-memory-info",
    "--no-first-run",
    "--no-default-browser-check",
    "--disable-translate",
    "--disable-extensions",
    "--disable-background-networking",
    "--disable-background-timer-throttling",
    "--disable-cache",
    "--disable-sync",
    "--disable-default-apps",
    "--disable-infobars",
];

const TRACE_CATEGORIES: &[&str] = &[
    "devtools.timeline",
    "blink.user_timing",
    "disabled-by-default-devtools.timeline",
    "v8",
];

/// Forced collections per `collect_garbage` call
const GC_PASSES: usize = 5;

/// Registry size at which collected entries are first swept out
const REGISTRY_SWEEP_FLOOR: usize = 64;

// A node keeps one handle for its lifetime. Entries whose node was collected
// are swept whenever the registry reaches its limit, and the limit then
// resets to twice the surviving size.
const REGISTRY_PRELUDE: &str = r#"
    const reg = window.__frameworkBenchNodes || (window.__frameworkBenchNodes =
        { next: 1, nodes: new Map(), ids: new WeakMap(), limit: __SWEEP_FLOOR__ });
    const sweep = () => {
        for (const [id, r] of reg.nodes) { if (!r.deref()) reg.nodes.delete(id); }
        reg.limit = Math.max(__SWEEP_FLOOR__, reg.nodes.size * 2);
    };
    const keep = (n) => {
        const known = reg.ids.get(n);
        if (known !== undefined && reg.nodes.has(known)) return known;
        if (reg.nodes.size >= reg.limit) sweep();
        const id = reg.next++;
        reg.ids.set(n, id);
        reg.nodes.set(id, new WeakRef(n));
        return id;
    };
    const node = (h) => { const r = reg.nodes.get(h); const n = r && r.deref(); return n && n.isConnected ? n : null; };
"#;

#[derive(Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
enum Reply<T> {
    Ok { value: T },
    Missing,
    Stale,
}

#[derive(Deserialize)]
struct Point {
    x: f64,
    y: f64,
}

/// Launches one Chromium per session
#[derive(Debug, Default, Clone, Copy)]
pub struct ChromiumFactory;

#[async_trait]
impl SessionFactory for ChromiumFactory {
    async fn open(&self, options: &RunOptions) -> Result<Box<dyn Session>, SessionError> {
        let session = ChromiumSession::launch(options).await?;
        Ok(Box::new(session))
    }
}

/// A Chromium browser with one traced page
pub struct ChromiumSession {
    browser: Mutex<Option<Browser>>,
    page: Page,
    trace: Arc<Mutex<Vec<RawEntry>>>,
    recording: AtomicBool,
    trace_complete: Arc<AtomicBool>,
    closed: AtomicBool,
    timeout: Duration,
    poll_interval: Duration,
    user_data_dir: PathBuf,
    tasks: Vec<JoinHandle<()>>,
}

impl ChromiumSession {
    /// Launch a browser, open a blank page and start tracing
    #[instrument(skip(options), fields(headless = options.headless))]
    pub async fn launch(options: &RunOptions) -> Result<Self, SessionError> {
        let user_data_dir = unique_user_data_dir();

        let mut builder = BrowserConfig::builder()
            .window_size(1200, 800)
            .user_data_dir(&user_data_dir)
            .args(LAUNCH_ARGS.iter().copied());

        if options.headless {
            builder = builder.no_sandbox();
        } else {
            builder = builder.with_head();
        }

        if let Some(ref path) = options.chrome_binary {
            builder = builder.chrome_executable(path);
        }

        let config = builder.build().map_err(SessionError::Launch)?;

        info!("Launching browser");
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| SessionError::Launch(e.to_string()))?;

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        }));

        let page = browser.new_page("about:blank").await?;

        let trace = Arc::new(Mutex::new(Vec::new()));
        let mut collected = page.event_listener::<EventDataCollected>().await?;
        let sink = trace.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(event) = collected.next().await {
                let mut buffer = sink.lock().await;
                buffer.extend(event.value.iter().map(|record| {
                    RawEntry::new(
                        json!({ "method": "Tracing.dataCollected", "params": record }).to_string(),
                    )
                }));
            }
        }));

        let trace_complete = Arc::new(AtomicBool::new(false));
        let mut completed = page.event_listener::<EventTracingComplete>().await?;
        let flag = trace_complete.clone();
        tasks.push(tokio::spawn(async move {
            if completed.next().await.is_some() {
                flag.store(true, Ordering::SeqCst);
            }
        }));

        let trace_config = TraceConfig::builder()
            .included_categories(TRACE_CATEGORIES.iter().map(|c| c.to_string()))
            .build();
        page.execute(StartParams::builder().trace_config(trace_config).build())
            .await?;

        debug!("Tracing started with categories {:?}", TRACE_CATEGORIES);

        Ok(Self {
            browser: Mutex::new(Some(browser)),
            page,
            trace,
            recording: AtomicBool::new(true),
            trace_complete,
            closed: AtomicBool::new(false),
            timeout: options.timeout,
            poll_interval: options.poll_interval,
            user_data_dir,
            tasks,
        })
    }

    async fn eval<T: DeserializeOwned>(&self, body: &str) -> Result<Reply<T>, SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::Closed);
        }
        let script = format!("(() => {{ {} {} }})()", registry_prelude(), body);
        // Sent as an expression; a leading arrow would be mistaken for a function declaration
        let params = EvaluateParams::builder()
            .expression(script)
            .return_by_value(true)
            .build()
            .map_err(SessionError::Script)?;
        let result = self.page.evaluate_expression(params).await.map_err(|e| {
            let message = e.to_string();
            if message.contains("Cannot find context") || message.contains("context was destroyed")
            {
                SessionError::StaleElement
            } else {
                SessionError::Script(message)
            }
        })?;
        result
            .into_value::<Reply<T>>()
            .map_err(|e| SessionError::Script(e.to_string()))
    }

    async fn eval_node(&self, body: &str) -> Result<Option<NodeRef>, SessionError> {
        match self.eval::<u64>(body).await? {
            Reply::Ok { value } => Ok(Some(NodeRef(value))),
            Reply::Missing => Ok(None),
            Reply::Stale => Err(SessionError::StaleElement),
        }
    }

    async fn eval_value<T: DeserializeOwned>(&self, body: &str) -> Result<T, SessionError> {
        match self.eval::<T>(body).await? {
            Reply::Ok { value } => Ok(value),
            Reply::Missing | Reply::Stale => Err(SessionError::StaleElement),
        }
    }

    async fn run_script(&self, script: &str) -> Result<(), SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::Closed);
        }
        self.page
            .evaluate(script)
            .await
            .map_err(|e| SessionError::Script(e.to_string()))?;
        Ok(())
    }

    /// Number of node handles the page currently holds
    pub async fn tracked_nodes(&self) -> Result<usize, SessionError> {
        self.eval_value("return { status: 'ok', value: reg.nodes.size };")
            .await
    }

    async fn stop_tracing(&self) -> Result<(), SessionError> {
        self.page.execute(EndParams::default()).await?;

        let complete = self.trace_complete.clone();
        let poll = self.poll_interval;
        let waited = timeout(self.timeout, async move {
            while !complete.load(Ordering::SeqCst) {
                tokio::time::sleep(poll).await;
            }
        })
        .await;

        if waited.is_err() {
            warn!("Tracing did not complete within {:?}", self.timeout);
        }
        // Let the collector task flush the last data batch.
        tokio::time::sleep(self.poll_interval).await;
        Ok(())
    }
}

fn registry_prelude() -> String {
    REGISTRY_PRELUDE.replace("__SWEEP_FLOOR__", &REGISTRY_SWEEP_FLOOR.to_string())
}

fn js_string(value: &str) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "\"\"".to_string())
}

fn unique_user_data_dir() -> PathBuf {
    static SESSION_ID: AtomicU64 = AtomicU64::new(0);

    let id = SESSION_ID.fetch_add(1, Ordering::SeqCst);
    let timestamp = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    std::env::temp_dir().join(format!(
        "framework-bench-{}-{}-{}",
        std::process::id(),
        id,
        timestamp
    ))
}

#[async_trait]
impl Session for ChromiumSession {
    #[instrument(skip(self))]
    async fn navigate(&self, url: &str) -> Result<(), SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::Closed);
        }
        self.page.goto(url).await?;
        Ok(())
    }

    async fn document_body(&self) -> Result<Option<NodeRef>, SessionError> {
        self.eval_node(
            "const b = document.body; return b ? { status: 'ok', value: keep(b) } : { status: 'missing' };",
        )
        .await
    }

    async fn shadow_root(&self, host_selector: &str) -> Result<Option<NodeRef>, SessionError> {
        let body = format!(
            "const h = document.querySelector({}); \
             return h && h.shadowRoot ? {{ status: 'ok', value: keep(h.shadowRoot) }} : {{ status: 'missing' }};",
            js_string(host_selector)
        );
        self.eval_node(&body).await
    }

    async fn query(
        &self,
        scope: NodeRef,
        selector: &str,
    ) -> Result<Option<NodeRef>, SessionError> {
        let body = format!(
            "const s = node({}); if (!s) return {{ status: 'stale' }}; \
             const n = s.querySelector({}); \
             return n ? {{ status: 'ok', value: keep(n) }} : {{ status: 'missing' }};",
            scope.0,
            js_string(selector)
        );
        self.eval_node(&body).await
    }

    async fn click(&self, node: NodeRef) -> Result<(), SessionError> {
        let body = format!(
            "const n = node({}); if (!n) return {{ status: 'stale' }}; \
             n.scrollIntoView({{ block: 'center', inline: 'center' }}); \
             const r = n.getBoundingClientRect(); \
             return {{ status: 'ok', value: {{ x: r.left + r.width / 2, y: r.top + r.height / 2 }} }};",
            node.0
        );
        let point: Point = self.eval_value(&body).await?;

        for kind in [
            DispatchMouseEventType::MousePressed,
            DispatchMouseEventType::MouseReleased,
        ] {
            let params = DispatchMouseEventParams::builder()
                .r#type(kind)
                .x(point.x)
                .y(point.y)
                .button(MouseButton::Left)
                .click_count(1)
                .build()
                .map_err(SessionError::Protocol)?;
            self.page.execute(params).await?;
        }
        Ok(())
    }

    async fn text(&self, node: NodeRef) -> Result<String, SessionError> {
        let body = format!(
            "const n = node({}); if (!n) return {{ status: 'stale' }}; \
             const t = n.innerText !== undefined ? n.innerText : n.textContent; \
             return {{ status: 'ok', value: t || '' }};",
            node.0
        );
        self.eval_value(&body).await
    }

    async fn attribute(&self, node: NodeRef, name: &str) -> Result<Option<String>, SessionError> {
        let body = format!(
            "const n = node({}); if (!n) return {{ status: 'stale' }}; \
             return {{ status: 'ok', value: n.getAttribute ? n.getAttribute({}) : null }};",
            node.0,
            js_string(name)
        );
        self.eval_value(&body).await
    }

    async fn mark(&self, phase: Phase) -> Result<(), SessionError> {
        self.run_script(&format!("console.timeStamp({})", js_string(phase.marker())))
            .await
    }

    async fn collect_garbage(&self) -> Result<(), SessionError> {
        for _ in 0..GC_PASSES {
            self.run_script("window.gc()").await?;
        }
        Ok(())
    }

    async fn set_cpu_throttling(&self, rate: f64) -> Result<(), SessionError> {
        let applied = if rate > 1.0 {
            CpuThrottler::apply(&self.page, rate).await
        } else {
            CpuThrottler::clear(&self.page).await
        };
        applied.map_err(|e| SessionError::Protocol(e.to_string()))
    }

    async fn used_heap_mb(&self) -> Result<f64, SessionError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SessionError::Closed);
        }
        let result = self
            .page
            .evaluate("performance.memory.usedJSHeapSize / 1024 / 1024")
            .await?;
        result
            .into_value::<f64>()
            .map_err(|e| SessionError::Script(e.to_string()))
    }

    async fn drain_performance_log(&self) -> Result<Vec<RawEntry>, SessionError> {
        if self.recording.swap(false, Ordering::SeqCst) {
            self.stop_tracing().await?;
        }
        let mut buffer = self.trace.lock().await;
        Ok(std::mem::take(&mut *buffer))
    }

    async fn close(&self) -> Result<(), SessionError> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let browser = self.browser.lock().await.take();
        let closed = match browser {
            Some(mut browser) => {
                let result = browser.close().await;
                if let Err(e) = browser.wait().await {
                    debug!("Could not reap browser process: {}", e);
                }
                result.map(|_| ()).map_err(SessionError::from)
            }
            None => Ok(()),
        };

        for task in &self.tasks {
            task.abort();
        }
        if let Err(e) = tokio::fs::remove_dir_all(&self.user_data_dir).await {
            debug!("Could not remove {}: {}", self.user_data_dir.display(), e);
        }

        debug!("Browser session closed");
        closed
    }
}

impl Drop for ChromiumSession {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
