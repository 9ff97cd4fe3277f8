//! Scripted in-memory browser session
//!
//! Serves a tiny table app: a `#run` button appending a row, a `#clear`
//! button removing all rows, and a `tbody` holding `tr > td, td > a > span`
//! rows. Clicks, paints, markers and GCs are written to a synthetic
//! performance log with a monotonic microsecond clock.

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use framework_bench::config::RunOptions;
use framework_bench::error::SessionError;
use framework_bench::events::{Phase, RawEntry};
use framework_bench::session::{NodeRef, Session, SessionFactory};

/// Tunables for how the fake page behaves
#[derive(Debug, Clone)]
pub struct Script {
    /// Paint events emitted for every click
    pub paints_per_click: usize,
    /// Clicks that fail with a stale reference before clicks start working
    pub stale_clicks: usize,
    /// Heap in MB reported by a forced GC, plus 0.5MB per row
    pub base_heap_mb: f64,
    /// Do not record GC events at all
    pub skip_gc: bool,
    /// Fail `navigate` with this message
    pub navigate_error: Option<String>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            paints_per_click: 1,
            stale_clicks: 0,
            base_heap_mb: 2.0,
            skip_gc: false,
            navigate_error: None,
        }
    }
}

#[derive(Debug)]
struct Node {
    tag: String,
    id: Option<String>,
    text: String,
    class: String,
    parent: Option<usize>,
    children: Vec<usize>,
    alive: bool,
}

#[derive(Debug, Default)]
struct Page {
    nodes: Vec<Node>,
    tbody: usize,
    rows: usize,
}

impl Page {
    fn load() -> Self {
        let mut page = Page::default();
        let body = page.add(None, "body", None, "");
        page.add(Some(body), "button", Some("run"), "Create row");
        page.add(Some(body), "button", Some("clear"), "Clear");
        let table = page.add(Some(body), "table", None, "");
        page.tbody = page.add(Some(table), "tbody", None, "");
        page
    }

    fn add(&mut self, parent: Option<usize>, tag: &str, id: Option<&str>, text: &str) -> usize {
        let index = self.nodes.len();
        self.nodes.push(Node {
            tag: tag.to_string(),
            id: id.map(str::to_string),
            text: text.to_string(),
            class: String::new(),
            parent,
            children: Vec::new(),
            alive: true,
        });
        if let Some(parent) = parent {
            self.nodes[parent].children.push(index);
        }
        index
    }

    fn add_row(&mut self) {
        self.rows += 1;
        let n = self.rows;
        let tr = self.add(Some(self.tbody), "tr", None, "");
        self.add(Some(tr), "td", None, &n.to_string());
        let td = self.add(Some(tr), "td", None, "");
        let a = self.add(Some(td), "a", None, "");
        self.add(Some(a), "span", None, &format!("label {}", n));
        let td = self.add(Some(tr), "td", None, "");
        let a = self.add(Some(td), "a", None, "");
        self.add(Some(a), "span", None, "x");
        self.nodes[tr].text = n.to_string();
    }

    fn clear_rows(&mut self) {
        let rows = std::mem::take(&mut self.nodes[self.tbody].children);
        for row in rows {
            self.kill(row);
        }
    }

    fn kill(&mut self, node: usize) {
        self.nodes[node].alive = false;
        let children = self.nodes[node].children.clone();
        for child in children {
            self.kill(child);
        }
    }

    fn live(&self, node: NodeRef) -> Result<&Node, SessionError> {
        match self.nodes.get(node.0 as usize) {
            Some(n) if n.alive => Ok(n),
            _ => Err(SessionError::StaleElement),
        }
    }

    fn descendants(&self, node: usize) -> Vec<usize> {
        let mut out = Vec::new();
        for &child in &self.nodes[node].children {
            out.push(child);
            out.extend(self.descendants(child));
        }
        out
    }

    /// Supports `[id="x"]` and `tag:nth-child(n)`
    fn query(&self, scope: usize, selector: &str) -> Option<usize> {
        let matches = |index: usize| -> bool {
            let node = &self.nodes[index];
            if let Some(id) = selector
                .strip_prefix("[id=\"")
                .and_then(|s| s.strip_suffix("\"]"))
            {
                return node.id.as_deref() == Some(id);
            }
            let Some((tag, rest)) = selector.split_once(":nth-child(") else {
                return node.tag == selector;
            };
            let Some(position) = rest.strip_suffix(')').and_then(|n| n.parse::<usize>().ok())
            else {
                return false;
            };
            let nth = node
                .parent
                .and_then(|p| self.nodes[p].children.iter().position(|&c| c == index))
                .map(|i| i + 1);
            node.tag == tag && nth == Some(position)
        };
        self.descendants(scope).into_iter().find(|&i| matches(i))
    }

    /// Text content, concatenating descendants like the DOM does
    fn text_content(&self, node: usize) -> String {
        let n = &self.nodes[node];
        if n.children.is_empty() {
            return n.text.clone();
        }
        n.children
            .iter()
            .map(|&c| self.text_content(c))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Default)]
struct State {
    page: Page,
    log: Vec<RawEntry>,
    clock: f64,
    clicks: usize,
    closed: bool,
}

impl State {
    fn tick(&mut self, step: f64) -> f64 {
        self.clock += step;
        self.clock
    }

    fn record(&mut self, name: &str, ts: f64, dur: f64, args: Value) {
        let entry = json!({
            "method": "Tracing.dataCollected",
            "params": { "name": name, "ts": ts, "dur": dur, "args": args }
        });
        self.log.push(RawEntry::new(entry.to_string()));
    }
}

/// One scripted session
pub struct FakeSession {
    script: Script,
    state: Mutex<State>,
    stale_left: AtomicUsize,
    released: Option<Arc<AtomicUsize>>,
}

impl FakeSession {
    pub fn new(script: Script) -> Self {
        let stale = script.stale_clicks;
        Self {
            script,
            state: Mutex::new(State {
                clock: 1_000_000.0,
                ..State::default()
            }),
            stale_left: AtomicUsize::new(stale),
            released: None,
        }
    }

    /// Count the first `close` of this session in `counter`
    pub fn with_release_counter(mut self, counter: Arc<AtomicUsize>) -> Self {
        self.released = Some(counter);
        self
    }

    /// Load the table app without a navigation entry
    pub fn loaded(script: Script) -> Self {
        let session = Self::new(script);
        session.state.lock().unwrap().page = Page::load();
        session
    }

    pub fn add_rows(&self, count: usize) {
        let mut state = self.state.lock().unwrap();
        for _ in 0..count {
            state.page.add_row();
        }
    }

    pub fn clicks(&self) -> usize {
        self.state.lock().unwrap().clicks
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().unwrap().closed
    }

    fn guard(&self) -> Result<std::sync::MutexGuard<'_, State>, SessionError> {
        let state = self.state.lock().unwrap();
        if state.closed {
            return Err(SessionError::Closed);
        }
        Ok(state)
    }
}

#[async_trait]
impl Session for FakeSession {
    async fn navigate(&self, _url: &str) -> Result<(), SessionError> {
        if let Some(message) = &self.script.navigate_error {
            return Err(SessionError::Protocol(message.clone()));
        }
        let mut state = self.guard()?;
        state.page = Page::load();
        let ts = state.tick(1000.0);
        state.record("navigationStart", ts, 0.0, json!({}));
        Ok(())
    }

    async fn document_body(&self) -> Result<Option<NodeRef>, SessionError> {
        let state = self.guard()?;
        Ok((!state.page.nodes.is_empty()).then_some(NodeRef(0)))
    }

    async fn shadow_root(&self, _host_selector: &str) -> Result<Option<NodeRef>, SessionError> {
        Ok(None)
    }

    async fn query(
        &self,
        scope: NodeRef,
        selector: &str,
    ) -> Result<Option<NodeRef>, SessionError> {
        let state = self.guard()?;
        state.page.live(scope)?;
        Ok(state
            .page
            .query(scope.0 as usize, selector)
            .map(|i| NodeRef(i as u64)))
    }

    async fn click(&self, node: NodeRef) -> Result<(), SessionError> {
        if self
            .stale_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(SessionError::StaleElement);
        }

        let mut state = self.guard()?;
        let id = state.page.live(node)?.id.clone();
        state.clicks += 1;

        let click_ts = state.tick(1000.0);
        state.record("EventDispatch", click_ts, 2000.0, json!({ "data": { "type": "click" } }));
        match id.as_deref() {
            Some("run") => state.page.add_row(),
            Some("clear") => state.page.clear_rows(),
            _ => {}
        }
        for _ in 0..self.script.paints_per_click {
            let ts = state.tick(3000.0);
            state.record("Paint", ts, 1000.0, json!({}));
        }
        state.tick(1000.0);
        Ok(())
    }

    async fn text(&self, node: NodeRef) -> Result<String, SessionError> {
        let state = self.guard()?;
        state.page.live(node)?;
        Ok(state.page.text_content(node.0 as usize))
    }

    async fn attribute(&self, node: NodeRef, name: &str) -> Result<Option<String>, SessionError> {
        let state = self.guard()?;
        let n = state.page.live(node)?;
        Ok(match name {
            "class" => Some(n.class.clone()),
            "id" => n.id.clone(),
            _ => None,
        })
    }

    async fn mark(&self, phase: Phase) -> Result<(), SessionError> {
        let mut state = self.guard()?;
        let ts = state.tick(500.0);
        state.record(
            "TimeStamp",
            ts,
            0.0,
            json!({ "data": { "message": phase.marker() } }),
        );
        Ok(())
    }

    async fn collect_garbage(&self) -> Result<(), SessionError> {
        let mut state = self.guard()?;
        if self.script.skip_gc {
            return Ok(());
        }
        let heap_mb = self.script.base_heap_mb + 0.5 * state.page.rows as f64;
        let ts = state.tick(500.0);
        state.record(
            "MajorGC",
            ts,
            0.0,
            json!({ "usedHeapSizeAfter": heap_mb * 1024.0 * 1024.0 }),
        );
        Ok(())
    }

    async fn set_cpu_throttling(&self, _rate: f64) -> Result<(), SessionError> {
        self.guard()?;
        Ok(())
    }

    async fn used_heap_mb(&self) -> Result<f64, SessionError> {
        let state = self.guard()?;
        Ok(self.script.base_heap_mb + 0.5 * state.page.rows as f64)
    }

    async fn drain_performance_log(&self) -> Result<Vec<RawEntry>, SessionError> {
        let mut state = self.guard()?;
        Ok(std::mem::take(&mut state.log))
    }

    async fn close(&self) -> Result<(), SessionError> {
        let mut state = self.state.lock().unwrap();
        if !state.closed {
            state.closed = true;
            if let Some(released) = &self.released {
                released.fetch_add(1, Ordering::SeqCst);
            }
        }
        Ok(())
    }
}

/// Hands out fresh [`FakeSession`]s and counts them
#[derive(Clone, Default)]
pub struct FakeFactory {
    script: Script,
    opened: Arc<AtomicUsize>,
    closed: Arc<AtomicUsize>,
}

impl FakeFactory {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            ..Self::default()
        }
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Sessions closed at least once
    pub fn closed(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionFactory for FakeFactory {
    async fn open(&self, _options: &RunOptions) -> Result<Box<dyn Session>, SessionError> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let session = FakeSession::new(self.script.clone())
            .with_release_counter(Arc::clone(&self.closed));
        Ok(Box::new(session))
    }
}
