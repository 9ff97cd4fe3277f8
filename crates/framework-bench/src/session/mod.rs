//! Browser session abstraction
//!
//! The worker and the DOM access layer talk to the browser only through the
//! [`Session`] trait. [`chromium::ChromiumSession`] drives a real Chromium
//! over the DevTools protocol; tests substitute scripted sessions.

pub mod chromium;

use async_trait::async_trait;

use crate::config::RunOptions;
use crate::error::SessionError;
use crate::events::{Phase, RawEntry};

pub use chromium::{ChromiumFactory, ChromiumSession};

/// Opaque handle to a DOM node (element, body or shadow root) inside a session
///
/// A handle does not keep the node alive; once the page drops or replaces
/// the node, operations on the handle fail with [`SessionError::StaleElement`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeRef(pub u64);

/// One live browser session, exclusively owned by a single worker run
#[async_trait]
pub trait Session: Send + Sync {
    /// Load a URL and wait for the navigation to finish
    async fn navigate(&self, url: &str) -> Result<(), SessionError>;

    /// The document body, if the document has one yet
    async fn document_body(&self) -> Result<Option<NodeRef>, SessionError>;

    /// The open shadow root of the first element matching `host_selector`
    async fn shadow_root(&self, host_selector: &str) -> Result<Option<NodeRef>, SessionError>;

    /// First descendant of `scope` matching a CSS selector
    async fn query(&self, scope: NodeRef, selector: &str)
        -> Result<Option<NodeRef>, SessionError>;

    /// Dispatch a real mouse click at the centre of the node
    async fn click(&self, node: NodeRef) -> Result<(), SessionError>;

    /// Text content of the node
    async fn text(&self, node: NodeRef) -> Result<String, SessionError>;

    /// Attribute value of the node
    async fn attribute(&self, node: NodeRef, name: &str) -> Result<Option<String>, SessionError>;

    /// Emit the phase marker into the performance trace
    async fn mark(&self, phase: Phase) -> Result<(), SessionError>;

    /// Force major garbage collections
    async fn collect_garbage(&self) -> Result<(), SessionError>;

    /// Set the CPU slowdown multiplier; 1.0 removes throttling
    async fn set_cpu_throttling(&self, rate: f64) -> Result<(), SessionError>;

    /// Used JS heap in MB, for diagnostics only
    async fn used_heap_mb(&self) -> Result<f64, SessionError>;

    /// Take the performance log entries recorded since the last drain
    async fn drain_performance_log(&self) -> Result<Vec<RawEntry>, SessionError>;

    /// Release the browser. Calling it again is a no-op.
    async fn close(&self) -> Result<(), SessionError>;
}

/// Opens fresh sessions for the worker
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self, options: &RunOptions) -> Result<Box<dyn Session>, SessionError>;
}
