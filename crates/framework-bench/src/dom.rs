//! Resilient DOM access
//!
//! Benchmarks address elements with a simplified absolute path such as
//! `//tbody/tr[1000]/td[2]/a`. Path queries cannot cross a shadow-DOM
//! boundary, so a path is resolved segment by segment: every `tag[index]`
//! becomes a `tag:nth-child(index)` query scoped to the node found for the
//! previous segment.
//!
//! The page re-renders while it is being inspected. Lookups treat stale
//! references as "not found", waits poll until their predicate holds, and
//! interactions are retried a bounded number of times.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::time::Duration;
use tokio::time::{sleep, timeout};
use tracing::{debug, trace};

use crate::catalog::ImplementationDescriptor;
use crate::config::RunOptions;
use crate::error::{Result, RunError};
use crate::session::{NodeRef, Session};

/// Attempts made by [`Dom::click`] and [`Dom::read_text`]
pub const INTERACTION_ATTEMPTS: u32 = 5;

/// One `tag[index]` step of an [`ElementPath`]; the index is 1-based
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathSegment {
    pub tag: String,
    pub index: u32,
}

impl PathSegment {
    /// CSS selector resolving this segment below the previous node
    pub fn selector(&self) -> String {
        format!("{}:nth-child({})", self.tag, self.index)
    }
}

/// A parsed element path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ElementPath {
    raw: String,
    segments: Vec<PathSegment>,
}

impl ElementPath {
    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for ElementPath {
    type Err = RunError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| RunError::InvalidPath {
            path: s.to_string(),
            reason: reason.to_string(),
        };

        let mut segments = Vec::new();
        for part in s.split('/').filter(|p| !p.is_empty()) {
            let (tag, index) = match part.split_once('[') {
                Some((tag, rest)) => {
                    let digits = rest
                        .strip_suffix(']')
                        .ok_or_else(|| invalid("unterminated index"))?;
                    let index: u32 = digits
                        .trim()
                        .parse()
                        .map_err(|_| invalid(&format!("index can't be parsed: {}", digits)))?;
                    if index == 0 {
                        return Err(invalid("indices start at 1"));
                    }
                    (tag, index)
                }
                None => (part, 1),
            };
            if tag.is_empty() {
                return Err(invalid("missing tag name"));
            }
            segments.push(PathSegment {
                tag: tag.to_string(),
                index,
            });
        }

        if segments.is_empty() {
            return Err(invalid("empty path"));
        }

        Ok(Self {
            raw: s.to_string(),
            segments,
        })
    }
}

impl TryFrom<String> for ElementPath {
    type Error = RunError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ElementPath> for String {
    fn from(path: ElementPath) -> Self {
        path.raw
    }
}

impl fmt::Display for ElementPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Something that can be clicked
#[derive(Debug, Clone, Copy)]
pub enum Target<'a> {
    Id(&'a str),
    Path(&'a ElementPath),
}

impl fmt::Display for Target<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Target::Id(id) => write!(f, "#{}", id),
            Target::Path(path) => write!(f, "{}", path),
        }
    }
}

fn id_selector(id: &str) -> String {
    format!("[id=\"{}\"]", id.replace('\\', "\\\\").replace('"', "\\\""))
}

/// DOM access for one implementation inside one session
pub struct Dom<'a> {
    session: &'a dyn Session,
    shadow_host: Option<String>,
    timeout: Duration,
    poll_interval: Duration,
}

impl<'a> Dom<'a> {
    pub fn new(
        session: &'a dyn Session,
        framework: &ImplementationDescriptor,
        options: &RunOptions,
    ) -> Self {
        Self {
            session,
            shadow_host: framework
                .use_shadow_root
                .then(|| framework.shadow_root_host.clone()),
            timeout: options.timeout,
            poll_interval: options.poll_interval,
        }
    }

    /// Default timeout of the wait helpers
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// The node all paths start from: the page body, or the shadow root of
    /// the host element for implementations rendering into a shadow root
    pub async fn resolve_root(&self) -> Result<NodeRef> {
        let root = match &self.shadow_host {
            Some(host) => self.session.shadow_root(host).await?,
            None => self.session.document_body().await?,
        };
        root.ok_or_else(|| {
            RunError::NotFound(match &self.shadow_host {
                Some(host) => format!("shadow root of {}", host),
                None => "document body".to_string(),
            })
        })
    }

    /// Resolve `path` below `node`
    ///
    /// Absence at any segment, and any error on the way (the DOM may change
    /// mid-resolution), yields `None`.
    pub async fn locate(&self, node: NodeRef, path: &ElementPath) -> Option<NodeRef> {
        let mut current = node;
        for segment in path.segments() {
            match self.session.query(current, &segment.selector()).await {
                Ok(Some(next)) => current = next,
                Ok(None) => return None,
                Err(e) => {
                    trace!("Lookup of {} in {} failed: {}", segment.selector(), path, e);
                    return None;
                }
            }
        }
        Some(current)
    }

    /// Resolve `path` from the root. Fails only if the root itself is missing.
    pub async fn find(&self, path: &ElementPath) -> Result<Option<NodeRef>> {
        let root = self.resolve_root().await?;
        Ok(self.locate(root, path).await)
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<NodeRef>> {
        let root = self.resolve_root().await?;
        Ok(self.session.query(root, &id_selector(id)).await?)
    }

    /// Poll `predicate` until it holds or `limit` elapses
    ///
    /// Errors raised by the predicate count as "not yet".
    pub async fn wait_until<F, Fut>(
        &self,
        description: impl Into<String>,
        limit: Duration,
        mut predicate: F,
    ) -> Result<()>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool>>,
    {
        let description = description.into();
        let poll_interval = self.poll_interval;

        let outcome = timeout(limit, async {
            loop {
                match predicate().await {
                    Ok(true) => return,
                    Ok(false) => {}
                    Err(e) => trace!("Ignoring error while waiting for {}: {}", description, e),
                }
                sleep(poll_interval).await;
            }
        })
        .await;

        outcome.map_err(|_| RunError::Timeout {
            description,
            timeout: limit,
        })
    }

    pub async fn wait_for_path(&self, path: &ElementPath, limit: Duration) -> Result<()> {
        self.wait_until(format!("element {}", path), limit, move || async move {
            Ok(self.find(path).await?.is_some())
        })
        .await
    }

    pub async fn wait_for_path_absent(&self, path: &ElementPath, limit: Duration) -> Result<()> {
        self.wait_until(format!("no element {}", path), limit, move || async move {
            Ok(self.find(path).await?.is_none())
        })
        .await
    }

    pub async fn wait_for_id(&self, id: &str, limit: Duration) -> Result<()> {
        self.wait_until(format!("element #{}", id), limit, move || async move {
            Ok(self.find_by_id(id).await?.is_some())
        })
        .await
    }

    /// Wait until the element's text contains `text` (an empty text never matches)
    pub async fn wait_for_text(&self, path: &ElementPath, text: &str, limit: Duration) -> Result<()> {
        self.wait_until(format!("text '{}' in {}", text, path), limit, move || async move {
            let content = self.text_at(path).await?;
            Ok(content.is_some_and(|c| !c.is_empty() && c.contains(text)))
        })
        .await
    }

    /// Wait until the element exists with a text not containing `text`
    pub async fn wait_for_text_absent(
        &self,
        path: &ElementPath,
        text: &str,
        limit: Duration,
    ) -> Result<()> {
        self.wait_until(format!("text '{}' gone from {}", text, path), limit, move || async move {
            let content = self.text_at(path).await?;
            Ok(content.is_some_and(|c| !c.is_empty() && !c.contains(text)))
        })
        .await
    }

    pub async fn wait_for_class(
        &self,
        path: &ElementPath,
        class: &str,
        limit: Duration,
    ) -> Result<()> {
        self.wait_until(format!("class '{}' on {}", class, path), limit, move || async move {
            let Some(node) = self.find(path).await? else {
                return Ok(false);
            };
            let classes = self.session.attribute(node, "class").await?;
            Ok(classes.is_some_and(|c| c.contains(class)))
        })
        .await
    }

    async fn text_at(&self, path: &ElementPath) -> Result<Option<String>> {
        match self.find(path).await? {
            Some(node) => Ok(Some(self.session.text(node).await?)),
            None => Ok(None),
        }
    }

    /// Click an element, retrying if it cannot be found or went stale
    pub async fn click(&self, target: Target<'_>) -> Result<()> {
        self.with_retry(&format!("click {}", target), move || async move {
            let node = match target {
                Target::Id(id) => self.find_by_id(id).await?,
                Target::Path(path) => self.find(path).await?,
            };
            let node = node.ok_or_else(|| RunError::NotFound(target.to_string()))?;
            self.session.click(node).await?;
            Ok(())
        })
        .await
    }

    /// Read an element's text, retrying if it cannot be found or went stale
    pub async fn read_text(&self, path: &ElementPath) -> Result<String> {
        self.with_retry(&format!("read text of {}", path), move || async move {
            self.text_at(path)
                .await?
                .ok_or_else(|| RunError::NotFound(path.to_string()))
        })
        .await
    }

    async fn with_retry<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut last_error = None;
        for attempt in 1..=INTERACTION_ATTEMPTS {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    debug!("{} failed (attempt {}/{}): {}", what, attempt, INTERACTION_ATTEMPTS, e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| RunError::NotFound(what.to_string())))
    }
}
