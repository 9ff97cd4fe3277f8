//! Step language for timed benchmark hooks

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::trace;

use crate::config::option_duration_ms;
use crate::dom::{Dom, ElementPath, Target};
use crate::error::{Result, RunError};

/// One interaction or wait inside a hook
///
/// Waits without an explicit timeout use the run timeout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Step {
    WaitForId {
        id: String,
        #[serde(default, with = "option_duration_ms")]
        timeout: Option<Duration>,
    },
    WaitForPath {
        path: ElementPath,
        #[serde(default, with = "option_duration_ms")]
        timeout: Option<Duration>,
    },
    WaitForPathAbsent {
        path: ElementPath,
        #[serde(default, with = "option_duration_ms")]
        timeout: Option<Duration>,
    },
    WaitForText {
        path: ElementPath,
        text: String,
        #[serde(default, with = "option_duration_ms")]
        timeout: Option<Duration>,
    },
    WaitForTextAbsent {
        path: ElementPath,
        text: String,
        #[serde(default, with = "option_duration_ms")]
        timeout: Option<Duration>,
    },
    WaitForClass {
        path: ElementPath,
        class: String,
        #[serde(default, with = "option_duration_ms")]
        timeout: Option<Duration>,
    },
    ClickId {
        id: String,
    },
    ClickPath {
        path: ElementPath,
    },
    /// Remember an element's text under `name`
    CaptureText {
        path: ElementPath,
        name: String,
    },
    /// Wait until an element shows the text remembered under `name`
    WaitForCapturedText {
        path: ElementPath,
        name: String,
        #[serde(default, with = "option_duration_ms")]
        timeout: Option<Duration>,
    },
}

/// State carried between the steps of one iteration
#[derive(Debug, Default)]
pub struct StepContext {
    captured: HashMap<String, String>,
}

impl StepContext {
    pub fn captured(&self, name: &str) -> Option<&str> {
        self.captured.get(name).map(String::as_str)
    }
}

impl Step {
    pub async fn execute(&self, dom: &Dom<'_>, ctx: &mut StepContext) -> Result<()> {
        trace!("Executing step {:?}", self);
        let limit = |timeout: &Option<Duration>| timeout.unwrap_or_else(|| dom.timeout());

        match self {
            Step::WaitForId { id, timeout } => dom.wait_for_id(id, limit(timeout)).await,
            Step::WaitForPath { path, timeout } => dom.wait_for_path(path, limit(timeout)).await,
            Step::WaitForPathAbsent { path, timeout } => {
                dom.wait_for_path_absent(path, limit(timeout)).await
            }
            Step::WaitForText {
                path,
                text,
                timeout,
            } => dom.wait_for_text(path, text, limit(timeout)).await,
            Step::WaitForTextAbsent {
                path,
                text,
                timeout,
            } => dom.wait_for_text_absent(path, text, limit(timeout)).await,
            Step::WaitForClass {
                path,
                class,
                timeout,
            } => dom.wait_for_class(path, class, limit(timeout)).await,
            Step::ClickId { id } => dom.click(Target::Id(id)).await,
            Step::ClickPath { path } => dom.click(Target::Path(path)).await,
            Step::CaptureText { path, name } => {
                let text = dom.read_text(path).await?;
                ctx.captured.insert(name.clone(), text);
                Ok(())
            }
            Step::WaitForCapturedText {
                path,
                name,
                timeout,
            } => {
                let text = ctx
                    .captured(name)
                    .ok_or_else(|| RunError::NotFound(format!("captured text '{}'", name)))?
                    .to_string();
                dom.wait_for_text(path, &text, limit(timeout)).await
            }
        }
    }
}

/// Run a hook's steps in order, stopping at the first failure
pub async fn execute_steps(steps: &[Step], dom: &Dom<'_>, ctx: &mut StepContext) -> Result<()> {
    for step in steps {
        step.execute(dom, ctx).await?;
    }
    Ok(())
}
