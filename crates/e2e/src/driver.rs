//! Browser driver abstraction
//!
//! The session, navigator, executor and assertion layers only talk to a
//! [`Driver`]. [`crate::browser::ChromiumLauncher`] drives a real Chromium over
//! the DevTools protocol; [`crate::fake::FakeLauncher`] is an in-memory page
//! model for exercising the pipeline without a browser.
//!
//! Pages and frames are addressed by opaque ids so the driver owns every
//! protocol handle and nothing outlives [`Driver::stop`].

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::SessionConfig;
use crate::error::E2eResult;
use crate::locator::Query;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageId(pub String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameId(pub String);

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `document.readyState` of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadyState {
    Loading,
    Interactive,
    Complete,
}

impl ReadyState {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "loading" => Some(ReadyState::Loading),
            "interactive" => Some(ReadyState::Interactive),
            "complete" => Some(ReadyState::Complete),
            _ => None,
        }
    }

    /// Content has been parsed (the DOMContentLoaded point)
    pub fn is_parsed(self) -> bool {
        !matches!(self, ReadyState::Loading)
    }
}

/// Element geometry in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// Starts browsers. One call yields one private browser process.
#[async_trait]
pub trait Launcher: Send + Sync {
    /// Launch a browser. Fails with `EnvironmentUnavailable` when no browser
    /// can be started.
    async fn launch(&self, config: &SessionConfig) -> E2eResult<Box<dyn Driver>>;
}

/// Operations on one launched browser holding at most one isolated context.
#[async_trait]
pub trait Driver: Send + Sync {
    /// Open the isolated browsing context every page lives in
    async fn new_context(&mut self) -> E2eResult<()>;

    /// Open a blank page in the context
    async fn new_page(&mut self) -> E2eResult<PageId>;

    /// Open pages of the context, oldest first. Pages opened by the
    /// application (popups, `target=_blank`) are included.
    async fn pages(&self) -> E2eResult<Vec<PageId>>;

    /// Start a navigation and return once it has committed
    async fn navigate(&self, page: &PageId, url: &str) -> E2eResult<()>;

    /// Main frame first, then every attached sub-frame
    async fn frames(&self, page: &PageId) -> E2eResult<Vec<FrameId>>;

    async fn ready_state(&self, page: &PageId, frame: &FrameId) -> E2eResult<ReadyState>;

    /// Number of elements currently matching the query
    async fn count(&self, page: &PageId, query: &Query) -> E2eResult<usize>;

    /// Box of the first match, `None` when detached or not rendered
    async fn bounds(&self, page: &PageId, query: &Query) -> E2eResult<Option<BoundingBox>>;

    /// Whether the first match is rendered with a non-empty box and not hidden
    async fn is_visible(&self, page: &PageId, query: &Query) -> E2eResult<bool>;

    async fn click(&self, page: &PageId, query: &Query) -> E2eResult<()>;

    /// Replace the field value, firing input and change events
    async fn fill(&self, page: &PageId, query: &Query, value: &str) -> E2eResult<()>;

    async fn input_value(&self, page: &PageId, query: &Query) -> E2eResult<String>;

    async fn scroll_by(&self, page: &PageId, delta_y: i64) -> E2eResult<()>;

    async fn viewport_height(&self, page: &PageId) -> E2eResult<i64>;

    async fn close_context(&mut self) -> E2eResult<()>;

    async fn close_browser(&mut self) -> E2eResult<()>;

    /// Stop the automation session (protocol handler, child process)
    async fn stop(&mut self) -> E2eResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ready_state_parsing() {
        assert_eq!(ReadyState::parse("loading"), Some(ReadyState::Loading));
        assert_eq!(ReadyState::parse("complete"), Some(ReadyState::Complete));
        assert_eq!(ReadyState::parse("uninitialized"), None);
        assert!(!ReadyState::Loading.is_parsed());
        assert!(ReadyState::Interactive.is_parsed());
    }
}
