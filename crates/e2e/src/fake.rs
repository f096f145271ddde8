//! In-memory driver for exercising scenarios without a browser
//!
//! A [`FakeLauncher`] holds a scripted application: elements per page (by
//! creation index), frames with scripted readiness, click effects and failure
//! points. Every driver call is appended to an event log that tests inspect
//! after the run.
//!
//! ```ignore
//! let app = FakeLauncher::new()
//!     .element(0, "text=Sign In".parse()?, FakeElement::button().opens_page())
//!     .element(1, "testid=email".parse()?, FakeElement::input());
//! let outcome = ScenarioRunner::new(config, Arc::new(app.clone())).run(&scenario).await;
//! assert_eq!(app.count(|e| matches!(e, FakeEvent::Stop)), 1);
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::config::SessionConfig;
use crate::driver::{BoundingBox, Driver, FrameId, Launcher, PageId, ReadyState};
use crate::error::{E2eError, E2eResult};
use crate::locator::{Locator, Query};

/// Something a click does to the fake application
#[derive(Debug, Clone)]
pub enum Effect {
    /// Open a new page in the context (like `target=_blank`)
    OpenPage,
    /// Make an element on the clicked page visible
    Reveal(Query),
    /// Panic inside the driver call
    Panic(String),
}

#[derive(Debug, Clone)]
pub struct FakeElement {
    value: String,
    visible: bool,
    reveal_after: Option<Duration>,
    effects: Vec<Effect>,
    hang: bool,
    drops_input: bool,
    unstable_polls: u32,
}

impl FakeElement {
    pub fn button() -> Self {
        Self {
            value: String::new(),
            visible: true,
            reveal_after: None,
            effects: Vec::new(),
            hang: false,
            drops_input: false,
            unstable_polls: 0,
        }
    }

    pub fn input() -> Self {
        Self::button()
    }

    /// Static text, visible immediately
    pub fn text() -> Self {
        Self::button()
    }

    pub fn with_value(mut self, value: &str) -> Self {
        self.value = value.to_string();
        self
    }

    /// Attached but not rendered until revealed
    pub fn hidden(mut self) -> Self {
        self.visible = false;
        self
    }

    /// Becomes visible once this much (tokio) time has passed since launch
    pub fn visible_after(mut self, delay: Duration) -> Self {
        self.visible = false;
        self.reveal_after = Some(delay);
        self
    }

    pub fn opens_page(self) -> Self {
        self.on_click(Effect::OpenPage)
    }

    pub fn reveals(self, locator: &Locator) -> Self {
        self.on_click(Effect::Reveal(locator.to_query()))
    }

    pub fn panics(self, message: &str) -> Self {
        self.on_click(Effect::Panic(message.to_string()))
    }

    pub fn on_click(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    /// Actions on this element never complete
    pub fn hangs(mut self) -> Self {
        self.hang = true;
        self
    }

    /// Fill is accepted but the value does not change
    pub fn drops_input(mut self) -> Self {
        self.drops_input = true;
        self
    }

    /// Bounding box moves for this many polls before it settles
    pub fn unstable_for(mut self, polls: u32) -> Self {
        self.unstable_polls = polls;
        self
    }
}

/// Scripted readiness of one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameBehavior {
    Ready,
    /// Stays in `loading` forever
    NeverReady,
    /// Every ready-state probe errors
    Error,
}

/// Points where the fake can be told to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailPoint {
    Launch,
    NewContext,
    NewPage,
    Navigate,
    HangNavigate,
    /// Every page lookup errors
    Pages,
    HangScroll,
    CloseContext,
    CloseBrowser,
    HangCloseBrowser,
    Stop,
}

/// Driver calls, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FakeEvent {
    Launch,
    NewContext,
    NewPage(usize),
    Navigate { page: usize, url: String },
    ReadyState { page: usize, frame: String },
    Click { page: usize, query: Query },
    Fill { page: usize, query: Query, value: String },
    Scroll { page: usize, delta_y: i64 },
    CloseContext,
    CloseBrowser,
    Stop,
}

#[derive(Debug, Default)]
struct FakePage {
    url: String,
    elements: HashMap<Query, FakeElement>,
    frames: Vec<(String, FrameBehavior)>,
}

#[derive(Debug, Default)]
struct FakeState {
    templates: HashMap<usize, HashMap<Query, FakeElement>>,
    frame_templates: HashMap<usize, Vec<(String, FrameBehavior)>>,
    failures: HashSet<FailPoint>,
    pages: Vec<FakePage>,
    events: Vec<FakeEvent>,
    launched_at: Option<Instant>,
    viewport_height: i64,
    flaky_page_lookups: u32,
}

impl FakeState {
    fn open_page(&mut self) -> usize {
        let index = self.pages.len();
        let mut frames = vec![("main".to_string(), FrameBehavior::Ready)];
        frames.extend(self.frame_templates.get(&index).cloned().unwrap_or_default());
        self.pages.push(FakePage {
            url: "about:blank".to_string(),
            elements: self.templates.get(&index).cloned().unwrap_or_default(),
            frames,
        });
        index
    }

    fn page(&self, id: &PageId) -> E2eResult<&FakePage> {
        let index = page_index(id)?;
        self.pages
            .get(index)
            .ok_or_else(|| E2eError::Driver(format!("no such page: {}", id)))
    }

    fn page_mut(&mut self, id: &PageId) -> E2eResult<&mut FakePage> {
        let index = page_index(id)?;
        self.pages
            .get_mut(index)
            .ok_or_else(|| E2eError::Driver(format!("no such page: {}", id)))
    }

    fn is_visible(&self, element: &FakeElement) -> bool {
        if element.visible {
            return true;
        }
        match (element.reveal_after, self.launched_at) {
            (Some(delay), Some(start)) => start.elapsed() >= delay,
            _ => false,
        }
    }
}

fn page_id(index: usize) -> PageId {
    PageId(format!("page-{}", index))
}

fn page_index(id: &PageId) -> E2eResult<usize> {
    id.0.strip_prefix("page-")
        .and_then(|n| n.parse().ok())
        .ok_or_else(|| E2eError::Driver(format!("malformed page id: {}", id)))
}

/// Scripted application plus launcher. Clones share state.
#[derive(Debug, Clone)]
pub struct FakeLauncher {
    state: Arc<Mutex<FakeState>>,
}

impl Default for FakeLauncher {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeLauncher {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeState {
                viewport_height: 720,
                ..Default::default()
            })),
        }
    }

    /// Place an element on the page with this creation index
    pub fn element(self, page: usize, locator: Locator, element: FakeElement) -> Self {
        self.state
            .lock()
            .templates
            .entry(page)
            .or_default()
            .insert(locator.to_query(), element);
        self
    }

    /// Attach a sub-frame to the page with this creation index
    pub fn frame(self, page: usize, name: &str, behavior: FrameBehavior) -> Self {
        self.state
            .lock()
            .frame_templates
            .entry(page)
            .or_default()
            .push((name.to_string(), behavior));
        self
    }

    /// The next `n` page lookups error, as while a new tab is still attaching
    pub fn failing_page_lookups(self, n: u32) -> Self {
        self.state.lock().flaky_page_lookups = n;
        self
    }

    pub fn fail(self, point: FailPoint) -> Self {
        self.state.lock().failures.insert(point);
        self
    }

    pub fn events(&self) -> Vec<FakeEvent> {
        self.state.lock().events.clone()
    }

    pub fn count(&self, pred: impl Fn(&FakeEvent) -> bool) -> usize {
        self.state.lock().events.iter().filter(|e| pred(e)).count()
    }

    /// Current value of an element on an open page
    pub fn value_of(&self, page: usize, locator: &Locator) -> Option<String> {
        let state = self.state.lock();
        state
            .pages
            .get(page)
            .and_then(|p| p.elements.get(&locator.to_query()))
            .map(|e| e.value.clone())
    }

    pub fn url_of(&self, page: usize) -> Option<String> {
        self.state.lock().pages.get(page).map(|p| p.url.clone())
    }
}

#[async_trait]
impl Launcher for FakeLauncher {
    async fn launch(&self, config: &SessionConfig) -> E2eResult<Box<dyn Driver>> {
        let mut state = self.state.lock();
        if state.failures.contains(&FailPoint::Launch) {
            return Err(E2eError::EnvironmentUnavailable(
                "fake browser refused to launch".into(),
            ));
        }
        state.events.push(FakeEvent::Launch);
        state.launched_at = Some(Instant::now());
        state.viewport_height = i64::from(config.window.height);
        Ok(Box::new(FakeDriver {
            state: Arc::clone(&self.state),
        }))
    }
}

pub struct FakeDriver {
    state: Arc<Mutex<FakeState>>,
}

impl FakeDriver {
    fn check(&self, point: FailPoint) -> E2eResult<()> {
        if self.state.lock().failures.contains(&point) {
            Err(E2eError::Driver(format!("injected failure at {:?}", point)))
        } else {
            Ok(())
        }
    }

    fn fails(&self, point: FailPoint) -> bool {
        self.state.lock().failures.contains(&point)
    }

    fn element<T>(
        &self,
        page: &PageId,
        query: &Query,
        f: impl FnOnce(&FakeState, &FakeElement) -> T,
    ) -> E2eResult<Option<T>> {
        let state = self.state.lock();
        let p = state.page(page)?;
        Ok(p.elements.get(query).map(|e| f(&state, e)))
    }

    fn not_found(query: &Query) -> E2eError {
        E2eError::ElementNotFound {
            locator: format!("{:?}", query),
        }
    }
}

#[async_trait]
impl Driver for FakeDriver {
    async fn new_context(&mut self) -> E2eResult<()> {
        self.check(FailPoint::NewContext)?;
        self.state.lock().events.push(FakeEvent::NewContext);
        Ok(())
    }

    async fn new_page(&mut self) -> E2eResult<PageId> {
        self.check(FailPoint::NewPage)?;
        let mut state = self.state.lock();
        let index = state.open_page();
        state.events.push(FakeEvent::NewPage(index));
        Ok(page_id(index))
    }

    async fn pages(&self) -> E2eResult<Vec<PageId>> {
        let mut state = self.state.lock();
        if state.failures.contains(&FailPoint::Pages) || state.flaky_page_lookups > 0 {
            state.flaky_page_lookups = state.flaky_page_lookups.saturating_sub(1);
            return Err(E2eError::Driver("target list unavailable".into()));
        }
        Ok((0..state.pages.len()).map(page_id).collect())
    }

    async fn navigate(&self, page: &PageId, url: &str) -> E2eResult<()> {
        if self.fails(FailPoint::HangNavigate) {
            futures::future::pending::<()>().await;
        }
        if self.fails(FailPoint::Navigate) {
            return Err(E2eError::Navigation {
                url: url.to_string(),
                reason: "net::ERR_CONNECTION_REFUSED".into(),
            });
        }
        let index = page_index(page)?;
        let mut state = self.state.lock();
        state.page_mut(page)?.url = url.to_string();
        state.events.push(FakeEvent::Navigate {
            page: index,
            url: url.to_string(),
        });
        Ok(())
    }

    async fn frames(&self, page: &PageId) -> E2eResult<Vec<FrameId>> {
        let state = self.state.lock();
        Ok(state
            .page(page)?
            .frames
            .iter()
            .map(|(name, _)| FrameId(name.clone()))
            .collect())
    }

    async fn ready_state(&self, page: &PageId, frame: &FrameId) -> E2eResult<ReadyState> {
        let index = page_index(page)?;
        let behavior = {
            let mut state = self.state.lock();
            state.events.push(FakeEvent::ReadyState {
                page: index,
                frame: frame.0.clone(),
            });
            state
                .page(page)?
                .frames
                .iter()
                .find(|(name, _)| *name == frame.0)
                .map(|(_, b)| *b)
        };
        match behavior {
            Some(FrameBehavior::Ready) => Ok(ReadyState::Complete),
            Some(FrameBehavior::NeverReady) => Ok(ReadyState::Loading),
            Some(FrameBehavior::Error) => Err(E2eError::Driver(format!(
                "frame {} detached during evaluation",
                frame
            ))),
            None => Err(E2eError::Driver(format!("no such frame: {}", frame))),
        }
    }

    async fn count(&self, page: &PageId, query: &Query) -> E2eResult<usize> {
        Ok(self.element(page, query, |_, _| ())?.map_or(0, |_| 1))
    }

    async fn bounds(&self, page: &PageId, query: &Query) -> E2eResult<Option<BoundingBox>> {
        let mut state = self.state.lock();
        let p = state.page_mut(page)?;
        Ok(p.elements.get_mut(query).map(|e| {
            let y = f64::from(e.unstable_polls) * 10.0;
            e.unstable_polls = e.unstable_polls.saturating_sub(1);
            BoundingBox {
                x: 0.0,
                y,
                width: 100.0,
                height: 20.0,
            }
        }))
    }

    async fn is_visible(&self, page: &PageId, query: &Query) -> E2eResult<bool> {
        Ok(self
            .element(page, query, |state, e| state.is_visible(e))?
            .unwrap_or(false))
    }

    async fn click(&self, page: &PageId, query: &Query) -> E2eResult<()> {
        let index = page_index(page)?;
        let (hang, effects) = self
            .element(page, query, |_, e| (e.hang, e.effects.clone()))?
            .ok_or_else(|| Self::not_found(query))?;
        if hang {
            futures::future::pending::<()>().await;
        }

        let mut state = self.state.lock();
        state.events.push(FakeEvent::Click {
            page: index,
            query: query.clone(),
        });
        for effect in effects {
            match effect {
                Effect::OpenPage => {
                    let opened = state.open_page();
                    state.events.push(FakeEvent::NewPage(opened));
                }
                Effect::Reveal(target) => {
                    if let Some(e) = state.page_mut(page)?.elements.get_mut(&target) {
                        e.visible = true;
                    }
                }
                Effect::Panic(message) => {
                    drop(state);
                    panic!("{}", message);
                }
            }
        }
        Ok(())
    }

    async fn fill(&self, page: &PageId, query: &Query, value: &str) -> E2eResult<()> {
        let index = page_index(page)?;
        let hang = self
            .element(page, query, |_, e| e.hang)?
            .ok_or_else(|| Self::not_found(query))?;
        if hang {
            futures::future::pending::<()>().await;
        }

        let mut state = self.state.lock();
        state.events.push(FakeEvent::Fill {
            page: index,
            query: query.clone(),
            value: value.to_string(),
        });
        if let Some(e) = state.page_mut(page)?.elements.get_mut(query) {
            if !e.drops_input {
                e.value = value.to_string();
            }
        }
        Ok(())
    }

    async fn input_value(&self, page: &PageId, query: &Query) -> E2eResult<String> {
        self.element(page, query, |_, e| e.value.clone())?
            .ok_or_else(|| Self::not_found(query))
    }

    async fn scroll_by(&self, page: &PageId, delta_y: i64) -> E2eResult<()> {
        let index = page_index(page)?;
        if self.fails(FailPoint::HangScroll) {
            futures::future::pending::<()>().await;
        }
        self.state.lock().events.push(FakeEvent::Scroll {
            page: index,
            delta_y,
        });
        Ok(())
    }

    async fn viewport_height(&self, _page: &PageId) -> E2eResult<i64> {
        Ok(self.state.lock().viewport_height)
    }

    async fn close_context(&mut self) -> E2eResult<()> {
        let mut state = self.state.lock();
        state.events.push(FakeEvent::CloseContext);
        state.pages.clear();
        if state.failures.contains(&FailPoint::CloseContext) {
            return Err(E2eError::Driver("context already gone".into()));
        }
        Ok(())
    }

    async fn close_browser(&mut self) -> E2eResult<()> {
        self.state.lock().events.push(FakeEvent::CloseBrowser);
        if self.fails(FailPoint::HangCloseBrowser) {
            futures::future::pending::<()>().await;
        }
        self.check(FailPoint::CloseBrowser)
    }

    async fn stop(&mut self) -> E2eResult<()> {
        self.state.lock().events.push(FakeEvent::Stop);
        self.check(FailPoint::Stop)
    }
}
