//! Chromium driver over the DevTools protocol
//!
//! Element queries run as page scripts (XPath through `document.evaluate`,
//! CSS through `querySelectorAll`). Clicks and scrolls are dispatched as
//! trusted input events at the element's on-screen position, so links that
//! open new tabs behave as they would for a user.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::BrowserContextId;
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchMouseEventParams, DispatchMouseEventType, MouseButton,
};
use chromiumoxide::cdp::browser_protocol::page::{
    CreateIsolatedWorldParams, FrameId as CdpFrameId, FrameTree, GetFrameTreeParams,
    NavigateParams,
};
use chromiumoxide::cdp::browser_protocol::target::{
    CreateBrowserContextParams, CreateTargetParams, DisposeBrowserContextParams,
    GetTargetsParams, TargetId,
};
use chromiumoxide::cdp::js_protocol::runtime::{EvaluateParams, ExecutionContextId};
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::page::Page;
use futures::StreamExt;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::SessionConfig;
use crate::driver::{BoundingBox, Driver, FrameId, Launcher, PageId, ReadyState};
use crate::error::{E2eError, E2eResult};
use crate::locator::Query;

/// New tabs can take a moment to attach after the click that opened them.
const ATTACH_RETRIES: usize = 20;
const ATTACH_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, Default)]
pub struct ChromiumLauncher;

fn browser_config(config: &SessionConfig) -> E2eResult<BrowserConfig> {
    let (width, height) = (config.window.width, config.window.height);
    let viewport = Viewport {
        width,
        height,
        device_scale_factor: None,
        emulating_mobile: false,
        is_landscape: width >= height,
        has_touch: false,
    };

    let mut builder = BrowserConfig::builder()
        .window_size(width, height)
        .viewport(viewport)
        .request_timeout(config.launch_timeout())
        .args(config.launch_flags.clone());

    if !config.headless {
        builder = builder.with_head();
    }
    if !config.sandbox {
        builder = builder.no_sandbox();
    }
    if let Some(path) = &config.chrome_executable {
        builder = builder.chrome_executable(path);
    }

    builder.build().map_err(E2eError::EnvironmentUnavailable)
}

#[async_trait]
impl Launcher for ChromiumLauncher {
    async fn launch(&self, config: &SessionConfig) -> E2eResult<Box<dyn Driver>> {
        let cdp_config = browser_config(config)?;

        let (browser, mut handler) = Browser::launch(cdp_config)
            .await
            .map_err(|e| E2eError::EnvironmentUnavailable(e.to_string()))?;

        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    debug!("CDP handler: {}", e);
                }
            }
        });

        info!(
            "Launched Chromium ({}x{}, headless: {})",
            config.window.width, config.window.height, config.headless
        );

        Ok(Box::new(ChromiumDriver {
            browser,
            handler: Some(handler_task),
            context: None,
            pages: Mutex::new(Vec::new()),
            worlds: Mutex::new(HashMap::new()),
            window: (config.window.width, config.window.height),
        }))
    }
}

struct TrackedPage {
    id: PageId,
    target: TargetId,
    page: Page,
}

pub struct ChromiumDriver {
    browser: Browser,
    handler: Option<JoinHandle<()>>,
    context: Option<BrowserContextId>,
    /// Open pages of the context in the order they were first seen
    pages: Mutex<Vec<TrackedPage>>,
    /// Isolated world per (page, frame), valid until the page navigates
    worlds: Mutex<HashMap<(PageId, String), ExecutionContextId>>,
    window: (u32, u32),
}

#[derive(Debug, Deserialize)]
struct Point {
    x: f64,
    y: f64,
}

impl ChromiumDriver {
    fn page(&self, id: &PageId) -> E2eResult<Page> {
        self.pages
            .lock()
            .iter()
            .find(|t| t.id == *id)
            .map(|t| t.page.clone())
            .ok_or_else(|| E2eError::Driver(format!("page {} is no longer open", id)))
    }

    fn track(&self, target: TargetId, page: Page) -> PageId {
        let id = PageId(target.as_ref().to_string());
        self.pages.lock().push(TrackedPage {
            id: id.clone(),
            target,
            page,
        });
        id
    }

    async fn attach(&self, target: &TargetId) -> E2eResult<Page> {
        let mut last = None;
        for _ in 0..ATTACH_RETRIES {
            match self.browser.get_page(target.clone()).await {
                Ok(page) => return Ok(page),
                Err(e) => last = Some(e),
            }
            tokio::time::sleep(ATTACH_INTERVAL).await;
        }
        Err(E2eError::Driver(format!(
            "page {} never attached: {}",
            target.as_ref(),
            last.map(|e| e.to_string()).unwrap_or_default()
        )))
    }

    /// Evaluate an expression and decode its JSON-serialized result. Going
    /// through `JSON.stringify` keeps `null` results representable.
    async fn eval<T: DeserializeOwned>(&self, page: &PageId, script: String) -> E2eResult<T> {
        let page = self.page(page)?;
        let text: String = page
            .evaluate(format!("JSON.stringify({})", script))
            .await
            .map_err(E2eError::driver)?
            .into_value()
            .map_err(E2eError::driver)?;
        Ok(serde_json::from_str(&text)?)
    }

    async fn mouse(&self, page: &Page, params: DispatchMouseEventParams) -> E2eResult<()> {
        page.execute(params).await.map_err(E2eError::driver)?;
        Ok(())
    }
}

fn js_string(s: &str) -> String {
    serde_json::Value::String(s.to_string()).to_string()
}

/// Script expression evaluating to an array of the query's matches
fn elements_js(query: &Query) -> String {
    match query {
        Query::XPath(xpath) => format!(
            "(() => {{ const r = document.evaluate({}, document, null, \
             XPathResult.ORDERED_NODE_SNAPSHOT_TYPE, null); const out = []; \
             for (let i = 0; i < r.snapshotLength; i++) out.push(r.snapshotItem(i)); \
             return out; }})()",
            js_string(xpath)
        ),
        Query::Css(selector) => {
            format!("Array.from(document.querySelectorAll({}))", js_string(selector))
        }
    }
}

/// Run `body` against the first match; evaluates to `null` when none.
fn with_first(query: &Query, body: &str) -> String {
    format!(
        "(() => {{ const el = {}[0]; if (!el) return null; {} }})()",
        elements_js(query),
        body
    )
}

const BOUNDS_JS: &str = "if (!el.isConnected) return null; \
    const r = el.getBoundingClientRect(); \
    if (r.width === 0 && r.height === 0) return null; \
    return { x: r.x, y: r.y, width: r.width, height: r.height };";

const VISIBLE_JS: &str = "const r = el.getBoundingClientRect(); \
    const s = window.getComputedStyle(el); \
    return r.width > 0 && r.height > 0 && s.visibility !== 'hidden';";

const CLICK_POINT_JS: &str = "el.scrollIntoView({ block: 'center', inline: 'center' }); \
    const r = el.getBoundingClientRect(); \
    return { x: r.x + r.width / 2, y: r.y + r.height / 2 };";

const VALUE_JS: &str = "return el.value !== undefined ? String(el.value) : (el.textContent || '');";

fn fill_js(value: &str) -> String {
    format!(
        "el.focus(); const value = {}; \
         if (el instanceof HTMLInputElement || el instanceof HTMLTextAreaElement) {{ \
           const proto = el instanceof HTMLInputElement ? HTMLInputElement.prototype : HTMLTextAreaElement.prototype; \
           Object.getOwnPropertyDescriptor(proto, 'value').set.call(el, value); \
         }} else if (el.isContentEditable) {{ \
           el.textContent = value; \
         }} else {{ return false; }} \
         el.dispatchEvent(new Event('input', {{ bubbles: true }})); \
         el.dispatchEvent(new Event('change', {{ bubbles: true }})); \
         return true;",
        js_string(value)
    )
}

fn flatten_frames(tree: &FrameTree, out: &mut Vec<FrameId>) {
    out.push(FrameId(tree.frame.id.as_ref().to_string()));
    if let Some(children) = &tree.child_frames {
        for child in children {
            flatten_frames(child, out);
        }
    }
}

fn not_found(query: &Query) -> E2eError {
    E2eError::ElementNotFound {
        locator: format!("{:?}", query),
    }
}

#[async_trait]
impl Driver for ChromiumDriver {
    async fn new_context(&mut self) -> E2eResult<()> {
        let resp = self
            .browser
            .execute(CreateBrowserContextParams::default())
            .await
            .map_err(E2eError::driver)?;
        self.context = Some(resp.result.browser_context_id.clone());
        Ok(())
    }

    async fn new_page(&mut self) -> E2eResult<PageId> {
        let page = match &self.context {
            Some(context) => {
                let params = CreateTargetParams::builder()
                    .url("about:blank")
                    .browser_context_id(context.clone())
                    .build()
                    .map_err(E2eError::Driver)?;
                self.browser.new_page(params).await
            }
            None => self.browser.new_page("about:blank").await,
        }
        .map_err(E2eError::driver)?;

        let target = page.target_id().clone();
        Ok(self.track(target, page))
    }

    async fn pages(&self) -> E2eResult<Vec<PageId>> {
        let Some(context) = self.context.clone() else {
            return Ok(self.pages.lock().iter().map(|t| t.id.clone()).collect());
        };

        let live: Vec<TargetId> = self
            .browser
            .execute(GetTargetsParams::default())
            .await
            .map_err(E2eError::driver)?
            .result
            .target_infos
            .into_iter()
            .filter(|t| t.r#type == "page" && t.browser_context_id.as_ref() == Some(&context))
            .map(|t| t.target_id)
            .collect();

        let unseen: Vec<TargetId> = {
            let mut tracked = self.pages.lock();
            tracked.retain(|t| live.contains(&t.target));
            live.iter()
                .filter(|id| !tracked.iter().any(|t| &t.target == *id))
                .cloned()
                .collect()
        };

        for target in unseen {
            let page = self.attach(&target).await?;
            debug!("Discovered page {}", target.as_ref());
            self.track(target, page);
        }

        Ok(self.pages.lock().iter().map(|t| t.id.clone()).collect())
    }

    async fn navigate(&self, page: &PageId, url: &str) -> E2eResult<()> {
        self.worlds.lock().retain(|(p, _), _| p != page);
        let page = self.page(page)?;
        let resp = page
            .execute(NavigateParams::new(url))
            .await
            .map_err(|e| E2eError::Navigation {
                url: url.to_string(),
                reason: e.to_string(),
            })?;
        match &resp.result.error_text {
            Some(reason) => Err(E2eError::Navigation {
                url: url.to_string(),
                reason: reason.clone(),
            }),
            None => Ok(()),
        }
    }

    async fn frames(&self, page: &PageId) -> E2eResult<Vec<FrameId>> {
        let page = self.page(page)?;
        let resp = page
            .execute(GetFrameTreeParams::default())
            .await
            .map_err(E2eError::driver)?;
        let mut frames = Vec::new();
        flatten_frames(&resp.result.frame_tree, &mut frames);
        Ok(frames)
    }

    async fn ready_state(&self, page: &PageId, frame: &FrameId) -> E2eResult<ReadyState> {
        let key = (page.clone(), frame.0.clone());
        let tab = self.page(page)?;

        let cached = self.worlds.lock().get(&key).cloned();
        if let Some(context) = cached {
            match read_ready_state(&tab, context, frame).await {
                Ok(state) => return Ok(state),
                Err(e) => {
                    debug!("Isolated world for frame {} is gone: {}", frame, e);
                    self.worlds.lock().remove(&key);
                }
            }
        }

        let world = tab
            .execute(CreateIsolatedWorldParams::new(CdpFrameId::new(frame.0.clone())))
            .await
            .map_err(E2eError::driver)?;
        let context = world.result.execution_context_id.clone();
        self.worlds.lock().insert(key, context.clone());
        read_ready_state(&tab, context, frame).await
    }

    async fn count(&self, page: &PageId, query: &Query) -> E2eResult<usize> {
        self.eval(page, format!("{}.length", elements_js(query))).await
    }

    async fn bounds(&self, page: &PageId, query: &Query) -> E2eResult<Option<BoundingBox>> {
        self.eval(page, with_first(query, BOUNDS_JS)).await
    }

    async fn is_visible(&self, page: &PageId, query: &Query) -> E2eResult<bool> {
        let visible: Option<bool> = self.eval(page, with_first(query, VISIBLE_JS)).await?;
        Ok(visible.unwrap_or(false))
    }

    async fn click(&self, page: &PageId, query: &Query) -> E2eResult<()> {
        let point: Point = self
            .eval::<Option<Point>>(page, with_first(query, CLICK_POINT_JS))
            .await?
            .ok_or_else(|| not_found(query))?;
        let cdp_page = self.page(page)?;

        let moved = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseMoved)
            .x(point.x)
            .y(point.y)
            .build()
            .map_err(E2eError::Driver)?;
        self.mouse(&cdp_page, moved).await?;

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
                .map_err(E2eError::Driver)?;
            self.mouse(&cdp_page, params).await?;
        }
        Ok(())
    }

    async fn fill(&self, page: &PageId, query: &Query, value: &str) -> E2eResult<()> {
        let filled: Option<bool> = self.eval(page, with_first(query, &fill_js(value))).await?;
        match filled {
            Some(true) => Ok(()),
            Some(false) => Err(E2eError::Driver(
                "element is not an input, textarea or contenteditable".into(),
            )),
            None => Err(not_found(query)),
        }
    }

    async fn input_value(&self, page: &PageId, query: &Query) -> E2eResult<String> {
        self.eval::<Option<String>>(page, with_first(query, VALUE_JS))
            .await?
            .ok_or_else(|| not_found(query))
    }

    async fn scroll_by(&self, page: &PageId, delta_y: i64) -> E2eResult<()> {
        let cdp_page = self.page(page)?;
        let (width, height) = self.window;
        let params = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseWheel)
            .x(f64::from(width) / 2.0)
            .y(f64::from(height) / 2.0)
            .delta_x(0.0)
            .delta_y(delta_y as f64)
            .build()
            .map_err(E2eError::Driver)?;
        self.mouse(&cdp_page, params).await
    }

    async fn viewport_height(&self, page: &PageId) -> E2eResult<i64> {
        self.eval(page, "window.innerHeight".to_string()).await
    }

    async fn close_context(&mut self) -> E2eResult<()> {
        self.pages.lock().clear();
        if let Some(context) = self.context.take() {
            self.browser
                .execute(DisposeBrowserContextParams::new(context))
                .await
                .map_err(E2eError::driver)?;
        }
        Ok(())
    }

    async fn close_browser(&mut self) -> E2eResult<()> {
        self.browser.close().await.map_err(E2eError::driver)?;
        self.browser.wait().await?;
        Ok(())
    }

    async fn stop(&mut self) -> E2eResult<()> {
        if let Some(task) = self.handler.take() {
            task.abort();
        }
        Ok(())
    }
}

async fn read_ready_state(
    page: &Page,
    context: ExecutionContextId,
    frame: &FrameId,
) -> E2eResult<ReadyState> {
    let params = EvaluateParams::builder()
        .expression("document.readyState")
        .context_id(context)
        .return_by_value(true)
        .build()
        .map_err(E2eError::Driver)?;
    let resp = page.execute(params).await.map_err(E2eError::driver)?;
    if let Some(details) = &resp.result.exception_details {
        return Err(E2eError::Driver(details.text.clone()));
    }

    resp.result
        .result
        .value
        .as_ref()
        .and_then(|v| v.as_str())
        .and_then(ReadyState::parse)
        .ok_or_else(|| E2eError::Driver(format!("frame {} has no document", frame)))
}

impl Drop for ChromiumDriver {
    fn drop(&mut self) {
        if let Some(task) = self.handler.take() {
            task.abort();
        }
    }
}
