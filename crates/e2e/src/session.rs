//! Browser session lifecycle
//!
//! A [`Session`] owns one browser, one isolated context and its pages.
//! Release consumes the session, so teardown runs at most once; the runner
//! calls it on every exit path, which makes it exactly once.

use std::future::Future;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::driver::{Driver, Launcher, PageId};
use crate::error::{E2eError, E2eResult};

pub struct Session {
    driver: Box<dyn Driver>,
    context_open: bool,
    default_timeout: Duration,
    teardown_timeout: Duration,
}

/// Outcome of each teardown step, in execution order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TeardownReport {
    pub steps: Vec<TeardownStep>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TeardownStep {
    pub name: String,
    pub success: bool,
    pub error: Option<String>,
}

impl TeardownReport {
    pub fn is_clean(&self) -> bool {
        self.steps.iter().all(|s| s.success)
    }

    fn record(
        &mut self,
        name: &str,
        outcome: Result<E2eResult<()>, tokio::time::error::Elapsed>,
        timeout: Duration,
    ) {
        let error = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(_) => Some(format!("timed out after {} ms", timeout.as_millis())),
        };
        if let Some(error) = &error {
            warn!("Teardown step '{}' failed: {}", name, error);
        } else {
            debug!("Teardown step '{}' done", name);
        }
        self.steps.push(TeardownStep {
            name: name.to_string(),
            success: error.is_none(),
            error,
        });
    }
}

impl Session {
    /// Launch a browser, open an isolated context and a first page.
    ///
    /// Any failure is reported as `EnvironmentUnavailable`. Resources acquired
    /// before the failing step are released before returning.
    pub async fn acquire(launcher: &dyn Launcher, config: &SessionConfig) -> E2eResult<Self> {
        let launch_timeout = config.launch_timeout();
        let driver = bounded(launch_timeout, "launch", launcher.launch(config))
            .await
            .map_err(environment)?;

        let mut session = Session {
            driver,
            context_open: false,
            default_timeout: config.default_timeout(),
            teardown_timeout: config.teardown_timeout(),
        };

        let context = bounded(launch_timeout, "new context", session.driver.new_context()).await;
        if let Err(e) = context {
            session.release().await;
            return Err(environment(e));
        }
        session.context_open = true;

        let page = bounded(launch_timeout, "new page", session.driver.new_page()).await;
        if let Err(e) = page {
            session.release().await;
            return Err(environment(e));
        }

        debug!(
            "Session ready (default timeout {} ms)",
            session.default_timeout.as_millis()
        );
        Ok(session)
    }

    pub fn driver(&self) -> &dyn Driver {
        self.driver.as_ref()
    }

    /// Interaction timeout applied when a step does not set its own
    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// The most recently opened page of the context
    pub async fn current_page(&self) -> E2eResult<PageId> {
        self.driver
            .pages()
            .await?
            .pop()
            .ok_or_else(|| E2eError::StepFailed {
                step: "resolve page".into(),
                reason: "no open page in the browser context".into(),
            })
    }

    /// Close context, then browser, then stop the automation session. Each
    /// step is bounded and guarded on its own; failures are logged and
    /// recorded, never raised.
    pub async fn release(mut self) -> TeardownReport {
        let timeout = self.teardown_timeout;
        let mut report = TeardownReport::default();

        if self.context_open {
            let outcome = tokio::time::timeout(timeout, self.driver.close_context()).await;
            report.record("close_context", outcome, timeout);
            self.context_open = false;
        }

        let outcome = tokio::time::timeout(timeout, self.driver.close_browser()).await;
        report.record("close_browser", outcome, timeout);

        let outcome = tokio::time::timeout(timeout, self.driver.stop()).await;
        report.record("stop", outcome, timeout);

        report
    }
}

async fn bounded<T>(
    timeout: Duration,
    what: &str,
    fut: impl Future<Output = E2eResult<T>>,
) -> E2eResult<T> {
    tokio::time::timeout(timeout, fut).await.map_err(|_| {
        E2eError::EnvironmentUnavailable(format!(
            "{} did not complete within {} ms",
            what,
            timeout.as_millis()
        ))
    })?
}

fn environment(err: E2eError) -> E2eError {
    match err {
        E2eError::EnvironmentUnavailable(_) => err,
        other => E2eError::EnvironmentUnavailable(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::{FailPoint, FakeEvent, FakeLauncher};

    fn closes(app: &FakeLauncher) -> (usize, usize, usize) {
        (
            app.count(|e| matches!(e, FakeEvent::CloseContext)),
            app.count(|e| matches!(e, FakeEvent::CloseBrowser)),
            app.count(|e| matches!(e, FakeEvent::Stop)),
        )
    }

    #[tokio::test]
    async fn acquire_then_release_runs_teardown_in_order() {
        let app = FakeLauncher::new();
        let session = Session::acquire(&app, &SessionConfig::default()).await.unwrap();
        assert_eq!(session.default_timeout(), Duration::from_secs(5));
        assert_eq!(session.current_page().await.unwrap(), PageId("page-0".into()));

        let report = session.release().await;
        assert!(report.is_clean());
        let names: Vec<_> = report.steps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["close_context", "close_browser", "stop"]);
        assert_eq!(
            &app.events()[app.events().len() - 3..],
            &[FakeEvent::CloseContext, FakeEvent::CloseBrowser, FakeEvent::Stop]
        );
    }

    #[tokio::test]
    async fn launch_failure_is_environment_unavailable() {
        let app = FakeLauncher::new().fail(FailPoint::Launch);
        let err = Session::acquire(&app, &SessionConfig::default()).await.err().unwrap();
        assert!(matches!(err, E2eError::EnvironmentUnavailable(_)));
        assert_eq!(closes(&app), (0, 0, 0));
    }

    #[tokio::test]
    async fn context_failure_releases_browser_once() {
        let app = FakeLauncher::new().fail(FailPoint::NewContext);
        let err = Session::acquire(&app, &SessionConfig::default()).await.err().unwrap();
        assert!(matches!(err, E2eError::EnvironmentUnavailable(_)));
        assert_eq!(closes(&app), (0, 1, 1));
    }

    #[tokio::test]
    async fn page_failure_releases_context_and_browser_once() {
        let app = FakeLauncher::new().fail(FailPoint::NewPage);
        assert!(Session::acquire(&app, &SessionConfig::default()).await.is_err());
        assert_eq!(closes(&app), (1, 1, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn failing_teardown_steps_do_not_block_the_rest() {
        let app = FakeLauncher::new()
            .fail(FailPoint::CloseContext)
            .fail(FailPoint::HangCloseBrowser);
        let session = Session::acquire(&app, &SessionConfig::default()).await.unwrap();

        let report = session.release().await;
        assert!(!report.is_clean());
        assert!(!report.steps[0].success);
        assert!(report.steps[1].error.as_deref().unwrap().contains("timed out"));
        assert!(report.steps[2].success);
        assert_eq!(closes(&app), (1, 1, 1));
    }
}
