//! Step execution
//!
//! Every step re-resolves its scope to the newest page of the context, so a
//! click that opens a new tab moves the rest of the scenario onto it.

use std::future::Future;
use std::time::Duration;

use tracing::debug;

use crate::config::{NavigationConfig, ReadinessConfig, ReadinessMode, TargetConfig};
use crate::driver::{Driver, PageId};
use crate::error::{E2eError, E2eResult};
use crate::locator::{Locator, Query};
use crate::navigator;
use crate::session::Session;
use crate::spec::Step;

#[derive(Debug, Clone, Default)]
pub struct StepExecutor {
    readiness: ReadinessConfig,
    navigation: NavigationConfig,
    target: TargetConfig,
}

impl StepExecutor {
    pub fn new(readiness: ReadinessConfig, navigation: NavigationConfig, target: TargetConfig) -> Self {
        Self {
            readiness,
            navigation,
            target,
        }
    }

    pub async fn run_step(&self, session: &Session, step: &Step) -> E2eResult<()> {
        match step.note() {
            Some(note) => debug!("{} ({})", step.describe(), note),
            None => debug!("{}", step.describe()),
        }

        let driver = session.driver();
        match step {
            Step::Click {
                locator, timeout_ms, ..
            } => {
                let timeout = action_timeout(session, *timeout_ms);
                let page = current_page(session, timeout).await?;
                let query = self.prepare(driver, &page, locator, timeout).await?;
                act(timeout, "click", &locator.to_string(), driver.click(&page, &query)).await
            }

            Step::Fill {
                locator,
                value,
                timeout_ms,
                ..
            } => {
                let timeout = action_timeout(session, *timeout_ms);
                let target = locator.to_string();
                let page = current_page(session, timeout).await?;
                let query = self.prepare(driver, &page, locator, timeout).await?;
                act(timeout, "fill", &target, driver.fill(&page, &query, value)).await?;

                let actual = act(timeout, "read value", &target, driver.input_value(&page, &query)).await?;
                if actual != *value {
                    return Err(E2eError::StepFailed {
                        step: step.describe(),
                        reason: format!("field holds '{}' after fill, expected '{}'", actual, value),
                    });
                }
                Ok(())
            }

            Step::Navigate { url, pause_ms, .. } => {
                let page = current_page(session, session.default_timeout()).await?;
                let url = self.target.resolve_url(url)?;
                navigator::goto(driver, &page, &url, self.navigation.commit_timeout()).await?;
                let report = navigator::settle(driver, &page, self.navigation.settle_timeout()).await;
                debug!("Settled {}/{} frame(s)", report.settled, report.frames);
                if let Some(ms) = pause_ms {
                    tokio::time::sleep(Duration::from_millis(*ms)).await;
                }
                Ok(())
            }

            Step::Scroll { delta_y, .. } => {
                let timeout = session.default_timeout();
                let page = current_page(session, timeout).await?;
                let delta = match delta_y {
                    Some(dy) => *dy,
                    None => act(timeout, "measure viewport", "page", driver.viewport_height(&page)).await?,
                };
                act(timeout, "scroll", "page", driver.scroll_by(&page, delta)).await
            }

            Step::Sleep { ms, .. } => {
                tokio::time::sleep(Duration::from_millis(*ms)).await;
                Ok(())
            }
        }
    }

    /// Apply the readiness policy, then require at least one match.
    async fn prepare(
        &self,
        driver: &dyn Driver,
        page: &PageId,
        locator: &Locator,
        timeout: Duration,
    ) -> E2eResult<Query> {
        let query = locator.to_query();
        self.wait_ready(driver, page, &query).await;

        let target = locator.to_string();
        if act(timeout, "count", &target, driver.count(page, &query)).await? == 0 {
            return Err(E2eError::ElementNotFound {
                locator: locator.to_string(),
            });
        }
        Ok(query)
    }

    async fn wait_ready(&self, driver: &dyn Driver, page: &PageId, query: &Query) {
        match self.readiness.mode {
            ReadinessMode::Fixed => {
                tokio::time::sleep(Duration::from_millis(self.readiness.fixed_delay_ms)).await;
            }
            ReadinessMode::Poll => {
                let bound = Duration::from_millis(self.readiness.poll_timeout_ms);
                let interval = Duration::from_millis(self.readiness.poll_interval_ms.max(1));
                if tokio::time::timeout(bound, poll_stable(driver, page, query, interval))
                    .await
                    .is_err()
                {
                    debug!("{:?} not stable after {} ms, acting anyway", query, bound.as_millis());
                }
            }
        }
    }
}

/// Wait until the element is attached and its box is unchanged across two
/// consecutive polls.
async fn poll_stable(driver: &dyn Driver, page: &PageId, query: &Query, interval: Duration) {
    let mut previous = None;
    loop {
        match driver.bounds(page, query).await {
            Ok(Some(bounds)) => {
                if previous == Some(bounds) {
                    return;
                }
                previous = Some(bounds);
            }
            _ => previous = None,
        }
        tokio::time::sleep(interval).await;
    }
}

fn action_timeout(session: &Session, step_timeout_ms: Option<u64>) -> Duration {
    step_timeout_ms
        .map(Duration::from_millis)
        .unwrap_or_else(|| session.default_timeout())
}

pub(crate) async fn current_page(session: &Session, timeout: Duration) -> E2eResult<PageId> {
    act(timeout, "resolve page", "page", session.current_page()).await
}

async fn act<T>(
    timeout: Duration,
    action: &str,
    target: &str,
    fut: impl Future<Output = E2eResult<T>>,
) -> E2eResult<T> {
    match tokio::time::timeout(timeout, fut).await {
        Ok(Err(E2eError::ElementNotFound { .. })) => Err(E2eError::ElementNotFound {
            locator: target.to_string(),
        }),
        Ok(result) => result,
        Err(_) => Err(E2eError::ActionTimeout {
            action: action.to_string(),
            locator: target.to_string(),
            timeout_ms: timeout.as_millis() as u64,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::fake::{FailPoint, FakeElement, FakeEvent, FakeLauncher};
    use tokio::time::Instant;

    fn loc(raw: &str) -> Locator {
        Locator::parse(raw).unwrap()
    }

    fn click(raw: &str) -> Step {
        Step::Click {
            locator: loc(raw),
            timeout_ms: None,
            note: None,
        }
    }

    fn fill(raw: &str, value: &str) -> Step {
        Step::Fill {
            locator: loc(raw),
            value: value.to_string(),
            timeout_ms: None,
            note: None,
        }
    }

    async fn session(app: &FakeLauncher) -> Session {
        Session::acquire(app, &SessionConfig::default()).await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn steps_follow_the_newest_page() {
        let app = FakeLauncher::new()
            .element(0, loc("text=Sign In"), FakeElement::button().opens_page())
            .element(1, loc("testid=email"), FakeElement::input());
        let session = session(&app).await;
        let executor = StepExecutor::default();

        executor.run_step(&session, &click("text=Sign In")).await.unwrap();
        executor
            .run_step(&session, &fill("testid=email", "palbiraj4@gmail.com"))
            .await
            .unwrap();

        assert_eq!(
            app.value_of(1, &loc("testid=email")).as_deref(),
            Some("palbiraj4@gmail.com")
        );
        assert!(app
            .events()
            .iter()
            .any(|e| matches!(e, FakeEvent::Fill { page: 1, .. })));
        session.release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn fill_with_empty_string_clears() {
        let app = FakeLauncher::new().element(
            0,
            loc("testid=email"),
            FakeElement::input().with_value("testuser@example.com"),
        );
        let session = session(&app).await;

        StepExecutor::default()
            .run_step(&session, &fill("testid=email", ""))
            .await
            .unwrap();
        assert_eq!(app.value_of(0, &loc("testid=email")).as_deref(), Some(""));
        session.release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn fill_that_does_not_stick_fails() {
        let app = FakeLauncher::new().element(
            0,
            loc("testid=code"),
            FakeElement::input().with_value("000000").drops_input(),
        );
        let session = session(&app).await;

        let err = StepExecutor::default()
            .run_step(&session, &fill("testid=code", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, E2eError::StepFailed { .. }));
        session.release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn missing_element_is_not_found() {
        let app = FakeLauncher::new();
        let session = session(&app).await;

        let err = StepExecutor::default()
            .run_step(&session, &click("xpath=html/body/div[2]/nav/div/div/div/div/a"))
            .await
            .unwrap_err();
        match err {
            E2eError::ElementNotFound { locator } => {
                assert_eq!(locator, "xpath=html/body/div[2]/nav/div/div/div/div/a")
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(app.count(|e| matches!(e, FakeEvent::Click { .. })), 0);
        session.release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_action_times_out() {
        let app = FakeLauncher::new().element(0, loc("text=Continue"), FakeElement::button().hangs());
        let session = session(&app).await;
        let step = Step::Click {
            locator: loc("text=Continue"),
            timeout_ms: Some(1500),
            note: None,
        };

        let err = StepExecutor::default().run_step(&session, &step).await.unwrap_err();
        assert!(matches!(
            err,
            E2eError::ActionTimeout { timeout_ms: 1500, .. }
        ));
        session.release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_scroll_times_out() {
        let app = FakeLauncher::new().fail(FailPoint::HangScroll);
        let session = session(&app).await;

        let err = StepExecutor::default()
            .run_step(&session, &Step::Scroll { delta_y: Some(500), note: None })
            .await
            .unwrap_err();
        match err {
            E2eError::ActionTimeout { action, timeout_ms, .. } => {
                assert_eq!(action, "scroll");
                assert_eq!(timeout_ms, 5000);
            }
            other => panic!("unexpected error: {}", other),
        }
        session.release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn fixed_readiness_pauses_before_acting() {
        let app = FakeLauncher::new().element(0, loc("text=Go"), FakeElement::button());
        let session = session(&app).await;
        let executor = StepExecutor::new(
            ReadinessConfig {
                mode: ReadinessMode::Fixed,
                ..Default::default()
            },
            NavigationConfig::default(),
            TargetConfig::default(),
        );

        let start = Instant::now();
        executor.run_step(&session, &click("text=Go")).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(3000));
        session.release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn poll_readiness_waits_for_stable_box() {
        let app = FakeLauncher::new().element(0, loc("text=Go"), FakeElement::button().unstable_for(3));
        let session = session(&app).await;

        let start = Instant::now();
        StepExecutor::default()
            .run_step(&session, &click("text=Go"))
            .await
            .unwrap();
        let waited = start.elapsed();
        assert!(waited >= Duration::from_millis(300));
        assert!(waited < Duration::from_millis(3000));
        session.release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn scroll_defaults_to_one_viewport_and_navigate_resolves_base() {
        let app = FakeLauncher::new();
        let session = session(&app).await;
        let executor = StepExecutor::default();

        executor
            .run_step(&session, &Step::Scroll { delta_y: None, note: None })
            .await
            .unwrap();
        executor
            .run_step(
                &session,
                &Step::Navigate {
                    url: "/battle-mode".into(),
                    pause_ms: Some(3000),
                    note: None,
                },
            )
            .await
            .unwrap();

        assert!(app
            .events()
            .contains(&FakeEvent::Scroll { page: 0, delta_y: 720 }));
        assert_eq!(
            app.url_of(0).as_deref(),
            Some("http://localhost:3000/battle-mode")
        );
        session.release().await;
    }
}
