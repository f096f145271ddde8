//! Navigation and frame settling

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::driver::{Driver, FrameId, PageId};
use crate::error::{E2eError, E2eResult};

const SETTLE_POLL: Duration = Duration::from_millis(50);

/// Navigate and return once the navigation has committed.
pub async fn goto(
    driver: &dyn Driver,
    page: &PageId,
    url: &str,
    commit_timeout: Duration,
) -> E2eResult<()> {
    debug!("Navigating {} to {}", page, url);
    match tokio::time::timeout(commit_timeout, driver.navigate(page, url)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(E2eError::Navigation { url, reason })) => Err(E2eError::Navigation { url, reason }),
        Ok(Err(e)) => Err(E2eError::Navigation {
            url: url.to_string(),
            reason: e.to_string(),
        }),
        Err(_) => Err(E2eError::Navigation {
            url: url.to_string(),
            reason: format!("not committed within {} ms", commit_timeout.as_millis()),
        }),
    }
}

/// What happened while settling the frames of a page
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettleReport {
    pub frames: usize,
    pub settled: usize,
    pub timed_out: usize,
    pub failed: usize,
}

/// Best-effort wait for the main document and every attached sub-frame to
/// finish parsing. Each frame gets its own bound; timeouts and errors are
/// logged and counted, never raised.
pub async fn settle(driver: &dyn Driver, page: &PageId, per_frame_timeout: Duration) -> SettleReport {
    let mut report = SettleReport::default();

    let frames = match driver.frames(page).await {
        Ok(frames) => frames,
        Err(e) => {
            debug!("Could not list frames of {}: {}", page, e);
            report.failed += 1;
            return report;
        }
    };
    report.frames = frames.len();

    for frame in &frames {
        match tokio::time::timeout(per_frame_timeout, wait_parsed(driver, page, frame)).await {
            Ok(Ok(())) => report.settled += 1,
            Ok(Err(e)) => {
                debug!("Frame {} did not settle: {}", frame, e);
                report.failed += 1;
            }
            Err(_) => {
                debug!(
                    "Frame {} still loading after {} ms",
                    frame,
                    per_frame_timeout.as_millis()
                );
                report.timed_out += 1;
            }
        }
    }

    report
}

async fn wait_parsed(driver: &dyn Driver, page: &PageId, frame: &FrameId) -> E2eResult<()> {
    loop {
        if driver.ready_state(page, frame).await?.is_parsed() {
            return Ok(());
        }
        tokio::time::sleep(SETTLE_POLL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::driver::Launcher;
    use crate::fake::{FailPoint, FakeEvent, FakeLauncher, FrameBehavior};

    #[tokio::test(start_paused = true)]
    async fn settle_isolates_frame_failures() {
        let app = FakeLauncher::new()
            .frame(0, "ads", FrameBehavior::NeverReady)
            .frame(0, "widget", FrameBehavior::Error)
            .frame(0, "chat", FrameBehavior::Ready);
        let mut driver = app.launch(&SessionConfig::default()).await.unwrap();
        let page = driver.new_page().await.unwrap();

        let report = settle(driver.as_ref(), &page, Duration::from_secs(3)).await;
        assert_eq!(
            report,
            SettleReport {
                frames: 4,
                settled: 2,
                timed_out: 1,
                failed: 1
            }
        );
        // the frame after the hung and failing ones was still attempted
        assert!(app
            .events()
            .iter()
            .any(|e| matches!(e, FakeEvent::ReadyState { frame, .. } if frame == "chat")));
    }

    #[tokio::test(start_paused = true)]
    async fn goto_times_out_at_commit() {
        let app = FakeLauncher::new().fail(FailPoint::HangNavigate);
        let mut driver = app.launch(&SessionConfig::default()).await.unwrap();
        let page = driver.new_page().await.unwrap();

        let err = goto(driver.as_ref(), &page, "http://localhost:3000/", Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(matches!(err, E2eError::Navigation { .. }));
        assert!(err.to_string().contains("10000 ms"));
    }

    #[tokio::test]
    async fn goto_reports_navigation_errors() {
        let app = FakeLauncher::new().fail(FailPoint::Navigate);
        let mut driver = app.launch(&SessionConfig::default()).await.unwrap();
        let page = driver.new_page().await.unwrap();

        let err = goto(driver.as_ref(), &page, "http://localhost:3000/", Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("ERR_CONNECTION_REFUSED"));
    }
}
