//! Visibility assertions
//!
//! Soft verification checks a single success marker and reports the
//! scenario's own message on failure. Hard verification checks every listed
//! target in order and stops at the first one that never shows up.

use std::time::Duration;

use tracing::debug;

use crate::error::{E2eError, E2eResult};
use crate::locator::Locator;
use crate::session::Session;
use crate::spec::{Verify, VerifyStyle};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Poll the first match on the current page until it is visible.
pub async fn expect_visible(session: &Session, locator: &Locator, timeout: Duration) -> E2eResult<()> {
    let query = locator.to_query();
    let mut last_error = None;

    let poll = async {
        loop {
            let visible = match session.current_page().await {
                Ok(page) => session.driver().is_visible(&page, &query).await,
                Err(e) => Err(e),
            };
            match visible {
                Ok(true) => return,
                Ok(false) => {}
                Err(e) => last_error = Some(e.to_string()),
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    };

    match tokio::time::timeout(timeout, poll).await {
        Ok(()) => Ok(()),
        Err(_) => {
            let mut message = format!(
                "'{}' not visible within {} ms",
                locator,
                timeout.as_millis()
            );
            if let Some(e) = last_error {
                message.push_str(&format!(" (last error: {})", e));
            }
            Err(E2eError::AssertionFailed(message))
        }
    }
}

pub async fn verify(session: &Session, verify: &Verify) -> E2eResult<()> {
    let timeout = Duration::from_millis(verify.timeout_ms);
    match verify.style {
        VerifyStyle::Soft => {
            let Some(target) = verify.visible.first() else {
                return Err(E2eError::AssertionFailed("no verification target".into()));
            };
            debug!("Soft check: {}", target);
            expect_visible(session, target, timeout).await.map_err(|e| {
                debug!("{}", e);
                E2eError::AssertionFailed(
                    verify.message.clone().unwrap_or_else(|| e.to_string()),
                )
            })
        }
        VerifyStyle::Hard => {
            for target in &verify.visible {
                debug!("Hard check: {}", target);
                expect_visible(session, target, timeout).await.map_err(|e| match &verify.message {
                    Some(message) => E2eError::AssertionFailed(format!("{}: {}", message, e)),
                    None => e,
                })?;
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::fake::{FailPoint, FakeElement, FakeLauncher};
    use tokio::time::Instant;

    fn loc(raw: &str) -> Locator {
        Locator::parse(raw).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn soft_failure_carries_custom_message() {
        let app = FakeLauncher::new();
        let session = Session::acquire(&app, &SessionConfig::default()).await.unwrap();
        let check = Verify {
            style: VerifyStyle::Soft,
            timeout_ms: 1000,
            visible: vec![loc("text=Upload Successful")],
            message: Some("Test case failed: upload did not complete".into()),
        };

        let err = verify(&session, &check).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "Assertion failed: Test case failed: upload did not complete"
        );
        session.release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_late_elements() {
        let app = FakeLauncher::new().element(
            0,
            loc("text=Welcome"),
            FakeElement::text().visible_after(Duration::from_millis(800)),
        );
        let session = Session::acquire(&app, &SessionConfig::default()).await.unwrap();

        expect_visible(&session, &loc("text=Welcome"), Duration::from_secs(1))
            .await
            .unwrap();
        session.release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn hidden_element_is_not_visible() {
        let app = FakeLauncher::new().element(0, loc("text=Toast"), FakeElement::text().hidden());
        let session = Session::acquire(&app, &SessionConfig::default()).await.unwrap();

        let err = expect_visible(&session, &loc("text=Toast"), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert!(matches!(err, E2eError::AssertionFailed(_)));
        session.release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn page_lookup_errors_keep_polling() {
        let app = FakeLauncher::new()
            .element(0, loc("text=Battle Arena"), FakeElement::text())
            .failing_page_lookups(3);
        let session = Session::acquire(&app, &SessionConfig::default()).await.unwrap();

        expect_visible(&session, &loc("text=Battle Arena"), Duration::from_secs(1))
            .await
            .unwrap();
        session.release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_page_lookup_errors_fail_the_assertion() {
        let app = FakeLauncher::new()
            .element(0, loc("text=Pricing"), FakeElement::text())
            .fail(FailPoint::Pages);
        let session = Session::acquire(&app, &SessionConfig::default()).await.unwrap();
        let check = Verify {
            style: VerifyStyle::Hard,
            timeout_ms: 2000,
            visible: vec![loc("text=Pricing")],
            message: None,
        };

        let start = Instant::now();
        let err = verify(&session, &check).await.unwrap_err();
        assert!(start.elapsed() >= Duration::from_secs(2));
        match err {
            E2eError::AssertionFailed(message) => {
                assert!(message.contains("target list unavailable"), "{}", message)
            }
            other => panic!("unexpected error: {}", other),
        }
        session.release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn hard_stops_at_first_missing_target() {
        let app = FakeLauncher::new().element(0, loc("text=Check your email"), FakeElement::text());
        let session = Session::acquire(&app, &SessionConfig::default()).await.unwrap();
        let check = Verify {
            style: VerifyStyle::Hard,
            timeout_ms: 30_000,
            visible: vec![
                loc("text=Check your email"),
                loc("text=Enter code."),
                loc("text=Use another method"),
            ],
            message: None,
        };

        let start = Instant::now();
        let err = verify(&session, &check).await.unwrap_err();
        let elapsed = start.elapsed();

        assert!(err.to_string().contains("text=Enter code."));
        assert!(elapsed >= Duration::from_secs(30));
        assert!(elapsed < Duration::from_secs(60));
        session.release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn hard_passes_when_all_visible() {
        let app = FakeLauncher::new()
            .element(0, loc("text=Use another method"), FakeElement::text())
            .element(0, loc("text=Get help"), FakeElement::text());
        let session = Session::acquire(&app, &SessionConfig::default()).await.unwrap();
        let check = Verify {
            style: VerifyStyle::Hard,
            timeout_ms: 30_000,
            visible: vec![loc("text=Use another method"), loc("text=Get help")],
            message: Some("Sign-in fallback options missing".into()),
        };

        verify(&session, &check).await.unwrap();
        session.release().await;
    }
}
