//! Scenario runner: session, navigation, steps, verification, teardown

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use futures::{FutureExt, StreamExt};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, info_span, Instrument};
use uuid::Uuid;

use crate::assertion;
use crate::config::RunnerConfig;
use crate::driver::Launcher;
use crate::error::{E2eError, E2eResult, FailureKind};
use crate::executor::{self, StepExecutor};
use crate::navigator::{self, SettleReport};
use crate::session::{Session, TeardownReport};
use crate::spec::{Scenario, Step};

/// Result of a single step
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub index: usize,
    pub action: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub success: bool,
    pub duration_ms: u64,
    pub error: Option<String>,
}

impl StepResult {
    fn new(index: usize, step: &Step, elapsed: Duration, error: Option<&E2eError>) -> Self {
        Self {
            index,
            action: step.action().to_string(),
            description: step.describe(),
            note: step.note().map(str::to_string),
            success: error.is_none(),
            duration_ms: elapsed.as_millis() as u64,
            error: error.map(|e| e.to_string()),
        }
    }
}

/// Result of running a single scenario
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioResult {
    pub run_id: Uuid,
    pub name: String,
    pub success: bool,
    pub failure: Option<FailureKind>,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub steps: Vec<StepResult>,
    pub settle: Option<SettleReport>,
    pub teardown: TeardownReport,
}

/// Result of running a set of scenarios
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteResult {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub results: Vec<ScenarioResult>,
}

impl SuiteResult {
    pub fn success(&self) -> bool {
        self.failed == 0
    }
}

/// What a scenario body records while it runs
#[derive(Default)]
struct Progress {
    steps: Vec<StepResult>,
    settle: Option<SettleReport>,
}

pub struct ScenarioRunner {
    config: RunnerConfig,
    launcher: Arc<dyn Launcher>,
    executor: StepExecutor,
}

impl ScenarioRunner {
    pub fn new(config: RunnerConfig, launcher: Arc<dyn Launcher>) -> Self {
        let executor = StepExecutor::new(
            config.readiness.clone(),
            config.navigation.clone(),
            config.target.clone(),
        );
        Self {
            config,
            launcher,
            executor,
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Pick scenarios by tag and/or names. Every requested name must exist.
    pub fn select(
        scenarios: Vec<Scenario>,
        tag: Option<&str>,
        names: &[String],
    ) -> E2eResult<Vec<Scenario>> {
        for name in names {
            if !scenarios.iter().any(|s| &s.name == name) {
                return Err(E2eError::ScenarioParse(format!("Scenario not found: {}", name)));
            }
        }

        Ok(scenarios
            .into_iter()
            .filter(|s| tag.map_or(true, |t| s.tags.iter().any(|x| x == t)))
            .filter(|s| names.is_empty() || names.contains(&s.name))
            .collect())
    }

    /// Run scenarios, at most `jobs` at a time. Results keep input order.
    pub async fn run_all(&self, scenarios: &[Scenario]) -> SuiteResult {
        let started_at = Utc::now();
        let start = Instant::now();
        let jobs = self.config.jobs.max(1);

        info!("Running {} scenario(s) with {} job(s)...", scenarios.len(), jobs);

        let results: Vec<ScenarioResult> = futures::stream::iter(scenarios)
            .map(|scenario| self.run(scenario))
            .buffered(jobs)
            .collect()
            .await;

        let passed = results.iter().filter(|r| r.success).count();
        let failed = results.len() - passed;
        let duration_ms = start.elapsed().as_millis() as u64;

        info!("");
        info!(
            "Scenario Results: {} passed, {} failed ({} ms)",
            passed, failed, duration_ms
        );

        SuiteResult {
            total: results.len(),
            passed,
            failed,
            started_at,
            duration_ms,
            results,
        }
    }

    /// Run one scenario in a private session. The session is released
    /// exactly once on every path, including a panic in the scenario body.
    pub async fn run(&self, scenario: &Scenario) -> ScenarioResult {
        let run_id = Uuid::new_v4();
        let span = info_span!("scenario", name = %scenario.name, run_id = %run_id);
        self.run_inner(scenario, run_id).instrument(span).await
    }

    async fn run_inner(&self, scenario: &Scenario, run_id: Uuid) -> ScenarioResult {
        let started_at = Utc::now();
        let start = Instant::now();
        debug!("Running scenario: {}", scenario.name);

        let mut progress = Progress::default();
        let (failure, teardown) =
            match Session::acquire(self.launcher.as_ref(), &self.config.session).await {
                Err(e) => (Some((e.kind(), e.to_string())), TeardownReport::default()),
                Ok(session) => {
                    let body = AssertUnwindSafe(self.drive(&session, scenario, &mut progress))
                        .catch_unwind()
                        .await;
                    let failure = match body {
                        Ok(Ok(())) => None,
                        Ok(Err(e)) => Some((e.kind(), e.to_string())),
                        Err(payload) => Some((
                            FailureKind::Panic,
                            format!("scenario panicked: {}", panic_message(payload.as_ref())),
                        )),
                    };
                    (failure, session.release().await)
                }
            };

        let duration_ms = start.elapsed().as_millis() as u64;
        match &failure {
            None => info!("✓ {} ({} ms)", scenario.name, duration_ms),
            Some((_, message)) => error!("✗ {} - {}", scenario.name, message),
        }

        ScenarioResult {
            run_id,
            name: scenario.name.clone(),
            success: failure.is_none(),
            failure: failure.as_ref().map(|(kind, _)| *kind),
            error: failure.map(|(_, message)| message),
            started_at,
            duration_ms,
            steps: progress.steps,
            settle: progress.settle,
            teardown,
        }
    }

    async fn drive(
        &self,
        session: &Session,
        scenario: &Scenario,
        progress: &mut Progress,
    ) -> E2eResult<()> {
        let page = executor::current_page(session, session.default_timeout()).await?;
        let url = self.config.target.resolve_url(&scenario.start_url)?;
        let navigation = &self.config.navigation;

        navigator::goto(session.driver(), &page, &url, navigation.commit_timeout()).await?;
        progress.settle =
            Some(navigator::settle(session.driver(), &page, navigation.settle_timeout()).await);

        for (index, step) in scenario.steps.iter().enumerate() {
            let start = Instant::now();
            let result = self.executor.run_step(session, step).await;
            progress
                .steps
                .push(StepResult::new(index, step, start.elapsed(), result.as_ref().err()));
            result?;
        }

        assertion::verify(session, &scenario.verify).await?;

        if scenario.linger_ms > 0 {
            tokio::time::sleep(Duration::from_millis(scenario.linger_ms)).await;
        }
        Ok(())
    }

    /// Write suite results to `<output_dir>/test-results.json`
    pub fn write_results(&self, results: &SuiteResult) -> E2eResult<PathBuf> {
        std::fs::create_dir_all(&self.config.output_dir)?;

        let path = self.config.output_dir.join("test-results.json");
        let json = serde_json::to_string_pretty(results)?;
        std::fs::write(&path, json)?;

        info!("Results written to: {}", path.display());
        Ok(path)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake::FakeLauncher;

    fn scenario(name: &str, tags: &[&str]) -> Scenario {
        let yaml = format!(
            "name: {}\ntags: [{}]\nverify:\n  message: m\n  visible: [text=ok]\n",
            name,
            tags.join(", ")
        );
        Scenario::from_yaml(&yaml).unwrap()
    }

    #[test]
    fn select_by_tag_and_name() {
        let all = vec![
            scenario("TC001", &["auth", "signup"]),
            scenario("TC003", &["auth"]),
            scenario("TC017", &["routing"]),
        ];

        let auth = ScenarioRunner::select(all.clone(), Some("auth"), &[]).unwrap();
        assert_eq!(auth.len(), 2);

        let one = ScenarioRunner::select(all.clone(), None, &["TC017".to_string()]).unwrap();
        assert_eq!(one[0].name, "TC017");

        assert!(ScenarioRunner::select(all, None, &["TC999".to_string()]).is_err());
    }

    #[test]
    fn panic_payloads_are_readable() {
        let payload: Box<dyn Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn Any + Send> = Box::new(7u8);
        assert_eq!(panic_message(payload.as_ref()), "unknown panic payload");
    }

    #[test]
    fn writes_results_json() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunnerConfig {
            output_dir: dir.path().join("out"),
            ..Default::default()
        };
        let runner = ScenarioRunner::new(config, Arc::new(FakeLauncher::new()));
        let suite = SuiteResult {
            total: 0,
            passed: 0,
            failed: 0,
            started_at: Utc::now(),
            duration_ms: 0,
            results: vec![],
        };

        let path = runner.write_results(&suite).unwrap();
        let written: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(written["total"], 0);
        assert!(suite.success());
    }
}
