//! Runner configuration
//!
//! Every section has defaults matching the shipped scenario catalogue, so a
//! missing config file (or a partial one) is valid.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{E2eError, E2eResult};

/// Top-level runner configuration, loaded from `e2e.toml`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    /// Browser session settings
    pub session: SessionConfig,

    /// Navigation and frame settling
    pub navigation: NavigationConfig,

    /// Pre-action readiness policy
    pub readiness: ReadinessConfig,

    /// Application under test
    pub target: TargetConfig,

    /// Directory holding scenario YAML files
    pub scenarios_dir: PathBuf,

    /// Output directory for results
    pub output_dir: PathBuf,

    /// Scenarios run concurrently, each in its own browser
    pub jobs: usize,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            navigation: NavigationConfig::default(),
            readiness: ReadinessConfig::default(),
            target: TargetConfig::default(),
            scenarios_dir: PathBuf::from("crates/e2e/scenarios"),
            output_dir: PathBuf::from("test-results"),
            jobs: 1,
        }
    }
}

impl RunnerConfig {
    /// Load configuration from file, falling back to defaults when absent
    pub fn load(path: &Path) -> E2eResult<Self> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Self = toml::from_str(&content)?;
            config.validate()?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    pub fn validate(&self) -> E2eResult<()> {
        if self.jobs == 0 {
            return Err(E2eError::InvalidConfig("jobs must be at least 1".into()));
        }
        if self.session.window.width == 0 || self.session.window.height == 0 {
            return Err(E2eError::InvalidConfig(
                "window dimensions must be non-zero".into(),
            ));
        }
        if self.session.default_timeout_ms == 0 {
            return Err(E2eError::InvalidConfig(
                "default_timeout_ms must be non-zero".into(),
            ));
        }
        reqwest::Url::parse(&self.target.base_url).map_err(|e| {
            E2eError::InvalidConfig(format!("base_url '{}': {}", self.target.base_url, e))
        })?;
        Ok(())
    }
}

/// Browser launch settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Run without a visible window
    pub headless: bool,

    /// Browser window size
    pub window: WindowSize,

    /// Extra process flags passed to the browser
    pub launch_flags: Vec<String>,

    /// Default per-action interaction timeout
    pub default_timeout_ms: u64,

    /// Path to the Chromium binary (None = auto-detect)
    pub chrome_executable: Option<PathBuf>,

    /// Chromium sandbox, off by default (it refuses to start as root in containers)
    pub sandbox: bool,

    /// Bound on browser launch and bootstrap
    pub launch_timeout_ms: u64,

    /// Bound on each individual teardown step
    pub teardown_timeout_ms: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            headless: true,
            window: WindowSize::default(),
            launch_flags: vec![
                "--disable-dev-shm-usage".to_string(),
                "--ipc=host".to_string(),
                "--single-process".to_string(),
            ],
            default_timeout_ms: 5000,
            chrome_executable: None,
            sandbox: false,
            launch_timeout_ms: 30_000,
            teardown_timeout_ms: 5000,
        }
    }
}

impl SessionConfig {
    pub fn default_timeout(&self) -> Duration {
        Duration::from_millis(self.default_timeout_ms)
    }

    pub fn launch_timeout(&self) -> Duration {
        Duration::from_millis(self.launch_timeout_ms)
    }

    pub fn teardown_timeout(&self) -> Duration {
        Duration::from_millis(self.teardown_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSize {
    pub width: u32,
    pub height: u32,
}

impl Default for WindowSize {
    fn default() -> Self {
        Self { width: 1280, height: 720 }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NavigationConfig {
    /// Bound on reaching navigation commit
    pub commit_timeout_ms: u64,

    /// Best-effort wait per frame for parsed content
    pub settle_timeout_ms: u64,
}

impl Default for NavigationConfig {
    fn default() -> Self {
        Self {
            commit_timeout_ms: 10_000,
            settle_timeout_ms: 3000,
        }
    }
}

impl NavigationConfig {
    pub fn commit_timeout(&self) -> Duration {
        Duration::from_millis(self.commit_timeout_ms)
    }

    pub fn settle_timeout(&self) -> Duration {
        Duration::from_millis(self.settle_timeout_ms)
    }
}

/// How a step waits before acting on its element
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadinessMode {
    /// Constant pause before every action
    Fixed,
    /// Poll until the element is attached with a stable bounding box
    #[default]
    Poll,
}

impl FromStr for ReadinessMode {
    type Err = E2eError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fixed" => Ok(ReadinessMode::Fixed),
            "poll" => Ok(ReadinessMode::Poll),
            other => Err(E2eError::InvalidConfig(format!(
                "unknown readiness mode '{}' (expected fixed or poll)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    pub mode: ReadinessMode,

    /// Pause used by `fixed` mode
    pub fixed_delay_ms: u64,

    /// Upper bound used by `poll` mode
    pub poll_timeout_ms: u64,

    pub poll_interval_ms: u64,
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            mode: ReadinessMode::Poll,
            fixed_delay_ms: 3000,
            poll_timeout_ms: 3000,
            poll_interval_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Base URL of the application under test
    pub base_url: String,

    /// Command that starts the application (None = expect it running)
    pub start_command: Option<String>,

    /// Working directory for the start command
    pub working_dir: Option<PathBuf>,

    /// Timeout for the application to become reachable
    pub startup_timeout_ms: u64,

    /// Probe the base URL before running scenarios
    pub probe: bool,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000".to_string(),
            start_command: None,
            working_dir: None,
            startup_timeout_ms: 60_000,
            probe: true,
        }
    }
}

impl TargetConfig {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    /// Resolve a scenario URL against the base URL. Absolute URLs pass through.
    pub fn resolve_url(&self, url: &str) -> E2eResult<String> {
        let base = reqwest::Url::parse(&self.base_url).map_err(|e| {
            E2eError::InvalidConfig(format!("base_url '{}': {}", self.base_url, e))
        })?;
        let joined = base.join(url).map_err(|e| E2eError::Navigation {
            url: url.to_string(),
            reason: e.to_string(),
        })?;
        Ok(joined.to_string())
    }
}
