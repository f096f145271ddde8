//! ChatBattles E2E Scenario Runner
//!
//! This crate drives a headless Chromium against the ChatBattles.ai web app
//! and runs declarative UI scenarios:
//! - Optionally starts the application and waits until it answers
//! - Launches a private browser session per scenario
//! - Parses declarative YAML scenarios (locate, wait, act, verify)
//! - Always tears the session down exactly once
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                ScenarioRunner (per scenario)                │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Session::acquire(launcher) -> Session                      │
//! │    ├── navigator::goto(start_url)   (returns at commit)     │
//! │    ├── navigator::settle(frames)    (best effort)           │
//! │    ├── StepExecutor::run_step(step) (newest page)           │
//! │    ├── assertion::verify(verify)    (soft | hard)           │
//! │    └── Session::release()           (exactly once)          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Scenario (YAML)                                            │
//! │    ├── name, description, tags, start_url                   │
//! │    ├── steps: [Step]                                        │
//! │    │     ├── click { locator, timeout_ms? }                 │
//! │    │     ├── fill { locator, value }                        │
//! │    │     ├── navigate { url, pause_ms? }                    │
//! │    │     ├── scroll { delta_y? }                            │
//! │    │     └── sleep { ms }                                   │
//! │    └── verify { style, timeout_ms, visible, message }       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Driver (trait)                                             │
//! │    ├── ChromiumDriver  (chromiumoxide, CDP)                 │
//! │    └── FakeDriver      (in-memory, for tests)               │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod assertion;
pub mod browser;
pub mod config;
pub mod driver;
pub mod error;
pub mod executor;
pub mod fake;
pub mod locator;
pub mod navigator;
pub mod runner;
pub mod session;
pub mod spec;
pub mod target;

pub use browser::ChromiumLauncher;
pub use config::RunnerConfig;
pub use error::{E2eError, E2eResult, FailureKind};
pub use locator::Locator;
pub use runner::{ScenarioResult, ScenarioRunner, SuiteResult};
pub use session::Session;
pub use spec::{Scenario, Step, Verify, VerifyStyle};
