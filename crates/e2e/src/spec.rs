//! Declarative YAML scenario specification

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::{E2eError, E2eResult};
use crate::locator::Locator;

/// A complete scenario parsed from YAML
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Unique name for this scenario
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Tags for filtering scenarios
    #[serde(default)]
    pub tags: Vec<String>,

    /// First URL opened, relative to the base URL
    #[serde(default = "default_start_url")]
    pub start_url: String,

    /// Steps to execute in order
    #[serde(default)]
    pub steps: Vec<Step>,

    /// Final verification
    pub verify: Verify,

    /// Pause after a passing verification
    #[serde(default)]
    pub linger_ms: u64,
}

fn default_start_url() -> String {
    "/".to_string()
}

/// A single step in a scenario
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Click an element
    Click {
        locator: Locator,
        #[serde(default)]
        timeout_ms: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },

    /// Replace the value of an input field. An empty value clears it.
    Fill {
        locator: Locator,
        value: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },

    /// Navigate the current page (relative to base)
    Navigate {
        url: String,
        #[serde(default)]
        pause_ms: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },

    /// Scroll vertically; one viewport height when `delta_y` is omitted
    Scroll {
        #[serde(default)]
        delta_y: Option<i64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },

    /// Wait for a fixed amount of time
    Sleep {
        ms: u64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note: Option<String>,
    },
}

impl Step {
    pub fn action(&self) -> &'static str {
        match self {
            Step::Click { .. } => "click",
            Step::Fill { .. } => "fill",
            Step::Navigate { .. } => "navigate",
            Step::Scroll { .. } => "scroll",
            Step::Sleep { .. } => "sleep",
        }
    }

    pub fn locator(&self) -> Option<&Locator> {
        match self {
            Step::Click { locator, .. } | Step::Fill { locator, .. } => Some(locator),
            _ => None,
        }
    }

    pub fn note(&self) -> Option<&str> {
        match self {
            Step::Click { note, .. }
            | Step::Fill { note, .. }
            | Step::Navigate { note, .. }
            | Step::Scroll { note, .. }
            | Step::Sleep { note, .. } => note.as_deref(),
        }
    }

    /// Short description used in logs and results
    pub fn describe(&self) -> String {
        match self {
            Step::Click { locator, .. } => format!("click {}", locator),
            Step::Fill { locator, value, .. } if value.is_empty() => {
                format!("clear {}", locator)
            }
            Step::Fill { locator, .. } => format!("fill {}", locator),
            Step::Navigate { url, .. } => format!("navigate {}", url),
            Step::Scroll { delta_y: Some(dy), .. } => format!("scroll {}", dy),
            Step::Scroll { delta_y: None, .. } => "scroll one viewport".to_string(),
            Step::Sleep { ms, .. } => format!("sleep {} ms", ms),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyStyle {
    /// Single success marker with a short timeout and a custom message
    #[default]
    Soft,
    /// Every listed target must be visible; stops at the first miss
    Hard,
}

/// Visibility checks run after the last step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Verify {
    #[serde(default)]
    pub style: VerifyStyle,

    #[serde(default = "default_verify_timeout")]
    pub timeout_ms: u64,

    pub visible: Vec<Locator>,

    /// Explanation reported when verification fails
    #[serde(default)]
    pub message: Option<String>,
}

fn default_verify_timeout() -> u64 {
    1000
}

impl Scenario {
    /// Parse a scenario from YAML string
    pub fn from_yaml(yaml: &str) -> E2eResult<Self> {
        let scenario: Self = serde_yaml::from_str(yaml)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Parse a scenario from a YAML file
    pub fn from_file(path: &Path) -> E2eResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
            .map_err(|e| E2eError::ScenarioParse(format!("{}: {}", path.display(), e)))
    }

    /// Load all scenarios from a directory, sorted by name
    pub fn load_all(dir: &Path) -> E2eResult<Vec<Self>> {
        if !dir.is_dir() {
            return Err(E2eError::ScenarioParse(format!(
                "scenario directory not found: {}",
                dir.display()
            )));
        }

        let mut scenarios = Vec::new();

        for entry in walkdir::WalkDir::new(dir)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| {
                e.path()
                    .extension()
                    .map(|ext| ext == "yaml" || ext == "yml")
                    .unwrap_or(false)
            })
        {
            scenarios.push(Self::from_file(entry.path())?);
        }

        scenarios.sort_by(|a, b| a.name.cmp(&b.name));
        if let Some(dup) = scenarios.windows(2).find(|w| w[0].name == w[1].name) {
            return Err(E2eError::ScenarioParse(format!(
                "duplicate scenario name: {}",
                dup[0].name
            )));
        }

        Ok(scenarios)
    }

    /// Filter scenarios by tag
    pub fn filter_by_tag<'a>(scenarios: &'a [Self], tag: &str) -> Vec<&'a Self> {
        scenarios
            .iter()
            .filter(|s| s.tags.iter().any(|t| t == tag))
            .collect()
    }

    pub fn validate(&self) -> E2eResult<()> {
        if self.name.trim().is_empty() {
            return Err(E2eError::ScenarioParse("scenario name is empty".into()));
        }
        if self.verify.visible.is_empty() {
            return Err(E2eError::ScenarioParse(format!(
                "{}: verify lists no targets",
                self.name
            )));
        }
        if self.verify.style == VerifyStyle::Soft {
            if self.verify.visible.len() != 1 {
                return Err(E2eError::ScenarioParse(format!(
                    "{}: soft verification takes exactly one target, got {}",
                    self.name,
                    self.verify.visible.len()
                )));
            }
            if self.verify.message.as_deref().map_or(true, |m| m.trim().is_empty()) {
                return Err(E2eError::ScenarioParse(format!(
                    "{}: soft verification needs a message",
                    self.name
                )));
            }
        }
        Ok(())
    }
}
