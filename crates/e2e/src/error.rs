//! Error types for E2E scenarios

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum E2eError {
    #[error("Browser environment unavailable: {0}")]
    EnvironmentUnavailable(String),

    #[error("No element matched locator '{locator}'")]
    ElementNotFound { locator: String },

    #[error("Action '{action}' on '{locator}' did not complete within {timeout_ms} ms")]
    ActionTimeout {
        action: String,
        locator: String,
        timeout_ms: u64,
    },

    #[error("Assertion failed: {0}")]
    AssertionFailed(String),

    #[error("Step failed: {step} - {reason}")]
    StepFailed { step: String, reason: String },

    #[error("Navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("Target application failed to start: {0}")]
    TargetStartup(String),

    #[error("Target application at {url} unreachable after {attempts} attempts")]
    TargetUnreachable { url: String, attempts: usize },

    #[error("Scenario parse error: {0}")]
    ScenarioParse(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Browser driver error: {0}")]
    Driver(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

pub type E2eResult<T> = Result<T, E2eError>;

/// Coarse classification of a scenario failure, recorded in results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    EnvironmentUnavailable,
    ElementNotFound,
    ActionTimeout,
    AssertionFailure,
    Navigation,
    Panic,
    Other,
}

impl E2eError {
    pub fn kind(&self) -> FailureKind {
        match self {
            E2eError::EnvironmentUnavailable(_) => FailureKind::EnvironmentUnavailable,
            E2eError::ElementNotFound { .. } => FailureKind::ElementNotFound,
            E2eError::ActionTimeout { .. } => FailureKind::ActionTimeout,
            E2eError::AssertionFailed(_) => FailureKind::AssertionFailure,
            E2eError::Navigation { .. } => FailureKind::Navigation,
            _ => FailureKind::Other,
        }
    }

    /// Wrap any driver-side failure.
    pub(crate) fn driver(err: impl std::fmt::Display) -> Self {
        E2eError::Driver(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_maps_taxonomy() {
        assert_eq!(
            E2eError::EnvironmentUnavailable("no chrome".into()).kind(),
            FailureKind::EnvironmentUnavailable
        );
        assert_eq!(
            E2eError::ElementNotFound { locator: "css=#x".into() }.kind(),
            FailureKind::ElementNotFound
        );
        assert_eq!(
            E2eError::AssertionFailed("missing".into()).kind(),
            FailureKind::AssertionFailure
        );
        assert_eq!(E2eError::Driver("boom".into()).kind(), FailureKind::Other);
    }

    #[test]
    fn action_timeout_message_names_locator() {
        let err = E2eError::ActionTimeout {
            action: "click".into(),
            locator: "xpath=/html/body/a".into(),
            timeout_ms: 5000,
        };
        assert_eq!(
            err.to_string(),
            "Action 'click' on 'xpath=/html/body/a' did not complete within 5000 ms"
        );
    }
}
