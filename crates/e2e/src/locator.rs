//! Element locators
//!
//! Scenario files address elements with prefixed strings:
//!
//! | form            | meaning                                              |
//! |-----------------|------------------------------------------------------|
//! | `xpath=...`     | structural XPath (relative paths resolve from root)  |
//! | `css=...`       | CSS selector                                         |
//! | `text=...`      | smallest element whose text contains the needle      |
//! | `testid=...`    | `[data-testid="..."]`                                |
//!
//! A bare string starting with `/`, `(` or `html/` is XPath, anything else
//! is CSS. Every locator lowers to a [`Query`] the browser driver evaluates.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{E2eError, E2eResult};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Locator {
    XPath(String),
    Css(String),
    Text(String),
    TestId(String),
}

/// A locator lowered to something the DOM can evaluate directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Query {
    XPath(String),
    Css(String),
}

const UPPER: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const LOWER: &str = "abcdefghijklmnopqrstuvwxyz";

impl Locator {
    pub fn parse(raw: &str) -> E2eResult<Self> {
        let raw = raw.trim();
        let locator = if let Some(rest) = raw.strip_prefix("xpath=") {
            Locator::XPath(rest.to_string())
        } else if let Some(rest) = raw.strip_prefix("css=") {
            Locator::Css(rest.to_string())
        } else if let Some(rest) = raw.strip_prefix("text=") {
            Locator::Text(rest.to_string())
        } else if let Some(rest) = raw.strip_prefix("testid=") {
            Locator::TestId(rest.to_string())
        } else if raw.starts_with('/') || raw.starts_with('(') || raw.starts_with("html/") {
            Locator::XPath(raw.to_string())
        } else {
            Locator::Css(raw.to_string())
        };

        if locator.value().trim().is_empty() {
            return Err(E2eError::ScenarioParse(format!("empty locator: '{}'", raw)));
        }
        Ok(locator)
    }

    pub fn value(&self) -> &str {
        match self {
            Locator::XPath(v) | Locator::Css(v) | Locator::Text(v) | Locator::TestId(v) => v,
        }
    }

    /// Whether this locator addresses elements by tree position.
    pub fn is_structural(&self) -> bool {
        matches!(self, Locator::XPath(_))
    }

    pub fn to_query(&self) -> Query {
        match self {
            Locator::XPath(path) => Query::XPath(absolute_xpath(path)),
            Locator::Css(selector) => Query::Css(selector.clone()),
            Locator::TestId(id) => Query::Css(format!(
                "[data-testid=\"{}\"]",
                id.replace('\\', "\\\\").replace('"', "\\\"")
            )),
            Locator::Text(needle) => Query::XPath(text_xpath(needle)),
        }
    }
}

/// Relative structural paths (`html/body/div[2]`) are evaluated from the
/// document root.
fn absolute_xpath(path: &str) -> String {
    if path.starts_with('/') || path.starts_with('(') || path.starts_with('.') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

/// ASCII case-insensitive, whitespace-normalized substring match that keeps only
/// the innermost element carrying the text.
fn text_xpath(needle: &str) -> String {
    let normalized = needle.split_whitespace().collect::<Vec<_>>().join(" ");
    let literal = xpath_literal(&normalized.to_ascii_lowercase());
    let matches = format!(
        "contains(translate(normalize-space(.), '{}', '{}'), {})",
        UPPER, LOWER, literal
    );
    format!(
        "//body//*[{m}][not({h})][not(.//*[{m}][not({h})])]",
        m = matches,
        h = HIDDEN_CONTAINERS
    )
}

/// Elements whose text is never rendered
const HIDDEN_CONTAINERS: &str = "ancestor-or-self::script or ancestor-or-self::style \
or ancestor-or-self::noscript or ancestor-or-self::template";

/// Quote a string for XPath 1.0, which has no escape syntax.
pub fn xpath_literal(s: &str) -> String {
    if !s.contains('\'') {
        format!("'{}'", s)
    } else if !s.contains('"') {
        format!("\"{}\"", s)
    } else {
        let parts: Vec<String> = s.split('\'').map(|p| format!("'{}'", p)).collect();
        format!("concat({})", parts.join(", \"'\", "))
    }
}

impl FromStr for Locator {
    type Err = E2eError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Locator::parse(s)
    }
}

impl TryFrom<String> for Locator {
    type Error = E2eError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Locator::parse(&value)
    }
}

impl From<Locator> for String {
    fn from(value: Locator) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Locator::XPath(v) => write!(f, "xpath={}", v),
            Locator::Css(v) => write!(f, "css={}", v),
            Locator::Text(v) => write!(f, "text={}", v),
            Locator::TestId(v) => write!(f, "testid={}", v),
        }
    }
}
