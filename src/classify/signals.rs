use crate::config::{ClassifierConfig, ConfigError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Which signal set a variable name matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Frontend,
    Backend,
}

impl Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::Frontend => write!(f, "frontend"),
            SignalKind::Backend => write!(f, "backend"),
        }
    }
}

/// Compiled frontend and backend name patterns.
///
/// Patterns are unanchored regexes, so a plain prefix such as `VITE_`
/// matches anywhere in the variable name.
#[derive(Debug, Clone)]
pub struct SignalSet {
    frontend: Vec<Regex>,
    backend: Vec<Regex>,
}

impl SignalSet {
    pub fn new(frontend: &[String], backend: &[String]) -> Result<Self, ConfigError> {
        Ok(Self {
            frontend: compile(SignalKind::Frontend, frontend)?,
            backend: compile(SignalKind::Backend, backend)?,
        })
    }

    pub fn from_config(config: &ClassifierConfig) -> Result<Self, ConfigError> {
        Self::new(&config.frontend_signals, &config.backend_signals)
    }

    /// Signal sets a variable name belongs to, frontend first
    pub fn matches(&self, variable: &str) -> Vec<SignalKind> {
        let mut kinds = Vec::with_capacity(2);
        if self.frontend.iter().any(|re| re.is_match(variable)) {
            kinds.push(SignalKind::Frontend);
        }
        if self.backend.iter().any(|re| re.is_match(variable)) {
            kinds.push(SignalKind::Backend);
        }
        kinds
    }
}

impl Default for SignalSet {
    fn default() -> Self {
        Self::from_config(&ClassifierConfig::default()).expect("Invalid default signal pattern")
    }
}

fn compile(kind: SignalKind, patterns: &[String]) -> Result<Vec<Regex>, ConfigError> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|source| ConfigError::InvalidPattern {
                signal: kind.to_string(),
                pattern: pattern.clone(),
                source,
            })
        })
        .collect()
}
