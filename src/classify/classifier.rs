use crate::classify::signals::{SignalKind, SignalSet};
use crate::discovery::model::{DiscoveredResource, ResourceKind};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Display;
use std::str::FromStr;
use tracing::debug;

/// Functional category of a compute service
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Frontend,
    Backend,
    Fullstack,
    Unknown,
}

impl Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Frontend => write!(f, "frontend"),
            Role::Backend => write!(f, "backend"),
            Role::Fullstack => write!(f, "fullstack"),
            Role::Unknown => write!(f, "unknown"),
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "frontend" => Ok(Role::Frontend),
            "backend" => Ok(Role::Backend),
            "fullstack" => Ok(Role::Fullstack),
            "unknown" => Ok(Role::Unknown),
            other => Err(format!("unknown role '{}'", other)),
        }
    }
}

/// One matched environment variable name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evidence {
    pub variable: String,
    pub signal: SignalKind,
}

impl Evidence {
    pub fn new(variable: &str, signal: SignalKind) -> Self {
        Self {
            variable: variable.to_string(),
            signal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub resource_identifier: String,
    pub inferred_role: Role,
    /// Share of matches supporting the winning side, 0.0 when nothing matched
    pub confidence_score: f64,
    pub frontend_score: usize,
    pub backend_score: usize,
    pub evidence: Vec<Evidence>,
}

/// Scores environment variable names against the frontend and backend
/// signal sets. Values are never read.
#[derive(Debug, Clone, Default)]
pub struct RoleClassifier {
    signals: SignalSet,
}

impl RoleClassifier {
    pub fn new(signals: SignalSet) -> Self {
        Self { signals }
    }

    pub fn classify(&self, service: &DiscoveredResource) -> ClassificationResult {
        let mut evidence = Vec::new();
        for variable in env_names(service) {
            for signal in self.signals.matches(variable) {
                evidence.push(Evidence::new(variable, signal));
            }
        }

        let frontend_score = evidence
            .iter()
            .filter(|e| e.signal == SignalKind::Frontend)
            .count();
        let backend_score = evidence
            .iter()
            .filter(|e| e.signal == SignalKind::Backend)
            .count();

        let inferred_role = decide(frontend_score, backend_score);
        let total = frontend_score + backend_score;
        let confidence_score = if total == 0 {
            0.0
        } else {
            frontend_score.max(backend_score) as f64 / total as f64
        };

        debug!(
            "Classified {} as {} (frontend={}, backend={})",
            service.identifier, inferred_role, frontend_score, backend_score
        );

        ClassificationResult {
            resource_identifier: service.identifier.clone(),
            inferred_role,
            confidence_score,
            frontend_score,
            backend_score,
            evidence,
        }
    }

    /// Classify every compute service; other kinds have no result
    pub fn classify_all(&self, resources: &[DiscoveredResource]) -> Vec<ClassificationResult> {
        resources
            .iter()
            .filter(|r| r.kind == ResourceKind::ComputeService)
            .map(|r| self.classify(r))
            .collect()
    }
}

/// Tie-break rule between the two scores
pub fn decide(frontend_score: usize, backend_score: usize) -> Role {
    use std::cmp::Ordering;
    match frontend_score.cmp(&backend_score) {
        Ordering::Greater => Role::Frontend,
        Ordering::Less => Role::Backend,
        Ordering::Equal if frontend_score > 0 => Role::Fullstack,
        Ordering::Equal => Role::Unknown,
    }
}

fn env_names(service: &DiscoveredResource) -> impl Iterator<Item = &str> {
    service
        .attribute("env_names")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
}
