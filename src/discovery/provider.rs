use crate::discovery::model::{DiscoveredResource, ResourceKind};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Provider call timed out after {0:?}")]
    Timeout(Duration),

    #[error("API not enabled or access denied: {0}")]
    Unavailable(String),

    #[error("Provider command failed: {0}")]
    CommandFailed(String),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("Command blocked by policy: {0}")]
    Blocked(String),
}

impl ProviderError {
    /// Whether the call may succeed if repeated after a delay
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::RateLimited(_) | ProviderError::Timeout(_))
    }
}

impl From<serde_json::Error> for ProviderError {
    fn from(error: serde_json::Error) -> Self {
        ProviderError::InvalidResponse(error.to_string())
    }
}

/// One page of a list call
#[derive(Debug, Clone, Default)]
pub struct ResourcePage {
    pub items: Vec<DiscoveredResource>,
    pub next_page_token: Option<String>,
}

impl ResourcePage {
    pub fn last(items: Vec<DiscoveredResource>) -> Self {
        Self {
            items,
            next_page_token: None,
        }
    }
}

/// Read-only view of a cloud project.
///
/// Implementations must never mutate the project. A kind with no instances
/// yields an empty page, not an error.
#[async_trait]
pub trait CloudProvider: Send + Sync {
    async fn list_page(
        &self,
        project_id: &str,
        kind: ResourceKind,
        page_token: Option<&str>,
    ) -> Result<ResourcePage, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_errors() {
        assert!(ProviderError::RateLimited("429".into()).is_transient());
        assert!(ProviderError::Timeout(Duration::from_secs(1)).is_transient());
        assert!(!ProviderError::Unavailable("SERVICE_DISABLED".into()).is_transient());
        assert!(!ProviderError::InvalidResponse("eof".into()).is_transient());
    }
}
