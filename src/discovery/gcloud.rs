//! `CloudProvider` backed by the gcloud CLI.

use crate::discovery::model::ResourceKind;
use crate::discovery::normalize;
use crate::discovery::provider::{CloudProvider, ProviderError, ResourcePage};
use crate::shared::security::CommandGuard;
use async_trait::async_trait;
use serde_json::Value;
use std::path::PathBuf;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

pub struct GcloudProvider {
    gcloud_path: PathBuf,
    timeout: Duration,
    /// Regions scanned for regional listings (VPC connectors)
    regions: Vec<String>,
    guard: CommandGuard,
}

impl GcloudProvider {
    pub fn new(
        gcloud_path: PathBuf,
        timeout: Duration,
        regions: Vec<String>,
        guard: CommandGuard,
    ) -> Self {
        debug!(
            "GcloudProvider initialized with gcloud path {} and regions {:?}",
            gcloud_path.display(),
            regions
        );
        Self {
            gcloud_path,
            timeout,
            regions,
            guard,
        }
    }

    /// Resolve the gcloud binary from configuration or PATH
    pub fn locate(configured: Option<&str>) -> Result<PathBuf, ProviderError> {
        match configured {
            Some(path) => {
                let path = PathBuf::from(path);
                if path.exists() {
                    Ok(path)
                } else {
                    Err(ProviderError::CommandFailed(format!(
                        "gcloud binary not found at {}",
                        path.display()
                    )))
                }
            }
            None => which::which("gcloud").map_err(|_| {
                ProviderError::CommandFailed("gcloud binary not found in PATH".to_string())
            }),
        }
    }

    async fn run_json(&self, args: Vec<String>) -> Result<Value, ProviderError> {
        let program = self.gcloud_path.to_string_lossy().to_string();
        self.guard
            .check(&program, &args)
            .map_err(|e| ProviderError::Blocked(e.to_string()))?;

        debug!("Running gcloud {}", args.join(" "));
        let child = Command::new(&self.gcloud_path)
            .args(&args)
            .kill_on_drop(true)
            .output();

        let output = tokio::time::timeout(self.timeout, child)
            .await
            .map_err(|_| ProviderError::Timeout(self.timeout))?
            .map_err(|e| ProviderError::CommandFailed(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_failure(&stderr));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Ok(Value::Null);
        }
        Ok(serde_json::from_str(&stdout)?)
    }
}

#[async_trait]
impl CloudProvider for GcloudProvider {
    async fn list_page(
        &self,
        project_id: &str,
        kind: ResourceKind,
        page_token: Option<&str>,
    ) -> Result<ResourcePage, ProviderError> {
        if kind != ResourceKind::NetworkConnector {
            // gcloud drains server-side pagination itself
            let payload = self.run_json(list_args(kind, project_id, None)).await?;
            let items = normalize::normalize(kind, project_id, &payload, None)?;
            return Ok(ResourcePage::last(items));
        }

        // Connectors are listed per region; the page token is the region index
        let index = match page_token {
            Some(token) => token.parse::<usize>().map_err(|_| {
                ProviderError::InvalidResponse(format!("invalid page token '{}'", token))
            })?,
            None => 0,
        };
        let Some(region) = self.regions.get(index) else {
            return Ok(ResourcePage::default());
        };

        let payload = self
            .run_json(list_args(kind, project_id, Some(region)))
            .await?;
        let items = normalize::normalize(kind, project_id, &payload, Some(region))?;
        let next = index + 1;

        Ok(ResourcePage {
            items,
            next_page_token: (next < self.regions.len()).then(|| next.to_string()),
        })
    }
}

/// Arguments for the list call of `kind`
pub fn list_args(kind: ResourceKind, project_id: &str, region: Option<&str>) -> Vec<String> {
    let command: &[&str] = match kind {
        ResourceKind::ComputeService => &["run", "services", "list"],
        ResourceKind::ManagedDatabase => &["sql", "instances", "list"],
        ResourceKind::ObjectStore => &["storage", "buckets", "list"],
        ResourceKind::SecretEntry => &["secrets", "list"],
        ResourceKind::PrincipalIdentity => &["iam", "service-accounts", "list"],
        ResourceKind::NetworkConnector => &["compute", "networks", "vpc-access", "connectors", "list"],
        ResourceKind::EnabledCapability => &["services", "list", "--enabled"],
    };

    let mut args: Vec<String> = command.iter().map(|s| s.to_string()).collect();
    args.push(format!("--project={}", project_id));
    if let Some(region) = region {
        args.push(format!("--region={}", region));
    }
    args.push("--format=json".to_string());
    // Keeps gcloud from prompting to enable APIs
    args.push("--quiet".to_string());
    args.push("--verbosity=error".to_string());
    args
}

/// Map gcloud stderr to a provider error
pub fn classify_failure(stderr: &str) -> ProviderError {
    let message = stderr.trim().to_string();
    let upper = message.to_uppercase();

    if upper.contains("RESOURCE_EXHAUSTED")
        || upper.contains("RATE_LIMIT")
        || upper.contains("RATELIMITEXCEEDED")
        || upper.contains("QUOTA EXCEEDED")
        || upper.contains("HTTPERROR 429")
        || upper.contains("TOO MANY REQUESTS")
    {
        ProviderError::RateLimited(message)
    } else if upper.contains("DEADLINE_EXCEEDED") || upper.contains("TIMED OUT") {
        ProviderError::Timeout(Duration::ZERO)
    } else if upper.contains("SERVICE_DISABLED")
        || upper.contains("HAS NOT BEEN USED")
        || upper.contains("PERMISSION_DENIED")
        || (upper.contains("API [") && upper.contains("NOT ENABLED"))
    {
        ProviderError::Unavailable(message)
    } else {
        warn!("Unrecognized gcloud failure: {}", message);
        ProviderError::CommandFailed(message)
    }
}
