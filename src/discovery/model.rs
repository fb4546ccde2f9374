//! Normalized snapshot types produced by discovery.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::str::FromStr;

/// Resource kinds the fetcher knows how to enumerate
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    ComputeService,
    ManagedDatabase,
    ObjectStore,
    SecretEntry,
    PrincipalIdentity,
    NetworkConnector,
    EnabledCapability,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 7] = [
        ResourceKind::ComputeService,
        ResourceKind::ManagedDatabase,
        ResourceKind::ObjectStore,
        ResourceKind::SecretEntry,
        ResourceKind::PrincipalIdentity,
        ResourceKind::NetworkConnector,
        ResourceKind::EnabledCapability,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::ComputeService => "compute_service",
            ResourceKind::ManagedDatabase => "managed_database",
            ResourceKind::ObjectStore => "object_store",
            ResourceKind::SecretEntry => "secret_entry",
            ResourceKind::PrincipalIdentity => "principal_identity",
            ResourceKind::NetworkConnector => "network_connector",
            ResourceKind::EnabledCapability => "enabled_capability",
        }
    }

    /// Human label used in summaries
    pub fn label(&self) -> &'static str {
        match self {
            ResourceKind::ComputeService => "Cloud Run services",
            ResourceKind::ManagedDatabase => "Cloud SQL instances",
            ResourceKind::ObjectStore => "Storage buckets",
            ResourceKind::SecretEntry => "Secrets",
            ResourceKind::PrincipalIdentity => "Service accounts",
            ResourceKind::NetworkConnector => "VPC connectors",
            ResourceKind::EnabledCapability => "Enabled APIs",
        }
    }
}

impl Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_lowercase().replace('-', "_");
        match normalized.as_str() {
            "compute_service" | "cloud_run" | "run" => Ok(ResourceKind::ComputeService),
            "managed_database" | "cloud_sql" | "sql" => Ok(ResourceKind::ManagedDatabase),
            "object_store" | "storage" | "bucket" | "buckets" => Ok(ResourceKind::ObjectStore),
            "secret_entry" | "secrets" | "secret" => Ok(ResourceKind::SecretEntry),
            "principal_identity" | "service_accounts" | "service_account" => {
                Ok(ResourceKind::PrincipalIdentity)
            }
            "network_connector" | "vpc_connectors" | "vpc_connector" => {
                Ok(ResourceKind::NetworkConnector)
            }
            "enabled_capability" | "apis" | "api" => Ok(ResourceKind::EnabledCapability),
            _ => Err(format!("unknown resource kind '{}'", s)),
        }
    }
}

/// One cloud resource as seen by the provider.
///
/// Values are created by the fetcher and only read afterwards. `raw_attributes`
/// holds the normalized, provider-specific view of the resource; environment
/// variables are recorded by name only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveredResource {
    pub project_id: String,
    pub kind: ResourceKind,
    pub identifier: String,
    pub region: Option<String>,
    pub raw_attributes: BTreeMap<String, Value>,
}

impl DiscoveredResource {
    pub fn new(project_id: &str, kind: ResourceKind, identifier: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            kind,
            identifier: identifier.to_string(),
            region: None,
            raw_attributes: BTreeMap::new(),
        }
    }

    pub fn with_region(mut self, region: Option<String>) -> Self {
        self.region = region;
        self
    }

    /// Sets an attribute, ignoring nulls so that absence stays observable
    pub fn with_attribute(mut self, name: &str, value: impl Into<Value>) -> Self {
        let value = value.into();
        if !value.is_null() {
            self.raw_attributes.insert(name.to_string(), value);
        }
        self
    }

    pub fn attribute(&self, name: &str) -> Option<&Value> {
        self.raw_attributes.get(name)
    }

    pub fn attribute_str(&self, name: &str) -> Option<&str> {
        self.raw_attributes.get(name).and_then(|v| v.as_str())
    }

    pub fn attribute_bool(&self, name: &str) -> bool {
        self.raw_attributes
            .get(name)
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }

    /// Reference used to tag everything derived from this resource
    pub fn entry_ref(&self) -> EntryRef {
        EntryRef {
            kind: self.kind,
            identifier: self.identifier.clone(),
        }
    }
}

/// Stable identity of a discovered resource: kind plus identifier
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntryRef {
    pub kind: ResourceKind,
    pub identifier: String,
}

impl Display for EntryRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.kind, self.identifier)
    }
}

/// A resource kind that could not be enumerated
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkipRecord {
    pub kind: ResourceKind,
    pub error: String,
    pub attempts: u32,
}

/// Best-effort result of one discovery run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Inventory {
    pub project_id: String,
    pub resources: Vec<DiscoveredResource>,
    pub skipped: Vec<SkipRecord>,
}

impl Inventory {
    pub fn of_kind(&self, kind: ResourceKind) -> impl Iterator<Item = &DiscoveredResource> {
        self.resources.iter().filter(move |r| r.kind == kind)
    }

    pub fn count(&self, kind: ResourceKind) -> usize {
        self.of_kind(kind).count()
    }

    pub fn is_skipped(&self, kind: ResourceKind) -> bool {
        self.skipped.iter().any(|s| s.kind == kind)
    }
}
