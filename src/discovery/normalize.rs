//! Converts provider JSON listings into `DiscoveredResource` values.
//!
//! Only the attributes the classifier and template extraction maps need are
//! kept. Environment variable values never leave this module.

use crate::discovery::model::{DiscoveredResource, ResourceKind};
use crate::discovery::provider::ProviderError;
use serde_json::{Map, Value};

/// Service account domains owned by Google rather than the project
const MANAGED_ACCOUNT_MARKERS: &[&str] = &["@cloudservices", "@compute-system", "@gcp-sa-"];

/// Enabled APIs worth carrying into configuration, with display titles
pub const INTERESTING_APIS: &[(&str, &str)] = &[
    ("aiplatform.googleapis.com", "Vertex AI"),
    ("bigquery.googleapis.com", "BigQuery"),
    ("pubsub.googleapis.com", "Pub/Sub"),
    ("translate.googleapis.com", "Translation API"),
    ("vision.googleapis.com", "Vision API"),
    ("language.googleapis.com", "Natural Language API"),
    ("cloudtasks.googleapis.com", "Cloud Tasks"),
    ("cloudscheduler.googleapis.com", "Cloud Scheduler"),
];

const LOCATION_LABEL: &str = "cloud.googleapis.com/location";

/// Normalize one list response for `kind`.
///
/// `region_hint` is the region the listing was scoped to, for kinds listed
/// per region.
pub fn normalize(
    kind: ResourceKind,
    project_id: &str,
    payload: &Value,
    region_hint: Option<&str>,
) -> Result<Vec<DiscoveredResource>, ProviderError> {
    let items = match payload {
        Value::Null => return Ok(Vec::new()),
        Value::Array(items) => items,
        other => {
            return Err(ProviderError::InvalidResponse(format!(
                "expected a JSON array for {}, got {}",
                kind,
                json_type(other)
            )))
        }
    };

    let resources = items
        .iter()
        .filter_map(|item| match kind {
            ResourceKind::ComputeService => cloud_run_service(project_id, item),
            ResourceKind::ManagedDatabase => cloud_sql_instance(project_id, item),
            ResourceKind::ObjectStore => storage_bucket(project_id, item),
            ResourceKind::SecretEntry => secret(project_id, item),
            ResourceKind::PrincipalIdentity => service_account(project_id, item),
            ResourceKind::NetworkConnector => vpc_connector(project_id, item, region_hint),
            ResourceKind::EnabledCapability => enabled_api(project_id, item),
        })
        .collect();

    Ok(resources)
}

fn cloud_run_service(project_id: &str, item: &Value) -> Option<DiscoveredResource> {
    let metadata = item.get("metadata")?;
    let name = metadata.get("name")?.as_str()?;
    let region = metadata
        .pointer("/labels/cloud.googleapis.com~1location")
        .and_then(Value::as_str)
        .map(str::to_string);

    let pod_spec = item.pointer("/spec/template/spec");
    let container = pod_spec
        .and_then(|spec| spec.get("containers"))
        .and_then(Value::as_array)
        .and_then(|containers| containers.first());

    let env_names: Vec<Value> = container
        .and_then(|c| c.get("env"))
        .and_then(Value::as_array)
        .map(|env| {
            env.iter()
                .filter_map(|var| var.get("name").and_then(Value::as_str))
                .filter(|name| !name.is_empty())
                .map(|name| Value::String(name.to_string()))
                .collect()
        })
        .unwrap_or_default();

    let port = container
        .and_then(|c| c.pointer("/ports/0/containerPort"))
        .cloned()
        .unwrap_or(Value::Null);

    Some(
        DiscoveredResource::new(project_id, ResourceKind::ComputeService, name)
            .with_region(region.clone())
            .with_attribute("name", name)
            .with_attribute("region", region)
            .with_attribute("url", string_at(item, "/status/url"))
            .with_attribute("image", container.and_then(|c| c.get("image")).cloned().unwrap_or(Value::Null))
            .with_attribute("container_port", port)
            .with_attribute(
                "service_account",
                pod_spec
                    .and_then(|spec| spec.get("serviceAccountName"))
                    .cloned()
                    .unwrap_or(Value::Null),
            )
            .with_attribute("env_names", Value::Array(env_names))
            .with_attribute("labels", user_labels(metadata.get("labels"))),
    )
}

fn cloud_sql_instance(project_id: &str, item: &Value) -> Option<DiscoveredResource> {
    let name = item.get("name")?.as_str()?;
    let region = item.get("region").and_then(Value::as_str).map(str::to_string);

    Some(
        DiscoveredResource::new(project_id, ResourceKind::ManagedDatabase, name)
            .with_region(region.clone())
            .with_attribute("name", name)
            .with_attribute("region", region)
            .with_attribute("database_version", string_at(item, "/databaseVersion"))
            .with_attribute("tier", string_at(item, "/settings/tier"))
            .with_attribute("availability_type", string_at(item, "/settings/availabilityType"))
            .with_attribute("state", string_at(item, "/state"))
            .with_attribute("labels", user_labels(item.pointer("/settings/userLabels"))),
    )
}

fn storage_bucket(project_id: &str, item: &Value) -> Option<DiscoveredResource> {
    let name = item.get("name")?.as_str()?;
    let location = item
        .get("location")
        .and_then(Value::as_str)
        .map(str::to_string);
    let storage_class = item
        .get("default_storage_class")
        .or_else(|| item.get("storageClass"))
        .cloned()
        .unwrap_or(Value::Null);

    Some(
        DiscoveredResource::new(project_id, ResourceKind::ObjectStore, name)
            .with_region(location.clone())
            .with_attribute("name", name)
            .with_attribute("location", location)
            .with_attribute("storage_class", storage_class)
            .with_attribute("is_terraform_state", name.contains("terraform-state"))
            .with_attribute("labels", user_labels(item.get("labels"))),
    )
}

fn secret(project_id: &str, item: &Value) -> Option<DiscoveredResource> {
    let full_name = item.get("name")?.as_str()?;
    let name = last_segment(full_name);

    let (replication, replicas) = match item.get("replication") {
        Some(r) if r.get("automatic").is_some() => (Value::from("automatic"), Value::Null),
        Some(r) if r.get("userManaged").is_some() => {
            let locations: Vec<Value> = r
                .pointer("/userManaged/replicas")
                .and_then(Value::as_array)
                .map(|replicas| {
                    replicas
                        .iter()
                        .filter_map(|replica| replica.get("location").cloned())
                        .collect()
                })
                .unwrap_or_default();
            (Value::from("user_managed"), Value::Array(locations))
        }
        _ => (Value::Null, Value::Null),
    };

    Some(
        DiscoveredResource::new(project_id, ResourceKind::SecretEntry, name)
            .with_attribute("name", name)
            .with_attribute("replication", replication)
            .with_attribute("replica_locations", replicas)
            .with_attribute("created", string_at(item, "/createTime"))
            .with_attribute("labels", user_labels(item.get("labels"))),
    )
}

fn service_account(project_id: &str, item: &Value) -> Option<DiscoveredResource> {
    let email = item.get("email")?.as_str()?;
    if MANAGED_ACCOUNT_MARKERS.iter().any(|m| email.contains(m)) {
        return None;
    }

    let account_id = email.split('@').next().unwrap_or(email);

    Some(
        DiscoveredResource::new(project_id, ResourceKind::PrincipalIdentity, email)
            .with_attribute("email", email)
            .with_attribute("account_id", account_id)
            .with_attribute("display_name", string_at(item, "/displayName"))
            .with_attribute("description", string_at(item, "/description"))
            .with_attribute("disabled", item.get("disabled").cloned().unwrap_or(Value::Null)),
    )
}

fn vpc_connector(project_id: &str, item: &Value, region_hint: Option<&str>) -> Option<DiscoveredResource> {
    let full_name = item.get("name")?.as_str()?;
    let name = last_segment(full_name);
    let region = region_from_path(full_name)
        .or(region_hint)
        .map(str::to_string);

    Some(
        DiscoveredResource::new(project_id, ResourceKind::NetworkConnector, name)
            .with_region(region.clone())
            .with_attribute("name", name)
            .with_attribute("region", region)
            .with_attribute("network", string_at(item, "/network"))
            .with_attribute("ip_cidr_range", string_at(item, "/ipCidrRange"))
            .with_attribute("machine_type", string_at(item, "/machineType"))
            .with_attribute("min_instances", item.get("minInstances").cloned().unwrap_or(Value::Null))
            .with_attribute("max_instances", item.get("maxInstances").cloned().unwrap_or(Value::Null)),
    )
}

fn enabled_api(project_id: &str, item: &Value) -> Option<DiscoveredResource> {
    let name = item.pointer("/config/name")?.as_str()?;
    let (_, title) = INTERESTING_APIS.iter().find(|(api, _)| *api == name)?;

    Some(
        DiscoveredResource::new(project_id, ResourceKind::EnabledCapability, name)
            .with_attribute("name", name)
            .with_attribute("title", *title),
    )
}

/// Labels set by users, without the ones the platform manages
fn user_labels(labels: Option<&Value>) -> Value {
    let Some(Value::Object(labels)) = labels else {
        return Value::Null;
    };

    let filtered: Map<String, Value> = labels
        .iter()
        .filter(|(key, _)| {
            key.as_str() != LOCATION_LABEL
                && !key.starts_with("cloud.googleapis.com/")
                && !key.starts_with("run.googleapis.com/")
                && !key.starts_with("serving.knative.dev/")
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    if filtered.is_empty() {
        Value::Null
    } else {
        Value::Object(filtered)
    }
}

fn string_at(item: &Value, pointer: &str) -> Value {
    match item.pointer(pointer) {
        Some(Value::String(s)) if !s.is_empty() => Value::String(s.clone()),
        _ => Value::Null,
    }
}

fn last_segment(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn region_from_path(path: &str) -> Option<&str> {
    let mut segments = path.split('/');
    while let Some(segment) = segments.next() {
        if segment == "locations" {
            return segments.next();
        }
    }
    None
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
