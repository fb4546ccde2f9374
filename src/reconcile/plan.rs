//! Parsing of `terraform show -json` plans and `terraform plan -json` streams.

use crate::reconcile::engine::EngineError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanAction {
    NoOp,
    Read,
    Create,
    Update,
    Delete,
    Replace,
}

impl PlanAction {
    /// Actions the engine reports as `["create", "delete"]` style lists
    pub fn from_actions(actions: &[String]) -> PlanAction {
        let has = |name: &str| actions.iter().any(|a| a == name);
        if has("create") && has("delete") {
            PlanAction::Replace
        } else if has("delete") {
            PlanAction::Delete
        } else if has("create") {
            PlanAction::Create
        } else if has("update") {
            PlanAction::Update
        } else if has("read") {
            PlanAction::Read
        } else {
            PlanAction::NoOp
        }
    }

    /// Single action names used in the streaming UI format
    pub fn from_ui(action: &str) -> PlanAction {
        match action {
            "create" => PlanAction::Create,
            "update" => PlanAction::Update,
            "delete" => PlanAction::Delete,
            "replace" => PlanAction::Replace,
            "read" => PlanAction::Read,
            _ => PlanAction::NoOp,
        }
    }

    pub fn modifies(&self) -> bool {
        !matches!(self, PlanAction::NoOp | PlanAction::Read)
    }
}

impl Display for PlanAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PlanAction::NoOp => write!(f, "no-op"),
            PlanAction::Read => write!(f, "read"),
            PlanAction::Create => write!(f, "create"),
            PlanAction::Update => write!(f, "update"),
            PlanAction::Delete => write!(f, "delete"),
            PlanAction::Replace => write!(f, "replace"),
        }
    }
}

/// One resource instance in the plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedChange {
    pub address: String,
    pub resource_type: String,
    pub action: PlanAction,
    pub importing: bool,
    /// Top-level attributes whose planned value differs from the current one
    pub changed_attributes: Vec<String>,
}

impl PlannedChange {
    /// An import that adopts the resource as-is, or nothing at all
    pub fn is_clean(&self) -> bool {
        !self.action.modifies()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedPlan {
    pub terraform_version: Option<String>,
    pub changes: Vec<PlannedChange>,
}

impl ParsedPlan {
    pub fn importing(&self) -> impl Iterator<Item = &PlannedChange> {
        self.changes.iter().filter(|c| c.importing)
    }

    pub fn modifying(&self) -> impl Iterator<Item = &PlannedChange> {
        self.changes.iter().filter(|c| c.action.modifies())
    }
}

#[derive(Debug, Deserialize)]
struct PlanJson {
    format_version: Option<String>,
    terraform_version: Option<String>,
    #[serde(default)]
    resource_changes: Vec<PlanResourceChange>,
}

#[derive(Debug, Deserialize)]
struct PlanResourceChange {
    address: String,
    #[serde(rename = "type")]
    resource_type: String,
    #[serde(default)]
    mode: Option<String>,
    change: PlanChange,
}

#[derive(Debug, Deserialize)]
struct PlanChange {
    #[serde(default)]
    actions: Vec<String>,
    before: Option<Value>,
    after: Option<Value>,
    importing: Option<Value>,
}

/// Parse plan output, accepting both the `show -json` document and the
/// newline-delimited `plan -json` stream
pub fn parse_plan(text: &str) -> Result<ParsedPlan, EngineError> {
    if let Ok(plan) = serde_json::from_str::<PlanJson>(text) {
        if plan.format_version.is_some() || !plan.resource_changes.is_empty() {
            return Ok(from_document(plan));
        }
    }
    parse_stream(text)
}

fn from_document(plan: PlanJson) -> ParsedPlan {
    let changes = plan
        .resource_changes
        .into_iter()
        .filter(|rc| rc.mode.as_deref() != Some("data"))
        .map(|rc| PlannedChange {
            changed_attributes: changed_attributes(rc.change.before.as_ref(), rc.change.after.as_ref()),
            address: rc.address,
            resource_type: rc.resource_type,
            action: PlanAction::from_actions(&rc.change.actions),
            importing: rc.change.importing.is_some(),
        })
        .collect();

    ParsedPlan {
        terraform_version: plan.terraform_version,
        changes,
    }
}

fn parse_stream(text: &str) -> Result<ParsedPlan, EngineError> {
    let mut plan = ParsedPlan::default();
    let mut parsed_lines = 0;

    for line in text.lines().filter(|l| !l.trim().is_empty()) {
        let Ok(message) = serde_json::from_str::<Value>(line) else {
            continue;
        };
        parsed_lines += 1;

        if let Some(version) = message.get("terraform").and_then(Value::as_str) {
            plan.terraform_version = Some(version.to_string());
        }

        // resource_drift reports state refresh differences, not config changes
        if message.get("type").and_then(Value::as_str) != Some("planned_change") {
            continue;
        }
        let Some(change) = message.get("change") else {
            continue;
        };
        let Some(address) = change.pointer("/resource/addr").and_then(Value::as_str) else {
            continue;
        };
        let action = change
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or("noop");

        plan.changes.push(PlannedChange {
            address: address.to_string(),
            resource_type: change
                .pointer("/resource/resource_type")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            action: PlanAction::from_ui(action),
            importing: action == "import" || change.get("importing").is_some(),
            changed_attributes: Vec::new(),
        });
    }

    if parsed_lines == 0 {
        return Err(EngineError::InvalidPlan(
            "plan output contained no JSON".to_string(),
        ));
    }
    Ok(plan)
}

fn changed_attributes(before: Option<&Value>, after: Option<&Value>) -> Vec<String> {
    let (Some(Value::Object(before)), Some(Value::Object(after))) = (before, after) else {
        return Vec::new();
    };
    let mut changed: Vec<String> = after
        .iter()
        .filter(|(key, value)| before.get(key.as_str()) != Some(*value))
        .map(|(key, _)| key.clone())
        .collect();
    changed.sort();
    changed
}
