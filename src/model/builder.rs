use crate::classify::classifier::{ClassificationResult, Evidence, Role};
use crate::discovery::model::{DiscoveredResource, EntryRef, ResourceKind};
use crate::generate::naming;
use crate::model::templates::{self, Requirement, Template, TemplateId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Display;
use tracing::{debug, info};

/// Where the import statement points: generated address plus provider id
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ImportTarget {
    pub address: String,
    pub id: String,
}

/// A fully resolved template binding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Binding {
    pub instance_name: String,
    pub variables: BTreeMap<String, Value>,
    pub import_target: ImportTarget,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum UnresolvedReason {
    /// The classifier found no usable evidence
    AmbiguousRole { evidence: Vec<Evidence> },
    /// A compute service without a classification result
    MissingClassification,
    /// Required template inputs with no value in the live resource
    MissingInputs {
        template: TemplateId,
        inputs: Vec<String>,
    },
    /// The bucket holds Terraform state and is owned by the backend config
    StateBucket,
    NoTemplate {
        kind: ResourceKind,
        role: Option<Role>,
    },
}

impl Display for UnresolvedReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnresolvedReason::AmbiguousRole { evidence } if evidence.is_empty() => write!(
                f,
                "role could not be inferred: no frontend or backend signals in environment variable names"
            ),
            UnresolvedReason::AmbiguousRole { evidence } => {
                let names: Vec<String> = evidence
                    .iter()
                    .map(|e| format!("{} ({})", e.variable, e.signal))
                    .collect();
                write!(f, "role could not be inferred from: {}", names.join(", "))
            }
            UnresolvedReason::MissingClassification => {
                write!(f, "compute service has no classification result")
            }
            UnresolvedReason::MissingInputs { template, inputs } => write!(
                f,
                "template {} is missing required input(s): {}",
                template,
                inputs.join(", ")
            ),
            UnresolvedReason::StateBucket => write!(
                f,
                "bucket holds Terraform state and is managed by the backend configuration"
            ),
            UnresolvedReason::NoTemplate { kind, role } => match role {
                Some(role) => write!(f, "no template for {} with role {}", kind, role),
                None => write!(f, "no template for {}", kind),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Directive {
    Ready(Binding),
    Unresolved(UnresolvedReason),
}

/// One planning unit per discovered resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceModelEntry {
    pub source: DiscoveredResource,
    pub role: Option<Role>,
    pub selected_template: Option<TemplateId>,
    pub directive: Directive,
}

impl ResourceModelEntry {
    pub fn entry_ref(&self) -> EntryRef {
        self.source.entry_ref()
    }

    pub fn binding(&self) -> Option<&Binding> {
        match &self.directive {
            Directive::Ready(binding) => Some(binding),
            Directive::Unresolved(_) => None,
        }
    }

    pub fn unresolved_reason(&self) -> Option<&UnresolvedReason> {
        match &self.directive {
            Directive::Ready(_) => None,
            Directive::Unresolved(reason) => Some(reason),
        }
    }

    pub fn is_ready(&self) -> bool {
        matches!(self.directive, Directive::Ready(_))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BuildOutcome {
    pub ready: Vec<ResourceModelEntry>,
    pub needs_review: Vec<ResourceModelEntry>,
}

impl BuildOutcome {
    pub fn total(&self) -> usize {
        self.ready.len() + self.needs_review.len()
    }
}

/// Turns the inventory and classifications into template bindings.
#[derive(Debug, Clone, Default)]
pub struct ModelBuilder {
    role_overrides: BTreeMap<String, Role>,
}

impl ModelBuilder {
    pub fn new(role_overrides: BTreeMap<String, Role>) -> Self {
        Self { role_overrides }
    }

    pub fn build(
        &self,
        inventory: &[DiscoveredResource],
        classifications: &[ClassificationResult],
    ) -> BuildOutcome {
        let by_identifier: HashMap<&str, &ClassificationResult> = classifications
            .iter()
            .map(|c| (c.resource_identifier.as_str(), c))
            .collect();

        let mut outcome = BuildOutcome::default();
        for resource in inventory {
            let classification = by_identifier.get(resource.identifier.as_str()).copied();
            let entry = self.build_entry(resource, classification);
            match &entry.directive {
                Directive::Ready(binding) => {
                    debug!(
                        "{} bound to {}",
                        entry.entry_ref(),
                        binding.import_target.address
                    );
                    outcome.ready.push(entry);
                }
                Directive::Unresolved(reason) => {
                    info!("{} needs review: {}", entry.entry_ref(), reason);
                    outcome.needs_review.push(entry);
                }
            }
        }

        outcome.ready.sort_by_key(|e| e.entry_ref());
        outcome.needs_review.sort_by_key(|e| e.entry_ref());
        outcome
    }

    fn build_entry(
        &self,
        resource: &DiscoveredResource,
        classification: Option<&ClassificationResult>,
    ) -> ResourceModelEntry {
        let unresolved = |role: Option<Role>, template: Option<TemplateId>, reason| ResourceModelEntry {
            source: resource.clone(),
            role,
            selected_template: template,
            directive: Directive::Unresolved(reason),
        };

        let role = if resource.kind == ResourceKind::ComputeService {
            let role = match (self.override_for(resource), classification) {
                (Some(role), _) => role,
                (None, Some(result)) => result.inferred_role,
                (None, None) => {
                    return unresolved(None, None, UnresolvedReason::MissingClassification)
                }
            };
            if role == Role::Unknown {
                let evidence = classification.map(|c| c.evidence.clone()).unwrap_or_default();
                return unresolved(
                    Some(role),
                    None,
                    UnresolvedReason::AmbiguousRole { evidence },
                );
            }
            Some(role)
        } else {
            None
        };

        let Some(template_id) = templates::select(resource.kind, role) else {
            return unresolved(
                role,
                None,
                UnresolvedReason::NoTemplate {
                    kind: resource.kind,
                    role,
                },
            );
        };

        if resource.kind == ResourceKind::ObjectStore
            && resource.attribute_bool("is_terraform_state")
        {
            return unresolved(role, Some(template_id), UnresolvedReason::StateBucket);
        }

        match bind(template_id.template(), resource) {
            Ok(binding) => ResourceModelEntry {
                source: resource.clone(),
                role,
                selected_template: Some(template_id),
                directive: Directive::Ready(binding),
            },
            Err(inputs) => unresolved(
                role,
                Some(template_id),
                UnresolvedReason::MissingInputs {
                    template: template_id,
                    inputs,
                },
            ),
        }
    }

    fn override_for(&self, resource: &DiscoveredResource) -> Option<Role> {
        let role = self
            .role_overrides
            .get(&resource.identifier)
            .copied()
            .filter(|r| *r != Role::Unknown)?;
        debug!("Using configured role {} for {}", role, resource.identifier);
        Some(role)
    }
}

/// Resolve every template input from the resource's attributes.
///
/// Returns the names of all missing required inputs on failure; nothing is
/// ever defaulted.
fn bind(template: &Template, resource: &DiscoveredResource) -> Result<Binding, Vec<String>> {
    let mut variables = BTreeMap::new();
    for input in template.inputs {
        if let Some(value) = resource.attribute(input.attribute).filter(|v| has_value(v)) {
            variables.insert(input.name.to_string(), value.clone());
        }
    }

    let missing: Vec<String> = template
        .inputs
        .iter()
        .filter(|input| !variables.contains_key(input.name))
        .filter(|input| match input.requirement {
            Requirement::Required => true,
            Requirement::Optional => false,
            Requirement::RequiredWhen { input, equals } => {
                variables.get(input).and_then(Value::as_str) == Some(equals)
            }
        })
        .map(|input| input.name.to_string())
        .collect();

    if !missing.is_empty() {
        return Err(missing);
    }

    let instance_name = naming::instance_name(template, &resource.identifier);
    let id = template.import_id(&resource.project_id, &variables)?;

    Ok(Binding {
        import_target: ImportTarget {
            address: template.import_address(&instance_name),
            id,
        },
        instance_name,
        variables,
    })
}

/// Empty strings and collections count as absent
fn has_value(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        _ => true,
    }
}
