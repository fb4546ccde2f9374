use crate::discovery::model::EntryRef;
use crate::generate::artifact::GenerationArtifact;
use crate::reconcile::engine::PlanEngine;
use crate::reconcile::plan::{self, ParsedPlan, PlannedChange};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::{info, warn};

/// A generated resource whose plan would modify live infrastructure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftedResource {
    pub origin: EntryRef,
    pub changes: Vec<PlannedChange>,
}

impl DriftedResource {
    pub fn reason(&self) -> String {
        let parts: Vec<String> = self
            .changes
            .iter()
            .map(|c| {
                if c.changed_attributes.is_empty() {
                    format!("{} {}", c.action, c.address)
                } else {
                    format!(
                        "{} {} ({})",
                        c.action,
                        c.address,
                        c.changed_attributes.join(", ")
                    )
                }
            })
            .collect();
        format!("plan would {}", parts.join("; "))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum ReconciliationVerdict {
    /// The plan only imports; nothing would be modified
    Clean { imports: usize },
    /// Some resources would be modified; they must be withheld from apply
    DriftDetected {
        drifted: Vec<DriftedResource>,
        clean: Vec<EntryRef>,
        /// Modifications not traceable to any generated resource
        unattributed: Vec<PlannedChange>,
    },
    /// The engine failed on every attempt
    PlanFailed { message: String, attempts: u32 },
}

impl ReconciliationVerdict {
    pub fn is_clean(&self) -> bool {
        matches!(self, ReconciliationVerdict::Clean { .. })
    }

    /// Entries that must be excluded from apply
    pub fn drifted_origins(&self) -> BTreeSet<EntryRef> {
        match self {
            ReconciliationVerdict::DriftDetected { drifted, .. } => {
                drifted.iter().map(|d| d.origin.clone()).collect()
            }
            _ => BTreeSet::new(),
        }
    }
}

/// Single chokepoint between generation and apply.
///
/// Runs one dry-run plan over the whole artifact and attributes every
/// modifying change back to the entry that produced it.
pub struct ReconciliationGate {
    engine: Arc<dyn PlanEngine>,
    attempts: u32,
}

impl ReconciliationGate {
    /// `attempts` is the total number of plan runs; 2 allows one retry
    pub fn new(engine: Arc<dyn PlanEngine>, attempts: u32) -> Self {
        Self {
            engine,
            attempts: attempts.max(1),
        }
    }

    pub async fn reconcile(&self, artifact: &GenerationArtifact) -> ReconciliationVerdict {
        if artifact.is_empty() {
            info!("Nothing to import, skipping plan");
            return ReconciliationVerdict::Clean { imports: 0 };
        }

        let mut last_error = String::new();
        for attempt in 1..=self.attempts {
            let result = match self.engine.plan(artifact).await {
                Ok(output) => plan::parse_plan(&output),
                Err(e) => Err(e),
            };
            match result {
                Ok(parsed) => return evaluate(artifact, &parsed),
                Err(e) => {
                    warn!("Plan attempt {}/{} failed: {}", attempt, self.attempts, e);
                    last_error = e.to_string();
                }
            }
        }

        ReconciliationVerdict::PlanFailed {
            message: last_error,
            attempts: self.attempts,
        }
    }
}

/// Attribute plan changes to artifact entries
pub fn evaluate(artifact: &GenerationArtifact, plan: &ParsedPlan) -> ReconciliationVerdict {
    let mut exact: BTreeMap<&str, &EntryRef> = BTreeMap::new();
    let mut modules: BTreeMap<String, &EntryRef> = BTreeMap::new();
    for import in &artifact.imports {
        exact.insert(import.to.as_str(), &import.origin);
        if let Some(module) = module_prefix(&import.to) {
            modules.insert(module, &import.origin);
        }
    }

    let mut drifted: BTreeMap<EntryRef, Vec<PlannedChange>> = BTreeMap::new();
    let mut unattributed = Vec::new();
    for change in plan.modifying() {
        match owner(&exact, &modules, &change.address) {
            Some(origin) => drifted.entry(origin.clone()).or_default().push(change.clone()),
            None => unattributed.push(change.clone()),
        }
    }

    if drifted.is_empty() && unattributed.is_empty() {
        info!("Plan is clean: {} imports", artifact.imports.len());
        return ReconciliationVerdict::Clean {
            imports: artifact.imports.len(),
        };
    }

    let clean: Vec<EntryRef> = artifact
        .origins()
        .into_iter()
        .filter(|o| !drifted.contains_key(o))
        .collect();
    let drifted: Vec<DriftedResource> = drifted
        .into_iter()
        .map(|(origin, changes)| DriftedResource { origin, changes })
        .collect();

    for resource in &drifted {
        warn!("Drift detected for {}: {}", resource.origin, resource.reason());
    }
    for change in &unattributed {
        warn!("Unattributed plan change: {} {}", change.action, change.address);
    }

    ReconciliationVerdict::DriftDetected {
        drifted,
        clean,
        unattributed,
    }
}

/// Exact import address first, then the longest enclosing module
fn owner<'a>(
    exact: &BTreeMap<&str, &'a EntryRef>,
    modules: &BTreeMap<String, &'a EntryRef>,
    address: &str,
) -> Option<&'a EntryRef> {
    exact.get(address).copied().or_else(|| {
        modules
            .iter()
            .filter(|(prefix, _)| address.starts_with(prefix.as_str()))
            .max_by_key(|(prefix, _)| prefix.len())
            .map(|(_, origin)| *origin)
    })
}

/// `module.name.` for addresses inside a module
fn module_prefix(address: &str) -> Option<String> {
    let rest = address.strip_prefix("module.")?;
    let name = rest.split('.').next()?;
    Some(format!("module.{}.", name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::model::ResourceKind;
    use crate::generate::artifact::ImportDirective;
    use crate::reconcile::engine::EngineError;
    use crate::reconcile::plan::PlanAction;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct ScriptedEngine {
        responses: Mutex<Vec<Result<String, EngineError>>>,
        calls: Mutex<u32>,
    }

    impl ScriptedEngine {
        fn new(responses: Vec<Result<String, EngineError>>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses),
                calls: Mutex::new(0),
            })
        }
    }

    #[async_trait]
    impl PlanEngine for ScriptedEngine {
        async fn plan(&self, _artifact: &GenerationArtifact) -> Result<String, EngineError> {
            *self.calls.lock().unwrap() += 1;
            self.responses.lock().unwrap().remove(0)
        }
    }

    fn origin(id: &str) -> EntryRef {
        EntryRef {
            kind: ResourceKind::ObjectStore,
            identifier: id.to_string(),
        }
    }

    fn artifact() -> GenerationArtifact {
        GenerationArtifact::new(
            vec![],
            vec![
                ImportDirective {
                    origin: origin("a"),
                    to: "module.bucket_a.google_storage_bucket.bucket".into(),
                    id: "p/a".into(),
                },
                ImportDirective {
                    origin: origin("b"),
                    to: "module.bucket_b.google_storage_bucket.bucket".into(),
                    id: "p/b".into(),
                },
            ],
        )
    }

    fn change(address: &str, action: PlanAction, importing: bool) -> PlannedChange {
        PlannedChange {
            address: address.to_string(),
            resource_type: "google_storage_bucket".to_string(),
            action,
            importing,
            changed_attributes: vec![],
        }
    }

    #[test]
    fn test_import_only_plan_is_clean() {
        let plan = ParsedPlan {
            terraform_version: None,
            changes: vec![
                change("module.bucket_a.google_storage_bucket.bucket", PlanAction::NoOp, true),
                change("module.bucket_b.google_storage_bucket.bucket", PlanAction::NoOp, true),
            ],
        };
        assert_eq!(evaluate(&artifact(), &plan), ReconciliationVerdict::Clean { imports: 2 });
    }

    #[test]
    fn test_drift_is_attributed_per_resource() {
        let plan = ParsedPlan {
            terraform_version: None,
            changes: vec![
                change("module.bucket_a.google_storage_bucket.bucket", PlanAction::Update, true),
                change("module.bucket_a.google_storage_bucket_iam_member.viewer", PlanAction::Create, false),
                change("module.bucket_b.google_storage_bucket.bucket", PlanAction::NoOp, true),
            ],
        };
        let verdict = evaluate(&artifact(), &plan);
        match &verdict {
            ReconciliationVerdict::DriftDetected {
                drifted,
                clean,
                unattributed,
            } => {
                assert_eq!(drifted.len(), 1);
                assert_eq!(drifted[0].origin, origin("a"));
                assert_eq!(drifted[0].changes.len(), 2);
                assert_eq!(clean, &vec![origin("b")]);
                assert!(unattributed.is_empty());
            }
            other => panic!("unexpected verdict: {other:?}"),
        }
        assert_eq!(verdict.drifted_origins(), [origin("a")].into_iter().collect());
    }

    #[test]
    fn test_unattributed_change_is_drift() {
        let plan = ParsedPlan {
            terraform_version: None,
            changes: vec![change("google_project_iam_member.x", PlanAction::Create, false)],
        };
        let verdict = evaluate(&artifact(), &plan);
        assert!(matches!(
            verdict,
            ReconciliationVerdict::DriftDetected { ref drifted, ref unattributed, .. }
                if drifted.is_empty() && unattributed.len() == 1
        ));
        assert!(verdict.drifted_origins().is_empty());
    }

    #[test]
    fn test_module_prefix_does_not_match_similar_names() {
        assert_eq!(
            module_prefix("module.bucket_a.google_storage_bucket.bucket").as_deref(),
            Some("module.bucket_a.")
        );
        assert_eq!(module_prefix("google_service_account.x"), None);

        let plan = ParsedPlan {
            terraform_version: None,
            changes: vec![change("module.bucket_ab.google_storage_bucket.bucket", PlanAction::Update, false)],
        };
        assert!(matches!(
            evaluate(&artifact(), &plan),
            ReconciliationVerdict::DriftDetected { ref unattributed, .. } if unattributed.len() == 1
        ));
    }

    #[tokio::test]
    async fn test_plan_failure_is_retried_once() {
        let clean_plan = r#"{"format_version": "1.2", "resource_changes": []}"#.to_string();
        let engine = ScriptedEngine::new(vec![
            Err(EngineError::CommandFailed {
                command: "plan".into(),
                stderr: "Error acquiring the state lock".into(),
            }),
            Ok(clean_plan),
        ]);
        let gate = ReconciliationGate::new(engine.clone(), 2);
        assert_eq!(
            gate.reconcile(&artifact()).await,
            ReconciliationVerdict::Clean { imports: 2 }
        );
        assert_eq!(*engine.calls.lock().unwrap(), 2);
    }

    #[tokio::test]
    async fn test_plan_failure_after_retry_is_fatal() {
        let failure = || {
            Err(EngineError::CommandFailed {
                command: "init".into(),
                stderr: "Failed to query available provider packages".into(),
            })
        };
        let engine = ScriptedEngine::new(vec![failure(), failure()]);
        let gate = ReconciliationGate::new(engine.clone(), 2);
        match gate.reconcile(&artifact()).await {
            ReconciliationVerdict::PlanFailed { message, attempts } => {
                assert_eq!(attempts, 2);
                assert!(message.contains("Failed to query available provider packages"));
            }
            other => panic!("unexpected verdict: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_artifact_skips_engine() {
        let engine = ScriptedEngine::new(vec![]);
        let gate = ReconciliationGate::new(engine.clone(), 2);
        let verdict = gate.reconcile(&GenerationArtifact::default()).await;
        assert_eq!(verdict, ReconciliationVerdict::Clean { imports: 0 });
        assert_eq!(*engine.calls.lock().unwrap(), 0);
    }
}
