use crate::classify::classifier::{ClassificationResult, Evidence, Role};
use crate::discovery::model::{Inventory, ResourceKind, SkipRecord};
use crate::model::builder::{BuildOutcome, ResourceModelEntry};
use crate::model::templates::TemplateId;
use crate::reconcile::gate::ReconciliationVerdict;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Ready,
    NeedsReview,
    DriftDetected,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportCounts {
    /// Resources that will be imported by the apply step
    pub ready: usize,
    pub needs_review: usize,
    pub drift_detected: usize,
    /// Resource kinds that could not be enumerated
    pub skipped: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceReport {
    pub kind: ResourceKind,
    pub identifier: String,
    pub status: ResourceStatus,
    pub role: Option<Role>,
    pub template: Option<TemplateId>,
    pub import_address: Option<String>,
    pub import_id: Option<String>,
    pub reason: Option<String>,
    pub confidence: Option<f64>,
    pub evidence: Vec<Evidence>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReconciliationStatus {
    NotRun,
    Clean,
    DriftDetected,
    PlanFailed,
}

/// Outcome of one run, for display and for assertions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub project_id: String,
    pub generated_at: DateTime<Utc>,
    pub counts: ReportCounts,
    pub reconciliation: ReconciliationStatus,
    pub resources: Vec<ResourceReport>,
    pub skipped_kinds: Vec<SkipRecord>,
    /// Plan changes that could not be traced to a generated resource
    pub unattributed_changes: Vec<String>,
    /// Why the run stopped before writing anything
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aborted: Option<String>,
}

impl RunReport {
    pub fn build(
        inventory: &Inventory,
        classifications: &[ClassificationResult],
        outcome: &BuildOutcome,
        verdict: Option<&ReconciliationVerdict>,
    ) -> Self {
        let by_identifier: HashMap<&str, &ClassificationResult> = classifications
            .iter()
            .map(|c| (c.resource_identifier.as_str(), c))
            .collect();

        let drift_reasons: BTreeMap<_, _> = match verdict {
            Some(ReconciliationVerdict::DriftDetected { drifted, .. }) => drifted
                .iter()
                .map(|d| (d.origin.clone(), d.reason()))
                .collect(),
            _ => BTreeMap::new(),
        };

        let describe = |entry: &ResourceModelEntry, status: ResourceStatus, reason: Option<String>| {
            let classification = (entry.source.kind == ResourceKind::ComputeService)
                .then(|| by_identifier.get(entry.source.identifier.as_str()).copied())
                .flatten();
            let binding = entry.binding();
            ResourceReport {
                kind: entry.source.kind,
                identifier: entry.source.identifier.clone(),
                status,
                role: entry.role,
                template: entry.selected_template,
                import_address: binding.map(|b| b.import_target.address.clone()),
                import_id: binding.map(|b| b.import_target.id.clone()),
                reason,
                confidence: classification.map(|c| c.confidence_score),
                evidence: classification.map(|c| c.evidence.clone()).unwrap_or_default(),
            }
        };

        let mut resources = Vec::with_capacity(outcome.total());
        for entry in &outcome.ready {
            match drift_reasons.get(&entry.entry_ref()) {
                Some(reason) => resources.push(describe(
                    entry,
                    ResourceStatus::DriftDetected,
                    Some(reason.clone()),
                )),
                None => resources.push(describe(entry, ResourceStatus::Ready, None)),
            }
        }
        for entry in &outcome.needs_review {
            resources.push(describe(
                entry,
                ResourceStatus::NeedsReview,
                entry.unresolved_reason().map(|r| r.to_string()),
            ));
        }
        resources.sort_by(|a, b| (a.kind, &a.identifier).cmp(&(b.kind, &b.identifier)));

        let count = |status: ResourceStatus| resources.iter().filter(|r| r.status == status).count();
        let counts = ReportCounts {
            ready: count(ResourceStatus::Ready),
            needs_review: count(ResourceStatus::NeedsReview),
            drift_detected: count(ResourceStatus::DriftDetected),
            skipped: inventory.skipped.len(),
        };

        let (reconciliation, unattributed_changes) = match verdict {
            None => (ReconciliationStatus::NotRun, Vec::new()),
            Some(ReconciliationVerdict::Clean { .. }) => (ReconciliationStatus::Clean, Vec::new()),
            Some(ReconciliationVerdict::DriftDetected { unattributed, .. }) => (
                ReconciliationStatus::DriftDetected,
                unattributed
                    .iter()
                    .map(|c| format!("{} {}", c.action, c.address))
                    .collect(),
            ),
            Some(ReconciliationVerdict::PlanFailed { .. }) => {
                (ReconciliationStatus::PlanFailed, Vec::new())
            }
        };

        RunReport {
            project_id: inventory.project_id.clone(),
            generated_at: Utc::now(),
            counts,
            reconciliation,
            resources,
            skipped_kinds: inventory.skipped.clone(),
            unattributed_changes,
            aborted: None,
        }
    }

    /// Mark the report as belonging to a run that wrote no files
    pub fn aborted(mut self, reason: impl Into<String>) -> Self {
        self.aborted = Some(reason.into());
        self
    }

    pub fn with_status(&self, status: ResourceStatus) -> impl Iterator<Item = &ResourceReport> {
        self.resources.iter().filter(move |r| r.status == status)
    }
}
