use crate::classify::classifier::ClassificationResult;
use crate::core::report::{ReconciliationStatus, ResourceStatus, RunReport};
use crate::discovery::model::Inventory;
use serde_json::{json, Value};
use std::fmt::Write;

/// Output formatter for structured, user-friendly results
pub struct OutputFormatter;

impl OutputFormatter {
    /// Full run report, with the commands an operator would run when
    /// import blocks are not an option
    pub fn format_report(report: &RunReport, import_commands: &[String]) -> Value {
        let mut result = serde_json::to_value(report).unwrap_or_else(|_| json!({}));
        result["summary"] = json!({
            "ready": report.counts.ready,
            "needs_review": report.counts.needs_review,
            "drift_detected": report.counts.drift_detected,
            "skipped_kinds": report.counts.skipped,
            "reconciliation": report.reconciliation,
            "description": Self::describe_reconciliation(report.reconciliation)
        });
        result["import_commands"] = json!(import_commands);
        result
    }

    pub fn format_report_text(report: &RunReport) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Project: {}", report.project_id);
        let _ = writeln!(
            out,
            "Ready: {}  Needs review: {}  Drift detected: {}  Skipped kinds: {}",
            report.counts.ready,
            report.counts.needs_review,
            report.counts.drift_detected,
            report.counts.skipped
        );
        let _ = writeln!(
            out,
            "Reconciliation: {}",
            Self::describe_reconciliation(report.reconciliation)
        );
        if let Some(reason) = &report.aborted {
            let _ = writeln!(out, "Aborted, no files written: {}", reason);
        }

        for (status, title) in [
            (ResourceStatus::Ready, "Ready to import"),
            (ResourceStatus::DriftDetected, "Drift detected (excluded from apply)"),
            (ResourceStatus::NeedsReview, "Needs review"),
        ] {
            let entries: Vec<_> = report.with_status(status).collect();
            if entries.is_empty() {
                continue;
            }
            let _ = writeln!(out, "\n{}:", title);
            for entry in entries {
                let target = entry.import_address.as_deref().unwrap_or("-");
                let _ = write!(out, "  {}/{} -> {}", entry.kind, entry.identifier, target);
                if let Some(role) = entry.role {
                    let _ = write!(out, " [{}]", role);
                }
                if let Some(reason) = &entry.reason {
                    let _ = write!(out, " ({})", reason);
                }
                out.push('\n');
            }
        }

        if !report.skipped_kinds.is_empty() {
            let _ = writeln!(out, "\nSkipped kinds:");
            for skip in &report.skipped_kinds {
                let _ = writeln!(
                    out,
                    "  {} after {} attempt(s): {}",
                    skip.kind, skip.attempts, skip.error
                );
            }
        }

        if !report.unattributed_changes.is_empty() {
            let _ = writeln!(out, "\nUnattributed plan changes:");
            for change in &report.unattributed_changes {
                let _ = writeln!(out, "  {}", change);
            }
        }

        out
    }

    /// Inventory listing for the `discover` command
    pub fn format_inventory(inventory: &Inventory, classifications: &[ClassificationResult]) -> Value {
        json!({
            "summary": {
                "project_id": inventory.project_id,
                "total_resources": inventory.resources.len(),
                "skipped_kinds": inventory.skipped.len(),
            },
            "resources": inventory.resources.iter().map(|resource| {
                json!({
                    "kind": resource.kind,
                    "identifier": resource.identifier,
                    "region": resource.region,
                    "attributes": resource.raw_attributes,
                })
            }).collect::<Vec<_>>(),
            "classifications": classifications.iter().map(|c| {
                json!({
                    "service": c.resource_identifier,
                    "role": c.inferred_role,
                    "confidence": c.confidence_score,
                    "confidence_band": Self::confidence_band(c.confidence_score),
                    "frontend_score": c.frontend_score,
                    "backend_score": c.backend_score,
                    "evidence": c.evidence,
                })
            }).collect::<Vec<_>>(),
            "skipped": inventory.skipped,
        })
    }

    pub fn format_inventory_text(
        inventory: &Inventory,
        classifications: &[ClassificationResult],
    ) -> String {
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Project: {} ({} resources)",
            inventory.project_id,
            inventory.resources.len()
        );
        for resource in &inventory.resources {
            match &resource.region {
                Some(region) => {
                    let _ = writeln!(out, "  {} {} ({})", resource.kind, resource.identifier, region);
                }
                None => {
                    let _ = writeln!(out, "  {} {}", resource.kind, resource.identifier);
                }
            }
        }

        if !classifications.is_empty() {
            let _ = writeln!(out, "\nService roles:");
            for c in classifications {
                let signals = c
                    .evidence
                    .iter()
                    .map(|e| format!("{}={}", e.variable, e.signal))
                    .collect::<Vec<_>>()
                    .join(", ");
                let _ = writeln!(
                    out,
                    "  {}: {} ({} confidence) {}",
                    c.resource_identifier,
                    c.inferred_role,
                    Self::confidence_band(c.confidence_score),
                    signals
                );
            }
        }

        for skip in &inventory.skipped {
            let _ = writeln!(out, "Skipped {}: {}", skip.kind, skip.error);
        }
        out
    }

    fn confidence_band(score: f64) -> &'static str {
        if score >= 0.8 {
            "high"
        } else if score >= 0.6 {
            "medium"
        } else if score > 0.0 {
            "low"
        } else {
            "none"
        }
    }

    fn describe_reconciliation(status: ReconciliationStatus) -> &'static str {
        match status {
            ReconciliationStatus::NotRun => "dry-run plan was not requested",
            ReconciliationStatus::Clean => "plan shows imports only",
            ReconciliationStatus::DriftDetected => "plan would modify some resources",
            ReconciliationStatus::PlanFailed => "dry-run plan failed",
        }
    }
}
