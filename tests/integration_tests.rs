use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tfdiscover::classify::classifier::Role;
use tfdiscover::classify::signals::SignalKind;
use tfdiscover::config::Config;
use tfdiscover::core::pipeline::{ImportPipeline, PipelineError};
use tfdiscover::core::report::{ReconciliationStatus, ResourceStatus};
use tfdiscover::discovery::model::{DiscoveredResource, ResourceKind};
use tfdiscover::discovery::provider::{CloudProvider, ProviderError, ResourcePage};
use tfdiscover::generate::artifact::{self, GenerationArtifact};
use tfdiscover::generate::generator::GenerationError;
use tfdiscover::model::templates::TemplateId;
use tfdiscover::reconcile::engine::{EngineError, PlanEngine};
use tfdiscover::reconcile::gate::ReconciliationVerdict;

const PROJECT: &str = "acme-prod";

/// In-memory project: fixed resources per kind, optional failures per kind
#[derive(Default)]
struct FakeProvider {
    resources: HashMap<ResourceKind, Vec<DiscoveredResource>>,
    failures: HashMap<ResourceKind, ProviderError>,
    calls: Mutex<HashMap<ResourceKind, usize>>,
}

impl FakeProvider {
    fn with(mut self, resource: DiscoveredResource) -> Self {
        self.resources.entry(resource.kind).or_default().push(resource);
        self
    }

    fn failing(mut self, kind: ResourceKind, error: ProviderError) -> Self {
        self.failures.insert(kind, error);
        self
    }

    fn calls(&self, kind: ResourceKind) -> usize {
        self.calls.lock().unwrap().get(&kind).copied().unwrap_or(0)
    }
}

#[async_trait]
impl CloudProvider for FakeProvider {
    async fn list_page(
        &self,
        _project_id: &str,
        kind: ResourceKind,
        _page_token: Option<&str>,
    ) -> Result<ResourcePage, ProviderError> {
        *self.calls.lock().unwrap().entry(kind).or_default() += 1;
        if let Some(error) = self.failures.get(&kind) {
            return Err(error.clone());
        }
        Ok(ResourcePage::last(
            self.resources.get(&kind).cloned().unwrap_or_default(),
        ))
    }
}

/// Plans every import as a no-op, except addresses listed in `drift`
#[derive(Default)]
struct FakeEngine {
    drift: BTreeSet<String>,
    failures_before_success: usize,
    calls: AtomicUsize,
}

impl FakeEngine {
    fn drifting(address: &str) -> Self {
        Self {
            drift: BTreeSet::from([address.to_string()]),
            ..Default::default()
        }
    }

    fn failing(times: usize) -> Self {
        Self {
            failures_before_success: times,
            ..Default::default()
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlanEngine for FakeEngine {
    async fn plan(&self, artifact: &GenerationArtifact) -> Result<String, EngineError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures_before_success {
            return Err(EngineError::CommandFailed {
                command: "plan".into(),
                stderr: "Error: Failed to query available provider packages".into(),
            });
        }

        let changes: Vec<Value> = artifact
            .imports
            .iter()
            .map(|import| {
                let drifted = self.drift.contains(&import.to);
                json!({
                    "address": import.to,
                    "type": import.to.rsplit('.').nth(1).unwrap_or_default(),
                    "change": {
                        "actions": [if drifted { "update" } else { "no-op" }],
                        "before": {"labels": {"team": "web"}},
                        "after": {"labels": if drifted { json!({}) } else { json!({"team": "web"}) }},
                        "importing": {"id": import.id}
                    }
                })
            })
            .collect();

        Ok(json!({
            "format_version": "1.2",
            "terraform_version": "1.6.0",
            "resource_changes": changes
        })
        .to_string())
    }
}

fn service(name: &str, env_names: &[&str]) -> DiscoveredResource {
    DiscoveredResource::new(PROJECT, ResourceKind::ComputeService, name)
        .with_region(Some("europe-north1".into()))
        .with_attribute("name", name)
        .with_attribute("region", "europe-north1")
        .with_attribute("image", format!("europe-docker.pkg.dev/{}/apps/{}:1", PROJECT, name))
        .with_attribute("env_names", json!(env_names))
}

fn bucket(name: &str) -> DiscoveredResource {
    DiscoveredResource::new(PROJECT, ResourceKind::ObjectStore, name)
        .with_region(Some("EU".into()))
        .with_attribute("name", name)
        .with_attribute("location", "EU")
        .with_attribute("storage_class", "STANDARD")
        .with_attribute("is_terraform_state", false)
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.discovery.max_retries = 2;
    config.discovery.base_delay_ms = 1;
    config
}

fn pipeline(provider: FakeProvider, engine: Option<Arc<FakeEngine>>) -> ImportPipeline {
    let engine = engine.map(|e| e as Arc<dyn PlanEngine>);
    ImportPipeline::new(Arc::new(provider), engine, &test_config()).unwrap()
}

#[tokio::test]
async fn test_backend_service_and_bucket_are_ready() {
    let provider = FakeProvider::default()
        .with(service("svc-a", &["DATABASE_URL", "REDIS_URL"]))
        .with(bucket("bucket-a"));

    let outcome = pipeline(provider, None).run(PROJECT).await.unwrap();

    let classification = &outcome.classifications[0];
    assert_eq!(classification.inferred_role, Role::Backend);
    let evidence: Vec<(&str, SignalKind)> = classification
        .evidence
        .iter()
        .map(|e| (e.variable.as_str(), e.signal))
        .collect();
    assert_eq!(
        evidence,
        vec![
            ("DATABASE_URL", SignalKind::Backend),
            ("REDIS_URL", SignalKind::Backend)
        ]
    );

    assert_eq!(outcome.report.counts.ready, 2);
    assert_eq!(outcome.report.counts.needs_review, 0);
    let templates: Vec<_> = outcome
        .build
        .ready
        .iter()
        .map(|e| e.selected_template)
        .collect();
    assert!(templates.contains(&Some(TemplateId::CloudRunBackend)));
    assert!(templates.contains(&Some(TemplateId::StorageBucket)));

    let ids: Vec<&str> = outcome.artifact.imports.iter().map(|i| i.id.as_str()).collect();
    assert_eq!(
        ids,
        vec![
            "acme-prod/bucket-a",
            "locations/europe-north1/namespaces/acme-prod/services/svc-a"
        ]
    );
    assert_eq!(outcome.report.reconciliation, ReconciliationStatus::NotRun);
    assert_eq!(outcome.artifact, outcome.apply_artifact);
}

#[tokio::test]
async fn test_frontend_service_uses_frontend_module() {
    let provider = FakeProvider::default().with(service("web", &["VITE_API_URL", "PORT"]));
    let outcome = pipeline(provider, None).run(PROJECT).await.unwrap();

    assert_eq!(outcome.classifications[0].inferred_role, Role::Frontend);
    assert_eq!(
        outcome.build.ready[0].selected_template,
        Some(TemplateId::CloudRunFrontend)
    );
    let files = outcome.artifact.files();
    assert!(files["cloud-run.tf"].contains("source = \"../.terraform-modules/cloud-run-frontend\""));
}

#[tokio::test]
async fn test_unknown_service_goes_to_review_without_blocking_others() {
    let provider = FakeProvider::default()
        .with(service("worker", &["PORT", "LOG_LEVEL"]))
        .with(bucket("bucket-a"));

    let outcome = pipeline(provider, None).run(PROJECT).await.unwrap();

    assert_eq!(outcome.report.counts.ready, 1);
    assert_eq!(outcome.report.counts.needs_review, 1);
    let review = outcome
        .report
        .with_status(ResourceStatus::NeedsReview)
        .next()
        .unwrap();
    assert_eq!(review.identifier, "worker");
    assert_eq!(review.role, Some(Role::Unknown));

    assert_eq!(outcome.artifact.imports.len(), 1);
    assert!(!outcome.artifact.files().contains_key("cloud-run.tf"));
}

#[tokio::test]
async fn test_role_override_resolves_unknown_service() {
    let provider = FakeProvider::default().with(service("worker", &["PORT"]));
    let mut config = test_config();
    config
        .generation
        .role_overrides
        .insert("worker".into(), Role::Backend);

    let outcome = ImportPipeline::new(Arc::new(provider), None, &config)
        .unwrap()
        .run(PROJECT)
        .await
        .unwrap();

    assert_eq!(outcome.report.counts.ready, 1);
    assert_eq!(
        outcome.build.ready[0].selected_template,
        Some(TemplateId::CloudRunBackend)
    );
}

#[tokio::test]
async fn test_name_collision_aborts_and_writes_nothing() {
    let provider = FakeProvider::default()
        .with(bucket("assets-eu"))
        .with(bucket("assets.eu"));
    let out = tempfile::tempdir().unwrap();

    let result = pipeline(provider, None).run(PROJECT).await;
    match &result {
        Err(PipelineError::Generation {
            source: GenerationError::Collision { name, .. },
            report,
        }) => {
            assert_eq!(name, "module.bucket_assets_eu");
            assert_eq!(report.counts.ready, 2);
            assert_eq!(report.reconciliation, ReconciliationStatus::NotRun);
            assert!(report.aborted.as_deref().unwrap().contains("module.bucket_assets_eu"));
        }
        other => panic!("expected collision, got {:?}", other.as_ref().err()),
    }
    if let Ok(outcome) = result {
        artifact::persist(&outcome.apply_artifact, out.path()).await.unwrap();
    }
    assert_eq!(std::fs::read_dir(out.path()).unwrap().count(), 0);
}

#[tokio::test]
async fn test_second_run_is_clean_and_identical() {
    let engine = Arc::new(FakeEngine::default());
    let provider = FakeProvider::default()
        .with(bucket("bucket-b"))
        .with(service("svc-a", &["DATABASE_URL"]))
        .with(bucket("bucket-a"));
    let pipeline = pipeline(provider, Some(engine.clone()));

    let first = pipeline.run(PROJECT).await.unwrap();
    let second = pipeline.run(PROJECT).await.unwrap();

    assert_eq!(second.verdict, Some(ReconciliationVerdict::Clean { imports: 3 }));
    assert_eq!(second.report.counts.drift_detected, 0);
    assert_eq!(first.artifact.files(), second.artifact.files());
    assert_eq!(engine.calls(), 2);
}

#[tokio::test]
async fn test_drifted_resource_is_withheld_from_apply() {
    let engine = Arc::new(FakeEngine::drifting(
        "module.bucket_bucket_a.google_storage_bucket.bucket",
    ));
    let provider = FakeProvider::default()
        .with(service("svc-a", &["DATABASE_URL"]))
        .with(bucket("bucket-a"));

    let outcome = pipeline(provider, Some(engine)).run(PROJECT).await.unwrap();

    assert_eq!(outcome.report.reconciliation, ReconciliationStatus::DriftDetected);
    assert_eq!(outcome.report.counts.ready, 1);
    assert_eq!(outcome.report.counts.drift_detected, 1);
    let drifted = outcome
        .report
        .with_status(ResourceStatus::DriftDetected)
        .next()
        .unwrap();
    assert_eq!(drifted.identifier, "bucket-a");
    assert!(drifted.reason.as_deref().unwrap().contains("labels"));

    assert_eq!(outcome.artifact.imports.len(), 2);
    assert_eq!(outcome.apply_artifact.imports.len(), 1);
    let files = outcome.apply_artifact.files();
    assert!(!files.contains_key("storage.tf"));
    assert!(files["imports.tf"].contains("svc-a"));
    assert!(!files["imports.tf"].contains("bucket-a"));
}

#[tokio::test]
async fn test_plan_failure_is_retried_once() {
    let engine = Arc::new(FakeEngine::failing(1));
    let provider = FakeProvider::default().with(bucket("bucket-a"));

    let outcome = pipeline(provider, Some(engine.clone())).run(PROJECT).await.unwrap();

    assert_eq!(engine.calls(), 2);
    assert_eq!(outcome.report.reconciliation, ReconciliationStatus::Clean);
}

#[tokio::test]
async fn test_plan_failure_after_retry_is_fatal() {
    let engine = Arc::new(FakeEngine::failing(usize::MAX));
    let provider = FakeProvider::default().with(bucket("bucket-a"));

    let err = pipeline(provider, Some(engine.clone()))
        .run(PROJECT)
        .await
        .unwrap_err();

    let report = err.report().cloned().unwrap();
    match err {
        PipelineError::PlanFailed {
            message, attempts, ..
        } => {
            assert_eq!(attempts, 2);
            assert!(message.contains("Failed to query available provider packages"));
        }
        other => panic!("expected plan failure, got {other}"),
    }
    assert_eq!(engine.calls(), 2);

    // What was discovered is still reported
    assert_eq!(report.reconciliation, ReconciliationStatus::PlanFailed);
    assert_eq!(report.counts.ready, 1);
    assert_eq!(report.resources[0].identifier, "bucket-a");
    assert!(report
        .aborted
        .as_deref()
        .unwrap()
        .contains("Failed to query available provider packages"));
}

#[tokio::test]
async fn test_empty_project_skips_the_plan() {
    let engine = Arc::new(FakeEngine::default());
    let outcome = pipeline(FakeProvider::default(), Some(engine.clone()))
        .run(PROJECT)
        .await
        .unwrap();

    assert_eq!(engine.calls(), 0);
    assert_eq!(outcome.verdict, Some(ReconciliationVerdict::Clean { imports: 0 }));
    assert_eq!(outcome.report.counts.ready, 0);
}

#[tokio::test]
async fn test_rate_limited_kind_is_skipped() {
    let provider = Arc::new(
        FakeProvider::default()
            .with(bucket("bucket-a"))
            .failing(
                ResourceKind::ManagedDatabase,
                ProviderError::RateLimited("Quota exceeded".into()),
            ),
    );

    let outcome = ImportPipeline::new(provider.clone(), None, &test_config())
        .unwrap()
        .run(PROJECT)
        .await
        .unwrap();

    assert_eq!(outcome.report.counts.skipped, 1);
    assert_eq!(outcome.report.counts.ready, 1);
    let skip = &outcome.report.skipped_kinds[0];
    assert_eq!(skip.kind, ResourceKind::ManagedDatabase);
    assert_eq!(skip.attempts, 3);
    assert_eq!(provider.calls(ResourceKind::ManagedDatabase), 3);
    assert_eq!(provider.calls(ResourceKind::ObjectStore), 1);
}

#[tokio::test]
async fn test_kind_allowlist_limits_discovery() {
    let provider = Arc::new(
        FakeProvider::default()
            .with(bucket("bucket-a"))
            .with(service("svc-a", &["DATABASE_URL"])),
    );

    let pipeline = ImportPipeline::new(provider.clone(), None, &test_config())
        .unwrap()
        .with_kinds(&[ResourceKind::ObjectStore]);
    let (inventory, classifications) = pipeline.discover(PROJECT).await;

    assert_eq!(inventory.resources.len(), 1);
    assert!(classifications.is_empty());
    assert_eq!(provider.calls(ResourceKind::ComputeService), 0);
}

#[tokio::test]
async fn test_persisted_files() {
    let provider = FakeProvider::default()
        .with(service("svc-a", &["DATABASE_URL"]))
        .with(bucket("bucket-a"));
    let outcome = pipeline(provider, None).run(PROJECT).await.unwrap();

    let out = tempfile::tempdir().unwrap();
    let written = artifact::persist(&outcome.apply_artifact, out.path())
        .await
        .unwrap();
    let names: BTreeSet<String> = written
        .iter()
        .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
        .collect();
    for expected in [
        "backend.tf",
        "variables.tf",
        "main.tf",
        "cloud-run.tf",
        "storage.tf",
        "outputs.tf",
        "imports.tf",
    ] {
        assert!(names.contains(expected), "missing {}", expected);
    }

    let imports = std::fs::read_to_string(out.path().join("imports.tf")).unwrap();
    assert!(imports.contains("to = module.bucket_bucket_a.google_storage_bucket.bucket"));
    assert!(imports.contains("id = \"acme-prod/bucket-a\""));
}

#[tokio::test]
async fn test_new_resources_are_appended_to_an_existing_directory() {
    let out = tempfile::tempdir().unwrap();
    let first = pipeline(FakeProvider::default().with(bucket("bucket-a")), None)
        .run(PROJECT)
        .await
        .unwrap();
    artifact::persist(&first.apply_artifact, out.path()).await.unwrap();
    let main_before = std::fs::read_to_string(out.path().join("main.tf")).unwrap();

    let provider = FakeProvider::default()
        .with(bucket("bucket-a"))
        .with(service("svc-a", &["DATABASE_URL"]));
    let second = pipeline(provider, None).run(PROJECT).await.unwrap();
    artifact::persist_merged(&second.apply_artifact, out.path())
        .await
        .unwrap();

    let storage = std::fs::read_to_string(out.path().join("storage.tf")).unwrap();
    assert_eq!(storage.matches("module \"bucket_bucket_a\"").count(), 1);
    assert!(out.path().join("cloud-run.tf").exists());

    let imports = std::fs::read_to_string(out.path().join("imports.tf")).unwrap();
    assert_eq!(imports.matches("to = module.bucket_bucket_a.").count(), 1);
    assert_eq!(imports.matches("to = module.run_svc_a.").count(), 1);
    assert_eq!(
        std::fs::read_to_string(out.path().join("main.tf")).unwrap(),
        main_before
    );
}

#[tokio::test]
async fn test_invalid_signal_pattern_is_a_config_error() {
    let mut config = test_config();
    config.classifier.backend_signals.push("(".into());
    let result = ImportPipeline::new(Arc::new(FakeProvider::default()), None, &config);
    assert!(matches!(result, Err(PipelineError::Config(_))));
}
