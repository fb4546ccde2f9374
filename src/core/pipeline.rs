use crate::classify::classifier::{ClassificationResult, RoleClassifier};
use crate::classify::signals::SignalSet;
use crate::config::{Config, ConfigError, GenerationConfig};
use crate::core::report::RunReport;
use crate::discovery::fetcher::InventoryFetcher;
use crate::discovery::gcloud::GcloudProvider;
use crate::discovery::model::{Inventory, ResourceKind};
use crate::discovery::provider::{CloudProvider, ProviderError};
use crate::generate::artifact::GenerationArtifact;
use crate::generate::generator::{CodeGenerator, GenerationError, GeneratorSettings};
use crate::model::builder::{BuildOutcome, ModelBuilder};
use crate::reconcile::engine::{EngineError, PlanEngine, TerraformEngine};
use crate::reconcile::gate::{ReconciliationGate, ReconciliationVerdict};
use crate::shared::security::CommandGuard;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::info;

/// Failures that abort the whole run. Everything else is reported per
/// resource in the `RunReport`.
///
/// Aborts that happen after discovery carry the report built so far, so the
/// operator still sees what was found and why nothing was written.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Generation aborted: {source}")]
    Generation {
        source: GenerationError,
        report: Box<RunReport>,
    },

    #[error("Dry-run plan failed after {attempts} attempt(s): {message}")]
    PlanFailed {
        message: String,
        attempts: u32,
        report: Box<RunReport>,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Cloud provider unavailable: {0}")]
    Provider(#[from] ProviderError),

    #[error("Terraform unavailable: {0}")]
    Engine(#[from] EngineError),
}

impl PipelineError {
    /// Partial report of an aborted run, when discovery completed
    pub fn report(&self) -> Option<&RunReport> {
        match self {
            PipelineError::Generation { report, .. } | PipelineError::PlanFailed { report, .. } => {
                Some(&**report)
            }
            _ => None,
        }
    }
}

/// Everything one run produced
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub inventory: Inventory,
    pub classifications: Vec<ClassificationResult>,
    pub build: BuildOutcome,
    /// Artifact covering every ready entry
    pub artifact: GenerationArtifact,
    /// Artifact handed to apply, without drifted entries
    pub apply_artifact: GenerationArtifact,
    pub verdict: Option<ReconciliationVerdict>,
    pub report: RunReport,
}

/// Fetcher → classifier → model builder → generator → reconciliation gate
pub struct ImportPipeline {
    fetcher: InventoryFetcher,
    classifier: RoleClassifier,
    builder: ModelBuilder,
    generation: GenerationConfig,
    gate: Option<ReconciliationGate>,
}

impl ImportPipeline {
    /// Wire the pipeline from explicit collaborators; no gate without an engine
    pub fn new(
        provider: Arc<dyn CloudProvider>,
        engine: Option<Arc<dyn PlanEngine>>,
        config: &Config,
    ) -> Result<Self, PipelineError> {
        let signals = SignalSet::from_config(&config.classifier)?;
        let fetcher = InventoryFetcher::new(provider, config.discovery.retry_policy())
            .with_kinds(&config.discovery.kinds);

        Ok(Self {
            fetcher,
            classifier: RoleClassifier::new(signals),
            builder: ModelBuilder::new(config.generation.role_overrides.clone()),
            generation: config.generation.clone(),
            gate: engine.map(|engine| ReconciliationGate::new(engine, config.terraform.plan_attempts)),
        })
    }

    /// Wire the pipeline against gcloud and, when reconciling, terraform.
    ///
    /// `out_dir` is where files will be persisted; the dry-run plan runs in a
    /// sibling directory so relative module sources resolve identically.
    pub fn from_config(
        config: &Config,
        out_dir: Option<&Path>,
        reconcile: bool,
    ) -> Result<Self, PipelineError> {
        let guard = CommandGuard::from_env();

        let gcloud_path = GcloudProvider::locate(config.discovery.gcloud_path.as_deref())?;
        let provider: Arc<dyn CloudProvider> = Arc::new(GcloudProvider::new(
            gcloud_path,
            config.discovery.command_timeout(),
            config.discovery.regions.clone(),
            guard.clone(),
        ));

        let engine: Option<Arc<dyn PlanEngine>> = if reconcile {
            let terraform_path = TerraformEngine::locate(config.terraform.executable_path.as_deref())?;
            let scratch_parent = out_dir.map(TerraformEngine::scratch_parent_for).transpose()?;
            Some(Arc::new(TerraformEngine::new(terraform_path, scratch_parent, guard)))
        } else {
            None
        };

        Self::new(provider, engine, config)
    }

    pub fn kinds(&self) -> &[ResourceKind] {
        self.fetcher.kinds()
    }

    /// Restrict this run to a subset of kinds
    pub fn with_kinds(mut self, kinds: &[ResourceKind]) -> Self {
        self.fetcher = self.fetcher.with_kinds(kinds);
        self
    }

    /// Discovery and classification only
    pub async fn discover(&self, project_id: &str) -> (Inventory, Vec<ClassificationResult>) {
        let inventory = self.fetcher.fetch(project_id).await;
        let classifications = self.classifier.classify_all(&inventory.resources);
        (inventory, classifications)
    }

    pub async fn run(&self, project_id: &str) -> Result<RunOutcome, PipelineError> {
        let start_time = Instant::now();
        let (inventory, classifications) = self.discover(project_id).await;

        let build = self.builder.build(&inventory.resources, &classifications);
        info!(
            "Model built: {} ready, {} need review",
            build.ready.len(),
            build.needs_review.len()
        );

        let generator = CodeGenerator::new(GeneratorSettings::from_config(
            &self.generation,
            project_id,
        ));
        let artifact = match generator.generate(&build.ready) {
            Ok(artifact) => artifact,
            Err(source) => {
                let report = RunReport::build(&inventory, &classifications, &build, None)
                    .aborted(source.to_string());
                return Err(PipelineError::Generation {
                    source,
                    report: Box::new(report),
                });
            }
        };

        let verdict = match &self.gate {
            Some(gate) => Some(gate.reconcile(&artifact).await),
            None => None,
        };

        if let Some(ReconciliationVerdict::PlanFailed { message, attempts }) = &verdict {
            let report = RunReport::build(&inventory, &classifications, &build, verdict.as_ref())
                .aborted(format!("dry-run plan failed after {} attempt(s): {}", attempts, message));
            return Err(PipelineError::PlanFailed {
                message: message.clone(),
                attempts: *attempts,
                report: Box::new(report),
            });
        }

        let apply_artifact = match &verdict {
            Some(verdict) => artifact.excluding(&verdict.drifted_origins()),
            None => artifact.clone(),
        };

        let report = RunReport::build(&inventory, &classifications, &build, verdict.as_ref());
        info!(
            "Run completed in {:?}: {} ready, {} need review, {} drifted, {} kinds skipped",
            start_time.elapsed(),
            report.counts.ready,
            report.counts.needs_review,
            report.counts.drift_detected,
            report.counts.skipped
        );

        Ok(RunOutcome {
            inventory,
            classifications,
            build,
            artifact,
            apply_artifact,
            verdict,
            report,
        })
    }
}
