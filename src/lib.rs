// Re-export modules for testing and external use
pub mod discovery {
    pub mod fetcher;
    pub mod gcloud;
    pub mod model;
    pub mod normalize;
    pub mod provider;
    pub mod retry;

    // Re-export commonly used items
    pub use fetcher::InventoryFetcher;
    pub use gcloud::GcloudProvider;
    pub use model::{DiscoveredResource, EntryRef, Inventory, ResourceKind, SkipRecord};
    pub use provider::{CloudProvider, ProviderError, ResourcePage};
    pub use retry::RetryPolicy;
}

pub mod classify {
    pub mod classifier;
    pub mod signals;

    pub use classifier::{ClassificationResult, Evidence, Role, RoleClassifier};
    pub use signals::{SignalKind, SignalSet};
}

pub mod model {
    pub mod builder;
    pub mod templates;

    pub use builder::{BuildOutcome, Directive, ModelBuilder, ResourceModelEntry, UnresolvedReason};
    pub use templates::{Template, TemplateId};
}

pub mod generate {
    pub mod artifact;
    pub mod generator;
    pub mod hcl;
    pub mod naming;

    pub use artifact::{persist, persist_merged, GenerationArtifact, ImportDirective};
    pub use generator::{CodeGenerator, GenerationError, GeneratorSettings};
}

pub mod reconcile {
    pub mod engine;
    pub mod gate;
    pub mod plan;

    pub use engine::{EngineError, PlanEngine, TerraformEngine};
    pub use gate::{ReconciliationGate, ReconciliationVerdict};
}

pub mod formatters {
    pub mod output;

    pub use output::OutputFormatter;
}

pub mod shared {
    pub mod logging;
    pub mod security;
}

pub mod core {
    pub mod pipeline;
    pub mod report;
}

pub mod config;

// Re-export commonly used types for easier testing and external use
pub use crate::core::pipeline::{ImportPipeline, PipelineError, RunOutcome};
pub use crate::core::report::{ReportCounts, ResourceStatus, RunReport};
pub use config::Config;
