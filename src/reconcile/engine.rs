use crate::generate::artifact::{self, GenerationArtifact};
use crate::shared::security::CommandGuard;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};

const PLAN_FILE: &str = "tfdiscover.tfplan";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Terraform binary not found: {0}")]
    BinaryNotFound(String),

    #[error("terraform {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },

    #[error("Invalid plan output: {0}")]
    InvalidPlan(String),

    #[error("Command blocked by policy: {0}")]
    Blocked(String),

    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Io(e.to_string())
    }
}

/// Dry-run collaborator: turns an artifact into machine-readable plan output
#[async_trait]
pub trait PlanEngine: Send + Sync {
    async fn plan(&self, artifact: &GenerationArtifact) -> Result<String, EngineError>;
}

/// Runs `terraform init`, `plan` and `show -json` in a scratch directory.
///
/// The scratch directory is created next to the output directory so that
/// relative module sources resolve the same way they will after persisting.
pub struct TerraformEngine {
    terraform_path: PathBuf,
    scratch_parent: Option<PathBuf>,
    guard: CommandGuard,
}

impl TerraformEngine {
    pub fn new(terraform_path: PathBuf, scratch_parent: Option<PathBuf>, guard: CommandGuard) -> Self {
        debug!(
            "TerraformEngine initialized with terraform path: {}",
            terraform_path.display()
        );
        Self {
            terraform_path,
            scratch_parent,
            guard,
        }
    }

    /// Resolve terraform (or tofu) from configuration or PATH
    pub fn locate(configured: Option<&str>) -> Result<PathBuf, EngineError> {
        if let Some(path) = configured {
            let path = PathBuf::from(path);
            return if path.exists() {
                Ok(path)
            } else {
                Err(EngineError::BinaryNotFound(path.display().to_string()))
            };
        }
        which::which("terraform")
            .or_else(|_| which::which("tofu"))
            .map_err(|_| EngineError::BinaryNotFound("terraform not found in PATH".to_string()))
    }

    /// Parent for the scratch directory of a run persisting to `out_dir`.
    ///
    /// A relative `out_dir` is resolved against the working directory first,
    /// so `terraform` plans next to `./terraform` and not in the system temp
    /// dir, where `../` module sources would not resolve.
    pub fn scratch_parent_for(out_dir: &Path) -> Result<PathBuf, EngineError> {
        let out_dir = if out_dir.is_absolute() {
            out_dir.to_path_buf()
        } else {
            std::env::current_dir()?.join(out_dir)
        };
        let parent = out_dir.parent().map(Path::to_path_buf);
        Ok(parent.unwrap_or(out_dir))
    }

    async fn run(&self, dir: &Path, args: &[&str]) -> Result<String, EngineError> {
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        let program = self.terraform_path.to_string_lossy().to_string();
        self.guard
            .check(&program, &args)
            .map_err(|e| EngineError::Blocked(e.to_string()))?;

        debug!("Running terraform {} in {}", args.join(" "), dir.display());
        let output = Command::new(&self.terraform_path)
            .args(&args)
            .current_dir(dir)
            .env("TF_IN_AUTOMATION", "1")
            .kill_on_drop(true)
            .output()
            .await?;

        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).to_string())
        } else {
            Err(EngineError::CommandFailed {
                command: args.first().cloned().unwrap_or_default(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[async_trait]
impl PlanEngine for TerraformEngine {
    async fn plan(&self, artifact: &GenerationArtifact) -> Result<String, EngineError> {
        let scratch = match &self.scratch_parent {
            Some(parent) => {
                tokio::fs::create_dir_all(parent).await?;
                tempfile::Builder::new()
                    .prefix(".tfdiscover-plan-")
                    .tempdir_in(parent)?
            }
            None => tempfile::Builder::new().prefix("tfdiscover-plan-").tempdir()?,
        };
        let dir = scratch.path();

        artifact::persist(artifact, dir).await?;
        info!("Running dry-run plan in {}", dir.display());

        self.run(dir, &["init", "-input=false", "-no-color"]).await?;
        let plan_out = format!("-out={}", PLAN_FILE);
        self.run(
            dir,
            &["plan", "-input=false", "-no-color", "-lock=false", &plan_out],
        )
        .await?;
        self.run(dir, &["show", "-json", "-no-color", PLAN_FILE]).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_configured_binary() {
        let err = TerraformEngine::locate(Some("/nonexistent/terraform")).unwrap_err();
        assert!(matches!(err, EngineError::BinaryNotFound(_)));
    }

    #[test]
    fn test_scratch_parent_for_relative_out_dir() {
        let cwd = std::env::current_dir().unwrap();
        assert_eq!(TerraformEngine::scratch_parent_for(Path::new("terraform")).unwrap(), cwd);
        assert_eq!(
            TerraformEngine::scratch_parent_for(Path::new("infra/terraform")).unwrap(),
            cwd.join("infra")
        );
        assert_eq!(
            TerraformEngine::scratch_parent_for(Path::new("/srv/acme/terraform")).unwrap(),
            PathBuf::from("/srv/acme")
        );
    }

    #[test]
    fn test_engine_commands_pass_the_guard() {
        let guard = CommandGuard::default();
        let args = |list: &[&str]| list.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert!(guard
            .check("terraform", &args(&["init", "-input=false", "-no-color"]))
            .is_ok());
        assert!(guard
            .check("terraform", &args(&["plan", "-input=false", "-out=tfdiscover.tfplan"]))
            .is_ok());
        assert!(guard
            .check("terraform", &args(&["show", "-json", PLAN_FILE]))
            .is_ok());
    }
}
