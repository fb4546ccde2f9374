use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use thiserror::Error;

/// gcloud verbs that change project state
const MUTATING_VERBS: &[&str] = &[
    "create",
    "delete",
    "update",
    "patch",
    "deploy",
    "enable",
    "disable",
    "move",
    "set-iam-policy",
    "add-iam-policy-binding",
    "remove-iam-policy-binding",
];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PolicyViolation {
    #[error("'{program}' is not an allowed program")]
    UnknownProgram { program: String },

    #[error("'{program} {command}' is not read-only and is not allowed")]
    MutatingCommand { program: String, command: String },
}

/// Allowlist of external commands.
///
/// Discovery and reconciliation only ever read the cloud project, so every
/// external invocation goes through this guard before it is spawned.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandPolicy {
    /// Verbs accepted for gcloud (e.g. `services list`)
    pub gcloud_verbs: Vec<String>,
    /// Subcommands accepted for terraform
    pub terraform_commands: Vec<String>,
    /// Audit log configuration
    pub audit_log: Option<PathBuf>,
}

impl Default for CommandPolicy {
    fn default() -> Self {
        Self {
            gcloud_verbs: vec!["list".to_string(), "describe".to_string()],
            terraform_commands: vec![
                "version".to_string(),
                "init".to_string(),
                "validate".to_string(),
                "plan".to_string(),
                "show".to_string(),
            ],
            audit_log: None,
        }
    }
}

/// Audit log entry
#[derive(Debug, Serialize, Deserialize)]
pub struct AuditLogEntry {
    pub timestamp: DateTime<Utc>,
    pub program: String,
    pub args: Vec<String>,
    pub allowed: bool,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct CommandGuard {
    pub policy: CommandPolicy,
}

impl CommandGuard {
    pub fn new(policy: CommandPolicy) -> Self {
        Self { policy }
    }

    /// Default policy with the audit log taken from `TFDISCOVER_AUDIT_LOG`
    pub fn from_env() -> Self {
        let mut policy = CommandPolicy::default();
        if let Ok(path) = env::var("TFDISCOVER_AUDIT_LOG") {
            if !path.trim().is_empty() {
                policy.audit_log = Some(PathBuf::from(path));
            }
        }
        Self { policy }
    }

    /// Check a command line before it is executed.
    ///
    /// `program` is matched on its file name so absolute binary paths work.
    pub fn check(&self, program: &str, args: &[String]) -> Result<(), PolicyViolation> {
        let result = self.evaluate(program, args);
        self.audit(program, args, &result);
        result
    }

    fn evaluate(&self, program: &str, args: &[String]) -> Result<(), PolicyViolation> {
        let name = program_name(program);
        // Positional arguments only; flags like --project=x are not verbs
        let positional: Vec<&str> = args
            .iter()
            .map(String::as_str)
            .filter(|a| !a.starts_with('-'))
            .collect();

        match name.as_str() {
            "gcloud" => {
                let read_only = positional
                    .iter()
                    .any(|arg| self.policy.gcloud_verbs.iter().any(|v| v == arg));
                let mutating = positional.iter().any(|arg| MUTATING_VERBS.contains(arg));
                if read_only && !mutating {
                    Ok(())
                } else {
                    Err(PolicyViolation::MutatingCommand {
                        program: name,
                        command: positional.join(" "),
                    })
                }
            }
            "terraform" | "tofu" => {
                let command = positional.first().copied().unwrap_or_default();
                if self.policy.terraform_commands.iter().any(|c| c == command) {
                    Ok(())
                } else {
                    Err(PolicyViolation::MutatingCommand {
                        program: name,
                        command: command.to_string(),
                    })
                }
            }
            _ => Err(PolicyViolation::UnknownProgram { program: name }),
        }
    }

    fn audit(&self, program: &str, args: &[String], result: &Result<(), PolicyViolation>) {
        let Some(path) = &self.policy.audit_log else {
            return;
        };

        let entry = AuditLogEntry {
            timestamp: Utc::now(),
            program: program_name(program),
            args: args.to_vec(),
            allowed: result.is_ok(),
            reason: result.as_ref().err().map(|e| e.to_string()),
        };

        let written = serde_json::to_string(&entry)
            .map_err(std::io::Error::from)
            .and_then(|line| {
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let mut file = OpenOptions::new().create(true).append(true).open(path)?;
                writeln!(file, "{}", line)
            });

        if let Err(e) = written {
            tracing::warn!("Failed to write audit log {}: {}", path.display(), e);
        }
    }
}

fn program_name(program: &str) -> String {
    std::path::Path::new(program)
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| program.to_string())
}
