use crate::config::GenerationConfig;
use crate::discovery::model::EntryRef;
use crate::generate::artifact::{GenerationArtifact, ImportDirective, RenderedBlock};
use crate::generate::hcl::{self, Block};
use crate::model::builder::{Binding, ResourceModelEntry};
use crate::model::templates::{Render, Template, TemplateForm};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::{debug, info};

pub const REQUIRED_TERRAFORM_VERSION: &str = ">= 1.5.0";
pub const GOOGLE_PROVIDER_VERSION: &str = "~> 5.0";

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GenerationError {
    #[error("Generated name '{name}' is produced by both {first} and {second}")]
    Collision {
        name: String,
        first: EntryRef,
        second: EntryRef,
    },

    #[error("Entry {0} is marked ready but has no template")]
    MissingTemplate(EntryRef),
}

/// Project-level values for the scaffold files
#[derive(Debug, Clone, PartialEq)]
pub struct GeneratorSettings {
    pub project_id: String,
    pub modules_source: String,
    pub default_region: String,
    pub client: Option<String>,
    pub project: Option<String>,
    pub state_bucket: Option<String>,
    pub state_prefix: Option<String>,
}

impl GeneratorSettings {
    pub fn from_config(config: &GenerationConfig, project_id: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            modules_source: config.modules_source.trim_end_matches('/').to_string(),
            default_region: config.default_region.clone(),
            client: config.client.clone(),
            project: config.project.clone(),
            state_bucket: config.state_bucket.clone(),
            state_prefix: config.state_prefix.clone(),
        }
    }
}

/// Renders ready entries into Terraform configuration and import directives.
///
/// Pure: writes nothing and calls nothing external. A single pass over the
/// whole batch so that generated names can be checked globally.
#[derive(Debug, Clone)]
pub struct CodeGenerator {
    settings: GeneratorSettings,
}

impl CodeGenerator {
    pub fn new(settings: GeneratorSettings) -> Self {
        Self { settings }
    }

    pub fn generate(
        &self,
        entries: &[ResourceModelEntry],
    ) -> Result<GenerationArtifact, GenerationError> {
        let mut ready: Vec<(&ResourceModelEntry, &Binding, &'static Template)> = Vec::new();
        for entry in entries {
            let Some(binding) = entry.binding() else {
                debug!("Skipping unresolved entry {}", entry.entry_ref());
                continue;
            };
            let template = entry
                .selected_template
                .ok_or_else(|| GenerationError::MissingTemplate(entry.entry_ref()))?
                .template();
            ready.push((entry, binding, template));
        }

        ready.sort_by(|a, b| {
            a.1.import_target
                .cmp(&b.1.import_target)
                .then_with(|| a.0.entry_ref().cmp(&b.0.entry_ref()))
        });

        check_collisions(&ready)?;

        let mut blocks = self.scaffold();
        let mut imports = Vec::with_capacity(ready.len());

        for (entry, binding, template) in &ready {
            let origin = entry.entry_ref();
            blocks.push(RenderedBlock {
                origin: Some(origin.clone()),
                file: template.file.to_string(),
                text: self.render_entry(entry, binding, template),
            });
            for output in template.outputs {
                let name = format!("{}_{}", binding.instance_name, output.suffix);
                let mut block = Block::new(format!("output {}", hcl::quote(&name)))
                    .value(
                        "description",
                        &json!(format!("{} {}", output.description, entry.source.identifier)),
                    )
                    .raw(
                        "value",
                        format!("module.{}.{}", binding.instance_name, output.module_output),
                    );
                if output.sensitive {
                    block = block.raw("sensitive", "true");
                }
                blocks.push(RenderedBlock {
                    origin: Some(origin.clone()),
                    file: "outputs.tf".to_string(),
                    text: block.render(),
                });
            }
            imports.push(ImportDirective {
                origin,
                to: binding.import_target.address.clone(),
                id: binding.import_target.id.clone(),
            });
        }

        info!(
            "Generated {} blocks and {} import directives",
            blocks.len(),
            imports.len()
        );
        Ok(GenerationArtifact::new(blocks, imports))
    }

    fn render_entry(
        &self,
        entry: &ResourceModelEntry,
        binding: &Binding,
        template: &Template,
    ) -> String {
        let header = match template.form {
            TemplateForm::Module { .. } => format!("module {}", hcl::quote(&binding.instance_name)),
            TemplateForm::Resource => format!(
                "resource {} {}",
                hcl::quote(template.resource_type),
                hcl::quote(&binding.instance_name)
            ),
        };

        let mut block = Block::new(header);
        if let TemplateForm::Module { source_dir, .. } = template.form {
            block = block
                .value(
                    "source",
                    &json!(format!("{}/{}", self.settings.modules_source, source_dir)),
                )
                .blank();
        }
        for (name, expression) in template.fixed_arguments {
            block = block.raw(name, *expression);
        }

        for input in template.inputs {
            let Some(value) = binding.variables.get(input.name) else {
                continue;
            };
            block = match input.render {
                Render::Argument if value.is_object() => block.blank().value(input.name, value),
                Render::Argument => block.value(input.name, value),
                Render::Hidden => block,
                Render::ReplicationBlock => block.block(replication_block(value, binding)),
            };
        }

        let comment = match entry.role {
            Some(role) => format!("# {} ({})\n", entry.source.identifier, role),
            None => format!("# {}\n", entry.source.identifier),
        };
        format!("{}{}", comment, block.render())
    }

    fn scaffold(&self) -> Vec<RenderedBlock> {
        let settings = &self.settings;

        let mut terraform = Block::new("terraform")
            .value("required_version", &json!(REQUIRED_TERRAFORM_VERSION))
            .blank()
            .block(Block::new("required_providers").value(
                "google",
                &json!({"source": "hashicorp/google", "version": GOOGLE_PROVIDER_VERSION}),
            ));
        if let Some(bucket) = &settings.state_bucket {
            let prefix = settings
                .state_prefix
                .clone()
                .unwrap_or_else(|| settings.project_id.clone());
            terraform = terraform.block(
                Block::new("backend \"gcs\"")
                    .value("bucket", &json!(bucket))
                    .value("prefix", &json!(prefix)),
            );
        }

        let variables = [
            ("project_id", "GCP project ID", &settings.project_id),
            ("region", "Default GCP region", &settings.default_region),
        ]
        .iter()
        .map(|(name, description, default)| {
            Block::new(format!("variable {}", hcl::quote(name)))
                .value("description", &json!(description))
                .raw("type", "string")
                .value("default", &json!(default))
                .render()
        })
        .collect::<Vec<_>>()
        .join("\n");

        let title = match (&settings.client, &settings.project) {
            (Some(client), Some(project)) => format!("# {} / {}\n", client, project),
            (Some(name), None) | (None, Some(name)) => format!("# {}\n", name),
            (None, None) => format!("# {}\n", settings.project_id),
        };
        let main = format!(
            "{}# Generated by tfdiscover\n\n{}",
            title,
            Block::new("provider \"google\"")
                .raw("project", "var.project_id")
                .raw("region", "var.region")
                .render()
        );

        vec![
            RenderedBlock {
                origin: None,
                file: "backend.tf".to_string(),
                text: terraform.render(),
            },
            RenderedBlock {
                origin: None,
                file: "variables.tf".to_string(),
                text: variables,
            },
            RenderedBlock {
                origin: None,
                file: "main.tf".to_string(),
                text: main,
            },
        ]
    }
}

/// Secret Manager replication matching the live policy
fn replication_block(policy: &Value, binding: &Binding) -> Block {
    match policy.as_str() {
        Some("user_managed") => {
            let mut replicas = Block::new("user_managed");
            let locations = binding
                .variables
                .get("replica_locations")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for location in &locations {
                replicas = replicas.block(Block::new("replicas").value("location", location));
            }
            Block::new("replication").block(replicas)
        }
        _ => Block::new("replication").block(Block::new("auto")),
    }
}

/// Every block key and import address must belong to exactly one entry
fn check_collisions(
    ready: &[(&ResourceModelEntry, &Binding, &'static Template)],
) -> Result<(), GenerationError> {
    let mut block_keys: BTreeMap<String, EntryRef> = BTreeMap::new();
    let mut addresses: BTreeMap<String, EntryRef> = BTreeMap::new();

    for (entry, binding, template) in ready {
        let origin = entry.entry_ref();
        let key = template.block_key(&binding.instance_name);
        for (name, seen) in [
            (key, &mut block_keys),
            (binding.import_target.address.clone(), &mut addresses),
        ] {
            if let Some(first) = seen.get(&name) {
                return Err(GenerationError::Collision {
                    name,
                    first: first.clone(),
                    second: origin,
                });
            }
            seen.insert(name, origin.clone());
        }
    }
    Ok(())
}
