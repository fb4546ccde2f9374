//! Fixed catalog of infrastructure templates and the `(kind, role)` dispatch table.

use crate::classify::classifier::Role;
use crate::discovery::model::ResourceKind;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt::Display;

static PLACEHOLDER_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{([a-z_]+)\}").expect("Invalid placeholder regex"));

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateId {
    CloudRunFrontend,
    CloudRunBackend,
    CloudRunFullstack,
    CloudSqlInstance,
    StorageBucket,
    SecretManagerSecret,
    ServiceAccount,
    VpcAccessConnector,
    ProjectService,
}

impl Display for TemplateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            TemplateId::CloudRunFrontend => "cloud_run_frontend",
            TemplateId::CloudRunBackend => "cloud_run_backend",
            TemplateId::CloudRunFullstack => "cloud_run_fullstack",
            TemplateId::CloudSqlInstance => "cloud_sql_instance",
            TemplateId::StorageBucket => "storage_bucket",
            TemplateId::SecretManagerSecret => "secret_manager_secret",
            TemplateId::ServiceAccount => "service_account",
            TemplateId::VpcAccessConnector => "vpc_access_connector",
            TemplateId::ProjectService => "project_service",
        };
        write!(f, "{}", name)
    }
}

/// Dispatch key; kinds other than compute services carry no role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TemplateKey {
    pub kind: ResourceKind,
    pub role: Option<Role>,
}

impl TemplateKey {
    pub const fn new(kind: ResourceKind, role: Option<Role>) -> Self {
        Self { kind, role }
    }
}

/// `(kind, role) -> template`. `Unknown` compute services have no entry.
pub const DISPATCH_TABLE: &[(TemplateKey, TemplateId)] = &[
    (
        TemplateKey::new(ResourceKind::ComputeService, Some(Role::Frontend)),
        TemplateId::CloudRunFrontend,
    ),
    (
        TemplateKey::new(ResourceKind::ComputeService, Some(Role::Backend)),
        TemplateId::CloudRunBackend,
    ),
    (
        TemplateKey::new(ResourceKind::ComputeService, Some(Role::Fullstack)),
        TemplateId::CloudRunFullstack,
    ),
    (
        TemplateKey::new(ResourceKind::ManagedDatabase, None),
        TemplateId::CloudSqlInstance,
    ),
    (
        TemplateKey::new(ResourceKind::ObjectStore, None),
        TemplateId::StorageBucket,
    ),
    (
        TemplateKey::new(ResourceKind::SecretEntry, None),
        TemplateId::SecretManagerSecret,
    ),
    (
        TemplateKey::new(ResourceKind::PrincipalIdentity, None),
        TemplateId::ServiceAccount,
    ),
    (
        TemplateKey::new(ResourceKind::NetworkConnector, None),
        TemplateId::VpcAccessConnector,
    ),
    (
        TemplateKey::new(ResourceKind::EnabledCapability, None),
        TemplateId::ProjectService,
    ),
];

pub fn select(kind: ResourceKind, role: Option<Role>) -> Option<TemplateId> {
    let key = TemplateKey::new(kind, role);
    DISPATCH_TABLE
        .iter()
        .find(|(candidate, _)| *candidate == key)
        .map(|(_, id)| *id)
}

/// How a template is materialized
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateForm {
    /// `module` block; `source_dir` is relative to the modules source
    Module {
        source_dir: &'static str,
        inner_name: &'static str,
    },
    /// Plain `resource` block
    Resource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Required,
    Optional,
    /// Required when another input has the given value
    RequiredWhen {
        input: &'static str,
        equals: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Render {
    /// `name = value`
    Argument,
    /// Bound for the import id only
    Hidden,
    /// Secret Manager `replication {}` block built from `replication` and
    /// `replica_locations`
    ReplicationBlock,
}

/// One template input and the raw attribute it is extracted from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputSpec {
    pub name: &'static str,
    pub attribute: &'static str,
    pub requirement: Requirement,
    pub render: Render,
}

const fn required(name: &'static str, attribute: &'static str) -> InputSpec {
    InputSpec {
        name,
        attribute,
        requirement: Requirement::Required,
        render: Render::Argument,
    }
}

const fn optional(name: &'static str, attribute: &'static str) -> InputSpec {
    InputSpec {
        name,
        attribute,
        requirement: Requirement::Optional,
        render: Render::Argument,
    }
}

/// Module output re-exported from the root configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputSpec {
    pub suffix: &'static str,
    pub module_output: &'static str,
    pub description: &'static str,
    pub sensitive: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Template {
    pub id: TemplateId,
    pub form: TemplateForm,
    pub resource_type: &'static str,
    /// Raw HCL arguments written before the bound inputs
    pub fixed_arguments: &'static [(&'static str, &'static str)],
    pub inputs: &'static [InputSpec],
    /// Provider import id with `{input}` and `{project}` placeholders
    pub import_id: &'static str,
    /// Prefix for generated names; modules always carry it
    pub name_prefix: &'static str,
    /// Output file the generated block is grouped into
    pub file: &'static str,
    pub outputs: &'static [OutputSpec],
}

const CLOUD_RUN_INPUTS: &[InputSpec] = &[
    required("service_name", "name"),
    required("region", "region"),
    required("image", "image"),
    optional("container_port", "container_port"),
    optional("service_account_email", "service_account"),
    optional("labels", "labels"),
];

const CLOUD_RUN_OUTPUTS: &[OutputSpec] = &[OutputSpec {
    suffix: "url",
    module_output: "service_url",
    description: "URL for",
    sensitive: false,
}];

const fn cloud_run(id: TemplateId, source_dir: &'static str) -> Template {
    Template {
        id,
        form: TemplateForm::Module {
            source_dir,
            inner_name: "service",
        },
        resource_type: "google_cloud_run_service",
        fixed_arguments: &[("project_id", "var.project_id")],
        inputs: CLOUD_RUN_INPUTS,
        import_id: "locations/{region}/namespaces/{project}/services/{service_name}",
        name_prefix: "run_",
        file: "cloud-run.tf",
        outputs: CLOUD_RUN_OUTPUTS,
    }
}

const CLOUD_RUN_FRONTEND: Template = cloud_run(TemplateId::CloudRunFrontend, "cloud-run-frontend");
const CLOUD_RUN_BACKEND: Template = cloud_run(TemplateId::CloudRunBackend, "cloud-run-backend");
const CLOUD_RUN_FULLSTACK: Template =
    cloud_run(TemplateId::CloudRunFullstack, "cloud-run-fullstack");

const CLOUD_SQL_INSTANCE: Template = Template {
    id: TemplateId::CloudSqlInstance,
    form: TemplateForm::Module {
        source_dir: "database-cloudsql",
        inner_name: "instance",
    },
    resource_type: "google_sql_database_instance",
    fixed_arguments: &[("project_id", "var.project_id")],
    inputs: &[
        required("instance_name", "name"),
        required("database_version", "database_version"),
        required("tier", "tier"),
        required("region", "region"),
        optional("availability_type", "availability_type"),
        optional("labels", "labels"),
    ],
    import_id: "projects/{project}/instances/{instance_name}",
    name_prefix: "sql_",
    file: "database-sql.tf",
    outputs: &[OutputSpec {
        suffix: "connection",
        module_output: "connection_name",
        description: "Connection name for",
        sensitive: true,
    }],
};

const STORAGE_BUCKET: Template = Template {
    id: TemplateId::StorageBucket,
    form: TemplateForm::Module {
        source_dir: "storage-bucket",
        inner_name: "bucket",
    },
    resource_type: "google_storage_bucket",
    fixed_arguments: &[("project_id", "var.project_id")],
    inputs: &[
        required("bucket_name", "name"),
        required("location", "location"),
        optional("storage_class", "storage_class"),
        optional("labels", "labels"),
    ],
    import_id: "{project}/{bucket_name}",
    name_prefix: "bucket_",
    file: "storage.tf",
    outputs: &[],
};

const SECRET_MANAGER_SECRET: Template = Template {
    id: TemplateId::SecretManagerSecret,
    form: TemplateForm::Resource,
    resource_type: "google_secret_manager_secret",
    fixed_arguments: &[("project", "var.project_id")],
    inputs: &[
        required("secret_id", "name"),
        InputSpec {
            name: "replication",
            attribute: "replication",
            requirement: Requirement::Required,
            render: Render::ReplicationBlock,
        },
        InputSpec {
            name: "replica_locations",
            attribute: "replica_locations",
            requirement: Requirement::RequiredWhen {
                input: "replication",
                equals: "user_managed",
            },
            render: Render::Hidden,
        },
        optional("labels", "labels"),
    ],
    import_id: "projects/{project}/secrets/{secret_id}",
    name_prefix: "secret_",
    file: "secrets.tf",
    outputs: &[],
};

const SERVICE_ACCOUNT: Template = Template {
    id: TemplateId::ServiceAccount,
    form: TemplateForm::Resource,
    resource_type: "google_service_account",
    fixed_arguments: &[("project", "var.project_id")],
    inputs: &[
        required("account_id", "account_id"),
        InputSpec {
            name: "email",
            attribute: "email",
            requirement: Requirement::Required,
            render: Render::Hidden,
        },
        optional("display_name", "display_name"),
        optional("description", "description"),
        optional("disabled", "disabled"),
    ],
    import_id: "projects/{project}/serviceAccounts/{email}",
    name_prefix: "sa_",
    file: "service-accounts.tf",
    outputs: &[],
};

const VPC_ACCESS_CONNECTOR: Template = Template {
    id: TemplateId::VpcAccessConnector,
    form: TemplateForm::Resource,
    resource_type: "google_vpc_access_connector",
    fixed_arguments: &[("project", "var.project_id")],
    inputs: &[
        required("name", "name"),
        required("region", "region"),
        required("network", "network"),
        required("ip_cidr_range", "ip_cidr_range"),
        optional("machine_type", "machine_type"),
        optional("min_instances", "min_instances"),
        optional("max_instances", "max_instances"),
    ],
    import_id: "projects/{project}/locations/{region}/connectors/{name}",
    name_prefix: "connector_",
    file: "network.tf",
    outputs: &[],
};

const PROJECT_SERVICE: Template = Template {
    id: TemplateId::ProjectService,
    form: TemplateForm::Resource,
    resource_type: "google_project_service",
    fixed_arguments: &[("project", "var.project_id"), ("disable_on_destroy", "false")],
    inputs: &[required("service", "name")],
    import_id: "{project}/{service}",
    name_prefix: "api_",
    file: "apis.tf",
    outputs: &[],
};

impl TemplateId {
    pub fn template(&self) -> &'static Template {
        match self {
            TemplateId::CloudRunFrontend => &CLOUD_RUN_FRONTEND,
            TemplateId::CloudRunBackend => &CLOUD_RUN_BACKEND,
            TemplateId::CloudRunFullstack => &CLOUD_RUN_FULLSTACK,
            TemplateId::CloudSqlInstance => &CLOUD_SQL_INSTANCE,
            TemplateId::StorageBucket => &STORAGE_BUCKET,
            TemplateId::SecretManagerSecret => &SECRET_MANAGER_SECRET,
            TemplateId::ServiceAccount => &SERVICE_ACCOUNT,
            TemplateId::VpcAccessConnector => &VPC_ACCESS_CONNECTOR,
            TemplateId::ProjectService => &PROJECT_SERVICE,
        }
    }
}

impl Template {
    pub fn is_module(&self) -> bool {
        matches!(self.form, TemplateForm::Module { .. })
    }

    /// Address the import directive targets for a given instance name
    pub fn import_address(&self, instance_name: &str) -> String {
        match self.form {
            TemplateForm::Module { inner_name, .. } => format!(
                "module.{}.{}.{}",
                instance_name, self.resource_type, inner_name
            ),
            TemplateForm::Resource => format!("{}.{}", self.resource_type, instance_name),
        }
    }

    /// Key of the generated top-level block, unique across the configuration
    pub fn block_key(&self, instance_name: &str) -> String {
        match self.form {
            TemplateForm::Module { .. } => format!("module.{}", instance_name),
            TemplateForm::Resource => format!("{}.{}", self.resource_type, instance_name),
        }
    }

    /// Substitute `{placeholder}`s in the import id.
    ///
    /// Returns the names of placeholders with no bound value on failure.
    pub fn import_id(
        &self,
        project_id: &str,
        variables: &BTreeMap<String, Value>,
    ) -> Result<String, Vec<String>> {
        let mut missing = Vec::new();
        let rendered = PLACEHOLDER_REGEX.replace_all(self.import_id, |caps: &regex::Captures| {
            let name = &caps[1];
            if name == "project" {
                return project_id.to_string();
            }
            match variables.get(name).and_then(scalar_text) {
                Some(text) => text,
                None => {
                    missing.push(name.to_string());
                    String::new()
                }
            }
        });

        if missing.is_empty() {
            Ok(rendered.into_owned())
        } else {
            Err(missing)
        }
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_dispatch_is_total_except_unknown() {
        for kind in ResourceKind::ALL {
            if kind == ResourceKind::ComputeService {
                continue;
            }
            assert!(select(kind, None).is_some(), "no template for {}", kind);
        }
        assert_eq!(
            select(ResourceKind::ComputeService, Some(Role::Backend)),
            Some(TemplateId::CloudRunBackend)
        );
        assert_eq!(select(ResourceKind::ComputeService, Some(Role::Unknown)), None);
        assert_eq!(select(ResourceKind::ComputeService, None), None);
        assert_eq!(select(ResourceKind::ObjectStore, Some(Role::Backend)), None);
    }

    #[test]
    fn test_dispatch_keys_are_unique() {
        for (i, (a, _)) in DISPATCH_TABLE.iter().enumerate() {
            for (b, _) in &DISPATCH_TABLE[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }

    #[test]
    fn test_addresses() {
        let run = TemplateId::CloudRunBackend.template();
        assert_eq!(
            run.import_address("run_api"),
            "module.run_api.google_cloud_run_service.service"
        );
        assert_eq!(run.block_key("run_api"), "module.run_api");

        let sa = TemplateId::ServiceAccount.template();
        assert_eq!(sa.import_address("deployer"), "google_service_account.deployer");
        assert_eq!(sa.block_key("deployer"), "google_service_account.deployer");
    }

    #[test]
    fn test_import_id_substitution() {
        let run = TemplateId::CloudRunFrontend.template();
        let mut vars = BTreeMap::new();
        vars.insert("service_name".to_string(), json!("web"));
        vars.insert("region".to_string(), json!("europe-north1"));
        assert_eq!(
            run.import_id("acme-prod", &vars).unwrap(),
            "locations/europe-north1/namespaces/acme-prod/services/web"
        );

        vars.remove("region");
        assert_eq!(run.import_id("acme-prod", &vars), Err(vec!["region".to_string()]));
    }
}
