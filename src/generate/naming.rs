use crate::model::templates::Template;

/// Turn a cloud resource name into a valid Terraform identifier.
///
/// Strips an `@domain` suffix and replaces every character outside
/// `[A-Za-z0-9_]` with `_`. Does not add a prefix.
pub fn sanitize_terraform_name(name: &str) -> String {
    let local = name.split('@').next().unwrap_or(name);
    let local = local
        .trim_end_matches(".gserviceaccount.com")
        .trim_end_matches(".iam");

    local
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Instance name used for the generated block.
///
/// Module instances share one namespace across all templates, so they always
/// carry the template's prefix. Resource names are already scoped by type and
/// only get the prefix when they would not start with a letter or underscore.
pub fn instance_name(template: &Template, identifier: &str) -> String {
    let base = sanitize_terraform_name(identifier);
    let valid_start = base
        .chars()
        .next()
        .map(|c| c.is_ascii_alphabetic() || c == '_')
        .unwrap_or(false);

    if template.is_module() || !valid_start {
        format!("{}{}", template.name_prefix, base)
    } else {
        base
    }
}
