use crate::discovery::model::EntryRef;
use crate::generate::hcl;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

pub const IMPORTS_FILE: &str = "imports.tf";

/// Unindented block header: type, then quoted labels, then `{`
static BLOCK_HEADER_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?m)^([a-z_]+)((?:[ \t]+"[^"]*")*)[ \t]*\{"#).expect("Invalid block header regex")
});
static IMPORT_TARGET_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^\s*to\s*=\s*(\S+)\s*$").expect("Invalid import target regex"));

/// One rendered top-level block and the file it belongs to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RenderedBlock {
    /// `None` for project scaffolding not tied to a resource
    pub origin: Option<EntryRef>,
    pub file: String,
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportDirective {
    pub origin: EntryRef,
    pub to: String,
    pub id: String,
}

impl ImportDirective {
    /// `import {}` block form
    pub fn to_block(&self) -> String {
        format!(
            "import {{\n  to = {}\n  id = {}\n}}\n",
            self.to,
            hcl::quote(&self.id)
        )
    }

    /// `terraform import` command form, for engines without import blocks
    pub fn to_command(&self) -> String {
        format!(
            "terraform import '{}' '{}'",
            self.to,
            self.id.replace('\'', "'\\''")
        )
    }
}

/// Immutable output of one generation pass.
///
/// Blocks and imports are in canonical order; `files()` gives the
/// byte-identical text for identical inputs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationArtifact {
    pub blocks: Vec<RenderedBlock>,
    pub imports: Vec<ImportDirective>,
}

impl GenerationArtifact {
    pub fn new(blocks: Vec<RenderedBlock>, imports: Vec<ImportDirective>) -> Self {
        Self { blocks, imports }
    }

    /// Entries represented in this artifact
    pub fn origins(&self) -> BTreeSet<EntryRef> {
        self.imports.iter().map(|i| i.origin.clone()).collect()
    }

    /// File name to content, one file per logical grouping plus `imports.tf`
    pub fn files(&self) -> BTreeMap<String, String> {
        let mut grouped: BTreeMap<String, Vec<&str>> = BTreeMap::new();
        for block in &self.blocks {
            grouped
                .entry(block.file.clone())
                .or_default()
                .push(block.text.as_str());
        }

        let mut files: BTreeMap<String, String> = grouped
            .into_iter()
            .map(|(file, texts)| (file, texts.join("\n")))
            .collect();

        if !self.imports.is_empty() {
            let mut text =
                String::from("# Import blocks adopting existing resources into Terraform state\n\n");
            let blocks: Vec<String> = self.imports.iter().map(|i| i.to_block()).collect();
            text.push_str(&blocks.join("\n"));
            files.insert(IMPORTS_FILE.to_string(), text);
        }

        files
    }

    pub fn import_commands(&self) -> Vec<String> {
        self.imports.iter().map(|i| i.to_command()).collect()
    }

    /// A new artifact without anything originating from `excluded`
    pub fn excluding(&self, excluded: &BTreeSet<EntryRef>) -> GenerationArtifact {
        let keep = |origin: Option<&EntryRef>| origin.map_or(true, |o| !excluded.contains(o));
        GenerationArtifact {
            blocks: self
                .blocks
                .iter()
                .filter(|b| keep(b.origin.as_ref()))
                .cloned()
                .collect(),
            imports: self
                .imports
                .iter()
                .filter(|i| keep(Some(&i.origin)))
                .cloned()
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.imports.is_empty()
    }
}

/// Write the artifact's files into `dir`, creating it if needed
pub async fn persist(artifact: &GenerationArtifact, dir: &Path) -> io::Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(dir).await?;

    let mut written = Vec::new();
    for (name, content) in artifact.files() {
        let path = dir.join(&name);
        tokio::fs::write(&path, content).await?;
        written.push(path);
    }

    info!("Wrote {} files to {}", written.len(), dir.display());
    Ok(written)
}

/// Add the artifact to files already in `dir`.
///
/// Existing content is kept. A block is appended only when the file has no
/// top-level block with the same header (`module "run_api"`), and an import
/// only when its target address is not imported yet. Files that do not exist
/// are written whole. Returns the files that changed.
pub async fn persist_merged(artifact: &GenerationArtifact, dir: &Path) -> io::Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(dir).await?;

    let mut written = Vec::new();
    let mut appended = 0;
    for (name, content) in artifact.files() {
        let path = dir.join(&name);
        let existing = match tokio::fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tokio::fs::write(&path, content).await?;
                written.push(path);
                continue;
            }
            Err(e) => return Err(e),
        };

        let additions = if name == IMPORTS_FILE {
            let present: BTreeSet<&str> = IMPORT_TARGET_REGEX
                .captures_iter(&existing)
                .filter_map(|c| c.get(1))
                .map(|m| m.as_str())
                .collect();
            artifact
                .imports
                .iter()
                .filter(|i| !present.contains(i.to.as_str()))
                .map(ImportDirective::to_block)
                .collect::<Vec<_>>()
        } else {
            let present = block_keys(&existing);
            artifact
                .blocks
                .iter()
                .filter(|b| b.file == name)
                .filter(|b| match block_keys(&b.text).into_iter().next() {
                    Some(key) => !present.contains(&key),
                    None => !existing.contains(b.text.trim()),
                })
                .map(|b| b.text.clone())
                .collect::<Vec<_>>()
        };

        if additions.is_empty() {
            debug!("{} already has every generated block", path.display());
            continue;
        }

        let mut merged = existing;
        if !merged.ends_with('\n') {
            merged.push('\n');
        }
        for text in &additions {
            merged.push('\n');
            merged.push_str(text);
        }
        tokio::fs::write(&path, merged).await?;
        appended += additions.len();
        written.push(path);
    }

    info!(
        "Added {} blocks to {} ({} files changed)",
        appended,
        dir.display(),
        written.len()
    );
    Ok(written)
}

/// Headers of the top-level blocks in `text`, in order of appearance
fn block_keys(text: &str) -> Vec<String> {
    BLOCK_HEADER_REGEX
        .captures_iter(text)
        .map(|c| {
            let mut key = c[1].to_string();
            for label in c[2].split_whitespace() {
                key.push(' ');
                key.push_str(label);
            }
            key
        })
        .collect()
}
