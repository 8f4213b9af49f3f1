//! YAML test manifests.
//!
//! ```yaml
//! Modules:
//!   - Name: dom
//!     Init: "() => { document.body.innerHTML = ''; }"
//!     Tests:
//!       - Name: creates a node
//!         Dependencies: [lib/dom-helpers.js]
//!         Run: "async (assert) => { assert.truthy(document.body); }"
//! ```

use crate::registry::{RegistryBuilder, TestRegistry};
use crate::types::{InitHook, NO_MODULE, TestCase, TestModule};
use crate::t_args;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct RawManifest {
    #[serde(alias = "modules")]
    pub modules: Vec<RawModule>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct RawModule {
    #[serde(default, alias = "name")]
    pub name: Option<String>,
    #[serde(default, alias = "init")]
    pub init: Option<String>,
    #[serde(default, alias = "tests")]
    pub tests: Vec<RawTest>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(rename_all = "PascalCase")]
pub struct RawTest {
    #[serde(alias = "name")]
    pub name: String,
    #[serde(default, alias = "dependencies", alias = "deps")]
    pub dependencies: Vec<String>,
    #[serde(alias = "run")]
    pub run: String,
}

fn is_manifest(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext == "yaml" || ext == "yml")
}

/// Manifest files under `paths`, directories walked in file-name order.
pub fn manifest_files(paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for p in paths {
        if p.is_dir() {
            for entry in WalkDir::new(p).sort_by_file_name() {
                let entry = entry?;
                if entry.file_type().is_file() && is_manifest(entry.path()) {
                    files.push(entry.path().to_path_buf());
                }
            }
        } else if p.is_file() {
            files.push(p.clone());
        } else {
            anyhow::bail!(t_args!("spec-missing-path", "path" => p.display()));
        }
    }
    Ok(files)
}

fn resolve_relative_to(path: &str, manifest: &Path) -> PathBuf {
    let path = Path::new(path.trim());
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match manifest.parent() {
        Some(dir) => dir.join(path),
        None => path.to_path_buf(),
    }
}

/// Turn one parsed manifest into modules; scripts are validated here.
pub fn build_modules(raw: RawManifest, manifest: &Path) -> Result<Vec<TestModule>> {
    let mut modules = Vec::new();
    for m in raw.modules {
        let name = m
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        let mut module = TestModule {
            name,
            ..TestModule::default()
        };
        if let Some(init) = m.init {
            let owner = module.name.as_deref().unwrap_or(NO_MODULE).to_string();
            module = module.with_init(InitHook::script(&owner, init)?);
        }
        if m.tests.is_empty() {
            warn!(
                "{}",
                t_args!("spec-empty-module",
                    "module" => module.display_name(),
                    "file" => manifest.display()
                )
            );
        }
        for t in m.tests {
            let mut case = TestCase::new(t.name.trim())
                .with_script(t.run)?
                .with_source_location(manifest);
            for dep in &t.dependencies {
                case = case.with_dependency(resolve_relative_to(dep, manifest));
            }
            module = module.test(case);
        }
        modules.push(module);
    }
    Ok(modules)
}

/// Load every manifest under `paths` into one frozen registry, in file order.
pub fn load_registry(paths: &[PathBuf]) -> Result<TestRegistry> {
    let mut builder = RegistryBuilder::new();
    for file in manifest_files(paths)? {
        let content = fs::read_to_string(&file)
            .with_context(|| t_args!("spec-failed-to-read", "file" => file.display()))?;
        let raw: RawManifest = serde_yaml::from_str(&content)
            .with_context(|| t_args!("spec-yaml-error", "file" => file.display()))?;
        let modules = build_modules(raw, &file)
            .with_context(|| t_args!("spec-invalid-test", "file" => file.display()))?;
        debug!(
            "{}",
            t_args!("debug-manifest-loaded",
                "file" => file.display(),
                "modules" => modules.len()
            )
        );
        for module in modules {
            builder.module(module);
        }
    }
    Ok(builder.build())
}
