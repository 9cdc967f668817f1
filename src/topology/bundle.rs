//! Handler Packaging
//!
//! The compute function's code is packaged by a [`Bundler`]. Which modules are
//! bundled and which are provided by the runtime are configuration inputs; the
//! graph only sees the resulting [`Package`], whose digest makes code changes
//! visible as configuration drift.

use crate::graph::ConfigValue;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Packaging rules
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BundleOptions {
    /// Entry file, relative to the source directory
    pub entry: String,
    /// Exported handler function
    pub handler: String,
    /// Modules provided by the runtime; excluded from the package
    #[serde(default)]
    pub external_modules: Vec<String>,
    /// Modules installed into the package as-is
    #[serde(default)]
    pub node_modules: Vec<String>,
}

impl Default for BundleOptions {
    fn default() -> Self {
        Self {
            entry: "dist/src/main.js".to_string(),
            handler: "handler".to_string(),
            external_modules: vec![
                "@nestjs/core".to_string(),
                "@nestjs/common".to_string(),
                "@nestjs/platform-express".to_string(),
            ],
            node_modules: vec!["nestjs".to_string()],
        }
    }
}

/// A deployable package for the compute function
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Package {
    pub entry: String,
    pub handler: String,
    /// SHA-256 over sorted relative paths and file contents
    pub digest: String,
    pub file_count: usize,
    pub external_modules: Vec<String>,
    pub node_modules: Vec<String>,
}

impl Package {
    /// Configuration value describing this package
    pub fn to_config(&self) -> ConfigValue {
        ConfigValue::map([
            ("entry", ConfigValue::from(self.entry.as_str())),
            ("handler", ConfigValue::from(self.handler.as_str())),
            ("digest", ConfigValue::from(self.digest.as_str())),
            ("file_count", ConfigValue::from(self.file_count as i64)),
            ("external_modules", ConfigValue::list(self.external_modules.iter().map(String::as_str))),
            ("node_modules", ConfigValue::list(self.node_modules.iter().map(String::as_str))),
        ])
    }
}

/// Build collaborator: turns a source directory into a package
pub trait Bundler {
    fn package(&self, source_dir: &Path) -> Result<Package>;
}

/// Packages a directory tree as-is
#[derive(Debug, Clone, Default)]
pub struct DirectoryBundler {
    options: BundleOptions,
}

impl DirectoryBundler {
    pub fn new(options: BundleOptions) -> Self {
        Self { options }
    }

    /// True for `node_modules/<external>` at any depth
    fn is_external(&self, relative: &Path) -> bool {
        let components: Vec<_> = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect();
        components
            .iter()
            .enumerate()
            .filter(|(_, c)| *c == "node_modules")
            .any(|(at, _)| {
                let rest = &components[at + 1..];
                self.options.external_modules.iter().any(|module| {
                    let parts: Vec<&str> = module.split('/').collect();
                    rest.len() >= parts.len()
                        && parts.iter().zip(rest).all(|(a, b)| *a == b.as_ref())
                })
            })
    }

    /// Regular files below `dir`; symbolic links are never followed
    fn collect(&self, root: &Path, dir: &Path, files: &mut Vec<PathBuf>) -> Result<()> {
        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("Failed to read directory {}", dir.display()))?;
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
            if self.is_external(&relative) {
                continue;
            }
            let file_type = entry
                .file_type()
                .with_context(|| format!("Failed to stat {}", relative.display()))?;
            if file_type.is_symlink() {
                tracing::debug!(path = %relative.display(), "Skipping symbolic link");
            } else if file_type.is_dir() {
                self.collect(root, &path, files)?;
            } else if file_type.is_file() {
                files.push(relative);
            }
        }
        Ok(())
    }
}

impl Bundler for DirectoryBundler {
    fn package(&self, source_dir: &Path) -> Result<Package> {
        let entry = source_dir.join(&self.options.entry);
        if !entry.is_file() {
            anyhow::bail!(
                "Handler entry {} not found in {}",
                self.options.entry,
                source_dir.display()
            );
        }

        let mut files = Vec::new();
        self.collect(source_dir, source_dir, &mut files)?;
        files.sort();

        let mut hasher = Sha256::new();
        for relative in &files {
            let content = std::fs::read(source_dir.join(relative))
                .with_context(|| format!("Failed to read {}", relative.display()))?;
            hasher.update(relative.to_string_lossy().replace('\\', "/").as_bytes());
            hasher.update([0u8]);
            hasher.update(&content);
        }

        let package = Package {
            entry: self.options.entry.clone(),
            handler: self.options.handler.clone(),
            digest: hex::encode(hasher.finalize()),
            file_count: files.len(),
            external_modules: self.options.external_modules.clone(),
            node_modules: self.options.node_modules.clone(),
        };
        tracing::info!(files = package.file_count, digest = %package.digest, "Handler packaged");
        Ok(package)
    }
}
