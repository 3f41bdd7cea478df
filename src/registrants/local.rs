//! Built-in models whose manifests live on the local filesystem.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::warn;

use super::manifest::extract_components;
use crate::model::{PackageDescriptor, DEFAULT_VERSION};
use crate::traits::{GeneratedComponents, GenerationError, Package, PackageSource};

/// Accepts a plain path or a `file://` URL.
fn local_path(source_url: &str) -> PathBuf {
    PathBuf::from(source_url.strip_prefix("file://").unwrap_or(source_url))
}

fn is_manifest(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

pub struct LocalSource {
    descriptor: PackageDescriptor,
}

impl LocalSource {
    pub fn new(descriptor: PackageDescriptor) -> Self {
        Self { descriptor }
    }
}

#[async_trait]
impl PackageSource for LocalSource {
    async fn get_package(&self) -> Result<Box<dyn Package>, GenerationError> {
        let path = local_path(&self.descriptor.source_url);
        let model = &self.descriptor.model_name;

        let metadata = tokio::fs::metadata(&path)
            .await
            .map_err(|e| GenerationError::fetch(model, format!("{}: {e}", path.display())))?;

        let mut files = Vec::new();
        if metadata.is_dir() {
            let mut entries = tokio::fs::read_dir(&path).await?;
            while let Some(entry) = entries.next_entry().await? {
                let entry_path = entry.path();
                if is_manifest(&entry_path) && entry.file_type().await?.is_file() {
                    files.push(entry_path);
                }
            }
            files.sort();
        } else {
            files.push(path);
        }

        // One unreadable file costs that file only.
        let mut manifests = Vec::with_capacity(files.len());
        let mut unreadable = 0;
        for file in files {
            match read_manifest(&file).await {
                Ok(text) => manifests.push(text),
                Err(reason) => {
                    warn!(%model, file = %file.display(), %reason, "Manifest unreadable, skipped");
                    unreadable += 1;
                }
            }
        }

        Ok(Box::new(LocalPackage {
            name: model.clone(),
            source_url: self.descriptor.source_url.clone(),
            manifests,
            unreadable,
        }))
    }
}

async fn read_manifest(file: &Path) -> Result<String, String> {
    let bytes = tokio::fs::read(file).await.map_err(|e| e.to_string())?;
    String::from_utf8(bytes).map_err(|e| e.to_string())
}

pub struct LocalPackage {
    name: String,
    source_url: String,
    manifests: Vec<String>,
    /// Files that could not be read as text
    unreadable: usize,
}

#[async_trait]
impl Package for LocalPackage {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        DEFAULT_VERSION
    }

    fn source_url(&self) -> &str {
        &self.source_url
    }

    async fn generate_components(
        &self,
        group: &str,
    ) -> Result<GeneratedComponents, GenerationError> {
        let mut generated = extract_components(&self.manifests, group);
        generated.skipped += self.unreadable;
        Ok(generated)
    }
}
