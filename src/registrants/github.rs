//! Manifests hosted on GitHub (or any plain HTTP location).

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;
use url::Url;

use super::manifest::extract_components;
use crate::model::{PackageDescriptor, DEFAULT_VERSION};
use crate::traits::{GeneratedComponents, GenerationError, Package, PackageSource};

const RAW_HOST: &str = "https://raw.githubusercontent.com";

/// Resolves a GitHub source URL into its raw download URL and git ref.
///
/// `https://github.com/<owner>/<repo>/blob/<ref>/<path>` becomes
/// `https://raw.githubusercontent.com/<owner>/<repo>/<ref>/<path>` with
/// version `<ref>`; anything else is fetched as-is with the default version.
/// Errors are attributed to `model`.
pub fn resolve_raw_url(
    source_url: &str,
    model: &str,
) -> Result<(String, String), GenerationError> {
    let url = Url::parse(source_url)
        .map_err(|e| GenerationError::fetch(model, format!("invalid URL '{source_url}': {e}")))?;

    if url.host_str() == Some("github.com") {
        let segments: Vec<&str> = url.path_segments().map(|s| s.collect()).unwrap_or_default();
        if let [owner, repo, "blob" | "raw", git_ref, rest @ ..] = segments.as_slice() {
            if !rest.is_empty() {
                let raw = format!("{RAW_HOST}/{owner}/{repo}/{git_ref}/{}", rest.join("/"));
                return Ok((raw, (*git_ref).to_string()));
            }
        }
        return Err(GenerationError::fetch(
            model,
            format!("'{source_url}': expected https://github.com/<owner>/<repo>/blob/<ref>/<path>"),
        ));
    }

    if url.host_str() == Some("raw.githubusercontent.com") {
        let segments: Vec<&str> = url.path_segments().map(|s| s.collect()).unwrap_or_default();
        if let [_, _, git_ref, _, ..] = segments.as_slice() {
            return Ok((source_url.to_string(), (*git_ref).to_string()));
        }
    }

    Ok((source_url.to_string(), DEFAULT_VERSION.to_string()))
}

pub struct GitHubSource {
    client: Client,
    descriptor: PackageDescriptor,
}

impl GitHubSource {
    pub fn new(client: Client, descriptor: PackageDescriptor) -> Self {
        Self { client, descriptor }
    }
}

#[async_trait]
impl PackageSource for GitHubSource {
    async fn get_package(&self) -> Result<Box<dyn Package>, GenerationError> {
        let model = &self.descriptor.model_name;
        let (raw_url, version) = resolve_raw_url(&self.descriptor.source_url, model)?;

        debug!(%raw_url, %version, "Fetching manifest");
        let response = self.client.get(&raw_url).send().await?;
        if !response.status().is_success() {
            return Err(GenerationError::fetch(
                model,
                format!("HTTP {} from {raw_url}", response.status()),
            ));
        }
        let manifest = response.text().await?;

        Ok(Box::new(GitHubPackage {
            name: model.clone(),
            version,
            source_url: self.descriptor.source_url.clone(),
            manifest,
        }))
    }
}

pub struct GitHubPackage {
    name: String,
    version: String,
    source_url: String,
    manifest: String,
}

#[async_trait]
impl Package for GitHubPackage {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn source_url(&self) -> &str {
        &self.source_url
    }

    async fn generate_components(
        &self,
        group: &str,
    ) -> Result<GeneratedComponents, GenerationError> {
        Ok(extract_components(std::slice::from_ref(&self.manifest), group))
    }
}
