//! ArtifactHub: the throttled upstream catalog.
//!
//! Every API call goes through the shared [`RateLimiter`]; listing requests
//! additionally retry on `429` via [`BackoffPolicy`]. Chart downloads hit the
//! chart repository, not the API, and are not throttled.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::io::Read;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use url::Url;

use super::manifest::extract_components;
use crate::catalog::{CatalogEntry, Tier};
use crate::config::GeneratorConfig;
use crate::model::PackageDescriptor;
use crate::ratelimit::{BackoffPolicy, RateLimiter};
use crate::traits::{GeneratedComponents, GenerationError, Package, PackageSource};

/// Registrant name under which this backend is registered.
pub const REGISTRANT: &str = "artifacthub";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RepositoryInfo {
    pub name: String,

    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub official: bool,

    #[serde(default)]
    pub verified_publisher: bool,

    #[serde(default)]
    pub cncf: bool,
}

/// Package record as returned by the ArtifactHub API.
#[derive(Debug, Clone, Deserialize)]
pub struct PackageInfo {
    pub name: String,

    pub version: String,

    /// Chart archive URL
    #[serde(default)]
    pub content_url: Option<String>,

    #[serde(default)]
    pub repository: RepositoryInfo,

    #[serde(default)]
    pub official: bool,

    #[serde(default)]
    pub cncf: bool,
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    packages: Vec<PackageInfo>,
}

/// Splits `.../packages/helm/<repo>/<name>[/<version>]`.
pub fn parse_package_url(source_url: &str) -> Option<(String, String, Option<String>)> {
    let url = Url::parse(source_url).ok()?;
    let segments: Vec<&str> = url.path_segments()?.filter(|s| !s.is_empty()).collect();
    let start = segments.iter().position(|s| *s == "packages")?;

    match &segments[start + 1..] {
        ["helm", repo, name] => Some((repo.to_string(), name.to_string(), None)),
        ["helm", repo, name, version] => Some((
            repo.to_string(),
            name.to_string(),
            Some(version.to_string()),
        )),
        _ => None,
    }
}

// ============================================================================
// Client
// ============================================================================

pub struct ArtifactHubClient {
    http: Client,
    base_url: String,
    limiter: Arc<RateLimiter>,
    backoff: BackoffPolicy,
}

impl ArtifactHubClient {
    pub fn new(
        http: Client,
        base_url: impl Into<String>,
        limiter: Arc<RateLimiter>,
        backoff: BackoffPolicy,
    ) -> Self {
        Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            limiter,
            backoff,
        }
    }

    pub fn from_config(http: Client, config: &GeneratorConfig) -> Self {
        let limiter = RateLimiter::new(config.rate_limit.threshold, config.rate_limit.cooldown());
        let backoff = BackoffPolicy::new(
            config.rate_limit.max_retries,
            config.rate_limit.backoff_base(),
        );
        Self::new(http, &config.artifacthub.base_url, Arc::new(limiter), backoff)
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    /// Public package page for `repo/name`, as used in descriptors.
    pub fn package_url(&self, repo: &str, name: &str) -> String {
        format!("{}/packages/helm/{repo}/{name}", self.base_url)
    }

    /// Fetches one package's metadata; `version = None` means latest.
    #[instrument(skip(self))]
    pub async fn fetch_package(
        &self,
        repo: &str,
        name: &str,
        version: Option<&str>,
    ) -> Result<PackageInfo, GenerationError> {
        let mut url = format!("{}/api/v1/packages/helm/{repo}/{name}", self.base_url);
        if let Some(version) = version {
            url.push('/');
            url.push_str(version);
        }

        let response = self
            .backoff
            .send_limited(&self.limiter, || self.http.get(&url))
            .await?;
        if !response.status().is_success() {
            return Err(GenerationError::fetch(
                name,
                format!("HTTP {} from {url}", response.status()),
            ));
        }
        Ok(response.json().await?)
    }

    async fn list_page(&self, offset: usize, limit: usize) -> Result<Vec<PackageInfo>, GenerationError> {
        let url = format!("{}/api/v1/packages/search", self.base_url);
        let query = [
            ("kind", "0".to_string()),
            ("limit", limit.to_string()),
            ("offset", offset.to_string()),
        ];

        let response = self
            .backoff
            .send_limited(&self.limiter, || self.http.get(&url).query(&query))
            .await?;
        if !response.status().is_success() {
            return Err(GenerationError::fetch(
                "catalog",
                format!("HTTP {} listing offset {offset}", response.status()),
            ));
        }
        let page: SearchPage = response.json().await?;
        Ok(page.packages)
    }

    /// Pages through the Helm catalog and classifies every package.
    ///
    /// A page that keeps failing (including exhausting its `429` retries) is
    /// logged and skipped; listing continues with the next page. Listing stops
    /// at `max_pages` or at the first short page.
    pub async fn list_catalog(
        &self,
        page_size: usize,
        max_pages: usize,
        priority_repos: &[String],
    ) -> Vec<CatalogEntry> {
        let mut entries = Vec::new();

        for page in 0..max_pages {
            let offset = page * page_size;
            let packages = match self.list_page(offset, page_size).await {
                Ok(packages) => packages,
                Err(e) => {
                    warn!(offset, error = %e, "Skipping catalog page");
                    continue;
                }
            };

            let short = packages.len() < page_size;
            entries.extend(packages.into_iter().map(|pkg| {
                let tier = Tier::classify(
                    &pkg.repository.name,
                    pkg.cncf || pkg.repository.cncf,
                    pkg.official || pkg.repository.official,
                    pkg.repository.verified_publisher,
                    priority_repos,
                );
                CatalogEntry {
                    descriptor: PackageDescriptor::new(
                        REGISTRANT,
                        self.package_url(&pkg.repository.name, &pkg.name),
                        &pkg.name,
                        tier != Tier::Unverified,
                    ),
                    repository: pkg.repository.name,
                    tier,
                }
            }));

            if short {
                break;
            }
        }

        info!(packages = entries.len(), "Catalog listing finished");
        entries
    }
}

// ============================================================================
// Package Source
// ============================================================================

pub struct ArtifactHubSource {
    client: Arc<ArtifactHubClient>,
    descriptor: PackageDescriptor,
    latest_version_only: bool,
}

impl ArtifactHubSource {
    pub fn new(
        client: Arc<ArtifactHubClient>,
        descriptor: PackageDescriptor,
        latest_version_only: bool,
    ) -> Self {
        Self {
            client,
            descriptor,
            latest_version_only,
        }
    }
}

#[async_trait]
impl PackageSource for ArtifactHubSource {
    async fn get_package(&self) -> Result<Box<dyn Package>, GenerationError> {
        let model = &self.descriptor.model_name;
        let (repo, name, pinned) = parse_package_url(&self.descriptor.source_url)
            .ok_or_else(|| {
                GenerationError::fetch(model, format!("not a package URL: {}", self.descriptor.source_url))
            })?;

        let version = if self.latest_version_only {
            None
        } else {
            pinned.as_deref()
        };
        let info = self.client.fetch_package(&repo, &name, version).await?;
        let content_url = info
            .content_url
            .ok_or_else(|| GenerationError::fetch(model, "package has no chart archive"))?;

        Ok(Box::new(ArtifactHubPackage {
            http: self.client.http().clone(),
            name: model.clone(),
            version: info.version,
            content_url,
        }))
    }
}

pub struct ArtifactHubPackage {
    http: Client,
    name: String,
    version: String,
    content_url: String,
}

#[async_trait]
impl Package for ArtifactHubPackage {
    fn name(&self) -> &str {
        &self.name
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn source_url(&self) -> &str {
        &self.content_url
    }

    async fn generate_components(
        &self,
        group: &str,
    ) -> Result<GeneratedComponents, GenerationError> {
        let response = self.http.get(&self.content_url).send().await?;
        if !response.status().is_success() {
            return Err(GenerationError::fetch(
                &self.name,
                format!("HTTP {} from {}", response.status(), self.content_url),
            ));
        }
        let archive = response.bytes().await?.to_vec();

        let (manifests, unreadable) = tokio::task::spawn_blocking(move || read_chart_crds(&archive))
            .await
            .map_err(|e| GenerationError::Extraction(format!("Task join error: {e}")))?
            .map_err(|e| GenerationError::Extraction(format!("invalid chart archive: {e}")))?;

        debug!(files = manifests.len(), unreadable, "Chart CRDs read");
        let mut generated = extract_components(&manifests, group);
        generated.skipped += unreadable;
        Ok(generated)
    }
}

/// Reads every YAML file under a `crds/` directory of a gzipped chart.
///
/// Returns the file contents and the number of entries that could not be
/// read as UTF-8 text.
fn read_chart_crds(archive: &[u8]) -> std::io::Result<(Vec<String>, usize)> {
    let mut tar = tar::Archive::new(flate2::read::GzDecoder::new(archive));
    let mut manifests = Vec::new();
    let mut unreadable = 0;

    for entry in tar.entries()? {
        let mut entry = entry?;
        let path = entry.path()?.into_owned();
        let in_crds = path.components().any(|c| c.as_os_str() == "crds");
        let is_yaml = matches!(
            path.extension().and_then(|e| e.to_str()),
            Some("yaml") | Some("yml")
        );
        if !in_crds || !is_yaml {
            continue;
        }

        let mut content = String::new();
        match entry.read_to_string(&mut content) {
            Ok(_) => manifests.push(content),
            Err(_) => unreadable += 1,
        }
    }

    Ok((manifests, unreadable))
}
