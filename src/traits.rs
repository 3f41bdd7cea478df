//! Capability traits implemented by registrant backends, plus the
//! unit-scoped error type every stage of a unit reports through.

use crate::model::{ComponentDefinition, PackageDescriptor};
use async_trait::async_trait;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors scoped to one generation unit. None of them abort the run.
#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("Unsupported registrant: {0}")]
    UnsupportedRegistrant(String),

    #[error("Failed to fetch package '{model}': {reason}")]
    PackageFetch { model: String, reason: String },

    #[error("Unit '{unit}' timed out after {timeout:?}")]
    Timeout { unit: String, timeout: Duration },

    #[error("Unit '{0}' panicked")]
    Panicked(String),

    #[error("Component extraction failed: {0}")]
    Extraction(String),

    #[error("Failed to persist '{}': {source}", path.display())]
    Persistence {
        path: PathBuf,
        source: std::io::Error,
    },

    /// A name would escape the artifact root when used as a path segment
    #[error("Path segment rejected: '{0}'")]
    PathTraversal(String),

    #[error("Rate limited by '{url}' after {attempts} attempts")]
    RateLimited { url: String, attempts: u32 },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GenerationError {
    pub fn fetch(model: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::PackageFetch {
            model: model.into(),
            reason: reason.to_string(),
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, GenerationError::Timeout { .. })
    }
}

/// Components extracted from one package.
#[derive(Debug, Default, Clone)]
pub struct GeneratedComponents {
    pub components: Vec<ComponentDefinition>,

    /// Source resources that failed extraction and were left out
    pub skipped: usize,
}

/// A fetched package, ready for component extraction.
#[async_trait]
pub trait Package: Send + Sync {
    fn name(&self) -> &str;

    fn version(&self) -> &str;

    fn source_url(&self) -> &str;

    /// Extracts every component the package defines, grouped under `group`.
    ///
    /// A malformed resource is counted in [`GeneratedComponents::skipped`]
    /// rather than failing the whole call.
    async fn generate_components(&self, group: &str)
        -> Result<GeneratedComponents, GenerationError>;
}

/// A registrant backend bound to one descriptor.
#[async_trait]
pub trait PackageSource: Send + Sync {
    async fn get_package(&self) -> Result<Box<dyn Package>, GenerationError>;
}

/// Produces the backend for a descriptor. Registered per registrant name.
pub trait RegistrantFactory: Send + Sync {
    fn create(&self, descriptor: &PackageDescriptor, latest_version_only: bool)
        -> Box<dyn PackageSource>;
}

impl<F> RegistrantFactory for F
where
    F: Fn(&PackageDescriptor, bool) -> Box<dyn PackageSource> + Send + Sync,
{
    fn create(
        &self,
        descriptor: &PackageDescriptor,
        latest_version_only: bool,
    ) -> Box<dyn PackageSource> {
        self(descriptor, latest_version_only)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_error_names_unit_and_duration() {
        let err = GenerationError::Timeout {
            unit: "istio-base".to_string(),
            timeout: Duration::from_millis(50),
        };
        let msg = err.to_string();
        assert!(msg.contains("istio-base"));
        assert!(msg.contains("50ms"));
        assert!(err.is_timeout());
    }

    #[test]
    fn test_fetch_helper_formats_reason() {
        let err = GenerationError::fetch("linkerd", "404 Not Found");
        assert_eq!(
            err.to_string(),
            "Failed to fetch package 'linkerd': 404 Not Found"
        );
        assert!(!err.is_timeout());
    }
}
