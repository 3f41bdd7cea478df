//! Registrant backends and the table that resolves a registrant name to one.
//!
//! - [`artifacthub`]: Helm charts listed on ArtifactHub (rate limited)
//! - [`github`]: manifests hosted on GitHub or any HTTP location
//! - [`local`]: built-in manifests on the local filesystem

pub mod artifacthub;
pub mod local;
pub mod github;
pub mod manifest;

use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;

use crate::model::PackageDescriptor;
use crate::traits::{GenerationError, PackageSource, RegistrantFactory};

pub use artifacthub::{ArtifactHubClient, ArtifactHubPackage, ArtifactHubSource};
pub use local::{LocalPackage, LocalSource};
pub use github::{GitHubPackage, GitHubSource};

/// Maps case-normalized registrant names to backend factories.
#[derive(Default)]
pub struct RegistrantRegistry {
    factories: HashMap<String, Arc<dyn RegistrantFactory>>,
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

impl RegistrantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the `artifacthub`, `github` and `meshery` backends.
    pub fn with_defaults(artifacthub: Arc<ArtifactHubClient>, http: Client) -> Self {
        let mut registry = Self::new();

        registry.register(
            artifacthub::REGISTRANT,
            move |descriptor: &PackageDescriptor, latest_only: bool| -> Box<dyn PackageSource> {
                Box::new(ArtifactHubSource::new(
                    artifacthub.clone(),
                    descriptor.clone(),
                    latest_only,
                ))
            },
        );
        registry.register(
            "github",
            move |descriptor: &PackageDescriptor, _: bool| -> Box<dyn PackageSource> {
                Box::new(GitHubSource::new(http.clone(), descriptor.clone()))
            },
        );
        registry.register(
            "meshery",
            |descriptor: &PackageDescriptor, _: bool| -> Box<dyn PackageSource> {
                Box::new(LocalSource::new(descriptor.clone()))
            },
        );

        registry
    }

    /// Adds or replaces the factory for `name`.
    pub fn register<F>(&mut self, name: &str, factory: F)
    where
        F: RegistrantFactory + 'static,
    {
        self.factories.insert(normalize(name), Arc::new(factory));
    }

    /// Backend for `descriptor`, or [`GenerationError::UnsupportedRegistrant`].
    pub fn resolve(
        &self,
        descriptor: &PackageDescriptor,
        latest_version_only: bool,
    ) -> Result<Box<dyn PackageSource>, GenerationError> {
        self.factories
            .get(&normalize(&descriptor.registrant))
            .map(|factory| factory.create(descriptor, latest_version_only))
            .ok_or_else(|| GenerationError::UnsupportedRegistrant(descriptor.registrant.clone()))
    }

    pub fn supports(&self, registrant: &str) -> bool {
        self.factories.contains_key(&normalize(registrant))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
