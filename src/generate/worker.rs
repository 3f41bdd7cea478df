//! One unit of generation: descriptor in, tagged components out.

use std::sync::Arc;
use tracing::{debug, instrument, warn};

use super::sink::is_path_segment;
use crate::model::{
    ComponentDefinition, ModelDefinition, ModelMetadata, ModelStatus, PackageDescriptor,
    DEFAULT_CATEGORY,
};
use crate::registrants::RegistrantRegistry;
use crate::traits::GenerationError;

/// Result of a generation attempt before deduplication and persistence.
#[derive(Debug, Clone)]
pub struct GeneratedModel {
    pub metadata: ModelMetadata,
    pub publish: bool,
    pub components: Vec<ComponentDefinition>,
    /// Source resources that failed extraction
    pub skipped_resources: usize,
}

impl GeneratedModel {
    /// Model definition for the components that survived deduplication.
    pub fn definition(&self, components_count: usize) -> ModelDefinition {
        ModelDefinition {
            name: self.metadata.name.clone(),
            version: self.metadata.version.clone(),
            category: self.metadata.category.clone(),
            registrant: self.metadata.registrant.clone(),
            source_uri: self.metadata.source_uri.clone(),
            status: ModelStatus::from(self.publish),
            components_count,
        }
    }
}

/// Fetches a package through its registrant and tags what it generates.
#[derive(Clone)]
pub struct GenerationWorker {
    registry: Arc<RegistrantRegistry>,
    latest_version_only: bool,
}

impl GenerationWorker {
    pub fn new(registry: Arc<RegistrantRegistry>, latest_version_only: bool) -> Self {
        Self {
            registry,
            latest_version_only,
        }
    }

    #[instrument(skip_all, fields(model = %descriptor.model_name, registrant = %descriptor.registrant))]
    pub async fn generate(
        &self,
        descriptor: &PackageDescriptor,
    ) -> Result<GeneratedModel, GenerationError> {
        let source = self
            .registry
            .resolve(descriptor, self.latest_version_only)?;
        let package = source.get_package().await?;

        let mut generated = package.generate_components(&descriptor.model_name).await?;

        // A kind names its artifact file; one that cannot is a malformed resource.
        let before = generated.components.len();
        generated.components.retain(|c| {
            let valid = is_path_segment(&c.kind);
            if !valid {
                warn!(model = %descriptor.model_name, kind = %c.kind, "Component kind is not a file name");
            }
            valid
        });
        generated.skipped += before - generated.components.len();

        if generated.skipped > 0 {
            warn!(
                model = %descriptor.model_name,
                skipped = generated.skipped,
                "Malformed resources skipped"
            );
        }

        let metadata = ModelMetadata {
            name: descriptor.model_name.clone(),
            version: package.version().to_string(),
            category: DEFAULT_CATEGORY.to_string(),
            registrant: descriptor.registrant.trim().to_lowercase(),
            source_uri: package.source_url().to_string(),
        };

        let components = generated
            .components
            .into_iter()
            .map(|mut component| {
                component.model = metadata.clone();
                component
            })
            .collect::<Vec<_>>();

        debug!(
            model = %metadata.name,
            version = %metadata.version,
            package = package.name(),
            components = components.len(),
            "Components generated"
        );

        Ok(GeneratedModel {
            metadata,
            publish: descriptor.publish,
            components,
            skipped_resources: generated.skipped,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::traits::{GeneratedComponents, Package, PackageSource};
    use async_trait::async_trait;
    use std::time::Duration;

    /// In-memory package: one component per kind, after an optional delay.
    pub(crate) struct StubPackage {
        pub name: String,
        pub version: String,
        pub kinds: Vec<String>,
        pub delay: Duration,
        pub skipped: usize,
    }

    #[async_trait]
    impl Package for StubPackage {
        fn name(&self) -> &str {
            &self.name
        }

        fn version(&self) -> &str {
            &self.version
        }

        fn source_url(&self) -> &str {
            "https://example.com/stub"
        }

        async fn generate_components(
            &self,
            group: &str,
        ) -> Result<GeneratedComponents, GenerationError> {
            tokio::time::sleep(self.delay).await;
            Ok(GeneratedComponents {
                components: self
                    .kinds
                    .iter()
                    .map(|kind| ComponentDefinition {
                        kind: kind.clone(),
                        api_version: format!("{group}.example.io/v1"),
                        schema: serde_json::json!({"type": "object"}),
                        model: ModelMetadata::default(),
                    })
                    .collect(),
                skipped: self.skipped,
            })
        }
    }

    pub(crate) struct StubSource {
        pub kinds: Vec<String>,
        pub delay: Duration,
        pub fail: bool,
    }

    #[async_trait]
    impl PackageSource for StubSource {
        async fn get_package(&self) -> Result<Box<dyn Package>, GenerationError> {
            if self.fail {
                return Err(GenerationError::fetch("stub", "404 Not Found"));
            }
            Ok(Box::new(StubPackage {
                name: "stub".to_string(),
                version: "1.0.0".to_string(),
                kinds: self.kinds.clone(),
                delay: self.delay,
                skipped: 1,
            }))
        }
    }

    /// Registers `name` as a registrant backed by [`StubSource`].
    pub(crate) fn register_stub(
        registry: &mut RegistrantRegistry,
        name: &str,
        kinds: &[&str],
        delay: Duration,
    ) {
        let kinds: Vec<String> = kinds.iter().map(|k| k.to_string()).collect();
        registry.register(
            name,
            move |_: &PackageDescriptor, _: bool| -> Box<dyn PackageSource> {
                Box::new(StubSource {
                    kinds: kinds.clone(),
                    delay,
                    fail: false,
                })
            },
        );
    }

    #[tokio::test]
    async fn test_components_are_tagged_with_model_metadata() {
        let mut registry = RegistrantRegistry::new();
        register_stub(&mut registry, "github", &["Alpha", "Beta"], Duration::ZERO);
        let worker = GenerationWorker::new(Arc::new(registry), true);

        let descriptor = PackageDescriptor::new("GitHub", "https://x", "demo", false);
        let generated = worker.generate(&descriptor).await.unwrap();

        assert_eq!(generated.components.len(), 2);
        assert_eq!(generated.skipped_resources, 1);
        for component in &generated.components {
            assert_eq!(component.model.name, "demo");
            assert_eq!(component.model.version, "1.0.0");
            assert_eq!(component.model.category, "Uncategorized");
            assert_eq!(component.model.registrant, "github");
            assert_eq!(component.api_version, "demo.example.io/v1");
        }
        assert_eq!(generated.definition(2).status, ModelStatus::Ignored);
    }

    #[tokio::test]
    async fn test_unnameable_kind_is_skipped_and_counted() {
        let mut registry = RegistrantRegistry::new();
        register_stub(&mut registry, "github", &["Good", "bad/kind", ".."], Duration::ZERO);
        let worker = GenerationWorker::new(Arc::new(registry), true);

        let generated = worker
            .generate(&PackageDescriptor::new("github", "https://x", "demo", true))
            .await
            .unwrap();

        let kinds: Vec<_> = generated.components.iter().map(|c| c.kind.as_str()).collect();
        assert_eq!(kinds, vec!["Good"]);
        // one from the stub itself plus the two rejected kinds
        assert_eq!(generated.skipped_resources, 3);
    }

    #[tokio::test]
    async fn test_fetch_failure_is_unit_error() {
        let mut registry = RegistrantRegistry::new();
        registry.register(
            "github",
            |_: &PackageDescriptor, _: bool| -> Box<dyn PackageSource> {
                Box::new(StubSource {
                    kinds: Vec::new(),
                    delay: Duration::ZERO,
                    fail: true,
                })
            },
        );
        let worker = GenerationWorker::new(Arc::new(registry), true);

        let err = worker
            .generate(&PackageDescriptor::new("github", "https://x", "demo", true))
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::PackageFetch { .. }));
    }
}
