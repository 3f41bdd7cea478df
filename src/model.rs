//! Records flowing through the generation pipeline.
//!
//! Descriptors come in, component definitions and model definitions go out
//! to disk, and one [`SummaryRow`] per unit goes to the ledger.

use serde::{Deserialize, Serialize};

/// Category assigned to every model that does not carry one.
pub const DEFAULT_CATEGORY: &str = "Uncategorized";

/// Version used when a source does not expose one.
pub const DEFAULT_VERSION: &str = "latest";

/// One row of the external package catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDescriptor {
    /// Package source type, e.g. `artifacthub` or `github`
    pub registrant: String,

    /// Where the registrant finds the package
    pub source_url: String,

    /// Model the generated components are grouped under
    pub model_name: String,

    /// Whether the generated model is published (`enabled`) or kept hidden
    pub publish: bool,
}

impl PackageDescriptor {
    pub fn new(
        registrant: impl Into<String>,
        source_url: impl Into<String>,
        model_name: impl Into<String>,
        publish: bool,
    ) -> Self {
        Self {
            registrant: registrant.into(),
            source_url: source_url.into(),
            model_name: model_name.into(),
            publish,
        }
    }
}

/// Model-level metadata stamped onto every generated component.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMetadata {
    pub name: String,
    pub version: String,
    pub category: String,
    pub registrant: String,
    pub source_uri: String,
}

/// Normalized component record.
///
/// Only `kind`, `api_version` and the model name/version matter to the
/// pipeline; the schema is carried through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentDefinition {
    pub kind: String,

    #[serde(rename = "apiVersion")]
    pub api_version: String,

    /// OpenAPI v3 schema of the resource, as JSON
    pub schema: serde_json::Value,

    pub model: ModelMetadata,
}

impl ComponentDefinition {
    /// Identity used to deduplicate components across workers.
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey::new(
            &self.kind,
            &self.api_version,
            &self.model.name,
            &self.model.version,
        )
    }
}

/// `kind + apiVersion + modelName + modelVersion`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DedupKey(String);

impl DedupKey {
    pub fn new(kind: &str, api_version: &str, model_name: &str, model_version: &str) -> Self {
        Self(format!("{kind}{api_version}{model_name}{model_version}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DedupKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Publication status written into the model definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    Enabled,
    Ignored,
}

impl From<bool> for ModelStatus {
    fn from(publish: bool) -> Self {
        if publish {
            ModelStatus::Enabled
        } else {
            ModelStatus::Ignored
        }
    }
}

/// Model definition written once per successful unit as `model.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDefinition {
    pub name: String,
    pub version: String,
    pub category: String,
    pub registrant: String,
    pub source_uri: String,
    pub status: ModelStatus,
    pub components_count: usize,
}

/// One ledger row summarising a finished unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub model: String,
    pub registrant: String,
    pub version: String,
    pub source_url: String,
    pub component_count: usize,
    pub kinds: Vec<String>,
    pub published: bool,
}
