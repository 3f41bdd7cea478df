//! CustomResourceDefinition extraction from raw YAML manifests.
//!
//! Only the identity fields and the OpenAPI schema are read. A document that
//! is not valid YAML, or a CRD missing its names/group/versions, is counted
//! as skipped and the rest of the manifest is still processed.

use serde_json::Value;
use tracing::debug;

use crate::model::{ComponentDefinition, ModelMetadata};
use crate::traits::GeneratedComponents;

const CRD_KIND: &str = "CustomResourceDefinition";

/// Extracts one component per CRD found across `manifests`.
pub fn extract_components(manifests: &[String], group: &str) -> GeneratedComponents {
    let mut generated = GeneratedComponents::default();

    for document in manifests.iter().flat_map(|m| split_documents(m)) {
        let parsed: Value = match serde_yaml::from_str::<serde_yaml::Value>(document)
            .map_err(|e| e.to_string())
            .and_then(|yaml| serde_json::to_value(yaml).map_err(|e| e.to_string()))
        {
            Ok(value) => value,
            Err(e) => {
                debug!(error = %e, "Skipping unparseable manifest document");
                generated.skipped += 1;
                continue;
            }
        };

        if parsed.get("kind").and_then(Value::as_str) != Some(CRD_KIND) {
            continue;
        }

        match component_from_crd(&parsed, group) {
            Some(component) => generated.components.push(component),
            None => {
                debug!("Skipping CRD without names, group or versions");
                generated.skipped += 1;
            }
        }
    }

    generated
}

/// Splits a multi-document YAML stream on `---` separator lines.
fn split_documents(manifest: &str) -> Vec<&str> {
    let mut documents = Vec::new();
    let mut start = 0;
    let mut offset = 0;

    for line in manifest.split_inclusive('\n') {
        if line.trim_end() == "---" || line.starts_with("--- ") {
            documents.push(&manifest[start..offset]);
            start = offset + line.len();
        }
        offset += line.len();
    }
    documents.push(&manifest[start..]);

    documents
        .into_iter()
        .filter(|doc| {
            doc.lines()
                .any(|l| !l.trim().is_empty() && !l.trim_start().starts_with('#'))
        })
        .collect()
}

fn component_from_crd(crd: &Value, group: &str) -> Option<ComponentDefinition> {
    let spec = crd.get("spec")?;
    let kind = spec.pointer("/names/kind").and_then(Value::as_str)?;
    let api_group = spec.get("group").and_then(Value::as_str)?;

    let (version, schema) = match spec.get("versions").and_then(Value::as_array) {
        Some(versions) if !versions.is_empty() => {
            let chosen = versions
                .iter()
                .find(|v| v.get("storage").and_then(Value::as_bool) == Some(true))
                .or_else(|| {
                    versions
                        .iter()
                        .rev()
                        .find(|v| v.get("served").and_then(Value::as_bool) != Some(false))
                })?;
            let name = chosen.get("name").and_then(Value::as_str)?;
            let schema = chosen
                .pointer("/schema/openAPIV3Schema")
                .or_else(|| spec.pointer("/validation/openAPIV3Schema"));
            (name, schema)
        }
        // apiextensions.k8s.io/v1beta1 single-version form
        _ => (
            spec.get("version").and_then(Value::as_str)?,
            spec.pointer("/validation/openAPIV3Schema"),
        ),
    };

    Some(ComponentDefinition {
        kind: kind.to_string(),
        api_version: format!("{api_group}/{version}"),
        schema: schema.cloned().unwrap_or_else(|| Value::Object(Default::default())),
        model: ModelMetadata {
            name: group.to_string(),
            ..Default::default()
        },
    })
}
