//! Persistence of generated models.
//!
//! Artifacts land in a versioned tree:
//!
//! ```text
//! <root>/<model>/<version>/model.json
//! <root>/<model>/<version>/<kind>.json
//! ```
//!
//! Directories are created on demand; concurrent creation of the same
//! directory is harmless. Summary rows go to the ledger after the files.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};

use super::ledger::LocalLedger;
use crate::model::{ComponentDefinition, ModelDefinition, SummaryRow};
use crate::traits::GenerationError;

const MODEL_FILE: &str = "model.json";

/// Whether `raw` can name a file or directory directly under a parent.
///
/// Rejects empty names and anything that is not exactly one normal
/// component (separators, `..`, absolute paths).
pub fn is_path_segment(raw: &str) -> bool {
    let mut components = Path::new(raw).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    ) && !raw.contains(['/', '\\'])
}

fn path_segment(raw: &str) -> Result<&str, GenerationError> {
    if is_path_segment(raw) {
        Ok(raw)
    } else {
        Err(GenerationError::PathTraversal(raw.to_string()))
    }
}

/// Writes model and component JSON files under a root directory.
///
/// Clones share one lock around `model.json` updates, so concurrent writers
/// of the same model leave a definition whose count matches the directory.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    root: PathBuf,
    model_lock: Arc<Mutex<()>>,
}

impl ArtifactWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            model_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<model>/<version>`
    pub fn model_dir(&self, model: &str, version: &str) -> Result<PathBuf, GenerationError> {
        Ok(self
            .root
            .join(path_segment(model)?)
            .join(path_segment(version)?))
    }

    /// Writes one file per component, then the model definition, returning
    /// the model directory.
    ///
    /// Every kind is checked before anything touches the disk. The written
    /// `components_count` is the number of component files present in the
    /// directory at that point, which includes files from earlier writers.
    pub async fn write_model(
        &self,
        model: &ModelDefinition,
        components: &[ComponentDefinition],
    ) -> Result<PathBuf, GenerationError> {
        let dir = self.model_dir(&model.name, &model.version)?;
        let files = components
            .iter()
            .map(|c| Ok((dir.join(format!("{}.json", path_segment(&c.kind)?)), c)))
            .collect::<Result<Vec<_>, GenerationError>>()?;

        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| GenerationError::Persistence {
                path: dir.clone(),
                source,
            })?;
        for (file, component) in &files {
            write_json(file, component).await?;
        }

        let _guard = self.model_lock.lock().await;
        let mut definition = model.clone();
        definition.components_count = count_component_files(&dir).await?;
        write_json(&dir.join(MODEL_FILE), &definition).await?;

        debug!(
            dir = %dir.display(),
            components = components.len(),
            total = definition.components_count,
            "Model written"
        );
        Ok(dir)
    }
}

async fn count_component_files(dir: &Path) -> Result<usize, GenerationError> {
    let io_err = |source: std::io::Error| GenerationError::Persistence {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = tokio::fs::read_dir(dir).await.map_err(io_err)?;
    let mut count = 0;
    while let Some(entry) = entries.next_entry().await.map_err(io_err)? {
        let path = entry.path();
        let is_json = path.extension().and_then(|e| e.to_str()) == Some("json");
        if is_json && path.file_name().and_then(|n| n.to_str()) != Some(MODEL_FILE) {
            count += 1;
        }
    }
    Ok(count)
}

async fn write_json<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), GenerationError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| GenerationError::Persistence {
        path: path.to_path_buf(),
        source: e.into(),
    })?;
    tokio::fs::write(path, bytes)
        .await
        .map_err(|source| GenerationError::Persistence {
            path: path.to_path_buf(),
            source,
        })
}

/// Artifact writer plus the two ledger outlets.
#[derive(Debug)]
pub struct PersistenceSink {
    writer: ArtifactWriter,
    local_ledger: Option<LocalLedger>,
    ledger_tx: Option<mpsc::Sender<SummaryRow>>,
}

impl PersistenceSink {
    pub fn new(writer: ArtifactWriter) -> Self {
        Self {
            writer,
            local_ledger: None,
            ledger_tx: None,
        }
    }

    pub fn with_local_ledger(mut self, ledger: LocalLedger) -> Self {
        self.local_ledger = Some(ledger);
        self
    }

    /// Forwards rows to a [`LedgerUpdater`](super::ledger::LedgerUpdater).
    /// The updater finishes once this sink is dropped.
    pub fn with_ledger_queue(mut self, tx: mpsc::Sender<SummaryRow>) -> Self {
        self.ledger_tx = Some(tx);
        self
    }

    pub fn writer(&self) -> &ArtifactWriter {
        &self.writer
    }

    pub async fn persist(
        &self,
        model: &ModelDefinition,
        components: &[ComponentDefinition],
    ) -> Result<PathBuf, GenerationError> {
        self.writer.write_model(model, components).await
    }

    /// Records a finished unit. Ledger failures are logged, never returned.
    pub async fn record(&self, row: SummaryRow) {
        if let Some(ledger) = &self.local_ledger {
            if let Err(e) = ledger.append(&row).await {
                warn!(model = %row.model, error = %e, "Local ledger append failed");
            }
        }
        if let Some(tx) = &self.ledger_tx {
            if tx.send(row).await.is_err() {
                warn!("Ledger updater is gone, row dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModelMetadata, ModelStatus};

    fn model(name: &str, version: &str) -> ModelDefinition {
        ModelDefinition {
            name: name.to_string(),
            version: version.to_string(),
            category: "Uncategorized".to_string(),
            registrant: "github".to_string(),
            source_uri: "https://example.com".to_string(),
            status: ModelStatus::Enabled,
            components_count: 1,
        }
    }

    fn component(kind: &str) -> ComponentDefinition {
        ComponentDefinition {
            kind: kind.to_string(),
            api_version: "example.io/v1".to_string(),
            schema: serde_json::json!({"type": "object"}),
            model: ModelMetadata::default(),
        }
    }

    #[test]
    fn test_path_segment_rejects_traversal() {
        assert!(is_path_segment("Gateway"));
        assert!(!is_path_segment("a/."));
        assert!(path_segment("cert-manager").is_ok());
        assert!(path_segment("v1.14.0").is_ok());
        assert!(path_segment("..").is_err());
        assert!(path_segment("a/b").is_err());
        assert!(path_segment("/etc").is_err());
        assert!(path_segment("a\\b").is_err());
        assert!(path_segment("").is_err());
    }

    #[tokio::test]
    async fn test_write_model_layout() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path());

        let out = writer
            .write_model(&model("istio", "1.20.0"), &[component("Gateway")])
            .await
            .unwrap();

        assert_eq!(out, dir.path().join("istio").join("1.20.0"));
        let written: ModelDefinition =
            serde_json::from_slice(&std::fs::read(out.join("model.json")).unwrap()).unwrap();
        assert_eq!(written.name, "istio");
        let gateway: serde_json::Value =
            serde_json::from_slice(&std::fs::read(out.join("Gateway.json")).unwrap()).unwrap();
        assert_eq!(gateway["apiVersion"], "example.io/v1");
    }

    #[tokio::test]
    async fn test_concurrent_writes_to_same_model_dir() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ArtifactWriter::new(dir.path());

        let mut handles = Vec::new();
        for i in 0..8 {
            let writer = writer.clone();
            handles.push(tokio::spawn(async move {
                writer
                    .write_model(&model("shared", "v1"), &[component(&format!("Kind{i}"))])
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let files = std::fs::read_dir(dir.path().join("shared/v1")).unwrap().count();
        assert_eq!(files, 9);
        let written: ModelDefinition = serde_json::from_slice(
            &std::fs::read(dir.path().join("shared/v1/model.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(written.components_count, 8);
    }

    #[tokio::test]
    async fn test_bad_kind_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let err = ArtifactWriter::new(dir.path())
            .write_model(&model("m", "v1"), &[component("Good"), component("bad/kind")])
            .await
            .unwrap_err();

        assert!(matches!(err, GenerationError::PathTraversal(_)));
        assert!(!dir.path().join("m").exists());
    }

    #[tokio::test]
    async fn test_traversing_model_name_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let err = ArtifactWriter::new(dir.path())
            .write_model(&model("../escape", "v1"), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::PathTraversal(_)));
    }

    #[tokio::test]
    async fn test_record_forwards_to_queue() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, mut rx) = mpsc::channel(4);
        let sink = PersistenceSink::new(ArtifactWriter::new(dir.path()))
            .with_local_ledger(LocalLedger::new(dir.path().join("ledger.csv")))
            .with_ledger_queue(tx);

        sink.record(SummaryRow {
            model: "istio".to_string(),
            registrant: "github".to_string(),
            version: "1.20.0".to_string(),
            source_url: String::new(),
            component_count: 1,
            kinds: vec!["Gateway".to_string()],
            published: true,
        })
        .await;

        assert_eq!(rx.recv().await.unwrap().model, "istio");
        assert!(dir.path().join("ledger.csv").exists());
    }
}
