//! Per-run state shared by every unit.
//!
//! A [`RunContext`] is built once per invocation and handed to the
//! [`Generator`](super::Generator). Nothing in it is process-global, so two
//! runs in the same process never see each other's counters or dedup keys.

use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::dedup::DedupStore;
use super::ledger::LocalLedger;
use super::progress::ProgressTracker;
use super::sink::{ArtifactWriter, PersistenceSink};
use super::worker::GenerationWorker;
use crate::config::{GenerationOptions, GeneratorConfig};
use crate::model::SummaryRow;
use crate::registrants::RegistrantRegistry;

pub struct RunContext {
    pub(crate) options: GenerationOptions,
    pub(crate) progress: Arc<ProgressTracker>,
    pub(crate) dedup: DedupStore,
    pub(crate) worker: GenerationWorker,
    pub(crate) sink: PersistenceSink,
}

impl RunContext {
    pub fn builder(registry: RegistrantRegistry, output_dir: impl Into<PathBuf>) -> RunContextBuilder {
        RunContextBuilder {
            registry: Arc::new(registry),
            output_dir: output_dir.into(),
            options: GenerationOptions::default(),
            total: 0,
            local_ledger: None,
            ledger_tx: None,
        }
    }

    /// Builder seeded from file config: output tree, local ledger and options.
    pub fn builder_from_config(
        registry: RegistrantRegistry,
        config: &GeneratorConfig,
    ) -> RunContextBuilder {
        let mut builder =
            Self::builder(registry, &config.output_dir).options(config.generation_options());
        if let Some(path) = &config.ledger_file {
            builder = builder.local_ledger(path);
        }
        builder
    }

    pub fn options(&self) -> &GenerationOptions {
        &self.options
    }

    pub fn progress(&self) -> Arc<ProgressTracker> {
        self.progress.clone()
    }

    pub fn dedup(&self) -> &DedupStore {
        &self.dedup
    }

    pub fn sink(&self) -> &PersistenceSink {
        &self.sink
    }
}

pub struct RunContextBuilder {
    registry: Arc<RegistrantRegistry>,
    output_dir: PathBuf,
    options: GenerationOptions,
    total: usize,
    local_ledger: Option<PathBuf>,
    ledger_tx: Option<mpsc::Sender<SummaryRow>>,
}

impl RunContextBuilder {
    pub fn options(mut self, options: GenerationOptions) -> Self {
        self.options = options;
        self
    }

    /// Declared number of units, reported by the progress tracker.
    pub fn total(mut self, total: usize) -> Self {
        self.total = total;
        self
    }

    pub fn local_ledger(mut self, path: impl Into<PathBuf>) -> Self {
        self.local_ledger = Some(path.into());
        self
    }

    /// Sender side of a [`LedgerUpdater`](super::ledger::LedgerUpdater) queue.
    pub fn ledger_queue(mut self, tx: mpsc::Sender<SummaryRow>) -> Self {
        self.ledger_tx = Some(tx);
        self
    }

    pub fn build(self) -> RunContext {
        let mut sink = PersistenceSink::new(ArtifactWriter::new(self.output_dir));
        if let Some(path) = self.local_ledger {
            sink = sink.with_local_ledger(LocalLedger::new(path));
        }
        if let Some(tx) = self.ledger_tx {
            sink = sink.with_ledger_queue(tx);
        }

        RunContext {
            worker: GenerationWorker::new(self.registry, self.options.latest_version_only),
            options: self.options,
            progress: Arc::new(ProgressTracker::new(self.total)),
            dedup: DedupStore::new(),
            sink,
        }
    }
}
