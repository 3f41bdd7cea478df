//! Ledger of generated models.
//!
//! Rows go to a local CSV file and, through a bounded queue, to a batching
//! updater task that appends them to a remote spreadsheet-like service. The
//! remote side is slow and rate limited, so workers only ever wait on the
//! queue, never on the remote call.

use async_trait::async_trait;
use reqwest::Client;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::model::SummaryRow;

/// Fixed column layout shared by the local file and the remote ledger.
pub const LEDGER_COLUMNS: [(&str, usize); 7] = [
    ("model", 0),
    ("registrant", 1),
    ("version", 2),
    ("source_url", 3),
    ("components", 4),
    ("kinds", 5),
    ("published", 6),
];

pub fn column_index(name: &str) -> Option<usize> {
    LEDGER_COLUMNS
        .iter()
        .find(|(column, _)| *column == name)
        .map(|(_, index)| *index)
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Ledger endpoint answered {0}")]
    Status(reqwest::StatusCode),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SummaryRow {
    fn field(&self, column: &str) -> String {
        match column {
            "model" => self.model.clone(),
            "registrant" => self.registrant.clone(),
            "version" => self.version.clone(),
            "source_url" => self.source_url.clone(),
            "components" => self.component_count.to_string(),
            "kinds" => self.kinds.join(","),
            "published" => self.published.to_string(),
            _ => String::new(),
        }
    }

    /// Cells laid out by [`LEDGER_COLUMNS`].
    pub fn to_record(&self) -> Vec<String> {
        let mut record = vec![String::new(); LEDGER_COLUMNS.len()];
        for (column, index) in LEDGER_COLUMNS {
            record[index] = self.field(column);
        }
        record
    }
}

fn header() -> Vec<&'static str> {
    let mut header = vec![""; LEDGER_COLUMNS.len()];
    for (column, index) in LEDGER_COLUMNS {
        header[index] = column;
    }
    header
}

// ============================================================================
// Local Ledger
// ============================================================================

/// Append-only CSV ledger; a header is written when the file is new.
#[derive(Debug)]
pub struct LocalLedger {
    path: PathBuf,
    lock: Mutex<()>,
}

impl LocalLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, row: &SummaryRow) -> Result<(), LedgerError> {
        let _guard = self.lock.lock().await;

        let is_new = match tokio::fs::metadata(&self.path).await {
            Ok(meta) => meta.len() == 0,
            Err(_) => true,
        };

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        if is_new {
            writer.write_record(header())?;
        }
        writer.write_record(row.to_record())?;
        let bytes = writer
            .into_inner()
            .map_err(|e| LedgerError::Io(e.into_error()))?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&bytes).await?;
        file.flush().await?;
        Ok(())
    }
}

// ============================================================================
// Remote Ledger
// ============================================================================

#[async_trait]
pub trait RemoteLedger: Send + Sync {
    /// Appends a batch of rows in one call.
    async fn append(&self, rows: Vec<Vec<String>>) -> Result<(), LedgerError>;
}

/// Posts `{"values": [[...], ...]}` to an append endpoint.
pub struct HttpLedger {
    client: Client,
    endpoint: String,
}

impl HttpLedger {
    pub fn new(client: Client, endpoint: impl Into<String>) -> Self {
        Self {
            client,
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl RemoteLedger for HttpLedger {
    async fn append(&self, rows: Vec<Vec<String>>) -> Result<(), LedgerError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({ "values": rows }))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(LedgerError::Status(response.status()));
        }
        Ok(())
    }
}

// ============================================================================
// Batching Updater
// ============================================================================

pub struct LedgerUpdater;

impl LedgerUpdater {
    /// Starts the updater task.
    ///
    /// The task batches up to `batch_size` rows per remote append and flushes
    /// whatever is left once every sender has been dropped. It resolves to
    /// the number of rows successfully appended.
    pub fn spawn(
        remote: Arc<dyn RemoteLedger>,
        batch_size: usize,
        queue_capacity: usize,
    ) -> (mpsc::Sender<SummaryRow>, JoinHandle<usize>) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let handle = tokio::spawn(run_updater(rx, remote, batch_size.max(1)));
        (tx, handle)
    }
}

async fn run_updater(
    mut rx: mpsc::Receiver<SummaryRow>,
    remote: Arc<dyn RemoteLedger>,
    batch_size: usize,
) -> usize {
    let mut batch = Vec::with_capacity(batch_size);
    let mut appended = 0;

    while let Some(row) = rx.recv().await {
        batch.push(row.to_record());
        if batch.len() >= batch_size {
            appended += flush(remote.as_ref(), std::mem::take(&mut batch)).await;
        }
    }
    if !batch.is_empty() {
        appended += flush(remote.as_ref(), batch).await;
    }

    info!(rows = appended, "Ledger updater finished");
    appended
}

async fn flush(remote: &dyn RemoteLedger, rows: Vec<Vec<String>>) -> usize {
    let count = rows.len();
    match remote.append(rows).await {
        Ok(()) => {
            debug!(rows = count, "Ledger batch appended");
            count
        }
        Err(e) => {
            warn!(rows = count, error = %e, "Ledger batch dropped");
            0
        }
    }
}
