//! Generation pipeline.
//!
//! - [`context`]: per-run state ([`RunContext`])
//! - [`worker`]: one descriptor to tagged components
//! - [`dedup`]: run-wide component deduplication
//! - [`progress`]: run-wide counters
//! - [`sink`]: artifact tree and ledger outlets
//! - [`ledger`]: local CSV and batched remote ledger
//! - [`stages`]: staged execution with barriers
//! - [`pipeline`]: the [`Generator`] tying it all together

pub mod context;
pub mod dedup;
pub mod ledger;
pub mod pipeline;
pub mod progress;
pub mod sink;
pub mod stages;
pub mod worker;

pub use context::{RunContext, RunContextBuilder};
pub use dedup::{DedupReservation, DedupStore};
pub use ledger::{
    column_index, HttpLedger, LedgerError, LedgerUpdater, LocalLedger, RemoteLedger,
    LEDGER_COLUMNS,
};
pub use pipeline::{Generator, RunSummary, UnitFailure, UnitOutcome};
pub use progress::{ProgressSnapshot, ProgressTracker};
pub use sink::{ArtifactWriter, PersistenceSink};
pub use stages::{run_stages, Stage, StageReport};
pub use worker::{GeneratedModel, GenerationWorker};
