//! Run driver.
//!
//! [`Generator`] takes descriptors through admission control (or through
//! sequential stages), runs every unit under its own deadline and folds
//! the per-unit outcomes into a [`RunSummary`].
//!
//! A unit is: resolve registrant, fetch package, generate components,
//! deduplicate, persist, record a ledger row. Whatever happens inside one
//! unit, the run keeps going.

use reqwest::Client;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::context::RunContext;
use super::ledger::{HttpLedger, LedgerUpdater};
use super::progress::ProgressSnapshot;
use super::stages::{run_stages, Stage};
use crate::config::GeneratorConfig;
use crate::executor::AdmissionController;
use crate::model::{PackageDescriptor, SummaryRow};
use crate::registrants::RegistrantRegistry;
use crate::traits::GenerationError;

// ============================================================================
// Outcomes
// ============================================================================

#[derive(Debug)]
pub enum UnitOutcome {
    /// Components written for this unit
    Generated { components: usize },

    /// Nothing new to write: no components, or all of them seen before
    Skipped,

    Failed(GenerationError),
}

#[derive(Debug)]
pub struct UnitFailure {
    pub unit: String,
    pub error: GenerationError,
}

/// Aggregate result of one run.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub models: usize,
    pub components: usize,
    pub skipped: usize,
    pub failures: Vec<UnitFailure>,
    pub progress: ProgressSnapshot,
}

impl RunSummary {
    fn fold(outcomes: Vec<(String, UnitOutcome)>, progress: ProgressSnapshot) -> Self {
        let mut summary = RunSummary {
            progress,
            ..Default::default()
        };
        for (unit, outcome) in outcomes {
            match outcome {
                UnitOutcome::Generated { components } => {
                    summary.models += 1;
                    summary.components += components;
                }
                UnitOutcome::Skipped => summary.skipped += 1,
                UnitOutcome::Failed(error) => summary.failures.push(UnitFailure { unit, error }),
            }
        }
        summary
    }
}

// ============================================================================
// Generator
// ============================================================================

pub struct Generator {
    context: Arc<RunContext>,
    admission: AdmissionController,
}

impl Generator {
    /// `admission_capacity` bounds the units in flight during [`Generator::run`].
    pub fn new(context: RunContext, admission_capacity: usize) -> Self {
        Self {
            context: Arc::new(context),
            admission: AdmissionController::new(admission_capacity),
        }
    }

    /// Generator wired from file config.
    ///
    /// When `ledger.endpoint` is set a [`LedgerUpdater`] posting through
    /// `http` is started; its handle resolves to the rows appended once the
    /// generator has finished its run. Must be called inside a Tokio runtime.
    pub fn from_config(
        config: &GeneratorConfig,
        registry: RegistrantRegistry,
        http: Client,
        total: usize,
    ) -> (Self, Option<JoinHandle<usize>>) {
        let mut builder = RunContext::builder_from_config(registry, config).total(total);

        let mut updater = None;
        if let Some(endpoint) = &config.ledger.endpoint {
            let remote = Arc::new(HttpLedger::new(http, endpoint.as_str()));
            let (tx, handle) = LedgerUpdater::spawn(
                remote,
                config.ledger.batch_size,
                config.ledger.queue_capacity,
            );
            builder = builder.ledger_queue(tx);
            updater = Some(handle);
        }

        (Self::new(builder.build(), config.admission_capacity), updater)
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    pub fn admission_capacity(&self) -> usize {
        self.admission.capacity()
    }

    /// Runs every descriptor under admission control.
    ///
    /// Once `cancel` fires, no further unit is admitted; admitted units run
    /// to completion and are part of the summary.
    pub async fn run(
        self,
        descriptors: Vec<PackageDescriptor>,
        cancel: &CancellationToken,
    ) -> RunSummary {
        info!(
            units = descriptors.len(),
            capacity = self.admission.capacity(),
            timeout = ?self.context.options.model_timeout(),
            "Generation run started"
        );

        let mut tasks = JoinSet::new();
        for descriptor in descriptors {
            let unit = execute_unit(self.context.clone(), descriptor);
            if let Err(e) = self.admission.submit(&mut tasks, cancel, unit).await {
                warn!(error = %e, "Admission stopped, no new units scheduled");
                break;
            }
        }

        let mut outcomes = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) => error!(error = %e, "Unit task aborted"),
            }
        }

        self.finish(outcomes)
    }

    /// Runs stages in order with a barrier between them.
    pub async fn run_staged(self, stages: Vec<Stage<PackageDescriptor>>) -> RunSummary {
        info!(stages = stages.len(), "Staged generation run started");

        let collected = Arc::new(Mutex::new(Vec::new()));
        let context = self.context.clone();
        let collector = collected.clone();
        let reports = run_stages(stages, move |descriptor| {
            let context = context.clone();
            let collector = collector.clone();
            async move {
                let outcome = execute_unit(context, descriptor).await;
                collector
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(outcome);
            }
        })
        .await;

        for report in &reports {
            debug!(stage = %report.name, items = report.items, "Stage report");
        }

        let outcomes = std::mem::take(
            &mut *collected
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        self.finish(outcomes)
    }

    fn finish(self, outcomes: Vec<(String, UnitOutcome)>) -> RunSummary {
        let summary = RunSummary::fold(outcomes, self.context.progress.snapshot());
        info!(
            failures = summary.failures.len(),
            skipped = summary.skipped,
            "{} models, {} components generated",
            summary.models,
            summary.components
        );
        summary
    }
}

// ============================================================================
// Unit Execution
// ============================================================================

/// Runs one unit under its deadline and records the outcome.
///
/// The work runs in its own task: a deadline aborts only that task, and a
/// panic inside a backend surfaces as [`GenerationError::Panicked`].
async fn execute_unit(
    context: Arc<RunContext>,
    descriptor: PackageDescriptor,
) -> (String, UnitOutcome) {
    let unit = descriptor.model_name.clone();
    let registrant = descriptor.registrant.clone();
    let timeout = context.options.model_timeout();
    let start = Instant::now();

    let mut work = tokio::spawn(generate_and_persist(context.clone(), descriptor));
    let result = match tokio::time::timeout(timeout, &mut work).await {
        Ok(Ok(result)) => result,
        Ok(Err(_)) => Err(GenerationError::Panicked(unit.clone())),
        Err(_) => {
            work.abort();
            Err(GenerationError::Timeout {
                unit: unit.clone(),
                timeout,
            })
        }
    };

    let duration_ms = start.elapsed().as_millis() as u64;
    let progress = &context.progress;
    let outcome = match result {
        Ok(0) => {
            progress.increment_skipped();
            info!(model = %unit, %registrant, duration_ms, "No new components, unit skipped");
            UnitOutcome::Skipped
        }
        Ok(components) => {
            progress.increment_success();
            info!(model = %unit, %registrant, components, duration_ms, "Model generated");
            UnitOutcome::Generated { components }
        }
        Err(e) => {
            progress.increment_failure();
            warn!(model = %unit, %registrant, duration_ms, error = %e, "Unit failed");
            UnitOutcome::Failed(e)
        }
    };

    let index = progress.increment_processed();
    notify_progress(&context, &unit, index);
    (unit, outcome)
}

async fn generate_and_persist(
    context: Arc<RunContext>,
    descriptor: PackageDescriptor,
) -> Result<usize, GenerationError> {
    let mut generated = context.worker.generate(&descriptor).await?;

    // Claimed keys go back to the store if this future errors or is aborted.
    let (reservation, duplicates) = context
        .dedup
        .reserve(std::mem::take(&mut generated.components));
    if duplicates > 0 {
        debug!(model = %descriptor.model_name, duplicates, "Duplicate components dropped");
    }
    if reservation.is_empty() {
        return Ok(0);
    }

    let definition = generated.definition(reservation.components().len());
    context
        .sink
        .persist(&definition, reservation.components())
        .await?;
    let components = reservation.commit();

    let row = SummaryRow {
        model: definition.name,
        registrant: definition.registrant,
        version: definition.version,
        source_url: descriptor.source_url,
        component_count: components.len(),
        kinds: components.iter().map(|c| c.kind.clone()).collect(),
        published: descriptor.publish,
    };
    context.sink.record(row).await;

    Ok(components.len())
}

fn notify_progress(context: &RunContext, unit: &str, index: i64) {
    let Some(callback) = &context.options.progress_callback else {
        return;
    };
    let index = usize::try_from(index).unwrap_or_default();
    let total = usize::try_from(context.progress.total()).unwrap_or_default();

    if catch_unwind(AssertUnwindSafe(|| callback(unit, index, total))).is_err() {
        warn!(model = %unit, "Progress callback panicked");
    }
}
