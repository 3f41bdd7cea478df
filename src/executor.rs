//! Admission control for generation units.
//!
//! A fixed-capacity semaphore bounds how many units are in flight. The permit
//! travels into the spawned task and is released when the task ends, whether
//! it returned, failed, or panicked.

use std::future::Future;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum AdmissionError {
    /// The run was canceled (or the controller closed) while waiting for a permit.
    #[error("Admission canceled: run is shutting down")]
    Canceled,
}

pub struct AdmissionController {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl AdmissionController {
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Permits not currently held by a unit.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Waits for a permit, then spawns `unit` onto `tasks`.
    ///
    /// Fails only when `cancel` fires or the controller is closed before a
    /// permit is granted; already admitted units are unaffected.
    #[instrument(skip_all)]
    pub async fn submit<F>(
        &self,
        tasks: &mut JoinSet<F::Output>,
        cancel: &CancellationToken,
        unit: F,
    ) -> Result<(), AdmissionError>
    where
        F: Future + Send + 'static,
        F::Output: Send + 'static,
    {
        if cancel.is_cancelled() {
            return Err(AdmissionError::Canceled);
        }

        let permit = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(AdmissionError::Canceled),
            permit = self.semaphore.clone().acquire_owned() => {
                permit.map_err(|_| AdmissionError::Canceled)?
            }
        };

        debug!(available = self.available(), "Unit admitted");

        tasks.spawn(async move {
            let _permit = permit;
            unit.await
        });
        Ok(())
    }

    /// Stops granting permits. Pending and future `submit` calls fail.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_in_flight_never_exceeds_capacity() {
        let controller = AdmissionController::new(20);
        let cancel = CancellationToken::new();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let mut tasks = JoinSet::new();

        for _ in 0..100 {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            controller
                .submit(&mut tasks, &cancel, async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                })
                .await
                .unwrap();
        }
        while tasks.join_next().await.is_some() {}

        assert!(peak.load(Ordering::SeqCst) <= 20);
        assert!(peak.load(Ordering::SeqCst) > 1);
        assert_eq!(controller.available(), 20);
    }

    #[tokio::test]
    async fn test_permit_released_after_panic() {
        let controller = AdmissionController::new(1);
        let cancel = CancellationToken::new();
        let mut tasks = JoinSet::new();

        controller
            .submit(&mut tasks, &cancel, async {
                if true {
                    panic!("unit blew up");
                }
                0
            })
            .await
            .unwrap();
        let joined = tasks.join_next().await.unwrap();
        assert!(joined.is_err());

        // Capacity is back, so a second unit is admitted immediately.
        controller
            .submit(&mut tasks, &cancel, async { 7 })
            .await
            .unwrap();
        assert_eq!(tasks.join_next().await.unwrap().unwrap(), 7);
    }

    #[tokio::test]
    async fn test_cancel_stops_new_admissions_only() {
        let controller = AdmissionController::new(1);
        let cancel = CancellationToken::new();
        let finished = Arc::new(AtomicUsize::new(0));
        let mut tasks = JoinSet::new();

        let done = finished.clone();
        controller
            .submit(&mut tasks, &cancel, async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                done.fetch_add(1, Ordering::SeqCst);
            })
            .await
            .unwrap();

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        // Blocks on the single permit until the token fires.
        let result = controller.submit(&mut tasks, &cancel, async {}).await;
        assert_eq!(result, Err(AdmissionError::Canceled));

        // The admitted unit still runs to completion.
        while tasks.join_next().await.is_some() {}
        assert_eq!(finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_closed_controller_rejects() {
        let controller = AdmissionController::new(2);
        controller.close();
        let mut tasks: JoinSet<()> = JoinSet::new();
        let result = controller
            .submit(&mut tasks, &CancellationToken::new(), async {})
            .await;
        assert_eq!(result, Err(AdmissionError::Canceled));
    }
}
