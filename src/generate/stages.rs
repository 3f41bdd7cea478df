//! Staged execution with a strict barrier between stages.
//!
//! Each stage feeds its items in fixed-size chunks through a bounded channel
//! to a pool of workers. The next stage starts only after every worker of
//! the current one has returned. Inside a stage no ordering is guaranteed.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tracing::{info, warn};

/// One sequential phase of a staged run.
#[derive(Debug, Clone)]
pub struct Stage<T> {
    name: String,
    items: Vec<T>,
    chunk_size: usize,
    workers: usize,
}

impl<T> Stage<T> {
    /// Zero `chunk_size` or `workers` is raised to one.
    pub fn new(name: impl Into<String>, items: Vec<T>, chunk_size: usize, workers: usize) -> Self {
        Self {
            name: name.into(),
            items,
            chunk_size: chunk_size.max(1),
            workers: workers.max(1),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }
}

/// What happened in one finished stage.
#[derive(Debug, Clone)]
pub struct StageReport {
    pub name: String,
    pub items: usize,
    /// Items whose handler panicked
    pub panicked: usize,
    pub duration: Duration,
}

/// Runs `stages` in order, calling `handler` once per item.
///
/// Every item runs in its own task so a panicking handler only loses that
/// item; the worker moves on to the next one.
pub async fn run_stages<T, F, Fut>(stages: Vec<Stage<T>>, handler: F) -> Vec<StageReport>
where
    T: Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let handler = Arc::new(handler);
    let mut reports = Vec::with_capacity(stages.len());

    for stage in stages {
        let start = Instant::now();
        let Stage {
            name,
            items,
            chunk_size,
            workers,
        } = stage;
        let item_count = items.len();
        info!(stage = %name, items = item_count, workers, chunk_size, "Stage started");

        let (tx, rx) = mpsc::channel::<Vec<T>>(workers);
        let producer = tokio::spawn(async move {
            let mut items = items.into_iter();
            loop {
                let chunk: Vec<T> = items.by_ref().take(chunk_size).collect();
                if chunk.is_empty() || tx.send(chunk).await.is_err() {
                    break;
                }
            }
        });

        let rx = Arc::new(Mutex::new(rx));
        let mut pool = JoinSet::new();
        for _ in 0..workers {
            let rx = rx.clone();
            let handler = handler.clone();
            pool.spawn(async move {
                let mut panicked = 0usize;
                loop {
                    let chunk = rx.lock().await.recv().await;
                    let Some(chunk) = chunk else { break };
                    for item in chunk {
                        if tokio::spawn(handler(item)).await.is_err() {
                            panicked += 1;
                        }
                    }
                }
                panicked
            });
        }

        let mut panicked = 0;
        while let Some(joined) = pool.join_next().await {
            match joined {
                Ok(count) => panicked += count,
                Err(e) => warn!(stage = %name, error = %e, "Stage worker aborted"),
            }
        }
        if let Err(e) = producer.await {
            warn!(stage = %name, error = %e, "Chunk producer aborted");
        }

        let duration = start.elapsed();
        if panicked > 0 {
            warn!(stage = %name, panicked, "Units panicked during stage");
        }
        info!(
            stage = %name,
            items = item_count,
            duration_ms = duration.as_millis() as u64,
            "Stage finished"
        );
        reports.push(StageReport {
            name,
            items: item_count,
            panicked,
            duration,
        });
    }

    reports
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_next_stage_waits_for_every_worker() {
        let a_done = Arc::new(AtomicUsize::new(0));
        let b_started = Arc::new(AtomicUsize::new(0));
        let seen_by_b = Arc::new(std::sync::Mutex::new(Vec::new()));

        let stages = vec![
            Stage::new("a", (0..5).map(|i| ('a', i)).collect(), 1, 5),
            Stage::new("b", (0..5).map(|i| ('b', i)).collect(), 2, 3),
        ];

        let (done, started, seen) = (a_done.clone(), b_started.clone(), seen_by_b.clone());
        let reports = run_stages(stages, move |(stage, i): (char, u64)| {
            let (done, started, seen) = (done.clone(), started.clone(), seen.clone());
            async move {
                if stage == 'a' {
                    // Uneven durations so the workers finish at different times.
                    tokio::time::sleep(Duration::from_millis(10 * (5 - i))).await;
                    done.fetch_add(1, Ordering::SeqCst);
                } else {
                    seen.lock().unwrap().push(done.load(Ordering::SeqCst));
                    started.fetch_add(1, Ordering::SeqCst);
                }
            }
        })
        .await;

        assert_eq!(b_started.load(Ordering::SeqCst), 5);
        assert!(seen_by_b.lock().unwrap().iter().all(|&n| n == 5));
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].items, 5);
    }

    #[tokio::test]
    async fn test_every_item_handled_once_across_chunks() {
        let handled = Arc::new(std::sync::Mutex::new(Vec::new()));
        let sink = handled.clone();
        run_stages(
            vec![Stage::new("only", (0..123).collect::<Vec<u32>>(), 50, 9)],
            move |i| {
                let sink = sink.clone();
                async move { sink.lock().unwrap().push(i) }
            },
        )
        .await;

        let mut handled = handled.lock().unwrap().clone();
        handled.sort_unstable();
        assert_eq!(handled, (0..123).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_panicking_item_does_not_stop_stage() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let reports = run_stages(
            vec![Stage::new("p", (0..10).collect::<Vec<u32>>(), 3, 2)],
            move |i| {
                let counter = counter.clone();
                async move {
                    if i == 4 {
                        panic!("bad unit");
                    }
                    counter.fetch_add(1, Ordering::SeqCst);
                }
            },
        )
        .await;

        assert_eq!(count.load(Ordering::SeqCst), 9);
        assert_eq!(reports[0].panicked, 1);
    }
}
