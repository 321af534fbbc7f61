use crossbeam_channel::bounded;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

/// Sentinel-capable queue message. Exactly one `Stop` per worker is enqueued
/// once the producer is exhausted.
enum Task {
    Job(u64),
    Stop,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct PoolStats {
    pub processed: usize,
    pub failed: usize,
}

pub fn default_workers(configured: usize) -> usize {
    if configured > 0 {
        return configured;
    }
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(2);
    (cpus / 2).max(2)
}

/// Bounded producer/consumer pool. The producer blocks when the queue is
/// full, throttling job intake to worker throughput; each worker processes
/// strictly one job at a time and stops on its poison pill. `handler`
/// returns whether the job succeeded.
pub fn run_pool<I, F>(ids: I, workers: usize, capacity: usize, handler: F) -> PoolStats
where
    I: IntoIterator<Item = u64>,
    F: Fn(u64) -> bool + Send + Sync,
{
    let workers = workers.max(1);
    let (tx, rx) = bounded::<Task>(capacity.max(1));
    let processed = AtomicUsize::new(0);
    let failed = AtomicUsize::new(0);

    std::thread::scope(|scope| {
        for worker_id in 0..workers {
            let rx = rx.clone();
            let handler = &handler;
            let processed = &processed;
            let failed = &failed;
            scope.spawn(move || {
                loop {
                    match rx.recv() {
                        Ok(Task::Job(doc_id)) => {
                            debug!("worker {worker_id} took doc_id={doc_id}");
                            if handler(doc_id) {
                                processed.fetch_add(1, Ordering::Relaxed);
                            } else {
                                failed.fetch_add(1, Ordering::Relaxed);
                            }
                        }
                        Ok(Task::Stop) | Err(_) => break,
                    }
                }
                debug!("worker {worker_id} stopped");
            });
        }

        for doc_id in ids {
            info!("queued doc_id={doc_id}");
            if tx.send(Task::Job(doc_id)).is_err() {
                break;
            }
        }
        for _ in 0..workers {
            let _ = tx.send(Task::Stop);
        }
    });

    PoolStats {
        processed: processed.load(Ordering::Relaxed),
        failed: failed.load(Ordering::Relaxed),
    }
}
