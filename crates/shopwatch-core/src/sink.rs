use crate::model::MetricsSnapshot;
use crate::store::CheckpointStore;
use crate::Metrics;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Buffers incoming snapshots and hands the whole buffer to a single writer
/// task on a fixed interval. An empty buffer skips the tick. Accumulation
/// never waits on a write: taken buffers queue up for the writer, which
/// appends them strictly one at a time — rows reach the checkpoint in
/// classification order and the header-if-empty check never races another
/// append. A failed append drops its batch: the snapshots are neither
/// retried nor re-buffered.
///
/// There is no shutdown flush; snapshots accumulated since the last tick are
/// lost when the process exits.
pub(crate) fn spawn_flush_task(
    store: CheckpointStore,
    flush_interval: Duration,
    metrics: Arc<Metrics>,
    mut rx: mpsc::Receiver<MetricsSnapshot>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let (batch_tx, batch_rx) = mpsc::unbounded_channel::<Vec<MetricsSnapshot>>();
        let writer = spawn_writer_task(store, metrics, batch_rx);

        let mut pending = Vec::<MetricsSnapshot>::new();
        let mut flush_tick = tokio::time::interval(flush_interval);

        loop {
            tokio::select! {
                maybe_snapshot = rx.recv() => {
                    match maybe_snapshot {
                        Some(snapshot) => pending.push(snapshot),
                        None => break,
                    }
                }
                _ = flush_tick.tick() => {
                    if pending.is_empty() {
                        continue;
                    }
                    if batch_tx.send(std::mem::take(&mut pending)).is_err() {
                        break;
                    }
                }
            }
        }

        drop(batch_tx);
        let _ = writer.await;
    })
}

/// Sole writer of the checkpoint file: drains queued batches in arrival
/// order, each append on the blocking pool, never more than one in flight.
fn spawn_writer_task(
    store: CheckpointStore,
    metrics: Arc<Metrics>,
    mut rx: mpsc::UnboundedReceiver<Vec<MetricsSnapshot>>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(batch) = rx.recv().await {
            let store = store.clone();
            let metrics = metrics.clone();
            let write = tokio::task::spawn_blocking(move || {
                match store.append(&batch) {
                    Ok(()) => {
                        metrics
                            .snapshots_flushed
                            .fetch_add(batch.len() as u64, Ordering::Relaxed);
                        debug!(
                            "flushed {} snapshots to {}",
                            batch.len(),
                            store.path().display()
                        );
                    }
                    Err(exc) => {
                        metrics.flush_failures.fetch_add(1, Ordering::Relaxed);
                        *metrics
                            .last_error
                            .lock()
                            .expect("metrics last_error mutex poisoned") = exc.to_string();
                        warn!(
                            "checkpoint append failed; dropping {} snapshots: {exc:#}",
                            batch.len()
                        );
                    }
                }
            });
            if write.await.is_err() {
                break;
            }
        }
    })
}
