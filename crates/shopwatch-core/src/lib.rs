mod classify;
pub mod model;
mod parse;
mod sink;
pub mod store;
mod watch;

pub use classify::classify;
pub use model::{MetricsSnapshot, MetricsState};
pub use parse::{parse_line, Level, ParsedEntry};
pub use store::CheckpointStore;

use crate::sink::spawn_flush_task;
use crate::watch::spawn_tailer_thread;
use anyhow::{Context, Result};
use shopwatch_config::AppConfig;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

const LINE_BATCH_QUEUE_CAPACITY: usize = 64;
const SNAPSHOT_QUEUE_CAPACITY: usize = 1024;

/// Operational counters shared across the tailer thread and pipeline tasks.
#[derive(Default)]
pub(crate) struct Metrics {
    pub(crate) lines_emitted: AtomicU64,
    pub(crate) parse_skips: AtomicU64,
    pub(crate) entries_classified: AtomicU64,
    pub(crate) snapshots_flushed: AtomicU64,
    pub(crate) flush_failures: AtomicU64,
    pub(crate) tailer_errors: AtomicU64,
    pub(crate) last_error: Mutex<String>,
}

impl Metrics {
    pub(crate) fn record_tailer_error(&self, message: &str) {
        self.tailer_errors.fetch_add(1, Ordering::Relaxed);
        *self
            .last_error
            .lock()
            .expect("metrics last_error mutex poisoned") = message.to_string();
    }
}

/// Sole owner of `MetricsState`: drains line batches, parses and classifies
/// each line, and forwards one snapshot per classified entry to the flush
/// task. Unparseable lines are dropped without logging (counted only).
fn spawn_process_task(
    mut state: MetricsState,
    mut rx: mpsc::Receiver<Vec<String>>,
    snapshot_tx: mpsc::Sender<MetricsSnapshot>,
    metrics: Arc<Metrics>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(lines) = rx.recv().await {
            for line in lines {
                let Some(entry) = parse_line(&line) else {
                    metrics.parse_skips.fetch_add(1, Ordering::Relaxed);
                    continue;
                };

                classify(&entry, &mut state);
                metrics.entries_classified.fetch_add(1, Ordering::Relaxed);

                if snapshot_tx.send(state.snapshot()).await.is_err() {
                    return;
                }
            }
        }
    })
}

/// Runs the full pipeline until Ctrl-C: resume from the last checkpoint row,
/// tail the source log, classify every new entry, and flush snapshot batches
/// on the configured interval.
pub async fn run_pipeline(config: AppConfig) -> Result<()> {
    let store = CheckpointStore::new(&config.checkpoint.path);

    let state = match store
        .load_last()
        .context("failed to resume from checkpoint")?
    {
        Some(state) => {
            info!(
                "resumed metrics from checkpoint row at {}",
                state.last_event_timestamp
            );
            state
        }
        None => {
            info!(
                "no checkpoint at {}; starting with zeroed metrics",
                store.path().display()
            );
            MetricsState::default()
        }
    };

    let metrics = Arc::new(Metrics::default());
    let (line_tx, line_rx) = mpsc::channel::<Vec<String>>(LINE_BATCH_QUEUE_CAPACITY);
    let (snapshot_tx, snapshot_rx) = mpsc::channel::<MetricsSnapshot>(SNAPSHOT_QUEUE_CAPACITY);

    let flush_interval =
        Duration::from_secs_f64(config.checkpoint.flush_interval_seconds.max(0.05));
    let flush_handle = spawn_flush_task(store, flush_interval, metrics.clone(), snapshot_rx);
    let process_handle = spawn_process_task(state, line_rx, snapshot_tx, metrics.clone());
    // Deliberately detached: the thread exits on its own once the line
    // channel closes, and the process is about to end anyway.
    let _tailer_thread = spawn_tailer_thread(config.source.clone(), line_tx, metrics.clone());

    info!("shopwatch pipeline running; waiting for shutdown signal");
    tokio::signal::ctrl_c()
        .await
        .context("signal handler failed")?;
    info!(
        "shutdown signal received ({} lines, {} entries classified, {} snapshots flushed)",
        metrics.lines_emitted.load(Ordering::Relaxed),
        metrics.entries_classified.load(Ordering::Relaxed),
        metrics.snapshots_flushed.load(Ordering::Relaxed),
    );

    process_handle.abort();
    flush_handle.abort();

    Ok(())
}
