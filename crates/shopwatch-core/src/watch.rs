use crate::Metrics;
use anyhow::{Context, Result};
use notify::{
    event::{EventKind, ModifyKind},
    Config as NotifyConfig, Event, PollWatcher, RecommendedWatcher, RecursiveMode, Watcher,
};
use shopwatch_config::SourceConfig;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

enum ActiveWatcher {
    Recommended(RecommendedWatcher),
    Poll(PollWatcher),
}

impl ActiveWatcher {
    fn watch(&mut self, path: &Path, mode: RecursiveMode) -> notify::Result<()> {
        match self {
            Self::Recommended(watcher) => watcher.watch(path, mode),
            Self::Poll(watcher) => watcher.watch(path, mode),
        }
    }
}

fn event_is_relevant(kind: &EventKind) -> bool {
    match kind {
        EventKind::Any => true,
        EventKind::Modify(modify_kind) => {
            matches!(modify_kind, ModifyKind::Any | ModifyKind::Data(_))
        }
        _ => false,
    }
}

/// Blocks until the path exists, re-checking on a fixed delay. Unbounded
/// retries; nothing past this point ever sees a missing file at startup.
fn wait_for_file(path: &Path, retry: Duration) {
    let mut waited = false;
    loop {
        if path.exists() {
            if waited {
                info!("{} appeared; starting to tail", path.display());
            }
            return;
        }
        if !waited {
            info!(
                "{} does not exist yet; retrying every {:?}",
                path.display(),
                retry
            );
            waited = true;
        }
        std::thread::sleep(retry);
    }
}

/// Reads everything appended past `cursor`, split into complete lines.
/// Returns the lines and the new cursor, which advances only past the last
/// newline consumed: a trailing partial line stays unread until its newline
/// arrives, so the emitted sequence stays gap-free and duplicate-free.
///
/// When the file is no longer larger than the cursor (truncation, rotation)
/// nothing is emitted and the cursor is left where it was.
pub(crate) fn drain_new_lines(path: &Path, cursor: u64) -> Result<(Vec<String>, u64)> {
    let meta = std::fs::metadata(path)
        .with_context(|| format!("failed to stat {}", path.display()))?;
    if meta.len() <= cursor {
        return Ok((Vec::new(), cursor));
    }

    let mut file = std::fs::File::open(path)
        .with_context(|| format!("failed to open {}", path.display()))?;
    file.seek(SeekFrom::Start(cursor))
        .with_context(|| format!("failed to seek {}", path.display()))?;
    let mut reader = BufReader::new(file);

    let mut lines = Vec::<String>::new();
    let mut offset = cursor;

    loop {
        let mut buf = Vec::<u8>::new();
        let bytes_read = reader
            .read_until(b'\n', &mut buf)
            .with_context(|| format!("failed reading {}", path.display()))?;

        if bytes_read == 0 {
            break;
        }
        if !buf.ends_with(b"\n") {
            // Partial final line; picked up on a later notification.
            break;
        }

        offset = offset.saturating_add(bytes_read as u64);

        let mut text = String::from_utf8_lossy(&buf).to_string();
        text.pop();
        if text.ends_with('\r') {
            text.pop();
        }
        if text.trim().is_empty() {
            continue;
        }
        lines.push(text);
    }

    Ok((lines, offset))
}

/// Spawns the tailer on a dedicated thread: waits for the file, takes its
/// current size as the starting cursor, then forwards every appended batch of
/// complete lines into `tx`. The thread only exits when the receiving side of
/// `tx` is gone or the watch registration fails outright.
pub(crate) fn spawn_tailer_thread(
    source: SourceConfig,
    tx: mpsc::Sender<Vec<String>>,
    metrics: Arc<Metrics>,
) -> std::thread::JoinHandle<()> {
    std::thread::spawn(move || run_tailer(source, tx, metrics))
}

fn run_tailer(source: SourceConfig, tx: mpsc::Sender<Vec<String>>, metrics: Arc<Metrics>) {
    let path = PathBuf::from(&source.log_path);
    wait_for_file(&path, Duration::from_secs(source.exists_retry_seconds.max(1)));

    let mut cursor = match std::fs::metadata(&path) {
        Ok(meta) => meta.len(),
        Err(exc) => {
            warn!("failed to stat {} after it appeared: {exc}", path.display());
            metrics.record_tailer_error(&format!("initial stat failed: {exc}"));
            0
        }
    };
    info!("tailing {} from byte offset {}", path.display(), cursor);

    let (event_tx, event_rx) = std::sync::mpsc::channel::<notify::Result<Event>>();
    let native_tx = event_tx.clone();

    let mut watcher = match notify::recommended_watcher(move |res| {
        let _ = native_tx.send(res);
    }) {
        Ok(watcher) => {
            debug!("watcher backend native for {}", path.display());
            ActiveWatcher::Recommended(watcher)
        }
        Err(exc) => {
            warn!(
                "failed to create native watcher for {}: {exc}; falling back to poll watcher",
                path.display()
            );
            metrics.record_tailer_error(&format!("native watcher create failed: {exc}"));
            let poll_config = NotifyConfig::default()
                .with_poll_interval(Duration::from_secs(source.poll_fallback_seconds.max(1)));
            match PollWatcher::new(
                move |res| {
                    let _ = event_tx.send(res);
                },
                poll_config,
            ) {
                Ok(watcher) => {
                    debug!("watcher backend poll for {}", path.display());
                    ActiveWatcher::Poll(watcher)
                }
                Err(poll_exc) => {
                    error!(
                        "failed to create poll watcher for {}: {poll_exc}",
                        path.display()
                    );
                    metrics.record_tailer_error(&format!("poll watcher create failed: {poll_exc}"));
                    return;
                }
            }
        }
    };

    if let Err(exc) = watcher.watch(&path, RecursiveMode::NonRecursive) {
        error!("failed to watch {}: {exc}", path.display());
        metrics.record_tailer_error(&format!("watch register failed: {exc}"));
        return;
    }

    loop {
        match event_rx.recv() {
            Ok(Ok(event)) => {
                if !event_is_relevant(&event.kind) {
                    continue;
                }

                match drain_new_lines(&path, cursor) {
                    Ok((lines, next_cursor)) => {
                        cursor = next_cursor;
                        if lines.is_empty() {
                            continue;
                        }
                        metrics
                            .lines_emitted
                            .fetch_add(lines.len() as u64, Ordering::Relaxed);
                        if tx.blocking_send(lines).is_err() {
                            break;
                        }
                    }
                    Err(exc) => {
                        warn!("failed reading new log data: {exc:#}");
                        metrics.record_tailer_error(&exc.to_string());
                    }
                }
            }
            Ok(Err(exc)) => {
                warn!("watcher event error for {}: {exc}", path.display());
                metrics.record_tailer_error(&exc.to_string());
            }
            Err(_) => break,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{CreateKind, DataChange, MetadataKind, RemoveKind};
    use std::io::Write;

    fn temp_log(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "shopwatch-watch-{label}-{}-{}.log",
            std::process::id(),
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .expect("system time after unix epoch")
                .as_nanos()
        ))
    }

    #[test]
    fn relevant_events_are_modifications() {
        assert!(event_is_relevant(&EventKind::Modify(ModifyKind::Data(
            DataChange::Any
        ))));
        assert!(event_is_relevant(&EventKind::Any));
        assert!(!event_is_relevant(&EventKind::Modify(ModifyKind::Metadata(
            MetadataKind::Any
        ))));
        assert!(!event_is_relevant(&EventKind::Create(CreateKind::Any)));
        assert!(!event_is_relevant(&EventKind::Remove(RemoveKind::Any)));
    }

    #[test]
    fn drain_reads_only_appended_bytes() {
        let path = temp_log("append");
        std::fs::write(&path, "old line\n").expect("seed file");
        let cursor = std::fs::metadata(&path).expect("stat").len();

        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .expect("open for append");
        writeln!(file, "new line one").expect("append");
        writeln!(file, "new line two").expect("append");

        let (lines, next) = drain_new_lines(&path, cursor).expect("drain");
        std::fs::remove_file(&path).ok();

        assert_eq!(lines, vec!["new line one".to_string(), "new line two".to_string()]);
        assert_eq!(next, cursor + "new line one\nnew line two\n".len() as u64);
    }

    #[test]
    fn partial_final_line_is_withheld_until_newline() {
        let path = temp_log("partial");
        std::fs::write(&path, "").expect("seed file");

        let mut file = std::fs::OpenOptions::new()
            .append(true)
            .open(&path)
            .expect("open for append");
        write!(file, "complete\nhalf").expect("append");

        let (lines, next) = drain_new_lines(&path, 0).expect("drain");
        assert_eq!(lines, vec!["complete".to_string()]);
        assert_eq!(next, "complete\n".len() as u64);

        write!(file, " done\n").expect("finish the line");
        let (lines, next) = drain_new_lines(&path, next).expect("drain again");
        std::fs::remove_file(&path).ok();

        assert_eq!(lines, vec!["half done".to_string()]);
        assert_eq!(next, "complete\nhalf done\n".len() as u64);
    }

    #[test]
    fn shrunken_file_emits_nothing() {
        let path = temp_log("truncate");
        std::fs::write(&path, "a\nb\nc\n").expect("seed file");
        let cursor = std::fs::metadata(&path).expect("stat").len();

        std::fs::write(&path, "a\n").expect("truncate");

        let (lines, next) = drain_new_lines(&path, cursor).expect("drain");
        std::fs::remove_file(&path).ok();

        assert!(lines.is_empty());
        assert_eq!(next, cursor);
    }

    #[test]
    fn blank_lines_are_skipped() {
        let path = temp_log("blank");
        std::fs::write(&path, "one\n\n  \ntwo\n").expect("seed file");

        let (lines, _) = drain_new_lines(&path, 0).expect("drain");
        std::fs::remove_file(&path).ok();

        assert_eq!(lines, vec!["one".to_string(), "two".to_string()]);
    }
}
