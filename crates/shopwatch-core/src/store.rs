use crate::model::{MetricsSnapshot, MetricsState};
use anyhow::{anyhow, Context, Result};
use chrono::{Duration as ChronoDuration, Local, NaiveDateTime};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Fixed column order of the checkpoint file. `decode_row_v1` parses by
/// position, not by header name; changing this order is a format revision and
/// needs a new decoder version.
pub const COLUMNS: [&str; 19] = [
    "TIMESTAMP",
    "INFO_COUNT",
    "WARNING_COUNT",
    "ERROR_COUNT",
    "SEARCH_COUNT",
    "TOP_SEARCH_TERMS",
    "ORDERS_PLACED",
    "ORDERS_COMPLETED",
    "ORDERS_CANCELED",
    "PAYMENT_SUCCESS",
    "PAYMENT_FAILURE",
    "TOTAL_REVENUE",
    "CART_ADDITIONS",
    "CART_FAILURES",
    "CART_REMOVALS",
    "REVIEWS_SUBMITTED",
    "REVIEW_RATINGS",
    "LOW_STOCK_WARNINGS",
    "STOCK_UPDATES",
];

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";
const EMPTY_MAPPING: &str = "N/A";

/// Default query window when no explicit range is given.
const DEFAULT_WINDOW_HOURS: i64 = 24;
/// Maximum rows a query returns; larger windows are stride-downsampled.
const MAX_QUERY_ROWS: usize = 15;

/// Append-only tabular sink for metrics snapshots. The last data row is
/// authoritative for resume.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends one row per snapshot, in order. The header row is written only
    /// when the destination is empty or absent. Parent directories are
    /// created as needed.
    pub fn append(&self, snapshots: &[MetricsSnapshot]) -> Result<()> {
        if snapshots.is_empty() {
            return Ok(());
        }

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).with_context(|| {
                    format!("failed to create checkpoint dir {}", parent.display())
                })?;
            }
        }

        let write_header = match std::fs::metadata(&self.path) {
            Ok(meta) => meta.len() == 0,
            Err(_) => true,
        };

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("failed to open checkpoint {}", self.path.display()))?;

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if write_header {
            writer
                .write_record(COLUMNS)
                .context("failed to write checkpoint header")?;
        }
        for snapshot in snapshots {
            writer
                .write_record(encode_row(snapshot))
                .context("failed to write checkpoint row")?;
        }
        writer.flush().context("failed to flush checkpoint file")?;

        Ok(())
    }

    /// Decodes the last data row back into a `MetricsState`, or `None` when
    /// the destination is missing or holds only the header. Invoked once at
    /// startup, before tailing begins.
    pub fn load_last(&self) -> Result<Option<MetricsState>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(&self.path)
            .with_context(|| format!("failed to read checkpoint {}", self.path.display()))?;

        let mut last = None;
        for record in reader.records() {
            match record {
                Ok(record) => last = Some(record),
                Err(exc) => warn!("skipping malformed checkpoint row: {exc}"),
            }
        }

        match last {
            Some(record) => Ok(Some(decode_row_v1(&record)?)),
            None => Ok(None),
        }
    }

    /// Returns checkpoint rows whose timestamp falls in `[start, end]`
    /// inclusive. Defaults: `end` = now, `start` = `end` minus 24 hours.
    /// Rows with unparseable timestamps are skipped. More than 15 matches are
    /// reduced by fixed striding (keep every `count / 15`-th row, capped at
    /// 15) — lossy but deterministic for a given input.
    pub fn query(
        &self,
        start: Option<NaiveDateTime>,
        end: Option<NaiveDateTime>,
    ) -> Result<Vec<MetricsState>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let end = end.unwrap_or_else(|| Local::now().naive_local());
        let start = start.unwrap_or(end - ChronoDuration::hours(DEFAULT_WINDOW_HOURS));

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_path(&self.path)
            .with_context(|| format!("failed to read checkpoint {}", self.path.display()))?;

        let mut rows = Vec::<MetricsState>::new();
        for record in reader.records() {
            let record = match record {
                Ok(record) => record,
                Err(exc) => {
                    warn!("skipping malformed checkpoint row: {exc}");
                    continue;
                }
            };

            let Some(raw_ts) = record.get(0) else {
                continue;
            };
            let Ok(ts) = NaiveDateTime::parse_from_str(raw_ts, TIMESTAMP_FORMAT) else {
                continue;
            };
            if ts < start || ts > end {
                continue;
            }

            match decode_row_v1(&record) {
                Ok(state) => rows.push(state),
                Err(exc) => warn!("skipping undecodable checkpoint row: {exc:#}"),
            }
        }

        Ok(downsample(rows, MAX_QUERY_ROWS))
    }
}

fn downsample<T>(rows: Vec<T>, max: usize) -> Vec<T> {
    if rows.len() <= max {
        return rows;
    }
    let stride = rows.len() / max;
    rows.into_iter()
        .enumerate()
        .filter_map(|(idx, row)| (idx % stride == 0).then_some(row))
        .take(max)
        .collect()
}

fn encode_mapping<'a>(entries: impl Iterator<Item = (String, &'a u64)>) -> String {
    let joined = entries
        .map(|(key, count)| format!("{key}: {count}"))
        .collect::<Vec<_>>()
        .join(", ");
    if joined.is_empty() {
        EMPTY_MAPPING.to_string()
    } else {
        joined
    }
}

fn encode_row(snapshot: &MetricsSnapshot) -> Vec<String> {
    let state = &snapshot.state;

    let top_search_terms =
        encode_mapping(state.search_terms.iter().map(|(term, count)| (term.clone(), count)));
    let review_ratings = encode_mapping(
        state
            .review_ratings
            .iter()
            .map(|(stars, count)| (format!("{stars} stars"), count)),
    );

    vec![
        snapshot.taken_at.clone(),
        state.info.to_string(),
        state.warning.to_string(),
        state.error.to_string(),
        state.search_count.to_string(),
        top_search_terms,
        state.orders_placed.to_string(),
        state.orders_completed.to_string(),
        state.orders_canceled.to_string(),
        state.payment_success.to_string(),
        state.payment_failure.to_string(),
        format!("{:.2}", state.revenue),
        state.cart_additions.to_string(),
        state.cart_failures.to_string(),
        state.cart_removals.to_string(),
        state.reviews_submitted.to_string(),
        review_ratings,
        state.low_stock_warnings.to_string(),
        state.stock_updates.to_string(),
    ]
}

fn parse_count(record: &csv::StringRecord, idx: usize) -> Result<u64> {
    let raw = record
        .get(idx)
        .ok_or_else(|| anyhow!("checkpoint row missing column {} ({})", idx, COLUMNS[idx]))?;
    raw.trim()
        .parse::<u64>()
        .with_context(|| format!("bad {} value `{raw}`", COLUMNS[idx]))
}

fn decode_search_terms(raw: &str) -> Vec<(String, u64)> {
    if raw.trim().is_empty() || raw.trim() == EMPTY_MAPPING {
        return Vec::new();
    }
    raw.split(", ")
        .filter_map(|pair| {
            let (term, count) = pair.rsplit_once(": ")?;
            Some((term.to_string(), count.trim().parse::<u64>().ok()?))
        })
        .collect()
}

fn decode_review_ratings(raw: &str) -> BTreeMap<u8, u64> {
    let mut ratings = BTreeMap::new();
    if raw.trim().is_empty() || raw.trim() == EMPTY_MAPPING {
        return ratings;
    }
    for pair in raw.split(", ") {
        let Some((stars, count)) = pair.rsplit_once(": ") else {
            continue;
        };
        let stars = stars.trim_end_matches(" stars").trim();
        if let (Ok(stars), Ok(count)) = (stars.parse::<u8>(), count.trim().parse::<u64>()) {
            ratings.insert(stars, count);
        }
    }
    ratings
}

/// Version-1 row decoder: exactly the 19 columns of `COLUMNS`, by position.
fn decode_row_v1(record: &csv::StringRecord) -> Result<MetricsState> {
    if record.len() != COLUMNS.len() {
        return Err(anyhow!(
            "checkpoint row has {} columns, expected {}",
            record.len(),
            COLUMNS.len()
        ));
    }

    let raw_revenue = record.get(11).unwrap_or_default();
    let revenue = raw_revenue
        .trim()
        .parse::<f64>()
        .with_context(|| format!("bad TOTAL_REVENUE value `{raw_revenue}`"))?;

    Ok(MetricsState {
        last_event_timestamp: record.get(0).unwrap_or_default().to_string(),
        info: parse_count(record, 1)?,
        warning: parse_count(record, 2)?,
        error: parse_count(record, 3)?,
        search_count: parse_count(record, 4)?,
        search_terms: decode_search_terms(record.get(5).unwrap_or_default()),
        orders_placed: parse_count(record, 6)?,
        orders_completed: parse_count(record, 7)?,
        orders_canceled: parse_count(record, 8)?,
        payment_success: parse_count(record, 9)?,
        payment_failure: parse_count(record, 10)?,
        revenue,
        cart_additions: parse_count(record, 12)?,
        cart_failures: parse_count(record, 13)?,
        cart_removals: parse_count(record, 14)?,
        reviews_submitted: parse_count(record, 15)?,
        review_ratings: decode_review_ratings(record.get(16).unwrap_or_default()),
        low_stock_warnings: parse_count(record, 17)?,
        stock_updates: parse_count(record, 18)?,
    })
}
