use std::collections::BTreeMap;

/// Number of search terms retained after every update.
pub const TOP_SEARCH_TERMS_CAP: usize = 3;

/// Running aggregate of every counter extracted from the log stream. Owned by
/// exactly one processing task; all mutation goes through the classifier.
///
/// Every counter is monotonically non-decreasing. `revenue` only grows (no
/// refunds are modeled). `cart_removals` is part of the persisted schema but
/// has no classification rule feeding it, so it stays zero.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsState {
    pub info: u64,
    pub warning: u64,
    pub error: u64,

    pub search_count: u64,
    /// Per-term hit counts, sorted by count descending and truncated to
    /// `TOP_SEARCH_TERMS_CAP` entries after every update. The sort is stable,
    /// so terms with equal counts keep insertion order.
    pub search_terms: Vec<(String, u64)>,

    pub orders_placed: u64,
    pub orders_completed: u64,
    pub orders_canceled: u64,

    pub payment_success: u64,
    pub payment_failure: u64,
    pub revenue: f64,

    pub cart_additions: u64,
    pub cart_failures: u64,
    pub cart_removals: u64,

    pub reviews_submitted: u64,
    pub review_ratings: BTreeMap<u8, u64>,

    pub low_stock_warnings: u64,
    pub stock_updates: u64,

    pub last_event_timestamp: String,
}

impl MetricsState {
    pub fn record_search(&mut self, term: &str) {
        self.search_count += 1;
        match self.search_terms.iter_mut().find(|(t, _)| t == term) {
            Some((_, count)) => *count += 1,
            None => self.search_terms.push((term.to_string(), 1)),
        }
        self.search_terms.sort_by(|a, b| b.1.cmp(&a.1));
        self.search_terms.truncate(TOP_SEARCH_TERMS_CAP);
    }

    /// Adds a successful payment amount, re-rounding the accumulator to two
    /// decimal places after the addition.
    pub fn record_revenue(&mut self, amount: f64) {
        self.revenue = ((self.revenue + amount) * 100.0).round() / 100.0;
    }

    pub fn record_rating(&mut self, stars: u8) {
        *self.review_ratings.entry(stars).or_insert(0) += 1;
    }

    /// Captures an immutable copy of the current state, tagged with the
    /// timestamp of the event that produced it.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            taken_at: self.last_event_timestamp.clone(),
            state: self.clone(),
        }
    }
}

/// A point-in-time deep copy of `MetricsState`, queued for durable append.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    /// Source-formatted timestamp of the triggering log entry.
    pub taken_at: String,
    pub state: MetricsState,
}
