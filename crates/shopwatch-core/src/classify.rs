use crate::model::MetricsState;
use crate::parse::{Level, ParsedEntry};
use regex::Regex;
use std::sync::OnceLock;
use tracing::warn;

fn order_re() -> &'static Regex {
    static ORDER_RE: OnceLock<Regex> = OnceLock::new();
    ORDER_RE.get_or_init(|| Regex::new(r"Order #[0-9]+").expect("valid order regex"))
}

fn product_re() -> &'static Regex {
    static PRODUCT_RE: OnceLock<Regex> = OnceLock::new();
    PRODUCT_RE.get_or_init(|| Regex::new(r"product ID #[0-9]+").expect("valid product regex"))
}

fn review_re() -> &'static Regex {
    static REVIEW_RE: OnceLock<Regex> = OnceLock::new();
    REVIEW_RE.get_or_init(|| {
        Regex::new(r"submitted a review for product ID #[0-9]+: rating (\d+) stars")
            .expect("valid review regex")
    })
}

fn search_re() -> &'static Regex {
    static SEARCH_RE: OnceLock<Regex> = OnceLock::new();
    SEARCH_RE
        .get_or_init(|| Regex::new(r"Product search for query '([^']+)'").expect("valid search regex"))
}

fn payment_success_re() -> &'static Regex {
    static PAYMENT_SUCCESS_RE: OnceLock<Regex> = OnceLock::new();
    PAYMENT_SUCCESS_RE.get_or_init(|| {
        Regex::new(
            r"Payment (?:processed successfully|success) for order ID #[0-9]+ amount: \$([0-9.]+)",
        )
        .expect("valid payment success regex")
    })
}

fn payment_failure_re() -> &'static Regex {
    static PAYMENT_FAILURE_RE: OnceLock<Regex> = OnceLock::new();
    PAYMENT_FAILURE_RE.get_or_init(|| {
        Regex::new(r"Payment failed for order ID #[0-9]+").expect("valid payment failure regex")
    })
}

/// Applies every domain check to one parsed entry and mutates the running
/// metrics accordingly. The checks are independent: one line may trigger
/// several counters. Capture values that fail to parse are logged with the
/// offending entry and skipped; classification itself never fails.
pub fn classify(entry: &ParsedEntry, state: &mut MetricsState) {
    track_orders(entry, state);
    track_cart(entry, state);
    track_reviews(entry, state);
    track_search(entry, state);
    track_payments(entry, state);
    track_stock(entry, state);
    track_level(entry, state);

    state.last_event_timestamp = entry.timestamp.clone();
}

fn track_orders(entry: &ParsedEntry, state: &mut MetricsState) {
    if !order_re().is_match(&entry.message) {
        return;
    }

    if entry.message.contains("created for") {
        state.orders_placed += 1;
    } else if entry.message.contains("canceled by") {
        state.orders_canceled += 1;
    } else if entry.message.contains("shipped to") {
        state.orders_completed += 1;
    }
}

// Removal events exist in the persisted schema but the log stream carries no
// removal message, so cart_removals is never incremented here.
fn track_cart(entry: &ParsedEntry, state: &mut MetricsState) {
    if !product_re().is_match(&entry.message) {
        return;
    }

    if entry.message.contains("failed to add product") {
        state.cart_failures += 1;
    } else if entry.message.contains("added product") {
        state.cart_additions += 1;
    }
}

fn track_reviews(entry: &ParsedEntry, state: &mut MetricsState) {
    let Some(caps) = review_re().captures(&entry.message) else {
        return;
    };

    match caps[1].parse::<u8>() {
        Ok(stars) => {
            state.reviews_submitted += 1;
            state.record_rating(stars);
        }
        Err(exc) => warn!("unparseable review rating in {entry:?}: {exc}"),
    }
}

fn track_search(entry: &ParsedEntry, state: &mut MetricsState) {
    if let Some(caps) = search_re().captures(&entry.message) {
        state.record_search(&caps[1]);
    }
}

fn track_payments(entry: &ParsedEntry, state: &mut MetricsState) {
    if let Some(caps) = payment_success_re().captures(&entry.message) {
        match caps[1].parse::<f64>() {
            Ok(amount) => {
                state.payment_success += 1;
                state.record_revenue(amount);
            }
            Err(exc) => warn!("unparseable payment amount in {entry:?}: {exc}"),
        }
    }

    if payment_failure_re().is_match(&entry.message) {
        state.payment_failure += 1;
    }
}

fn track_stock(entry: &ParsedEntry, state: &mut MetricsState) {
    if entry.message.contains("Low stock warning for product ID") {
        state.low_stock_warnings += 1;
    } else if entry.message.contains("Stock updated for product ID") {
        state.stock_updates += 1;
    }
}

fn track_level(entry: &ParsedEntry, state: &mut MetricsState) {
    match entry.level {
        Level::Info => state.info += 1,
        Level::Warning => state.warning += 1,
        Level::Error => state.error += 1,
        Level::Unknown => warn!("unrecognized log level in {entry:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse_line;

    fn apply(state: &mut MetricsState, line: &str) {
        let entry = parse_line(line).expect("test line parses");
        classify(&entry, state);
    }

    #[test]
    fn order_created_increments_only_orders_placed() {
        let mut state = MetricsState::default();
        apply(
            &mut state,
            "2024-01-01 10:00:00 [module: orders] Order #55 created for user X",
        );

        assert_eq!(state.orders_placed, 1);
        assert_eq!(state.orders_canceled, 0);
        assert_eq!(state.orders_completed, 0);
        assert_eq!(state.payment_success, 0);
        assert_eq!(state.cart_additions, 0);
        assert_eq!(state.search_count, 0);
        assert_eq!(state.last_event_timestamp, "2024-01-01 10:00:00");
    }

    #[test]
    fn order_lifecycle_markers_are_counted_independently() {
        let mut state = MetricsState::default();
        let lines = [
            "[INFO] [2024-05-03 08:00:00] [module: OrderService] Order #2001 created for user ID #1001",
            "[INFO] [2024-05-03 08:00:01] [module: SearchService] Product search for query 'sofa'",
            "[INFO] [2024-05-03 08:00:02] [module: OrderService] Order #2002 created for user ID #1002",
            "[INFO] [2024-05-03 08:00:03] [module: OrderService] Order #2001 canceled by user ID #1001",
            "[INFO] [2024-05-03 08:00:04] [module: OrderService] Order #2002 shipped to user ID #1002",
        ];
        for line in lines {
            apply(&mut state, line);
        }

        assert_eq!(state.orders_placed, 2);
        assert_eq!(state.orders_canceled, 1);
        assert_eq!(state.orders_completed, 1);
        assert_eq!(state.orders_placed - state.orders_canceled - state.orders_completed, 0);
    }

    #[test]
    fn payment_success_and_failure_accumulate_revenue_once() {
        let mut state = MetricsState::default();
        apply(
            &mut state,
            "[INFO] [2024-05-03 08:00:00] [module: PaymentService] Payment success for order ID #9 amount: $42.50",
        );
        apply(
            &mut state,
            "[ERROR] [2024-05-03 08:00:01] [module: PaymentService] Payment failed for order ID #10 amount: $10.00",
        );

        assert_eq!(state.payment_success, 1);
        assert_eq!(state.payment_failure, 1);
        assert_eq!(state.revenue, 42.50);
    }

    #[test]
    fn long_form_payment_success_also_matches() {
        let mut state = MetricsState::default();
        apply(
            &mut state,
            "[INFO] [2024-05-03 08:00:00] [module: PaymentService] Payment processed successfully for order ID #2001 amount: $19.99",
        );

        assert_eq!(state.payment_success, 1);
        assert_eq!(state.revenue, 19.99);
    }

    #[test]
    fn search_terms_keep_only_top_three() {
        let mut state = MetricsState::default();
        let mut push_search = |term: &str, times: usize| {
            for _ in 0..times {
                apply(
                    &mut state,
                    &format!(
                        "[INFO] [2024-05-03 08:00:00] [module: SearchService] Product search for query '{term}'"
                    ),
                );
            }
        };
        push_search("a", 5);
        push_search("b", 3);
        push_search("c", 1);
        push_search("d", 1);

        assert_eq!(state.search_count, 10);
        assert_eq!(
            state.search_terms,
            vec![
                ("a".to_string(), 5),
                ("b".to_string(), 3),
                ("c".to_string(), 1),
            ]
        );
    }

    #[test]
    fn cart_additions_and_failures_are_distinguished() {
        let mut state = MetricsState::default();
        apply(
            &mut state,
            "[INFO] [2024-05-03 08:00:00] [module: CartService] User ID #1001 added product ID #3001 to cart",
        );
        apply(
            &mut state,
            "[WARNING] [2024-05-03 08:00:01] [module: CartService] User ID #1001 failed to add product ID #3002 to cart, out of stock",
        );

        assert_eq!(state.cart_additions, 1);
        assert_eq!(state.cart_failures, 1);
        assert_eq!(state.cart_removals, 0);
    }

    #[test]
    fn reviews_populate_rating_histogram() {
        let mut state = MetricsState::default();
        apply(
            &mut state,
            "[INFO] [2024-05-03 08:00:00] [module: ReviewService] User ID #1001 submitted a review for product ID #3001: rating 5 stars",
        );
        apply(
            &mut state,
            "[INFO] [2024-05-03 08:00:01] [module: ReviewService] User ID #1002 submitted a review for product ID #3001: rating 5 stars",
        );
        apply(
            &mut state,
            "[INFO] [2024-05-03 08:00:02] [module: ReviewService] User ID #1003 submitted a review for product ID #3002: rating 2 stars",
        );

        assert_eq!(state.reviews_submitted, 3);
        assert_eq!(state.review_ratings.get(&5), Some(&2));
        assert_eq!(state.review_ratings.get(&2), Some(&1));
    }

    #[test]
    fn stock_messages_are_counted() {
        let mut state = MetricsState::default();
        apply(
            &mut state,
            "[WARNING] [2024-05-03 08:00:00] [module: InventoryService] Low stock warning for product ID #3001: only 2 units left",
        );
        apply(
            &mut state,
            "[INFO] [2024-05-03 08:00:01] [module: InventoryService] Stock updated for product ID #3001: new stock 40 units",
        );

        assert_eq!(state.low_stock_warnings, 1);
        assert_eq!(state.stock_updates, 1);
    }

    #[test]
    fn levels_increment_their_counters() {
        let mut state = MetricsState::default();
        apply(&mut state, "[INFO] [2024-05-03 08:00:00] [module: a] x");
        apply(&mut state, "[WARNING] [2024-05-03 08:00:01] [module: a] x");
        apply(&mut state, "[ERROR] [2024-05-03 08:00:02] [module: a] x");
        // WARN is not a recognized level; counted toward no level bucket.
        apply(&mut state, "[WARN] [2024-05-03 08:00:03] [module: a] x");

        assert_eq!(state.info, 1);
        assert_eq!(state.warning, 1);
        assert_eq!(state.error, 1);
    }

    #[test]
    fn one_line_may_trigger_several_counters() {
        let mut state = MetricsState::default();
        apply(
            &mut state,
            "[INFO] [2024-05-03 08:00:00] [module: orders] Order #7 created for user ID #1; Payment success for order ID #7 amount: $5.25",
        );

        assert_eq!(state.orders_placed, 1);
        assert_eq!(state.payment_success, 1);
        assert_eq!(state.revenue, 5.25);
        assert_eq!(state.info, 1);
    }

    #[test]
    fn revenue_is_stable_under_unrelated_reordering() {
        let payment_a = "[INFO] [2024-05-03 08:00:00] [module: PaymentService] Payment success for order ID #1 amount: $10.10";
        let payment_b = "[INFO] [2024-05-03 08:00:01] [module: PaymentService] Payment success for order ID #2 amount: $0.90";
        let noise = "[INFO] [2024-05-03 08:00:02] [module: SearchService] Product search for query 'lamp'";

        let mut forward = MetricsState::default();
        for line in [payment_a, noise, payment_b] {
            apply(&mut forward, line);
        }

        let mut shuffled = MetricsState::default();
        for line in [noise, payment_b, payment_a] {
            apply(&mut shuffled, line);
        }

        assert_eq!(forward.revenue, 11.0);
        assert_eq!(forward.revenue, shuffled.revenue);
    }
}
