use log::{error, info};
use rust_decimal::{Decimal, RoundingStrategy};

/// Log markers used around startup and the poll run.
pub struct Logger;

impl Logger {
    pub fn log_operation_start(operation: &str, details: &str) {
        info!("🚀 Starting {}: {}", operation, details);
    }

    pub fn log_operation_success(operation: &str, details: &str) {
        info!("✅ {} completed successfully: {}", operation, details);
    }

    pub fn log_operation_failure(operation: &str, error: &str) {
        error!("❌ {} failed: {}", operation, error);
    }

    pub fn log_poll_summary(processed: usize, errors: usize, total: usize) {
        info!(
            "📊 Poll run finished: processed={} errors={} total={}",
            processed, errors, total
        );
    }
}

/// Formatting helpers for user-facing message text.
pub struct Formatter;

impl Formatter {
    /// Fixed-point currency rendering, always two decimals. Midpoints
    /// round away from zero, not to even.
    pub fn format_amount(amount: Decimal) -> String {
        let rounded = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
        format!("{:.2}", rounded)
    }

    /// Inline expense listing capped at three names; the rest collapse
    /// into a "+N more" suffix so the message stays readable.
    pub fn format_expense_list(names: &[String]) -> String {
        const INLINE_CAP: usize = 3;

        let mut listing = names
            .iter()
            .take(INLINE_CAP)
            .cloned()
            .collect::<Vec<_>>()
            .join(", ");
        if names.len() > INLINE_CAP {
            listing.push_str(&format!(" (+{} more)", names.len() - INLINE_CAP));
        }
        listing
    }
}

/// Validation helpers for settlement inputs.
pub struct Validator;

impl Validator {
    /// Settlement totals must be strictly positive.
    pub fn is_valid_amount(amount: Decimal) -> bool {
        amount > Decimal::ZERO
    }
}
