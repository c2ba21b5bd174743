//! Process-wide identifier counters used only for log correlation.
//!
//! No correctness invariant depends on these values; they exist so that
//! log lines for a given connection can be grepped together.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates the next process-wide connection id.
pub fn next_connection_id() -> u64 {
    NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed)
}
