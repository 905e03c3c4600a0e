//! Execution id generation
//!
//! Ids have the form `<pid>:<thread>:<sequence>`. The sequence is a
//! process-wide counter, which alone makes ids unique within the process;
//! pid and thread make them readable in collector logs.

use std::sync::atomic::{AtomicU64, Ordering};

static SEQUENCE: AtomicU64 = AtomicU64::new(0);
static NEXT_THREAD_ORDINAL: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static THREAD_ORDINAL: u64 = NEXT_THREAD_ORDINAL.fetch_add(1, Ordering::Relaxed);
}

/// Generate a new execution id
pub fn next_execution_id() -> String {
    let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed);
    let thread = THREAD_ORDINAL.with(|ordinal| *ordinal);
    format!("{}:{}:{}", std::process::id(), thread, sequence)
}
