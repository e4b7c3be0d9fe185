//! Monotonic Millisecond Clock
//!
//! All deadlines in the server (connection activity, TTL expiration, poll
//! timeouts) are expressed in milliseconds on a monotonic scale anchored at
//! the first call. Wall time is never used, so clock adjustments cannot
//! expire keys early or keep dead connections alive.

use std::sync::OnceLock;
use std::time::Instant;

static START: OnceLock<Instant> = OnceLock::new();

/// Milliseconds elapsed since the process first asked for the time.
pub fn now_ms() -> u64 {
    START.get_or_init(Instant::now).elapsed().as_millis() as u64
}
