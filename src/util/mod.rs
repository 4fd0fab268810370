//! Utility module
//!
//! Propagation timing, duplicate suppression and an opt-in retry helper.

mod dedup;

pub use self::dedup::DuplicateFilter;

use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::core::Result;

/// Time one standard message occupies the power line on a single hop
pub const STANDARD_HOP: Duration = Duration::from_millis(50);

/// Time one extended message occupies the power line on a single hop
pub const EXTENDED_HOP: Duration = Duration::from_millis(108);

/// Worst-case time for a message sent with `ttl` hops to reach its target
/// and for the (standard length) ack to come back.
pub fn propagation_delay(ttl: u8, extended: bool) -> Duration {
    let hops = u32::from(ttl) + 1;
    let frame = if extended { EXTENDED_HOP } else { STANDARD_HOP };
    (frame + STANDARD_HOP) * hops
}

/// Runs `f` up to `attempts` times while it fails with a retryable error.
///
/// Nothing in the connection or link database layers calls this on its
/// own; callers opt in.
pub async fn retry<T, F, Fut>(attempts: usize, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        match f().await {
            Err(e) if e.is_retryable() && attempt < attempts => {
                debug!(attempt, error = %e, "Retrying after retryable error");
                attempt += 1;
            }
            other => return other,
        }
    }
}
