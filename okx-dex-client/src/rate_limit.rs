//! Backoff schedule for requests rejected by the OKX rate limiter

use std::time::Duration;

use rand::Rng;
use reqwest::header::{HeaderMap, RETRY_AFTER};

/// The maximum number of requests sent before giving up on a rate limited
/// endpoint
pub const MAX_RATE_LIMIT_ATTEMPTS: usize = 5;
/// The base delay of the exponential backoff
const BASE_BACKOFF: Duration = Duration::from_secs(1);
/// The cap on the exponential backoff
const MAX_BACKOFF: Duration = Duration::from_secs(8);
/// The upper bound (exclusive) of the jitter added to every delay
const MAX_JITTER_MS: u64 = 500;

/// Parse an integral `Retry-After` header into a number of seconds
///
/// HTTP-date values are ignored in favor of the exponential schedule.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<u64> {
    headers.get(RETRY_AFTER)?.to_str().ok()?.trim().parse().ok()
}

/// The delay before retry number `attempt` (1-based), without jitter
///
/// A server supplied `Retry-After` wins; otherwise the delay doubles from one
/// second per attempt, capped at eight seconds.
pub fn backoff_delay(attempt: usize, retry_after: Option<u64>) -> Duration {
    if let Some(secs) = retry_after {
        return Duration::from_secs(secs);
    }

    let exp = attempt.saturating_sub(1).min(16) as u32;
    BASE_BACKOFF.saturating_mul(1 << exp).min(MAX_BACKOFF)
}

/// The full delay before retry number `attempt`, with uniform jitter in
/// `[0, 0.5s)`
pub fn jittered_backoff(attempt: usize, retry_after: Option<u64>) -> Duration {
    let jitter = rand::thread_rng().gen_range(0..MAX_JITTER_MS);
    backoff_delay(attempt, retry_after) + Duration::from_millis(jitter)
}
