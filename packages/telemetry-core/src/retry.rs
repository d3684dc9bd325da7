//! Shared retry-policy building blocks for outbound HTTP forwarding paths:
//! AudioHook ingress forwarding (§4.4) and the vendor connector's REST calls
//! (§4.5). The two components use different backoff shapes deliberately (see
//! §9 Open Questions) but share the retryable-status-code set and a
//! stop-flag-aware sleep so shutdown stays prompt (§5 Cancellation).

use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// HTTP status codes considered transient and worth retrying.
pub const RETRYABLE_STATUS_CODES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Whether `status` is one of the retryable codes.
pub fn is_retryable_status(status: u16) -> bool {
    RETRYABLE_STATUS_CODES.contains(&status)
}

/// Linear backoff used by the vendor connector: `base * max(1, attempt - 1)` seconds.
pub fn linear_backoff(base_seconds: f64, attempt: u32) -> Duration {
    let multiplier = attempt.saturating_sub(1).max(1) as f64;
    Duration::from_secs_f64(base_seconds * multiplier)
}

/// Exponential backoff used by AudioHook's own forwarding retries:
/// `base * 2^(attempt - 1)` seconds.
pub fn exponential_backoff(base_seconds: f64, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1);
    Duration::from_secs_f64(base_seconds * 2f64.powi(exponent as i32))
}

/// Sleeps for `duration` in ~200 ms steps, returning `false` early if `stop`
/// is cancelled mid-sleep so shutdown never waits out a long backoff.
pub async fn cancellable_sleep(duration: Duration, stop: &CancellationToken) -> bool {
    const STEP: Duration = Duration::from_millis(200);
    let mut remaining = duration;
    while remaining > Duration::ZERO {
        let this_step = remaining.min(STEP);
        tokio::select! {
            _ = sleep(this_step) => {}
            _ = stop.cancelled() => return false,
        }
        remaining = remaining.saturating_sub(this_step);
    }
    true
}
