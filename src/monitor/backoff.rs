//! Retry timing: reconnect backoff and the connecting timeout.

use rand::Rng;
use std::time::Duration;

/// Connecting timeout never grows beyond this.
pub const MAX_CONNECTING_TIMEOUT: Duration = Duration::from_millis(60_000);

const MAX_CONNECTING_EXPONENT: u32 = 12;
const MAX_BACKOFF_EXPONENT: u32 = 30;

/// How long a connect attempt may stay in `Connecting`.
///
/// The exponent only grows once per `host_count + 1` attempts, so every known
/// host gets a try at one timeout before the timeout itself doubles.
pub fn connecting_timeout(attempts: u32, host_count: usize) -> Duration {
    let tier = attempts as u64 / (host_count as u64).saturating_add(1);
    let exponent = tier.saturating_add(1).min(MAX_CONNECTING_EXPONENT as u64) as u32;
    let millis = (1u64 << exponent).saturating_mul(1000);
    Duration::from_millis(millis).min(MAX_CONNECTING_TIMEOUT)
}

/// Exponential backoff for the given attempt, capped at `max`.
pub fn exponential_backoff(attempts: u32, max: Duration) -> Duration {
    let exponent = attempts.min(MAX_BACKOFF_EXPONENT);
    let millis = (1u64 << exponent).saturating_mul(1000);
    Duration::from_millis(millis).min(max)
}

/// Spread a delay over 75%..125% of its value.
pub fn with_jitter(delay: Duration) -> Duration {
    let factor = rand::thread_rng().gen_range(0.75..1.25);
    delay.mul_f64(factor)
}
