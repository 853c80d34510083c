use std::time::Duration;

/// Calculate retry delay with exponential backoff
///
/// # Arguments
/// * `retry` - The retry number (0-based)
/// * `initial` - Delay before the first retry
/// * `max` - Maximum delay duration
/// * `multiplier` - Growth factor between consecutive retries
///
/// # Returns
/// Duration to wait before retrying
pub(crate) fn retry_delay(
    retry: u32,
    initial: Duration,
    max: Duration,
    multiplier: f64,
) -> Duration {
    let exponent = i32::try_from(retry).unwrap_or(i32::MAX);
    let delay = initial.as_secs_f64() * multiplier.powi(exponent);
    let capped = delay.min(max.as_secs_f64()).max(0.0);
    Duration::try_from_secs_f64(capped).map_or(max, |d| d.min(max))
}
