use std::time::Duration;

use log::info;
use rand::Rng;

/// Exponential backoff with jitter: `base * 2^(attempt-1) + U(0, 1000) ms`.
/// `attempt` is 1-based.
pub fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
    let jitter = rand::thread_rng().gen_range(0..=1000);
    base.saturating_mul(factor) + Duration::from_millis(jitter)
}

/// Uniformly random pause in `[min, max]`.
pub fn record_delay(min: Duration, max: Duration) -> Duration {
    let (lo, hi) = (min.as_millis() as u64, max.as_millis() as u64);
    if hi <= lo {
        return min;
    }
    Duration::from_millis(rand::thread_rng().gen_range(lo..=hi))
}

pub async fn sleep_backoff(base: Duration, attempt: u32) -> Duration {
    let delay = backoff_delay(base, attempt);
    info!("Waiting {}ms before retry...", delay.as_millis());
    tokio::time::sleep(delay).await;
    delay
}

pub async fn sleep_between_records(min: Duration, max: Duration) -> Duration {
    let delay = record_delay(min, max);
    info!("Waiting {}ms before next request...", delay.as_millis());
    tokio::time::sleep(delay).await;
    delay
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles_with_bounded_jitter() {
        let base = Duration::from_millis(2000);
        for _ in 0..50 {
            let first = backoff_delay(base, 1).as_millis();
            let third = backoff_delay(base, 3).as_millis();
            assert!((2000..=3000).contains(&first), "first = {}", first);
            assert!((8000..=9000).contains(&third), "third = {}", third);
        }
    }

    #[test]
    fn test_record_delay_stays_in_range() {
        let (min, max) = (Duration::from_millis(2000), Duration::from_millis(5000));
        for _ in 0..100 {
            let d = record_delay(min, max);
            assert!(d >= min && d <= max);
        }
    }

    #[test]
    fn test_record_delay_degenerate_range() {
        let d = Duration::from_millis(10);
        assert_eq!(record_delay(d, d), d);
        assert_eq!(record_delay(d, Duration::ZERO), d);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sleep_between_records_advances_clock() {
        let start = tokio::time::Instant::now();
        let (min, max) = (Duration::from_millis(2000), Duration::from_millis(5000));
        let slept = sleep_between_records(min, max).await;
        assert!(start.elapsed() >= slept);
    }
}
