//! Pure latency-compensation functions (spec §4.3).
//!
//! A single-hop approximation: delay is the receiver clock minus the
//! envelope's `sent_at_millis`, ignoring clock skew (spec §9). Within one
//! host this is adequate; it is not meant to survive dispersed clocks.

/// Adjust a reported play position for observed one-way delay (spec §4.3
/// `adjustedTime`).
///
/// Returns `fallback` if `reported_time` is not finite. Otherwise adds
/// `delay_seconds` only while playback is active — a paused position does not
/// keep advancing in transit.
pub fn adjusted_time(reported_time: f64, is_playing: bool, delay_seconds: f64, fallback: f64) -> f64 {
    if !reported_time.is_finite() {
        return fallback;
    }
    if is_playing {
        reported_time + delay_seconds
    } else {
        reported_time
    }
}

/// Absolute difference between a local position and a remote one, after
/// applying the same latency adjustment (spec §4.3 `diff`).
pub fn diff(local: f64, remote: f64, is_playing: bool, delay_seconds: f64) -> f64 {
    let adjusted_remote = if is_playing {
        remote + delay_seconds
    } else {
        remote
    };
    (local - adjusted_remote).abs()
}

/// Delay in seconds between now and an envelope's send timestamp.
///
/// `now_millis` and `sent_at_millis` are both receiver-clock-relative epoch
/// milliseconds; a negative result (clock skew, or a message from the future)
/// is clamped to zero rather than producing a negative delay.
pub fn delay_seconds(now_millis: u64, sent_at_millis: u64) -> f64 {
    now_millis.saturating_sub(sent_at_millis) as f64 / 1000.0
}

/// Drift threshold (spec §4.5, §8, GLOSSARY): the minimum position mismatch
/// that warrants a seek on a follower.
pub const DRIFT_THRESHOLD_SECONDS: f64 = 0.3;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_finite_reported_time_falls_back() {
        assert_eq!(adjusted_time(f64::NAN, true, 1.0, 42.0), 42.0);
        assert_eq!(adjusted_time(f64::INFINITY, true, 1.0, 42.0), 42.0);
    }

    #[test]
    fn playing_adds_delay_paused_does_not() {
        assert_eq!(adjusted_time(10.0, true, 0.5, 0.0), 10.5);
        assert_eq!(adjusted_time(10.0, false, 0.5, 0.0), 10.0);
    }

    #[test]
    fn diff_accounts_for_delay_only_when_playing() {
        assert!((diff(10.5, 10.0, true, 0.5) - 0.0).abs() < 1e-9);
        assert!((diff(10.5, 10.0, false, 0.5) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn delay_seconds_clamps_future_timestamps_to_zero() {
        assert_eq!(delay_seconds(1_000, 1_500), 0.0);
        assert_eq!(delay_seconds(1_500, 1_000), 0.5);
    }

    #[test]
    fn drift_below_threshold_is_absorbed() {
        let d = diff(10.2, 10.0, false, 0.0);
        assert!(d < DRIFT_THRESHOLD_SECONDS);
    }

    #[test]
    fn drift_above_threshold_warrants_seek() {
        let d = diff(10.5, 10.0, false, 0.0);
        assert!(d > DRIFT_THRESHOLD_SECONDS);
    }
}
