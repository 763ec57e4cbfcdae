//! Rolling uptime and smoothed latency aggregation.

/// Weight of the newest sample in the latency average.
const LATENCY_SMOOTHING: f64 = 0.2;

/// Uptime percentage over a trailing window of `total` checks with
/// `successful` successes, rounded to two decimals and clamped to
/// [0, 100].
///
/// With no history at all the site gets the benefit of the doubt: 100 if
/// the verdict that triggered the recompute was healthy, 0 otherwise.
/// This keeps brand-new sites from starting at a misleading number.
pub fn rolling_uptime(total: i64, successful: i64, current_is_up: bool) -> f64 {
    if total <= 0 {
        return if current_is_up { 100.0 } else { 0.0 };
    }

    let pct = successful as f64 / total as f64 * 100.0;
    round2(pct).clamp(0.0, 100.0)
}

/// Exponentially smoothed latency: `new = old * 0.8 + latest * 0.2`,
/// seeded with the first observed latency.
pub fn smooth_latency(previous: Option<f64>, latest_ms: f64) -> f64 {
    match previous {
        Some(avg) => avg * (1.0 - LATENCY_SMOOTHING) + latest_ms * LATENCY_SMOOTHING,
        None => latest_ms,
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}
