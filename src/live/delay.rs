//! Adaptive inter-grab delay estimation.

/// Compute the delay before the next grab, in integer milliseconds.
///
/// The ideal interval is the larger of the exposure time and the display's
/// observed draw-interval quantile, minus the time already elapsed since the
/// current grab was scheduled to fire. The result is clamped to
/// `[min_ms, max_ms]`; when the pre-clamp interval exceeds `max_ms` it is
/// instead divided down to the largest integer submultiple that fits, which
/// avoids a sawtooth where the cadence silently halves as soon as the ideal
/// interval slightly exceeds the ceiling.
///
/// Pure function: deterministic for identical inputs, no side effects.
pub fn compute_grab_delay_ms(
    exposure_ms: f64,
    display_interval_ms: f64,
    already_elapsed_ms: f64,
    min_ms: f64,
    max_ms: f64,
) -> u64 {
    let mut delay_ms = exposure_ms.max(display_interval_ms) - already_elapsed_ms;

    delay_ms = delay_ms.max(min_ms);
    if delay_ms > max_ms {
        delay_ms /= (delay_ms / max_ms).ceil();
    }

    delay_ms.round() as u64
}
