//! Tunables for the live acquisition core.

use serde::{Deserialize, Serialize};

/// Configuration for a [`crate::live::LiveManager`].
///
/// The defaults match the historically tuned values; most embedders only ever
/// touch `buffer_scan_factor`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    /// Shortest allowed inter-grab delay, one 60 Hz display frame.
    pub min_grab_delay_ms: f64,

    /// Longest allowed inter-grab delay.
    pub max_grab_delay_ms: f64,

    /// Quantile of the observed display draw intervals used to estimate a
    /// sustainable grab cadence. Too high and the display rate takes a long
    /// time to climb to optimum; too low and the display gets jittery from
    /// skipped frames.
    pub display_interval_quantile: f64,

    /// How many ring-buffer positions to scan per grab cycle, as a multiple
    /// of the camera channel count. Multi-sensor setups can produce channels
    /// at uneven rates; 2x is a safety margin, not a guarantee.
    pub buffer_scan_factor: usize,

    /// Poll interval while waiting for the hardware to confirm that
    /// continuous acquisition has stopped.
    pub stop_poll_ms: u64,

    /// Upper bound on the stop-confirmation wait.
    pub stop_timeout_ms: u64,

    /// How long a cross-thread display marshal may wait before logging a
    /// warning and retrying.
    pub marshal_warn_ms: u64,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            min_grab_delay_ms: 1000.0 / 60.0,
            max_grab_delay_ms: 300.0,
            display_interval_quantile: 0.25,
            buffer_scan_factor: 2,
            stop_poll_ms: 2,
            stop_timeout_ms: 2000,
            marshal_warn_ms: 500,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_round_trip_through_json() {
        let config = LiveConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let back: LiveConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.buffer_scan_factor, config.buffer_scan_factor);
        assert_eq!(back.max_grab_delay_ms, config.max_grab_delay_ms);
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let config: LiveConfig = serde_json::from_str(r#"{"buffer_scan_factor": 3}"#).unwrap();
        assert_eq!(config.buffer_scan_factor, 3);
        assert_eq!(config.display_interval_quantile, 0.25);
    }
}
