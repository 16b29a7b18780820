//! Edge agent configuration.

use lumo_core::DEFAULT_DEBOUNCE_WINDOW_MS;
use serde::{Deserialize, Serialize};

/// Runtime settings for the edge agent. Defaults match the reference
/// wiring: light relay on pin 7, idle indicator on pin 12, motion sensor
/// on pin 11, bridge on 127.0.0.1:5500.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeConfig {
    /// Bridge host to connect to.
    pub host: String,
    /// Bridge TCP port.
    pub port: u16,
    /// Output pin driving the light relay.
    pub light_pin: u8,
    /// Output pin driving the idle indicator.
    pub indicator_pin: u8,
    /// Input pin wired to the motion sensor.
    pub motion_pin: u8,
    /// Quiet window in milliseconds. Applied twice: as the input pin's
    /// hardware debounce and as the activity decay window.
    pub debounce_window_ms: u64,
    /// Poll tick period in milliseconds.
    pub tick_period_ms: u64,
    /// How long to wait for the bridge's reply to a poll tick before the
    /// session is considered dead.
    pub reply_timeout_ms: u64,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5500,
            light_pin: 7,
            indicator_pin: 12,
            motion_pin: 11,
            debounce_window_ms: DEFAULT_DEBOUNCE_WINDOW_MS,
            tick_period_ms: 1_000,
            reply_timeout_ms: 10_000,
        }
    }
}

impl EdgeConfig {
    /// Connect address in `host:port` form.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
