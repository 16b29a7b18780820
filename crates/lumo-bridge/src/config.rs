//! Bridge service configuration.

use serde::{Deserialize, Serialize};

/// Runtime settings for the bridge. Defaults match the reference
/// deployment: listen on 127.0.0.1:5500, light state on `led_status`,
/// shutdown control on `button_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Host to bind the listener on.
    pub host: String,
    /// TCP port to listen on. Port 0 picks a free one.
    pub port: u16,
    /// Cloud channel light transitions are published to.
    pub light_channel: String,
    /// Cloud channel polled for the shutdown signal.
    pub control_channel: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5500,
            light_channel: "led_status".to_string(),
            control_channel: "button_status".to_string(),
        }
    }
}

impl BridgeConfig {
    /// Bind address in `host:port` form.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
