//! Configuration system.
//!
//! Loads netcode configuration from JSON strings/files (file IO left to the
//! app). Every tunable named in the external-interfaces defaults table has a
//! `#[serde(default)]` here so a config file only needs to override what it
//! actually cares about.

use serde::{Deserialize, Serialize};

/// Root configuration shared by client and server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetcodeConfig {
    /// Server listen address, e.g. `127.0.0.1:40000`.
    #[serde(default = "default_server_addr")]
    pub server_addr: String,
    /// Fixed simulation tick rate for the game/simulation task.
    #[serde(default = "default_tick_hz")]
    pub tick_hz: u32,

    #[serde(default = "default_client_to_server_delay_ms")]
    pub client_to_server_delay_ms: u32,
    #[serde(default = "default_server_to_client_delay_ms")]
    pub server_to_client_delay_ms: u32,

    #[serde(default = "default_true")]
    pub prediction_enabled: bool,
    #[serde(default = "default_true")]
    pub interpolation_enabled: bool,

    #[serde(default = "default_reconciliation_threshold")]
    pub reconciliation_threshold: f32,
    #[serde(default = "default_interpolation_delay_ms")]
    pub interpolation_delay_ms: u64,

    #[serde(default = "default_client_inactivity_timeout_secs")]
    pub client_inactivity_timeout_secs: u64,
    #[serde(default = "default_broadcast_interval_ms")]
    pub broadcast_interval_ms: u64,
}

fn default_server_addr() -> String {
    "127.0.0.1:40000".to_string()
}

fn default_tick_hz() -> u32 {
    64
}

fn default_client_to_server_delay_ms() -> u32 {
    0
}

fn default_server_to_client_delay_ms() -> u32 {
    0
}

fn default_true() -> bool {
    true
}

fn default_reconciliation_threshold() -> f32 {
    0.5
}

fn default_interpolation_delay_ms() -> u64 {
    100
}

fn default_client_inactivity_timeout_secs() -> u64 {
    60
}

fn default_broadcast_interval_ms() -> u64 {
    16
}

impl Default for NetcodeConfig {
    fn default() -> Self {
        Self {
            server_addr: default_server_addr(),
            tick_hz: default_tick_hz(),
            client_to_server_delay_ms: default_client_to_server_delay_ms(),
            server_to_client_delay_ms: default_server_to_client_delay_ms(),
            prediction_enabled: default_true(),
            interpolation_enabled: default_true(),
            reconciliation_threshold: default_reconciliation_threshold(),
            interpolation_delay_ms: default_interpolation_delay_ms(),
            client_inactivity_timeout_secs: default_client_inactivity_timeout_secs(),
            broadcast_interval_ms: default_broadcast_interval_ms(),
        }
    }
}

impl NetcodeConfig {
    /// Parses config from JSON.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_external_interface_table() {
        let cfg = NetcodeConfig::default();
        assert_eq!(cfg.reconciliation_threshold, 0.5);
        assert_eq!(cfg.interpolation_delay_ms, 100);
        assert_eq!(cfg.client_inactivity_timeout_secs, 60);
        assert_eq!(cfg.broadcast_interval_ms, 16);
    }

    #[test]
    fn partial_json_fills_in_defaults() {
        let cfg = NetcodeConfig::from_json_str(r#"{"server_addr": "0.0.0.0:9000"}"#).unwrap();
        assert_eq!(cfg.server_addr, "0.0.0.0:9000");
        assert_eq!(cfg.tick_hz, 64);
    }
}
