// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/homeguard-rs

//! Streaming module - WebSocket status and command endpoint

#[cfg(feature = "status-server")]
mod websocket;

#[cfg(feature = "status-server")]
pub use websocket::*;

use serde::{Deserialize, Serialize};

/// Status endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingConfig {
    /// Serve the WebSocket status endpoint
    pub status_enabled: bool,
    pub bind_address: String,
    pub port: u16,
    pub max_clients: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            status_enabled: true,
            bind_address: "0.0.0.0".to_string(),
            port: 8765,
            max_clients: 10,
        }
    }
}

impl StreamingConfig {
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// Client request, tagged by `type`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientRequest {
    Status,
    Arm,
    Disarm,
    ClearAlarm,
    Ping,
    /// Start forwarding state, detection and alert events
    Subscribe,
    Unsubscribe,
    /// Current camera frame, or the newest stored alert snapshot when none
    /// has been captured yet
    Snapshot,
    /// Latest alert decisions
    Alerts {
        #[serde(default = "default_alert_limit")]
        limit: usize,
    },
}

fn default_alert_limit() -> usize {
    20
}
