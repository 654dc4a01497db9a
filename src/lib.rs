// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/homeguard-rs

//! HomeGuard - Camera and PIR intrusion detection
//!
//! The detection-to-alert orchestration engine:
//! - Hardware trigger (PIR) fused with vision motion confirmation
//! - Person/animal classification behind a timeout, throttled per frame
//! - Arm/disarm/alarm state machine with inactivity and quiet-period timers
//! - Prioritized alerts with per-class cooldown and bounded retries
//! - Telegram, MQTT and log notification channels
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       HomeGuard Engine                       │
//! ├──────────────────────────────────────────────────────────────┤
//! │  ┌─────────────┐   ┌────────────┐   ┌────────────────────┐   │
//! │  │ Acquisition │ → │ Frame Slot │ → │ Detection Pipeline │   │
//! │  └─────────────┘   └────────────┘   └────────────────────┘   │
//! │  ┌─────────────┐          ↑                  ↓      ↓        │
//! │  │ PIR / Poll  │ ─ triggers ┘        State Machine  Event Q  │
//! │  └─────────────┘                         ↓            ↓      │
//! │                                    LED / Buzzer  Alert Mgr   │
//! │  ┌──────────────────────────────────────────────────────┐    │
//! │  │          Event Bus  →  Status endpoint / log         │    │
//! │  └──────────────────────────────────────────────────────┘    │
//! └──────────────────────────────────────────────────────────────┘
//! ```

pub mod alerts;
pub mod config;
pub mod core;
#[cfg(feature = "alert-log")]
pub mod db;
pub mod detection;
pub mod error;
pub mod sensors;
pub mod streaming;

// Re-exports for convenience
pub use alerts::{AlertManager, Priority};
pub use config::Config;
pub use core::{Collaborators, Controller, Engine, EventBus, StatusSnapshot, SystemState};
pub use detection::{Classification, DetectionEvent, DetectionKind, DetectionPipeline, DetectionSource};
pub use error::{Error, Result};

/// HomeGuard version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// HomeGuard name
pub const NAME: &str = "HomeGuard";

/// Build info
pub fn build_info() -> BuildInfo {
    BuildInfo {
        version: VERSION.to_string(),
        target: std::env::consts::ARCH.to_string(),
        os: std::env::consts::OS.to_string(),
        features: enabled_features(),
    }
}

/// Build information
#[derive(Debug, Clone)]
pub struct BuildInfo {
    /// Version string
    pub version: String,
    /// Target architecture
    pub target: String,
    /// Operating system
    pub os: String,
    /// Enabled features
    pub features: Vec<String>,
}

fn enabled_features() -> Vec<String> {
    let mut features = vec![];

    #[cfg(feature = "mqtt")]
    features.push("mqtt".to_string());

    #[cfg(feature = "status-server")]
    features.push("status-server".to_string());

    #[cfg(feature = "alert-log")]
    features.push("alert-log".to_string());

    features
}
