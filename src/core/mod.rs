// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/homeguard-rs

//! Core module - state machine, lifecycle and wiring of all subsystems

pub mod clock;
mod engine;
mod event_bus;
mod scheduler;
pub mod state;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use engine::{Collaborators, Controller, Engine};
pub use event_bus::{Event, EventBus, EventPayload, EventType};
pub use scheduler::{Scheduler, ShutdownReport};
pub use state::{CommandOutcome, StateEvent, StateMachine, StatePolicy, StateSnapshot, SystemState};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sysinfo::System;

use crate::alerts::AlertCounters;
use crate::detection::PipelineHealth;
use crate::sensors::CameraHealth;

/// Point-in-time view of the whole system
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub system_name: String,
    pub running: bool,
    pub started_at: DateTime<Utc>,
    pub uptime_seconds: u64,
    pub state: StateSnapshot,
    pub alerts: AlertCounters,
    pub camera: CameraHealth,
    pub pipeline: PipelineHealth,
    /// Frames overwritten in the slot before the pipeline pulled them
    pub frames_dropped: u64,
    /// Trigger pulses merged while the pipeline was busy
    pub triggers_coalesced: u64,
    pub host: HostStats,
}

/// Host resource usage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostStats {
    pub cpu_usage: f32,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub memory_usage: f32,
}

impl HostStats {
    /// Refresh and read CPU and memory counters. CPU usage needs two samples,
    /// so the first call on a fresh `System` reports 0.
    pub fn sample(system: &mut System) -> Self {
        system.refresh_cpu();
        system.refresh_memory();

        let total = system.total_memory();
        let used = system.used_memory();
        Self {
            cpu_usage: system.global_cpu_info().cpu_usage(),
            memory_used_bytes: used,
            memory_total_bytes: total,
            memory_usage: if total == 0 {
                0.0
            } else {
                used as f32 / total as f32 * 100.0
            },
        }
    }
}
