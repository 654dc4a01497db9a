// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/homeguard-rs

//! Alerts module - priority mapping, cooldown, dispatch and notifiers

mod cooldown;
mod manager;
mod notifier;
mod snapshots;

pub use cooldown::CooldownTracker;
pub use manager::{AlertManager, RetryPolicy};
pub use notifier::*;
pub use snapshots::{SnapshotStore, StoredSnapshot};

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::detection::DetectionEvent;

/// Alert priority, ordered from least to most urgent
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    /// Nothing recognized; never dispatched
    None,
    /// Animal only
    Low,
    /// Person and animal together
    High,
    /// Person only
    Critical,
}

impl Priority {
    /// Map an event's classifications to a priority
    ///
    /// Person and animal together is HIGH, not CRITICAL.
    pub fn for_event(event: &DetectionEvent) -> Self {
        match (event.has_person(), event.has_animal()) {
            (true, true) => Priority::High,
            (true, false) => Priority::Critical,
            (false, true) => Priority::Low,
            (false, false) => Priority::None,
        }
    }

    pub fn is_dispatchable(self) -> bool {
        self != Priority::None
    }

    pub fn emoji(self) -> &'static str {
        match self {
            Priority::Critical => "🚨",
            Priority::High => "⚠️",
            Priority::Low => "🐾",
            Priority::None => "ℹ️",
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::None => "NONE",
            Priority::Low => "LOW",
            Priority::High => "HIGH",
            Priority::Critical => "CRITICAL",
        };
        f.write_str(s)
    }
}

/// What happened to an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchOutcome {
    Dispatched,
    /// Inside the cooldown window
    Suppressed,
    /// Retries exhausted
    Failed,
}

impl fmt::Display for DispatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DispatchOutcome::Dispatched => "dispatched",
            DispatchOutcome::Suppressed => "suppressed",
            DispatchOutcome::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One alert decision, kept in the rolling log
#[derive(Debug, Clone, Serialize)]
pub struct AlertRecord {
    pub priority: Priority,
    pub event: DetectionEvent,
    pub outcome: DispatchOutcome,
    /// Set only when the notification went out
    pub dispatched_at: Option<DateTime<Utc>>,
    pub attempts: u32,
    pub message: String,
}

/// Result of `AlertManager::submit`
#[derive(Debug, Clone)]
pub enum SubmitOutcome {
    /// NONE priority; counted, never dispatched
    Ignored,
    Dispatched(AlertRecord),
    Suppressed(AlertRecord),
    Failed(AlertRecord),
}

impl SubmitOutcome {
    pub fn record(&self) -> Option<&AlertRecord> {
        match self {
            SubmitOutcome::Ignored => None,
            SubmitOutcome::Dispatched(r) | SubmitOutcome::Suppressed(r) | SubmitOutcome::Failed(r) => Some(r),
        }
    }

    pub fn was_dispatched(&self) -> bool {
        matches!(self, SubmitOutcome::Dispatched(_))
    }
}

/// Detection and delivery counters
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertCounters {
    /// Events with at least one classification
    pub total: u64,
    pub person: u64,
    pub animal: u64,
    /// Motion events without a usable classification
    pub unclassified: u64,
    pub dispatched: u64,
    pub suppressed: u64,
    pub failed: u64,
    pub last_detection: Option<DateTime<Utc>>,
}

/// Notification text in the bot's format, e.g. `🚨 CRITICAL: Person detected (92%)`
pub fn format_message(priority: Priority, event: &DetectionEvent) -> String {
    let pct = |c: f64| (c * 100.0).round() as u32;
    let body = match priority {
        Priority::Critical => match event.best_person() {
            Some(p) => format!("Person detected ({}%)", pct(p.confidence)),
            None => "Person detected".to_string(),
        },
        Priority::High => {
            let animal = event
                .best_animal()
                .map(|a| a.kind.label())
                .unwrap_or_else(|| "animal".to_string());
            match event.best_person() {
                Some(p) => format!("Person and {} detected ({}%)", animal, pct(p.confidence)),
                None => format!("Person and {} detected", animal),
            }
        }
        Priority::Low => match event.best_animal() {
            Some(a) => format!("{} detected ({}%)", capitalize(&a.kind.label()), pct(a.confidence)),
            None => "Animal detected".to_string(),
        },
        Priority::None => "Motion detected".to_string(),
    };
    format!("{} {}: {}", priority.emoji(), priority, body)
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
