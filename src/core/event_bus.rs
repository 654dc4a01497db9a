// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/homeguard-rs

//! Event bus for inter-component communication

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use super::state::{StateEvent, SystemState};
use crate::alerts::{DispatchOutcome, Priority};
use crate::detection::DetectionSource;

/// Event types in the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventType {
    StateChange,
    Detection,
    Alert,
    SystemStatus,
    Error,
}

/// Generic event wrapper
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: u64,
    pub event_type: EventType,
    pub timestamp: DateTime<Utc>,
    pub payload: EventPayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    StateChanged {
        from: SystemState,
        to: SystemState,
        cause: StateEvent,
    },
    Detection {
        event_id: String,
        source: DetectionSource,
        labels: Vec<String>,
    },
    /// Event discarded because the alert queue was full
    DetectionDropped { event_id: String },
    Alert {
        priority: Priority,
        outcome: DispatchOutcome,
        message: String,
    },
    Status { key: String, value: String },
    Error { message: String },
}

/// Central event bus for pub/sub communication
pub struct EventBus {
    event_tx: broadcast::Sender<Event>,
    event_counter: AtomicU64,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity.max(1));

        Self {
            event_tx,
            event_counter: AtomicU64::new(0),
        }
    }

    pub fn publish_state_change(&self, from: SystemState, to: SystemState, cause: StateEvent) {
        self.publish_event(
            EventType::StateChange,
            EventPayload::StateChanged { from, to, cause },
        );
    }

    pub fn publish_detection(&self, event_id: &str, source: DetectionSource, labels: Vec<String>) {
        self.publish_event(
            EventType::Detection,
            EventPayload::Detection {
                event_id: event_id.to_string(),
                source,
                labels,
            },
        );
    }

    pub fn publish_dropped(&self, event_id: &str) {
        self.publish_event(
            EventType::Detection,
            EventPayload::DetectionDropped {
                event_id: event_id.to_string(),
            },
        );
    }

    pub fn publish_alert(&self, priority: Priority, outcome: DispatchOutcome, message: &str) {
        self.publish_event(
            EventType::Alert,
            EventPayload::Alert {
                priority,
                outcome,
                message: message.to_string(),
            },
        );
    }

    pub fn publish_status(&self, key: &str, value: &str) {
        self.publish_event(
            EventType::SystemStatus,
            EventPayload::Status {
                key: key.to_string(),
                value: value.to_string(),
            },
        );
    }

    pub fn publish_error(&self, message: &str) {
        self.publish_event(
            EventType::Error,
            EventPayload::Error {
                message: message.to_string(),
            },
        );
    }

    fn publish_event(&self, event_type: EventType, payload: EventPayload) {
        let id = self.event_counter.fetch_add(1, Ordering::Relaxed);
        let event = Event {
            id,
            event_type,
            timestamp: Utc::now(),
            payload,
        };
        // No subscribers is fine
        let _ = self.event_tx.send(event);
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    pub fn published(&self) -> u64 {
        self.event_counter.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscribers_see_state_changes() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe_events();

        bus.publish_state_change(SystemState::Disarmed, SystemState::Armed, StateEvent::Arm);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.event_type, EventType::StateChange);
        match event.payload {
            EventPayload::StateChanged { from, to, .. } => {
                assert_eq!(from, SystemState::Disarmed);
                assert_eq!(to, SystemState::Armed);
            }
            other => panic!("unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_publish_without_subscribers() {
        let bus = EventBus::new(1);
        bus.publish_status("k", "v");
        bus.publish_error("boom");
        assert_eq!(bus.published(), 2);
    }
}
