// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/homeguard-rs

//! Alert manager - priority, cooldown, dispatch with retries, counters

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use super::{
    format_message, AlertCounters, AlertRecord, CooldownTracker, DispatchOutcome,
    NotificationChannel, Notification, Priority, SnapshotStore, SubmitOutcome,
};
use crate::config::AlertConfig;
use crate::core::clock::SharedClock;
use crate::core::EventBus;
#[cfg(feature = "alert-log")]
use crate::db::AlertLog;
use crate::detection::DetectionEvent;
use crate::error::Result;

/// Bounded exponential backoff
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub send_timeout: Duration,
}

impl RetryPolicy {
    /// Delay after the given failed attempt (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.initial_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

impl From<&AlertConfig> for RetryPolicy {
    fn from(config: &AlertConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            send_timeout: Duration::from_millis(config.send_timeout_ms),
        }
    }
}

/// Class claimed for one dispatch; released on drop so a cancelled submit
/// never leaves its class closed
struct InFlight<'a> {
    cooldown: &'a Mutex<CooldownTracker>,
    priority: Priority,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.cooldown.lock().end(self.priority);
    }
}

/// Consumes detection events and turns them into notifications
pub struct AlertManager {
    notifier: Arc<dyn NotificationChannel>,
    retry: RetryPolicy,
    clock: SharedClock,
    cooldown: Mutex<CooldownTracker>,
    counters: Mutex<AlertCounters>,
    recent: Mutex<VecDeque<AlertRecord>>,
    recent_capacity: usize,
    bus: Option<Arc<EventBus>>,
    snapshots: Option<Arc<SnapshotStore>>,
    #[cfg(feature = "alert-log")]
    log: Option<Arc<AlertLog>>,
}

impl AlertManager {
    pub fn new(config: &AlertConfig, notifier: Arc<dyn NotificationChannel>, clock: SharedClock) -> Self {
        Self {
            notifier,
            retry: RetryPolicy::from(config),
            clock,
            cooldown: Mutex::new(CooldownTracker::new(&config.cooldown)),
            counters: Mutex::new(AlertCounters::default()),
            recent: Mutex::new(VecDeque::with_capacity(config.recent_capacity)),
            recent_capacity: config.recent_capacity.max(1),
            bus: None,
            snapshots: None,
            #[cfg(feature = "alert-log")]
            log: None,
        }
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    /// Keep the frame of every dispatched alert on disk
    pub fn with_snapshot_store(mut self, store: Arc<SnapshotStore>) -> Self {
        self.snapshots = Some(store);
        self
    }

    /// Persist every alert decision to the SQLite log
    #[cfg(feature = "alert-log")]
    pub fn with_alert_log(mut self, log: Arc<AlertLog>) -> Self {
        self.log = Some(log);
        self
    }

    /// Consistent copy of the counters
    pub fn counters(&self) -> AlertCounters {
        self.counters.lock().clone()
    }

    /// Newest first
    pub fn recent(&self, limit: usize) -> Vec<AlertRecord> {
        self.recent.lock().iter().rev().take(limit).cloned().collect()
    }

    /// Prioritize, count, and dispatch one event unless its class is cooling down
    pub async fn submit(&self, event: DetectionEvent) -> SubmitOutcome {
        let priority = Priority::for_event(&event);
        self.count(&event, priority);

        if !priority.is_dispatchable() {
            debug!("Event {} has no classification, not alerting", event.id());
            return SubmitOutcome::Ignored;
        }

        let message = format_message(priority, &event);
        let claim = {
            let mut cooldown = self.cooldown.lock();
            let now = self.clock.now();
            if cooldown.begin(priority, now) {
                Some(InFlight {
                    cooldown: &self.cooldown,
                    priority,
                })
            } else {
                debug!(
                    "{} cooling down for another {:?}",
                    priority,
                    cooldown.remaining(priority, now)
                );
                None
            }
        };

        let Some(claim) = claim else {
            let record = self.finish(priority, &event, DispatchOutcome::Suppressed, 0, None, message);
            return SubmitOutcome::Suppressed(record);
        };

        let notification = Notification {
            priority,
            message: message.clone(),
            snapshot: event.snapshot().cloned(),
            event_id: event.id().to_string(),
            timestamp: event.timestamp(),
        };

        match self.dispatch(&notification).await {
            Ok(attempts) => {
                self.cooldown.lock().reset(priority, self.clock.now());
                drop(claim);
                let at = self.clock.wall();
                self.save_snapshot(&event, priority, at);
                let record = self.finish(priority, &event, DispatchOutcome::Dispatched, attempts, Some(at), message);
                SubmitOutcome::Dispatched(record)
            }
            Err(attempts) => {
                drop(claim);
                error!(
                    "Failed to notify {} alert for event {} after {} attempts",
                    priority,
                    event.id(),
                    attempts
                );
                if let Some(bus) = &self.bus {
                    bus.publish_error(&format!(
                        "{} alert for event {} not delivered after {} attempts",
                        priority,
                        event.id(),
                        attempts
                    ));
                }
                let record = self.finish(priority, &event, DispatchOutcome::Failed, attempts, None, message);
                SubmitOutcome::Failed(record)
            }
        }
    }

    fn save_snapshot(&self, event: &DetectionEvent, priority: Priority, at: chrono::DateTime<chrono::Utc>) {
        let (Some(store), Some(frame)) = (&self.snapshots, event.snapshot()) else {
            return;
        };
        match store.save(frame, priority, event.id(), at) {
            Ok(path) => debug!("Snapshot saved to {:?}", path),
            Err(e) => warn!("Snapshot write failed: {}", e),
        }
    }

    fn count(&self, event: &DetectionEvent, priority: Priority) {
        let mut counters = self.counters.lock();
        if !priority.is_dispatchable() {
            counters.unclassified += 1;
            return;
        }
        counters.total += 1;
        if event.has_person() {
            counters.person += 1;
        }
        if event.has_animal() {
            counters.animal += 1;
        }
        counters.last_detection = Some(event.timestamp());
    }

    /// Ok(attempts) on success, Err(attempts) once retries are exhausted
    async fn dispatch(&self, notification: &Notification) -> std::result::Result<u32, u32> {
        for attempt in 1..=self.retry.max_attempts {
            let sent = tokio::time::timeout(self.retry.send_timeout, self.notifier.send(notification)).await;
            match sent {
                Ok(Ok(())) => {
                    info!("{} sent via {}", notification.message, self.notifier.name());
                    return Ok(attempt);
                }
                Ok(Err(e)) if !e.is_transient() => {
                    warn!("{} rejected the alert, not retrying: {}", self.notifier.name(), e);
                    return Err(attempt);
                }
                Ok(Err(e)) => warn!(
                    "{} attempt {}/{} failed: {}",
                    self.notifier.name(),
                    attempt,
                    self.retry.max_attempts,
                    e
                ),
                Err(_) => warn!(
                    "{} attempt {}/{} timed out after {:?}",
                    self.notifier.name(),
                    attempt,
                    self.retry.max_attempts,
                    self.retry.send_timeout
                ),
            }

            if attempt < self.retry.max_attempts {
                tokio::time::sleep(self.retry.backoff(attempt)).await;
            }
        }
        Err(self.retry.max_attempts)
    }

    fn finish(
        &self,
        priority: Priority,
        event: &DetectionEvent,
        outcome: DispatchOutcome,
        attempts: u32,
        dispatched_at: Option<chrono::DateTime<chrono::Utc>>,
        message: String,
    ) -> AlertRecord {
        {
            let mut counters = self.counters.lock();
            match outcome {
                DispatchOutcome::Dispatched => counters.dispatched += 1,
                DispatchOutcome::Suppressed => counters.suppressed += 1,
                DispatchOutcome::Failed => counters.failed += 1,
            }
        }

        let record = AlertRecord {
            priority,
            event: event.without_snapshot(),
            outcome,
            dispatched_at,
            attempts,
            message,
        };

        {
            let mut recent = self.recent.lock();
            if recent.len() >= self.recent_capacity {
                recent.pop_front();
            }
            recent.push_back(record.clone());
        }

        self.persist(&record);

        if let Some(bus) = &self.bus {
            bus.publish_alert(priority, outcome, &record.message);
        }
        record
    }

    #[cfg(feature = "alert-log")]
    fn persist(&self, record: &AlertRecord) {
        if let Some(log) = &self.log {
            if let Err(e) = log.insert(record) {
                warn!("Alert log write failed: {}", e);
            }
        }
    }

    #[cfg(not(feature = "alert-log"))]
    fn persist(&self, _record: &AlertRecord) {}

    /// Drain the event queue until shutdown; queued events are discarded on shutdown
    pub async fn run(
        self: Arc<Self>,
        mut events: mpsc::Receiver<DetectionEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        info!("Starting alert manager ({})", self.notifier.name());

        loop {
            tokio::select! {
                maybe = events.recv() => {
                    let Some(event) = maybe else { break };
                    tokio::select! {
                        outcome = self.submit(event) => {
                            if let Some(record) = outcome.record() {
                                debug!("Alert {}: {}", record.outcome, record.message);
                            }
                        }
                        _ = shutdown.recv() => {
                            info!("Alert manager interrupted mid-dispatch");
                            break;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Alert manager shutting down...");
                    break;
                }
            }
        }

        let counters = self.counters();
        info!(
            "Alert totals: {} detections, {} dispatched, {} suppressed, {} failed",
            counters.total, counters.dispatched, counters.suppressed, counters.failed
        );
        Ok(())
    }
}
