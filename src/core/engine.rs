// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/homeguard-rs

//! Main engine - wires acquisition, detection, state and alerting into long-lived tasks

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sysinfo::System;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::clock::SharedClock;
use super::state::{CommandOutcome, StateMachine, StatePolicy, SystemState};
use super::{Event, EventBus, HostStats, Scheduler, ShutdownReport, StatusSnapshot};
use crate::alerts::{AlertManager, AlertRecord, NotificationChannel, SnapshotStore, StoredSnapshot};
use crate::config::Config;
use crate::detection::{Classifier, DetectionPipeline, PipelineStats};
use crate::error::{Error, Result};
use crate::sensors::{
    run_poll_ticker, trigger_channel, Acquisition, AcquisitionStats, Frame, FrameSlot, FrameSource,
    HardwareTrigger, Indicator, IndicatorPattern, OutputSignal, TriggerLine,
};

const EVENT_BUS_CAPACITY: usize = 256;

/// External capabilities the engine drives
pub struct Collaborators {
    pub frame_source: Box<dyn FrameSource>,
    /// `None` runs the vision poll path only
    pub trigger: Option<Box<dyn HardwareTrigger>>,
    pub classifier: Arc<dyn Classifier>,
    pub output: Arc<dyn OutputSignal>,
    pub notifier: Arc<dyn NotificationChannel>,
}

struct ControllerInner {
    system_name: String,
    running: AtomicBool,
    started: Instant,
    started_at: DateTime<Utc>,
    state: Arc<StateMachine>,
    alerts: Arc<AlertManager>,
    camera: Arc<AcquisitionStats>,
    pipeline: Arc<PipelineStats>,
    slot: Arc<FrameSlot>,
    triggers: TriggerLine,
    bus: Arc<EventBus>,
    snapshots: Option<Arc<SnapshotStore>>,
    host: Mutex<System>,
}

/// Cloneable command surface, safe to use from any task while the engine runs
#[derive(Clone)]
pub struct Controller {
    inner: Arc<ControllerInner>,
}

impl Controller {
    pub fn arm(&self) -> Result<CommandOutcome> {
        self.command("arm", |s| s.arm())
    }

    pub fn disarm(&self) -> Result<CommandOutcome> {
        self.command("disarm", |s| s.disarm())
    }

    pub fn clear_alarm(&self) -> Result<CommandOutcome> {
        self.command("clear_alarm", |s| s.clear_alarm())
    }

    fn command<F>(&self, name: &str, f: F) -> Result<CommandOutcome>
    where
        F: FnOnce(&StateMachine) -> CommandOutcome,
    {
        if !self.is_running() {
            return Err(Error::ShuttingDown);
        }
        let outcome = f(&self.inner.state);
        match outcome {
            CommandOutcome::Applied { from, to } => info!("Command {}: {} -> {}", name, from, to),
            CommandOutcome::NoOp { state } => debug!("Command {} ignored in {}", name, state),
        }
        Ok(outcome)
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    pub fn current_state(&self) -> SystemState {
        self.inner.state.current()
    }

    /// Watch every state change
    pub fn subscribe_state(&self) -> watch::Receiver<SystemState> {
        self.inner.state.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<Event> {
        self.inner.bus.subscribe_events()
    }

    /// Latest alert decisions, newest first
    pub fn recent_alerts(&self, limit: usize) -> Vec<AlertRecord> {
        self.inner.alerts.recent(limit)
    }

    /// Latest camera frame, whether or not it was classified
    pub fn live_frame(&self) -> Option<Frame> {
        self.inner.camera.latest_frame()
    }

    /// Newest stored alert snapshot; `None` when storage is disabled or empty
    pub fn latest_snapshot(&self) -> Result<Option<StoredSnapshot>> {
        match &self.inner.snapshots {
            Some(store) => store.latest(),
            None => Ok(None),
        }
    }

    /// Each subsystem is read under its own lock once
    pub fn status(&self) -> StatusSnapshot {
        let inner = &self.inner;
        let host = HostStats::sample(&mut inner.host.lock());

        StatusSnapshot {
            system_name: inner.system_name.clone(),
            running: self.is_running(),
            started_at: inner.started_at,
            uptime_seconds: inner.started.elapsed().as_secs(),
            state: inner.state.snapshot(),
            alerts: inner.alerts.counters(),
            camera: inner.camera.snapshot(),
            pipeline: inner.pipeline.snapshot(),
            frames_dropped: inner.slot.dropped(),
            triggers_coalesced: inner.triggers.coalesced(),
            host,
        }
    }
}

/// Main homeguard engine
pub struct Engine {
    config: Arc<Config>,
    scheduler: Scheduler,
    controller: Controller,
    output: Arc<dyn OutputSignal>,
}

impl Engine {
    /// Validate the configuration and spawn every long-lived task
    pub async fn start(config: Config, collaborators: Collaborators, clock: SharedClock) -> Result<Self> {
        config.validate()?;
        info!("Starting {} engine...", config.system_name);

        let Collaborators {
            frame_source,
            trigger,
            classifier,
            output,
            notifier,
        } = collaborators;

        let bus = Arc::new(EventBus::new(EVENT_BUS_CAPACITY));
        let state = Arc::new(
            StateMachine::new(StatePolicy::from(&config.state), clock.clone(), output.clone())
                .with_event_bus(bus.clone()),
        );

        let snapshots = if config.snapshots.enabled {
            Some(Arc::new(SnapshotStore::open(config.snapshot_dir(), &config.snapshots)?))
        } else {
            None
        };

        let alerts = AlertManager::new(&config.alerts, notifier, clock.clone()).with_event_bus(bus.clone());
        let alerts = match &snapshots {
            Some(store) => alerts.with_snapshot_store(store.clone()),
            None => alerts,
        };
        #[cfg(feature = "alert-log")]
        let alerts = if config.database.enabled {
            let log = crate::db::AlertLog::open(&config.database)?;
            alerts.with_alert_log(Arc::new(log))
        } else {
            alerts
        };
        let alerts = Arc::new(alerts);

        let slot = Arc::new(FrameSlot::new(config.camera.buffer_slots));
        let (line, trigger_rx) = trigger_channel(config.pipeline.trigger_capacity);
        let (events_tx, events_rx) = mpsc::channel(config.pipeline.event_queue_capacity);

        let acquisition = Acquisition::new(frame_source, slot.clone(), &config.camera);
        let pipeline = DetectionPipeline::new(
            &config,
            slot.clone(),
            classifier,
            state.clone(),
            events_tx,
            clock,
        )
        .with_event_bus(bus.clone());

        let controller = Controller {
            inner: Arc::new(ControllerInner {
                system_name: config.system_name.clone(),
                running: AtomicBool::new(true),
                started: Instant::now(),
                started_at: Utc::now(),
                state: state.clone(),
                alerts: alerts.clone(),
                camera: acquisition.stats(),
                pipeline: pipeline.stats(),
                slot,
                triggers: line.clone(),
                bus: bus.clone(),
                snapshots,
                host: Mutex::new(System::new()),
            }),
        };

        let mut scheduler = Scheduler::new();

        scheduler.spawn("acquisition", acquisition.run(scheduler.shutdown_signal()));
        scheduler.spawn(
            "poll-ticker",
            run_poll_ticker(
                line.clone(),
                Duration::from_millis(config.pipeline.poll_interval_ms),
                scheduler.shutdown_signal(),
            ),
        );

        match trigger {
            Some(mut hw) => {
                let shutdown = scheduler.shutdown_signal();
                let line = line.clone();
                scheduler.spawn("hardware-trigger", async move { hw.run(line, shutdown).await });
            }
            None => info!("No hardware trigger wired, running on vision polling only"),
        }

        scheduler.spawn("pipeline", pipeline.run(trigger_rx, scheduler.shutdown_signal()));
        scheduler.spawn("alerts", alerts.run(events_rx, scheduler.shutdown_signal()));
        scheduler.spawn(
            "state-ticker",
            run_state_ticker(
                state.clone(),
                Duration::from_millis(config.state.tick_interval_ms),
                scheduler.shutdown_signal(),
            ),
        );

        #[cfg(feature = "status-server")]
        {
            if config.streaming.status_enabled {
                let server = crate::streaming::StatusServer::bind(&config.streaming, controller.clone()).await?;
                scheduler.spawn("status-server", server.run(scheduler.shutdown_signal()));
            }
        }

        if config.state.start_armed {
            state.arm();
        }

        bus.publish_status("engine", "started");
        info!(
            "Engine started with {} tasks: {}",
            scheduler.len(),
            scheduler.task_names().join(", ")
        );

        Ok(Self {
            config: Arc::new(config),
            scheduler,
            controller,
            output,
        })
    }

    pub fn controller(&self) -> Controller {
        self.controller.clone()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn task_names(&self) -> Vec<&str> {
        self.scheduler.task_names()
    }

    /// Reject new commands, stop every task within the grace period and
    /// switch all indicators off. Queued detections are discarded.
    pub async fn shutdown(mut self) -> ShutdownReport {
        info!("Stopping engine...");
        self.controller.inner.running.store(false, Ordering::Release);
        self.controller.inner.bus.publish_status("engine", "stopping");

        let report = self.scheduler.shutdown(self.config.shutdown_grace()).await;

        for indicator in [Indicator::Status, Indicator::Alarm, Indicator::Buzzer] {
            self.output.set_indicator(indicator, IndicatorPattern::Off);
        }

        if report.is_clean() {
            info!("Engine stopped");
        } else {
            warn!(
                "Engine stopped with failed tasks {:?} and aborted tasks {:?}",
                report.failed, report.aborted
            );
        }
        report
    }
}

/// Drive the state machine's inactivity and quiet-period timers
async fn run_state_ticker(
    state: Arc<StateMachine>,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Some(outcome) = state.tick() {
                    debug!("Timer transition: {:?}", outcome);
                }
            }
            _ = shutdown.recv() => {
                debug!("State ticker shutting down");
                break;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::LogNotifier;
    use crate::core::clock::ManualClock;
    use crate::detection::{BlockingClassifier, HeuristicModel};
    use crate::sensors::{NullOutput, SimulatedCamera};

    fn test_config() -> Config {
        let mut config = Config::default();
        config.streaming.status_enabled = false;
        config.database.enabled = false;
        config.snapshots.enabled = false;
        config.shutdown_grace_ms = 500;
        config
    }

    fn collaborators() -> Collaborators {
        Collaborators {
            frame_source: Box::new(SimulatedCamera::new("cam", 64, 48, 7)),
            trigger: None,
            classifier: Arc::new(BlockingClassifier::new(HeuristicModel::default())),
            output: Arc::new(NullOutput),
            notifier: Arc::new(LogNotifier),
        }
    }

    #[tokio::test]
    async fn test_commands_and_shutdown() {
        let clock = Arc::new(ManualClock::new());
        let engine = Engine::start(test_config(), collaborators(), clock).await.unwrap();
        let controller = engine.controller();

        assert!(engine.task_names().contains(&"pipeline"));
        assert!(!engine.task_names().contains(&"hardware-trigger"));

        assert_eq!(
            controller.arm().unwrap(),
            CommandOutcome::Applied {
                from: SystemState::Disarmed,
                to: SystemState::Armed
            }
        );
        assert!(!controller.arm().unwrap().changed());
        assert_eq!(controller.status().state.state, SystemState::Armed);

        let report = engine.shutdown().await;
        assert!(report.is_clean(), "{:?}", report);
        assert!(matches!(controller.disarm(), Err(Error::ShuttingDown)));
        assert!(!controller.status().running);
        assert!(controller.latest_snapshot().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_snapshot_store_created_under_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config();
        config.snapshots.enabled = true;
        config.data_dir = dir.path().to_path_buf();

        let engine = Engine::start(config, collaborators(), Arc::new(ManualClock::new()))
            .await
            .unwrap();
        assert!(dir.path().join("snapshots").is_dir());
        assert!(engine.controller().latest_snapshot().unwrap().is_none());
        engine.shutdown().await;
    }

    #[tokio::test]
    async fn test_invalid_config_refuses_start() {
        let mut config = test_config();
        config.classification.min_confidence = 1.5;
        let clock = Arc::new(ManualClock::new());
        assert!(matches!(
            Engine::start(config, collaborators(), clock).await,
            Err(Error::Config(_))
        ));
    }
}
