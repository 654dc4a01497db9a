// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/homeguard-rs

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use ndarray::Array2;
use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};

use homeguard::alerts::{AlertManager, LogNotifier, Notification, NotificationChannel, Priority, SubmitOutcome};
use homeguard::core::clock::ManualClock;
use homeguard::core::state::{StateMachine, StatePolicy};
use homeguard::detection::{
    BlockingClassifier, Classification, Classifier, CycleOutcome, DetectionPipeline, HeuristicModel, Region,
};
use homeguard::sensors::{Frame, FrameSlot, NullOutput, SimulatedCamera, TriggerEvent, TriggerSource};
use homeguard::{Collaborators, Config, DetectionSource, Engine, Error, Result, SystemState};

struct FixedClassifier(Vec<Classification>);

#[async_trait]
impl Classifier for FixedClassifier {
    fn name(&self) -> &str {
        "fixed"
    }

    async fn classify(&self, _: &Frame, _: Option<Region>) -> Result<Vec<Classification>> {
        Ok(self.0.clone())
    }
}

/// Never answers; signals once a call is in flight
struct HangingClassifier {
    entered: Arc<Notify>,
}

#[async_trait]
impl Classifier for HangingClassifier {
    fn name(&self) -> &str {
        "hanging"
    }

    async fn classify(&self, _: &Frame, _: Option<Region>) -> Result<Vec<Classification>> {
        self.entered.notify_one();
        std::future::pending().await
    }
}

#[derive(Default)]
struct Recorder {
    sent: Mutex<Vec<Notification>>,
}

#[async_trait]
impl NotificationChannel for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    async fn send(&self, notification: &Notification) -> Result<()> {
        self.sent.lock().push(notification.clone());
        Ok(())
    }
}

fn frame(sequence: u64, intruder: bool) -> Frame {
    let mut pixels = Array2::from_elem((48, 64), 40u8);
    if intruder {
        for row in 10..40 {
            for col in 28..36 {
                pixels[[row, col]] = 220;
            }
        }
    }
    Frame::new(sequence, pixels)
}

fn pipeline_config() -> Config {
    let mut config = Config::default();
    config.motion.warmup_frames = 1;
    config.motion.min_area = Some(50);
    config.streaming.status_enabled = false;
    config.database.enabled = false;
    config.snapshots.enabled = false;
    config
}

#[tokio::test]
async fn pir_motion_person_raises_alarm_and_one_critical_alert() {
    let config = pipeline_config();
    let clock = Arc::new(ManualClock::new());
    let slot = Arc::new(FrameSlot::new(2));
    let state = Arc::new(StateMachine::new(
        StatePolicy::from(&config.state),
        clock.clone(),
        Arc::new(NullOutput),
    ));
    let (tx, mut rx) = mpsc::channel(config.pipeline.event_queue_capacity);
    let classifier = Arc::new(FixedClassifier(vec![Classification::person(
        0.92,
        Region::new(28, 10, 8, 30),
    )]));
    let mut pipeline = DetectionPipeline::new(&config, slot.clone(), classifier, state.clone(), tx, clock.clone());

    let recorder = Arc::new(Recorder::default());
    let manager = AlertManager::new(&config.alerts, recorder.clone(), clock.clone());

    state.arm();
    slot.push(frame(0, false));
    assert_eq!(
        pipeline.process(TriggerEvent::now(TriggerSource::Poll)).await,
        CycleOutcome::NoMotion
    );

    slot.push(frame(1, true));
    let outcome = pipeline.process(TriggerEvent::now(TriggerSource::Pir)).await;
    assert!(matches!(outcome, CycleOutcome::Emitted(_)));
    assert_eq!(state.current(), SystemState::Alarm);

    let event = rx.try_recv().unwrap();
    assert_eq!(event.source(), DetectionSource::Combined);
    assert_eq!(Priority::for_event(&event), Priority::Critical);

    let submitted = manager.submit(event).await;
    assert!(matches!(submitted, SubmitOutcome::Dispatched(_)));

    let sent = recorder.sent.lock();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].priority, Priority::Critical);
    assert_eq!(sent[0].message, "🚨 CRITICAL: Person detected (92%)");
    assert!(sent[0].snapshot.is_some());

    let counters = manager.counters();
    assert_eq!((counters.total, counters.person, counters.animal), (1, 1, 0));
    assert_eq!(counters.dispatched, 1);
}

#[tokio::test]
async fn shutdown_completes_with_classification_in_flight() {
    let mut config = pipeline_config();
    config.camera.fps = 30;
    config.pipeline.poll_interval_ms = 20;
    config.classification.timeout_ms = 60_000;
    config.classification.classify_every = 1;
    config.shutdown_grace_ms = 1_000;
    config.state.start_armed = true;

    let entered = Arc::new(Notify::new());
    let collaborators = Collaborators {
        frame_source: Box::new(SimulatedCamera::new("cam", 64, 48, 3).with_schedule(6, 30)),
        trigger: None,
        classifier: Arc::new(HangingClassifier { entered: entered.clone() }),
        output: Arc::new(NullOutput),
        notifier: Arc::new(LogNotifier),
    };

    let engine = Engine::start(config, collaborators, homeguard::core::SystemClock::shared())
        .await
        .unwrap();

    tokio::time::timeout(Duration::from_secs(10), entered.notified())
        .await
        .expect("classification never started");

    let started = Instant::now();
    let report = engine.shutdown().await;
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(report.aborted.is_empty(), "{:?}", report);
    assert!(report.failed.is_empty(), "{:?}", report);
}

#[tokio::test]
async fn commands_from_many_tasks_stay_consistent() {
    let mut config = pipeline_config();
    config.shutdown_grace_ms = 500;
    let collaborators = Collaborators {
        frame_source: Box::new(SimulatedCamera::new("cam", 32, 24, 9)),
        trigger: None,
        classifier: Arc::new(BlockingClassifier::new(HeuristicModel::default())),
        output: Arc::new(NullOutput),
        notifier: Arc::new(LogNotifier),
    };
    let engine = Engine::start(config, collaborators, Arc::new(ManualClock::new()))
        .await
        .unwrap();
    let controller = engine.controller();
    let mut watch = controller.subscribe_state();

    let mut handles = Vec::new();
    for i in 0..16 {
        let controller = controller.clone();
        handles.push(tokio::spawn(async move {
            for _ in 0..50 {
                if i % 2 == 0 {
                    controller.arm()?;
                } else {
                    controller.disarm()?;
                }
                tokio::task::yield_now().await;
            }
            Ok::<_, Error>(())
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let status = controller.status();
    assert_eq!(status.state.state, controller.current_state());
    assert_eq!(*watch.borrow_and_update(), controller.current_state());

    engine.shutdown().await;
    assert!(matches!(controller.arm(), Err(Error::ShuttingDown)));
}
