// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/homeguard-rs

//! Detection pipeline - fuses triggers, motion and classification into events

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use super::{
    ClassificationStage, ClassifyOutcome, Classifier, DetectionEvent, DetectionSource, MotionStage,
};
use crate::config::Config;
use crate::core::clock::SharedClock;
use crate::core::state::{StateMachine, SystemState};
use crate::core::EventBus;
use crate::error::Result;
use crate::sensors::{FrameSlot, TriggerEvent, TriggerSource};

/// Where a cycle currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum CyclePhase {
    Idle = 0,
    Triggered = 1,
    Confirming = 2,
    Classifying = 3,
    Emit = 4,
}

impl CyclePhase {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => CyclePhase::Triggered,
            2 => CyclePhase::Confirming,
            3 => CyclePhase::Classifying,
            4 => CyclePhase::Emit,
            _ => CyclePhase::Idle,
        }
    }
}

/// How a cycle ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// System disarmed without auto-arm
    Gated,
    NoFrame,
    /// Warm-up, no change or change below the area threshold
    NoMotion,
    /// Confirmed motion that did not reach classification
    MotionOnly,
    /// Event queued for the alert manager
    Emitted(String),
    /// Alert queue full, event discarded
    Dropped(String),
}

/// Pipeline counters
#[derive(Debug, Default)]
pub struct PipelineStats {
    cycles: AtomicU64,
    frames_pulled: AtomicU64,
    confirmations: AtomicU64,
    classifications: AtomicU64,
    timeouts: AtomicU64,
    failures: AtomicU64,
    events_emitted: AtomicU64,
    events_dropped: AtomicU64,
    phase: AtomicU8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineHealth {
    pub cycles: u64,
    pub frames_pulled: u64,
    pub confirmations: u64,
    pub classifications: u64,
    pub timeouts: u64,
    pub failures: u64,
    pub events_emitted: u64,
    pub events_dropped: u64,
    pub phase: CyclePhase,
}

impl PipelineStats {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn set_phase(&self, phase: CyclePhase) {
        self.phase.store(phase as u8, Ordering::Relaxed);
    }

    pub fn phase(&self) -> CyclePhase {
        CyclePhase::from_u8(self.phase.load(Ordering::Relaxed))
    }

    pub fn snapshot(&self) -> PipelineHealth {
        PipelineHealth {
            cycles: self.cycles.load(Ordering::Relaxed),
            frames_pulled: self.frames_pulled.load(Ordering::Relaxed),
            confirmations: self.confirmations.load(Ordering::Relaxed),
            classifications: self.classifications.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
            events_emitted: self.events_emitted.load(Ordering::Relaxed),
            events_dropped: self.events_dropped.load(Ordering::Relaxed),
            phase: self.phase(),
        }
    }
}

/// The hub between triggers, the two vision stages and the alert queue
pub struct DetectionPipeline {
    slot: Arc<FrameSlot>,
    motion: MotionStage,
    classification: ClassificationStage,
    state: Arc<StateMachine>,
    events_tx: mpsc::Sender<DetectionEvent>,
    clock: SharedClock,
    bus: Option<Arc<EventBus>>,
    stats: Arc<PipelineStats>,

    classify_every: u32,
    pulled_since_classify: u32,
    fusion_window: Duration,
    last_pir: Option<Instant>,
    pir_only_fallback: bool,
    high_triggers_alarm: bool,
}

impl DetectionPipeline {
    pub fn new(
        config: &Config,
        slot: Arc<FrameSlot>,
        classifier: Arc<dyn Classifier>,
        state: Arc<StateMachine>,
        events_tx: mpsc::Sender<DetectionEvent>,
        clock: SharedClock,
    ) -> Self {
        let classify_every = config.classification.classify_every.max(1);
        Self {
            slot,
            motion: MotionStage::new(&config.motion),
            classification: ClassificationStage::new(classifier, &config.classification),
            state,
            events_tx,
            clock,
            bus: None,
            stats: Arc::new(PipelineStats::default()),
            classify_every,
            // First confirmed frame may classify immediately
            pulled_since_classify: classify_every,
            fusion_window: Duration::from_millis(config.pipeline.pir_fusion_window_ms),
            last_pir: None,
            pir_only_fallback: config.pipeline.pir_only_fallback,
            high_triggers_alarm: config.alerts.high_triggers_alarm,
        }
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn stats(&self) -> Arc<PipelineStats> {
        self.stats.clone()
    }

    pub fn motion(&self) -> &MotionStage {
        &self.motion
    }

    /// Run one full cycle for a trigger
    pub async fn process(&mut self, trigger: TriggerEvent) -> CycleOutcome {
        PipelineStats::bump(&self.stats.cycles);
        self.stats.set_phase(CyclePhase::Triggered);
        let outcome = self.cycle(trigger).await;
        self.stats.set_phase(CyclePhase::Idle);
        outcome
    }

    async fn cycle(&mut self, trigger: TriggerEvent) -> CycleOutcome {
        let now = self.clock.now();
        if trigger.source == TriggerSource::Pir {
            self.last_pir = Some(now);
        }

        let motion_only = match self.state.current() {
            SystemState::Disarmed if !self.state.policy().auto_arm => return CycleOutcome::Gated,
            SystemState::Disarmed => true,
            SystemState::Armed | SystemState::Alarm => false,
        };

        let Some(frame) = self.slot.take_latest() else {
            if trigger.source == TriggerSource::Pir && self.pir_only_fallback && !motion_only {
                debug!("PIR pulse with no frame, emitting PIR-only event");
                let event = DetectionEvent::new(self.clock.wall(), DetectionSource::Pir, Vec::new(), None);
                return self.emit(event);
            }
            return CycleOutcome::NoFrame;
        };
        PipelineStats::bump(&self.stats.frames_pulled);
        self.pulled_since_classify = self.pulled_since_classify.saturating_add(1);

        self.stats.set_phase(CyclePhase::Confirming);
        let candidate = match self.motion.confirm(&frame) {
            Some(c) if c.confirmed => c,
            _ => return CycleOutcome::NoMotion,
        };
        PipelineStats::bump(&self.stats.confirmations);
        self.state.record_motion();

        if motion_only {
            return CycleOutcome::MotionOnly;
        }
        if self.pulled_since_classify < self.classify_every {
            debug!(
                "Classification throttled ({} of {} frames)",
                self.pulled_since_classify, self.classify_every
            );
            return CycleOutcome::MotionOnly;
        }
        self.pulled_since_classify = 0;

        self.stats.set_phase(CyclePhase::Classifying);
        PipelineStats::bump(&self.stats.classifications);
        let classifications = match self.classification.classify(&frame, Some(candidate.region)).await {
            ClassifyOutcome::Labeled(found) => found,
            ClassifyOutcome::TimedOut => {
                PipelineStats::bump(&self.stats.timeouts);
                Vec::new()
            }
            ClassifyOutcome::Failed(reason) => {
                PipelineStats::bump(&self.stats.failures);
                debug!("Emitting unclassified event after failure: {}", reason);
                Vec::new()
            }
        };

        self.stats.set_phase(CyclePhase::Emit);
        let source = self.source_for(trigger.source, now);
        let event = DetectionEvent::new(self.clock.wall(), source, classifications, Some(frame));

        if event.has_person() {
            let audible = self.high_triggers_alarm || !event.has_animal();
            self.state.record_person(audible);
        }

        self.emit(event)
    }

    fn source_for(&self, trigger: TriggerSource, now: Instant) -> DetectionSource {
        let recent_pir = self
            .last_pir
            .map_or(false, |t| now.saturating_duration_since(t) <= self.fusion_window);
        match trigger {
            TriggerSource::Pir => DetectionSource::Combined,
            TriggerSource::Poll if recent_pir => DetectionSource::Combined,
            TriggerSource::Poll => DetectionSource::Motion,
        }
    }

    fn emit(&self, event: DetectionEvent) -> CycleOutcome {
        let id = event.id().to_string();
        let source = event.source();
        let labels = event.labels();

        match self.events_tx.try_send(event) {
            Ok(()) => {
                PipelineStats::bump(&self.stats.events_emitted);
                info!("Detection {} ({}) {:?}", id, source, labels);
                if let Some(bus) = &self.bus {
                    bus.publish_detection(&id, source, labels);
                }
                CycleOutcome::Emitted(id)
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                PipelineStats::bump(&self.stats.events_dropped);
                warn!("Alert queue unavailable, dropping detection {}", id);
                if let Some(bus) = &self.bus {
                    bus.publish_dropped(&id);
                }
                CycleOutcome::Dropped(id)
            }
        }
    }

    /// Consume triggers until shutdown; an in-flight cycle is abandoned on shutdown
    pub async fn run(
        mut self,
        mut triggers: mpsc::Receiver<TriggerEvent>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        info!("Starting detection pipeline...");

        loop {
            tokio::select! {
                maybe = triggers.recv() => {
                    let Some(trigger) = maybe else { break };
                    tokio::select! {
                        outcome = self.process(trigger) => {
                            debug!("Cycle finished: {:?}", outcome);
                        }
                        _ = shutdown.recv() => {
                            info!("Detection pipeline interrupted mid-cycle");
                            break;
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("Detection pipeline shutting down...");
                    break;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::core::state::StatePolicy;
    use crate::detection::{Classification, Region};
    use crate::error::{Error, Result as CrateResult};
    use crate::sensors::{Frame, Indicator, IndicatorPattern, NullOutput, OutputSignal};
    use async_trait::async_trait;
    use ndarray::Array2;

    struct Scripted(std::result::Result<Vec<Classification>, String>);

    #[async_trait]
    impl Classifier for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn classify(&self, _: &Frame, _: Option<Region>) -> CrateResult<Vec<Classification>> {
            self.0.clone().map_err(Error::Classifier)
        }
    }

    struct Harness {
        pipeline: DetectionPipeline,
        slot: Arc<FrameSlot>,
        state: Arc<StateMachine>,
        clock: Arc<ManualClock>,
        events: mpsc::Receiver<DetectionEvent>,
    }

    #[derive(Default)]
    struct Indicators(parking_lot::Mutex<Vec<(Indicator, IndicatorPattern)>>);

    impl Indicators {
        fn last(&self, indicator: Indicator) -> Option<IndicatorPattern> {
            self.0.lock().iter().rev().find(|(i, _)| *i == indicator).map(|(_, p)| *p)
        }
    }

    impl OutputSignal for Indicators {
        fn set_indicator(&self, indicator: Indicator, pattern: IndicatorPattern) {
            self.0.lock().push((indicator, pattern));
        }
    }

    fn harness(config: Config, result: std::result::Result<Vec<Classification>, String>) -> Harness {
        harness_with_output(config, result, Arc::new(NullOutput))
    }

    fn harness_with_output(
        config: Config,
        result: std::result::Result<Vec<Classification>, String>,
        output: Arc<dyn OutputSignal>,
    ) -> Harness {
        let clock = Arc::new(ManualClock::new());
        let slot = Arc::new(FrameSlot::new(2));
        let state = Arc::new(StateMachine::new(StatePolicy::from(&config.state), clock.clone(), output));
        let (tx, events) = mpsc::channel(config.pipeline.event_queue_capacity);
        let pipeline = DetectionPipeline::new(
            &config,
            slot.clone(),
            Arc::new(Scripted(result)),
            state.clone(),
            tx,
            clock.clone(),
        );
        Harness { pipeline, slot, state, clock, events }
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.motion.warmup_frames = 1;
        config.motion.min_area = Some(20);
        config
    }

    fn blank() -> Frame {
        Frame::new(0, Array2::from_elem((40, 40), 40u8))
    }

    fn intruder() -> Frame {
        let mut pixels = Array2::from_elem((40, 40), 40u8);
        for row in 10..30 {
            for col in 18..24 {
                pixels[[row, col]] = 220;
            }
        }
        Frame::new(1, pixels)
    }

    fn pir() -> TriggerEvent {
        TriggerEvent::now(TriggerSource::Pir)
    }

    fn poll() -> TriggerEvent {
        TriggerEvent::now(TriggerSource::Poll)
    }

    fn person() -> Vec<Classification> {
        vec![Classification::person(0.92, Region::new(18, 10, 6, 20))]
    }

    async fn seed(h: &mut Harness) {
        h.slot.push(blank());
        assert_eq!(h.pipeline.process(poll()).await, CycleOutcome::NoMotion);
    }

    #[tokio::test]
    async fn test_disarmed_is_gated() {
        let mut h = harness(test_config(), Ok(person()));
        h.slot.push(intruder());
        assert_eq!(h.pipeline.process(pir()).await, CycleOutcome::Gated);
        // Frame untouched while gated
        assert_eq!(h.slot.len(), 1);
    }

    #[tokio::test]
    async fn test_person_raises_alarm_and_emits_combined() {
        let mut h = harness(test_config(), Ok(person()));
        h.state.arm();
        seed(&mut h).await;

        h.slot.push(intruder());
        let outcome = h.pipeline.process(pir()).await;
        assert!(matches!(outcome, CycleOutcome::Emitted(_)));
        assert_eq!(h.state.current(), SystemState::Alarm);

        let event = h.events.try_recv().unwrap();
        assert_eq!(event.source(), DetectionSource::Combined);
        assert!(event.has_person());
        assert!(event.snapshot().is_some());
    }

    #[tokio::test]
    async fn test_person_with_animal_alarm_is_silent_when_configured() {
        let mut config = test_config();
        config.alerts.high_triggers_alarm = false;
        let mut both = person();
        both.push(Classification::animal(Some("dog"), 0.81, Region::new(2, 2, 6, 6)));

        let output = Arc::new(Indicators::default());
        let mut h = harness_with_output(config, Ok(both), output.clone());
        h.state.arm();
        seed(&mut h).await;

        h.slot.push(intruder());
        assert!(matches!(h.pipeline.process(pir()).await, CycleOutcome::Emitted(_)));
        assert_eq!(h.state.current(), SystemState::Alarm);
        assert_eq!(output.last(Indicator::Alarm), Some(IndicatorPattern::Blink { interval_ms: 500 }));
        assert_eq!(output.last(Indicator::Buzzer), Some(IndicatorPattern::Off));

        let event = h.events.try_recv().unwrap();
        assert!(event.has_person() && event.has_animal());
    }

    #[tokio::test]
    async fn test_person_only_alarm_sounds_buzzer_when_animal_alarms_silenced() {
        let mut config = test_config();
        config.alerts.high_triggers_alarm = false;

        let output = Arc::new(Indicators::default());
        let mut h = harness_with_output(config, Ok(person()), output.clone());
        h.state.arm();
        seed(&mut h).await;

        h.slot.push(intruder());
        assert!(matches!(h.pipeline.process(pir()).await, CycleOutcome::Emitted(_)));
        assert_eq!(h.state.current(), SystemState::Alarm);
        assert_eq!(
            output.last(Indicator::Buzzer),
            Some(IndicatorPattern::Pulse { on_ms: 500, off_ms: 500 })
        );
    }

    #[tokio::test]
    async fn test_classification_throttled() {
        let mut h = harness(test_config(), Ok(Vec::new()));
        h.state.arm();
        seed(&mut h).await;

        let mut emitted = 0;
        for _ in 0..6 {
            h.slot.push(intruder());
            if let CycleOutcome::Emitted(_) = h.pipeline.process(poll()).await {
                emitted += 1;
            }
        }
        // One in every three pulled frames
        assert_eq!(emitted, 2);
        assert_eq!(h.pipeline.stats().snapshot().confirmations, 6);
    }

    #[tokio::test]
    async fn test_failure_emits_unclassified() {
        let mut h = harness(test_config(), Err("model crashed".into()));
        h.state.arm();
        seed(&mut h).await;

        h.slot.push(intruder());
        assert!(matches!(h.pipeline.process(poll()).await, CycleOutcome::Emitted(_)));
        let event = h.events.try_recv().unwrap();
        assert!(event.classifications().is_empty());
        assert_eq!(event.source(), DetectionSource::Motion);
        assert_eq!(h.pipeline.stats().snapshot().failures, 1);
        assert_eq!(h.state.current(), SystemState::Armed);
    }

    #[tokio::test]
    async fn test_recent_pir_fuses_poll_cycle() {
        let mut h = harness(test_config(), Ok(Vec::new()));
        h.state.arm();
        h.slot.push(blank());
        // PIR seeds the model and stamps the fusion window
        h.pipeline.process(pir()).await;

        h.clock.advance(Duration::from_millis(1500));
        h.slot.push(intruder());
        h.pipeline.process(poll()).await;
        assert_eq!(h.events.try_recv().unwrap().source(), DetectionSource::Combined);
    }

    #[tokio::test]
    async fn test_full_queue_drops_new_event() {
        let mut config = test_config();
        config.pipeline.event_queue_capacity = 1;
        config.classification.classify_every = 1;
        let mut h = harness(config, Ok(Vec::new()));
        h.state.arm();
        seed(&mut h).await;

        h.slot.push(intruder());
        assert!(matches!(h.pipeline.process(poll()).await, CycleOutcome::Emitted(_)));
        h.slot.push(intruder());
        assert!(matches!(h.pipeline.process(poll()).await, CycleOutcome::Dropped(_)));
        assert_eq!(h.pipeline.stats().snapshot().events_dropped, 1);
    }

    #[tokio::test]
    async fn test_auto_arm_runs_motion_only() {
        let mut config = test_config();
        config.state.auto_arm = true;
        let mut h = harness(config, Ok(person()));
        seed(&mut h).await;

        h.slot.push(intruder());
        assert_eq!(h.pipeline.process(poll()).await, CycleOutcome::MotionOnly);
        assert_eq!(h.state.current(), SystemState::Armed);
        assert!(h.events.try_recv().is_err());
        assert_eq!(h.pipeline.stats().snapshot().classifications, 0);
    }

    #[tokio::test]
    async fn test_pir_only_fallback() {
        let mut config = test_config();
        config.pipeline.pir_only_fallback = true;
        let mut h = harness(config, Ok(Vec::new()));
        h.state.arm();

        assert!(matches!(h.pipeline.process(pir()).await, CycleOutcome::Emitted(_)));
        let event = h.events.try_recv().unwrap();
        assert_eq!(event.source(), DetectionSource::Pir);
        assert!(event.snapshot().is_none());

        assert_eq!(h.pipeline.process(poll()).await, CycleOutcome::NoFrame);
    }
}
