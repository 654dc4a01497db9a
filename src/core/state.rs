// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/homeguard-rs

//! Arm/disarm/alarm state machine
//!
//! `transition` is the pure, total transition function. `StateMachine` owns the
//! single authoritative `(state, armed_since, last_motion, last_person)` tuple
//! behind one lock and runs indicator entry actions on every change.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tracing::{debug, info};

use super::clock::SharedClock;
use super::event_bus::EventBus;
use crate::config::StateConfig;
use crate::sensors::{Indicator, IndicatorPattern, OutputSignal};

/// Operational state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SystemState {
    Disarmed,
    Armed,
    Alarm,
}

impl fmt::Display for SystemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SystemState::Disarmed => "disarmed",
            SystemState::Armed => "armed",
            SystemState::Alarm => "alarm",
        };
        f.write_str(s)
    }
}

/// Inputs to the transition function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateEvent {
    Arm,
    Disarm,
    ClearAlarm,
    MotionConfirmed,
    PersonDetected,
    NoMotionTimeout,
    QuietPeriodElapsed,
}

impl StateEvent {
    pub const ALL: [StateEvent; 7] = [
        StateEvent::Arm,
        StateEvent::Disarm,
        StateEvent::ClearAlarm,
        StateEvent::MotionConfirmed,
        StateEvent::PersonDetected,
        StateEvent::NoMotionTimeout,
        StateEvent::QuietPeriodElapsed,
    ];
}

/// Total transition function. Unlisted pairs stay in place.
pub fn transition(state: SystemState, event: StateEvent, auto_arm: bool) -> SystemState {
    use StateEvent::*;
    use SystemState::*;

    match (state, event) {
        // Disarm always wins, alarm included
        (Armed | Alarm, Disarm) => Disarmed,

        (Disarmed, Arm) => Armed,
        (Disarmed, MotionConfirmed) if auto_arm => Armed,

        (Armed, PersonDetected) => Alarm,
        (Armed, NoMotionTimeout) if auto_arm => Disarmed,

        (Alarm, ClearAlarm | QuietPeriodElapsed) => Armed,

        (s, _) => s,
    }
}

/// Result of applying one event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum CommandOutcome {
    /// The state changed
    Applied { from: SystemState, to: SystemState },
    /// Already in the requested state, or the event does not apply
    NoOp { state: SystemState },
}

impl CommandOutcome {
    pub fn changed(&self) -> bool {
        matches!(self, CommandOutcome::Applied { .. })
    }

    pub fn state(&self) -> SystemState {
        match *self {
            CommandOutcome::Applied { to, .. } => to,
            CommandOutcome::NoOp { state } => state,
        }
    }
}

/// Consistent copy of the guarded tuple
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub state: SystemState,
    pub armed_since: Option<DateTime<Utc>>,
    pub last_motion: Option<DateTime<Utc>>,
    pub last_person: Option<DateTime<Utc>>,
    pub changed_at: DateTime<Utc>,
}

#[derive(Debug)]
struct StateCell {
    state: SystemState,
    armed_since: Option<Instant>,
    last_motion: Option<Instant>,
    last_person: Option<Instant>,
    changed_at: Instant,
    // Buzzer on alarm entry; cleared for person+animal events when configured
    audible_alarm: bool,
}

/// Timer policy derived from configuration
#[derive(Debug, Clone)]
pub struct StatePolicy {
    pub auto_arm: bool,
    pub no_motion_timeout: Duration,
    pub alarm_quiet_period: Option<Duration>,
}

impl From<&StateConfig> for StatePolicy {
    fn from(config: &StateConfig) -> Self {
        Self {
            auto_arm: config.auto_arm,
            no_motion_timeout: config.no_motion_timeout(),
            alarm_quiet_period: config.alarm_quiet_period(),
        }
    }
}

/// Process-wide state owner
pub struct StateMachine {
    cell: Mutex<StateCell>,
    policy: StatePolicy,
    clock: SharedClock,
    output: Arc<dyn OutputSignal>,
    bus: Option<Arc<EventBus>>,
    watch_tx: watch::Sender<SystemState>,
}

impl StateMachine {
    pub fn new(policy: StatePolicy, clock: SharedClock, output: Arc<dyn OutputSignal>) -> Self {
        let (watch_tx, _) = watch::channel(SystemState::Disarmed);
        let now = clock.now();
        Self {
            cell: Mutex::new(StateCell {
                state: SystemState::Disarmed,
                armed_since: None,
                last_motion: None,
                last_person: None,
                changed_at: now,
                audible_alarm: true,
            }),
            policy,
            clock,
            output,
            bus: None,
            watch_tx,
        }
    }

    /// Publish transitions on the event bus
    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn policy(&self) -> &StatePolicy {
        &self.policy
    }

    pub fn current(&self) -> SystemState {
        self.cell.lock().state
    }

    /// Receiver that observes every state change
    pub fn subscribe(&self) -> watch::Receiver<SystemState> {
        self.watch_tx.subscribe()
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let cell = self.cell.lock();
        let now = self.clock.now();
        let wall = self.clock.wall();
        let to_wall = |t: Option<Instant>| t.map(|t| instant_to_wall(now, wall, t));
        StateSnapshot {
            state: cell.state,
            armed_since: to_wall(cell.armed_since),
            last_motion: to_wall(cell.last_motion),
            last_person: to_wall(cell.last_person),
            changed_at: instant_to_wall(now, wall, cell.changed_at),
        }
    }

    pub fn arm(&self) -> CommandOutcome {
        self.apply(StateEvent::Arm)
    }

    pub fn disarm(&self) -> CommandOutcome {
        self.apply(StateEvent::Disarm)
    }

    pub fn clear_alarm(&self) -> CommandOutcome {
        self.apply(StateEvent::ClearAlarm)
    }

    /// Confirmed motion: refresh the inactivity deadline, maybe auto-arm
    pub fn record_motion(&self) -> CommandOutcome {
        let mut cell = self.cell.lock();
        cell.last_motion = Some(self.clock.now());
        self.apply_locked(&mut cell, StateEvent::MotionConfirmed)
    }

    /// Person classified; `audible` selects whether the buzzer sounds on alarm entry
    pub fn record_person(&self, audible: bool) -> CommandOutcome {
        let mut cell = self.cell.lock();
        cell.last_person = Some(self.clock.now());
        cell.audible_alarm = audible;
        self.apply_locked(&mut cell, StateEvent::PersonDetected)
    }

    /// Apply a single event under the state lock
    pub fn apply(&self, event: StateEvent) -> CommandOutcome {
        let mut cell = self.cell.lock();
        self.apply_locked(&mut cell, event)
    }

    /// Evaluate timer deadlines; called by the background ticker
    pub fn tick(&self) -> Option<CommandOutcome> {
        let mut cell = self.cell.lock();
        let now = self.clock.now();

        match cell.state {
            SystemState::Armed if self.policy.auto_arm => {
                let since = match (cell.armed_since, cell.last_motion) {
                    (Some(a), Some(m)) => a.max(m),
                    (a, m) => a.or(m)?,
                };
                if now.saturating_duration_since(since) >= self.policy.no_motion_timeout {
                    info!(
                        "No confirmed motion for {:?}, auto-disarming",
                        self.policy.no_motion_timeout
                    );
                    return Some(self.apply_locked(&mut cell, StateEvent::NoMotionTimeout));
                }
            }
            SystemState::Alarm => {
                let quiet = self.policy.alarm_quiet_period?;
                let since = cell.last_person.unwrap_or(cell.changed_at);
                if now.saturating_duration_since(since) >= quiet {
                    info!("No person for {:?}, clearing alarm", quiet);
                    return Some(self.apply_locked(&mut cell, StateEvent::QuietPeriodElapsed));
                }
            }
            _ => {}
        }
        None
    }

    fn apply_locked(&self, cell: &mut StateCell, event: StateEvent) -> CommandOutcome {
        let from = cell.state;
        let to = transition(from, event, self.policy.auto_arm);

        if from == to {
            debug!("{:?} in state {} is a no-op", event, from);
            return CommandOutcome::NoOp { state: from };
        }

        let now = self.clock.now();
        cell.state = to;
        cell.changed_at = now;
        match to {
            SystemState::Armed if from == SystemState::Disarmed => {
                cell.armed_since = Some(now);
            }
            SystemState::Disarmed => {
                cell.armed_since = None;
            }
            _ => {}
        }

        info!("State {} -> {} ({:?})", from, to, event);
        self.enter(to, cell.audible_alarm);
        self.watch_tx.send_replace(to);
        if let Some(bus) = &self.bus {
            bus.publish_state_change(from, to, event);
        }

        CommandOutcome::Applied { from, to }
    }

    fn enter(&self, state: SystemState, audible: bool) {
        use IndicatorPattern::*;

        let (status, alarm, buzzer) = match state {
            SystemState::Disarmed => (Off, Off, Off),
            SystemState::Armed => (Solid, Off, Off),
            SystemState::Alarm => (
                Off,
                Blink { interval_ms: 500 },
                if audible { Pulse { on_ms: 500, off_ms: 500 } } else { Off },
            ),
        };
        self.output.set_indicator(Indicator::Status, status);
        self.output.set_indicator(Indicator::Alarm, alarm);
        self.output.set_indicator(Indicator::Buzzer, buzzer);
    }
}

fn instant_to_wall(now: Instant, wall: DateTime<Utc>, t: Instant) -> DateTime<Utc> {
    let age = now.saturating_duration_since(t);
    wall - chrono::Duration::from_std(age).unwrap_or_else(|_| chrono::Duration::zero())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;

    #[derive(Default)]
    struct RecordingOutput {
        calls: Mutex<Vec<(Indicator, IndicatorPattern)>>,
    }

    impl OutputSignal for RecordingOutput {
        fn set_indicator(&self, indicator: Indicator, pattern: IndicatorPattern) {
            self.calls.lock().push((indicator, pattern));
        }
    }

    impl RecordingOutput {
        fn last(&self, indicator: Indicator) -> Option<IndicatorPattern> {
            self.calls.lock().iter().rev().find(|(i, _)| *i == indicator).map(|(_, p)| *p)
        }
    }

    fn machine(auto_arm: bool) -> (StateMachine, Arc<ManualClock>, Arc<RecordingOutput>) {
        let clock = Arc::new(ManualClock::new());
        let output = Arc::new(RecordingOutput::default());
        let policy = StatePolicy {
            auto_arm,
            no_motion_timeout: Duration::from_secs(120),
            alarm_quiet_period: Some(Duration::from_secs(300)),
        };
        let sm = StateMachine::new(policy, clock.clone(), output.clone());
        (sm, clock, output)
    }

    #[test]
    fn test_transition_is_total() {
        for state in [SystemState::Disarmed, SystemState::Armed, SystemState::Alarm] {
            for event in StateEvent::ALL {
                for auto in [false, true] {
                    // Must not panic and must land in a defined state
                    let _ = transition(state, event, auto);
                }
            }
        }
    }

    #[test]
    fn test_transition_table() {
        use StateEvent::*;
        use SystemState::*;

        assert_eq!(transition(Disarmed, Arm, false), Armed);
        assert_eq!(transition(Disarmed, MotionConfirmed, false), Disarmed);
        assert_eq!(transition(Disarmed, MotionConfirmed, true), Armed);
        assert_eq!(transition(Disarmed, PersonDetected, false), Disarmed);
        assert_eq!(transition(Armed, PersonDetected, false), Alarm);
        assert_eq!(transition(Armed, NoMotionTimeout, false), Armed);
        assert_eq!(transition(Armed, NoMotionTimeout, true), Disarmed);
        assert_eq!(transition(Alarm, ClearAlarm, false), Armed);
        assert_eq!(transition(Alarm, QuietPeriodElapsed, false), Armed);
        assert_eq!(transition(Alarm, Disarm, false), Disarmed);
        assert_eq!(transition(Alarm, Arm, true), Alarm);
        assert_eq!(transition(Alarm, NoMotionTimeout, true), Alarm);
    }

    #[test]
    fn test_command_sequence_matches_fold() {
        let (sm, _, _) = machine(false);
        let commands = [
            StateEvent::Arm,
            StateEvent::Arm,
            StateEvent::Disarm,
            StateEvent::Disarm,
            StateEvent::Arm,
        ];

        let expected = commands
            .iter()
            .fold(SystemState::Disarmed, |s, e| transition(s, *e, false));
        for c in commands {
            sm.apply(c);
        }
        assert_eq!(sm.current(), expected);
    }

    #[test]
    fn test_repeated_arm_is_noop() {
        let (sm, _, _) = machine(false);
        assert_eq!(
            sm.arm(),
            CommandOutcome::Applied { from: SystemState::Disarmed, to: SystemState::Armed }
        );
        assert_eq!(sm.arm(), CommandOutcome::NoOp { state: SystemState::Armed });
    }

    #[test]
    fn test_disarm_overrides_alarm() {
        let (sm, _, output) = machine(false);
        sm.arm();
        sm.record_person(true);
        assert_eq!(sm.current(), SystemState::Alarm);
        assert_eq!(output.last(Indicator::Buzzer), Some(IndicatorPattern::Pulse { on_ms: 500, off_ms: 500 }));

        assert!(sm.disarm().changed());
        assert_eq!(sm.current(), SystemState::Disarmed);
        assert_eq!(output.last(Indicator::Buzzer), Some(IndicatorPattern::Off));
        assert_eq!(output.last(Indicator::Alarm), Some(IndicatorPattern::Off));
    }

    #[test]
    fn test_silent_alarm_keeps_buzzer_off() {
        let (sm, _, output) = machine(false);
        sm.arm();
        sm.record_person(false);
        assert_eq!(sm.current(), SystemState::Alarm);
        assert_eq!(output.last(Indicator::Buzzer), Some(IndicatorPattern::Off));
        assert_eq!(output.last(Indicator::Alarm), Some(IndicatorPattern::Blink { interval_ms: 500 }));
    }

    #[test]
    fn test_auto_disarm_fires_exactly_once() {
        let (sm, clock, _) = machine(true);
        sm.arm();

        clock.advance(Duration::from_secs(119));
        assert!(sm.tick().is_none());
        assert_eq!(sm.current(), SystemState::Armed);

        clock.advance(Duration::from_secs(1));
        assert_eq!(
            sm.tick(),
            Some(CommandOutcome::Applied { from: SystemState::Armed, to: SystemState::Disarmed })
        );

        clock.advance(Duration::from_secs(600));
        assert!(sm.tick().is_none());
        assert_eq!(sm.current(), SystemState::Disarmed);
    }

    #[test]
    fn test_motion_pushes_back_auto_disarm() {
        let (sm, clock, _) = machine(true);
        sm.arm();

        clock.advance(Duration::from_secs(100));
        sm.record_motion();
        clock.advance(Duration::from_secs(100));
        assert!(sm.tick().is_none());

        clock.advance(Duration::from_secs(20));
        assert!(sm.tick().is_some());
        assert_eq!(sm.current(), SystemState::Disarmed);
    }

    #[test]
    fn test_no_auto_disarm_without_auto_arm() {
        let (sm, clock, _) = machine(false);
        sm.arm();
        clock.advance(Duration::from_secs(10_000));
        assert!(sm.tick().is_none());
        assert_eq!(sm.current(), SystemState::Armed);
    }

    #[test]
    fn test_motion_auto_arms_when_enabled() {
        let (sm, _, _) = machine(true);
        assert!(sm.record_motion().changed());
        assert_eq!(sm.current(), SystemState::Armed);

        let (sm, _, _) = machine(false);
        assert!(!sm.record_motion().changed());
        assert_eq!(sm.current(), SystemState::Disarmed);
    }

    #[test]
    fn test_alarm_quiet_period_returns_to_armed() {
        let (sm, clock, _) = machine(false);
        sm.arm();
        sm.record_person(true);

        clock.advance(Duration::from_secs(200));
        // Another person keeps the alarm going
        assert!(!sm.record_person(true).changed());
        clock.advance(Duration::from_secs(299));
        assert!(sm.tick().is_none());
        assert_eq!(sm.current(), SystemState::Alarm);

        clock.advance(Duration::from_secs(1));
        assert!(sm.tick().is_some());
        assert_eq!(sm.current(), SystemState::Armed);
    }

    #[test]
    fn test_watch_observes_changes() {
        let (sm, _, _) = machine(false);
        let rx = sm.subscribe();
        sm.arm();
        assert_eq!(*rx.borrow(), SystemState::Armed);
    }

    #[test]
    fn test_snapshot_tracks_armed_since() {
        let (sm, _, _) = machine(false);
        assert!(sm.snapshot().armed_since.is_none());
        sm.arm();
        let snap = sm.snapshot();
        assert_eq!(snap.state, SystemState::Armed);
        assert!(snap.armed_since.is_some());
        sm.disarm();
        assert!(sm.snapshot().armed_since.is_none());
    }
}
