// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/homeguard-rs

//! Unified trigger channel for PIR pulses and poll ticks

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::trace;

/// What started a pipeline cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TriggerSource {
    /// Hardware motion sensor pulse
    Pir,
    /// Periodic vision poll
    Poll,
}

#[derive(Debug, Clone, Copy)]
pub struct TriggerEvent {
    pub source: TriggerSource,
    pub at: DateTime<Utc>,
}

impl TriggerEvent {
    pub fn now(source: TriggerSource) -> Self {
        Self { source, at: Utc::now() }
    }
}

/// Producer side of the trigger channel
///
/// Sending never blocks; pulses that arrive while the channel is full are
/// coalesced into the pending ones.
#[derive(Debug, Clone)]
pub struct TriggerLine {
    tx: mpsc::Sender<TriggerEvent>,
    coalesced: Arc<AtomicU64>,
}

impl TriggerLine {
    /// Returns false when the pulse was coalesced or the pipeline is gone
    pub fn fire(&self, source: TriggerSource) -> bool {
        match self.tx.try_send(TriggerEvent::now(source)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.coalesced.fetch_add(1, Ordering::Relaxed);
                trace!("Trigger {:?} coalesced", source);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn coalesced(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Create the trigger channel
pub fn trigger_channel(capacity: usize) -> (TriggerLine, mpsc::Receiver<TriggerEvent>) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        TriggerLine {
            tx,
            coalesced: Arc::new(AtomicU64::new(0)),
        },
        rx,
    )
}
