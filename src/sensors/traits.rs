// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/homeguard-rs

//! Capability traits and common types for the external collaborators

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::info;

use super::TriggerLine;
use crate::error::Result;

/// A captured grayscale image
///
/// Cloning is cheap; the pixel grid is shared and never mutated.
#[derive(Debug, Clone)]
pub struct Frame {
    sequence: u64,
    captured_at: DateTime<Utc>,
    pixels: Arc<Array2<u8>>,
}

impl Frame {
    pub fn new(sequence: u64, pixels: Array2<u8>) -> Self {
        Self::with_timestamp(sequence, Utc::now(), pixels)
    }

    pub fn with_timestamp(sequence: u64, captured_at: DateTime<Utc>, pixels: Array2<u8>) -> Self {
        Self {
            sequence,
            captured_at,
            pixels: Arc::new(pixels),
        }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }

    /// Pixel grid indexed as `[row, column]`
    pub fn pixels(&self) -> &Array2<u8> {
        &self.pixels
    }

    pub fn width(&self) -> usize {
        self.pixels.ncols()
    }

    pub fn height(&self) -> usize {
        self.pixels.nrows()
    }

    /// Total pixel count
    pub fn area(&self) -> usize {
        self.pixels.len()
    }

    /// Encode as binary PGM (P5) for attachments
    pub fn to_pgm(&self) -> Vec<u8> {
        let header = format!("P5\n{} {}\n255\n", self.width(), self.height());
        let mut out = Vec::with_capacity(header.len() + self.area());
        out.extend_from_slice(header.as_bytes());
        out.extend(self.pixels.iter().copied());
        out
    }
}

/// Camera capability
#[async_trait]
pub trait FrameSource: Send {
    /// Source identifier
    fn id(&self) -> &str;

    /// Capture the latest frame, or fail with `Error::FrameUnavailable`
    async fn capture(&mut self) -> Result<Frame>;
}

/// Hardware motion trigger (PIR)
///
/// Implementations push pulses onto the same line the poll ticker uses.
#[async_trait]
pub trait HardwareTrigger: Send {
    /// Trigger identifier
    fn id(&self) -> &str;

    /// Produce pulses until shutdown
    async fn run(&mut self, line: TriggerLine, shutdown: broadcast::Receiver<()>) -> Result<()>;
}

/// Physical indicator driven on state transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Indicator {
    /// Green armed LED
    Status,
    /// Red alarm LED
    Alarm,
    Buzzer,
}

/// Output pattern for an indicator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndicatorPattern {
    Off,
    Solid,
    Blink { interval_ms: u64 },
    Pulse { on_ms: u64, off_ms: u64 },
}

/// LED/buzzer capability. Calls must return immediately.
pub trait OutputSignal: Send + Sync {
    fn set_indicator(&self, indicator: Indicator, pattern: IndicatorPattern);
}

/// Output that only logs indicator changes
#[derive(Debug, Default)]
pub struct LogOutput;

impl OutputSignal for LogOutput {
    fn set_indicator(&self, indicator: Indicator, pattern: IndicatorPattern) {
        info!("Indicator {:?} -> {:?}", indicator, pattern);
    }
}

/// Output with nothing attached
#[derive(Debug, Default)]
pub struct NullOutput;

impl OutputSignal for NullOutput {
    fn set_indicator(&self, _indicator: Indicator, _pattern: IndicatorPattern) {}
}
