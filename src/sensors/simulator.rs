// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/homeguard-rs

//! Camera and PIR simulators for demo/testing

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ndarray::Array2;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use rand_distr::StandardNormal;
use tokio::sync::broadcast;
use tracing::{debug, info};

use super::{Frame, FrameSource, HardwareTrigger, TriggerLine, TriggerSource};
use crate::error::Result;

/// Shape of a simulated visitor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visitor {
    /// Tall blob
    Person,
    /// Wide, low blob
    Animal,
}

#[derive(Debug, Clone, Copy)]
struct Crossing {
    visitor: Visitor,
    start: u64,
    frames: u64,
}

/// Synthetic grayscale camera
///
/// Renders a static gradient background with sensor noise. Every
/// `visit_period` frames a visitor walks across the scene.
pub struct SimulatedCamera {
    id: String,
    width: usize,
    height: usize,
    sequence: u64,
    rng: ChaCha8Rng,
    noise_sigma: f64,
    visit_period: u64,
    visit_frames: u64,
    crossing: Option<Crossing>,
    presence: Arc<AtomicBool>,
}

impl SimulatedCamera {
    pub fn new(id: &str, width: usize, height: usize, seed: u64) -> Self {
        Self {
            id: id.to_string(),
            width: width.max(8),
            height: height.max(8),
            sequence: 0,
            rng: ChaCha8Rng::seed_from_u64(seed),
            noise_sigma: 2.0,
            visit_period: 150,
            visit_frames: 45,
            crossing: None,
            presence: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Frames between visits and frames a visit lasts
    pub fn with_schedule(mut self, period: u64, frames: u64) -> Self {
        self.visit_period = period.max(1);
        self.visit_frames = frames.clamp(1, self.visit_period);
        self
    }

    /// Flag that is set while a visitor is in view; drives `SimulatedPir`
    pub fn presence(&self) -> Arc<AtomicBool> {
        self.presence.clone()
    }

    fn background(&self, row: usize, col: usize) -> f64 {
        60.0 + 40.0 * row as f64 / self.height as f64 + 20.0 * col as f64 / self.width as f64
    }

    fn update_crossing(&mut self) {
        let seq = self.sequence;
        if let Some(c) = self.crossing {
            if seq >= c.start + c.frames {
                debug!("{}: visitor {:?} left", self.id, c.visitor);
                self.crossing = None;
            }
        }
        if self.crossing.is_none() && seq > 0 && seq % self.visit_period == 0 {
            let visitor = if self.rng.gen_bool(0.6) { Visitor::Person } else { Visitor::Animal };
            debug!("{}: visitor {:?} entering", self.id, visitor);
            self.crossing = Some(Crossing {
                visitor,
                start: seq,
                frames: self.visit_frames,
            });
        }
        self.presence.store(self.crossing.is_some(), Ordering::Relaxed);
    }

    fn render(&mut self) -> Array2<u8> {
        let mut pixels = Array2::<u8>::zeros((self.height, self.width));
        for ((row, col), px) in pixels.indexed_iter_mut() {
            let noise: f64 = self.rng.sample(StandardNormal);
            let value = self.background(row, col) + noise * self.noise_sigma;
            *px = value.clamp(0.0, 255.0) as u8;
        }

        if let Some(c) = self.crossing {
            let (bw, bh) = match c.visitor {
                Visitor::Person => (self.width / 10, self.height / 2),
                Visitor::Animal => (self.width / 5, self.height / 6),
            };
            let progress = (self.sequence - c.start) as f64 / c.frames as f64;
            let x0 = ((self.width - bw) as f64 * progress) as usize;
            let y0 = self.height - bh - self.height / 10;
            for row in y0..y0 + bh {
                for col in x0..x0 + bw {
                    pixels[[row, col]] = 220;
                }
            }
        }
        pixels
    }
}

#[async_trait]
impl FrameSource for SimulatedCamera {
    fn id(&self) -> &str {
        &self.id
    }

    async fn capture(&mut self) -> Result<Frame> {
        self.update_crossing();
        let pixels = self.render();
        let frame = Frame::new(self.sequence, pixels);
        self.sequence += 1;
        Ok(frame)
    }
}

/// Simulated PIR sensor watching the camera's presence flag
pub struct SimulatedPir {
    id: String,
    presence: Arc<AtomicBool>,
    check_interval: Duration,
    false_positive_rate: f64,
    rng: ChaCha8Rng,
}

impl SimulatedPir {
    pub fn new(id: &str, presence: Arc<AtomicBool>, seed: u64) -> Self {
        Self {
            id: id.to_string(),
            presence,
            check_interval: Duration::from_millis(250),
            false_positive_rate: 0.001,
            rng: ChaCha8Rng::seed_from_u64(seed.wrapping_add(1)),
        }
    }

    pub fn with_false_positive_rate(mut self, rate: f64) -> Self {
        self.false_positive_rate = rate.clamp(0.0, 1.0);
        self
    }
}

#[async_trait]
impl HardwareTrigger for SimulatedPir {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&mut self, line: TriggerLine, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        info!("PIR {} watching", self.id);
        let mut ticker = tokio::time::interval(self.check_interval);
        let mut was_present = false;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let present = self.presence.load(Ordering::Relaxed);
                    // Rising edge, like the real sensor's interrupt
                    let spurious = self.rng.gen_bool(self.false_positive_rate);
                    if (present && !was_present) || spurious {
                        debug!("PIR {} pulse", self.id);
                        line.fire(TriggerSource::Pir);
                    }
                    was_present = present;
                }
                _ = shutdown.recv() => {
                    info!("PIR {} shutting down", self.id);
                    break;
                }
            }
        }
        Ok(())
    }
}
