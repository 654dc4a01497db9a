// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/homeguard-rs

//! Frame acquisition - pulls frames from the camera into the frame slot

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::{Frame, FrameSlot, FrameSource, TriggerLine, TriggerSource};
use crate::config::CameraConfig;
use crate::error::{Error, Result};

/// Camera health counters
#[derive(Debug, Default)]
pub struct AcquisitionStats {
    captured: AtomicU64,
    failures: AtomicU64,
    fps: Mutex<f32>,
    latest: Mutex<Option<Frame>>,
}

/// Point-in-time copy of `AcquisitionStats`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CameraHealth {
    pub frames_captured: u64,
    pub capture_failures: u64,
    pub fps: f32,
}

impl AcquisitionStats {
    pub fn snapshot(&self) -> CameraHealth {
        CameraHealth {
            frames_captured: self.captured.load(Ordering::Relaxed),
            capture_failures: self.failures.load(Ordering::Relaxed),
            fps: *self.fps.lock(),
        }
    }

    /// Most recent captured frame, kept even after the pipeline consumed it
    pub fn latest_frame(&self) -> Option<Frame> {
        self.latest.lock().clone()
    }
}

/// Frame acquisition loop
pub struct Acquisition {
    source: Box<dyn FrameSource>,
    slot: Arc<FrameSlot>,
    stats: Arc<AcquisitionStats>,
    frame_interval: Duration,
    capture_timeout: Duration,
}

impl Acquisition {
    pub fn new(source: Box<dyn FrameSource>, slot: Arc<FrameSlot>, config: &CameraConfig) -> Self {
        Self {
            source,
            slot,
            stats: Arc::new(AcquisitionStats::default()),
            frame_interval: Duration::from_secs_f64(1.0 / config.fps.max(1) as f64),
            capture_timeout: Duration::from_millis(config.capture_timeout_ms),
        }
    }

    pub fn stats(&self) -> Arc<AcquisitionStats> {
        self.stats.clone()
    }

    /// Capture one frame into the slot
    pub async fn capture_once(&mut self) -> Result<()> {
        let frame = match tokio::time::timeout(self.capture_timeout, self.source.capture()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(Error::FrameUnavailable(format!(
                    "{} capture exceeded {:?}",
                    self.source.id(),
                    self.capture_timeout
                )))
            }
        };

        *self.stats.latest.lock() = Some(frame.clone());
        if let Some(old) = self.slot.push(frame) {
            debug!("Dropped stale frame {}", old.sequence());
        }
        self.stats.captured.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
        info!(
            "Starting acquisition from {} every {:?}",
            self.source.id(),
            self.frame_interval
        );

        let mut ticker = interval(self.frame_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut window_start = Instant::now();
        let mut window_frames = 0u32;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.capture_once().await {
                        Ok(()) => window_frames += 1,
                        Err(e) => {
                            self.stats.failures.fetch_add(1, Ordering::Relaxed);
                            warn!("Capture failed: {}", e);
                        }
                    }

                    let elapsed = window_start.elapsed();
                    if elapsed >= Duration::from_secs(1) {
                        *self.stats.fps.lock() = window_frames as f32 / elapsed.as_secs_f32();
                        window_start = Instant::now();
                        window_frames = 0;
                    }
                }
                _ = shutdown.recv() => {
                    info!("Acquisition shutting down...");
                    break;
                }
            }
        }

        Ok(())
    }
}

/// Periodic vision poll, the fallback when no hardware trigger is wired
pub async fn run_poll_ticker(
    line: TriggerLine,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if line.is_closed() {
                    debug!("Pipeline gone, poll ticker stopping");
                    break;
                }
                line.fire(TriggerSource::Poll);
            }
            _ = shutdown.recv() => {
                debug!("Poll ticker shutting down");
                break;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::SimulatedCamera;
    use async_trait::async_trait;

    struct StalledCamera;

    #[async_trait]
    impl FrameSource for StalledCamera {
        fn id(&self) -> &str {
            "stalled"
        }

        async fn capture(&mut self) -> Result<Frame> {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn test_capture_fills_slot() {
        let slot = Arc::new(FrameSlot::new(2));
        let camera = SimulatedCamera::new("cam", 16, 16, 0);
        let mut acq = Acquisition::new(Box::new(camera), slot.clone(), &CameraConfig::default());

        for _ in 0..3 {
            acq.capture_once().await.unwrap();
        }
        assert_eq!(slot.len(), 2);
        assert_eq!(slot.take_latest().unwrap().sequence(), 2);
        assert_eq!(acq.stats().snapshot().frames_captured, 3);
        assert_eq!(acq.stats().latest_frame().map(|f| f.sequence()), Some(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_capture_times_out() {
        let slot = Arc::new(FrameSlot::new(1));
        let mut acq = Acquisition::new(Box::new(StalledCamera), slot.clone(), &CameraConfig::default());

        let err = acq.capture_once().await.unwrap_err();
        assert!(matches!(err, Error::FrameUnavailable(_)));
        assert!(slot.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_ticker_stops_without_pipeline() {
        let (line, rx) = crate::sensors::trigger_channel(4);
        let (_tx, shutdown) = broadcast::channel(1);
        drop(rx);

        let ticker = run_poll_ticker(line, Duration::from_millis(100), shutdown);
        tokio::time::timeout(Duration::from_secs(1), ticker)
            .await
            .expect("ticker kept running")
            .unwrap();
    }
}
