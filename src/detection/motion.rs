// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/homeguard-rs

//! Motion confirmation against a running background model

use ndarray::{Array2, Zip};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::Region;
use crate::config::MotionConfig;
use crate::error::{Error, Result};
use crate::sensors::Frame;

/// Foreground change found in a frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MotionCandidate {
    /// Bounding box of all foreground pixels
    pub region: Region,
    /// Foreground pixel count
    pub area: usize,
    /// `area >= min_area`
    pub confirmed: bool,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct MotionStats {
    pub frames: u64,
    pub confirmations: u64,
    pub detection_rate: f64,
    pub min_area: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum AreaThreshold {
    Absolute(usize),
    Ratio(f64),
}

/// Exponential running-average background subtractor
pub struct MotionStage {
    pixel_threshold: u8,
    learning_rate: f32,
    threshold: AreaThreshold,
    warmup_frames: u32,

    background: Option<Array2<f32>>,
    seeded: u32,
    frames: u64,
    confirmations: u64,
}

impl MotionStage {
    pub fn new(config: &MotionConfig) -> Self {
        let threshold = match config.min_area {
            Some(area) => AreaThreshold::Absolute(area),
            None => AreaThreshold::Ratio(config.min_area_ratio),
        };
        Self {
            pixel_threshold: config.pixel_threshold,
            learning_rate: config.learning_rate,
            threshold,
            warmup_frames: config.warmup_frames.max(1),
            background: None,
            seeded: 0,
            frames: 0,
            confirmations: 0,
        }
    }

    /// Minimum foreground area for a frame of `frame_area` pixels
    pub fn min_area_for(&self, frame_area: usize) -> usize {
        match self.threshold {
            AreaThreshold::Absolute(area) => area,
            AreaThreshold::Ratio(ratio) => ((frame_area as f64 * ratio).ceil() as usize).max(1),
        }
    }

    /// Replace the area threshold at runtime
    pub fn set_min_area(&mut self, min_area: usize) -> Result<()> {
        if min_area == 0 {
            return Err(Error::Config("motion min_area must be positive".into()));
        }
        self.threshold = AreaThreshold::Absolute(min_area);
        Ok(())
    }

    /// True once the background has been seeded
    pub fn is_ready(&self) -> bool {
        self.background.is_some() && self.seeded >= self.warmup_frames
    }

    /// Drop the background model and counters
    pub fn reset(&mut self) {
        self.background = None;
        self.seeded = 0;
        self.frames = 0;
        self.confirmations = 0;
    }

    pub fn stats(&self) -> MotionStats {
        MotionStats {
            frames: self.frames,
            confirmations: self.confirmations,
            detection_rate: if self.frames == 0 {
                0.0
            } else {
                self.confirmations as f64 / self.frames as f64
            },
            min_area: match self.threshold {
                AreaThreshold::Absolute(a) => Some(a),
                AreaThreshold::Ratio(_) => None,
            },
        }
    }

    /// Compare a frame against the background
    ///
    /// Returns `None` while seeding or when nothing differs. The background
    /// learns from every frame except those that confirm motion.
    pub fn confirm(&mut self, frame: &Frame) -> Option<MotionCandidate> {
        self.frames += 1;
        let pixels = frame.pixels();

        let shape_changed = self
            .background
            .as_ref()
            .map_or(false, |bg| bg.dim() != pixels.dim());
        if shape_changed {
            debug!("Frame size changed to {:?}, reseeding background", pixels.dim());
            self.background = None;
            self.seeded = 0;
        }

        if self.seeded < self.warmup_frames {
            self.seed(pixels);
            return None;
        }

        let min_area = self.min_area_for(frame.area());
        let threshold = self.pixel_threshold as f32;
        let rate = self.learning_rate;
        let background = self.background.as_mut()?;

        let mut area = 0usize;
        let (mut min_r, mut min_c) = (usize::MAX, usize::MAX);
        let (mut max_r, mut max_c) = (0usize, 0usize);
        for ((row, col), &px) in pixels.indexed_iter() {
            if (px as f32 - background[[row, col]]).abs() > threshold {
                area += 1;
                min_r = min_r.min(row);
                min_c = min_c.min(col);
                max_r = max_r.max(row);
                max_c = max_c.max(col);
            }
        }

        let confirmed = area > 0 && area >= min_area;

        if !confirmed {
            Zip::from(&mut *background).and(pixels).for_each(|bg, &px| {
                *bg += rate * (px as f32 - *bg);
            });
        }

        if area == 0 {
            return None;
        }

        if confirmed {
            self.confirmations += 1;
            debug!("Motion confirmed: {} px (min {})", area, min_area);
        }

        Some(MotionCandidate {
            region: Region::new(min_c, min_r, max_c - min_c + 1, max_r - min_r + 1),
            area,
            confirmed,
        })
    }

    fn seed(&mut self, pixels: &Array2<u8>) {
        self.seeded += 1;
        let n = self.seeded as f32;
        match self.background.as_mut() {
            // Running mean over the warm-up frames
            Some(bg) => Zip::from(bg).and(pixels).for_each(|bg, &px| {
                *bg += (px as f32 - *bg) / n;
            }),
            None => self.background = Some(pixels.mapv(|p| p as f32)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(min_area: usize) -> MotionConfig {
        MotionConfig {
            min_area: Some(min_area),
            warmup_frames: 2,
            ..MotionConfig::default()
        }
    }

    fn blank() -> Frame {
        Frame::new(0, Array2::from_elem((20, 20), 50u8))
    }

    /// Blank frame with `n` bright pixels filled row-major
    fn with_motion(n: usize) -> Frame {
        let mut pixels = Array2::from_elem((20, 20), 50u8);
        for (i, px) in pixels.iter_mut().enumerate() {
            if i < n {
                *px = 200;
            }
        }
        Frame::new(1, pixels)
    }

    fn warmed(min_area: usize) -> MotionStage {
        let mut stage = MotionStage::new(&config(min_area));
        assert!(stage.confirm(&blank()).is_none());
        assert!(stage.confirm(&blank()).is_none());
        assert!(stage.is_ready());
        stage
    }

    #[test]
    fn test_warmup_returns_none() {
        let mut stage = MotionStage::new(&config(1));
        assert!(stage.confirm(&with_motion(400)).is_none());
        assert!(!stage.is_ready());
    }

    #[test]
    fn test_area_boundary_is_inclusive() {
        let mut stage = warmed(10);
        let at = stage.confirm(&with_motion(10)).unwrap();
        assert!(at.confirmed);
        assert_eq!(at.area, 10);

        let mut stage = warmed(10);
        let below = stage.confirm(&with_motion(9)).unwrap();
        assert!(!below.confirmed);
    }

    #[test]
    fn test_no_change_is_none() {
        let mut stage = warmed(10);
        assert!(stage.confirm(&blank()).is_none());
    }

    #[test]
    fn test_confirmed_motion_not_learned() {
        let mut stage = warmed(10);
        for _ in 0..50 {
            let c = stage.confirm(&with_motion(40)).unwrap();
            assert!(c.confirmed);
        }
        assert_eq!(stage.stats().confirmations, 50);
    }

    #[test]
    fn test_small_change_is_learned() {
        let mut stage = warmed(100);
        // Below the area threshold, the background absorbs it
        let mut last = None;
        for _ in 0..200 {
            last = stage.confirm(&with_motion(5));
        }
        assert!(last.is_none());
    }

    #[test]
    fn test_region_bounds_foreground() {
        let mut stage = warmed(1);
        let c = stage.confirm(&with_motion(25)).unwrap();
        // 25 pixels row-major in a 20-wide frame covers rows 0..=1
        assert_eq!(c.region, Region::new(0, 0, 20, 2));
    }

    #[test]
    fn test_ratio_threshold() {
        let stage = MotionStage::new(&MotionConfig::default());
        assert_eq!(stage.min_area_for(640 * 480), 1536);
        assert!(stage.stats().min_area.is_none());
    }

    #[test]
    fn test_resolution_change_reseeds() {
        let mut stage = warmed(1);
        let small = Frame::new(2, Array2::from_elem((10, 10), 50u8));
        assert!(stage.confirm(&small).is_none());
        assert!(!stage.is_ready());
    }

    #[test]
    fn test_set_min_area_validates() {
        let mut stage = warmed(10);
        assert!(stage.set_min_area(0).is_err());
        stage.set_min_area(500).unwrap();
        assert!(!stage.confirm(&with_motion(40)).unwrap().confirmed);
    }
}
