// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/homeguard-rs

//! Person/animal classification with a bounded latency budget

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{Classification, DetectionKind, Region};
use crate::config::ClassificationConfig;
use crate::error::{Error, Result};
use crate::sensors::Frame;

/// Classification model capability
#[async_trait]
pub trait Classifier: Send + Sync {
    /// Model identifier for logs
    fn name(&self) -> &str;

    /// Label the frame, optionally restricted to a region of interest
    async fn classify(&self, frame: &Frame, roi: Option<Region>) -> Result<Vec<Classification>>;
}

/// Result of one bounded classification call
#[derive(Debug, Clone, PartialEq)]
pub enum ClassifyOutcome {
    /// Entries at or above the confidence threshold, possibly none
    Labeled(Vec<Classification>),
    TimedOut,
    Failed(String),
}

impl ClassifyOutcome {
    /// Classifications to attach to the event; empty unless labeled
    pub fn into_classifications(self) -> Vec<Classification> {
        match self {
            ClassifyOutcome::Labeled(c) => c,
            ClassifyOutcome::TimedOut | ClassifyOutcome::Failed(_) => Vec::new(),
        }
    }
}

/// Classification stage: timeout plus confidence filter around a `Classifier`
pub struct ClassificationStage {
    classifier: Arc<dyn Classifier>,
    min_confidence: f64,
    timeout: Duration,
}

impl ClassificationStage {
    pub fn new(classifier: Arc<dyn Classifier>, config: &ClassificationConfig) -> Self {
        Self {
            classifier,
            min_confidence: config.min_confidence,
            timeout: Duration::from_millis(config.timeout_ms),
        }
    }

    pub fn min_confidence(&self) -> f64 {
        self.min_confidence
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Never blocks longer than the timeout; never returns an error
    pub async fn classify(&self, frame: &Frame, roi: Option<Region>) -> ClassifyOutcome {
        let call = self.classifier.classify(frame, roi);
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(mut found)) => {
                let before = found.len();
                found.retain(|c| c.confidence >= self.min_confidence);
                debug!(
                    "{}: {} of {} classifications above {:.2}",
                    self.classifier.name(),
                    found.len(),
                    before,
                    self.min_confidence
                );
                ClassifyOutcome::Labeled(found)
            }
            Ok(Err(e)) => {
                warn!("{} failed: {}", self.classifier.name(), e);
                ClassifyOutcome::Failed(e.to_string())
            }
            Err(_) => {
                warn!("{}", Error::ClassificationTimeout(self.timeout));
                ClassifyOutcome::TimedOut
            }
        }
    }
}

/// Raw detector output before label mapping
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub class_id: u32,
    pub confidence: f64,
    pub region: Region,
}

/// Synchronous, CPU-bound model such as an object detector
pub trait BlockingModel: Send + Sync + 'static {
    fn name(&self) -> &str;

    fn infer(&self, frame: &Frame, roi: Option<Region>) -> Result<Vec<RawDetection>>;
}

const COCO_ANIMALS: [&str; 10] = [
    "bird", "cat", "dog", "horse", "sheep", "cow", "elephant", "bear", "zebra", "giraffe",
];

/// Map a COCO class id to a detection kind; other classes are ignored
pub fn coco_kind(class_id: u32) -> Option<DetectionKind> {
    match class_id {
        0 => Some(DetectionKind::Person),
        14..=23 => Some(DetectionKind::Animal {
            species: Some(COCO_ANIMALS[(class_id - 14) as usize].to_string()),
        }),
        _ => None,
    }
}

/// Runs a `BlockingModel` on the blocking pool so the call can be abandoned
pub struct BlockingClassifier<M> {
    model: Arc<M>,
}

impl<M: BlockingModel> BlockingClassifier<M> {
    pub fn new(model: M) -> Self {
        Self {
            model: Arc::new(model),
        }
    }
}

#[async_trait]
impl<M: BlockingModel> Classifier for BlockingClassifier<M> {
    fn name(&self) -> &str {
        self.model.name()
    }

    async fn classify(&self, frame: &Frame, roi: Option<Region>) -> Result<Vec<Classification>> {
        let model = self.model.clone();
        let frame = frame.clone();
        let raw = tokio::task::spawn_blocking(move || model.infer(&frame, roi))
            .await
            .map_err(|e| Error::Classifier(format!("inference task failed: {}", e)))??;

        Ok(raw
            .into_iter()
            .filter_map(|d| {
                coco_kind(d.class_id).map(|kind| Classification {
                    kind,
                    confidence: d.confidence.clamp(0.0, 1.0),
                    region: d.region,
                })
            })
            .collect())
    }
}

/// Shape-based demo model
///
/// Labels the region of interest by its aspect ratio: tall regions are people,
/// wide regions are animals. Good enough for the simulated camera.
#[derive(Debug, Clone)]
pub struct HeuristicModel {
    person_aspect: f64,
    animal_aspect: f64,
}

impl Default for HeuristicModel {
    fn default() -> Self {
        Self {
            person_aspect: 1.8,
            animal_aspect: 0.9,
        }
    }
}

impl BlockingModel for HeuristicModel {
    fn name(&self) -> &str {
        "heuristic"
    }

    fn infer(&self, frame: &Frame, roi: Option<Region>) -> Result<Vec<RawDetection>> {
        let region = roi.unwrap_or_else(|| Region::full(frame));
        if region.area() == 0 {
            return Ok(Vec::new());
        }

        let aspect = region.aspect_ratio();
        let detection = if aspect >= self.person_aspect {
            let confidence = (0.6 + (aspect - self.person_aspect) * 0.2).min(0.95);
            Some(RawDetection { class_id: 0, confidence, region })
        } else if aspect <= self.animal_aspect {
            let confidence = (0.55 + (self.animal_aspect - aspect) * 0.3).min(0.9);
            // dog
            Some(RawDetection { class_id: 16, confidence, region })
        } else {
            None
        };
        Ok(detection.into_iter().collect())
    }
}
