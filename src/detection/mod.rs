// Copyright (c) 2026 bad-antics
// Licensed under the MIT License. See LICENSE file in the project root.
// https://github.com/bad-antics/homeguard-rs

//! Detection module - motion confirmation, classification and the pipeline hub

mod classification;
mod motion;
mod pipeline;

pub use classification::*;
pub use motion::*;
pub use pipeline::*;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sensors::Frame;

/// Axis-aligned bounding box in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

impl Region {
    pub fn new(x: usize, y: usize, width: usize, height: usize) -> Self {
        Self { x, y, width, height }
    }

    /// Whole-frame region
    pub fn full(frame: &Frame) -> Self {
        Self::new(0, 0, frame.width(), frame.height())
    }

    pub fn area(&self) -> usize {
        self.width * self.height
    }

    /// Height over width; 0 for an empty box
    pub fn aspect_ratio(&self) -> f64 {
        if self.width == 0 {
            0.0
        } else {
            self.height as f64 / self.width as f64
        }
    }
}

/// What was recognized
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum DetectionKind {
    Person,
    Animal { species: Option<String> },
}

impl DetectionKind {
    pub fn is_person(&self) -> bool {
        matches!(self, DetectionKind::Person)
    }

    pub fn is_animal(&self) -> bool {
        matches!(self, DetectionKind::Animal { .. })
    }

    /// Human-readable label
    pub fn label(&self) -> String {
        match self {
            DetectionKind::Person => "person".to_string(),
            DetectionKind::Animal { species: Some(s) } => s.clone(),
            DetectionKind::Animal { species: None } => "animal".to_string(),
        }
    }
}

/// One labeled detection within a frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub kind: DetectionKind,
    pub confidence: f64,
    pub region: Region,
}

impl Classification {
    pub fn person(confidence: f64, region: Region) -> Self {
        Self {
            kind: DetectionKind::Person,
            confidence,
            region,
        }
    }

    pub fn animal(species: Option<&str>, confidence: f64, region: Region) -> Self {
        Self {
            kind: DetectionKind::Animal {
                species: species.map(str::to_string),
            },
            confidence,
            region,
        }
    }
}

/// What produced the event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectionSource {
    /// PIR pulse with no camera confirmation
    Pir,
    /// Vision poll only
    Motion,
    /// PIR pulse fused with vision
    Combined,
}

impl fmt::Display for DetectionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DetectionSource::Pir => "pir",
            DetectionSource::Motion => "motion",
            DetectionSource::Combined => "combined",
        };
        f.write_str(s)
    }
}

/// Output of one pipeline cycle. Immutable once built.
#[derive(Debug, Clone, Serialize)]
pub struct DetectionEvent {
    id: String,
    timestamp: DateTime<Utc>,
    source: DetectionSource,
    classifications: Vec<Classification>,
    #[serde(skip)]
    snapshot: Option<Frame>,
}

impl DetectionEvent {
    pub fn new(
        timestamp: DateTime<Utc>,
        source: DetectionSource,
        classifications: Vec<Classification>,
        snapshot: Option<Frame>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp,
            source,
            classifications,
            snapshot,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn source(&self) -> DetectionSource {
        self.source
    }

    /// Ordered as returned by the classifier
    pub fn classifications(&self) -> &[Classification] {
        &self.classifications
    }

    pub fn snapshot(&self) -> Option<&Frame> {
        self.snapshot.as_ref()
    }

    /// Copy with the same id but no snapshot, for long-lived logs
    pub fn without_snapshot(&self) -> Self {
        Self {
            id: self.id.clone(),
            timestamp: self.timestamp,
            source: self.source,
            classifications: self.classifications.clone(),
            snapshot: None,
        }
    }

    pub fn has_person(&self) -> bool {
        self.classifications.iter().any(|c| c.kind.is_person())
    }

    pub fn has_animal(&self) -> bool {
        self.classifications.iter().any(|c| c.kind.is_animal())
    }

    /// Highest-confidence person entry
    pub fn best_person(&self) -> Option<&Classification> {
        self.best_where(|k| k.is_person())
    }

    /// Highest-confidence animal entry
    pub fn best_animal(&self) -> Option<&Classification> {
        self.best_where(|k| k.is_animal())
    }

    fn best_where(&self, pred: impl Fn(&DetectionKind) -> bool) -> Option<&Classification> {
        self.classifications
            .iter()
            .filter(|c| pred(&c.kind))
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
    }

    /// Distinct labels in classifier order
    pub fn labels(&self) -> Vec<String> {
        let mut labels: Vec<String> = Vec::new();
        for c in &self.classifications {
            let label = c.kind.label();
            if !labels.contains(&label) {
                labels.push(label);
            }
        }
        labels
    }
}
