// THEORY:
// Detector output is treated as a stateless, per-frame data container, much like
// a blob in a motion grid: a label, a confidence and a box in frame pixels. The
// engine never mutates a detection after the detector produced it, apart from
// attaching the metrics computed for that same cycle.

use crate::core_modules::metric_extractor::DetectionMetrics;
use serde::{Deserialize, Serialize};

/// Axis-aligned box in source-frame pixel coordinates. Corner order is not assumed.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

impl BoundingBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Unclipped pixel area, independent of corner order.
    pub fn area(&self) -> f64 {
        let width = (self.x1.max(self.x2) - self.x1.min(self.x2)).max(0.0);
        let height = (self.y1.max(self.y2) - self.y1.min(self.y2)).max(0.0);
        width * height
    }

    /// The box scaled to [0,1] frame coordinates. Returned unchanged when the
    /// frame size is unknown.
    pub fn normalized(&self, frame_width: u32, frame_height: u32) -> BoundingBox {
        if frame_width == 0 || frame_height == 0 {
            return *self;
        }
        let w = frame_width as f64;
        let h = frame_height as f64;
        BoundingBox {
            x1: (self.x1 / w).clamp(0.0, 1.0),
            y1: (self.y1 / h).clamp(0.0, 1.0),
            x2: (self.x2 / w).clamp(0.0, 1.0),
            y2: (self.y2 / h).clamp(0.0, 1.0),
        }
    }
}

/// One detector hit for one inference cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub label: String,
    /// Detector confidence in [0,1].
    pub confidence: f64,
    pub bbox: BoundingBox,
    /// Visual descriptors, attached by the pipeline for cocoon-like detections.
    pub metrics: Option<DetectionMetrics>,
}

impl Detection {
    pub fn new(label: impl Into<String>, confidence: f64, bbox: BoundingBox) -> Self {
        Self {
            label: label.into(),
            confidence,
            bbox,
            metrics: None,
        }
    }
}

/// Wire form of a detection: box normalised to the frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionView {
    pub label: String,
    pub confidence: f64,
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
    pub bbox: [f64; 4],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<DetectionMetrics>,
}

impl DetectionView {
    pub fn from_detection(detection: &Detection, frame_width: u32, frame_height: u32) -> Self {
        let nb = detection.bbox.normalized(frame_width, frame_height);
        Self {
            label: detection.label.clone(),
            confidence: detection.confidence,
            x1: nb.x1,
            y1: nb.y1,
            x2: nb.x2,
            y2: nb.y2,
            bbox: [nb.x1, nb.y1, nb.x2, nb.y2],
            metrics: detection.metrics.clone(),
        }
    }
}
