// THEORY:
// The `pipeline` module is the top-level API of the estimation engine. It owns
// every stateful component (movement estimator, molting machine, confirmation
// window) and runs them in a fixed order once per inference cycle, folding their
// outputs into a single immutable `AnalyticsSnapshot`.
//
// The pipeline does no I/O and never blocks. It is handed a frame that has
// already been acquired and a detection list that has already been produced;
// scheduling, timeouts and publication belong to the monitor.
//
// Stage 1: Temporal analysis (movement index, classification, molting).
// Stage 2: Detection triage (label buckets, disease vote, cocoon metrics).
// Stage 3: Population summary (larva density, stage hint, size change).
// Stage 4: Snapshot assembly.

use crate::config::EngineConfig;
use crate::core_modules::confirmation_window::{ConfirmationSnapshot, ConfirmationWindow};
use crate::core_modules::detection::{Detection, DetectionView};
use crate::core_modules::labels::{categorize, LabelCategory};
use crate::core_modules::metric_extractor::MetricExtractor;
use crate::core_modules::molting::{MoltingMachine, MoltingSnapshot};
use crate::core_modules::movement::{classify_movement, MovementEstimator, MovementLevel};
use crate::core_modules::stage_thresholds::{movement_thresholds, normalize_stage_key, MovementThresholds};
use crate::core_modules::utils::time::ms_to_iso;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, trace};

// Re-export key data structures for the public API.
pub use crate::core_modules::molting::MoltingState;

/// One acquired camera frame.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Capture time, milliseconds since the Unix epoch.
    pub ts_ms: i64,
    pub image: Arc<RgbImage>,
}

impl Frame {
    pub fn new(ts_ms: i64, image: RgbImage) -> Self {
        Self {
            ts_ms,
            image: Arc::new(image),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

/// Coarse life-stage guess from what the detector saw this cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObservedStage {
    Cocoon,
    Larva,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageHint {
    pub cocoon_count: usize,
    pub larva_count: usize,
    pub has_cocoon: bool,
    pub has_larva: bool,
    pub stage: ObservedStage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LarvaMetrics {
    /// Summed larva box area over frame area. Boxes may overlap, so this can exceed 1.
    pub larva_density_area_ratio: f64,
    pub larva_bbox_area_px_sum: f64,
    /// Larva area relative to the previous cycle; 1.0 when there is nothing to compare.
    pub size_change_ratio: f64,
    pub movement_index: Option<f64>,
    pub motion_score: Option<f64>,
    pub movement_level: MovementLevel,
    /// Normalised stage key the movement bands were looked up with.
    pub movement_stage: Option<String>,
    pub movement_thresholds: Option<MovementThresholds>,
}

/// Everything the engine knows after one cycle. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsSnapshot {
    pub ts_ms: i64,
    pub ts_iso: Option<String>,
    pub source_frame_ts_ms: i64,
    pub frame: FrameSize,
    pub model_loaded: bool,
    pub detections: Vec<DetectionView>,
    pub stage_hint: StageHint,
    pub larva_metrics: LarvaMetrics,
    pub molting: MoltingSnapshot,
    pub diseased_confirmation: ConfirmationSnapshot,
}

/// Simplified projection consumed by an outbound push client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushPayload {
    pub timestamp: Option<String>,
    pub movement_index: Option<f64>,
    pub size_change_ratio: f64,
    /// The debounced disease verdict.
    pub texture_anomaly: bool,
    /// Highest detection confidence of the cycle, 0.0 without detections.
    pub confidence: f64,
}

impl AnalyticsSnapshot {
    pub fn max_confidence(&self) -> f64 {
        self.detections
            .iter()
            .map(|d| d.confidence)
            .fold(0.0, f64::max)
    }

    pub fn push_payload(&self) -> PushPayload {
        PushPayload {
            timestamp: self.ts_iso.clone(),
            movement_index: self.larva_metrics.movement_index,
            size_change_ratio: self.larva_metrics.size_change_ratio,
            texture_anomaly: self.diseased_confirmation.confirmed,
            confidence: self.max_confidence(),
        }
    }
}

/// The owned, single-writer estimation engine.
pub struct AnalyticsPipeline {
    config: EngineConfig,
    stage_key: String,
    movement: MovementEstimator,
    molting: MoltingMachine,
    diseased_window: ConfirmationWindow,
    extractor: MetricExtractor,
    previous_larva_area: Option<f64>,
}

impl AnalyticsPipeline {
    pub fn new(config: EngineConfig) -> Self {
        let stage_key = normalize_stage_key(&config.active_stage);
        let diseased_window = ConfirmationWindow::new(
            config.diseased_window_n,
            config.diseased_min_hits,
            config.diseased_conf_threshold,
        );
        let extractor = MetricExtractor::new(config.mm_per_pixel, config.lab_target);
        Self {
            config,
            stage_key,
            movement: MovementEstimator::new(),
            molting: MoltingMachine::new(),
            diseased_window,
            extractor,
            previous_larva_area: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The normalised key currently driving threshold lookups.
    pub fn stage_key(&self) -> &str {
        &self.stage_key
    }

    /// Switches the active stage. The molting machine resets itself on the next
    /// cycle that carries a movement reading.
    pub fn set_active_stage(&mut self, raw: &str) {
        self.config.active_stage = raw.to_string();
        self.stage_key = normalize_stage_key(raw);
    }

    /// Runs one inference cycle. `ts_ms` is the cycle time; the frame carries its
    /// own capture time.
    pub fn process_cycle(
        &mut self,
        ts_ms: i64,
        frame: &Frame,
        detections: Vec<Detection>,
        model_loaded: bool,
    ) -> AnalyticsSnapshot {
        let image = frame.image.as_ref();
        let (width, height) = image.dimensions();

        // Stage 1: Temporal analysis
        let reading = self.movement.update(image);
        if reading.is_none() {
            trace!(ts_ms, "no movement reading this cycle");
        }
        let movement_index = reading.map(|r| r.movement_index);
        let thresholds = movement_thresholds(&self.stage_key);
        let movement_level = classify_movement(movement_index, thresholds);
        let molting = self.molting.update(ts_ms, &self.stage_key, movement_index);

        // Stage 2: Detection triage
        let threshold_conf = self.diseased_window.threshold_conf();
        let mut diseased_hit = false;
        let mut cocoon_count = 0usize;
        let mut larva_count = 0usize;
        let mut larva_area_px_sum = 0.0f64;
        let mut views = Vec::with_capacity(detections.len());

        for mut detection in detections {
            let categories = categorize(&detection.label);
            if categories.contains(&LabelCategory::Disease) && detection.confidence >= threshold_conf {
                diseased_hit = true;
            }
            if categories.contains(&LabelCategory::Larva) {
                larva_count += 1;
                larva_area_px_sum += detection.bbox.area();
            }
            if categories.contains(&LabelCategory::Cocoon) {
                cocoon_count += 1;
                detection.metrics = self.extractor.extract(image, &detection.label, &detection.bbox);
            }
            views.push(DetectionView::from_detection(&detection, width, height));
        }

        let diseased_confirmation = self.diseased_window.push(diseased_hit);

        // Stage 3: Population summary
        let frame_area = (width as f64 * height as f64).max(1.0);
        let size_change_ratio = match self.previous_larva_area {
            Some(previous) if previous > 0.0 => larva_area_px_sum / previous,
            _ => 1.0,
        };
        self.previous_larva_area = Some(larva_area_px_sum);

        let stage = if cocoon_count > 0 {
            ObservedStage::Cocoon
        } else if larva_count > 0 {
            ObservedStage::Larva
        } else {
            ObservedStage::None
        };

        debug!(
            ts_ms,
            detections = views.len(),
            movement_index,
            molting_state = %molting.state,
            diseased_hits = diseased_confirmation.hits,
            "cycle processed"
        );

        // Stage 4: Snapshot assembly
        AnalyticsSnapshot {
            ts_ms,
            ts_iso: ms_to_iso(ts_ms),
            source_frame_ts_ms: frame.ts_ms,
            frame: FrameSize { width, height },
            model_loaded,
            detections: views,
            stage_hint: StageHint {
                cocoon_count,
                larva_count,
                has_cocoon: cocoon_count > 0,
                has_larva: larva_count > 0,
                stage,
            },
            larva_metrics: LarvaMetrics {
                larva_density_area_ratio: larva_area_px_sum / frame_area,
                larva_bbox_area_px_sum: larva_area_px_sum,
                size_change_ratio,
                movement_index,
                motion_score: reading.map(|r| r.motion_score),
                movement_level,
                movement_stage: (!self.stage_key.is_empty()).then(|| self.stage_key.clone()),
                movement_thresholds: thresholds.copied(),
            },
            molting,
            diseased_confirmation,
        }
    }
}
