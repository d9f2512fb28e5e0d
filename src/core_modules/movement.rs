// THEORY:
// The movement estimator is the engine's only continuous sensor. Much like a
// smart chunk remembering the last average pixel for its patch, it remembers
// exactly one thing between cycles: the previous grayscale frame. Each new frame
// is compared against it pixel by pixel, and the mean absolute difference,
// scaled to [0,1], becomes the "movement index" for the cycle.
//
// Key principles:
// 1.  **One slot of memory**: the stored frame is overwritten on every call,
//     even when the call returns nothing. A resolution change therefore costs one
//     silent cycle and then resynchronises on its own.
// 2.  **Absence is not an error**: the first frame, or a frame whose size does
//     not match, simply has no movement reading.
// 3.  **Interpretation lives elsewhere**: `classify_movement` compares a reading
//     against the active stage's bands. It knows nothing about frames.

use crate::core_modules::pixel::Pixel;
use crate::core_modules::stage_thresholds::MovementThresholds;
use crate::error::VisionError;
use image::{GrayImage, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

const MAX_CHANNEL_VALUE: f64 = 255.0;

/// One frame-to-frame activity measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MovementReading {
    /// Mean absolute gray difference, normalised to [0,1].
    pub movement_index: f64,
    /// `movement_index * 100`, for display only.
    pub motion_score: f64,
}

impl MovementReading {
    pub fn from_index(movement_index: f64) -> Self {
        let movement_index = movement_index.clamp(0.0, 1.0);
        Self {
            movement_index,
            motion_score: movement_index * 100.0,
        }
    }
}

/// Behavioural category of a movement index for the active stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementLevel {
    LowRisk,
    Normal,
    HighStress,
    Indeterminate,
}

#[derive(Debug, Default)]
pub struct MovementEstimator {
    previous: Option<GrayImage>,
}

impl MovementEstimator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compares `frame` against the previously stored frame and stores `frame`
    /// in its place.
    pub fn update(&mut self, frame: &RgbImage) -> Option<MovementReading> {
        let current = to_gray(frame);
        let previous = self.previous.replace(current);
        let previous = previous?;
        let current = self.previous.as_ref()?;

        if previous.dimensions() != current.dimensions() {
            let err = VisionError::DimensionMismatch {
                expected_width: previous.width(),
                expected_height: previous.height(),
                actual_width: current.width(),
                actual_height: current.height(),
            };
            debug!(error = %err, "movement baseline frame replaced");
            return None;
        }

        let pixel_count = current.as_raw().len();
        if pixel_count == 0 {
            return None;
        }

        let total_difference: u64 = previous
            .as_raw()
            .iter()
            .zip(current.as_raw())
            .map(|(a, b)| a.abs_diff(*b) as u64)
            .sum();
        let mean_difference = total_difference as f64 / pixel_count as f64;

        Some(MovementReading::from_index(mean_difference / MAX_CHANNEL_VALUE))
    }

    /// Forgets the stored frame; the next update returns `None`.
    pub fn reset(&mut self) {
        self.previous = None;
    }

    pub fn has_previous(&self) -> bool {
        self.previous.is_some()
    }
}

fn to_gray(frame: &RgbImage) -> GrayImage {
    GrayImage::from_fn(frame.width(), frame.height(), |x, y| {
        image::Luma([Pixel::from(*frame.get_pixel(x, y)).gray()])
    })
}

/// Places a movement index in the active stage's behavioural bands.
///
/// `Indeterminate` when either the reading or the thresholds are missing.
/// A bound the stage does not define never fires.
pub fn classify_movement(movement_index: Option<f64>, thresholds: Option<&MovementThresholds>) -> MovementLevel {
    let (Some(m), Some(th)) = (movement_index, thresholds) else {
        return MovementLevel::Indeterminate;
    };
    if th.risk_low.is_some_and(|low| m < low) {
        MovementLevel::LowRisk
    } else if th.stress_high.is_some_and(|high| m > high) {
        MovementLevel::HighStress
    } else {
        MovementLevel::Normal
    }
}
