// THEORY:
// A `Region` is the rectangular block of frame pixels covered by one detection.
// It is the bridge between detector geometry (floating, possibly reversed or
// out-of-frame corners) and pixel statistics.
//
// Key principles:
// 1.  **Clipping first**: corners are ordered with min/max, rounded, and clamped
//     to [0, width-1] × [0, height-1]. The clipped rectangle is half-open, so a
//     box touching the far edge loses its last row and column.
// 2.  **Summaries, not copies**: a region borrows the frame and only ever produces
//     aggregates (mean colour, gray mean and spread). Nothing is cached.
// 3.  **Dumb container**: it knows how to summarise itself, not what the summary
//     means for the organism. Interpretation lives in the metric extractor.

use crate::core_modules::detection::BoundingBox;
use crate::core_modules::pixel::Pixel;
use crate::error::{Result, VisionError};
use image::RgbImage;

/// Integer pixel bounds `[x0, x1) × [y0, y1)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelBounds {
    pub x0: u32,
    pub y0: u32,
    pub x1: u32,
    pub y1: u32,
}

impl PixelBounds {
    /// Orders, rounds and clamps a bounding box to the frame. `None` when the
    /// result has zero width or height.
    pub fn clip(bbox: &BoundingBox, frame_width: u32, frame_height: u32) -> Option<Self> {
        if frame_width == 0 || frame_height == 0 {
            return None;
        }
        let clamp_axis = |v: f64, limit: u32| -> u32 {
            let max = (limit - 1) as f64;
            v.round().clamp(0.0, max) as u32
        };
        let x0 = clamp_axis(bbox.x1.min(bbox.x2), frame_width);
        let x1 = clamp_axis(bbox.x1.max(bbox.x2), frame_width);
        let y0 = clamp_axis(bbox.y1.min(bbox.y2), frame_height);
        let y1 = clamp_axis(bbox.y1.max(bbox.y2), frame_height);
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Self { x0, y0, x1, y1 })
    }

    pub fn width(&self) -> u32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> u32 {
        self.y1 - self.y0
    }

    pub fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }
}

/// Mean and population standard deviation of gray levels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GrayStats {
    pub mean: f64,
    pub std_dev: f64,
}

/// A borrowed rectangular view into a frame.
pub struct Region<'a> {
    frame: &'a RgbImage,
    pub bounds: PixelBounds,
}

impl<'a> Region<'a> {
    pub fn new(frame: &'a RgbImage, bbox: &BoundingBox) -> Result<Self> {
        if frame.width() == 0 || frame.height() == 0 || frame.as_raw().is_empty() {
            return Err(VisionError::EmptyImage);
        }
        let bounds = PixelBounds::clip(bbox, frame.width(), frame.height())
            .ok_or(VisionError::DegenerateRegion)?;
        Ok(Self { frame, bounds })
    }

    pub fn pixel_count(&self) -> u64 {
        self.bounds.area()
    }

    fn pixels(&self) -> impl Iterator<Item = Pixel> + '_ {
        let b = self.bounds;
        (b.y0..b.y1).flat_map(move |y| (b.x0..b.x1).map(move |x| Pixel::from(*self.frame.get_pixel(x, y))))
    }

    /// Mean colour per channel, as floats.
    pub fn mean_color(&self) -> (f64, f64, f64) {
        let count = self.pixel_count();
        if count == 0 {
            return (0.0, 0.0, 0.0);
        }
        let mut sum_r = 0u64;
        let mut sum_g = 0u64;
        let mut sum_b = 0u64;
        for pixel in self.pixels() {
            sum_r += pixel.red as u64;
            sum_g += pixel.green as u64;
            sum_b += pixel.blue as u64;
        }
        let n = count as f64;
        (sum_r as f64 / n, sum_g as f64 / n, sum_b as f64 / n)
    }

    /// Gray mean and spread, computed in one pass over rounded Rec.601 luma.
    pub fn gray_stats(&self) -> GrayStats {
        let count = self.pixel_count();
        if count == 0 {
            return GrayStats { mean: 0.0, std_dev: 0.0 };
        }
        let mut sum = 0u64;
        let mut sum_sq = 0u64;
        for pixel in self.pixels() {
            let g = pixel.gray() as u64;
            sum += g;
            sum_sq += g * g;
        }
        let n = count as f64;
        let mean = sum as f64 / n;
        let variance = (sum_sq as f64 / n - mean * mean).max(0.0);
        GrayStats { mean, std_dev: variance.sqrt() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn bbox(x1: f64, y1: f64, x2: f64, y2: f64) -> BoundingBox {
        BoundingBox { x1, y1, x2, y2 }
    }

    #[test]
    fn reversed_corners_clip_to_same_bounds() {
        let forward = PixelBounds::clip(&bbox(10.0, 10.0, 80.0, 80.0), 100, 100);
        let reversed = PixelBounds::clip(&bbox(80.0, 80.0, 10.0, 10.0), 100, 100);
        assert_eq!(forward, reversed);
        let bounds = reversed.unwrap();
        assert_eq!((bounds.width(), bounds.height(), bounds.area()), (70, 70, 4900));
    }

    #[test]
    fn out_of_frame_and_flat_boxes_are_empty() {
        assert!(PixelBounds::clip(&bbox(150.0, 150.0, 300.0, 300.0), 100, 100).is_none());
        assert!(PixelBounds::clip(&bbox(-50.0, 10.0, -5.0, 40.0), 100, 100).is_none());
        assert!(PixelBounds::clip(&bbox(20.0, 30.0, 20.0, 60.0), 100, 100).is_none());
        assert!(PixelBounds::clip(&bbox(20.0, 30.0, 60.0, 30.2), 100, 100).is_none());
    }

    #[test]
    fn full_frame_box_loses_the_far_edge() {
        let bounds = PixelBounds::clip(&bbox(0.0, 0.0, 100.0, 100.0), 100, 100).unwrap();
        assert_eq!((bounds.width(), bounds.height()), (99, 99));
    }

    #[test]
    fn region_statistics() {
        let mut frame = RgbImage::from_pixel(4, 4, Rgb([0, 0, 0]));
        // left half white, right half black inside a 4x2 region
        for y in 0..4 {
            for x in 0..2 {
                frame.put_pixel(x, y, Rgb([255, 255, 255]));
            }
        }
        let region = Region::new(&frame, &bbox(0.0, 0.0, 4.0, 3.0)).unwrap();
        assert_eq!(region.bounds, PixelBounds { x0: 0, y0: 0, x1: 3, y1: 3 });
        let (r, g, b) = region.mean_color();
        assert!((r - 170.0).abs() < 1e-9 && (g - 170.0).abs() < 1e-9 && (b - 170.0).abs() < 1e-9);
        let stats = region.gray_stats();
        assert!((stats.mean - 170.0).abs() < 1e-9);
        // two thirds at 255, one third at 0
        let expected_std = (2.0f64 / 3.0 * 85.0 * 85.0 + 1.0 / 3.0 * 170.0 * 170.0).sqrt();
        assert!((stats.std_dev - expected_std).abs() < 1e-9);
    }

    #[test]
    fn empty_image_is_rejected() {
        let frame = RgbImage::new(0, 0);
        assert!(matches!(
            Region::new(&frame, &bbox(0.0, 0.0, 1.0, 1.0)),
            Err(VisionError::EmptyImage)
        ));
    }
}
