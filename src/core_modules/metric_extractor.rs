// THEORY:
// The metric extractor turns one detection's region into diagnostic descriptors
// for display: how big it is, what colour it is, and how uniform its texture is.
// It is a pure function of the pixels under the box plus two optional
// calibrations (physical scale and a reference Lab colour). It keeps no state
// between calls.

use crate::core_modules::detection::BoundingBox;
use crate::core_modules::pixel::{HsvColor, LabColor, Pixel};
use crate::core_modules::region::Region;
use crate::error::Result;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use tracing::debug;

const MIN_GRAY_MEAN: f64 = 1e-6;

/// Physical dimensions, present only when a pixel scale is configured.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicalSize {
    pub width_mm: f64,
    pub height_mm: f64,
    pub area_mm2: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizeMetrics {
    pub width_px: u32,
    pub height_px: u32,
    pub area_px: u64,
    /// `area_px / (frame_width * frame_height)`.
    pub area_ratio: f64,
    #[serde(flatten)]
    pub physical: Option<PhysicalSize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeanRgb {
    pub r: f64,
    pub g: f64,
    pub b: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorMetrics {
    pub mean_rgb: MeanRgb,
    pub mean_hsv: HsvColor,
    pub mean_lab: LabColor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delta_e76: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HomogeneityMetrics {
    pub gray_std: f64,
    pub gray_mean: f64,
    /// Coefficient of variation; omitted for near-black regions.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub std_over_mean: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectionMetrics {
    pub size: SizeMetrics,
    pub color: ColorMetrics,
    pub homogeneity: HomogeneityMetrics,
}

#[derive(Debug, Clone, Default)]
pub struct MetricExtractor {
    /// Length of one pixel edge in millimetres.
    mm_per_pixel: Option<f64>,
    lab_target: Option<LabColor>,
}

impl MetricExtractor {
    pub fn new(mm_per_pixel: Option<f64>, lab_target: Option<LabColor>) -> Self {
        Self {
            mm_per_pixel: mm_per_pixel.filter(|v| *v > 0.0),
            lab_target,
        }
    }

    /// Descriptors for one detection, or `None` when the box covers no pixels
    /// or the image is empty.
    pub fn extract(&self, image: &RgbImage, label: &str, bbox: &BoundingBox) -> Option<DetectionMetrics> {
        match self.try_extract(image, bbox) {
            Ok(metrics) => Some(metrics),
            Err(err) => {
                debug!(label, error = %err, "no metrics for detection");
                None
            }
        }
    }

    pub fn try_extract(&self, image: &RgbImage, bbox: &BoundingBox) -> Result<DetectionMetrics> {
        let region = Region::new(image, bbox)?;
        let bounds = region.bounds;

        let width_px = bounds.width();
        let height_px = bounds.height();
        let area_px = bounds.area();
        let frame_area = (image.width() as u64 * image.height() as u64).max(1);
        let area_ratio = area_px as f64 / frame_area as f64;

        let physical = self.mm_per_pixel.map(|mm| PhysicalSize {
            width_mm: width_px as f64 * mm,
            height_mm: height_px as f64 * mm,
            area_mm2: area_px as f64 * mm * mm,
        });

        let (r, g, b) = region.mean_color();
        let mean_pixel = Pixel::from_mean(r, g, b);
        let mean_lab = mean_pixel.to_lab();
        let delta_e76 = self.lab_target.map(|target| mean_lab.delta_e76(&target));

        let gray = region.gray_stats();
        let std_over_mean = (gray.mean > MIN_GRAY_MEAN).then(|| gray.std_dev / gray.mean);

        Ok(DetectionMetrics {
            size: SizeMetrics {
                width_px,
                height_px,
                area_px,
                area_ratio,
                physical,
            },
            color: ColorMetrics {
                mean_rgb: MeanRgb { r, g, b },
                mean_hsv: mean_pixel.to_hsv(),
                mean_lab,
                delta_e76,
            },
            homogeneity: HomogeneityMetrics {
                gray_std: gray.std_dev,
                gray_mean: gray.mean,
                std_over_mean,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn frame(width: u32, height: u32, color: [u8; 3]) -> RgbImage {
        RgbImage::from_pixel(width, height, Rgb(color))
    }

    #[test]
    fn reversed_box_on_square_frame() {
        let extractor = MetricExtractor::default();
        let image = frame(100, 100, [255, 255, 255]);
        let metrics = extractor
            .extract(&image, "cocoon", &BoundingBox::new(80.0, 80.0, 10.0, 10.0))
            .unwrap();
        assert_eq!(metrics.size.width_px, 70);
        assert_eq!(metrics.size.height_px, 70);
        assert_eq!(metrics.size.area_px, 4900);
        assert_eq!(metrics.size.area_ratio, 4900.0 / 10000.0);
        assert!(metrics.size.physical.is_none());
        assert!(metrics.color.delta_e76.is_none());
    }

    #[test]
    fn area_ratio_is_exact_on_rectangular_frames() {
        let extractor = MetricExtractor::default();
        let image = frame(64, 48, [10, 20, 30]);
        let metrics = extractor
            .extract(&image, "koza", &BoundingBox::new(3.2, 5.0, 20.6, 17.0))
            .unwrap();
        // x: 3..21, y: 5..17
        assert_eq!(metrics.size.area_px, 18 * 12);
        assert_eq!(metrics.size.area_ratio, (18.0 * 12.0) / (64.0 * 48.0));
    }

    #[test]
    fn empty_geometry_yields_no_metrics() {
        let extractor = MetricExtractor::default();
        let image = frame(100, 100, [0, 0, 0]);
        assert!(extractor.extract(&image, "cocoon", &BoundingBox::new(120.0, 120.0, 180.0, 190.0)).is_none());
        assert!(extractor.extract(&image, "cocoon", &BoundingBox::new(10.0, 10.0, 10.0, 50.0)).is_none());
        assert!(extractor.extract(&image, "cocoon", &BoundingBox::new(10.0, 40.0, 50.0, 40.0)).is_none());
        assert!(extractor.extract(&RgbImage::new(0, 0), "cocoon", &BoundingBox::new(0.0, 0.0, 5.0, 5.0)).is_none());
    }

    #[test]
    fn calibrated_physical_size_and_colour_delta() {
        let target = LabColor::new(255.0, 128.0, 128.0);
        let extractor = MetricExtractor::new(Some(0.5), Some(target));
        let image = frame(50, 50, [255, 255, 255]);
        let metrics = extractor
            .extract(&image, "cocoon", &BoundingBox::new(0.0, 0.0, 10.0, 20.0))
            .unwrap();
        let physical = metrics.size.physical.unwrap();
        assert_eq!(physical.width_mm, 5.0);
        assert_eq!(physical.height_mm, 10.0);
        assert_eq!(physical.area_mm2, 50.0);
        assert_eq!(metrics.color.delta_e76, Some(0.0));
        assert_eq!(metrics.color.mean_hsv, HsvColor { h: 0, s: 0, v: 255 });
    }

    #[test]
    fn zero_scale_disables_physical_size() {
        let extractor = MetricExtractor::new(Some(0.0), None);
        let image = frame(20, 20, [90, 90, 90]);
        let metrics = extractor.extract(&image, "cocoon", &BoundingBox::new(0.0, 0.0, 5.0, 5.0)).unwrap();
        assert!(metrics.size.physical.is_none());
    }

    #[test]
    fn homogeneity_ratio_skipped_for_black_regions() {
        let extractor = MetricExtractor::default();
        let black = frame(20, 20, [0, 0, 0]);
        let metrics = extractor.extract(&black, "cocoon", &BoundingBox::new(0.0, 0.0, 10.0, 10.0)).unwrap();
        assert_eq!(metrics.homogeneity.gray_mean, 0.0);
        assert!(metrics.homogeneity.std_over_mean.is_none());

        let flat = frame(20, 20, [120, 120, 120]);
        let metrics = extractor.extract(&flat, "cocoon", &BoundingBox::new(0.0, 0.0, 10.0, 10.0)).unwrap();
        assert_eq!(metrics.homogeneity.gray_std, 0.0);
        assert_eq!(metrics.homogeneity.std_over_mean, Some(0.0));
    }

    #[test]
    fn serialises_optional_blocks_only_when_present() {
        let extractor = MetricExtractor::new(Some(0.1), None);
        let image = frame(10, 10, [200, 180, 160]);
        let metrics = extractor.extract(&image, "cocoon", &BoundingBox::new(0.0, 0.0, 4.0, 4.0)).unwrap();
        let json = serde_json::to_value(&metrics).unwrap();
        assert!(json["size"]["width_mm"].is_number());
        assert!(json["color"].get("delta_e76").is_none());
        assert!(json["homogeneity"]["std_over_mean"].is_number());
    }
}
