// THEORY (single-pixel colour science):
// The `Pixel` module is the most fundamental unit of the engine. It is a "dumb"
// data container for one RGB colour plus the conversions the metric extractor
// needs to describe a region: grayscale luma, HSV and CIE Lab.
//
// Every conversion here works on ONE colour. The extractor averages a region
// first and converts the mean afterwards, so the costly colorimetry runs once
// per detection instead of once per pixel.
//
// Output scales follow the 8-bit convention used by common vision toolkits, so
// a Lab target captured with those tools can be compared directly:
//   • HSV: H in [0,180) (degrees / 2), S and V in [0,255]
//   • Lab: L scaled by 255/100, a and b offset by +128, all in [0,255]
//
// sRGB → linear conversion uses a 256-entry `OnceLock` LUT; the hot path is a
// table lookup, never a `powf` per call.

use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

pub type Channel = u8;
pub type NormalizedChannel = f64;
pub type Luminance = f64;

// D65 reference white expressed through the same matrix rows used below, so
// pure white maps to exactly L=100, a=b=0.
const WHITE_X: f64 = 0.4124564 + 0.3575761 + 0.1804375;
const WHITE_Z: f64 = 0.0193339 + 0.1191920 + 0.9503041;

const LAB_EPSILON: f64 = 0.008856;

static SRGB_TO_LINEAR_LUT: OnceLock<[NormalizedChannel; 256]> = OnceLock::new();

/// A single RGB colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Pixel {
    pub red: Channel,
    pub green: Channel,
    pub blue: Channel,
}

/// 8-bit HSV triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HsvColor {
    pub h: u8,
    pub s: u8,
    pub v: u8,
}

/// 8-bit-scaled CIE Lab triple. Stored as floats so configured targets with
/// fractional components compare without loss.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LabColor {
    pub l: f64,
    pub a: f64,
    pub b: f64,
}

impl LabColor {
    pub fn new(l: f64, a: f64, b: f64) -> Self {
        Self { l, a, b }
    }

    /// Parses `"L,a,b"`. Blank or malformed input yields `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        let parts: Vec<&str> = trimmed.split(',').map(str::trim).collect();
        if parts.len() != 3 {
            return None;
        }
        let l = parts[0].parse().ok()?;
        let a = parts[1].parse().ok()?;
        let b = parts[2].parse().ok()?;
        Some(Self { l, a, b })
    }

    /// CIE76 colour difference: Euclidean distance in Lab.
    pub fn delta_e76(&self, other: &LabColor) -> f64 {
        let dl = self.l - other.l;
        let da = self.a - other.a;
        let db = self.b - other.b;
        (dl * dl + da * da + db * db).sqrt()
    }
}

impl Pixel {
    pub fn new(red: Channel, green: Channel, blue: Channel) -> Self {
        Self { red, green, blue }
    }

    /// Builds a pixel from a floating mean colour, truncating each channel the
    /// way an 8-bit cast does.
    pub fn from_mean(red: f64, green: f64, blue: f64) -> Self {
        let cast = |v: f64| v.clamp(0.0, 255.0) as Channel;
        Self::new(cast(red), cast(green), cast(blue))
    }

    #[inline]
    fn srgb_to_linear(value: Channel) -> NormalizedChannel {
        let table = SRGB_TO_LINEAR_LUT.get_or_init(|| {
            let mut table = [0.0f64; 256];
            for (i, slot) in table.iter_mut().enumerate() {
                let srgb_normalized = i as NormalizedChannel / 255.0;
                *slot = if srgb_normalized <= 0.04045 {
                    srgb_normalized / 12.92
                } else {
                    ((srgb_normalized + 0.055) / 1.055).powf(2.4)
                };
            }
            table
        });
        table[value as usize]
    }

    /// Luminance estimate (Rec. 601 luma) on the 0..255 scale.
    pub fn luminance(&self) -> Luminance {
        0.299 * self.red as f64 + 0.587 * self.green as f64 + 0.114 * self.blue as f64
    }

    /// Rounded 8-bit gray level.
    pub fn gray(&self) -> u8 {
        self.luminance().round().clamp(0.0, 255.0) as u8
    }

    /// 8-bit HSV conversion.
    pub fn to_hsv(&self) -> HsvColor {
        let r = self.red as f64;
        let g = self.green as f64;
        let b = self.blue as f64;
        let maximum_channel = r.max(g.max(b));
        let minimum_channel = r.min(g.min(b));
        let chroma = maximum_channel - minimum_channel;

        let saturation = if maximum_channel <= 0.0 {
            0.0
        } else {
            255.0 * chroma / maximum_channel
        };

        let hue_degrees = if chroma <= 0.0 {
            0.0
        } else {
            let (base_difference, sector_offset) = if maximum_channel == r {
                (g - b, 0.0)
            } else if maximum_channel == g {
                (b - r, 120.0)
            } else {
                (r - g, 240.0)
            };
            let mut degrees = 60.0 * base_difference / chroma + sector_offset;
            if degrees < 0.0 {
                degrees += 360.0;
            }
            degrees
        };

        HsvColor {
            h: ((hue_degrees / 2.0).round() as u16 % 180) as u8,
            s: saturation.round().clamp(0.0, 255.0) as u8,
            v: maximum_channel as u8,
        }
    }

    /// 8-bit-scaled CIE Lab conversion (sRGB, D65).
    pub fn to_lab(&self) -> LabColor {
        let r = Self::srgb_to_linear(self.red);
        let g = Self::srgb_to_linear(self.green);
        let b = Self::srgb_to_linear(self.blue);

        let x = (0.4124564 * r + 0.3575761 * g + 0.1804375 * b) / WHITE_X;
        let y = 0.2126729 * r + 0.7151522 * g + 0.0721750 * b;
        let z = (0.0193339 * r + 0.1191920 * g + 0.9503041 * b) / WHITE_Z;

        let f = |t: f64| {
            if t > LAB_EPSILON {
                t.cbrt()
            } else {
                7.787 * t + 16.0 / 116.0
            }
        };
        let (fx, fy, fz) = (f(x), f(y), f(z));

        let lightness = if y > LAB_EPSILON {
            116.0 * fy - 16.0
        } else {
            903.3 * y
        };
        let a = 500.0 * (fx - fy);
        let b = 200.0 * (fy - fz);

        let scale = |v: f64| v.round().clamp(0.0, 255.0);
        LabColor {
            l: scale(lightness * 255.0 / 100.0),
            a: scale(a + 128.0),
            b: scale(b + 128.0),
        }
    }
}

impl From<image::Rgb<u8>> for Pixel {
    fn from(rgb: image::Rgb<u8>) -> Self {
        let [red, green, blue] = rgb.0;
        Pixel::new(red, green, blue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primaries_to_hsv() {
        assert_eq!(Pixel::new(255, 0, 0).to_hsv(), HsvColor { h: 0, s: 255, v: 255 });
        assert_eq!(Pixel::new(0, 255, 0).to_hsv(), HsvColor { h: 60, s: 255, v: 255 });
        assert_eq!(Pixel::new(0, 0, 255).to_hsv(), HsvColor { h: 120, s: 255, v: 255 });
        assert_eq!(Pixel::new(40, 40, 40).to_hsv(), HsvColor { h: 0, s: 0, v: 40 });
    }

    #[test]
    fn neutral_and_red_to_lab() {
        assert_eq!(Pixel::new(255, 255, 255).to_lab(), LabColor::new(255.0, 128.0, 128.0));
        assert_eq!(Pixel::new(0, 0, 0).to_lab(), LabColor::new(0.0, 128.0, 128.0));
        assert_eq!(Pixel::new(255, 0, 0).to_lab(), LabColor::new(136.0, 208.0, 195.0));
    }

    #[test]
    fn gray_uses_rec601_weights() {
        assert_eq!(Pixel::new(255, 0, 0).gray(), 76);
        assert_eq!(Pixel::new(0, 255, 0).gray(), 150);
        assert_eq!(Pixel::new(0, 0, 255).gray(), 29);
    }

    #[test]
    fn lab_target_parsing() {
        assert_eq!(LabColor::parse(" 200, 120.5 ,140"), Some(LabColor::new(200.0, 120.5, 140.0)));
        assert_eq!(LabColor::parse(""), None);
        assert_eq!(LabColor::parse("1,2"), None);
        assert_eq!(LabColor::parse("1,x,3"), None);
    }

    #[test]
    fn delta_e_is_euclidean() {
        let a = LabColor::new(100.0, 128.0, 128.0);
        let b = LabColor::new(103.0, 132.0, 128.0);
        assert!((a.delta_e76(&b) - 5.0).abs() < 1e-12);
    }
}
