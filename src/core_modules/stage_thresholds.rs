// THEORY:
// Behaviour of a healthy larva depends heavily on its life stage: a first instar
// crawls constantly, a fifth instar mostly eats in place, and a spinning cocoon
// barely moves at all. This module is the static lookup from a normalised stage
// key to the bands that the classifier and the molting machine compare against.
//
// It is pure data. Keys come from free-form operator configuration, so
// `normalize_stage_key` folds the known aliases (including Turkish field terms
// and "instarN" spellings) onto canonical keys before any lookup.

use serde::{Deserialize, Serialize};

/// Behavioural movement bands for one stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MovementThresholds {
    /// Below this the larva is considered at risk. Absent for terminal stages.
    pub risk_low: Option<f64>,
    /// Above this the larva is considered stressed.
    pub stress_high: Option<f64>,
    pub ideal: (f64, f64),
    pub normal: (f64, f64),
}

/// Molting-specific bands for one larval stage.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MoltingThresholds {
    pub normal_mi: (f64, f64),
    /// Movement range consistent with pre-molt stillness.
    pub molting_mi: (f64, f64),
    /// Minimum relative drop below baseline.
    pub drop_ratio_min: f64,
    /// Hours of continuous stillness before PRE_MOLTING is promoted to MOLTING.
    pub min_hours: f64,
    /// Dwell after which PRE_MOLTING/MOLTING is flagged as overdue.
    pub max_hours: f64,
}

impl MoltingThresholds {
    pub fn min_duration_secs(&self) -> i64 {
        hours_to_secs(self.min_hours)
    }

    pub fn max_duration_secs(&self) -> i64 {
        hours_to_secs(self.max_hours)
    }
}

/// Hours to whole seconds, rounded and floored at zero.
pub fn hours_to_secs(hours: f64) -> i64 {
    (hours * 3600.0).round().max(0.0) as i64
}

const fn movement(
    risk_low: Option<f64>,
    stress_high: Option<f64>,
    ideal: (f64, f64),
    normal: (f64, f64),
) -> MovementThresholds {
    MovementThresholds { risk_low, stress_high, ideal, normal }
}

const fn molting(
    normal_mi: (f64, f64),
    molting_mi: (f64, f64),
    drop_ratio_min: f64,
    min_hours: f64,
    max_hours: f64,
) -> MoltingThresholds {
    MoltingThresholds { normal_mi, molting_mi, drop_ratio_min, min_hours, max_hours }
}

static MOVEMENT_TABLE: [(&str, MovementThresholds); 8] = [
    ("adaptation", movement(Some(0.15), Some(0.50), (0.25, 0.40), (0.20, 0.45))),
    ("larva_1", movement(Some(0.20), Some(0.60), (0.30, 0.50), (0.25, 0.55))),
    ("larva_2", movement(Some(0.15), Some(0.50), (0.25, 0.40), (0.20, 0.45))),
    ("larva_3", movement(Some(0.10), Some(0.45), (0.20, 0.35), (0.15, 0.40))),
    ("larva_4", movement(Some(0.08), Some(0.40), (0.15, 0.30), (0.10, 0.35))),
    ("larva_5", movement(Some(0.05), Some(0.35), (0.10, 0.25), (0.08, 0.30))),
    ("pre_cocoon", movement(Some(0.02), Some(0.25), (0.05, 0.15), (0.03, 0.20))),
    ("cocoon", movement(None, None, (0.00, 0.00), (0.00, 0.02))),
];

static MOLTING_TABLE: [(&str, MoltingThresholds); 5] = [
    ("larva_1", molting((0.30, 0.50), (0.05, 0.15), 0.60, 8.0, 18.0)),
    ("larva_2", molting((0.25, 0.40), (0.05, 0.12), 0.60, 12.0, 24.0)),
    ("larva_3", molting((0.20, 0.35), (0.04, 0.10), 0.65, 16.0, 30.0)),
    ("larva_4", molting((0.15, 0.30), (0.03, 0.08), 0.70, 20.0, 36.0)),
    ("larva_5", molting((0.10, 0.25), (0.02, 0.06), 0.70, 24.0, 48.0)),
];

pub fn movement_thresholds(stage_key: &str) -> Option<&'static MovementThresholds> {
    MOVEMENT_TABLE
        .iter()
        .find(|(key, _)| *key == stage_key)
        .map(|(_, thresholds)| thresholds)
}

pub fn molting_thresholds(stage_key: &str) -> Option<&'static MoltingThresholds> {
    MOLTING_TABLE
        .iter()
        .find(|(key, _)| *key == stage_key)
        .map(|(_, thresholds)| thresholds)
}

/// Folds an operator-supplied stage name onto a canonical table key.
///
/// Heuristic and open-ended: unknown spellings pass through lowercased so a
/// future table entry can pick them up without touching this function.
pub fn normalize_stage_key(raw: &str) -> String {
    let s = raw.trim().to_lowercase().replace('-', "_");
    let alias = match s.as_str() {
        "adaptasyon" | "adaptation" | "adaptation_0_1" | "adaptasyon_0_1" | "day0" | "day_0" | "day1"
        | "day_1" => Some("adaptation"),
        "koza" | "cocoon" | "cocoon_stage" => Some("cocoon"),
        "koza_oncesi" | "kozaoncesi" | "pre_koza" | "prekoza" | "pre_cocoon" => Some("pre_cocoon"),
        _ => None,
    };
    if let Some(canonical) = alias {
        return canonical.to_string();
    }
    if let Some(rest) = s.strip_prefix("instar") {
        let digits = rest.trim_start_matches('_');
        if !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()) {
            return format!("larva_{digits}");
        }
    }
    s
}
