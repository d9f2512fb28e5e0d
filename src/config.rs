//! Process configuration, read from `KOZA_*` environment variables.
//!
//! Every value has a default, so an empty environment yields a runnable (if
//! model-less) setup. Unparseable values fall back to the default rather than
//! aborting startup; `validate` catches combinations that parse but make no sense.

use crate::core_modules::pixel::LabColor;
use crate::error::{Result, VisionError};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

fn lookup_str<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name).map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn lookup_parsed<F, T>(lookup: &F, name: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    lookup_str(lookup, name)
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Tuning of the estimation engine itself.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Operator-supplied life stage, e.g. `larva_3`, `instar_2` or `koza`.
    pub active_stage: String,
    /// Confidence a disease-like detection needs to count as a hit.
    pub diseased_conf_threshold: f64,
    pub diseased_min_hits: usize,
    pub diseased_window_n: usize,
    /// Millimetres per pixel edge; `None` disables physical sizes.
    pub mm_per_pixel: Option<f64>,
    /// Reference colour for ΔE76, in the 8-bit Lab scale.
    pub lab_target: Option<LabColor>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            active_stage: String::new(),
            diseased_conf_threshold: 0.6,
            diseased_min_hits: 3,
            diseased_window_n: 10,
            mm_per_pixel: None,
            lab_target: None,
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        Self {
            active_stage: lookup_str(&lookup, "KOZA_ACTIVE_STAGE").unwrap_or_default(),
            diseased_conf_threshold: lookup_parsed(
                &lookup,
                "KOZA_DISEASED_CONF_THRESHOLD",
                defaults.diseased_conf_threshold,
            ),
            diseased_min_hits: lookup_parsed(&lookup, "KOZA_DISEASED_MIN_HITS", defaults.diseased_min_hits),
            diseased_window_n: lookup_parsed(&lookup, "KOZA_DISEASED_WINDOW_N", defaults.diseased_window_n),
            mm_per_pixel: Some(lookup_parsed(&lookup, "KOZA_MM_PER_PIXEL", 0.0)).filter(|mm| *mm > 0.0),
            lab_target: lookup_str(&lookup, "KOZA_COLOR_LAB_TARGET").and_then(|raw| LabColor::parse(&raw)),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.diseased_conf_threshold) {
            return Err(VisionError::config(format!(
                "KOZA_DISEASED_CONF_THRESHOLD must be within [0,1], got {}",
                self.diseased_conf_threshold
            )));
        }
        if self.diseased_window_n == 0 {
            return Err(VisionError::config("KOZA_DISEASED_WINDOW_N must be at least 1"));
        }
        if self.diseased_min_hits == 0 {
            return Err(VisionError::config("KOZA_DISEASED_MIN_HITS must be at least 1"));
        }
        if self.diseased_min_hits > self.diseased_window_n {
            return Err(VisionError::config(format!(
                "KOZA_DISEASED_MIN_HITS ({}) can never be reached in a window of {}",
                self.diseased_min_hits, self.diseased_window_n
            )));
        }
        Ok(())
    }
}

/// Cadence and fault handling of the inference loop.
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    pub infer_interval: Duration,
    /// Upper bound on one detector call.
    pub detector_timeout: Duration,
    /// Pause after a failed or timed-out detector call.
    pub retry_backoff: Duration,
    /// Directory of frames to replay. Required by the bundled binary.
    pub frame_dir: Option<PathBuf>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            infer_interval: Duration::from_millis(500),
            detector_timeout: Duration::from_millis(5000),
            retry_backoff: Duration::from_millis(1000),
            frame_dir: None,
        }
    }
}

impl MonitorConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            infer_interval: Duration::from_millis(lookup_parsed(&lookup, "KOZA_INFER_INTERVAL_MS", 500u64).max(1)),
            detector_timeout: Duration::from_millis(lookup_parsed(&lookup, "KOZA_DETECTOR_TIMEOUT_MS", 5000u64)),
            retry_backoff: Duration::from_millis(lookup_parsed(&lookup, "KOZA_RETRY_BACKOFF_MS", 1000u64)),
            frame_dir: lookup_str(&lookup, "KOZA_FRAME_DIR").map(PathBuf::from),
        }
    }
}

/// Bind address of the read-only snapshot server.
#[derive(Debug, Clone, PartialEq)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        Self {
            host: lookup_str(&lookup, "KOZA_BIND_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port: lookup_parsed(&lookup, "KOZA_BIND_PORT", 8080),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
