// THEORY:
// This file is the main entry point for the `koza_vision` library crate. It
// exposes the estimation engine (`AnalyticsPipeline` and the snapshot types it
// produces) together with the thin runtime around it: configuration, the
// single-writer monitor loop and, behind the `web` feature, a read-only HTTP
// view of the latest snapshot.
//
// The stateful building blocks (movement estimator, molting machine,
// confirmation window, metric extractor) live in `core_modules`. They are
// public so they can be tested and reused on their own, but the intended way in
// is the pipeline.

pub mod config;
pub mod core_modules;
pub mod error;
pub mod monitor;
pub mod pipeline;
pub mod server;

pub use config::{EngineConfig, MonitorConfig, ServerConfig};
pub use error::{Result, VisionError};
pub use monitor::{Detector, DirectoryFrameSource, FrameSource, Monitor, NoModelDetector, SnapshotReader};
pub use pipeline::{AnalyticsPipeline, AnalyticsSnapshot, Frame, PushPayload};
