// THEORY:
// The monitor is the single writer of the engine. It owns the
// `AnalyticsPipeline` outright and drives it from one tokio task: tick, fetch a
// frame, ask the detector, process, publish. Nothing else ever touches the
// pipeline, so none of its state needs a lock.
//
// Key principles:
// 1.  **Blocking work off the runtime**: frame decoding and the detector call
//     run on `spawn_blocking`. The detector is additionally bounded by a
//     timeout, since it is a black box.
// 2.  **Fail before mutating**: the frame and the detections are gathered first.
//     If either fails the cycle is abandoned before the pipeline is touched, so
//     the baseline and the confirmation window never see a half cycle.
// 3.  **Latest value, not a queue**: snapshots are published through a `watch`
//     channel by replacing an `Arc`. Readers never block the writer and may skip
//     or repeat snapshots.
// 4.  **Cooperative stop**: the cancellation token is observed at every cycle
//     boundary and again after the detector returns.

use crate::config::MonitorConfig;
use crate::core_modules::detection::Detection;
use crate::core_modules::utils::image_helper::{is_supported_image, load_rgb};
use crate::core_modules::utils::time::now_ms;
use crate::error::{Result, VisionError};
use crate::pipeline::{AnalyticsPipeline, AnalyticsSnapshot, Frame};
use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Supplies camera frames. `Ok(None)` means no frame is available right now.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

/// The object detector, treated as a blocking black box.
pub trait Detector: Send + Sync {
    fn detect(&self, image: &RgbImage) -> Result<Vec<Detection>>;

    /// `false` when no model is available; the monitor then skips the call and
    /// runs the engine with an empty detection list.
    fn is_loaded(&self) -> bool {
        true
    }
}

/// Stand-in detector for running without a model.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoModelDetector;

impl Detector for NoModelDetector {
    fn detect(&self, _image: &RgbImage) -> Result<Vec<Detection>> {
        Ok(Vec::new())
    }

    fn is_loaded(&self) -> bool {
        false
    }
}

/// Replays image files from a directory in lexicographic order.
///
/// Once every file has been served the directory is rescanned, and files that
/// sort after the last one served are picked up. This lets a camera process
/// drop numbered frames into the directory while the monitor runs.
pub struct DirectoryFrameSource {
    dir: PathBuf,
    pending: Vec<PathBuf>,
    cursor: usize,
    last_served: Option<PathBuf>,
}

impl DirectoryFrameSource {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(VisionError::frame_source(format!("{} is not a directory", dir.display())));
        }
        let mut source = Self {
            dir,
            pending: Vec::new(),
            cursor: 0,
            last_served: None,
        };
        source.rescan()?;
        Ok(source)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of files queued and not yet served.
    pub fn remaining(&self) -> usize {
        self.pending.len() - self.cursor
    }

    fn rescan(&mut self) -> Result<()> {
        let entries = std::fs::read_dir(&self.dir).map_err(|err| {
            VisionError::frame_source(format!("scanning {}: {err}", self.dir.display()))
        })?;
        let mut files: Vec<PathBuf> = entries
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && is_supported_image(path))
            .filter(|path| self.last_served.as_ref().is_none_or(|last| path > last))
            .collect();
        files.sort();
        self.pending = files;
        self.cursor = 0;
        Ok(())
    }
}

impl FrameSource for DirectoryFrameSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.remaining() == 0 {
            self.rescan()?;
        }
        let Some(path) = self.pending.get(self.cursor).cloned() else {
            return Ok(None);
        };
        self.cursor += 1;
        self.last_served = Some(path.clone());
        let image = load_rgb(&path)?;
        trace!(path = %path.display(), "frame loaded");
        Ok(Some(Frame::new(now_ms(), image)))
    }
}

/// Narrow read-only accessor to the latest published snapshot.
#[derive(Clone)]
pub struct SnapshotReader {
    rx: watch::Receiver<Option<Arc<AnalyticsSnapshot>>>,
}

impl SnapshotReader {
    pub fn latest(&self) -> Option<Arc<AnalyticsSnapshot>> {
        self.rx.borrow().clone()
    }

    /// Waits for the next publication. `None` once the monitor has stopped.
    pub async fn changed(&mut self) -> Option<Arc<AnalyticsSnapshot>> {
        self.rx.changed().await.ok()?;
        self.rx.borrow_and_update().clone()
    }
}

/// Single-slot, replace-on-write publication of snapshots.
pub struct SnapshotPublisher {
    tx: watch::Sender<Option<Arc<AnalyticsSnapshot>>>,
}

impl Default for SnapshotPublisher {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotPublisher {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self { tx }
    }

    pub fn reader(&self) -> SnapshotReader {
        SnapshotReader { rx: self.tx.subscribe() }
    }

    /// Replaces the published snapshot. Succeeds with or without readers.
    pub fn publish(&self, snapshot: AnalyticsSnapshot) -> Arc<AnalyticsSnapshot> {
        let snapshot = Arc::new(snapshot);
        self.tx.send_replace(Some(Arc::clone(&snapshot)));
        snapshot
    }
}

/// Counters reported when the loop exits.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorStats {
    pub published: u64,
    pub idle: u64,
    pub abandoned: u64,
}

enum CycleOutcome {
    Published,
    Idle,
    Abandoned(VisionError),
    Cancelled,
}

pub struct Monitor {
    pipeline: AnalyticsPipeline,
    source: Arc<Mutex<Box<dyn FrameSource>>>,
    detector: Arc<dyn Detector>,
    config: MonitorConfig,
    publisher: SnapshotPublisher,
    stats: MonitorStats,
}

impl Monitor {
    pub fn new(
        pipeline: AnalyticsPipeline,
        source: impl FrameSource + 'static,
        detector: Arc<dyn Detector>,
        config: MonitorConfig,
    ) -> Self {
        let source: Box<dyn FrameSource> = Box::new(source);
        Self {
            pipeline,
            source: Arc::new(Mutex::new(source)),
            detector,
            config,
            publisher: SnapshotPublisher::new(),
            stats: MonitorStats::default(),
        }
    }

    pub fn reader(&self) -> SnapshotReader {
        self.publisher.reader()
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<MonitorStats> {
        tokio::spawn(self.run(cancel))
    }

    pub async fn run(mut self, cancel: CancellationToken) -> MonitorStats {
        let mut ticker = tokio::time::interval(self.config.infer_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(
            stage = %self.pipeline.stage_key(),
            model_loaded = self.detector.is_loaded(),
            interval_ms = self.config.infer_interval.as_millis() as u64,
            "monitor started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match self.run_cycle(&cancel).await {
                        CycleOutcome::Published => self.stats.published += 1,
                        CycleOutcome::Idle => self.stats.idle += 1,
                        CycleOutcome::Cancelled => break,
                        CycleOutcome::Abandoned(err) => {
                            self.stats.abandoned += 1;
                            if !err.is_cycle_fatal() {
                                debug!(error = %err, "frame skipped");
                                continue;
                            }
                            warn!(
                                error = %err,
                                backoff_ms = self.config.retry_backoff.as_millis() as u64,
                                "cycle abandoned"
                            );
                            tokio::select! {
                                _ = cancel.cancelled() => break,
                                _ = tokio::time::sleep(self.config.retry_backoff) => {}
                            }
                        }
                    }
                }
            }
        }

        info!(
            published = self.stats.published,
            idle = self.stats.idle,
            abandoned = self.stats.abandoned,
            "monitor stopped"
        );
        self.stats
    }

    async fn run_cycle(&mut self, cancel: &CancellationToken) -> CycleOutcome {
        let frame = match self.acquire_frame().await {
            Ok(Some(frame)) => frame,
            Ok(None) => {
                trace!("no frame available");
                return CycleOutcome::Idle;
            }
            Err(err) => return CycleOutcome::Abandoned(err),
        };

        if cancel.is_cancelled() {
            return CycleOutcome::Cancelled;
        }

        let model_loaded = self.detector.is_loaded();
        let detections = if model_loaded {
            match self.detect(Arc::clone(&frame.image)).await {
                Ok(detections) => detections,
                Err(err) => return CycleOutcome::Abandoned(err),
            }
        } else {
            Vec::new()
        };

        if cancel.is_cancelled() {
            return CycleOutcome::Cancelled;
        }

        let snapshot = self.pipeline.process_cycle(now_ms(), &frame, detections, model_loaded);
        self.publisher.publish(snapshot);
        CycleOutcome::Published
    }

    async fn acquire_frame(&self) -> Result<Option<Frame>> {
        let source = Arc::clone(&self.source);
        tokio::task::spawn_blocking(move || {
            let mut guard = source
                .lock()
                .map_err(|_| VisionError::frame_source("frame source lock poisoned"))?;
            guard.next_frame()
        })
        .await
        .map_err(|err| VisionError::frame_source(format!("frame worker join failed: {err}")))?
    }

    async fn detect(&self, image: Arc<RgbImage>) -> Result<Vec<Detection>> {
        let detector = Arc::clone(&self.detector);
        let call = tokio::task::spawn_blocking(move || detector.detect(&image));
        match tokio::time::timeout(self.config.detector_timeout, call).await {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => Err(VisionError::detector(format!("detector worker join failed: {err}"))),
            Err(_) => Err(VisionError::DetectorTimeout(self.config.detector_timeout)),
        }
    }
}
