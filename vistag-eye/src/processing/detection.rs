//! Object detection pipeline

use crate::camera::FrameConsumer;
use crate::error::VisionError;
use crate::frame::Frame;
use crate::models::{DetectionOutcome, DetectorInput, DetectorOptions, ObjectDetector};
use crate::state::OutcomeSink;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::Notify;
use tracing::debug;

/// Counters exposed by [`DetectionPipeline::stats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Frames handed to the detector
    pub dispatched: u64,
    /// Detector calls that finished, successfully or not
    pub completed: u64,
    pub failed: u64,
    /// Frames with no usable image
    pub skipped: u64,
    pub in_flight: u64,
}

#[derive(Debug, Default)]
struct Counters {
    dispatched: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    skipped: AtomicU64,
    in_flight: AtomicU64,
}

/// Frame consumer that runs every delivered frame through an
/// [`ObjectDetector`] and forwards the outcome to the state store.
///
/// Each frame becomes an independent task, so several detections may be in
/// flight at once and may complete in any order. The frame is released after
/// the outcome is forwarded, on every path.
pub struct DetectionPipeline {
    detector: Arc<dyn ObjectDetector>,
    options: DetectorOptions,
    outcomes: OutcomeSink,
    runtime: Handle,
    counters: Arc<Counters>,
    idle: Arc<Notify>,
}

impl DetectionPipeline {
    /// Create a pipeline that spawns detections on the current tokio runtime
    pub fn new(
        detector: Arc<dyn ObjectDetector>,
        options: DetectorOptions,
        outcomes: OutcomeSink,
    ) -> Result<Self, VisionError> {
        let runtime = Handle::try_current().map_err(|_| {
            VisionError::Detection(
                "Detection pipeline must be created inside a tokio runtime".to_string(),
            )
        })?;
        Ok(Self::with_runtime(detector, options, outcomes, runtime))
    }

    pub fn with_runtime(
        detector: Arc<dyn ObjectDetector>,
        options: DetectorOptions,
        outcomes: OutcomeSink,
        runtime: Handle,
    ) -> Self {
        Self {
            detector,
            options,
            outcomes,
            runtime,
            counters: Arc::new(Counters::default()),
            idle: Arc::new(Notify::new()),
        }
    }

    pub fn options(&self) -> &DetectorOptions {
        &self.options
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            dispatched: self.counters.dispatched.load(Ordering::Relaxed),
            completed: self.counters.completed.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
            in_flight: self.in_flight(),
        }
    }

    /// Frames accepted but not yet released
    pub fn in_flight(&self) -> u64 {
        self.counters.in_flight.load(Ordering::Acquire)
    }

    /// Wait until every accepted frame has been released
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.in_flight() == 0 {
                return;
            }
            notified.await;
        }
    }
}

impl FrameConsumer for DetectionPipeline {
    fn on_frame(&self, frame: Frame) {
        let attempt = DetectionAttempt {
            detector: self.detector.clone(),
            options: self.options.clone(),
            outcomes: self.outcomes.clone(),
            counters: self.counters.clone(),
            _guard: InFlightGuard::enter(self.counters.clone(), self.idle.clone()),
        };
        self.runtime.spawn(attempt.run(frame));
    }
}

/// Tracks one accepted frame; dropping it (including on panic) marks the
/// frame as finished.
struct InFlightGuard {
    counters: Arc<Counters>,
    idle: Arc<Notify>,
}

impl InFlightGuard {
    fn enter(counters: Arc<Counters>, idle: Arc<Notify>) -> Self {
        counters.in_flight.fetch_add(1, Ordering::AcqRel);
        Self { counters, idle }
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        if self.counters.in_flight.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

struct DetectionAttempt {
    detector: Arc<dyn ObjectDetector>,
    options: DetectorOptions,
    outcomes: OutcomeSink,
    counters: Arc<Counters>,
    _guard: InFlightGuard,
}

impl DetectionAttempt {
    async fn run(self, frame: Frame) {
        let DetectionAttempt {
            detector,
            options,
            outcomes,
            counters,
            _guard: guard,
        } = self;
        // declared after the guard so it is dropped first, also when unwinding
        let frame = frame;
        let sequence = frame.sequence();

        let result = match DetectorInput::from_frame(&frame) {
            Ok(input) => {
                counters.dispatched.fetch_add(1, Ordering::Relaxed);
                Some(detector.detect(&input, &options).await)
            }
            Err(e) => {
                debug!("Skipping frame {}: {}", sequence, e);
                None
            }
        };

        let result = match result {
            Some(result) => result,
            None => {
                counters.skipped.fetch_add(1, Ordering::Relaxed);
                frame.close();
                drop(guard);
                return;
            }
        };

        counters.completed.fetch_add(1, Ordering::Relaxed);
        match &result {
            Ok(detections) => debug!("Frame {}: detected {} objects", sequence, detections.len()),
            Err(_) => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
            }
        }

        outcomes.submit(DetectionOutcome::from(result));
        frame.close();
        drop(guard);
    }
}
