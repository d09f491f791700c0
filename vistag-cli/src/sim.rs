// Synthetic camera, detector and preview for running without hardware

use async_trait::async_trait;
use bytes::Bytes;
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};
use vistag_eye::camera::{CameraProvider, CameraSelector, CameraStreams, StreamRequest};
use vistag_eye::{
    DetectedObject, DetectionResult, DetectorInput, DetectorOptions, Frame, FrameBuffer, LensFacing,
    ObjectDetector, PixelFormat, PreviewFrame, PreviewTarget, Resolution, VisionError,
};

/// Coarse categories the synthetic detector picks from
pub const CATALOGUE: [&str; 5] = ["fashion good", "food", "home good", "place", "plant"];

/// Camera producing gradient frames at a fixed rate
pub struct SyntheticCamera {
    frames: u64,
    fps: u32,
    rotation_degrees: u32,
    released: Arc<AtomicU64>,
}

impl SyntheticCamera {
    pub fn new(frames: u64, fps: u32) -> Result<Self, VisionError> {
        if fps == 0 || fps > 240 {
            return Err(VisionError::Config(format!("Frame rate {} out of range (1-240)", fps)));
        }
        Ok(Self {
            frames,
            fps,
            rotation_degrees: 0,
            released: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn with_rotation(mut self, rotation_degrees: u32) -> Self {
        self.rotation_degrees = rotation_degrees;
        self
    }

    /// Frames handed back to the camera so far
    pub fn released(&self) -> u64 {
        self.released.load(Ordering::Relaxed)
    }
}

impl CameraProvider for SyntheticCamera {
    fn has_camera(&self, _lens_facing: LensFacing) -> bool {
        true
    }

    fn open(
        &self,
        selector: &CameraSelector,
        request: &StreamRequest,
    ) -> Result<CameraStreams, VisionError> {
        let (frame_tx, frame_rx) = mpsc::channel(2);
        let (preview_tx, preview_rx) = mpsc::channel(2);

        let resolution = request.target_resolution;
        let interval = Duration::from_secs_f64(1.0 / self.fps as f64);
        let total = self.frames;
        let rotation_degrees = self.rotation_degrees;
        let released = self.released.clone();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            for sequence in 0..total {
                ticker.tick().await;

                let data = Bytes::from(gradient(resolution, sequence));
                let _ = preview_tx.try_send(PreviewFrame {
                    sequence,
                    width: resolution.width(),
                    height: resolution.height(),
                    rotation_degrees,
                    data: data.clone(),
                });

                let released = released.clone();
                let frame = Frame::new(
                    sequence,
                    Some(FrameBuffer::new(
                        resolution.width(),
                        resolution.height(),
                        PixelFormat::Rgb8,
                        data,
                    )),
                    rotation_degrees,
                )
                .with_release(move |_| {
                    released.fetch_add(1, Ordering::Relaxed);
                });

                if frame_tx.send(Ok(frame)).await.is_err() {
                    debug!("Synthetic camera closed after {} frames", sequence);
                    return;
                }
            }
            info!("Synthetic camera finished {} frames", total);
        });

        info!(
            "Opened synthetic {:?} camera at {} ({} fps)",
            selector.lens_facing, resolution, self.fps
        );
        Ok(CameraStreams {
            analysis: Box::new(frame_rx),
            preview: Box::new(preview_rx),
        })
    }
}

fn gradient(resolution: Resolution, sequence: u64) -> Vec<u8> {
    let (width, height) = (resolution.width() as usize, resolution.height() as usize);
    let shift = (sequence % 256) as usize;
    let mut data = Vec::with_capacity(width * height * 3);
    for y in 0..height {
        for x in 0..width {
            data.push(((x + shift) % 256) as u8);
            data.push(((y + shift) % 256) as u8);
            data.push(((x + y) % 256) as u8);
        }
    }
    data
}

/// Detector with random latency, labels and failures
pub struct SyntheticDetector {
    mean_latency: Duration,
    failure_rate: f64,
}

impl SyntheticDetector {
    pub fn new(mean_latency: Duration, failure_rate: f64) -> Result<Self, VisionError> {
        if !(0.0..=1.0).contains(&failure_rate) {
            return Err(VisionError::Config(format!(
                "Failure rate {} must be between 0 and 1",
                failure_rate
            )));
        }
        Ok(Self {
            mean_latency,
            failure_rate,
        })
    }
}

#[async_trait]
impl ObjectDetector for SyntheticDetector {
    async fn detect(
        &self,
        input: &DetectorInput<'_>,
        options: &DetectorOptions,
    ) -> Result<DetectionResult, VisionError> {
        let (latency, fail, objects) = {
            let mut rng = rand::thread_rng();
            let latency = self.mean_latency.mul_f64(rng.gen_range(0.5..1.5));
            let fail = rng.gen_bool(self.failure_rate);

            let upright = input.to_upright();
            let (width, height) = (upright.width() as f32, upright.height() as f32);
            let count = if options.multiple_objects { rng.gen_range(0..=3) } else { 1 };

            let objects: Vec<DetectedObject> = (0..count)
                .map(|_| {
                    let class_id = rng.gen_range(0..CATALOGUE.len());
                    let label = if options.classification && rng.gen_bool(0.8) {
                        Some(CATALOGUE[class_id])
                    } else {
                        None
                    };
                    DetectedObject::new(class_id as u32, label)
                        .with_confidence(rng.gen_range(0.5..1.0))
                        .with_bbox((
                            rng.gen_range(0.0..width / 2.0),
                            rng.gen_range(0.0..height / 2.0),
                            width / 4.0,
                            height / 4.0,
                        ))
                })
                .collect();

            (latency, fail, objects)
        };

        tokio::time::sleep(latency).await;

        if fail {
            return Err(VisionError::Detection(format!(
                "synthetic failure on frame {}",
                input.sequence()
            )));
        }
        Ok(objects.into())
    }
}

/// Preview target that only counts what it is shown
#[derive(Default)]
pub struct ConsolePreview {
    presented: AtomicU64,
}

impl ConsolePreview {
    pub fn presented(&self) -> u64 {
        self.presented.load(Ordering::Relaxed)
    }
}

impl PreviewTarget for ConsolePreview {
    fn attach(&self, resolution: Resolution) -> Result<(), VisionError> {
        info!("Preview attached at {}", resolution);
        Ok(())
    }

    fn present(&self, _frame: PreviewFrame) {
        self.presented.fetch_add(1, Ordering::Relaxed);
    }

    fn detach(&self) {
        info!("Preview detached after {} frames", self.presented());
    }
}
