//! Shared fakes for vistag-eye integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use vistag_eye::camera::{CameraProvider, CameraSelector, CameraStreams, StreamRequest};
use vistag_eye::{
    DetectedObject, DetectionResult, DetectorInput, DetectorOptions, Frame, FrameBuffer,
    FrameConsumer, LensFacing, ObjectDetector, PixelFormat, PreviewFrame, VisionError,
};

/// Frame with a small RGB image whose release bumps `releases`
pub fn counted_frame(sequence: u64, releases: &Arc<AtomicUsize>) -> Frame {
    let releases = releases.clone();
    Frame::new(
        sequence,
        Some(FrameBuffer::new(4, 4, PixelFormat::Rgb8, vec![128u8; 48])),
        0,
    )
    .with_release(move |_| {
        releases.fetch_add(1, Ordering::SeqCst);
    })
}

/// Frame with no image data whose release bumps `releases`
pub fn empty_frame(sequence: u64, releases: &Arc<AtomicUsize>) -> Frame {
    let releases = releases.clone();
    Frame::new(sequence, None, 0).with_release(move |_| {
        releases.fetch_add(1, Ordering::SeqCst);
    })
}

pub fn preview_frame(sequence: u64) -> PreviewFrame {
    PreviewFrame {
        sequence,
        width: 4,
        height: 4,
        rotation_degrees: 0,
        data: vec![0u8; 48].into(),
    }
}

/// Poll `condition` until it holds or two seconds pass
pub async fn wait_for<F>(mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

pub async fn within<T>(future: impl Future<Output = T>) -> T {
    match tokio::time::timeout(Duration::from_secs(2), future).await {
        Ok(value) => value,
        Err(_) => panic!("timed out"),
    }
}

/// Consumer recording delivered sequence numbers, optionally slow
pub struct RecordingConsumer {
    seen: Mutex<Vec<u64>>,
    delay: Duration,
}

impl RecordingConsumer {
    pub fn new() -> Self {
        Self::slow(Duration::ZERO)
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            seen: Mutex::new(Vec::new()),
            delay,
        }
    }

    pub fn seen(&self) -> Vec<u64> {
        self.seen.lock().clone()
    }
}

impl FrameConsumer for RecordingConsumer {
    fn on_frame(&self, frame: Frame) {
        self.seen.lock().push(frame.sequence());
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        frame.close();
    }
}

/// Senders feeding one opened camera session
#[derive(Clone)]
pub struct CameraFeed {
    pub frames: mpsc::Sender<Result<Frame, VisionError>>,
    pub previews: mpsc::Sender<PreviewFrame>,
}

/// Camera provider backed by channels the test writes into
pub struct TestCamera {
    lens: LensFacing,
    feeds: Mutex<Vec<CameraFeed>>,
    fail_open: AtomicBool,
}

impl TestCamera {
    pub fn new() -> Self {
        Self::with_lens(LensFacing::Back)
    }

    pub fn with_lens(lens: LensFacing) -> Self {
        Self {
            lens,
            feeds: Mutex::new(Vec::new()),
            fail_open: AtomicBool::new(false),
        }
    }

    pub fn fail_open(&self, fail: bool) {
        self.fail_open.store(fail, Ordering::SeqCst);
    }

    pub fn open_count(&self) -> usize {
        self.feeds.lock().len()
    }

    /// Feed of the `index`-th opened session
    pub fn feed(&self, index: usize) -> Option<CameraFeed> {
        self.feeds.lock().get(index).cloned()
    }
}

impl CameraProvider for TestCamera {
    fn has_camera(&self, lens_facing: LensFacing) -> bool {
        lens_facing == self.lens
    }

    fn open(
        &self,
        _selector: &CameraSelector,
        _request: &StreamRequest,
    ) -> Result<CameraStreams, VisionError> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(VisionError::Camera("camera in use".to_string()));
        }

        let (frames, frame_rx) = mpsc::channel(64);
        let (previews, preview_rx) = mpsc::channel(64);
        self.feeds.lock().push(CameraFeed { frames, previews });
        Ok(CameraStreams {
            analysis: Box::new(frame_rx),
            preview: Box::new(preview_rx),
        })
    }
}

/// What the scripted detector does for one frame
#[derive(Clone)]
pub enum Script {
    Detect(Duration, Vec<(u32, Option<&'static str>)>),
    Fail(Duration, &'static str),
    Panic,
}

/// Detector whose behavior is chosen per frame sequence
pub struct ScriptedDetector {
    script: Box<dyn Fn(u64) -> Script + Send + Sync>,
    calls: AtomicUsize,
}

impl ScriptedDetector {
    pub fn new<F>(script: F) -> Self
    where
        F: Fn(u64) -> Script + Send + Sync + 'static,
    {
        Self {
            script: Box::new(script),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectDetector for ScriptedDetector {
    async fn detect(
        &self,
        input: &DetectorInput<'_>,
        _options: &DetectorOptions,
    ) -> Result<DetectionResult, VisionError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match (self.script)(input.sequence()) {
            Script::Detect(delay, objects) => {
                tokio::time::sleep(delay).await;
                Ok(objects
                    .into_iter()
                    .map(|(id, name)| DetectedObject::new(id, name))
                    .collect::<Vec<_>>()
                    .into())
            }
            Script::Fail(delay, reason) => {
                tokio::time::sleep(delay).await;
                Err(VisionError::Detection(reason.to_string()))
            }
            Script::Panic => panic!("detector blew up on frame {}", input.sequence()),
        }
    }
}
