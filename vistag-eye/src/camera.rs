//! Camera streams and the keep-only-latest frame source

use crate::config::{BackpressureStrategy, LensFacing, Resolution};
use crate::error::VisionError;
use crate::frame::{Frame, PreviewFrame};
use async_trait::async_trait;
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Receives frames from a [`FrameSource`].
///
/// Calls are serialized on the source's delivery thread. Implementations
/// should hand the frame off quickly; while `on_frame` runs, newer frames
/// replace each other in the source's single pending slot.
pub trait FrameConsumer: Send + Sync {
    fn on_frame(&self, frame: Frame);
}

/// Analysis frames coming off the camera
#[async_trait]
pub trait FrameStream: Send {
    /// `None` ends the stream, `Some(Err(_))` means no frame was available
    async fn next_frame(&mut self) -> Option<Result<Frame, VisionError>>;
}

/// Preview frames coming off the camera
#[async_trait]
pub trait PreviewStream: Send {
    async fn next_preview(&mut self) -> Option<PreviewFrame>;
}

#[async_trait]
impl FrameStream for mpsc::Receiver<Result<Frame, VisionError>> {
    async fn next_frame(&mut self) -> Option<Result<Frame, VisionError>> {
        self.recv().await
    }
}

#[async_trait]
impl PreviewStream for mpsc::Receiver<PreviewFrame> {
    async fn next_preview(&mut self) -> Option<PreviewFrame> {
        self.recv().await
    }
}

/// Chooses the physical camera
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CameraSelector {
    pub lens_facing: LensFacing,
}

/// Analysis stream parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamRequest {
    pub target_resolution: Resolution,
    pub backpressure: BackpressureStrategy,
}

impl Default for StreamRequest {
    fn default() -> Self {
        Self {
            target_resolution: Resolution::default(),
            backpressure: BackpressureStrategy::KeepOnlyLatest,
        }
    }
}

/// Streams produced by opening a camera
pub struct CameraStreams {
    pub analysis: Box<dyn FrameStream>,
    pub preview: Box<dyn PreviewStream>,
}

/// Camera device access supplied by the host
pub trait CameraProvider: Send + Sync {
    fn has_camera(&self, lens_facing: LensFacing) -> bool;

    /// Open the selected camera. Dropping the returned streams closes it.
    fn open(
        &self,
        selector: &CameraSelector,
        request: &StreamRequest,
    ) -> Result<CameraStreams, VisionError>;
}

/// Counters exposed by [`FrameSource::stats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameSourceStats {
    pub acquired: u64,
    pub delivered: u64,
    pub dropped: u64,
    pub gaps: u64,
}

#[derive(Debug, Default)]
struct Counters {
    acquired: AtomicU64,
    delivered: AtomicU64,
    dropped: AtomicU64,
    gaps: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> FrameSourceStats {
        FrameSourceStats {
            acquired: self.acquired.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            gaps: self.gaps.load(Ordering::Relaxed),
        }
    }
}

struct MailboxState {
    pending: Option<Frame>,
    closed: bool,
}

/// Single-slot hand-off between acquisition and delivery
struct Mailbox {
    state: Mutex<MailboxState>,
    ready: Condvar,
    /// Held for reading around every consumer call; `false` once stopped
    gate: RwLock<bool>,
}

impl Mailbox {
    fn new() -> Self {
        Self {
            state: Mutex::new(MailboxState {
                pending: None,
                closed: false,
            }),
            ready: Condvar::new(),
            gate: RwLock::new(true),
        }
    }

    /// Put `frame` in the slot. Returns the frame it displaced, or `frame`
    /// itself if the mailbox is closed.
    fn offer(&self, frame: Frame) -> Option<Frame> {
        let displaced = {
            let mut state = self.state.lock();
            if state.closed {
                return Some(frame);
            }
            state.pending.replace(frame)
        };
        self.ready.notify_one();
        displaced
    }

    /// Block until a frame is pending; `None` once closed
    fn take(&self) -> Option<Frame> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return None;
            }
            if let Some(frame) = state.pending.take() {
                return Some(frame);
            }
            self.ready.wait(&mut state);
        }
    }

    fn close(&self) -> Option<Frame> {
        let pending = {
            let mut state = self.state.lock();
            state.closed = true;
            state.pending.take()
        };
        self.ready.notify_all();
        pending
    }
}

struct RunningStream {
    mailbox: Arc<Mailbox>,
    acquisition: tokio::task::JoinHandle<()>,
    delivery: thread::JoinHandle<()>,
}

/// Frame source delivering camera frames to one consumer under
/// keep-only-latest backpressure.
///
/// Acquisition runs as a tokio task, delivery on a dedicated thread. The
/// consumer never has more than one frame waiting for it; a frame that is
/// still waiting when a newer one arrives is released and counted as dropped.
pub struct FrameSource {
    request: RwLock<StreamRequest>,
    consumer: RwLock<Option<Arc<dyn FrameConsumer>>>,
    running: Mutex<Option<RunningStream>>,
    counters: Arc<Counters>,
}

impl FrameSource {
    pub fn new() -> Self {
        Self {
            request: RwLock::new(StreamRequest::default()),
            consumer: RwLock::new(None),
            running: Mutex::new(None),
            counters: Arc::new(Counters::default()),
        }
    }

    /// Set the target resolution and backpressure policy
    pub fn configure(
        &self,
        target_resolution: Resolution,
        backpressure: BackpressureStrategy,
    ) -> Result<(), VisionError> {
        if self.is_running() {
            return Err(VisionError::Camera(
                "Cannot reconfigure a running frame source".to_string(),
            ));
        }

        target_resolution.validate()?;

        if backpressure != BackpressureStrategy::KeepOnlyLatest {
            return Err(VisionError::Config(format!(
                "Backpressure strategy {:?} is not supported",
                backpressure
            )));
        }

        *self.request.write() = StreamRequest {
            target_resolution,
            backpressure,
        };
        Ok(())
    }

    /// Register the consumer that receives every delivered frame
    pub fn set_consumer(&self, consumer: Arc<dyn FrameConsumer>) -> Result<(), VisionError> {
        if self.is_running() {
            return Err(VisionError::Camera(
                "Cannot replace the consumer of a running frame source".to_string(),
            ));
        }

        *self.consumer.write() = Some(consumer);
        Ok(())
    }

    pub fn request(&self) -> StreamRequest {
        *self.request.read()
    }

    /// Start pulling frames from `stream`. Must be called inside a tokio runtime.
    pub fn start(&self, stream: Box<dyn FrameStream>) -> Result<(), VisionError> {
        let mut running = self.running.lock();
        if running.is_some() {
            return Err(VisionError::Camera("Frame source already running".to_string()));
        }

        let consumer = self
            .consumer
            .read()
            .clone()
            .ok_or_else(|| VisionError::Camera("No frame consumer registered".to_string()))?;

        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            VisionError::Camera("Frame source must be started inside a tokio runtime".to_string())
        })?;

        let mailbox = Arc::new(Mailbox::new());

        let delivery = {
            let mailbox = mailbox.clone();
            let counters = self.counters.clone();
            thread::Builder::new()
                .name("vistag-frame-delivery".to_string())
                .spawn(move || delivery_loop(mailbox, consumer, counters))?
        };

        let acquisition =
            runtime.spawn(acquisition_loop(stream, mailbox.clone(), self.counters.clone()));

        *running = Some(RunningStream {
            mailbox,
            acquisition,
            delivery,
        });

        info!(
            "Frame source started at {} (keep only latest)",
            self.request.read().target_resolution
        );
        Ok(())
    }

    /// Stop delivering frames.
    ///
    /// Once this returns the consumer is not called again for this run. A
    /// frame still waiting for delivery is released.
    pub fn stop(&self) {
        let stream = match self.running.lock().take() {
            Some(stream) => stream,
            None => return,
        };

        stream.acquisition.abort();

        let on_delivery_thread = stream.delivery.thread().id() == thread::current().id();
        if !on_delivery_thread {
            *stream.mailbox.gate.write() = false;
        }

        if let Some(pending) = stream.mailbox.close() {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            drop(pending);
        }

        if !on_delivery_thread && stream.delivery.join().is_err() {
            warn!("Frame delivery thread panicked");
        }

        info!("Frame source stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    pub fn stats(&self) -> FrameSourceStats {
        self.counters.snapshot()
    }
}

impl Default for FrameSource {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn acquisition_loop(
    mut stream: Box<dyn FrameStream>,
    mailbox: Arc<Mailbox>,
    counters: Arc<Counters>,
) {
    while let Some(item) = stream.next_frame().await {
        match item {
            Ok(frame) => {
                counters.acquired.fetch_add(1, Ordering::Relaxed);
                if let Some(displaced) = mailbox.offer(frame) {
                    counters.dropped.fetch_add(1, Ordering::Relaxed);
                    debug!("Dropping frame {} in favour of a newer one", displaced.sequence());
                }
            }
            Err(e) => {
                counters.gaps.fetch_add(1, Ordering::Relaxed);
                debug!("No frame available: {}", e);
            }
        }
    }

    info!("Camera frame stream ended");
}

fn delivery_loop(mailbox: Arc<Mailbox>, consumer: Arc<dyn FrameConsumer>, counters: Arc<Counters>) {
    while let Some(frame) = mailbox.take() {
        let open = mailbox.gate.read();
        if !*open {
            counters.dropped.fetch_add(1, Ordering::Relaxed);
            break;
        }
        counters.delivered.fetch_add(1, Ordering::Relaxed);
        consumer.on_frame(frame);
    }

    debug!("Frame delivery stopped");
}
