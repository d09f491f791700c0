//! Binding the camera, the frame source and the preview to a lifecycle

use crate::camera::{
    CameraProvider, CameraSelector, FrameConsumer, FrameSource, FrameSourceStats, PreviewStream,
    StreamRequest,
};
use crate::config::{Resolution, VisionConfig};
use crate::error::VisionError;
use crate::frame::PreviewFrame;
use crate::lifecycle::{LifecycleOwner, LifecycleState};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Surface that shows the live camera feed
#[cfg_attr(test, mockall::automock)]
pub trait PreviewTarget: Send + Sync {
    /// Prepare the surface for frames of the given size
    fn attach(&self, resolution: Resolution) -> Result<(), VisionError>;
    fn present(&self, frame: PreviewFrame);
    fn detach(&self);
}

type BindingSlot = Mutex<Option<SessionBinding>>;

/// One camera session: open while the lifecycle is started, closed otherwise
struct CameraSession {
    provider: Arc<dyn CameraProvider>,
    selector: CameraSelector,
    request: StreamRequest,
    frame_source: FrameSource,
    preview: Arc<dyn PreviewTarget>,
    preview_task: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl CameraSession {
    /// Open the camera and start streaming, unless already streaming
    fn resume(&self) -> Result<(), VisionError> {
        let mut preview_task = self.preview_task.lock();
        if self.closed.load(Ordering::Acquire) {
            return Err(VisionError::Binding("Session is closed".to_string()));
        }
        if self.frame_source.is_running() {
            return Ok(());
        }

        let streams = self.provider.open(&self.selector, &self.request)?;
        self.frame_source.start(streams.analysis)?;
        *preview_task = Some(tokio::spawn(route_preview(streams.preview, self.preview.clone())));

        info!(
            "Camera {:?} streaming at {}",
            self.selector.lens_facing, self.request.target_resolution
        );
        Ok(())
    }

    /// Stop streaming and close the camera
    fn pause(&self) {
        let mut preview_task = self.preview_task.lock();
        if let Some(task) = preview_task.take() {
            task.abort();
        }
        if self.frame_source.is_running() {
            self.frame_source.stop();
            debug!("Camera {:?} paused", self.selector.lens_facing);
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.pause();
        self.preview.detach();
    }
}

struct SessionBinding {
    generation: u64,
    camera: Arc<CameraSession>,
    supervisor: JoinHandle<()>,
}

impl SessionBinding {
    fn teardown(self) {
        self.supervisor.abort();
        self.camera.close();
        info!("Session {} unbound", self.generation);
    }
}

/// Binds the configured camera to a host lifecycle.
///
/// At most one binding exists at a time; binding again replaces the previous
/// one. While bound, the camera streams whenever the lifecycle is started and
/// is closed otherwise. Destroying the lifecycle ends the binding.
pub struct SessionBinder {
    config: VisionConfig,
    provider: Arc<dyn CameraProvider>,
    analyzer: Arc<dyn FrameConsumer>,
    slot: Arc<BindingSlot>,
    bind_lock: Mutex<()>,
    generation: AtomicU64,
}

impl SessionBinder {
    pub fn new(
        config: VisionConfig,
        provider: Arc<dyn CameraProvider>,
        analyzer: Arc<dyn FrameConsumer>,
    ) -> Result<Self, VisionError> {
        config.validate()?;
        Ok(Self {
            config,
            provider,
            analyzer,
            slot: Arc::new(Mutex::new(None)),
            bind_lock: Mutex::new(()),
            generation: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &VisionConfig {
        &self.config
    }

    /// Bind the camera to `lifecycle`, showing the feed on `preview`.
    ///
    /// Any existing binding is removed first. On failure nothing stays bound.
    /// Must be called inside a tokio runtime.
    pub fn bind(
        &self,
        lifecycle: &LifecycleOwner,
        preview: Arc<dyn PreviewTarget>,
    ) -> Result<SessionHandle, VisionError> {
        let _serial = self.bind_lock.lock();
        self.unbind();

        match self.try_bind(lifecycle, preview) {
            Ok(handle) => Ok(handle),
            Err(e) => {
                error!("Use case binding failed: {}", e);
                Err(e)
            }
        }
    }

    fn try_bind(
        &self,
        lifecycle: &LifecycleOwner,
        preview: Arc<dyn PreviewTarget>,
    ) -> Result<SessionHandle, VisionError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| VisionError::Binding("Binding requires a tokio runtime".to_string()))?;

        let state = lifecycle.state();
        if state == LifecycleState::Destroyed {
            return Err(VisionError::Binding(format!(
                "Lifecycle '{}' is already destroyed",
                lifecycle.name()
            )));
        }

        let lens_facing = self.config.lens_facing;
        if !self.provider.has_camera(lens_facing) {
            return Err(VisionError::Binding(format!("No {:?} camera available", lens_facing)));
        }

        let frame_source = FrameSource::new();
        frame_source.configure(self.config.resolution, self.config.backpressure)?;
        frame_source.set_consumer(self.analyzer.clone())?;

        preview.attach(self.config.resolution)?;

        let camera = Arc::new(CameraSession {
            provider: self.provider.clone(),
            selector: CameraSelector { lens_facing },
            request: frame_source.request(),
            frame_source,
            preview,
            preview_task: Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        if state.is_active() {
            if let Err(e) = camera.resume() {
                camera.close();
                return Err(e);
            }
        }

        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;

        // the slot stays locked until the binding is stored, so a supervisor
        // that sees the lifecycle end right away still finds it to remove
        let previous = {
            let mut slot = self.slot.lock();
            let supervisor = runtime.spawn(supervise(
                generation,
                lifecycle.subscribe(),
                camera.clone(),
                Arc::downgrade(&self.slot),
            ));
            slot.replace(SessionBinding {
                generation,
                camera,
                supervisor,
            })
        };
        if let Some(previous) = previous {
            warn!("Replacing session {} bound concurrently", previous.generation);
            previous.teardown();
        }

        info!(
            "Session {} bound to lifecycle '{}' ({:?} camera, {})",
            generation,
            lifecycle.name(),
            lens_facing,
            self.config.resolution
        );

        Ok(SessionHandle {
            generation,
            slot: Arc::downgrade(&self.slot),
        })
    }

    /// Remove the current binding, if any
    pub fn unbind(&self) {
        let current = self.slot.lock().take();
        if let Some(binding) = current {
            binding.teardown();
        }
    }

    pub fn is_bound(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Generation of the current binding
    pub fn current_generation(&self) -> Option<u64> {
        self.slot.lock().as_ref().map(|b| b.generation)
    }

    /// Frame source counters for the current binding
    pub fn frame_stats(&self) -> Option<FrameSourceStats> {
        self.slot.lock().as_ref().map(|b| b.camera.frame_source.stats())
    }

    /// Whether the current binding is streaming frames
    pub fn is_streaming(&self) -> bool {
        self.slot
            .lock()
            .as_ref()
            .map(|b| b.camera.frame_source.is_running())
            .unwrap_or(false)
    }
}

impl Drop for SessionBinder {
    fn drop(&mut self) {
        self.unbind();
    }
}

/// Handle to one binding.
///
/// Stays valid after the binder rebinds, but then refers to a binding that
/// no longer exists and [`unbind`](SessionHandle::unbind) does nothing.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    generation: u64,
    slot: Weak<BindingSlot>,
}

impl SessionHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_active(&self) -> bool {
        self.slot
            .upgrade()
            .map(|slot| slot.lock().as_ref().map(|b| b.generation) == Some(self.generation))
            .unwrap_or(false)
    }

    /// Remove this binding. Returns `false` if it was already gone.
    pub fn unbind(&self) -> bool {
        match take_if_current(&self.slot, self.generation) {
            Some(binding) => {
                binding.teardown();
                true
            }
            None => false,
        }
    }
}

fn take_if_current(slot: &Weak<BindingSlot>, generation: u64) -> Option<SessionBinding> {
    let slot = slot.upgrade()?;
    let mut current = slot.lock();
    if current.as_ref().map(|b| b.generation) == Some(generation) {
        current.take()
    } else {
        None
    }
}

async fn supervise(
    generation: u64,
    mut lifecycle: watch::Receiver<LifecycleState>,
    camera: Arc<CameraSession>,
    slot: Weak<BindingSlot>,
) {
    loop {
        let state = *lifecycle.borrow_and_update();
        match state {
            LifecycleState::Started => {
                if let Err(e) = camera.resume() {
                    error!("Session {} failed to start the camera: {}", generation, e);
                }
            }
            LifecycleState::Initialized | LifecycleState::Stopped => camera.pause(),
            LifecycleState::Destroyed => break,
        }

        if lifecycle.changed().await.is_err() {
            debug!("Lifecycle owner for session {} dropped", generation);
            break;
        }
    }

    // the slot may already hold a newer binding; only remove our own
    let ended = take_if_current(&slot, generation).is_some();
    camera.close();
    if ended {
        info!("Session {} ended with its lifecycle", generation);
    }
}

async fn route_preview(mut stream: Box<dyn PreviewStream>, target: Arc<dyn PreviewTarget>) {
    while let Some(frame) = stream.next_preview().await {
        target.present(frame);
    }
    debug!("Preview stream ended");
}
