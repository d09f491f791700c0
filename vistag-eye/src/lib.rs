//! vistag-eye: live object tagging for a camera feed
//!
//! Pulls frames from a camera under keep-only-latest backpressure, runs each
//! one through an asynchronous object detector and publishes a text summary
//! of the latest completed detection for observers.
//!
//! The camera, the detector and the preview surface are collaborators
//! supplied by the host through the traits in [`camera`], [`models`] and
//! [`session`].

pub mod camera;
pub mod config;
pub mod error;
pub mod frame;
pub mod lifecycle;
pub mod models;
pub mod processing;
pub mod session;
pub mod state;

pub use camera::{
    CameraProvider, CameraSelector, CameraStreams, FrameConsumer, FrameSource, FrameSourceStats,
    FrameStream, PreviewStream, StreamRequest,
};
pub use config::{BackpressureStrategy, LensFacing, Resolution, VisionConfig};
pub use error::VisionError;
pub use frame::{Frame, FrameBuffer, PixelFormat, PreviewFrame};
pub use lifecycle::{LifecycleOwner, LifecycleState};
pub use models::{
    DetectedObject, DetectionOutcome, DetectionResult, DetectorInput, DetectorMode, DetectorOptions,
    ObjectDetector, PixelView,
};
pub use processing::{DetectionPipeline, PipelineStats};
pub use session::{PreviewTarget, SessionBinder, SessionHandle};
pub use state::{render_summary, DetectionStateStore, OutcomeSink};
