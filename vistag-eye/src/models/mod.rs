//! Detector-facing types: the async detector capability, its input view and
//! its results

pub mod detector;
pub mod input;
pub mod objects;

pub use detector::{DetectorMode, DetectorOptions, ObjectDetector};
pub use input::{DetectorInput, PixelView};
pub use objects::{DetectedObject, DetectionOutcome, DetectionResult, UNKNOWN_LABEL};
