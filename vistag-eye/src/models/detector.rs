//! Asynchronous object detection capability

use crate::error::VisionError;
use crate::models::input::DetectorInput;
use crate::models::objects::DetectionResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Latency/accuracy trade-off requested from the detector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectorMode {
    /// Low-latency, one frame at a time
    Stream,
    /// Independent still images
    SingleImage,
}

/// Options sent with every detection request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorOptions {
    pub mode: DetectorMode,
    /// Report every object found, not just the most prominent one
    pub multiple_objects: bool,
    /// Attach coarse category labels to detected objects
    pub classification: bool,
}

impl Default for DetectorOptions {
    fn default() -> Self {
        Self {
            mode: DetectorMode::Stream,
            multiple_objects: true,
            classification: true,
        }
    }
}

/// An object detection model.
///
/// Implementations may take arbitrarily long and may complete out of order
/// relative to other requests; the pipeline never serializes calls.
#[async_trait]
pub trait ObjectDetector: Send + Sync {
    async fn detect(
        &self,
        input: &DetectorInput<'_>,
        options: &DetectorOptions,
    ) -> Result<DetectionResult, VisionError>;
}
