//! Detection results

use crate::error::VisionError;

/// Rendered in place of a missing label
pub const UNKNOWN_LABEL: &str = "unknown";

/// One object reported by the detector
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedObject {
    pub class_id: u32,
    pub class_name: Option<String>,
    pub confidence: f32,
    pub bbox: (f32, f32, f32, f32), // x, y, width, height
}

impl DetectedObject {
    pub fn new(class_id: u32, class_name: Option<&str>) -> Self {
        Self {
            class_id,
            class_name: class_name.map(str::to_string),
            confidence: 0.0,
            bbox: (0.0, 0.0, 0.0, 0.0),
        }
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_bbox(mut self, bbox: (f32, f32, f32, f32)) -> Self {
        self.bbox = bbox;
        self
    }

    /// Label to show, [`UNKNOWN_LABEL`] when the detector gave none
    pub fn display_name(&self) -> &str {
        self.class_name.as_deref().unwrap_or(UNKNOWN_LABEL)
    }
}

/// Ordered objects found in one frame
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectionResult {
    objects: Vec<DetectedObject>,
}

impl DetectionResult {
    pub fn new(objects: Vec<DetectedObject>) -> Self {
        Self { objects }
    }

    pub fn objects(&self) -> &[DetectedObject] {
        &self.objects
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

impl From<Vec<DetectedObject>> for DetectionResult {
    fn from(objects: Vec<DetectedObject>) -> Self {
        Self::new(objects)
    }
}

/// Result of one detection attempt
#[derive(Debug)]
pub enum DetectionOutcome {
    Success(DetectionResult),
    Failure(VisionError),
}

impl DetectionOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, DetectionOutcome::Success(_))
    }
}

impl From<Result<DetectionResult, VisionError>> for DetectionOutcome {
    fn from(result: Result<DetectionResult, VisionError>) -> Self {
        match result {
            Ok(detections) => DetectionOutcome::Success(detections),
            Err(err) => DetectionOutcome::Failure(err),
        }
    }
}
