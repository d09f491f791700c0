//! Configuration for vistag-eye

use crate::error::VisionError;
use crate::models::DetectorOptions;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use vistag_core::config::env_override;

/// Text published before the first detection completes
pub const DEFAULT_INITIAL_TEXT: &str = "Detection in progress";

/// Frame size as `(width, height)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution(pub u32, pub u32);

impl Resolution {
    pub fn width(&self) -> u32 {
        self.0
    }

    pub fn height(&self) -> u32 {
        self.1
    }

    /// Validate the resolution is usable for analysis
    pub fn validate(&self) -> Result<(), VisionError> {
        if self.0 == 0 || self.1 == 0 {
            return Err(VisionError::Config("Resolution must be non-zero".to_string()));
        }

        if self.0 > 7680 || self.1 > 4320 {
            return Err(VisionError::Config("Resolution too large (max 8K)".to_string()));
        }

        Ok(())
    }
}

impl Default for Resolution {
    fn default() -> Self {
        Resolution(640, 480)
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.0, self.1)
    }
}

impl FromStr for Resolution {
    type Err = VisionError;

    /// Parses `640x480`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (w, h) = s
            .trim()
            .split_once(|c: char| c == 'x' || c == 'X')
            .ok_or_else(|| VisionError::Config(format!("Invalid resolution '{}'", s)))?;
        let width = w
            .trim()
            .parse()
            .map_err(|_| VisionError::Config(format!("Invalid width in '{}'", s)))?;
        let height = h
            .trim()
            .parse()
            .map_err(|_| VisionError::Config(format!("Invalid height in '{}'", s)))?;
        Ok(Resolution(width, height))
    }
}

/// What the frame source does when the analyzer falls behind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackpressureStrategy {
    /// Drop the pending frame in favour of the newest one
    KeepOnlyLatest,
    /// Queue frames and stall the camera (not supported)
    BlockProducer,
}

impl Default for BackpressureStrategy {
    fn default() -> Self {
        BackpressureStrategy::KeepOnlyLatest
    }
}

/// Which physical camera to open
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LensFacing {
    Back,
    Front,
}

impl Default for LensFacing {
    fn default() -> Self {
        LensFacing::Back
    }
}

impl FromStr for LensFacing {
    type Err = VisionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "back" => Ok(LensFacing::Back),
            "front" => Ok(LensFacing::Front),
            other => Err(VisionError::Config(format!("Unknown lens facing '{}'", other))),
        }
    }
}

/// Vision pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionConfig {
    /// Camera to bind
    pub lens_facing: LensFacing,
    /// Target analysis resolution (a hint for the camera)
    pub resolution: Resolution,
    /// Backpressure policy for the analysis stream
    pub backpressure: BackpressureStrategy,
    /// Published text before the first successful detection
    pub initial_text: String,
    /// Options passed to the detector on every request
    pub detector: DetectorOptions,
}

impl Default for VisionConfig {
    fn default() -> Self {
        Self {
            lens_facing: LensFacing::Back,
            resolution: Resolution::default(),
            backpressure: BackpressureStrategy::KeepOnlyLatest,
            initial_text: DEFAULT_INITIAL_TEXT.to_string(),
            detector: DetectorOptions::default(),
        }
    }
}

impl VisionConfig {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), VisionError> {
        self.resolution.validate()?;

        if self.backpressure != BackpressureStrategy::KeepOnlyLatest {
            return Err(VisionError::Config(
                "Only the keep-only-latest backpressure strategy is supported".to_string(),
            ));
        }

        if self.initial_text.len() > 4096 {
            return Err(VisionError::Config("Initial text too long (max 4096 bytes)".to_string()));
        }

        Ok(())
    }

    /// Apply `VISTAG_RESOLUTION` and `VISTAG_LENS` from the environment
    pub fn apply_env_overrides(&mut self) {
        if let Some(resolution) = env_override::<Resolution>("RESOLUTION") {
            self.resolution = resolution;
        }

        if let Some(lens) = env_override::<LensFacing>("LENS") {
            self.lens_facing = lens;
        }
    }
}
