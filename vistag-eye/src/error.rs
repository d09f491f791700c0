//! Error types for vistag-eye

use thiserror::Error;
use vistag_core::Error as CoreError;

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("Camera error: {0}")]
    Camera(String),

    #[error("Conversion error: {0}")]
    Conversion(String),

    #[error("Detection error: {0}")]
    Detection(String),

    #[error("Binding error: {0}")]
    Binding(String),

    #[error("Lifecycle error: {0}")]
    Lifecycle(String),

    #[error("Preview error: {0}")]
    Preview(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),
}

impl From<VisionError> for CoreError {
    fn from(err: VisionError) -> Self {
        match err {
            VisionError::Core(inner) => inner,
            VisionError::Config(msg) => CoreError::Configuration(msg),
            other => CoreError::Pipeline(format!("Vision error: {}", other)),
        }
    }
}
