//! Camera frames and their release contract

use bytes::Bytes;
use std::fmt;
use std::time::Instant;

/// Pixel layout of a frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgb8,
    Rgba8,
    Luma8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            PixelFormat::Rgb8 => 3,
            PixelFormat::Rgba8 => 4,
            PixelFormat::Luma8 => 1,
        }
    }
}

/// Raw image data captured by the camera
#[derive(Debug, Clone)]
pub struct FrameBuffer {
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub data: Bytes,
}

impl FrameBuffer {
    pub fn new(width: u32, height: u32, format: PixelFormat, data: impl Into<Bytes>) -> Self {
        Self {
            width,
            height,
            format,
            data: data.into(),
        }
    }

    /// Byte length the dimensions call for, `None` on overflow
    pub fn expected_len(&self) -> Option<usize> {
        (self.width as usize)
            .checked_mul(self.height as usize)?
            .checked_mul(self.format.bytes_per_pixel())
    }
}

type ReleaseFn = Box<dyn FnOnce(u64) + Send + Sync>;

/// One captured image plus orientation metadata.
///
/// A frame owns a camera resource. The release callback runs exactly once:
/// either through [`Frame::close`] or, if the frame is dropped without being
/// closed (panic, cancelled task, displaced by a newer frame), from `Drop`.
pub struct Frame {
    sequence: u64,
    buffer: Option<FrameBuffer>,
    rotation_degrees: u32,
    timestamp: Instant,
    release: Option<ReleaseFn>,
}

impl Frame {
    /// Create a frame stamped with the current monotonic time
    pub fn new(sequence: u64, buffer: Option<FrameBuffer>, rotation_degrees: u32) -> Self {
        Self {
            sequence,
            buffer,
            rotation_degrees,
            timestamp: Instant::now(),
            release: None,
        }
    }

    /// Attach the callback that frees the underlying camera resource
    pub fn with_release<F>(mut self, release: F) -> Self
    where
        F: FnOnce(u64) + Send + Sync + 'static,
    {
        self.release = Some(Box::new(release));
        self
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Pixel data, `None` when the camera produced no usable image
    pub fn buffer(&self) -> Option<&FrameBuffer> {
        self.buffer.as_ref()
    }

    pub fn rotation_degrees(&self) -> u32 {
        self.rotation_degrees
    }

    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    /// Release the camera resource
    pub fn close(mut self) {
        self.release_now();
    }

    fn release_now(&mut self) {
        if let Some(release) = self.release.take() {
            release(self.sequence);
        }
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        self.release_now();
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("sequence", &self.sequence)
            .field("buffer", &self.buffer.as_ref().map(|b| (b.width, b.height, b.format)))
            .field("rotation_degrees", &self.rotation_degrees)
            .field("released", &self.release.is_none())
            .finish()
    }
}

/// Frame routed to the preview surface
#[derive(Debug, Clone)]
pub struct PreviewFrame {
    pub sequence: u64,
    pub width: u32,
    pub height: u32,
    pub rotation_degrees: u32,
    pub data: Bytes,
}
