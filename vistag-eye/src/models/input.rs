//! Detector-ready view over a frame's pixels

use crate::error::VisionError;
use crate::frame::{Frame, PixelFormat};
use image::{imageops, DynamicImage, GenericImageView, ImageBuffer, Luma, Pixel, Rgb, Rgba};

/// Borrowed pixel data, typed by layout
#[derive(Debug)]
pub enum PixelView<'a> {
    Rgb(ImageBuffer<Rgb<u8>, &'a [u8]>),
    Rgba(ImageBuffer<Rgba<u8>, &'a [u8]>),
    Luma(ImageBuffer<Luma<u8>, &'a [u8]>),
}

/// Detector input derived from a [`Frame`].
///
/// Borrows the frame's bytes, so it cannot outlive the frame it came from.
#[derive(Debug)]
pub struct DetectorInput<'a> {
    sequence: u64,
    rotation_degrees: u32,
    pixels: PixelView<'a>,
}

impl<'a> DetectorInput<'a> {
    /// Build a view over the frame's buffer.
    ///
    /// Fails when the frame carries no image, the buffer length does not match
    /// its dimensions, or the rotation is not a multiple of 90 in `0..360`.
    pub fn from_frame(frame: &'a Frame) -> Result<Self, VisionError> {
        let buffer = frame
            .buffer()
            .ok_or_else(|| VisionError::Conversion("Frame has no image data".to_string()))?;

        let rotation_degrees = frame.rotation_degrees();
        if !matches!(rotation_degrees, 0 | 90 | 180 | 270) {
            return Err(VisionError::Conversion(format!(
                "Unsupported rotation {} degrees",
                rotation_degrees
            )));
        }

        if buffer.width == 0 || buffer.height == 0 {
            return Err(VisionError::Conversion("Frame has zero-sized image".to_string()));
        }

        let expected = buffer.expected_len().ok_or_else(|| {
            VisionError::Conversion(format!(
                "Frame size {}x{} overflows",
                buffer.width, buffer.height
            ))
        })?;
        if buffer.data.len() != expected {
            return Err(VisionError::Conversion(format!(
                "Frame buffer holds {} bytes, {}x{} {:?} needs {}",
                buffer.data.len(),
                buffer.width,
                buffer.height,
                buffer.format,
                expected
            )));
        }

        let raw: &'a [u8] = buffer.data.as_ref();
        let mismatch =
            || VisionError::Conversion("Frame buffer does not match its layout".to_string());
        let pixels = match buffer.format {
            PixelFormat::Rgb8 => PixelView::Rgb(
                ImageBuffer::from_raw(buffer.width, buffer.height, raw).ok_or_else(mismatch)?,
            ),
            PixelFormat::Rgba8 => PixelView::Rgba(
                ImageBuffer::from_raw(buffer.width, buffer.height, raw).ok_or_else(mismatch)?,
            ),
            PixelFormat::Luma8 => PixelView::Luma(
                ImageBuffer::from_raw(buffer.width, buffer.height, raw).ok_or_else(mismatch)?,
            ),
        };

        Ok(Self {
            sequence: frame.sequence(),
            rotation_degrees,
            pixels,
        })
    }

    /// Sequence number of the source frame
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Clockwise rotation needed to display the image upright
    pub fn rotation_degrees(&self) -> u32 {
        self.rotation_degrees
    }

    pub fn pixels(&self) -> &PixelView<'a> {
        &self.pixels
    }

    /// Sensor-oriented dimensions
    pub fn dimensions(&self) -> (u32, u32) {
        match &self.pixels {
            PixelView::Rgb(img) => img.dimensions(),
            PixelView::Rgba(img) => img.dimensions(),
            PixelView::Luma(img) => img.dimensions(),
        }
    }

    /// Owned copy of the image with the rotation applied
    pub fn to_upright(&self) -> DynamicImage {
        match &self.pixels {
            PixelView::Rgb(img) => DynamicImage::ImageRgb8(upright(img, self.rotation_degrees)),
            PixelView::Rgba(img) => DynamicImage::ImageRgba8(upright(img, self.rotation_degrees)),
            PixelView::Luma(img) => DynamicImage::ImageLuma8(upright(img, self.rotation_degrees)),
        }
    }
}

fn upright<I>(
    image: &I,
    rotation_degrees: u32,
) -> ImageBuffer<I::Pixel, Vec<<I::Pixel as Pixel>::Subpixel>>
where
    I: GenericImageView,
    I::Pixel: 'static,
{
    match rotation_degrees {
        90 => imageops::rotate90(image),
        180 => imageops::rotate180(image),
        270 => imageops::rotate270(image),
        _ => {
            let (width, height) = image.dimensions();
            ImageBuffer::from_fn(width, height, |x, y| image.get_pixel(x, y))
        }
    }
}
