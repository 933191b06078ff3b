use std::io::Cursor;

use image::error::{LimitError, LimitErrorKind};
use image::io::Reader;
use image::ImageError;
use serde::{Deserialize, Serialize};

/// Largest picture, in pixels, that is decoded. Headers are checked first so
/// an oversize image is refused before any pixel buffer is allocated.
pub const MAX_FRAME_PIXELS: u64 = 25_000_000;

/// A capture device the camera platform can open.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceDescriptor {
    pub device_id: String,
    #[serde(default)]
    pub label: String,
}

impl DeviceDescriptor {
    pub fn new(device_id: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            label: label.into(),
        }
    }
}

/// One grayscale picture handed to the decoder: a sampled video frame or an
/// uploaded still image.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    luma: Vec<u8>,
}

impl Frame {
    /// Returns `None` when `luma` does not hold exactly `width * height` pixels.
    pub fn new(width: u32, height: u32, luma: Vec<u8>) -> Option<Self> {
        let expected = (width as usize).checked_mul(height as usize)?;
        (luma.len() == expected).then_some(Self {
            width,
            height,
            luma,
        })
    }

    /// Decodes an encoded picture (PNG, JPEG, ...) into a grayscale frame.
    /// CPU bound; call it from a blocking task.
    pub fn from_image_bytes(bytes: &[u8]) -> Result<Self, ImageError> {
        Self::from_image_bytes_within(bytes, MAX_FRAME_PIXELS)
    }

    pub fn from_image_bytes_within(bytes: &[u8], max_pixels: u64) -> Result<Self, ImageError> {
        let (width, height) = Reader::new(Cursor::new(bytes))
            .with_guessed_format()?
            .into_dimensions()?;
        if u64::from(width) * u64::from(height) > max_pixels {
            return Err(ImageError::Limits(LimitError::from_kind(
                LimitErrorKind::DimensionError,
            )));
        }

        let gray = Reader::new(Cursor::new(bytes))
            .with_guessed_format()?
            .decode()?
            .to_luma8();
        let (width, height) = gray.dimensions();
        Ok(Self {
            width,
            height,
            luma: gray.into_raw(),
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Pixel intensity at `(x, y)`; out-of-range coordinates read as white.
    pub fn pixel(&self, x: u32, y: u32) -> u8 {
        if x >= self.width || y >= self.height {
            return u8::MAX;
        }
        self.luma[y as usize * self.width as usize + x as usize]
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish_non_exhaustive()
    }
}
