//! Colour-like image planes (RGB, normals, flow, semantic classes).

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, Result};
use crate::field::ImageField;

/// Byte layout of one pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    Rgb8,
    Rgba8,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb8 => 3,
            PixelFormat::Rgba8 => 4,
        }
    }
}

/// Bytes per pixel implied by a buffer length, if it divides evenly.
pub(crate) fn bytes_per_pixel(len: usize, width: usize, height: usize) -> Option<usize> {
    let pixels = width.checked_mul(height)?;
    if pixels == 0 || len % pixels != 0 {
        return None;
    }
    Some(len / pixels)
}

/// A decoded image plane, row-major with the top row first.
///
/// The pixel bytes are shared with the received buffer, not copied.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageFrame {
    width: usize,
    height: usize,
    format: PixelFormat,
    data: Bytes,
}

impl ImageFrame {
    /// Interpret `raw` as a `width` x `height` image of 3 or 4 bytes per pixel.
    pub fn decode(field: ImageField, raw: Bytes, width: usize, height: usize) -> Result<Self> {
        let format = match bytes_per_pixel(raw.len(), width, height) {
            Some(3) => PixelFormat::Rgb8,
            Some(4) => PixelFormat::Rgba8,
            _ => {
                return Err(DecodeError::PixelWidth {
                    field,
                    len: raw.len(),
                    width,
                    height,
                })
            }
        };

        Ok(Self {
            width,
            height,
            format,
            data: raw,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Raw pixel bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// All bytes of the pixel at (`row`, `col`), or `None` out of bounds.
    pub fn pixel(&self, row: usize, col: usize) -> Option<&[u8]> {
        if row >= self.height || col >= self.width {
            return None;
        }
        let bpp = self.format.bytes_per_pixel();
        let start = (row * self.width + col) * bpp;
        self.data.get(start..start + bpp)
    }

    /// Colour channels of the pixel at (`row`, `col`), alpha dropped.
    pub fn rgb(&self, row: usize, col: usize) -> Option<[u8; 3]> {
        self.pixel(row, col).map(|p| [p[0], p[1], p[2]])
    }
}

impl std::fmt::Debug for ImageFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImageFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_rgb_and_rgba() {
        let rgb = ImageFrame::decode(ImageField::Rgb, Bytes::from(vec![0u8; 2 * 3 * 3]), 3, 2)
            .unwrap();
        assert_eq!(rgb.format(), PixelFormat::Rgb8);

        let rgba = ImageFrame::decode(ImageField::Rgb, Bytes::from(vec![0u8; 2 * 3 * 4]), 3, 2)
            .unwrap();
        assert_eq!(rgba.format(), PixelFormat::Rgba8);
    }

    #[test]
    fn pixel_addressing_is_row_major_top_first() {
        // 2x2 RGB: top-left red, bottom-right blue.
        let raw = vec![
            255, 0, 0, 0, 0, 0, //
            0, 0, 0, 0, 0, 255,
        ];
        let frame = ImageFrame::decode(ImageField::Rgb, Bytes::from(raw), 2, 2).unwrap();

        assert_eq!(frame.rgb(0, 0), Some([255, 0, 0]));
        assert_eq!(frame.rgb(1, 1), Some([0, 0, 255]));
        assert_eq!(frame.rgb(2, 0), None);
    }

    #[test]
    fn rejects_unsupported_width() {
        let err = ImageFrame::decode(ImageField::Normals, Bytes::from(vec![0u8; 8]), 2, 2)
            .unwrap_err();
        match err {
            DecodeError::PixelWidth { field, len, .. } => {
                assert_eq!(field, ImageField::Normals);
                assert_eq!(len, 8);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn rejects_partial_pixels() {
        assert!(ImageFrame::decode(ImageField::Rgb, Bytes::from(vec![0u8; 13]), 2, 2).is_err());
        assert!(ImageFrame::decode(ImageField::Rgb, Bytes::new(), 0, 0).is_err());
    }
}
