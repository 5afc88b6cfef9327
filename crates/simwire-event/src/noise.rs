//! Fixed-pattern depth dropout at the frame corners.
//!
//! Real depth sensors lose returns near the corners of their field of view.
//! The pattern is a lookup table measured at [`NATIVE_SIZE`] pixels and
//! rescaled for other resolutions. It is fully deterministic.

use crate::depth::DepthFrame;
use crate::error::{DecodeError, Result};

/// Resolution the profile tables were measured at.
pub const NATIVE_SIZE: usize = 300;

// Zeroed pixels per row, starting at the row nearest the corner and counting
// inward from the nearest vertical edge.
const TOP_LEFT: &[f32] = &[
    38.0, 33.0, 29.0, 26.0, 23.0, 21.0, 19.0, 17.0, 15.0, 13.0, 12.0, 10.0, 9.0, 8.0, 7.0, 6.0,
    5.0, 4.0, 3.0, 3.0, 2.0, 2.0, 1.0, 1.0,
];
const TOP_RIGHT: &[f32] = &[
    35.0, 31.0, 27.0, 24.0, 21.0, 19.0, 17.0, 15.0, 13.0, 12.0, 10.0, 9.0, 8.0, 7.0, 6.0, 5.0,
    4.0, 3.0, 2.0, 2.0, 1.0, 1.0,
];
const BOTTOM_LEFT: &[f32] = &[
    44.0, 39.0, 35.0, 31.0, 28.0, 25.0, 22.0, 20.0, 18.0, 16.0, 14.0, 12.0, 11.0, 9.0, 8.0, 7.0,
    6.0, 5.0, 4.0, 3.0, 3.0, 2.0, 1.0, 1.0, 1.0,
];
const BOTTOM_RIGHT: &[f32] = &[
    41.0, 36.0, 32.0, 29.0, 26.0, 23.0, 21.0, 18.0, 16.0, 14.0, 13.0, 11.0, 10.0, 8.0, 7.0, 6.0,
    5.0, 4.0, 3.0, 2.0, 2.0, 1.0, 1.0,
];

/// One corner of the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Corner {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl Corner {
    pub const ALL: [Corner; 4] = [
        Corner::TopLeft,
        Corner::TopRight,
        Corner::BottomLeft,
        Corner::BottomRight,
    ];

    fn profile(self) -> &'static [f32] {
        match self {
            Corner::TopLeft => TOP_LEFT,
            Corner::TopRight => TOP_RIGHT,
            Corner::BottomLeft => BOTTOM_LEFT,
            Corner::BottomRight => BOTTOM_RIGHT,
        }
    }

    fn is_top(self) -> bool {
        matches!(self, Corner::TopLeft | Corner::TopRight)
    }

    fn is_left(self) -> bool {
        matches!(self, Corner::TopLeft | Corner::BottomLeft)
    }
}

/// Per-row dropout counts for a profile rescaled to `size` pixels.
fn rescale(profile: &[f32], size: usize) -> Vec<usize> {
    if profile.is_empty() || size == 0 {
        return Vec::new();
    }

    let factor = size as f32 / NATIVE_SIZE as f32;
    let last = (profile.len() - 1) as f32;
    let rows = ((profile.len() as f32 * factor).round() as usize).min(size);

    (0..rows)
        .map(|row| {
            let position = ((row as f32 + 0.5) / factor - 0.5).clamp(0.0, last);
            let lower = position.floor() as usize;
            let upper = (lower + 1).min(profile.len() - 1);
            let t = position - lower as f32;
            let value = profile[lower] * (1.0 - t) + profile[upper] * t;
            ((value * factor).round() as usize).min(size)
        })
        .collect()
}

/// Pixel indices to zero for a square frame of one size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepthNoise {
    size: usize,
    corners: [Vec<usize>; 4],
}

impl DepthNoise {
    /// Build the pattern for a `size` x `size` frame.
    pub fn for_size(size: usize) -> Self {
        let corners = Corner::ALL.map(|corner| {
            let mut indices = Vec::new();
            for (offset, count) in rescale(corner.profile(), size).into_iter().enumerate() {
                let row = if corner.is_top() {
                    offset
                } else {
                    size - 1 - offset
                };
                let cols = if corner.is_left() {
                    0..count
                } else {
                    size - count..size
                };
                indices.extend(cols.map(|col| row * size + col));
            }
            indices
        });

        Self { size, corners }
    }

    /// Side length this pattern was built for.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Flat row-major indices zeroed at one corner.
    pub fn corner(&self, corner: Corner) -> &[usize] {
        &self.corners[corner as usize]
    }

    /// Total pixels zeroed across all corners (overlaps counted twice).
    pub fn len(&self) -> usize {
        self.corners.iter().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Zero the pattern's pixels in `frame`.
    pub fn apply(&self, frame: &mut DepthFrame) -> Result<()> {
        if frame.width() != self.size || frame.height() != self.size {
            return Err(DecodeError::NoiseShape {
                expected_width: self.size,
                expected_height: self.size,
                width: frame.width(),
                height: frame.height(),
            });
        }

        let values = frame.values_mut();
        for index in self.corners.iter().flatten() {
            values[*index] = 0.0;
        }
        Ok(())
    }
}
