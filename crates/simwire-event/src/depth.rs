//! Depth buffer decoding and unit calibration.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{DecodeError, Result};
use crate::field::ImageField;
use crate::image::bytes_per_pixel;
use crate::noise::DepthNoise;

/// Default near clip plane, in meters.
pub const DEFAULT_NEAR_PLANE: f32 = 0.1;
/// Default far clip plane, in meters.
pub const DEFAULT_FAR_PLANE: f32 = 20.0;

/// Legacy 3-byte depth is a base-256 fixed-point fraction one byte wider
/// than the float encoding expects.
const LEGACY_CORRECTION: f32 = 1.0 / 256.0;

/// Unit system for depth values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DepthFormat {
    /// Fraction of the clip range, in `[0, 1)`.
    Normalized,
    #[default]
    Meters,
    Millimeters,
}

impl DepthFormat {
    /// Size of one clip range in this unit.
    pub fn scale(self, near: f32, far: f32) -> f32 {
        match self {
            DepthFormat::Normalized => 1.0,
            DepthFormat::Meters => far - near,
            DepthFormat::Millimeters => (far - near) * 1000.0,
        }
    }
}

impl std::str::FromStr for DepthFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "normalized" => Ok(DepthFormat::Normalized),
            "meters" => Ok(DepthFormat::Meters),
            "millimeters" => Ok(DepthFormat::Millimeters),
            other => Err(format!("unknown depth format: {other}")),
        }
    }
}

/// Multiplier taking a depth value from `from` units to `to` units.
pub fn multiplier(from: DepthFormat, to: DepthFormat, near: f32, far: f32) -> f32 {
    to.scale(near, far) / from.scale(near, far)
}

/// Convert a single depth value between unit systems.
pub fn convert(value: f32, from: DepthFormat, to: DepthFormat, near: f32, far: f32) -> f32 {
    value * multiplier(from, to, near, far)
}

/// Clip planes plus the unit system decoded depth is delivered in.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DepthCalibration {
    pub near_plane: f32,
    pub far_plane: f32,
    pub format: DepthFormat,
}

impl Default for DepthCalibration {
    fn default() -> Self {
        Self {
            near_plane: DEFAULT_NEAR_PLANE,
            far_plane: DEFAULT_FAR_PLANE,
            format: DepthFormat::default(),
        }
    }
}

impl DepthCalibration {
    /// Validated calibration; `near` must be positive and below `far`.
    pub fn new(near_plane: f32, far_plane: f32, format: DepthFormat) -> Result<Self> {
        let calibration = Self {
            near_plane,
            far_plane,
            format,
        };
        calibration.validate()?;
        Ok(calibration)
    }

    pub fn validate(&self) -> Result<()> {
        let valid = self.near_plane.is_finite()
            && self.far_plane.is_finite()
            && self.near_plane > 0.0
            && self.near_plane < self.far_plane;
        if valid {
            Ok(())
        } else {
            Err(DecodeError::Calibration {
                near: self.near_plane,
                far: self.far_plane,
            })
        }
    }

    /// Same planes, different output unit.
    pub fn with_format(mut self, format: DepthFormat) -> Self {
        self.format = format;
        self
    }

    /// Multiplier from normalized raw values to this calibration's unit.
    pub fn multiplier(&self) -> f32 {
        multiplier(
            DepthFormat::Normalized,
            self.format,
            self.near_plane,
            self.far_plane,
        )
    }
}

/// A calibrated depth matrix, row-major with the top row first.
#[derive(Clone, PartialEq)]
pub struct DepthFrame {
    width: usize,
    height: usize,
    format: DepthFormat,
    values: Vec<f32>,
}

impl DepthFrame {
    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    /// Unit the values are expressed in.
    pub fn format(&self) -> DepthFormat {
        self.format
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub(crate) fn values_mut(&mut self) -> &mut [f32] {
        &mut self.values
    }

    /// Depth at (`row`, `col`), or `None` out of bounds.
    pub fn get(&self, row: usize, col: usize) -> Option<f32> {
        if row >= self.height || col >= self.width {
            return None;
        }
        self.values.get(row * self.width + col).copied()
    }

    /// A copy of this frame expressed in another unit.
    pub fn converted(&self, to: DepthFormat, near: f32, far: f32) -> DepthFrame {
        let factor = multiplier(self.format, to, near, far);
        let values = if factor == 1.0 {
            self.values.clone()
        } else {
            self.values.iter().map(|v| v * factor).collect()
        };
        DepthFrame {
            width: self.width,
            height: self.height,
            format: to,
            values,
        }
    }
}

impl std::fmt::Debug for DepthFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DepthFrame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .finish_non_exhaustive()
    }
}

/// Decode a raw depth buffer into calibrated values.
///
/// Accepts 4 bytes per pixel (little-endian `f32`, already normalized) or the
/// legacy 3 bytes per pixel fixed-point fraction. `raw` is only read; scaling
/// happens on the decoded copy and is skipped when the multiplier is 1.
pub fn decode_depth(
    raw: &[u8],
    width: usize,
    height: usize,
    calibration: &DepthCalibration,
    noise: Option<&DepthNoise>,
) -> Result<DepthFrame> {
    calibration.validate()?;

    let mut values: Vec<f32> = match bytes_per_pixel(raw.len(), width, height) {
        Some(4) => raw
            .chunks_exact(4)
            .map(|px| f32::from_le_bytes([px[0], px[1], px[2], px[3]]))
            .collect(),
        Some(3) => raw
            .chunks_exact(3)
            .map(|px| {
                let fraction =
                    px[0] as f32 + px[1] as f32 / 256.0 + px[2] as f32 / 65536.0;
                fraction * LEGACY_CORRECTION
            })
            .collect(),
        _ => {
            return Err(DecodeError::PixelWidth {
                field: ImageField::Depth,
                len: raw.len(),
                width,
                height,
            })
        }
    };

    let factor = calibration.multiplier();
    if factor != 1.0 {
        for value in &mut values {
            *value *= factor;
        }
    }

    let mut frame = DepthFrame {
        width,
        height,
        format: calibration.format,
        values,
    };

    if let Some(noise) = noise {
        noise.apply(&mut frame)?;
    }

    Ok(frame)
}

/// Calibration plus a per-resolution cache of noise patterns.
///
/// Owned by whoever drives the session; the calibration is refreshed when
/// the simulator reports new clip planes.
#[derive(Debug, Clone, Default)]
pub struct DepthDecoder {
    calibration: DepthCalibration,
    add_noise: bool,
    noise: HashMap<usize, Arc<DepthNoise>>,
}

impl DepthDecoder {
    pub fn new(calibration: DepthCalibration, add_noise: bool) -> Self {
        Self {
            calibration,
            add_noise,
            noise: HashMap::new(),
        }
    }

    pub fn calibration(&self) -> &DepthCalibration {
        &self.calibration
    }

    /// Replace the clip planes, keeping the output unit.
    pub fn set_planes(&mut self, near_plane: f32, far_plane: f32) -> Result<()> {
        let updated = DepthCalibration::new(near_plane, far_plane, self.calibration.format)?;
        debug!(near_plane, far_plane, "depth calibration updated");
        self.calibration = updated;
        Ok(())
    }

    pub fn adds_noise(&self) -> bool {
        self.add_noise
    }

    /// Decode one depth buffer with the current calibration.
    pub fn decode(&mut self, raw: &[u8], width: usize, height: usize) -> Result<DepthFrame> {
        let noise = if !self.add_noise {
            None
        } else if width != height {
            warn!(width, height, "depth noise only applies to square frames; skipping");
            None
        } else {
            Some(Arc::clone(
                self.noise
                    .entry(width)
                    .or_insert_with(|| Arc::new(DepthNoise::for_size(width))),
            ))
        };

        decode_depth(raw, width, height, &self.calibration, noise.as_deref())
    }
}
