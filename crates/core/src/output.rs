//! Output parameters for a rendered segment and their validation.
//!
//! Out-of-range values are rejected, never clamped.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/* --------------------------------------------------------------------------
Named constants
-------------------------------------------------------------------------- */

/// Smallest accepted frame width in pixels.
pub const MIN_WIDTH: u32 = 320;

/// Smallest accepted frame height in pixels.
pub const MIN_HEIGHT: u32 = 240;

/// Largest accepted frame width in pixels.
pub const MAX_WIDTH: u32 = 3840;

/// Largest accepted frame height in pixels.
pub const MAX_HEIGHT: u32 = 2160;

pub const MIN_FRAME_RATE: u32 = 1;
pub const MAX_FRAME_RATE: u32 = 120;

pub const DEFAULT_WIDTH: u32 = 1920;
pub const DEFAULT_HEIGHT: u32 = 1080;
pub const DEFAULT_FRAME_RATE: u32 = 30;

/* --------------------------------------------------------------------------
Quality
-------------------------------------------------------------------------- */

/// Render quality tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    Low,
    Medium,
    High,
    Ultra,
}

impl Quality {
    pub const ALL: [Quality; 4] = [Quality::Low, Quality::Medium, Quality::High, Quality::Ultra];

    pub fn as_str(self) -> &'static str {
        match self {
            Quality::Low => "low",
            Quality::Medium => "medium",
            Quality::High => "high",
            Quality::Ultra => "ultra",
        }
    }

    /// Value passed to `manim -q`.
    pub fn manim_flag(self) -> &'static str {
        match self {
            Quality::Low => "l",
            Quality::Medium => "m",
            Quality::High => "h",
            Quality::Ultra => "k",
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Quality {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Quality::ALL
            .into_iter()
            .find(|q| q.as_str() == s)
            .ok_or_else(|| {
                CoreError::Validation(format!(
                    "Unknown quality '{s}'. Valid values: low, medium, high, ultra"
                ))
            })
    }
}

/* --------------------------------------------------------------------------
OutputParams
-------------------------------------------------------------------------- */

/// Resolution, frame rate and quality a job renders with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputParams {
    pub width: u32,
    pub height: u32,
    pub frame_rate: u32,
    pub quality: Quality,
}

impl Default for OutputParams {
    fn default() -> Self {
        Self {
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
            frame_rate: DEFAULT_FRAME_RATE,
            quality: Quality::Ultra,
        }
    }
}

impl OutputParams {
    /// Build parameters from stored column values, validating them again.
    pub fn from_stored(
        width: i64,
        height: i64,
        frame_rate: i64,
        quality: &str,
    ) -> Result<Self, CoreError> {
        let to_u32 = |value: i64, field: &str| {
            u32::try_from(value)
                .map_err(|_| CoreError::Validation(format!("Stored {field} is out of range: {value}")))
        };
        let params = Self {
            width: to_u32(width, "width")?,
            height: to_u32(height, "height")?,
            frame_rate: to_u32(frame_rate, "frame rate")?,
            quality: quality.parse()?,
        };
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        validate_resolution(self.width, self.height)?;
        validate_frame_rate(self.frame_rate)
    }

    /// Resolution in the `W,H` form manim expects for `-r`.
    pub fn manim_resolution(&self) -> String {
        format!("{},{}", self.width, self.height)
    }
}

/* --------------------------------------------------------------------------
Validation functions
-------------------------------------------------------------------------- */

/// Validate that a resolution lies within `[320x240, 3840x2160]`.
pub fn validate_resolution(width: u32, height: u32) -> Result<(), CoreError> {
    if !(MIN_WIDTH..=MAX_WIDTH).contains(&width) || !(MIN_HEIGHT..=MAX_HEIGHT).contains(&height) {
        return Err(CoreError::Validation(format!(
            "Resolution must be between {MIN_WIDTH}x{MIN_HEIGHT} and {MAX_WIDTH}x{MAX_HEIGHT} (got {width}x{height})"
        )));
    }
    Ok(())
}

pub fn validate_frame_rate(frame_rate: u32) -> Result<(), CoreError> {
    if !(MIN_FRAME_RATE..=MAX_FRAME_RATE).contains(&frame_rate) {
        return Err(CoreError::Validation(format!(
            "Frame rate must be between {MIN_FRAME_RATE} and {MAX_FRAME_RATE} (got {frame_rate})"
        )));
    }
    Ok(())
}

/// Parse a `WIDTHxHEIGHT` string such as `1920x1080`.
pub fn parse_resolution(value: &str) -> Result<(u32, u32), CoreError> {
    let invalid = || {
        CoreError::Validation(format!(
            "Resolution must look like WIDTHxHEIGHT (got '{value}')"
        ))
    };
    let (w, h) = value.trim().split_once(['x', 'X']).ok_or_else(invalid)?;
    let width = w.trim().parse().map_err(|_| invalid())?;
    let height = h.trim().parse().map_err(|_| invalid())?;
    validate_resolution(width, height)?;
    Ok((width, height))
}

/* --------------------------------------------------------------------------
Tests
-------------------------------------------------------------------------- */
