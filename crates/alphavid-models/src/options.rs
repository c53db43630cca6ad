//! Conversion options snapshot carried by every task.
//!
//! Options arrive as camelCase JSON from the submission layer. Missing
//! fields fall back to the defaults below, and [`ConvertOptions::check`]
//! enforces the documented ranges before a task is created. Once stored on a
//! task the snapshot is never mutated.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use validator::Validate;

use crate::validation::{ValidationCode, ValidationError};

/// Key color as an RGB triple, written as `#RRGGBB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KeyColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl KeyColor {
    pub const BLACK: KeyColor = KeyColor { r: 0, g: 0, b: 0 };

    pub fn new(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Hex form accepted by the engine's color arguments.
    pub fn to_engine_hex(&self) -> String {
        format!("0x{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }
}

impl Default for KeyColor {
    fn default() -> Self {
        Self::BLACK
    }
}

impl fmt::Display for KeyColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

impl FromStr for KeyColor {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let hex = s
            .trim()
            .strip_prefix('#')
            .ok_or_else(|| "Invalid color format, expected #RRGGBB".to_string())?;

        if hex.len() != 6 || !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err("Invalid color format, expected #RRGGBB".to_string());
        }

        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&hex[range], 16)
                .map_err(|_| "Invalid color format, expected #RRGGBB".to_string())
        };

        Ok(Self {
            r: channel(0..2)?,
            g: channel(2..4)?,
            b: channel(4..6)?,
        })
    }
}

impl Serialize for KeyColor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for KeyColor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Watermark region of interest as fractions (0.0-1.0) of frame width/height.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WatermarkRegion {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

/// Transform parameters for one conversion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema, Validate)]
#[serde(rename_all = "camelCase", default)]
#[validate(schema(function = "validate_dependent_fields"))]
pub struct ConvertOptions {
    /// Key color (`#RRGGBB`)
    #[schemars(with = "String")]
    pub color: KeyColor,

    /// Color tolerance, 0-100
    #[validate(range(min = 0.0, max = 100.0, message = "Tolerance must be between 0 and 100"))]
    pub tolerance: f64,

    /// Edge feathering, 0-10
    #[validate(range(min = 0.0, max = 10.0, message = "Feather must be between 0 and 10"))]
    pub feather: f64,

    /// Multi-stage edge-aware keying
    pub edge_enhancement: bool,

    #[validate(range(
        min = 0.01,
        max = 0.5,
        message = "Edge threshold low must be between 0.01 and 0.5"
    ))]
    pub edge_threshold_low: f64,

    #[validate(range(
        min = 0.1,
        max = 1.0,
        message = "Edge threshold high must be between 0.1 and 1.0"
    ))]
    pub edge_threshold_high: f64,

    #[validate(range(max = 5, message = "Morphology iterations must be between 0 and 5"))]
    pub morphology_iterations: u8,

    /// Inpaint and clear the watermark region before keying
    pub remove_watermark: bool,

    /// Watermark ROI, percentages of frame width/height
    #[serde(rename = "wmX")]
    pub wm_x: f64,
    #[serde(rename = "wmY")]
    pub wm_y: f64,
    #[serde(rename = "wmW")]
    pub wm_w: f64,
    #[serde(rename = "wmH")]
    pub wm_h: f64,
}

impl Default for ConvertOptions {
    fn default() -> Self {
        Self {
            color: KeyColor::BLACK,
            tolerance: 10.0,
            feather: 0.5,
            edge_enhancement: true,
            edge_threshold_low: 0.1,
            edge_threshold_high: 0.4,
            morphology_iterations: 1,
            remove_watermark: true,
            wm_x: 1.2,
            wm_y: 1.2,
            wm_w: 14.0,
            wm_h: 5.5,
        }
    }
}

impl ConvertOptions {
    /// Tolerance mapped to the engine's 0-1 similarity.
    pub fn similarity(&self) -> f64 {
        (self.tolerance / 100.0).clamp(0.0, 1.0)
    }

    /// Feather mapped to the engine's 0-1 blend.
    pub fn blend(&self) -> f64 {
        (self.feather / 10.0).clamp(0.0, 1.0)
    }

    /// ROI as frame fractions, `None` when watermark removal is off.
    pub fn watermark_region(&self) -> Option<WatermarkRegion> {
        self.remove_watermark.then(|| WatermarkRegion {
            x: self.wm_x / 100.0,
            y: self.wm_y / 100.0,
            w: self.wm_w / 100.0,
            h: self.wm_h / 100.0,
        })
    }

    /// Validate every documented range.
    pub fn check(&self) -> Result<(), ValidationError> {
        self.validate()
            .map_err(|errors| ValidationError::new(ValidationCode::InvalidOptions, errors.to_string()))
    }
}

fn rule(code: &'static str, message: &'static str) -> validator::ValidationError {
    let mut err = validator::ValidationError::new(code);
    err.message = Some(Cow::Borrowed(message));
    err
}

fn validate_dependent_fields(opts: &ConvertOptions) -> Result<(), validator::ValidationError> {
    if opts.edge_threshold_high <= opts.edge_threshold_low {
        return Err(rule(
            "edge_thresholds",
            "Edge threshold high must be greater than edge threshold low",
        ));
    }

    // ROI bounds only matter when the region is actually used.
    if opts.remove_watermark {
        for (name, value) in [("wmX", opts.wm_x), ("wmY", opts.wm_y)] {
            if !(0.0..=100.0).contains(&value) {
                let mut err = rule("watermark_region", "Watermark offset must be within 0 to 100");
                err.add_param(Cow::Borrowed("field"), &name);
                return Err(err);
            }
        }
        for (name, value) in [("wmW", opts.wm_w), ("wmH", opts.wm_h)] {
            if !(0.1..=100.0).contains(&value) {
                let mut err = rule("watermark_region", "Watermark size must be within 0.1 to 100");
                err.add_param(Cow::Borrowed("field"), &name);
                return Err(err);
            }
        }
    }

    Ok(())
}
