//! Fit modes and the scale/offset arithmetic behind them

use kiosk_core_interface::{Transform, Viewport};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::KioskError;

/// How content is fitted into the viewport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FitMode {
    /// Whole content visible, aspect kept (smaller ratio)
    #[default]
    Contain,
    /// Viewport fully covered, aspect kept (larger ratio)
    Cover,
    /// Axes scaled independently
    Fill,
    FitWidth,
    FitHeight,
}

impl FitMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FitMode::Contain => "contain",
            FitMode::Cover => "cover",
            FitMode::Fill => "fill",
            FitMode::FitWidth => "fit-width",
            FitMode::FitHeight => "fit-height",
        }
    }
}

impl fmt::Display for FitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FitMode {
    type Err = KioskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "contain" => Ok(FitMode::Contain),
            "cover" => Ok(FitMode::Cover),
            "fill" => Ok(FitMode::Fill),
            "fit-width" => Ok(FitMode::FitWidth),
            "fit-height" => Ok(FitMode::FitHeight),
            _ => Err(KioskError::UnknownFitMode(s.to_string())),
        }
    }
}

/// Scale factors `(x, y)` for content of `width × height` in `viewport`.
///
/// Every mode is clamped to `[min_scale, max_scale]`. Degenerate content
/// sizes map to identity.
pub fn compute_scale(
    mode: FitMode,
    width: f64,
    height: f64,
    viewport: Viewport,
    min_scale: f64,
    max_scale: f64,
) -> (f64, f64) {
    if width <= 0.0 || height <= 0.0 {
        return (1.0, 1.0);
    }
    let clamp = |value: f64| value.clamp(min_scale, max_scale);
    let rx = viewport.width / width;
    let ry = viewport.height / height;

    match mode {
        FitMode::Contain => {
            let s = clamp(rx.min(ry));
            (s, s)
        }
        FitMode::Cover => {
            let s = clamp(rx.max(ry));
            (s, s)
        }
        FitMode::Fill => (clamp(rx), clamp(ry)),
        FitMode::FitWidth => {
            let s = clamp(rx);
            (s, s)
        }
        FitMode::FitHeight => {
            let s = clamp(ry);
            (s, s)
        }
    }
}

/// Transform sized to the content, scaled around `0 0`, optionally centred
pub fn fit_transform(
    width: f64,
    height: f64,
    viewport: Viewport,
    scale: (f64, f64),
    center: bool,
) -> Transform {
    let (scale_x, scale_y) = scale;
    let (offset_x, offset_y) = if center {
        (
            (viewport.width - width * scale_x) / 2.0,
            (viewport.height - height * scale_y) / 2.0,
        )
    } else {
        (0.0, 0.0)
    };

    Transform {
        scale_x,
        scale_y,
        offset_x,
        offset_y,
        width,
        height,
    }
}
