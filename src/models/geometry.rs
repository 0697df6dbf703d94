//! Coarse aspect-ratio buckets used to namespace stored videos.

use serde::Serialize;
use std::fmt;

/// Aspect class of a video's first stream.
///
/// Bands match 16:9 and 9:16 within a small tolerance; square, 4:3 and
/// ultrawide frames are `Other`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GeometryClass {
    Landscape,
    Portrait,
    Other,
}

impl GeometryClass {
    /// Classify a `width x height` frame.
    ///
    /// Returns `None` when either side is zero; such reports are treated as
    /// unreadable rather than bucketed.
    pub fn from_dimensions(width: u32, height: u32) -> Option<Self> {
        if width == 0 || height == 0 {
            return None;
        }

        let ratio = f64::from(width) / f64::from(height);
        let class = if ratio > 1.7 && ratio < 1.8 {
            GeometryClass::Landscape
        } else if ratio > 0.55 && ratio < 0.57 {
            GeometryClass::Portrait
        } else {
            GeometryClass::Other
        };
        Some(class)
    }

    /// Key prefix segment for this class.
    pub fn as_str(&self) -> &'static str {
        match self {
            GeometryClass::Landscape => "landscape",
            GeometryClass::Portrait => "portrait",
            GeometryClass::Other => "other",
        }
    }
}

impl fmt::Display for GeometryClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
