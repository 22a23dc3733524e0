use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::StitchError;

/// Target frame size of every normalized clip
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl FromStr for Resolution {
    type Err = StitchError;

    /// Accepts "WIDTHxHEIGHT" and "WIDTH:HEIGHT" with even, positive dimensions
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            StitchError::validation(format!(
                "Invalid resolution '{}': expected WIDTHxHEIGHT or WIDTH:HEIGHT with positive integers",
                s
            ))
        };

        let trimmed = s.trim();
        let (width, height) = trimmed
            .split_once(['x', 'X', ':'])
            .ok_or_else(invalid)?;

        let width: u32 = width.trim().parse().map_err(|_| invalid())?;
        let height: u32 = height.trim().parse().map_err(|_| invalid())?;

        if width == 0 || height == 0 {
            return Err(invalid());
        }
        // yuv420p chroma subsampling needs even frame dimensions
        if width % 2 != 0 || height % 2 != 0 {
            return Err(StitchError::validation(format!(
                "Invalid resolution '{}': width and height must be even",
                s
            )));
        }

        Ok(Self { width, height })
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Scale into the frame keeping the aspect ratio, letterbox the rest, square pixels
pub fn fit_and_pad(resolution: Resolution) -> String {
    let Resolution { width, height } = resolution;
    format!(
        "scale={w}:{h}:force_original_aspect_ratio=decrease:force_divisible_by=2,\
         pad={w}:{h}:(ow-iw)/2:(oh-ih)/2:color=black,\
         setsar=1",
        w = width,
        h = height,
    )
}
