pub mod annotate;
pub mod cascade;
pub mod coins;
pub mod faces;
pub mod hough;
pub mod preprocessing;

use anyhow::Result;
use image::{GrayImage, RgbaImage};

use crate::models::CoinTally;

/// Enhancement applied to the grayscale derivative before detection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Enhancement {
    /// Histogram equalization; makes the cascade robust to lighting.
    Equalize,
    /// Gaussian blur; suppresses noise that produces spurious circles.
    Blur { sigma: f32 },
}

/// Per-frame result handed to the presentation context.
#[derive(Debug, Clone, PartialEq)]
pub enum DetectionSummary {
    Coins { tally: CoinTally, text: String },
    Faces { count: usize },
    /// Detector is waiting on an external resource.
    Pending { message: String },
}

impl DetectionSummary {
    pub fn status_text(&self) -> String {
        match self {
            DetectionSummary::Coins { text, .. } => text.clone(),
            DetectionSummary::Faces { count } => format!("Faces: {}", count),
            DetectionSummary::Pending { message } => message.clone(),
        }
    }

    /// Number of primitives found in the frame.
    pub fn count(&self) -> usize {
        match self {
            DetectionSummary::Coins { tally, .. } => tally.matched() + tally.unknown(),
            DetectionSummary::Faces { count } => *count,
            DetectionSummary::Pending { .. } => 0,
        }
    }
}

/// A detector the pipeline controller can drive without knowing what it
/// looks for. Consumes the enhanced grayscale frame and draws onto the
/// oriented color frame.
pub trait FrameDetector: Send {
    fn detect(&mut self, gray: &GrayImage, canvas: &mut RgbaImage) -> Result<DetectionSummary>;

    fn enhancement(&self) -> Enhancement;

    /// Human-readable name for this detector (used in logs)
    fn name(&self) -> &str;
}

impl<D: FrameDetector + ?Sized> FrameDetector for Box<D> {
    fn detect(&mut self, gray: &GrayImage, canvas: &mut RgbaImage) -> Result<DetectionSummary> {
        (**self).detect(gray, canvas)
    }

    fn enhancement(&self) -> Enhancement {
        (**self).enhancement()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
