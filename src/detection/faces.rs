use anyhow::Result;
use image::{GrayImage, RgbaImage};
use tracing::debug;

use super::annotate::{self, FACE_COLOR};
use super::{DetectionSummary, Enhancement, FrameDetector};
use crate::config::CascadeParams;
use crate::loader::{ClassifierSlot, ClassifierState, STATUS_LOADING};

const BOX_THICKNESS: u32 = 3;

pub const STATUS_UNAVAILABLE: &str = "Face classifier unavailable";

/// Cascade face detector. Does nothing until the classifier is ready.
pub struct FaceDetector {
    slot: ClassifierSlot,
    params: CascadeParams,
}

impl FaceDetector {
    pub fn new(slot: ClassifierSlot, params: CascadeParams) -> Self {
        Self { slot, params }
    }

    /// Detect and outline faces; returns the count. Returns 0 without
    /// touching the canvas unless the classifier is ready.
    pub fn detect_faces(&self, gray: &GrayImage, canvas: &mut RgbaImage) -> usize {
        let Some(cascade) = self.slot.handle() else {
            return 0;
        };

        let faces = cascade.detect_multi_scale(gray, &self.params);
        for face in &faces {
            annotate::draw_box(canvas, face, BOX_THICKNESS, FACE_COLOR);
        }
        debug!("{} faces", faces.len());
        faces.len()
    }
}

impl FrameDetector for FaceDetector {
    fn detect(&mut self, gray: &GrayImage, canvas: &mut RgbaImage) -> Result<DetectionSummary> {
        let summary = match self.slot.state() {
            ClassifierState::Ready(_) => DetectionSummary::Faces {
                count: self.detect_faces(gray, canvas),
            },
            ClassifierState::Failed(_) => DetectionSummary::Pending {
                message: STATUS_UNAVAILABLE.to_string(),
            },
            _ => DetectionSummary::Pending {
                message: STATUS_LOADING.to_string(),
            },
        };
        Ok(summary)
    }

    fn enhancement(&self) -> Enhancement {
        Enhancement::Equalize
    }

    fn name(&self) -> &str {
        "Face Counter"
    }
}
