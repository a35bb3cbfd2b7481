use anyhow::{Context, Result};
use image::imageops::{flip_horizontal_in_place, flip_vertical_in_place, rotate90_in};
use image::{GrayImage, Pixel, RgbaImage};
use imageproc::contrast::equalize_histogram_mut;
use imageproc::filter::gaussian_blur_f32;
use tracing::debug;

use super::Enhancement;

/// Which way the sensor faces. Front sensors deliver a mirrored image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SensorFacing {
    #[default]
    Back,
    Front,
}

/// Output of [`FramePreprocessor::prepare`]: the corrected color frame to
/// annotate and its enhanced grayscale derivative.
pub struct PreparedFrame<'a> {
    pub oriented: &'a mut RgbaImage,
    pub gray: &'a GrayImage,
}

/// Orients raw frames and produces detection-ready grayscale images.
///
/// Both buffers are reused across frames and only reallocated when the
/// oriented dimensions change.
pub struct FramePreprocessor {
    facing: SensorFacing,
    oriented: RgbaImage,
    gray: GrayImage,
}

impl FramePreprocessor {
    pub fn new(facing: SensorFacing) -> Self {
        Self {
            facing,
            oriented: RgbaImage::new(0, 0),
            gray: GrayImage::new(0, 0),
        }
    }

    pub fn facing(&self) -> SensorFacing {
        self.facing
    }

    /// Size buffers for raw frames of `width` x `height`.
    pub fn allocate(&mut self, width: u32, height: u32) {
        // Rotation swaps the axes.
        let (w, h) = (height, width);
        if self.oriented.dimensions() != (w, h) {
            debug!("Allocating frame buffers for {}x{} oriented frames", w, h);
            self.oriented = RgbaImage::new(w, h);
            self.gray = GrayImage::new(w, h);
        }
    }

    pub fn release(&mut self) {
        self.oriented = RgbaImage::new(0, 0);
        self.gray = GrayImage::new(0, 0);
    }

    /// Dimensions of the oriented buffers.
    pub fn buffer_dimensions(&self) -> (u32, u32) {
        self.oriented.dimensions()
    }

    pub fn prepare(&mut self, raw: &RgbaImage, enhancement: Enhancement) -> Result<PreparedFrame<'_>> {
        self.allocate(raw.width(), raw.height());

        rotate90_in(raw, &mut self.oriented).context("Failed to rotate frame")?;
        if self.facing == SensorFacing::Front {
            // Rotation leaves the image upside down; the second flip undoes the front-sensor mirror.
            flip_vertical_in_place(&mut self.oriented);
            flip_horizontal_in_place(&mut self.oriented);
        }

        for (dst, src) in self.gray.pixels_mut().zip(self.oriented.pixels()) {
            *dst = src.to_luma();
        }

        match enhancement {
            Enhancement::Equalize => equalize_histogram_mut(&mut self.gray),
            Enhancement::Blur { sigma } => {
                let blurred = gaussian_blur_f32(&self.gray, sigma);
                self.gray.copy_from_slice(blurred.as_raw());
            }
        }

        Ok(PreparedFrame {
            oriented: &mut self.oriented,
            gray: &self.gray,
        })
    }
}
