use anyhow::{Context, Result, bail};
use image::RgbaImage;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

use crate::detection::preprocessing::{FramePreprocessor, SensorFacing};
use crate::detection::{DetectionSummary, FrameDetector};

/// The presentation context's single entry point. Calls must not block:
/// the text is handed over by value and delivered asynchronously.
pub trait StatusSink: Send + Sync {
    fn set_status(&self, text: String);
}

impl StatusSink for std::sync::mpsc::Sender<String> {
    fn set_status(&self, text: String) {
        if self.send(text).is_err() {
            debug!("Status receiver is gone; dropping update");
        }
    }
}

impl StatusSink for tokio::sync::mpsc::UnboundedSender<String> {
    fn set_status(&self, text: String) {
        if self.send(text).is_err() {
            debug!("Status receiver is gone; dropping update");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    /// Raw frame dimensions of the running session.
    Active { width: u32, height: u32 },
    Stopped,
}

/// Result of one frame: the annotated, oriented frame to display and the
/// summary already sent to the presentation context.
pub struct FrameOutput<'a> {
    pub frame: &'a RgbaImage,
    pub summary: DetectionSummary,
}

/// Drives frames through preprocessing, one detector and status publication.
///
/// Frames are processed one at a time through `&mut self`, so the reusable
/// buffers need no locking.
pub struct PipelineController<D: FrameDetector> {
    preprocessor: FramePreprocessor,
    detector: D,
    status: Arc<dyn StatusSink>,
    /// Directory receiving per-frame debug images, when enabled.
    debug_dir: Option<PathBuf>,
    state: SessionState,
    frames_processed: u64,
}

impl<D: FrameDetector> PipelineController<D> {
    pub fn new(detector: D, facing: SensorFacing, status: Arc<dyn StatusSink>) -> Self {
        Self {
            preprocessor: FramePreprocessor::new(facing),
            detector,
            status,
            debug_dir: None,
            state: SessionState::Idle,
            frames_processed: 0,
        }
    }

    /// Enable debug mode with output directory
    /// The directory must be empty or non-existent
    pub fn with_debug(mut self, output_dir: PathBuf) -> Result<Self> {
        if output_dir.exists() {
            let entries = std::fs::read_dir(&output_dir)?;
            if entries.count() > 0 {
                bail!("Debug directory is not empty: {}", output_dir.display());
            }
        } else {
            std::fs::create_dir_all(&output_dir)?;
        }

        self.debug_dir = Some(output_dir);
        Ok(self)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn detector(&self) -> &D {
        &self.detector
    }

    pub fn frames_processed(&self) -> u64 {
        self.frames_processed
    }

    /// Oriented buffer dimensions currently allocated.
    pub fn buffer_dimensions(&self) -> (u32, u32) {
        self.preprocessor.buffer_dimensions()
    }

    /// Begin a session for raw frames of `width` x `height`.
    pub fn start(&mut self, width: u32, height: u32) -> Result<()> {
        if let SessionState::Active { .. } = self.state {
            bail!("Session already active");
        }
        if width == 0 || height == 0 {
            bail!("Invalid frame size {}x{}", width, height);
        }

        debug!("{}: session started at {}x{}", self.detector.name(), width, height);
        self.preprocessor.allocate(width, height);
        self.state = SessionState::Active { width, height };
        self.frames_processed = 0;
        Ok(())
    }

    /// Process one frame to completion and publish its summary.
    pub fn process_frame(&mut self, frame: &RgbaImage) -> Result<FrameOutput<'_>> {
        let SessionState::Active { width, height } = self.state else {
            bail!("Cannot process frames while {:?}", self.state);
        };
        if frame.width() == 0 || frame.height() == 0 {
            bail!("Empty frame");
        }
        if frame.dimensions() != (width, height) {
            debug!(
                "Frame size changed from {}x{} to {}x{}",
                width,
                height,
                frame.width(),
                frame.height()
            );
            self.state = SessionState::Active {
                width: frame.width(),
                height: frame.height(),
            };
        }

        let enhancement = self.detector.enhancement();
        let prepared = self.preprocessor.prepare(frame, enhancement)?;
        let summary = self.detector.detect(prepared.gray, &mut *prepared.oriented)?;
        self.frames_processed += 1;

        if let Some(dir) = &self.debug_dir {
            save_debug_frames(
                dir,
                self.frames_processed,
                prepared.gray,
                prepared.oriented,
            )?;
        }

        let text = summary.status_text();
        debug!("Frame {}: {}", self.frames_processed, text);
        self.status.set_status(text);

        Ok(FrameOutput {
            frame: prepared.oriented,
            summary,
        })
    }

    /// End the session and release the frame buffers.
    pub fn stop(&mut self) {
        if self.state != SessionState::Stopped {
            debug!(
                "{}: session stopped after {} frames",
                self.detector.name(),
                self.frames_processed
            );
        }
        self.preprocessor.release();
        self.state = SessionState::Stopped;
    }
}

fn save_debug_frames(dir: &Path, index: u64, gray: &image::GrayImage, annotated: &RgbaImage) -> Result<()> {
    let gray_path = dir.join(format!("{:04}_gray.png", index));
    gray.save(&gray_path)
        .with_context(|| format!("Failed to save debug image {:?}", gray_path))?;

    let annotated_path = dir.join(format!("{:04}_annotated.png", index));
    annotated
        .save(&annotated_path)
        .with_context(|| format!("Failed to save debug image {:?}", annotated_path))?;

    Ok(())
}
