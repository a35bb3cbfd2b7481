//! Integration tests for the pipeline controller.
//!
//! Tests cover:
//! - Session lifecycle (start, process, stop)
//! - Coin and face detectors driven end to end
//! - Status publication and debug output

mod common;

use common::*;
use framecount::detection::annotate::FACE_COLOR;
use framecount::detection::faces::STATUS_UNAVAILABLE;
use framecount::loader::STATUS_LOADING;
use tempfile::TempDir;

fn coin_pipeline() -> (PipelineController<CoinDetector>, std::sync::mpsc::Receiver<String>) {
    let (status, messages) = status_channel();
    let detector = CoinDetector::from_config(&AppConfig::default());
    (PipelineController::new(detector, SensorFacing::Back, status), messages)
}

#[test]
fn test_frames_outside_a_session_are_rejected() -> anyhow::Result<()> {
    let (mut pipeline, _messages) = coin_pipeline();
    let frame = solid_frame(64, 48);

    // 1. Before start
    assert_eq!(pipeline.state(), SessionState::Idle);
    assert!(pipeline.process_frame(&frame).is_err());

    // 2. Invalid sizes and double start
    assert!(pipeline.start(0, 48).is_err());
    pipeline.start(64, 48)?;
    assert!(pipeline.start(64, 48).is_err());
    assert_eq!(pipeline.state(), SessionState::Active { width: 64, height: 48 });
    assert_eq!(pipeline.buffer_dimensions(), (48, 64));

    // 3. After stop
    pipeline.stop();
    assert_eq!(pipeline.state(), SessionState::Stopped);
    assert_eq!(pipeline.buffer_dimensions(), (0, 0));
    assert!(pipeline.process_frame(&frame).is_err());

    // 4. A new session can follow
    pipeline.start(64, 48)?;
    pipeline.process_frame(&frame)?;
    assert_eq!(pipeline.frames_processed(), 1);
    Ok(())
}

#[test]
fn test_blank_frame_reports_zero_total() -> anyhow::Result<()> {
    let (mut pipeline, messages) = coin_pipeline();
    pipeline.start(64, 48)?;

    let output = pipeline.process_frame(&solid_frame(64, 48))?;
    assert_eq!(output.frame.dimensions(), (48, 64));
    assert_eq!(output.summary.count(), 0);
    assert!(output.frame.pixels().all(|p| *p == BACKGROUND));

    assert_eq!(messages.try_recv()?, "Total: 0");
    Ok(())
}

#[test]
fn test_coin_counted_end_to_end() -> anyhow::Result<()> {
    // 1. Raw landscape frame with one disc the size of a new 100 COP coin
    let (mut pipeline, messages) = coin_pipeline();
    let raw = coin_frame(320, 240, (160, 120), 75);
    pipeline.start(320, 240)?;

    // 2. Process
    let output = pipeline.process_frame(&raw)?;
    assert_eq!(output.frame.dimensions(), (240, 320));

    // 3. Check the tally
    let DetectionSummary::Coins { tally, text } = &output.summary else {
        panic!("expected a coin summary, got {:?}", output.summary);
    };
    assert_eq!(tally.count(1), 1, "{}", text);
    assert_eq!(tally.total(), 100.0, "{}", text);
    assert!(text.starts_with("100 COP: 1"), "{}", text);

    // 4. The frame was annotated and the summary published
    assert!(output.frame.pixels().any(|p| *p == framecount::detection::annotate::MATCH_COLOR));
    let published = messages.try_recv()?;
    assert_eq!(published, *text);
    Ok(())
}

#[test]
fn test_frame_size_change_reallocates() -> anyhow::Result<()> {
    let (mut pipeline, _messages) = coin_pipeline();
    pipeline.start(64, 48)?;
    pipeline.process_frame(&solid_frame(64, 48))?;

    let output = pipeline.process_frame(&solid_frame(100, 50))?;
    assert_eq!(output.frame.dimensions(), (50, 100));
    assert_eq!(pipeline.state(), SessionState::Active { width: 100, height: 50 });
    assert_eq!(pipeline.buffer_dimensions(), (50, 100));
    Ok(())
}

#[test]
fn test_faces_without_classifier() -> anyhow::Result<()> {
    // 1. Loader that could not fetch the classifier
    let (slot, _loader, _dir) = failed_slot();
    let (status, messages) = status_channel();
    let detector = FaceDetector::new(slot, face_params());
    let mut pipeline = PipelineController::new(detector, SensorFacing::Front, status);
    pipeline.start(160, 120)?;

    // 2. Frames still flow, unannotated
    let output = pipeline.process_frame(&solid_frame(160, 120))?;
    assert_eq!(
        output.summary,
        DetectionSummary::Pending {
            message: STATUS_UNAVAILABLE.to_string()
        }
    );
    assert_eq!(output.summary.count(), 0);
    assert!(output.frame.pixels().all(|p| *p == BACKGROUND));
    assert_eq!(messages.try_recv()?, STATUS_UNAVAILABLE);
    Ok(())
}

#[test]
fn test_faces_with_classifier() -> anyhow::Result<()> {
    let (slot, _loader, _dir) = loaded_slot(ALWAYS_PASS_CASCADE);
    assert_eq!(slot.phase(), LoaderPhase::Ready);
    let (status, messages) = status_channel();
    let mut pipeline = PipelineController::new(FaceDetector::new(slot, face_params()), SensorFacing::Front, status);
    pipeline.start(160, 120)?;

    // 1. Textured frame: windows have contrast and pass the cascade
    let output = pipeline.process_frame(&textured_frame(160, 120))?;
    let DetectionSummary::Faces { count } = output.summary else {
        panic!("expected a face summary, got {:?}", output.summary);
    };
    assert!(count >= 1);
    assert!(output.frame.pixels().any(|p| *p == FACE_COLOR));
    assert_eq!(messages.try_recv()?, format!("Faces: {}", count));

    // 2. Flat frame: nothing to score, nothing drawn
    let output = pipeline.process_frame(&solid_frame(160, 120))?;
    assert_eq!(output.summary, DetectionSummary::Faces { count: 0 });
    assert!(output.frame.pixels().all(|p| *p == BACKGROUND));
    assert_eq!(messages.try_recv()?, "Faces: 0");
    Ok(())
}

#[test]
fn test_faces_while_classifier_loading() -> anyhow::Result<()> {
    // 1. Loader created but not yet run
    let dir = TempDir::new()?;
    let loader = ClassifierLoader::new(loader_config(dir.path(), UNREACHABLE_URL));
    let slot = loader.slot();
    assert_eq!(slot.phase(), LoaderPhase::Unloaded);

    let (status, messages) = status_channel();
    let mut pipeline = PipelineController::new(FaceDetector::new(slot, face_params()), SensorFacing::Front, status);
    pipeline.start(160, 120)?;

    // 2. Frames flow through unannotated with the loading message
    let output = pipeline.process_frame(&textured_frame(160, 120))?;
    assert_eq!(
        output.summary,
        DetectionSummary::Pending {
            message: STATUS_LOADING.to_string()
        }
    );
    let untouched = pipeline_input_rotated(&textured_frame(160, 120));
    assert!(output.frame.pixels().zip(untouched.pixels()).all(|(a, b)| a == b));
    assert_eq!(messages.try_recv()?, STATUS_LOADING);
    drop(loader);
    Ok(())
}

/// Front-sensor orientation of a raw frame: (x, y) -> (y, W - 1 - x).
fn pipeline_input_rotated(raw: &image::RgbaImage) -> image::RgbaImage {
    let (w, h) = raw.dimensions();
    image::RgbaImage::from_fn(h, w, |x, y| *raw.get_pixel(w - 1 - y, x))
}

#[test]
fn test_debug_output() -> anyhow::Result<()> {
    // 1. A non-empty directory is refused
    let busy = TempDir::new()?;
    std::fs::write(busy.path().join("existing.txt"), "x")?;
    let (pipeline, _messages) = coin_pipeline();
    assert!(pipeline.with_debug(busy.path().to_path_buf()).is_err());

    // 2. A fresh directory receives one pair of images per frame
    let dir = TempDir::new()?;
    let debug_dir = dir.path().join("debug");
    let (pipeline, _messages) = coin_pipeline();
    let mut pipeline = pipeline.with_debug(debug_dir.clone())?;
    pipeline.start(64, 48)?;
    pipeline.process_frame(&solid_frame(64, 48))?;
    pipeline.process_frame(&solid_frame(64, 48))?;

    for name in ["0001_gray.png", "0001_annotated.png", "0002_gray.png", "0002_annotated.png"] {
        assert!(debug_dir.join(name).exists(), "missing {}", name);
    }
    let saved = image::open(debug_dir.join("0001_annotated.png"))?;
    assert_eq!((saved.width(), saved.height()), (48, 64));
    Ok(())
}
