//! Integration tests for cascade parsing and multi-scale detection.

mod common;

use common::*;
use framecount::config::CascadeParams;
use framecount::detection::cascade::HaarCascade;

#[test]
fn test_parse_cascade() -> anyhow::Result<()> {
    let cascade = HaarCascade::from_xml(ALWAYS_PASS_CASCADE)?;
    assert_eq!(cascade.window(), (24, 24));
    assert_eq!(cascade.stage_count(), 1);
    Ok(())
}

#[test]
fn test_always_pass_finds_grouped_faces() -> anyhow::Result<()> {
    let cascade = HaarCascade::from_xml(ALWAYS_PASS_CASCADE)?;
    let gray = textured_gray(120, 120);

    let faces = cascade.detect_multi_scale(&gray, &face_params());

    assert!(!faces.is_empty());
    for face in &faces {
        assert!(face.x < 120 && face.y < 120, "{:?}", face);
        assert!(face.width >= 80 && face.height >= 80, "{:?}", face);
    }
    Ok(())
}

#[test]
fn test_flat_windows_are_skipped() -> anyhow::Result<()> {
    // Even a cascade that accepts everything finds nothing without contrast.
    let cascade = HaarCascade::from_xml(ALWAYS_PASS_CASCADE)?;

    assert!(cascade.detect_multi_scale(&gray_frame(200, 200, 128), &face_params()).is_empty());
    assert!(cascade.detect_multi_scale(&gray_frame(200, 200, 0), &face_params()).is_empty());
    Ok(())
}

#[test]
fn test_low_contrast_windows_are_skipped() -> anyhow::Result<()> {
    let cascade = HaarCascade::from_xml(ALWAYS_PASS_CASCADE)?;
    // Alternating 120/124 columns: nonzero variance, deviation of 2.
    let gray = image::GrayImage::from_fn(200, 200, |x, _| image::Luma([if x % 2 == 0 { 120 } else { 124 }]));

    assert!(cascade.detect_multi_scale(&gray, &face_params()).is_empty());
    Ok(())
}

#[test]
fn test_non_growing_scale_factor() -> anyhow::Result<()> {
    let cascade = HaarCascade::from_xml(ALWAYS_PASS_CASCADE)?;
    let gray = textured_gray(120, 120);

    for scale_factor in [1.0, 0.5] {
        let params = CascadeParams {
            scale_factor,
            ..face_params()
        };
        assert!(cascade.detect_multi_scale(&gray, &params).is_empty());
    }
    Ok(())
}

#[test]
fn test_reject_all_finds_nothing() -> anyhow::Result<()> {
    let cascade = HaarCascade::from_xml(REJECT_ALL_CASCADE)?;
    let gray = textured_gray(120, 120);

    assert!(cascade.detect_multi_scale(&gray, &face_params()).is_empty());
    Ok(())
}

#[test]
fn test_min_size_larger_than_frame() -> anyhow::Result<()> {
    let cascade = HaarCascade::from_xml(ALWAYS_PASS_CASCADE)?;
    let gray = textured_gray(120, 120);
    let params = CascadeParams {
        min_size: 200,
        ..face_params()
    };

    assert!(cascade.detect_multi_scale(&gray, &params).is_empty());
    Ok(())
}

#[test]
fn test_frame_smaller_than_window() -> anyhow::Result<()> {
    let cascade = HaarCascade::from_xml(ALWAYS_PASS_CASCADE)?;
    let gray = textured_gray(16, 16);
    let params = CascadeParams {
        min_size: 1,
        ..face_params()
    };

    assert!(cascade.detect_multi_scale(&gray, &params).is_empty());
    Ok(())
}

#[test]
fn test_empty_cascade() {
    let result = HaarCascade::from_xml(EMPTY_CASCADE);
    assert!(matches!(result, Err(LoaderError::EmptyClassifier)), "{:?}", result);
}

#[test]
fn test_malformed_documents() {
    // Not XML at all
    assert!(matches!(
        HaarCascade::from_xml("<opencv_storage><cascade>"),
        Err(LoaderError::Parse(_))
    ));

    // Legacy layout
    let legacy = r#"<?xml version="1.0"?>
<opencv_storage>
<haarcascade_frontalface_default type_id="opencv-haar-classifier">
  <size>24 24</size>
  <stages>
    <_>
      <trees>
        <_>
          <_>
            <feature><rects><_>0 0 12 24 -1.</_></rects><tilted>0</tilted></feature>
            <threshold>0.</threshold>
            <left_val>1.</left_val>
            <right_val>1.</right_val></_></_></trees>
      <stage_threshold>0.</stage_threshold></_></stages></haarcascade_frontalface_default>
</opencv_storage>
"#;
    assert!(matches!(HaarCascade::from_xml(legacy), Err(LoaderError::Parse(_))));

    // Tilted features
    let tilted = ALWAYS_PASS_CASCADE.replace("</rects></_></features>", "</rects>\n      <tilted>1</tilted></_></features>");
    assert_ne!(tilted, ALWAYS_PASS_CASCADE);
    assert!(matches!(HaarCascade::from_xml(&tilted), Err(LoaderError::Parse(_))));

    // Tree node pointing at a feature that does not exist
    let dangling = ALWAYS_PASS_CASCADE.replace("0 -1 0 0.", "0 -1 7 0.");
    assert!(matches!(HaarCascade::from_xml(&dangling), Err(LoaderError::Parse(_))));

    // Other stage types
    let lbp = ALWAYS_PASS_CASCADE.replace("<featureType>HAAR</featureType>", "<featureType>LBP</featureType>");
    assert!(matches!(HaarCascade::from_xml(&lbp), Err(LoaderError::Parse(_))));
}
