#![allow(dead_code)]

use framecount::config::{CascadeParams, LoaderConfig};
use framecount::{ClassifierLoader, ClassifierSlot, StatusSink};
use image::{Luma, Rgba, RgbaImage};
use imageproc::drawing::draw_filled_circle_mut;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::path::Path;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver};

/// One stage, one stump, leaves that always clear the stage threshold.
pub const ALWAYS_PASS_CASCADE: &str = r#"<?xml version="1.0"?>
<opencv_storage>
<cascade type_id="opencv-cascade-classifier">
  <stageType>BOOST</stageType>
  <featureType>HAAR</featureType>
  <height>24</height>
  <width>24</width>
  <stageNum>1</stageNum>
  <stages>
    <_>
      <maxWeakCount>1</maxWeakCount>
      <stageThreshold>-1.</stageThreshold>
      <weakClassifiers>
        <_>
          <internalNodes>
            0 -1 0 0.</internalNodes>
          <leafValues>
            5.0000000000000000e-01 5.0000000000000000e-01</leafValues></_></weakClassifiers></_></stages>
  <features>
    <_>
      <rects>
        <_>
          0 0 12 24 -1.</_>
        <_>
          12 0 12 24 1.</_></rects></_></features></cascade>
</opencv_storage>
"#;

/// Same layout, but no window can reach the stage threshold.
pub const REJECT_ALL_CASCADE: &str = r#"<?xml version="1.0"?>
<opencv_storage>
<cascade type_id="opencv-cascade-classifier">
  <stageType>BOOST</stageType>
  <featureType>HAAR</featureType>
  <height>24</height>
  <width>24</width>
  <stages>
    <_>
      <stageThreshold>1.</stageThreshold>
      <weakClassifiers>
        <_>
          <internalNodes>0 -1 0 0.</internalNodes>
          <leafValues>0. 0.</leafValues></_></weakClassifiers></_></stages>
  <features>
    <_>
      <rects>
        <_>0 0 12 24 -1.</_>
        <_>12 0 12 24 1.</_></rects></_></features></cascade>
</opencv_storage>
"#;

/// Well-formed cascade document without any stages.
pub const EMPTY_CASCADE: &str = r#"<?xml version="1.0"?>
<opencv_storage>
<cascade type_id="opencv-cascade-classifier">
  <height>24</height>
  <width>24</width>
  <stages></stages>
  <features></features></cascade>
</opencv_storage>
"#;

pub const MARK: Rgba<u8> = Rgba([255, 0, 0, 255]);
pub const BACKGROUND: Rgba<u8> = Rgba([30, 30, 30, 255]);

pub fn solid_frame(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_pixel(width, height, BACKGROUND)
}

/// Dark frame with one bright disc, as a coin would look from above.
pub fn coin_frame(width: u32, height: u32, center: (i32, i32), radius: i32) -> RgbaImage {
    let mut frame = solid_frame(width, height);
    draw_filled_circle_mut(&mut frame, center, radius, Rgba([230, 230, 230, 255]));
    frame
}

pub fn gray_frame(width: u32, height: u32, level: u8) -> image::GrayImage {
    image::GrayImage::from_pixel(width, height, Luma([level]))
}

fn ramp_level(x: u32, y: u32, width: u32, height: u32) -> u8 {
    ((x + y) * 255 / (width + height)) as u8
}

/// Diagonal brightness ramp: every detection window has real contrast.
pub fn textured_gray(width: u32, height: u32) -> image::GrayImage {
    image::GrayImage::from_fn(width, height, |x, y| Luma([ramp_level(x, y, width, height)]))
}

pub fn textured_frame(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        let v = ramp_level(x, y, width, height);
        Rgba([v, v, v, 255])
    })
}

/// Status sink backed by a std channel; the receiver sees every update.
pub fn status_channel() -> (Arc<dyn StatusSink>, Receiver<String>) {
    let (tx, rx) = mpsc::channel::<String>();
    (Arc::new(tx), rx)
}

pub fn loader_config(cache_dir: &Path, url: &str) -> LoaderConfig {
    LoaderConfig {
        url: url.to_string(),
        cache_dir: cache_dir.to_path_buf(),
        connect_timeout_ms: 2_000,
        read_timeout_ms: 2_000,
        ..LoaderConfig::default()
    }
}

/// Nothing listens on the discard port, so fetching from here fails fast.
pub const UNREACHABLE_URL: &str = "http://127.0.0.1:9/cascade.xml";

/// Serve exactly one HTTP response on a local port and return its URL.
pub fn serve_once(status: u16, body: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind test server");
    let addr = listener.local_addr().expect("Test server has no address");

    std::thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                match stream.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => request.extend_from_slice(&buf[..n]),
                }
            }
            let reason = match status {
                200 => "OK",
                404 => "Not Found",
                500 => "Internal Server Error",
                _ => "Status",
            };
            let response = format!(
                "HTTP/1.1 {} {}\r\nContent-Type: application/xml\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status,
                reason,
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes());
        }
    });

    format!("http://{}/haarcascade_frontalface_default.xml", addr)
}

/// Loader whose cache already holds `xml`, acquired once. Keep the returned
/// temp dir alive for as long as the slot is used.
pub fn loaded_slot(xml: &str) -> (ClassifierSlot, ClassifierLoader, tempfile::TempDir) {
    let dir = tempfile::TempDir::new().expect("Failed to create temp directory");
    let config = loader_config(dir.path(), UNREACHABLE_URL);
    std::fs::write(config.artifact_path(), xml).expect("Failed to seed cache");

    let mut loader = ClassifierLoader::new(config);
    let slot = loader.slot();
    let _ = loader.acquire();
    (slot, loader, dir)
}

/// Loader that has already failed.
pub fn failed_slot() -> (ClassifierSlot, ClassifierLoader, tempfile::TempDir) {
    let dir = tempfile::TempDir::new().expect("Failed to create temp directory");
    let mut loader = ClassifierLoader::new(loader_config(dir.path(), UNREACHABLE_URL));
    let slot = loader.slot();
    let _ = loader.acquire();
    (slot, loader, dir)
}

pub fn face_params() -> CascadeParams {
    CascadeParams::default()
}

/// Catalog used by the classification scenarios.
pub fn cop_catalog() -> framecount::CoinCatalog {
    framecount::CoinCatalog::colombian_peso()
}
