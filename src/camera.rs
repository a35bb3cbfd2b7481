use anyhow::{Context, Result, bail};
use image::RgbaImage;
use std::path::{Path, PathBuf};

const FRAME_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "bmp", "tif", "tiff", "webp"];

/// Replays still images as a camera feed, one frame per file.
pub struct ImageSequence {
    paths: Vec<PathBuf>,
    next: usize,
}

impl ImageSequence {
    /// Files are taken as given; directories contribute their image files
    /// sorted by name.
    pub fn from_paths(inputs: &[PathBuf]) -> Result<Self> {
        let mut paths = Vec::new();

        for input in inputs {
            if input.is_dir() {
                let mut found: Vec<PathBuf> = std::fs::read_dir(input)
                    .with_context(|| format!("Failed to list frames in {:?}", input))?
                    .filter_map(|entry| entry.ok().map(|e| e.path()))
                    .filter(|p| p.is_file() && is_frame_file(p))
                    .collect();
                found.sort();
                paths.extend(found);
            } else if input.is_file() {
                paths.push(input.clone());
            } else {
                bail!("Frame source not found: {}", input.display());
            }
        }

        Ok(Self { paths, next: 0 })
    }

    pub fn len(&self) -> usize {
        self.paths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Dimensions of the first frame, read from its header.
    pub fn first_dimensions(&self) -> Result<Option<(u32, u32)>> {
        match self.paths.first() {
            Some(path) => {
                let dims = image::image_dimensions(path)
                    .with_context(|| format!("Failed to read frame header {:?}", path))?;
                Ok(Some(dims))
            }
            None => Ok(None),
        }
    }
}

impl Iterator for ImageSequence {
    type Item = Result<(PathBuf, RgbaImage)>;

    fn next(&mut self) -> Option<Self::Item> {
        let path = self.paths.get(self.next)?.clone();
        self.next += 1;

        let frame = image::open(&path)
            .map(|img| img.to_rgba8())
            .with_context(|| format!("Failed to decode frame {:?}", path));
        Some(frame.map(|f| (path, f)))
    }
}

fn is_frame_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
