use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::models::CoinCatalog;

pub const DEFAULT_CASCADE_URL: &str =
    "https://raw.githubusercontent.com/opencv/opencv/4.x/data/haarcascades/haarcascade_frontalface_default.xml";
pub const DEFAULT_ARTIFACT_NAME: &str = "haarcascade_frontalface_default.xml";

/// Hough-gradient circle transform parameters, at the processed resolution.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HoughParams {
    /// Inverse accumulator resolution.
    pub dp: f32,
    pub min_dist: f32,
    /// Upper Canny threshold; the lower one is half of it.
    pub canny_high: f32,
    pub accumulator_threshold: u32,
    pub min_radius: u32,
    pub max_radius: u32,
}

impl Default for HoughParams {
    fn default() -> Self {
        Self {
            dp: 1.5,
            min_dist: 80.0,
            canny_high: 100.0,
            accumulator_threshold: 40,
            min_radius: 30,
            max_radius: 200,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CascadeParams {
    pub scale_factor: f32,
    pub min_neighbors: u32,
    /// Minimum detection side in pixels.
    pub min_size: u32,
}

impl Default for CascadeParams {
    fn default() -> Self {
        Self {
            scale_factor: 1.1,
            min_neighbors: 3,
            min_size: 80,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    pub url: String,
    pub cache_dir: PathBuf,
    pub artifact_name: String,
    pub connect_timeout_ms: u64,
    pub read_timeout_ms: u64,
}

impl LoaderConfig {
    pub fn artifact_path(&self) -> PathBuf {
        self.cache_dir.join(&self.artifact_name)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_CASCADE_URL.to_string(),
            cache_dir: default_cache_dir(),
            artifact_name: DEFAULT_ARTIFACT_NAME.to_string(),
            connect_timeout_ms: 5_000,
            read_timeout_ms: 5_000,
        }
    }
}

fn default_cache_dir() -> PathBuf {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map(|home| Path::new(&home).join(".cache/framecount/cascade"))
        .unwrap_or_else(|_| std::env::temp_dir().join("framecount/cascade"))
}

/// Full runtime configuration. Every field has a default, so an empty TOML
/// file (or none at all) yields the stock coin and face settings.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub hough: HoughParams,
    pub cascade: CascadeParams,
    pub loader: LoaderConfig,
    /// Fractional radius tolerance for denomination matching.
    pub tolerance: f64,
    pub blur_sigma: f32,
    pub catalog: CoinCatalog,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            hough: HoughParams::default(),
            cascade: CascadeParams::default(),
            loader: LoaderConfig::default(),
            tolerance: 0.10,
            blur_sigma: 2.0,
            catalog: CoinCatalog::default(),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {:?}", path))?;
        let config: AppConfig = toml::from_str(&text)
            .with_context(|| format!("Failed to parse config {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let h = &self.hough;
        if h.dp <= 0.0 {
            bail!("hough.dp must be positive, got {}", h.dp);
        }
        if h.min_dist <= 0.0 || h.canny_high <= 0.0 || h.accumulator_threshold == 0 {
            bail!("hough thresholds must be positive");
        }
        if h.min_radius >= h.max_radius {
            bail!(
                "hough.min_radius ({}) must be below hough.max_radius ({})",
                h.min_radius,
                h.max_radius
            );
        }

        let c = &self.cascade;
        if c.scale_factor <= 1.0 {
            bail!("cascade.scale_factor must exceed 1.0, got {}", c.scale_factor);
        }
        if c.min_size == 0 {
            bail!("cascade.min_size must be positive");
        }

        if !(self.tolerance > 0.0 && self.tolerance < 1.0) {
            bail!("tolerance must be in (0, 1), got {}", self.tolerance);
        }
        if self.blur_sigma <= 0.0 {
            bail!("blur_sigma must be positive, got {}", self.blur_sigma);
        }

        if self.catalog.is_empty() {
            bail!("coin catalog is empty");
        }
        for entry in self.catalog.entries() {
            if entry.value <= 0.0 || entry.radii.iter().any(|r| *r <= 0.0) {
                bail!("catalog entry {:?} needs a positive value and radii", entry.name);
            }
        }

        Ok(())
    }
}
