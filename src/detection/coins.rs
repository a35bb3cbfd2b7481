use anyhow::Result;
use image::{GrayImage, RgbaImage};
use std::sync::Arc;
use tracing::debug;

use super::annotate::{self, CENTER_COLOR, MATCH_COLOR, UNKNOWN_COLOR};
use super::hough::detect_circles;
use super::{DetectionSummary, Enhancement, FrameDetector};
use crate::config::{AppConfig, HoughParams};
use crate::models::{Circle, CoinCatalog, CoinTally};

/// Nearest catalog reference found for a detected radius.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RadiusMatch {
    /// Index into the catalog.
    pub index: usize,
    pub reference: f64,
    pub difference: f64,
}

fn within_tolerance(difference: f64, reference: f64, tolerance: f64) -> bool {
    // Slack for the rounding in `reference * (1 + tolerance)`.
    difference <= tolerance * reference + reference * 1e-9
}

/// Classify a radius against every reference of every denomination.
///
/// A reference is a candidate when the radius lies within `tolerance`
/// (a fraction of that reference). The candidate with the smallest absolute
/// difference wins across the whole catalog; on a tie the earlier catalog
/// entry wins.
pub fn classify_radius(radius: f64, catalog: &CoinCatalog, tolerance: f64) -> Option<RadiusMatch> {
    let mut best: Option<RadiusMatch> = None;

    for (index, entry) in catalog.entries().iter().enumerate() {
        for &reference in &entry.radii {
            let difference = (radius - reference).abs();
            if !within_tolerance(difference, reference, tolerance) {
                continue;
            }
            if best.is_none_or(|b| difference < b.difference) {
                best = Some(RadiusMatch {
                    index,
                    reference,
                    difference,
                });
            }
        }
    }

    best
}

/// Circle detector and coin classifier.
pub struct CoinDetector {
    params: HoughParams,
    catalog: Arc<CoinCatalog>,
    tolerance: f64,
    blur_sigma: f32,
    tally: CoinTally,
}

impl CoinDetector {
    pub fn new(params: HoughParams, catalog: Arc<CoinCatalog>, tolerance: f64, blur_sigma: f32) -> Self {
        let tally = CoinTally::new(catalog.len());
        Self {
            params,
            catalog,
            tolerance,
            blur_sigma,
            tally,
        }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(
            config.hough.clone(),
            Arc::new(config.catalog.clone()),
            config.tolerance,
            config.blur_sigma,
        )
    }

    pub fn catalog(&self) -> &CoinCatalog {
        &self.catalog
    }

    /// Classify one frame's circles. The tally starts from zero on every
    /// call; the returned vector holds each circle's match, in input order.
    pub fn classify(&mut self, circles: &[Circle]) -> Vec<Option<RadiusMatch>> {
        self.tally.reset(self.catalog.len());

        circles
            .iter()
            .map(|circle| {
                let found = classify_radius(circle.radius as f64, &self.catalog, self.tolerance);
                match found {
                    Some(m) => {
                        let value = self.catalog.entries()[m.index].value;
                        self.tally.record_match(m.index, value);
                    }
                    None => self.tally.record_unknown(),
                }
                found
            })
            .collect()
    }

    pub fn tally(&self) -> &CoinTally {
        &self.tally
    }

    pub fn summary_text(&self) -> String {
        self.tally.summary(&self.catalog)
    }

    fn annotate(&self, canvas: &mut RgbaImage, circles: &[Circle], matches: &[Option<RadiusMatch>]) {
        for (circle, found) in circles.iter().zip(matches) {
            let center = circle.center();
            let radius = circle.radius.round() as i32;
            let (label, color) = match found {
                Some(m) => (self.catalog.entries()[m.index].name.as_str(), MATCH_COLOR),
                None => ("?", UNKNOWN_COLOR),
            };

            annotate::draw_ring(canvas, center, radius, 4, color);
            if found.is_some() {
                annotate::draw_dot(canvas, center, 5, CENTER_COLOR);
            }
            // Label sits just above the centre dot.
            let origin = (
                center.0 - annotate::label_width(label) / 2,
                center.1 - annotate::label_height() - 8,
            );
            annotate::draw_label(canvas, label, origin, color);
        }
    }
}

impl FrameDetector for CoinDetector {
    fn detect(&mut self, gray: &GrayImage, canvas: &mut RgbaImage) -> Result<DetectionSummary> {
        let circles = detect_circles(gray, &self.params);
        let matches = self.classify(&circles);
        self.annotate(canvas, &circles, &matches);

        debug!(
            "{} circles: {} matched, {} unknown, total {}",
            circles.len(),
            self.tally.matched(),
            self.tally.unknown(),
            self.tally.total()
        );

        Ok(DetectionSummary::Coins {
            tally: self.tally.clone(),
            text: self.summary_text(),
        })
    }

    fn enhancement(&self) -> Enhancement {
        Enhancement::Blur {
            sigma: self.blur_sigma,
        }
    }

    fn name(&self) -> &str {
        "Coin Counter"
    }
}
