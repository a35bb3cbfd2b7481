//! Haar cascade classifier.
//!
//! Viola-Jones detection with boosted Haar-like features, read from the
//! OpenCV cascade XML format (`<cascade>` with `stages` and `features`).

use image::GrayImage;
use image::imageops::{FilterType, resize};
use roxmltree::{Document, Node};
use std::path::Path;
use std::str::FromStr;
use tracing::warn;

use crate::config::CascadeParams;
use crate::error::LoaderError;
use crate::models::FaceBox;

/// Similarity tolerance used when merging overlapping detections.
const GROUP_EPS: f64 = 0.2;

/// Windows with `area / sqrt(area * sq_sum - sum^2)` at or above this are skipped.
const MIN_INV_CONTRAST: f64 = 0.1;

/// A loaded cascade, immutable and shareable across threads.
#[derive(Debug, Clone)]
pub struct HaarCascade {
    window: (u32, u32),
    stages: Vec<Stage>,
    features: Vec<HaarFeature>,
}

#[derive(Debug, Clone)]
struct Stage {
    threshold: f32,
    classifiers: Vec<WeakClassifier>,
}

/// Decision tree over features. Non-positive child indices are leaves:
/// `-idx` indexes into `leaves`.
#[derive(Debug, Clone)]
struct WeakClassifier {
    nodes: Vec<TreeNode>,
    leaves: Vec<f32>,
}

#[derive(Debug, Clone)]
struct TreeNode {
    left: i32,
    right: i32,
    feature: usize,
    threshold: f32,
}

#[derive(Debug, Clone)]
struct HaarFeature {
    rects: Vec<WeightedRect>,
}

#[derive(Debug, Clone)]
struct WeightedRect {
    x: u32,
    y: u32,
    width: u32,
    height: u32,
    weight: f32,
}

impl HaarCascade {
    pub fn from_file(path: &Path) -> Result<Self, LoaderError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_xml(&text)
    }

    pub fn from_xml(text: &str) -> Result<Self, LoaderError> {
        let doc = Document::parse(text).map_err(|e| LoaderError::parse(e.to_string()))?;

        let cascade = doc
            .descendants()
            .find(|n| n.has_tag_name("cascade"))
            .ok_or_else(|| {
                if doc.descendants().any(|n| n.has_tag_name("trees")) {
                    LoaderError::parse("legacy cascade format is not supported")
                } else {
                    LoaderError::parse("no <cascade> element")
                }
            })?;

        if let Some(kind) = child(cascade, "stageType") {
            if kind.text().map(str::trim) != Some("BOOST") {
                return Err(LoaderError::parse("only BOOST cascades are supported"));
            }
        }
        if let Some(kind) = child(cascade, "featureType") {
            if kind.text().map(str::trim) != Some("HAAR") {
                return Err(LoaderError::parse("only HAAR features are supported"));
            }
        }

        let width: u32 = scalar(cascade, "width")?;
        let height: u32 = scalar(cascade, "height")?;
        if width < 3 || height < 3 {
            return Err(LoaderError::parse(format!("window {}x{} is too small", width, height)));
        }

        let stages = match child(cascade, "stages") {
            Some(node) => items(node).map(parse_stage).collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };
        let features = match child(cascade, "features") {
            Some(node) => items(node)
                .map(|f| parse_feature(f, width, height))
                .collect::<Result<Vec<_>, _>>()?,
            None => Vec::new(),
        };

        if stages.is_empty()
            || features.is_empty()
            || stages.iter().any(|s| s.classifiers.is_empty())
        {
            return Err(LoaderError::EmptyClassifier);
        }

        for stage in &stages {
            for weak in &stage.classifiers {
                weak.validate(features.len())?;
            }
        }

        Ok(Self {
            window: (width, height),
            stages,
            features,
        })
    }

    /// Base detection window (width, height).
    pub fn window(&self) -> (u32, u32) {
        self.window
    }

    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// Scan the image at growing window sizes and return grouped detections.
    pub fn detect_multi_scale(&self, gray: &GrayImage, params: &CascadeParams) -> Vec<FaceBox> {
        if !(params.scale_factor > 1.0) {
            warn!("Scale factor {} does not grow the window; skipping detection", params.scale_factor);
            return Vec::new();
        }

        let (img_w, img_h) = gray.dimensions();
        let (ow, oh) = self.window;
        let mut candidates = Vec::new();
        let mut factor = 1.0f64;

        loop {
            let win_w = (ow as f64 * factor).round() as u32;
            let win_h = (oh as f64 * factor).round() as u32;
            let scaled_w = (img_w as f64 / factor).round() as u32;
            let scaled_h = (img_h as f64 / factor).round() as u32;
            if scaled_w < ow || scaled_h < oh || win_w > img_w || win_h > img_h {
                break;
            }

            if win_w >= params.min_size && win_h >= params.min_size {
                let scaled = resize(gray, scaled_w, scaled_h, FilterType::Triangle);
                let integral = IntegralImages::new(&scaled);
                let step = if factor > 2.0 { 1 } else { 2 };

                for y in (0..=scaled_h - oh).step_by(step) {
                    for x in (0..=scaled_w - ow).step_by(step) {
                        if self.accepts(&integral, x, y) {
                            let bx = ((x as f64 * factor).round() as u32).min(img_w - 1);
                            let by = ((y as f64 * factor).round() as u32).min(img_h - 1);
                            candidates.push(FaceBox {
                                x: bx,
                                y: by,
                                width: win_w.min(img_w - bx),
                                height: win_h.min(img_h - by),
                            });
                        }
                    }
                }
            }

            factor *= params.scale_factor as f64;
        }

        group_rectangles(&candidates, params.min_neighbors)
    }

    /// Run every stage on the window at (x, y) of the scaled image.
    fn accepts(&self, integral: &IntegralImages, x: u32, y: u32) -> bool {
        let (ow, oh) = self.window;
        let area = ((ow - 2) * (oh - 2)) as f64;
        let sum = integral.sum(x + 1, y + 1, ow - 2, oh - 2);
        let sq_sum = integral.sq_sum(x + 1, y + 1, ow - 2, oh - 2);
        let norm = area * sq_sum - sum * sum;
        if norm <= 0.0 {
            return false;
        }
        let inv_norm = 1.0 / norm.sqrt();
        // Standard deviation of 10 or less: too flat to hold a face.
        if area * inv_norm >= MIN_INV_CONTRAST {
            return false;
        }

        for stage in &self.stages {
            let mut stage_sum = 0.0f64;
            for weak in &stage.classifiers {
                let mut idx = 0i32;
                loop {
                    let node = &weak.nodes[idx as usize];
                    let value = self.features[node.feature].evaluate(integral, x, y) * inv_norm;
                    idx = if value < node.threshold as f64 {
                        node.left
                    } else {
                        node.right
                    };
                    if idx <= 0 {
                        break;
                    }
                }
                stage_sum += weak.leaves[(-idx) as usize] as f64;
            }
            if stage_sum < stage.threshold as f64 {
                return false;
            }
        }
        true
    }
}

impl WeakClassifier {
    fn validate(&self, feature_count: usize) -> Result<(), LoaderError> {
        for node in &self.nodes {
            if node.feature >= feature_count {
                return Err(LoaderError::parse(format!(
                    "feature index {} out of range ({} features)",
                    node.feature, feature_count
                )));
            }
            for next in [node.left, node.right] {
                let valid = if next > 0 {
                    (next as usize) < self.nodes.len()
                } else {
                    ((-next) as usize) < self.leaves.len()
                };
                if !valid {
                    return Err(LoaderError::parse(format!("dangling tree index {}", next)));
                }
            }
        }
        Ok(())
    }
}

impl HaarFeature {
    fn evaluate(&self, integral: &IntegralImages, ox: u32, oy: u32) -> f64 {
        self.rects
            .iter()
            .map(|r| integral.sum(ox + r.x, oy + r.y, r.width, r.height) * r.weight as f64)
            .sum()
    }
}

/// Summed-area tables of pixel values and squared pixel values.
struct IntegralImages {
    stride: usize,
    sum: Vec<u64>,
    sq_sum: Vec<u64>,
}

impl IntegralImages {
    fn new(src: &GrayImage) -> Self {
        let (w, h) = (src.width() as usize, src.height() as usize);
        let stride = w + 1;
        let mut sum = vec![0u64; stride * (h + 1)];
        let mut sq_sum = vec![0u64; stride * (h + 1)];
        let raw = src.as_raw();

        for y in 0..h {
            let mut row = 0u64;
            let mut row_sq = 0u64;
            for x in 0..w {
                let v = raw[y * w + x] as u64;
                row += v;
                row_sq += v * v;
                let idx = (y + 1) * stride + (x + 1);
                sum[idx] = sum[idx - stride] + row;
                sq_sum[idx] = sq_sum[idx - stride] + row_sq;
            }
        }

        Self { stride, sum, sq_sum }
    }

    fn sum(&self, x: u32, y: u32, w: u32, h: u32) -> f64 {
        Self::rect(&self.sum, self.stride, x, y, w, h)
    }

    fn sq_sum(&self, x: u32, y: u32, w: u32, h: u32) -> f64 {
        Self::rect(&self.sq_sum, self.stride, x, y, w, h)
    }

    fn rect(table: &[u64], stride: usize, x: u32, y: u32, w: u32, h: u32) -> f64 {
        let (x0, y0) = (x as usize, y as usize);
        let (x1, y1) = (x0 + w as usize, y0 + h as usize);
        let total = (table[y1 * stride + x1] + table[y0 * stride + x0])
            - (table[y1 * stride + x0] + table[y0 * stride + x1]);
        total as f64
    }
}

/// Merge overlapping candidates into one box per cluster.
///
/// Clusters with `min_neighbors` or fewer members are dropped, as are boxes
/// lying inside a stronger cluster's box. `min_neighbors == 0` returns the
/// candidates untouched.
pub fn group_rectangles(rects: &[FaceBox], min_neighbors: u32) -> Vec<FaceBox> {
    if min_neighbors == 0 || rects.is_empty() {
        return rects.to_vec();
    }

    let mut parent: Vec<usize> = (0..rects.len()).collect();
    fn find(parent: &mut [usize], mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    for i in 0..rects.len() {
        for j in (i + 1)..rects.len() {
            if similar(&rects[i], &rects[j]) {
                let (a, b) = (find(&mut parent, i), find(&mut parent, j));
                if a != b {
                    parent[b.max(a)] = a.min(b);
                }
            }
        }
    }

    // (root, count, sum x, sum y, sum w, sum h) in first-seen order.
    let mut clusters: Vec<(usize, u32, f64, f64, f64, f64)> = Vec::new();
    for (i, r) in rects.iter().enumerate() {
        let root = find(&mut parent, i);
        let slot = match clusters.iter().position(|c| c.0 == root) {
            Some(slot) => slot,
            None => {
                clusters.push((root, 0, 0.0, 0.0, 0.0, 0.0));
                clusters.len() - 1
            }
        };
        let entry = &mut clusters[slot];
        entry.1 += 1;
        entry.2 += r.x as f64;
        entry.3 += r.y as f64;
        entry.4 += r.width as f64;
        entry.5 += r.height as f64;
    }

    let averaged: Vec<(FaceBox, u32)> = clusters
        .iter()
        .filter(|c| c.1 > min_neighbors)
        .map(|&(_, n, sx, sy, sw, sh)| {
            let k = n as f64;
            let face = FaceBox {
                x: (sx / k).round() as u32,
                y: (sy / k).round() as u32,
                width: (sw / k).round() as u32,
                height: (sh / k).round() as u32,
            };
            (face, n)
        })
        .collect();

    averaged
        .iter()
        .enumerate()
        .filter(|(i, (r1, n1))| {
            !averaged.iter().enumerate().any(|(j, (r2, n2))| {
                if *i == j {
                    return false;
                }
                let dx = (r2.width as f64 * GROUP_EPS).round() as i64;
                let dy = (r2.height as f64 * GROUP_EPS).round() as i64;
                let inside = r1.x as i64 >= r2.x as i64 - dx
                    && r1.y as i64 >= r2.y as i64 - dy
                    && r1.right() as i64 <= r2.right() as i64 + dx
                    && r1.bottom() as i64 <= r2.bottom() as i64 + dy;
                inside && (*n2 > (*n1).max(3) || *n1 < 3)
            })
        })
        .map(|(_, (r, _))| *r)
        .collect()
}

fn similar(a: &FaceBox, b: &FaceBox) -> bool {
    let delta = GROUP_EPS * (a.width.min(b.width) + a.height.min(b.height)) as f64 * 0.5;
    let close = |p: u32, q: u32| (p as f64 - q as f64).abs() <= delta;
    close(a.x, b.x) && close(a.y, b.y) && close(a.right(), b.right()) && close(a.bottom(), b.bottom())
}

fn child<'a, 'i>(node: Node<'a, 'i>, name: &str) -> Option<Node<'a, 'i>> {
    node.children().find(|c| c.has_tag_name(name))
}

/// Element children; OpenCV names sequence items `_`.
fn items<'a, 'i>(node: Node<'a, 'i>) -> impl Iterator<Item = Node<'a, 'i>> {
    node.children().filter(|c| c.is_element())
}

fn text<'a>(node: Node<'a, '_>, name: &str) -> Result<&'a str, LoaderError> {
    child(node, name)
        .and_then(|n| n.text())
        .ok_or_else(|| LoaderError::parse(format!("missing <{}>", name)))
}

fn scalar<T: FromStr>(node: Node, name: &str) -> Result<T, LoaderError> {
    let raw = text(node, name)?.trim();
    raw.parse()
        .map_err(|_| LoaderError::parse(format!("<{}> has invalid value {:?}", name, raw)))
}

fn numbers<T: FromStr>(raw: &str, what: &str) -> Result<Vec<T>, LoaderError> {
    raw.split_whitespace()
        .map(|tok| {
            tok.parse()
                .map_err(|_| LoaderError::parse(format!("invalid number {:?} in <{}>", tok, what)))
        })
        .collect()
}

fn parse_stage(node: Node) -> Result<Stage, LoaderError> {
    let threshold: f32 = scalar(node, "stageThreshold")?;
    let classifiers = match child(node, "weakClassifiers") {
        Some(weak) => items(weak).map(parse_weak).collect::<Result<Vec<_>, _>>()?,
        None => Vec::new(),
    };
    Ok(Stage {
        threshold,
        classifiers,
    })
}

fn parse_weak(node: Node) -> Result<WeakClassifier, LoaderError> {
    let raw_nodes: Vec<&str> = text(node, "internalNodes")?.split_whitespace().collect();
    if raw_nodes.is_empty() || raw_nodes.len() % 4 != 0 {
        return Err(LoaderError::parse("<internalNodes> must hold groups of four values"));
    }

    let mut nodes = Vec::with_capacity(raw_nodes.len() / 4);
    for group in raw_nodes.chunks(4) {
        let ints = numbers::<i32>(&group[..3].join(" "), "internalNodes")?;
        let threshold = numbers::<f32>(group[3], "internalNodes")?[0];
        if ints[2] < 0 {
            return Err(LoaderError::parse("negative feature index"));
        }
        nodes.push(TreeNode {
            left: ints[0],
            right: ints[1],
            feature: ints[2] as usize,
            threshold,
        });
    }

    let leaves = numbers::<f32>(text(node, "leafValues")?, "leafValues")?;
    if leaves.is_empty() {
        return Err(LoaderError::parse("empty <leafValues>"));
    }

    Ok(WeakClassifier { nodes, leaves })
}

fn parse_feature(node: Node, width: u32, height: u32) -> Result<HaarFeature, LoaderError> {
    if let Some(tilted) = child(node, "tilted") {
        if tilted.text().map(str::trim).is_some_and(|t| t != "0") {
            return Err(LoaderError::parse("tilted features are not supported"));
        }
    }

    let rects_node = child(node, "rects").ok_or_else(|| LoaderError::parse("feature without <rects>"))?;
    let mut rects = Vec::new();
    for item in items(rects_node) {
        let raw: Vec<&str> = item.text().unwrap_or_default().split_whitespace().collect();
        if raw.len() != 5 {
            return Err(LoaderError::parse("rect must be `x y w h weight`"));
        }
        let dims = numbers::<u32>(&raw[..4].join(" "), "rects")?;
        let weight = numbers::<f32>(raw[4], "rects")?[0];
        let rect = WeightedRect {
            x: dims[0],
            y: dims[1],
            width: dims[2],
            height: dims[3],
            weight,
        };
        if rect.x + rect.width > width || rect.y + rect.height > height {
            return Err(LoaderError::parse("feature rect exceeds the detection window"));
        }
        rects.push(rect);
    }

    if rects.is_empty() {
        return Err(LoaderError::parse("feature without rects"));
    }
    Ok(HaarFeature { rects })
}
