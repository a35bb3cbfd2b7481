use image::GrayImage;
use imageproc::edges::canny;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};

use crate::config::HoughParams;
use crate::models::Circle;

/// Find circles with the Hough gradient method.
///
/// Every Canny edge pixel votes along its gradient direction, both ways,
/// for all radii in range. Accumulator maxima above the threshold become
/// centre candidates; each candidate's radius is then estimated from the
/// distances to all edge pixels.
pub fn detect_circles(gray: &GrayImage, params: &HoughParams) -> Vec<Circle> {
    let (width, height) = gray.dimensions();
    if width < 3 || height < 3 {
        return Vec::new();
    }

    let edges = canny(gray, params.canny_high / 2.0, params.canny_high);
    let grad_x = horizontal_sobel(gray);
    let grad_y = vertical_sobel(gray);

    let idp = 1.0 / params.dp;
    let acc_w = (width as f32 * idp).ceil() as usize + 2;
    let acc_h = (height as f32 * idp).ceil() as usize + 2;
    let mut accumulator = vec![0u32; acc_w * acc_h];

    let min_r = params.min_radius as f32;
    let max_r = params.max_radius as f32;
    let mut edge_points = Vec::new();

    for (x, y, pixel) in edges.enumerate_pixels() {
        if pixel[0] == 0 {
            continue;
        }
        let vx = grad_x.get_pixel(x, y)[0] as f32;
        let vy = grad_y.get_pixel(x, y)[0] as f32;
        let magnitude = (vx * vx + vy * vy).sqrt();
        if magnitude < 1.0 {
            continue;
        }
        edge_points.push((x as f32, y as f32));

        let (sx, sy) = (vx / magnitude * idp, vy / magnitude * idp);
        let (x0, y0) = (x as f32 * idp, y as f32 * idp);
        for direction in [1.0f32, -1.0] {
            let mut r = min_r;
            while r <= max_r {
                let ax = x0 + direction * sx * r;
                let ay = y0 + direction * sy * r;
                if ax < 0.0 || ay < 0.0 {
                    break;
                }
                let (ix, iy) = (ax as usize, ay as usize);
                if ix >= acc_w || iy >= acc_h {
                    break;
                }
                accumulator[iy * acc_w + ix] += 1;
                r += 1.0;
            }
        }
    }

    let threshold = params.accumulator_threshold;
    let mut centers = Vec::new();
    for iy in 1..acc_h - 1 {
        for ix in 1..acc_w - 1 {
            let i = iy * acc_w + ix;
            let votes = accumulator[i];
            if votes > threshold
                && votes > accumulator[i - 1]
                && votes >= accumulator[i + 1]
                && votes > accumulator[i - acc_w]
                && votes >= accumulator[i + acc_w]
            {
                centers.push((ix, iy, votes));
            }
        }
    }
    // Strongest first; stable sort keeps scan order among equals.
    centers.sort_by(|a, b| b.2.cmp(&a.2));

    let min_dist_sq = params.min_dist * params.min_dist;
    let mut circles: Vec<Circle> = Vec::new();
    let mut distances = Vec::with_capacity(edge_points.len());

    for (ix, iy, _) in centers {
        let cx = (ix as f32 + 0.5) * params.dp;
        let cy = (iy as f32 + 0.5) * params.dp;

        let too_close = circles.iter().any(|c| {
            let (dx, dy) = (c.x - cx, c.y - cy);
            dx * dx + dy * dy < min_dist_sq
        });
        if too_close {
            continue;
        }

        distances.clear();
        distances.extend(edge_points.iter().filter_map(|(x, y)| {
            let d = ((x - cx).powi(2) + (y - cy).powi(2)).sqrt();
            (d >= min_r && d <= max_r).then_some(d)
        }));
        distances.sort_by(|a, b| a.total_cmp(b));

        if let Some((radius, support)) = best_radius(&distances, params.dp) {
            if support > threshold as usize {
                circles.push(Circle::new(cx, cy, radius));
            }
        }
    }

    circles
}

/// Group sorted distances into bins no wider than `bin_width` and pick the
/// bin with the most support relative to its radius.
fn best_radius(sorted: &[f32], bin_width: f32) -> Option<(f32, usize)> {
    let mut best: Option<(f32, usize, f32)> = None;
    let mut start = 0;

    for j in 1..=sorted.len() {
        if j == sorted.len() || sorted[j] - sorted[start] > bin_width {
            let count = j - start;
            let radius = (sorted[start] + sorted[j - 1]) * 0.5;
            let score = count as f32 / radius;
            if best.is_none_or(|(_, _, s)| score > s) {
                best = Some((radius, count, score));
            }
            start = j;
        }
    }

    best.map(|(radius, count, _)| (radius, count))
}
