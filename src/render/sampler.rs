//! Equirectangular panorama analysis: UV/direction mapping and dominant
//! light detection.

use crate::assets::Panorama;
use crate::render::calibration::CalibrationTable;
use glam::Vec3;
use std::f32::consts::{PI, TAU};

pub const ANALYSIS_WIDTH: u32 = 512;
pub const ANALYSIS_HEIGHT: u32 = 256;

/// Sun direction used when a panorama has no usable highlight.
pub const DEFAULT_SUN_DIRECTION: Vec3 = Vec3::Y;

pub fn luminance(rgb: [f32; 3]) -> f32 {
    0.2126 * rgb[0] + 0.7152 * rgb[1] + 0.0722 * rgb[2]
}

/// `u` wraps around the horizon starting behind the viewer, `v` grows
/// upward (v = 1 is straight up).
pub fn uv_to_direction(u: f32, v: f32) -> Vec3 {
    let phi = (u - 0.5) * TAU;
    let theta = (v - 0.5) * PI;
    let (sin_theta, cos_theta) = theta.sin_cos();
    let (sin_phi, cos_phi) = phi.sin_cos();
    Vec3::new(cos_theta * sin_phi, sin_theta, cos_theta * cos_phi).normalize_or(DEFAULT_SUN_DIRECTION)
}

/// Inverse of [`uv_to_direction`]; `u` is in [0, 1).
pub fn direction_to_uv(direction: Vec3) -> (f32, f32) {
    let dir = direction.normalize_or(DEFAULT_SUN_DIRECTION);
    let phi = dir.x.atan2(dir.z);
    let theta = dir.y.clamp(-1.0, 1.0).asin();
    let u = (phi / TAU + 0.5).rem_euclid(1.0);
    let v = theta / PI + 0.5;
    (u, v)
}

/// Box-filtered luminance grid of at most `ANALYSIS_WIDTH x ANALYSIS_HEIGHT`.
struct LuminanceGrid {
    width: u32,
    height: u32,
    values: Vec<f32>,
}

fn downsample_luminance(panorama: &Panorama) -> LuminanceGrid {
    let width = panorama.width().min(ANALYSIS_WIDTH);
    let height = panorama.height().min(ANALYSIS_HEIGHT);
    let step_x = panorama.width() as f64 / width as f64;
    let step_y = panorama.height() as f64 / height as f64;
    let mut values = Vec::with_capacity((width * height) as usize);
    for gy in 0..height {
        let y0 = (gy as f64 * step_y).floor() as u32;
        let y1 = (((gy + 1) as f64 * step_y).ceil() as u32).clamp(y0 + 1, panorama.height());
        for gx in 0..width {
            let x0 = (gx as f64 * step_x).floor() as u32;
            let x1 = (((gx + 1) as f64 * step_x).ceil() as u32).clamp(x0 + 1, panorama.width());
            let mut sum = 0.0f64;
            for y in y0..y1 {
                for x in x0..x1 {
                    sum += f64::from(luminance(panorama.pixel(x, y)));
                }
            }
            let count = ((y1 - y0) * (x1 - x0)) as f64;
            values.push((sum / count) as f32);
        }
    }
    LuminanceGrid {
        width,
        height,
        values,
    }
}

/// Direction of the single brightest texel of the analysis grid. Scans
/// row-major from the top row; the first maximum wins. A panorama with no
/// positive finite luminance yields [`DEFAULT_SUN_DIRECTION`].
pub fn locate_brightest_direction(panorama: &Panorama) -> Vec3 {
    let grid = downsample_luminance(panorama);
    let mut best: Option<(usize, f32)> = None;
    for (index, value) in grid.values.iter().copied().enumerate() {
        if !value.is_finite() || value <= 0.0 {
            continue;
        }
        match best {
            Some((_, best_value)) if value <= best_value => {}
            _ => best = Some((index, value)),
        }
    }

    let Some((index, value)) = best else {
        log::warn!("Panorama has no positive luminance; using default sun direction");
        return DEFAULT_SUN_DIRECTION;
    };
    let x = (index as u32) % grid.width;
    let y = (index as u32) / grid.width;
    let u = x as f32 / grid.width as f32;
    let v = 1.0 - y as f32 / grid.height as f32;
    let direction = uv_to_direction(u, v);
    log::debug!(
        "Brightest texel ({}, {}) lum {:.3} -> uv ({:.4}, {:.4}) dir {:?}",
        x,
        y,
        value,
        u,
        v,
        direction
    );
    direction
}

/// Calibrated direction when the table knows this panorama, otherwise the
/// brightest-texel heuristic.
pub fn resolve_sun_direction(
    panorama: &Panorama,
    preset: Option<&str>,
    calibration: &CalibrationTable,
) -> Vec3 {
    if let Some(direction) = calibration.lookup(preset, panorama) {
        log::info!("Using calibrated sun direction {:?} for {:?}", direction, preset);
        return direction;
    }
    locate_brightest_direction(panorama)
}
