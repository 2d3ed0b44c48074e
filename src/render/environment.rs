use crate::assets::Panorama;
use crate::render::calibration::CalibrationTable;
use crate::render::gpu::{EnvironmentMapHandle, EnvironmentMapId, GpuBackend, ShadingParams};
use crate::render::sampler::{resolve_sun_direction, DEFAULT_SUN_DIRECTION};
use crate::render::schedule::Debounce;
use glam::{Mat3, Quat, Vec3};
use std::sync::Arc;
use std::time::Instant;

/// Wraps into [0, 360) and snaps to 1e-4 degrees so congruent angles give
/// bit-identical rotations.
pub fn normalize_degrees(degrees: f32) -> f32 {
    if !degrees.is_finite() {
        return 0.0;
    }
    let wrapped = f64::from(degrees).rem_euclid(360.0);
    let snapped = (wrapped * 1e4).round() / 1e4;
    if snapped >= 360.0 {
        0.0
    } else {
        snapped as f32
    }
}

/// HDRI environment: source panorama, rotation, intensity and the derived
/// prefiltered map.
///
/// The map is generated at `committed_rotation`; rotation edits apply a
/// cheap live rotation on top of it until a forced or debounced commit
/// regenerates the map.
pub struct EnvironmentState {
    panorama: Option<Arc<Panorama>>,
    label: String,
    rotation_degrees: f32,
    committed_rotation_degrees: f32,
    intensity: f32,
    background_visible: bool,
    environment_map: Option<EnvironmentMapHandle>,
    base_sun_direction: Vec3,
    commit: Debounce,
    regenerations: u64,
}

impl EnvironmentState {
    pub fn new(commit: Debounce) -> Self {
        Self {
            panorama: None,
            label: String::new(),
            rotation_degrees: 0.0,
            committed_rotation_degrees: 0.0,
            intensity: 1.0,
            background_visible: true,
            environment_map: None,
            base_sun_direction: DEFAULT_SUN_DIRECTION,
            commit,
            regenerations: 0,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.panorama.is_some()
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn rotation_degrees(&self) -> f32 {
        self.rotation_degrees
    }

    #[cfg(test)]
    pub fn committed_rotation_degrees(&self) -> f32 {
        self.committed_rotation_degrees
    }

    pub fn intensity(&self) -> f32 {
        self.intensity
    }

    pub fn background_visible(&self) -> bool {
        self.background_visible
    }

    pub fn regenerations(&self) -> u64 {
        self.regenerations
    }

    pub fn commit_pending(&self) -> bool {
        self.commit.is_pending()
    }

    pub fn environment_map_id(&self) -> Option<EnvironmentMapId> {
        self.environment_map.as_ref().map(EnvironmentMapHandle::id)
    }

    /// Replaces the panorama, re-derives the sun and regenerates the map at
    /// the current rotation. The previous map is released first.
    pub fn load(
        &mut self,
        panorama: Arc<Panorama>,
        preset: Option<&str>,
        label: String,
        calibration: &CalibrationTable,
        backend: &mut dyn GpuBackend,
    ) {
        self.base_sun_direction = resolve_sun_direction(&panorama, preset, calibration);
        log::info!(
            "Environment '{}' loaded ({}x{}), base sun direction {:?}",
            label,
            panorama.width(),
            panorama.height(),
            self.base_sun_direction
        );
        self.panorama = Some(panorama);
        self.label = label;
        self.commit.cancel();
        self.regenerate(backend);
    }

    /// Applies `degrees` to live shading immediately. The map is rebuilt now
    /// when `force_regenerate` is set, otherwise after the commit debounce.
    /// Returns true when the map was regenerated.
    pub fn set_rotation(
        &mut self,
        degrees: f32,
        force_regenerate: bool,
        now: Instant,
        backend: &mut dyn GpuBackend,
    ) -> bool {
        self.rotation_degrees = normalize_degrees(degrees);
        if !self.is_loaded() {
            return false;
        }
        if force_regenerate {
            self.commit.cancel();
            self.regenerate(backend);
            return true;
        }
        // Every event replaces the pending commit; returning to the
        // committed angle leaves nothing to regenerate.
        if self.rotation_degrees == self.committed_rotation_degrees {
            self.commit.cancel();
        } else {
            self.commit.arm(now);
        }
        false
    }

    /// Runs the debounced regeneration when due. Returns true when the map
    /// was regenerated.
    pub fn poll(&mut self, now: Instant, backend: &mut dyn GpuBackend) -> bool {
        if !self.commit.fire(now) {
            return false;
        }
        self.regenerate(backend);
        true
    }

    pub fn set_intensity(&mut self, value: f32) {
        if !value.is_finite() {
            log::warn!("Ignoring non-finite environment intensity");
            return;
        }
        self.intensity = value.max(0.0);
    }

    pub fn set_background_visible(&mut self, visible: bool) {
        self.background_visible = visible;
    }

    /// With the HDRI as backdrop, intensity drives exposure so backdrop and
    /// model brighten together; otherwise it scales only the materials.
    pub fn shading(&self) -> ShadingParams {
        if self.background_visible {
            ShadingParams {
                material_environment_intensity: 1.0,
                background_intensity: 1.0,
                exposure: self.intensity,
            }
        } else {
            ShadingParams {
                material_environment_intensity: self.intensity,
                background_intensity: 1.0,
                exposure: 1.0,
            }
        }
    }

    pub fn live_rotation(&self) -> Quat {
        Quat::from_rotation_y(self.rotation_degrees.to_radians())
    }

    /// Shading-space transform for the current live rotation.
    pub fn live_transform(&self) -> Mat3 {
        Mat3::from_quat(self.live_rotation())
    }

    /// Rotation still to apply on top of the generated map.
    pub fn live_delta_degrees(&self) -> f32 {
        normalize_degrees(self.rotation_degrees - self.committed_rotation_degrees)
    }

    pub fn base_sun_direction(&self) -> Vec3 {
        self.base_sun_direction
    }

    /// Base sun direction carried along with the live HDRI rotation.
    pub fn sun_direction(&self) -> Vec3 {
        (self.live_transform() * self.base_sun_direction).normalize_or(DEFAULT_SUN_DIRECTION)
    }

    pub fn release(&mut self, backend: &mut dyn GpuBackend) {
        if let Some(map) = self.environment_map.take() {
            log::debug!("Releasing environment map {}", map.raw());
            backend.release_environment_map(map);
        }
        self.commit.cancel();
    }

    fn regenerate(&mut self, backend: &mut dyn GpuBackend) {
        let Some(panorama) = self.panorama.as_ref() else {
            return;
        };
        if let Some(old) = self.environment_map.take() {
            backend.release_environment_map(old);
        }
        let map = backend.generate_environment_map(panorama, self.rotation_degrees);
        log::debug!(
            "Generated environment map {} at {:.2} deg",
            map.raw(),
            self.rotation_degrees
        );
        self.environment_map = Some(map);
        self.committed_rotation_degrees = self.rotation_degrees;
        self.regenerations += 1;
    }
}
