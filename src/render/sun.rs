use crate::render::environment::EnvironmentState;
use crate::render::gpu::{GpuBackend, ShadowMapHandle};
use glam::Vec3;

/// Distance of the directional light from the origin along its direction.
pub const SUN_DISTANCE: f32 = 100.0;

/// Which input is authoritative for the sun direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SunDirectionMode {
    /// Detected HDRI sun, carried along with the HDRI rotation.
    #[default]
    Environment,
    /// Azimuth/elevation set by the user.
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, serde::Serialize, serde::Deserialize)]
pub enum ShadowResolution {
    #[serde(rename = "1024")]
    R1024,
    #[default]
    #[serde(rename = "2048")]
    R2048,
    #[serde(rename = "4096")]
    R4096,
}

impl ShadowResolution {
    pub fn pixels(self) -> u32 {
        match self {
            ShadowResolution::R1024 => 1024,
            ShadowResolution::R2048 => 2048,
            ShadowResolution::R4096 => 4096,
        }
    }

    /// Filter taps per axis used when sampling the shadow map.
    pub fn filter_taps(self) -> u32 {
        self.pixels() / 512
    }
}

/// User-facing sun settings, persisted in session files.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct SunLightParams {
    pub enabled: bool,
    pub mode: SunDirectionMode,
    pub azimuth_deg: f32,
    pub elevation_deg: f32,
    pub intensity: f32,
    pub color: [f32; 3],
    pub shadow_resolution: ShadowResolution,
    pub shadow_softness: f32,
    pub shadow_bias: f32,
    pub shadow_intensity: f32,
}

impl Default for SunLightParams {
    fn default() -> Self {
        Self {
            enabled: true,
            mode: SunDirectionMode::Environment,
            azimuth_deg: 45.0,
            elevation_deg: 45.0,
            intensity: 3.0,
            color: [1.0, 0.98, 0.95],
            shadow_resolution: ShadowResolution::R2048,
            shadow_softness: 1.0,
            shadow_bias: 0.0005,
            shadow_intensity: 0.6,
        }
    }
}

/// Resolved directional light as drawn by the backend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SunLight {
    pub direction: Vec3,
    pub position: Vec3,
    pub target: Vec3,
    pub color: Vec3,
    pub intensity: f32,
    pub enabled: bool,
    pub cast_shadow: bool,
    pub shadow_softness: f32,
    pub shadow_bias: f32,
    pub shadow_intensity: f32,
    pub shadow_resolution: ShadowResolution,
}

/// Unit vector pointing toward the sun. Azimuth 0 looks down +Z, 90 down +X.
pub fn direction_from_angles(azimuth_deg: f32, elevation_deg: f32) -> Vec3 {
    let (sin_az, cos_az) = azimuth_deg.to_radians().sin_cos();
    let (sin_el, cos_el) = elevation_deg.to_radians().sin_cos();
    Vec3::new(cos_el * sin_az, sin_el, cos_el * cos_az).normalize_or(Vec3::Y)
}

fn finite_non_negative(value: f32, what: &str) -> Option<f32> {
    if value.is_finite() {
        Some(value.max(0.0))
    } else {
        log::warn!("Ignoring non-finite {}", what);
        None
    }
}

/// Keeps the directional light consistent with the environment or with the
/// manual angles, and owns the cached shadow map.
pub struct SunLightController {
    params: SunLightParams,
    light: SunLight,
    shadow_map: Option<ShadowMapHandle>,
}

impl SunLightController {
    pub fn new(params: SunLightParams) -> Self {
        let mut controller = Self {
            light: SunLight {
                direction: Vec3::Y,
                position: Vec3::Y * SUN_DISTANCE,
                target: Vec3::ZERO,
                color: Vec3::ONE,
                intensity: 0.0,
                enabled: false,
                cast_shadow: false,
                shadow_softness: 0.0,
                shadow_bias: 0.0,
                shadow_intensity: 0.0,
                shadow_resolution: params.shadow_resolution,
            },
            params,
            shadow_map: None,
        };
        controller.apply_params();
        controller
    }

    pub fn params(&self) -> &SunLightParams {
        &self.params
    }

    pub fn light(&self) -> SunLight {
        self.light
    }

    /// Re-derives direction and placement from the authoritative source.
    pub fn recompute(&mut self, environment: &EnvironmentState) {
        let direction = match self.params.mode {
            SunDirectionMode::Environment => environment.sun_direction(),
            SunDirectionMode::Manual => {
                direction_from_angles(self.params.azimuth_deg, self.params.elevation_deg)
            }
        };
        self.light.direction = direction;
        self.light.position = direction * SUN_DISTANCE;
        self.light.target = Vec3::ZERO;
        self.apply_params();
        log::debug!(
            "Sun ({:?}) direction {:?} intensity {:.2}",
            self.params.mode,
            direction,
            self.light.intensity
        );
    }

    /// Disabling the sun also drops its shadow map; the next enabled render
    /// reallocates it.
    pub fn set_enabled(&mut self, enabled: bool, backend: &mut dyn GpuBackend) {
        self.params.enabled = enabled;
        if !enabled {
            self.release(backend);
        }
        self.apply_params();
    }

    pub fn set_intensity(&mut self, value: f32) {
        if let Some(value) = finite_non_negative(value, "sun intensity") {
            self.params.intensity = value;
            self.apply_params();
        }
    }

    pub fn set_color(&mut self, color: [f32; 3]) {
        if color.iter().any(|channel| !channel.is_finite()) {
            log::warn!("Ignoring non-finite sun color {:?}", color);
            return;
        }
        self.params.color = color.map(|channel| channel.max(0.0));
        self.apply_params();
    }

    /// Switches to manual mode with the given angles.
    pub fn set_direction_manual(&mut self, azimuth_deg: f32, elevation_deg: f32) {
        if !azimuth_deg.is_finite() || !elevation_deg.is_finite() {
            log::warn!("Ignoring non-finite manual sun angles");
            return;
        }
        self.params.mode = SunDirectionMode::Manual;
        self.params.azimuth_deg = azimuth_deg.rem_euclid(360.0);
        self.params.elevation_deg = elevation_deg.clamp(-90.0, 90.0);
    }

    pub fn set_mode(&mut self, mode: SunDirectionMode) {
        if self.params.mode != mode {
            log::info!("Sun direction mode {:?} -> {:?}", self.params.mode, mode);
        }
        self.params.mode = mode;
    }

    /// A new resolution drops the cached map; the next render reallocates it.
    pub fn set_shadow_quality(
        &mut self,
        resolution: ShadowResolution,
        backend: &mut dyn GpuBackend,
    ) {
        if resolution == self.params.shadow_resolution {
            return;
        }
        self.params.shadow_resolution = resolution;
        if let Some(map) = self.shadow_map.take() {
            log::debug!("Releasing shadow map {} for resolution change", map.raw());
            backend.release_shadow_map(map);
        }
        self.apply_params();
    }

    pub fn set_shadow_softness(&mut self, value: f32) {
        if let Some(value) = finite_non_negative(value, "shadow softness") {
            self.params.shadow_softness = value;
            self.apply_params();
        }
    }

    pub fn set_shadow_intensity(&mut self, value: f32) {
        if let Some(value) = finite_non_negative(value, "shadow intensity") {
            self.params.shadow_intensity = value.min(1.0);
            self.apply_params();
        }
    }

    pub fn set_shadow_bias(&mut self, value: f32) {
        if let Some(value) = finite_non_negative(value, "shadow bias") {
            self.params.shadow_bias = value;
            self.apply_params();
        }
    }

    /// Allocates the shadow map when the light needs one. Returns whether a
    /// map is available for this frame.
    pub fn ensure_shadow_map(&mut self, backend: &mut dyn GpuBackend) -> bool {
        if !self.light.cast_shadow {
            return false;
        }
        if self.shadow_map.is_none() {
            let map = backend.create_shadow_map(self.params.shadow_resolution);
            log::debug!(
                "Allocated {}px shadow map {}",
                self.params.shadow_resolution.pixels(),
                map.raw()
            );
            self.shadow_map = Some(map);
        }
        true
    }

    pub fn release(&mut self, backend: &mut dyn GpuBackend) {
        if let Some(map) = self.shadow_map.take() {
            backend.release_shadow_map(map);
        }
    }

    fn apply_params(&mut self) {
        let params = &self.params;
        self.light.color = Vec3::from(params.color);
        self.light.intensity = params.intensity;
        self.light.enabled = params.enabled;
        self.light.cast_shadow = params.enabled;
        self.light.shadow_softness = params.shadow_softness;
        self.light.shadow_bias = params.shadow_bias;
        self.light.shadow_intensity = params.shadow_intensity;
        self.light.shadow_resolution = params.shadow_resolution;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::Panorama;
    use crate::render::calibration::CalibrationTable;
    use crate::render::gpu::BackendCapabilities;
    use crate::render::schedule::Debounce;
    use crate::render::software::SoftwareBackend;
    use std::sync::Arc;
    use std::time::Instant;

    fn environment_with_sun(backend: &mut SoftwareBackend) -> EnvironmentState {
        let mut pixels = vec![[0.05, 0.05, 0.05]; 64 * 32];
        pixels[16 * 64 + 48] = [30.0, 30.0, 30.0];
        let panorama = Arc::new(Panorama::new(64, 32, pixels).unwrap());
        let mut environment = EnvironmentState::new(Debounce::default());
        environment.load(
            panorama,
            None,
            "sun".to_string(),
            &CalibrationTable::empty(),
            backend,
        );
        environment
    }

    #[test]
    fn light_sits_at_fixed_distance_along_direction() {
        let mut backend = SoftwareBackend::new(BackendCapabilities { progressive: false });
        let environment = environment_with_sun(&mut backend);
        let mut sun = SunLightController::new(SunLightParams::default());
        sun.recompute(&environment);
        let light = sun.light();
        assert!((light.direction - Vec3::X).length() < 1e-5);
        assert!((light.position - Vec3::X * SUN_DISTANCE).length() < 1e-3);
        assert_eq!(light.target, Vec3::ZERO);
    }

    #[test]
    fn environment_mode_tracks_hdri_rotation() {
        let mut backend = SoftwareBackend::new(BackendCapabilities { progressive: false });
        let mut environment = environment_with_sun(&mut backend);
        let mut sun = SunLightController::new(SunLightParams::default());
        environment.set_rotation(180.0, false, Instant::now(), &mut backend);
        sun.recompute(&environment);
        assert!((sun.light().direction - Vec3::NEG_X).length() < 1e-5);
    }

    #[test]
    fn manual_mode_ignores_environment_until_switched_back() {
        let mut backend = SoftwareBackend::new(BackendCapabilities { progressive: false });
        let mut environment = environment_with_sun(&mut backend);
        let mut sun = SunLightController::new(SunLightParams::default());
        sun.set_direction_manual(0.0, 90.0);
        assert_eq!(sun.params().mode, SunDirectionMode::Manual);
        environment.set_rotation(90.0, true, Instant::now(), &mut backend);
        sun.recompute(&environment);
        assert!((sun.light().direction - Vec3::Y).length() < 1e-5);

        sun.set_mode(SunDirectionMode::Environment);
        sun.recompute(&environment);
        assert!((sun.light().direction - Vec3::NEG_Z).length() < 1e-5);
    }

    #[test]
    fn manual_angles_map_to_expected_axes() {
        assert!((direction_from_angles(0.0, 0.0) - Vec3::Z).length() < 1e-6);
        assert!((direction_from_angles(90.0, 0.0) - Vec3::X).length() < 1e-6);
        assert!((direction_from_angles(0.0, 90.0) - Vec3::Y).length() < 1e-6);
    }

    #[test]
    fn resolution_change_releases_cached_shadow_map() {
        let mut backend = SoftwareBackend::new(BackendCapabilities { progressive: false });
        let mut sun = SunLightController::new(SunLightParams::default());
        assert!(sun.ensure_shadow_map(&mut backend));
        assert_eq!(backend.resource_counts().shadow_maps, 1);

        sun.set_shadow_quality(ShadowResolution::R2048, &mut backend);
        assert_eq!(backend.resource_counts().shadow_maps, 1);

        sun.set_shadow_quality(ShadowResolution::R4096, &mut backend);
        assert_eq!(backend.resource_counts().shadow_maps, 0);

        assert!(sun.ensure_shadow_map(&mut backend));
        assert_eq!(backend.resource_counts().shadow_maps, 1);
        assert_eq!(sun.light().shadow_resolution.filter_taps(), 8);
    }

    #[test]
    fn disabled_sun_needs_no_shadow_map() {
        let mut backend = SoftwareBackend::new(BackendCapabilities { progressive: false });
        let mut sun = SunLightController::new(SunLightParams::default());
        sun.set_enabled(false, &mut backend);
        assert!(!sun.ensure_shadow_map(&mut backend));
        assert_eq!(backend.resource_counts().shadow_maps, 0);
    }

    #[test]
    fn disabling_sun_releases_allocated_shadow_map() {
        let mut backend = SoftwareBackend::new(BackendCapabilities { progressive: false });
        let mut sun = SunLightController::new(SunLightParams::default());
        assert!(sun.ensure_shadow_map(&mut backend));
        assert_eq!(backend.resource_counts().shadow_maps, 1);

        sun.set_enabled(false, &mut backend);
        assert_eq!(backend.resource_counts().shadow_maps, 0);
        assert!(!sun.light().cast_shadow);

        sun.set_enabled(true, &mut backend);
        assert!(sun.ensure_shadow_map(&mut backend));
        assert_eq!(backend.resource_counts().shadow_maps, 1);
    }

    #[test]
    fn invalid_values_are_clamped_or_ignored() {
        let mut sun = SunLightController::new(SunLightParams::default());
        sun.set_intensity(-2.0);
        assert_eq!(sun.light().intensity, 0.0);
        sun.set_intensity(f32::NAN);
        assert_eq!(sun.light().intensity, 0.0);
        sun.set_shadow_intensity(3.0);
        assert_eq!(sun.light().shadow_intensity, 1.0);
        sun.set_color([2.0, -1.0, 0.5]);
        assert_eq!(sun.light().color, Vec3::new(2.0, 0.0, 0.5));
    }
}
