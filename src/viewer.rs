//! The look-dev viewer: one owned instance holding environment, sun, model,
//! animation and render-mode state on top of a [`GpuBackend`].

use crate::assets::gltf::load_gltf_model;
use crate::assets::{AssetError, AssetManager, EnvironmentSource, LoadTicket, Panorama};
use crate::render::calibration::CalibrationTable;
use crate::render::camera::CameraController;
use crate::render::coordinator::{
    CoordinatorEvent, ProgressiveQuality, RenderMode, RenderModeCoordinator,
};
use crate::render::environment::EnvironmentState;
use crate::render::gpu::{
    EnvironmentDraw, Frame, GpuBackend, ModelDraw, RenderSnapshot,
};
use crate::render::schedule::Debounce;
use crate::render::sun::{ShadowResolution, SunDirectionMode, SunLightController, SunLightParams};
use crate::scene::animation::{AnimationMode, AnimationState, SineParams};
use crate::scene::graph::{fit_matrix, EnvironmentIntensityVisitor, ShadowFlagsVisitor};
use crate::scene::{
    MaterialParams, MeshRenderable, ModelAsset, RenderSettingsData, RenderableVisitor,
    TransformState,
};
use glam::{Mat4, Vec3};
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

/// Largest model extent after auto-fit, in world units.
pub const MODEL_FIT_SIZE: f32 = 2.0;

#[derive(Debug, thiserror::Error)]
pub enum ViewerError {
    #[error("resource load failed: {0}")]
    ResourceLoad(#[from] AssetError),
    #[error("progressive rendering unavailable: {0}")]
    CapabilityUnavailable(String),
    #[error("unknown environment preset '{0}'")]
    UnknownPreset(String),
}

pub type Result<T> = std::result::Result<T, ViewerError>;

/// What happened to a completed load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Applied,
    /// A newer request was issued; the result was dropped.
    Superseded,
}

#[derive(Debug, Clone)]
pub struct ViewerConfig {
    pub width: u32,
    pub height: u32,
    pub background_color: [f32; 3],
    pub quality: ProgressiveQuality,
    pub sun: SunLightParams,
    pub calibration: CalibrationTable,
}

impl ViewerConfig {
    pub fn from_settings(
        render: &RenderSettingsData,
        sun: SunLightParams,
        calibration: CalibrationTable,
    ) -> Self {
        Self {
            width: render.width.max(1),
            height: render.height.max(1),
            background_color: render.background_color,
            quality: render.quality,
            sun,
            calibration,
        }
    }
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self::from_settings(
            &RenderSettingsData::default(),
            SunLightParams::default(),
            CalibrationTable::builtin(),
        )
    }
}

struct UploadBuffers<'a> {
    backend: &'a mut dyn GpuBackend,
}

impl RenderableVisitor for UploadBuffers<'_> {
    fn visit_renderable(&mut self, node_name: &str, _: &Mat4, renderable: &mut MeshRenderable) {
        if renderable.buffers.is_none() {
            let buffers = self.backend.upload_mesh(&renderable.local_bounds);
            log::debug!(
                "Uploaded mesh buffers {} for '{}' ({})",
                buffers.raw(),
                node_name,
                renderable.material_name
            );
            renderable.buffers = Some(buffers);
        }
    }
}

struct ReleaseBuffers<'a> {
    backend: &'a mut dyn GpuBackend,
}

impl RenderableVisitor for ReleaseBuffers<'_> {
    fn visit_renderable(&mut self, _: &str, _: &Mat4, renderable: &mut MeshRenderable) {
        if let Some(buffers) = renderable.buffers.take() {
            self.backend.release_mesh(buffers);
        }
    }
}

struct LoadedModel {
    asset: ModelAsset,
    fit: Mat4,
    material: MaterialParams,
    cast_shadow: bool,
}

impl LoadedModel {
    /// Re-reads the drawn material after a visitor pass.
    fn refresh(&mut self) {
        if let Some((material, cast_shadow)) = self.asset.primary_surface() {
            self.material = material;
            self.cast_shadow = cast_shadow;
        }
    }
}

pub struct Viewer<B: GpuBackend> {
    backend: B,
    assets: AssetManager,
    calibration: CalibrationTable,
    environment: EnvironmentState,
    sun: SunLightController,
    coordinator: RenderModeCoordinator,
    camera: CameraController,
    model: Option<LoadedModel>,
    transform: TransformState,
    animation: AnimationState,
    width: u32,
    height: u32,
    background_color: [f32; 3],
    now: Instant,
}

impl<B: GpuBackend> Viewer<B> {
    pub fn new(backend: B, assets: AssetManager, config: ViewerConfig, now: Instant) -> Self {
        let mut viewer = Self {
            backend,
            assets,
            calibration: config.calibration,
            environment: EnvironmentState::new(Debounce::default()),
            sun: SunLightController::new(config.sun),
            coordinator: RenderModeCoordinator::new(Debounce::default(), config.quality),
            camera: CameraController::from_bounds(Vec3::ZERO, Vec3::splat(MODEL_FIT_SIZE)),
            model: None,
            transform: TransformState::default(),
            animation: AnimationState::new(),
            width: config.width.max(1),
            height: config.height.max(1),
            background_color: config.background_color,
            now,
        };
        viewer.sun.recompute(&viewer.environment);
        log::info!(
            "Viewer ready ({}x{}, progressive capable: {})",
            viewer.width,
            viewer.height,
            viewer.backend.capabilities().progressive
        );
        viewer
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn environment(&self) -> &EnvironmentState {
        &self.environment
    }

    pub fn sun(&self) -> &SunLightController {
        &self.sun
    }

    pub fn transform(&self) -> &TransformState {
        &self.transform
    }

    pub fn animation(&self) -> &AnimationState {
        &self.animation
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    /// Model matrix including auto-fit.
    #[cfg(test)]
    pub fn model_matrix(&self) -> Option<Mat4> {
        self.model
            .as_ref()
            .map(|model| self.transform.matrix() * model.fit)
    }

    // Environment

    pub fn load_environment(&mut self, source: EnvironmentSource) -> Result<()> {
        let ticket = self.begin_environment_load();
        let decoded = self.assets.decode_environment(&source);
        self.complete_environment_load(ticket, &source, decoded)
            .map(|_| ())
    }

    pub fn begin_environment_load(&mut self) -> LoadTicket {
        self.assets.begin_environment_load()
    }

    /// Applies a decoded panorama if `ticket` is still the latest request.
    /// A failed load leaves the current environment in place.
    pub fn complete_environment_load(
        &mut self,
        ticket: LoadTicket,
        source: &EnvironmentSource,
        decoded: std::result::Result<Arc<Panorama>, AssetError>,
    ) -> Result<LoadOutcome> {
        if !self.assets.is_current_environment_load(ticket) {
            log::warn!(
                "Dropping superseded environment load '{}'",
                source.label()
            );
            return Ok(LoadOutcome::Superseded);
        }
        let panorama = decoded.map_err(|err| match err {
            AssetError::UnknownPreset { name, .. } => ViewerError::UnknownPreset(name),
            other => ViewerError::ResourceLoad(other),
        })?;
        self.environment.load(
            panorama,
            source.preset_name(),
            source.label(),
            &self.calibration,
            &mut self.backend,
        );
        self.apply_environment_intensity();
        self.sun.recompute(&self.environment);
        self.content_changed();
        Ok(LoadOutcome::Applied)
    }

    pub fn set_environment_rotation(&mut self, degrees: f32, commit: bool) {
        self.environment
            .set_rotation(degrees, commit, self.now, &mut self.backend);
        self.sun.recompute(&self.environment);
        self.content_changed();
    }

    pub fn set_environment_intensity(&mut self, value: f32) {
        self.environment.set_intensity(value);
        self.apply_environment_intensity();
        self.content_changed();
    }

    pub fn set_background_visible(&mut self, visible: bool) {
        self.environment.set_background_visible(visible);
        self.apply_environment_intensity();
        self.content_changed();
    }

    // Sun

    pub fn set_sun_enabled(&mut self, enabled: bool) {
        self.sun.set_enabled(enabled, &mut self.backend);
        if let Some(model) = self.model.as_mut() {
            model
                .asset
                .visit_renderables(&mut ShadowFlagsVisitor { enabled });
            model.refresh();
        }
        self.sun_changed();
    }

    pub fn set_sun_intensity(&mut self, value: f32) {
        self.sun.set_intensity(value);
        self.sun_changed();
    }

    pub fn set_sun_color(&mut self, color: [f32; 3]) {
        self.sun.set_color(color);
        self.sun_changed();
    }

    pub fn set_sun_direction_manual(&mut self, azimuth_deg: f32, elevation_deg: f32) {
        self.sun.set_direction_manual(azimuth_deg, elevation_deg);
        self.sun_changed();
    }

    pub fn set_sun_mode(&mut self, mode: SunDirectionMode) {
        self.sun.set_mode(mode);
        self.sun_changed();
    }

    pub fn set_shadow_quality(&mut self, resolution: ShadowResolution) {
        self.sun.set_shadow_quality(resolution, &mut self.backend);
        self.sun_changed();
    }

    pub fn set_shadow_softness(&mut self, value: f32) {
        self.sun.set_shadow_softness(value);
        self.sun_changed();
    }

    pub fn set_shadow_intensity(&mut self, value: f32) {
        self.sun.set_shadow_intensity(value);
        self.sun_changed();
    }

    pub fn set_shadow_bias(&mut self, value: f32) {
        self.sun.set_shadow_bias(value);
        self.sun_changed();
    }

    // Model

    pub fn load_model(&mut self, path: &Path) -> Result<()> {
        let ticket = self.begin_model_load();
        let loaded = load_gltf_model(path);
        self.complete_model_load(ticket, loaded).map(|_| ())
    }

    pub fn begin_model_load(&mut self) -> LoadTicket {
        self.assets.begin_model_load()
    }

    /// Replaces the model if `ticket` is still the latest request. The old
    /// model's buffers are released before the new ones are uploaded.
    pub fn complete_model_load(
        &mut self,
        ticket: LoadTicket,
        loaded: std::result::Result<ModelAsset, AssetError>,
    ) -> Result<LoadOutcome> {
        if !self.assets.is_current_model_load(ticket) {
            let name = loaded.as_ref().map(|asset| asset.name.as_str()).unwrap_or("<failed>");
            log::warn!("Dropping superseded model load '{}'", name);
            return Ok(LoadOutcome::Superseded);
        }
        let mut asset = loaded?;

        self.release_model();
        asset.visit_renderables(&mut UploadBuffers {
            backend: &mut self.backend,
        });
        asset.visit_renderables(&mut EnvironmentIntensityVisitor {
            intensity: self.environment.shading().material_environment_intensity,
        });
        asset.visit_renderables(&mut ShadowFlagsVisitor {
            enabled: self.sun.params().enabled,
        });
        let fit = fit_matrix(&asset.bounds, MODEL_FIT_SIZE);
        log::info!("Model '{}' loaded", asset.name);
        let mut model = LoadedModel {
            asset,
            fit,
            material: MaterialParams::default(),
            cast_shadow: true,
        };
        model.refresh();
        self.model = Some(model);
        self.camera
            .frame_bounds_preserve_orientation(self.pivot(), Vec3::splat(MODEL_FIT_SIZE));
        self.content_changed();
        Ok(LoadOutcome::Applied)
    }

    /// Rebuilds the model matrix from scratch. A running animation restarts
    /// from the new rotation.
    pub fn set_transform(&mut self, transform: TransformState) {
        self.transform = TransformState::new(
            transform.scale,
            transform.position,
            transform.rotation_deg,
        );
        log::debug!(
            "Model transform set (effective scale {:?})",
            self.transform.effective_scale()
        );
        if self.animation.is_enabled() {
            self.animation
                .set_enabled(false, self.transform.rotation_deg);
            self.animation
                .set_enabled(true, self.transform.rotation_deg);
        }
        self.content_changed();
    }

    pub fn set_animation_enabled(&mut self, enabled: bool) {
        if let Some(rotation) = self
            .animation
            .set_enabled(enabled, self.transform.rotation_deg)
        {
            self.transform.rotation_deg = rotation;
        }
        self.content_changed();
    }

    pub fn set_animation_mode(&mut self, mode: AnimationMode) {
        if let Some(rotation) = self.animation.set_mode(mode, self.transform.rotation_deg) {
            self.transform.rotation_deg = rotation;
        }
        self.content_changed();
    }

    pub fn set_animation_speeds(&mut self, speeds_deg: [f32; 3]) {
        self.animation.set_turntable_speeds(speeds_deg);
    }

    pub fn set_sine_params(&mut self, params: SineParams) {
        self.animation.set_sine_params(params);
    }

    // Camera

    pub fn set_camera_orientation(&mut self, yaw_deg: f32, pitch_deg: f32) {
        self.camera = CameraController::looking_at(
            self.pivot(),
            Vec3::splat(MODEL_FIT_SIZE),
            yaw_deg,
            pitch_deg,
        );
        self.content_changed();
    }

    pub fn orbit_camera(&mut self, yaw_deg: f32, pitch_deg: f32) {
        let pivot = self.pivot();
        self.camera
            .orbit_around(pivot, yaw_deg.to_radians(), pitch_deg.to_radians());
        self.content_changed();
    }

    // Progressive rendering

    pub fn enable_progressive_rendering(&mut self) -> Result<()> {
        if self.coordinator.is_requested() {
            return Ok(());
        }
        let created = self.backend.create_path_tracer();
        self.coordinator
            .enable(created, self.now)
            .map_err(|err| ViewerError::CapabilityUnavailable(err.0))
    }

    pub fn disable_progressive_rendering(&mut self) {
        if self.coordinator.disable() {
            self.backend.release_path_tracer();
        }
    }

    pub fn set_progressive_quality(&mut self, quality: ProgressiveQuality) {
        if quality == self.coordinator.quality() {
            return;
        }
        self.coordinator.set_quality(quality);
        self.reset_progressive_accumulation();
    }

    pub fn reset_progressive_accumulation(&mut self) {
        if self.coordinator.reset_accumulation(self.now) {
            self.backend.path_tracer_reset();
        }
    }

    pub fn render_mode(&self) -> RenderMode {
        self.coordinator.mode()
    }

    pub fn sample_count(&self) -> u32 {
        self.coordinator.sample_count()
    }

    pub fn is_converged(&self) -> bool {
        self.coordinator.is_converged()
    }

    pub fn quality(&self) -> ProgressiveQuality {
        self.coordinator.quality()
    }

    // Frame loop

    /// Display-refresh callback: advances animation, runs due debounced
    /// work and hands the scene to the progressive renderer once settled.
    pub fn tick(&mut self, now: Instant) {
        let dt = now.saturating_duration_since(self.now).as_secs_f32();
        self.now = now;

        if let Some(rotation) = self.animation.tick(dt) {
            self.transform.rotation_deg = rotation;
            self.content_changed();
        }
        if self.environment.poll(now, &mut self.backend) {
            self.content_changed();
        }
        if let Some(CoordinatorEvent::Resync) = self.coordinator.poll(now) {
            let snapshot = self.prepare_snapshot();
            log::debug!("Resyncing progressive renderer");
            self.backend
                .path_tracer_sync(&snapshot, self.coordinator.quality().max_bounces());
        }
    }

    /// Always returns a frame: accumulated when progressive output is
    /// available, rasterized otherwise.
    pub fn render_frame(&mut self) -> Frame {
        let snapshot = self.prepare_snapshot();
        if self.coordinator.mode() == RenderMode::Accumulating {
            if self.coordinator.wants_sample() {
                let samples = self.backend.path_tracer_sample();
                self.coordinator.record_samples(samples);
            }
            if let Some(frame) = self.backend.path_tracer_frame() {
                return frame;
            }
        }
        self.backend.draw_rasterized(&snapshot)
    }

    /// Releases every backend resource the viewer owns.
    pub fn shutdown(&mut self) {
        self.release_model();
        self.environment.release(&mut self.backend);
        self.sun.release(&mut self.backend);
        self.disable_progressive_rendering();
    }

    fn prepare_snapshot(&mut self) -> RenderSnapshot {
        let shadow_map_ready = self.sun.ensure_shadow_map(&mut self.backend);
        let model = self.model.as_ref().map(|model| ModelDraw {
            world_from_local: self.transform.matrix() * model.fit,
            local_bounds: model.asset.bounds,
            material: model.material,
            cast_shadow: model.cast_shadow,
        });
        let environment = self.environment.environment_map_id().map(|map| EnvironmentDraw {
            map,
            live_rotation_degrees: self.environment.live_delta_degrees(),
        });
        RenderSnapshot {
            width: self.width,
            height: self.height,
            camera: self.camera.view(),
            model,
            environment,
            shading: self.environment.shading(),
            background_visible: self.environment.background_visible(),
            background_color: self.background_color,
            sun: self.sun.light(),
            shadow_map_ready,
        }
    }

    fn pivot(&self) -> Vec3 {
        Vec3::new(self.transform.position[0], self.transform.position[1], 0.0)
    }

    fn content_changed(&mut self) {
        if self.coordinator.content_changed(self.now) {
            self.backend.path_tracer_reset();
        }
    }

    fn sun_changed(&mut self) {
        self.sun.recompute(&self.environment);
        self.content_changed();
    }

    fn apply_environment_intensity(&mut self) {
        let intensity = self.environment.shading().material_environment_intensity;
        if let Some(model) = self.model.as_mut() {
            model
                .asset
                .visit_renderables(&mut EnvironmentIntensityVisitor { intensity });
            model.refresh();
        }
    }

    fn release_model(&mut self) {
        if let Some(mut model) = self.model.take() {
            model.asset.visit_renderables(&mut ReleaseBuffers {
                backend: &mut self.backend,
            });
            log::debug!("Released model '{}'", model.asset.name);
        }
    }
}

impl<B: GpuBackend> Drop for Viewer<B> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
