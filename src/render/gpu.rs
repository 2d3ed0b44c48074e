//! GPU abstraction consumed by the lighting core.
//!
//! Handles are move-only: whoever creates a resource owns it and must hand
//! it back through the matching `release_*` call before replacing it.

use crate::assets::Panorama;
use crate::render::sun::{ShadowResolution, SunLight};
use crate::scene::{Aabb, MaterialParams};
use glam::{Mat4, Vec3};

#[derive(Debug, PartialEq, Eq, Hash)]
pub struct EnvironmentMapHandle(u64);

#[derive(Debug, PartialEq, Eq, Hash)]
pub struct ShadowMapHandle(u64);

#[derive(Debug, PartialEq, Eq, Hash)]
pub struct MeshBufferHandle(u64);

/// Copyable reference to an environment map, for render snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnvironmentMapId(pub u64);

macro_rules! handle_impl {
    ($name:ident) => {
        impl $name {
            pub(crate) fn new(id: u64) -> Self {
                Self(id)
            }

            pub fn raw(&self) -> u64 {
                self.0
            }
        }
    };
}

handle_impl!(EnvironmentMapHandle);
handle_impl!(ShadowMapHandle);
handle_impl!(MeshBufferHandle);

impl EnvironmentMapHandle {
    pub fn id(&self) -> EnvironmentMapId {
        EnvironmentMapId(self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendCapabilities {
    pub progressive: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct CapabilityError(pub String);

/// How environment intensity reaches the image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadingParams {
    pub material_environment_intensity: f32,
    pub background_intensity: f32,
    pub exposure: f32,
}

impl Default for ShadingParams {
    fn default() -> Self {
        Self {
            material_environment_intensity: 1.0,
            background_intensity: 1.0,
            exposure: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraView {
    pub eye: Vec3,
    pub forward: Vec3,
    pub right: Vec3,
    pub up: Vec3,
    pub fov_y_radians: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelDraw {
    pub world_from_local: Mat4,
    pub local_bounds: Aabb,
    pub material: MaterialParams,
    pub cast_shadow: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnvironmentDraw {
    pub map: EnvironmentMapId,
    /// Rotation applied on top of the rotation the map was generated at.
    pub live_rotation_degrees: f32,
}

/// Everything a backend needs to draw one frame. Cloned into the
/// progressive renderer on resync so it keeps a fixed scene.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderSnapshot {
    pub width: u32,
    pub height: u32,
    pub camera: CameraView,
    pub model: Option<ModelDraw>,
    pub environment: Option<EnvironmentDraw>,
    pub shading: ShadingParams,
    pub background_visible: bool,
    pub background_color: [f32; 3],
    pub sun: SunLight,
    pub shadow_map_ready: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameSource {
    Rasterized,
    Accumulated { samples: u32 },
}

/// A finished RGBA8 frame handed to the export collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub width: u32,
    pub height: u32,
    pub rgba8: Vec<u8>,
    pub source: FrameSource,
}

pub trait GpuBackend {
    fn capabilities(&self) -> BackendCapabilities;

    /// Prefilters `panorama` into an environment map with `rotation_degrees`
    /// baked in.
    fn generate_environment_map(
        &mut self,
        panorama: &Panorama,
        rotation_degrees: f32,
    ) -> EnvironmentMapHandle;
    fn release_environment_map(&mut self, handle: EnvironmentMapHandle);

    fn create_shadow_map(&mut self, resolution: ShadowResolution) -> ShadowMapHandle;
    fn release_shadow_map(&mut self, handle: ShadowMapHandle);

    fn upload_mesh(&mut self, local_bounds: &Aabb) -> MeshBufferHandle;
    fn release_mesh(&mut self, handle: MeshBufferHandle);

    fn draw_rasterized(&mut self, snapshot: &RenderSnapshot) -> Frame;

    /// Creates the progressive renderer; fails when the device lacks the
    /// required features.
    fn create_path_tracer(&mut self) -> Result<(), CapabilityError>;
    fn release_path_tracer(&mut self);
    /// Replaces the progressive renderer's scene and clears its samples.
    fn path_tracer_sync(&mut self, snapshot: &RenderSnapshot, max_bounces: u32);
    fn path_tracer_reset(&mut self);
    /// Adds one sample and returns the new sample count.
    fn path_tracer_sample(&mut self) -> u32;
    /// Current accumulated image, or `None` before the first sample.
    fn path_tracer_frame(&self) -> Option<Frame>;
}

/// Live resource counts, for leak checks across repeated swaps.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ResourceCounts {
    pub environment_maps: usize,
    pub shadow_maps: usize,
    pub mesh_buffers: usize,
}
