pub mod animation;
pub mod graph;
pub mod serialization;

use crate::render::coordinator::ProgressiveQuality;
use crate::render::sun::{ShadowResolution, SunDirectionMode, SunLightParams};
use animation::{AnimationMode, SineParams};
use glam::{EulerRot, Mat3, Mat4, Quat, Vec3};

pub use graph::{Aabb, MaterialParams, MeshRenderable, ModelAsset, RenderableVisitor, SceneNode};

const MIN_SCALE: f32 = 1e-4;

/// Model placement as edited by the user.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TransformState {
    pub scale: f32,
    pub position: [f32; 2],
    pub rotation_deg: [f32; 3],
}

impl Default for TransformState {
    fn default() -> Self {
        Self {
            scale: 1.0,
            position: [0.0, 0.0],
            rotation_deg: [0.0, 0.0, 0.0],
        }
    }
}

impl TransformState {
    /// Clamps non-positive or non-finite scales to a tiny positive value.
    pub fn new(scale: f32, position: [f32; 2], rotation_deg: [f32; 3]) -> Self {
        let scale = if scale.is_finite() && scale > MIN_SCALE {
            scale
        } else {
            log::warn!("Rejecting model scale {}; clamping to {}", scale, MIN_SCALE);
            MIN_SCALE
        };
        Self {
            scale,
            position,
            rotation_deg,
        }
    }

    pub fn matrix(&self) -> Mat4 {
        compose_transform_matrix(
            [self.position[0], self.position[1], 0.0],
            self.rotation_deg,
            self.scale,
        )
    }

    /// Per-axis scale read back from the composed matrix.
    pub fn effective_scale(&self) -> Vec3 {
        let matrix = self.matrix();
        Vec3::new(
            matrix.x_axis.truncate().length(),
            matrix.y_axis.truncate().length(),
            matrix.z_axis.truncate().length(),
        )
    }
}

pub fn rotation_matrix(rotation_deg: [f32; 3]) -> Mat3 {
    // Rotation order: Y (yaw), then X (pitch), then Z (roll)
    Mat3::from_euler(
        EulerRot::YXZ,
        rotation_deg[1].to_radians(),
        rotation_deg[0].to_radians(),
        rotation_deg[2].to_radians(),
    )
}

/// Builds the model matrix from scratch; identical inputs always give
/// bit-identical output.
pub fn compose_transform_matrix(position: [f32; 3], rotation_deg: [f32; 3], scale: f32) -> Mat4 {
    let rotation = Quat::from_mat3(&rotation_matrix(rotation_deg));
    Mat4::from_scale_rotation_translation(Vec3::splat(scale), rotation, Vec3::from(position))
}

/// Where the session's environment panorama comes from.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvironmentSourceData {
    Preset(String),
    Path(String),
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EnvironmentData {
    pub source: EnvironmentSourceData,
    #[serde(default)]
    pub rotation_deg: f32,
    #[serde(default = "default_one")]
    pub intensity: f32,
    #[serde(default = "default_true")]
    pub background_visible: bool,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AssetData {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct AnimationData {
    pub enabled: bool,
    pub mode: AnimationMode,
    pub turntable_speeds_deg: [f32; 3],
    pub sine: SineParams,
}

impl Default for AnimationData {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: AnimationMode::Off,
            turntable_speeds_deg: [0.0, 30.0, 0.0],
            sine: SineParams::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct RenderSettingsData {
    pub width: u32,
    pub height: u32,
    pub progressive: bool,
    pub quality: ProgressiveQuality,
    pub background_color: [f32; 3],
}

impl Default for RenderSettingsData {
    fn default() -> Self {
        Self {
            width: 640,
            height: 360,
            progressive: false,
            quality: ProgressiveQuality::Preview,
            background_color: [0.18, 0.18, 0.2],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CameraData {
    pub yaw_deg: f32,
    pub pitch_deg: f32,
}

/// A host command, as replayed from a session timeline.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum ViewerCommand {
    LoadEnvironment { source: EnvironmentSourceData },
    SetEnvironmentRotation { degrees: f32, commit: bool },
    SetEnvironmentIntensity { value: f32 },
    SetBackgroundVisible { visible: bool },
    SetSunEnabled { enabled: bool },
    SetSunIntensity { value: f32 },
    SetSunColor { color: [f32; 3] },
    SetSunDirectionManual { azimuth_deg: f32, elevation_deg: f32 },
    SetSunMode { mode: SunDirectionMode },
    SetShadowQuality { resolution: ShadowResolution },
    SetShadowSoftness { value: f32 },
    SetShadowIntensity { value: f32 },
    SetShadowBias { value: f32 },
    SetTransform { transform: TransformState },
    SetAnimationEnabled { enabled: bool },
    SetAnimationMode { mode: AnimationMode },
    SetAnimationSpeeds { speeds_deg: [f32; 3] },
    SetSineParams { params: SineParams },
    OrbitCamera { yaw_deg: f32, pitch_deg: f32 },
    EnableProgressive,
    DisableProgressive,
    SetProgressiveQuality { quality: ProgressiveQuality },
    ResetProgressiveAccumulation,
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TimelineEvent {
    pub frame: u32,
    #[serde(flatten)]
    pub command: ViewerCommand,
}

/// Everything a session file persists: initial scene state plus the
/// scripted timeline replayed by the host.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SceneState {
    #[serde(default)]
    pub model: Option<AssetData>,
    #[serde(default)]
    pub transform: TransformState,
    #[serde(default)]
    pub animation: AnimationData,
    #[serde(default)]
    pub environment: Option<EnvironmentData>,
    #[serde(default)]
    pub sun: SunLightParams,
    #[serde(default)]
    pub render: RenderSettingsData,
    #[serde(default)]
    pub camera: Option<CameraData>,
    #[serde(default)]
    pub timeline: Vec<TimelineEvent>,
}

impl SceneState {
    /// Timeline events sorted by frame; ties keep file order.
    pub fn sorted_timeline(&self) -> Vec<TimelineEvent> {
        let mut events = self.timeline.clone();
        events.sort_by_key(|event| event.frame);
        events
    }
}

fn default_one() -> f32 {
    1.0
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_set_transform_is_bit_identical() {
        let transform = TransformState::new(1.7, [0.3, -2.1], [33.3, 271.9, -12.25]);
        let once = transform.matrix();
        let mut last = once;
        for _ in 0..1000 {
            last = TransformState::new(1.7, [0.3, -2.1], [33.3, 271.9, -12.25]).matrix();
        }
        assert_eq!(once.to_cols_array(), last.to_cols_array());
    }

    #[test]
    fn scale_is_uniform_under_rotation() {
        let transform = TransformState::new(2.0, [1.0, -1.0], [90.0, 0.0, 0.0]);
        let scale = transform.effective_scale();
        for axis in scale.to_array() {
            assert!((axis - 2.0).abs() < 1e-5, "axis scale {}", axis);
        }
        let translation = transform.matrix().w_axis.truncate();
        assert_eq!(translation, Vec3::new(1.0, -1.0, 0.0));
    }

    #[test]
    fn rotation_applies_yaw_outermost() {
        // Pitch 90 sends local +Z to -Y, which the outer yaw leaves in place.
        let rotation = rotation_matrix([90.0, 90.0, 0.0]);
        let forward = rotation * Vec3::Z;
        assert!((forward - Vec3::new(0.0, -1.0, 0.0)).length() < 1e-5);
        let side = rotation * Vec3::X;
        assert!((side - Vec3::new(0.0, 0.0, -1.0)).length() < 1e-5);
    }

    #[test]
    fn invalid_scale_is_clamped_positive() {
        assert!(TransformState::new(0.0, [0.0; 2], [0.0; 3]).scale > 0.0);
        assert!(TransformState::new(f32::NAN, [0.0; 2], [0.0; 3]).scale > 0.0);
        assert!(TransformState::new(-3.0, [0.0; 2], [0.0; 3]).scale > 0.0);
    }

    #[test]
    fn timeline_sort_is_stable() {
        let mut scene = SceneState::default();
        scene.timeline = vec![
            TimelineEvent {
                frame: 5,
                command: ViewerCommand::EnableProgressive,
            },
            TimelineEvent {
                frame: 1,
                command: ViewerCommand::SetSunIntensity { value: 2.0 },
            },
            TimelineEvent {
                frame: 5,
                command: ViewerCommand::DisableProgressive,
            },
        ];
        let sorted = scene.sorted_timeline();
        assert_eq!(sorted[0].frame, 1);
        assert_eq!(sorted[1].command, ViewerCommand::EnableProgressive);
        assert_eq!(sorted[2].command, ViewerCommand::DisableProgressive);
    }
}
