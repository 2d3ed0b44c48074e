use crate::scene::SceneState;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum SerializationError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SerializationError>;

#[cfg(test)]
pub fn save_scene_to_file(scene: &SceneState, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(scene)?;
    std::fs::write(path, json)?;
    Ok(())
}

pub fn load_scene_from_file(path: &Path) -> Result<SceneState> {
    let json = std::fs::read_to_string(path)?;
    let scene: SceneState = serde_json::from_str(&json)?;
    Ok(scene)
}

#[cfg(test)]
mod tests {
    use crate::render::coordinator::ProgressiveQuality;
    use crate::render::sun::{ShadowResolution, SunDirectionMode};
    use crate::scene::animation::AnimationMode;
    use crate::scene::{
        AssetData, EnvironmentData, EnvironmentSourceData, SceneState, TimelineEvent,
        TransformState, ViewerCommand,
    };

    #[test]
    fn test_empty_scene_serialization() {
        let scene = SceneState::default();
        let json = serde_json::to_string_pretty(&scene).unwrap();
        let loaded: SceneState = serde_json::from_str(&json).unwrap();
        assert_eq!(loaded, scene);
        assert!(loaded.timeline.is_empty());
    }

    #[test]
    fn test_minimal_document_uses_defaults() {
        let loaded: SceneState = serde_json::from_str("{}").unwrap();
        assert!(loaded.model.is_none());
        assert_eq!(loaded.transform, TransformState::default());
        assert_eq!(loaded.sun.mode, SunDirectionMode::Environment);
        assert_eq!(loaded.render.quality, ProgressiveQuality::Preview);
    }

    #[test]
    fn test_timeline_commands_parse_from_flat_objects() {
        let json = r#"{
            "environment": { "source": { "preset": "venice_sunset" }, "rotation_deg": 90.0 },
            "timeline": [
                { "frame": 0, "command": "enable_progressive" },
                { "frame": 3, "command": "set_sun_intensity", "value": 4.5 },
                { "frame": 4, "command": "set_shadow_quality", "resolution": "4096" },
                { "frame": 9, "command": "set_animation_mode", "mode": "turntable" }
            ]
        }"#;
        let loaded: SceneState = serde_json::from_str(json).unwrap();
        let environment = loaded.environment.as_ref().unwrap();
        assert_eq!(
            environment.source,
            EnvironmentSourceData::Preset("venice_sunset".to_string())
        );
        assert_eq!(environment.intensity, 1.0);
        assert!(environment.background_visible);
        assert_eq!(loaded.timeline.len(), 4);
        assert_eq!(loaded.timeline[0].command, ViewerCommand::EnableProgressive);
        assert_eq!(
            loaded.timeline[1].command,
            ViewerCommand::SetSunIntensity { value: 4.5 }
        );
        assert_eq!(
            loaded.timeline[2].command,
            ViewerCommand::SetShadowQuality {
                resolution: ShadowResolution::R4096
            }
        );
        assert_eq!(
            loaded.timeline[3].command,
            ViewerCommand::SetAnimationMode {
                mode: AnimationMode::Turntable
            }
        );
    }

    #[test]
    fn test_save_load_stress_loop_via_file() {
        let mut scene = SceneState::default();
        scene.model = Some(AssetData {
            path: "assets/gltf/DamagedHelmet.gltf".to_string(),
        });
        scene.transform = TransformState::new(2.0, [1.0, -1.0], [90.0, 0.0, 0.0]);
        scene.environment = Some(EnvironmentData {
            source: EnvironmentSourceData::Path("hdri/studio.hdr".to_string()),
            rotation_deg: 135.0,
            intensity: 1.5,
            background_visible: false,
        });
        scene.timeline.push(TimelineEvent {
            frame: 12,
            command: ViewerCommand::SetEnvironmentRotation {
                degrees: 200.0,
                commit: false,
            },
        });

        let mut path = std::env::temp_dir();
        let nonce = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        path.push(format!(
            "lookdev_scene_stress_{}_{}.json",
            std::process::id(),
            nonce
        ));

        let original = scene.clone();
        for _ in 0..50 {
            super::save_scene_to_file(&scene, &path).unwrap();
            scene = super::load_scene_from_file(&path).unwrap();
        }
        assert_eq!(scene, original);

        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn test_missing_file_reports_io_error() {
        let path = std::env::temp_dir().join("lookdev_definitely_missing_scene.json");
        match super::load_scene_from_file(&path) {
            Err(super::SerializationError::Io(_)) => {}
            other => panic!("Expected Io error, got {:?}", other.map(|_| ())),
        }
    }
}
