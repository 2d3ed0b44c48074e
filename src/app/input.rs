use crate::assets::EnvironmentSource;
use crate::render::GpuBackend;
use crate::scene::{EnvironmentSourceData, TimelineEvent, ViewerCommand};
use crate::viewer::{Result, Viewer};
use std::path::Path;

/// Resolves session paths relative to the session file.
pub fn environment_source(data: &EnvironmentSourceData, base_dir: &Path) -> EnvironmentSource {
    match data {
        EnvironmentSourceData::Preset(name) => EnvironmentSource::Preset(name.clone()),
        EnvironmentSourceData::Path(path) => EnvironmentSource::Path(base_dir.join(path)),
    }
}

pub fn apply_command<B: GpuBackend>(
    viewer: &mut Viewer<B>,
    command: &ViewerCommand,
    base_dir: &Path,
) -> Result<()> {
    match command {
        ViewerCommand::LoadEnvironment { source } => {
            viewer.load_environment(environment_source(source, base_dir))?
        }
        ViewerCommand::SetEnvironmentRotation { degrees, commit } => {
            viewer.set_environment_rotation(*degrees, *commit)
        }
        ViewerCommand::SetEnvironmentIntensity { value } => viewer.set_environment_intensity(*value),
        ViewerCommand::SetBackgroundVisible { visible } => viewer.set_background_visible(*visible),
        ViewerCommand::SetSunEnabled { enabled } => viewer.set_sun_enabled(*enabled),
        ViewerCommand::SetSunIntensity { value } => viewer.set_sun_intensity(*value),
        ViewerCommand::SetSunColor { color } => viewer.set_sun_color(*color),
        ViewerCommand::SetSunDirectionManual {
            azimuth_deg,
            elevation_deg,
        } => viewer.set_sun_direction_manual(*azimuth_deg, *elevation_deg),
        ViewerCommand::SetSunMode { mode } => viewer.set_sun_mode(*mode),
        ViewerCommand::SetShadowQuality { resolution } => viewer.set_shadow_quality(*resolution),
        ViewerCommand::SetShadowSoftness { value } => viewer.set_shadow_softness(*value),
        ViewerCommand::SetShadowIntensity { value } => viewer.set_shadow_intensity(*value),
        ViewerCommand::SetShadowBias { value } => viewer.set_shadow_bias(*value),
        ViewerCommand::SetTransform { transform } => viewer.set_transform(*transform),
        ViewerCommand::SetAnimationEnabled { enabled } => viewer.set_animation_enabled(*enabled),
        ViewerCommand::SetAnimationMode { mode } => viewer.set_animation_mode(*mode),
        ViewerCommand::SetAnimationSpeeds { speeds_deg } => viewer.set_animation_speeds(*speeds_deg),
        ViewerCommand::SetSineParams { params } => viewer.set_sine_params(*params),
        ViewerCommand::OrbitCamera { yaw_deg, pitch_deg } => {
            viewer.orbit_camera(*yaw_deg, *pitch_deg)
        }
        ViewerCommand::EnableProgressive => viewer.enable_progressive_rendering()?,
        ViewerCommand::DisableProgressive => viewer.disable_progressive_rendering(),
        ViewerCommand::SetProgressiveQuality { quality } => viewer.set_progressive_quality(*quality),
        ViewerCommand::ResetProgressiveAccumulation => viewer.reset_progressive_accumulation(),
    }
    Ok(())
}

/// Replays a session timeline frame by frame.
pub struct ScriptedInput {
    events: Vec<TimelineEvent>,
    cursor: usize,
}

impl ScriptedInput {
    /// `events` must be sorted by frame.
    pub fn new(events: Vec<TimelineEvent>) -> Self {
        Self { events, cursor: 0 }
    }

    pub fn last_frame(&self) -> Option<u32> {
        self.events.last().map(|event| event.frame)
    }

    pub fn is_finished(&self) -> bool {
        self.cursor >= self.events.len()
    }

    /// Applies every event scheduled at or before `frame`. A failing command
    /// is logged and the rest of the timeline still runs.
    pub fn apply_due<B: GpuBackend>(
        &mut self,
        frame: u32,
        viewer: &mut Viewer<B>,
        base_dir: &Path,
    ) -> usize {
        let mut applied = 0;
        while let Some(event) = self.events.get(self.cursor) {
            if event.frame > frame {
                break;
            }
            log::debug!("Frame {}: {:?}", frame, event.command);
            if let Err(err) = apply_command(viewer, &event.command, base_dir) {
                log::warn!("Frame {}: command failed: {}", frame, err);
            }
            self.cursor += 1;
            applied += 1;
        }
        applied
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{AssetManager, FilePanoramaProvider};
    use crate::render::calibration::CalibrationTable;
    use crate::render::coordinator::RenderMode;
    use crate::render::gpu::BackendCapabilities;
    use crate::render::software::SoftwareBackend;
    use crate::viewer::ViewerConfig;
    use std::path::PathBuf;
    use std::time::Instant;

    fn viewer() -> Viewer<SoftwareBackend> {
        let config = ViewerConfig {
            width: 8,
            height: 8,
            calibration: CalibrationTable::empty(),
            ..ViewerConfig::default()
        };
        Viewer::new(
            SoftwareBackend::new(BackendCapabilities { progressive: true }),
            AssetManager::new(Box::new(FilePanoramaProvider::new(PathBuf::from(
                "no-such-dir",
            )))),
            config,
            Instant::now(),
        )
    }

    #[test]
    fn events_apply_in_frame_order() {
        let mut viewer = viewer();
        let mut input = ScriptedInput::new(vec![
            TimelineEvent {
                frame: 0,
                command: ViewerCommand::SetSunIntensity { value: 7.0 },
            },
            TimelineEvent {
                frame: 3,
                command: ViewerCommand::EnableProgressive,
            },
        ]);
        let base = Path::new(".");
        assert_eq!(input.apply_due(0, &mut viewer, base), 1);
        assert_eq!(viewer.sun().light().intensity, 7.0);
        assert_eq!(input.apply_due(2, &mut viewer, base), 0);
        assert_eq!(viewer.render_mode(), RenderMode::Rasterized);
        assert_eq!(input.apply_due(3, &mut viewer, base), 1);
        assert_eq!(viewer.render_mode(), RenderMode::Interacting);
        assert!(input.is_finished());
    }

    #[test]
    fn failing_command_does_not_stop_the_timeline() {
        let mut viewer = viewer();
        let mut input = ScriptedInput::new(vec![
            TimelineEvent {
                frame: 0,
                command: ViewerCommand::LoadEnvironment {
                    source: EnvironmentSourceData::Preset("nowhere".into()),
                },
            },
            TimelineEvent {
                frame: 0,
                command: ViewerCommand::SetBackgroundVisible { visible: false },
            },
        ]);
        assert_eq!(input.apply_due(0, &mut viewer, Path::new(".")), 2);
        assert!(!viewer.environment().is_loaded());
        assert!(!viewer.environment().background_visible());
    }

    #[test]
    fn session_paths_are_relative_to_the_session() {
        let source = environment_source(
            &EnvironmentSourceData::Path("hdri/sky.exr".into()),
            Path::new("/sessions"),
        );
        assert!(matches!(
            source,
            EnvironmentSource::Path(path) if path == Path::new("/sessions/hdri/sky.exr")
        ));
    }
}
