mod input;
mod timing;

use crate::assets::{AssetManager, FilePanoramaProvider};
use crate::render::calibration::{CalibrationError, CalibrationTable};
use crate::render::capture::{save_png, CaptureError, SequenceWriter};
use crate::render::{BackendCapabilities, Frame, ProgressiveQuality, RenderMode, SoftwareBackend};
use crate::scene::serialization::{load_scene_from_file, SerializationError};
use crate::scene::SceneState;
use crate::viewer::{Viewer, ViewerConfig, ViewerError};
use input::{environment_source, ScriptedInput};
use timing::FrameTiming;

use clap::{ArgAction, Parser};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{Duration, Instant};

const FRAME_DURATION: Duration = Duration::from_nanos(16_666_667);
/// Frames allowed for the scene to settle before accumulation must start.
const SETTLE_FRAMES: u32 = 60;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("session error: {0}")]
    Session(#[from] SerializationError),
    #[error("calibration error: {0}")]
    Calibration(#[from] CalibrationError),
    #[error(transparent)]
    Viewer(#[from] ViewerError),
    #[error("capture error: {0}")]
    Capture(#[from] CaptureError),
}

/// Replays a look-dev session and writes a PNG still or PNG sequence.
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "lookdev")]
#[command(version, about, long_about = None)]
pub struct Options {
    /// Session JSON file (scene state plus command timeline)
    pub session: PathBuf,

    /// Output PNG, or output directory with --sequence
    #[arg(long)]
    pub out: Option<PathBuf>,

    /// Frames to replay; defaults to the last timeline frame plus one
    #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
    pub frames: Option<u32>,

    /// Write every frame as a numbered PNG
    #[arg(long)]
    pub sequence: bool,

    /// Report the progressive renderer as unavailable
    #[arg(long = "no-progressive", action = ArgAction::SetFalse)]
    pub progressive: bool,

    /// Progressive quality preset, overriding the session's
    #[arg(long, value_enum)]
    pub quality: Option<ProgressiveQuality>,

    /// Extra sun calibration table merged over the built-in one
    #[arg(long)]
    pub calibration: Option<PathBuf>,

    /// Directory holding preset panoramas; defaults to `hdri/` next to the session
    #[arg(long)]
    pub presets: Option<PathBuf>,
}

impl Options {
    fn output_path(&self) -> PathBuf {
        match (&self.out, self.sequence) {
            (Some(out), _) => out.clone(),
            (None, true) => PathBuf::from("lookdev_frames"),
            (None, false) => PathBuf::from("lookdev.png"),
        }
    }
}

pub fn run() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();

    let options = Options::parse();
    match run_session(&options) {
        Ok(written) => {
            log::info!("Wrote {}", written.display());
            ExitCode::SUCCESS
        }
        Err(err) => {
            log::error!("{}", err);
            ExitCode::FAILURE
        }
    }
}

/// Replays a session on a fixed 60 Hz clock and writes the result. Returns
/// the still image path or the sequence directory.
pub fn run_session(options: &Options) -> Result<PathBuf, AppError> {
    let scene = load_scene_from_file(&options.session)?;
    let base_dir = options
        .session
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_default();
    log::info!("Session {} loaded", options.session.display());

    let mut calibration = CalibrationTable::builtin();
    if let Some(path) = &options.calibration {
        calibration.merge(CalibrationTable::load(path)?);
    }
    let presets = options
        .presets
        .clone()
        .unwrap_or_else(|| base_dir.join("hdri"));
    let assets = AssetManager::new(Box::new(FilePanoramaProvider::new(presets)));
    let backend = SoftwareBackend::new(BackendCapabilities {
        progressive: options.progressive,
    });
    let mut config = ViewerConfig::from_settings(&scene.render, scene.sun.clone(), calibration);
    if let Some(quality) = options.quality {
        config.quality = quality;
    }

    let start = Instant::now();
    let mut viewer = Viewer::new(backend, assets, config, start);
    apply_initial_state(&mut viewer, &scene, &base_dir)?;

    let mut input = ScriptedInput::new(scene.sorted_timeline());
    let frames = options
        .frames
        .unwrap_or_else(|| input.last_frame().map_or(1, |last| last + 1));
    let output = options.output_path();
    let mut sequence = options.sequence.then(|| SequenceWriter::new(output.clone()));
    let mut timing = FrameTiming::new("lookdev".to_string(), Instant::now());

    let mut last_frame = None;
    for index in 0..frames {
        let now = start + FRAME_DURATION * index;
        viewer.tick(now);
        input.apply_due(index, &mut viewer, &base_dir);
        let frame = render_timed(&mut viewer, &mut timing);
        if let Some(writer) = sequence.as_mut() {
            writer.write(&frame)?;
        }
        last_frame = Some(frame);
    }

    if !input.is_finished() {
        log::warn!("Timeline events after frame {} were not replayed", frames - 1);
    }

    if let Some(writer) = sequence {
        log::info!("Wrote {} frames", writer.frames_written());
        log_summary(&viewer);
        return Ok(output);
    }

    let mut now = start + FRAME_DURATION * frames;
    let mut frame = match last_frame {
        Some(frame) => frame,
        None => viewer.render_frame(),
    };
    if viewer.environment().commit_pending() {
        now = settle_environment(&mut viewer, now);
        frame = viewer.render_frame();
    }
    if viewer.render_mode() != RenderMode::Rasterized {
        frame = converge(&mut viewer, now, &mut timing);
    }
    save_png(&output, &frame)?;
    log_summary(&viewer);
    Ok(output)
}

/// Ticks until a pending environment rotation has been baked into the map,
/// so the still is shaded from the committed map. Returns the advanced clock.
fn settle_environment(viewer: &mut Viewer<SoftwareBackend>, mut now: Instant) -> Instant {
    for _ in 0..SETTLE_FRAMES {
        if !viewer.environment().commit_pending() {
            break;
        }
        now += FRAME_DURATION;
        viewer.tick(now);
    }
    now
}

fn log_summary(viewer: &Viewer<SoftwareBackend>) {
    let environment = viewer.environment();
    if environment.is_loaded() {
        log::info!(
            "Environment '{}' at {:.1} deg, intensity {:.2}, {} map generations",
            environment.label(),
            environment.rotation_degrees(),
            environment.intensity(),
            environment.regenerations()
        );
    }
    log::info!(
        "Model loaded: {}, animation {:?}, sun direction {:?}, {:?} with {} samples",
        viewer.has_model(),
        viewer.animation().mode(),
        viewer.sun().light().direction,
        viewer.render_mode(),
        viewer.sample_count()
    );
    log::debug!(
        "Live backend resources: {:?}",
        viewer.backend().resource_counts()
    );
}

fn apply_initial_state(
    viewer: &mut Viewer<SoftwareBackend>,
    scene: &SceneState,
    base_dir: &Path,
) -> Result<(), AppError> {
    if let Some(model) = &scene.model {
        viewer.load_model(&base_dir.join(&model.path))?;
    }
    if let Some(environment) = &scene.environment {
        viewer.load_environment(environment_source(&environment.source, base_dir))?;
        viewer.set_environment_rotation(environment.rotation_deg, true);
        viewer.set_environment_intensity(environment.intensity);
        viewer.set_background_visible(environment.background_visible);
    }
    viewer.set_transform(scene.transform);
    viewer.set_animation_speeds(scene.animation.turntable_speeds_deg);
    viewer.set_sine_params(scene.animation.sine);
    viewer.set_animation_mode(scene.animation.mode);
    viewer.set_animation_enabled(scene.animation.enabled);
    if let Some(camera) = scene.camera {
        viewer.set_camera_orientation(camera.yaw_deg, camera.pitch_deg);
    }
    if scene.render.progressive {
        if let Err(err) = viewer.enable_progressive_rendering() {
            log::warn!("{}; rendering rasterized only", err);
        }
    }
    Ok(())
}

fn render_timed(viewer: &mut Viewer<SoftwareBackend>, timing: &mut FrameTiming) -> Frame {
    let started = Instant::now();
    let frame = viewer.render_frame();
    timing.set_render_ms(started.elapsed().as_secs_f32() * 1000.0);
    timing.update(Instant::now());
    frame
}

/// Keeps ticking a still scene until the progressive image reaches its
/// sample target or the frame budget runs out.
fn converge(
    viewer: &mut Viewer<SoftwareBackend>,
    mut now: Instant,
    timing: &mut FrameTiming,
) -> Frame {
    let budget = viewer.quality().target_samples() + SETTLE_FRAMES;
    let mut frame = viewer.render_frame();
    for _ in 0..budget {
        if viewer.is_converged() {
            break;
        }
        now += FRAME_DURATION;
        viewer.tick(now);
        frame = render_timed(viewer, timing);
    }
    if !viewer.is_converged() {
        log::warn!(
            "Stopped at {} samples before reaching the {} target",
            viewer.sample_count(),
            viewer.quality().name()
        );
    }
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::serialization::save_scene_to_file;
    use crate::scene::{EnvironmentData, EnvironmentSourceData, TimelineEvent, ViewerCommand};
    use std::time::{SystemTime, UNIX_EPOCH};

    fn parse(list: &[&str]) -> Result<Options, clap::Error> {
        Options::try_parse_from(std::iter::once("lookdev").chain(list.iter().copied()))
    }

    fn temp_dir(label: &str) -> PathBuf {
        let nonce = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_nanos();
        let dir = std::env::temp_dir().join(format!(
            "lookdev_app_{}_{}_{}",
            label,
            std::process::id(),
            nonce
        ));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn write_panorama(dir: &Path) {
        let mut image = image::RgbImage::from_pixel(32, 16, image::Rgb([20, 20, 24]));
        image.put_pixel(24, 8, image::Rgb([255, 255, 255]));
        image.save(dir.join("sky.png")).unwrap();
    }

    #[test]
    fn parses_flags_and_session() {
        let options = parse(&[
            "session.json",
            "--frames",
            "30",
            "--sequence",
            "--no-progressive",
            "--quality",
            "final",
            "--out",
            "frames",
        ])
        .unwrap();
        assert_eq!(options.session, PathBuf::from("session.json"));
        assert_eq!(options.frames, Some(30));
        assert!(options.sequence);
        assert!(!options.progressive);
        assert_eq!(options.quality, Some(ProgressiveQuality::Final));
        assert_eq!(options.output_path(), PathBuf::from("frames"));
    }

    #[test]
    fn rejects_bad_arguments() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["a.json", "--frames", "many"]).is_err());
        assert!(parse(&["a.json", "--frames", "0"]).is_err());
        assert!(parse(&["a.json", "--bogus"]).is_err());
        assert!(parse(&["a.json", "--quality", "ultra"]).is_err());
        assert!(parse(&["a.json", "--out"]).is_err());
        assert!(parse(&["a.json", "b.json"]).is_err());
    }

    #[test]
    fn defaults_keep_progressive_available() {
        let options = parse(&["a.json"]).unwrap();
        assert!(options.progressive);
        assert!(!options.sequence);
        assert_eq!(options.frames, None);
        assert_eq!(options.quality, None);
        assert_eq!(options.output_path(), PathBuf::from("lookdev.png"));
    }

    #[test]
    fn session_renders_converged_still() {
        let dir = temp_dir("still");
        write_panorama(&dir);
        let mut scene = SceneState::default();
        scene.environment = Some(EnvironmentData {
            source: EnvironmentSourceData::Path("sky.png".to_string()),
            rotation_deg: 30.0,
            intensity: 1.0,
            background_visible: true,
        });
        scene.render.width = 12;
        scene.render.height = 8;
        scene.render.progressive = true;
        scene.render.quality = ProgressiveQuality::Draft;
        scene.timeline = vec![TimelineEvent {
            frame: 2,
            command: ViewerCommand::SetSunIntensity { value: 4.0 },
        }];
        let session = dir.join("session.json");
        save_scene_to_file(&scene, &session).unwrap();

        let out = dir.join("still.png");
        let options = Options {
            out: Some(out.clone()),
            ..parse(&[session.to_str().unwrap()]).unwrap()
        };
        let written = run_session(&options).unwrap();
        assert_eq!(written, out);
        let decoded = image::open(&out).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (12, 8));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn session_writes_numbered_sequence() {
        let dir = temp_dir("sequence");
        let mut scene = SceneState::default();
        scene.render.width = 8;
        scene.render.height = 8;
        let session = dir.join("session.json");
        save_scene_to_file(&scene, &session).unwrap();

        let frames_dir = dir.join("frames");
        let options = parse(&[
            session.to_str().unwrap(),
            "--sequence",
            "--frames",
            "3",
            "--out",
            frames_dir.to_str().unwrap(),
        ])
        .unwrap();
        run_session(&options).unwrap();
        assert!(frames_dir.join("frame_00002.png").exists());
        assert!(!frames_dir.join("frame_00003.png").exists());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn still_waits_for_pending_environment_commit() {
        let dir = temp_dir("settle");
        write_panorama(&dir);
        let start = Instant::now();
        let config = ViewerConfig {
            width: 8,
            height: 8,
            ..ViewerConfig::default()
        };
        let mut viewer = Viewer::new(
            SoftwareBackend::new(BackendCapabilities { progressive: false }),
            AssetManager::new(Box::new(FilePanoramaProvider::new(dir.clone()))),
            config,
            start,
        );
        viewer
            .load_environment(environment_source(
                &EnvironmentSourceData::Path("sky.png".to_string()),
                &dir,
            ))
            .unwrap();
        viewer.set_environment_rotation(90.0, false);
        assert!(viewer.environment().commit_pending());

        let settled = settle_environment(&mut viewer, start);
        assert!(!viewer.environment().commit_pending());
        assert_eq!(viewer.environment().regenerations(), 2);
        assert!(settled.duration_since(start) >= Duration::from_millis(300));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn missing_session_is_an_error() {
        let options = parse(&["/definitely/not/here.json"]).unwrap();
        assert!(matches!(run_session(&options), Err(AppError::Session(_))));
    }
}
