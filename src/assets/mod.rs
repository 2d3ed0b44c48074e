pub mod gltf;

use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Decoded equirectangular panorama in linear RGB. Row 0 is the top (sky) row.
#[derive(Debug, Clone, PartialEq)]
pub struct Panorama {
    width: u32,
    height: u32,
    pixels: Vec<[f32; 3]>,
}

/// Content digest of a panorama, used to match calibration entries for
/// uploaded images that are byte-identical to a calibrated preset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PanoramaId(String);

impl PanoramaId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PanoramaId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AssetError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode panorama {path}: {source}")]
    DecodePanorama {
        path: String,
        #[source]
        source: image::ImageError,
    },
    #[error("panorama has invalid dimensions {width}x{height} for {len} pixels")]
    PanoramaDimensions { width: u32, height: u32, len: usize },
    #[error("no panorama found for preset '{name}' under {root}")]
    UnknownPreset { name: String, root: String },
    #[error("failed to parse glTF {path}: {source}")]
    ParseGltf {
        path: String,
        #[source]
        source: ::gltf::Error,
    },
    #[error("glTF {path} has no scene to display")]
    EmptyGltf { path: String },
}

impl Panorama {
    pub fn new(width: u32, height: u32, pixels: Vec<[f32; 3]>) -> Result<Self, AssetError> {
        if width == 0 || height == 0 || pixels.len() != (width as usize) * (height as usize) {
            return Err(AssetError::PanoramaDimensions {
                width,
                height,
                len: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel(&self, x: u32, y: u32) -> [f32; 3] {
        let x = x.min(self.width - 1) as usize;
        let y = y.min(self.height - 1) as usize;
        self.pixels[y * self.width as usize + x]
    }

    pub fn id(&self) -> PanoramaId {
        let mut hasher = Sha256::new();
        hasher.update(self.width.to_le_bytes());
        hasher.update(self.height.to_le_bytes());
        for pixel in &self.pixels {
            for channel in pixel {
                hasher.update(channel.to_le_bytes());
            }
        }
        let digest = hasher.finalize();
        let hex = digest.iter().map(|byte| format!("{byte:02x}")).collect();
        PanoramaId(hex)
    }
}

pub fn decode_panorama_file(path: &Path) -> Result<Panorama, AssetError> {
    let bytes = std::fs::read(path).map_err(|source| AssetError::Read {
        path: path.display().to_string(),
        source,
    })?;
    decode_panorama_bytes(&bytes, &path.display().to_string())
}

pub fn decode_panorama_bytes(bytes: &[u8], label: &str) -> Result<Panorama, AssetError> {
    let decoded = image::load_from_memory(bytes).map_err(|source| AssetError::DecodePanorama {
        path: label.to_string(),
        source,
    })?;
    let rgb = decoded.to_rgb32f();
    let (width, height) = (rgb.width(), rgb.height());
    let pixels = rgb
        .pixels()
        .map(|pixel| [pixel[0], pixel[1], pixel[2]])
        .collect();
    Panorama::new(width, height, pixels)
}

/// Where an environment comes from when the host asks for one.
#[derive(Debug, Clone)]
pub enum EnvironmentSource {
    Preset(String),
    Path(PathBuf),
}

impl EnvironmentSource {
    /// Preset name used for calibration lookup, if any.
    pub fn preset_name(&self) -> Option<&str> {
        match self {
            EnvironmentSource::Preset(name) => Some(name),
            EnvironmentSource::Path(path) => path.file_stem().and_then(|stem| stem.to_str()),
        }
    }

    pub fn label(&self) -> String {
        match self {
            EnvironmentSource::Preset(name) => name.clone(),
            EnvironmentSource::Path(path) => path.display().to_string(),
        }
    }
}

/// Turns an environment source into decoded pixels.
pub trait PanoramaProvider {
    fn decode(&self, source: &EnvironmentSource) -> Result<Arc<Panorama>, AssetError>;
}

/// Resolves presets as `<root>/<name>.hdr` (or `.exr`) and decodes files with `image`.
pub struct FilePanoramaProvider {
    preset_root: PathBuf,
}

const PRESET_EXTENSIONS: [&str; 2] = ["hdr", "exr"];

impl FilePanoramaProvider {
    pub fn new(preset_root: PathBuf) -> Self {
        Self { preset_root }
    }

    fn resolve_preset(&self, name: &str) -> Result<PathBuf, AssetError> {
        PRESET_EXTENSIONS
            .iter()
            .map(|ext| self.preset_root.join(format!("{name}.{ext}")))
            .find(|candidate| candidate.exists())
            .ok_or_else(|| AssetError::UnknownPreset {
                name: name.to_string(),
                root: self.preset_root.display().to_string(),
            })
    }
}

impl PanoramaProvider for FilePanoramaProvider {
    fn decode(&self, source: &EnvironmentSource) -> Result<Arc<Panorama>, AssetError> {
        match source {
            EnvironmentSource::Preset(name) => {
                let path = self.resolve_preset(name)?;
                log::info!("Decoding preset '{}' from {}", name, path.display());
                decode_panorama_file(&path).map(Arc::new)
            }
            EnvironmentSource::Path(path) => {
                log::info!("Decoding panorama {}", path.display());
                decode_panorama_file(path).map(Arc::new)
            }
        }
    }
}

/// Identifies one asynchronous load request. Only the most recent ticket of
/// a sequencer may commit its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTicket {
    generation: u64,
}

#[derive(Debug, Default)]
pub struct LoadSequencer {
    latest: u64,
}

impl LoadSequencer {
    pub fn new() -> Self {
        Self { latest: 0 }
    }

    pub fn begin(&mut self) -> LoadTicket {
        self.latest += 1;
        LoadTicket {
            generation: self.latest,
        }
    }

    pub fn is_current(&self, ticket: LoadTicket) -> bool {
        ticket.generation == self.latest
    }
}

/// Owns the load sequencers for environment and model requests plus the
/// panorama provider used by synchronous loads.
pub struct AssetManager {
    environment_loads: LoadSequencer,
    model_loads: LoadSequencer,
    provider: Box<dyn PanoramaProvider>,
}

impl AssetManager {
    pub fn new(provider: Box<dyn PanoramaProvider>) -> Self {
        Self {
            environment_loads: LoadSequencer::new(),
            model_loads: LoadSequencer::new(),
            provider,
        }
    }

    pub fn begin_environment_load(&mut self) -> LoadTicket {
        self.environment_loads.begin()
    }

    pub fn is_current_environment_load(&self, ticket: LoadTicket) -> bool {
        self.environment_loads.is_current(ticket)
    }

    pub fn begin_model_load(&mut self) -> LoadTicket {
        self.model_loads.begin()
    }

    pub fn is_current_model_load(&self, ticket: LoadTicket) -> bool {
        self.model_loads.is_current(ticket)
    }

    pub fn decode_environment(
        &self,
        source: &EnvironmentSource,
    ) -> Result<Arc<Panorama>, AssetError> {
        self.provider.decode(source)
    }
}
