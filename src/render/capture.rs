use crate::render::gpu::Frame;
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("failed creating capture directory '{path}': {source}")]
    CreateDir {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed writing '{path}': {source}")]
    Write {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("frame buffer holds {len} bytes, expected {width}x{height} RGBA8")]
    BufferSize { width: u32, height: u32, len: usize },
}

pub fn save_png(path: &Path, frame: &Frame) -> Result<(), CaptureError> {
    let expected = frame.width as usize * frame.height as usize * 4;
    if frame.rgba8.len() != expected || expected == 0 {
        return Err(CaptureError::BufferSize {
            width: frame.width,
            height: frame.height,
            len: frame.rgba8.len(),
        });
    }
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|source| CaptureError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
    }

    image::save_buffer_with_format(
        path,
        &frame.rgba8,
        frame.width,
        frame.height,
        image::ColorType::Rgba8,
        image::ImageFormat::Png,
    )
    .map_err(|source| CaptureError::Write {
        path: path.to_path_buf(),
        source,
    })
}

/// Numbered PNG frames (`frame_00000.png`, ...) in one directory.
pub struct SequenceWriter {
    directory: PathBuf,
    next_index: u32,
}

impl SequenceWriter {
    pub fn new(directory: PathBuf) -> Self {
        Self {
            directory,
            next_index: 0,
        }
    }

    pub fn frames_written(&self) -> u32 {
        self.next_index
    }

    pub fn write(&mut self, frame: &Frame) -> Result<PathBuf, CaptureError> {
        let path = self
            .directory
            .join(format!("frame_{:05}.png", self.next_index));
        save_png(&path, frame)?;
        self.next_index += 1;
        Ok(path)
    }
}
